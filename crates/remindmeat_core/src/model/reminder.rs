//! Reminder domain model.
//!
//! # Responsibility
//! - Define the record shared by the store, the engine, and the gateway.
//!
//! # Invariants
//! - `id` is stable and never reused for another reminder.
//! - `region` always passes `Region::validate()`.
//! - `title` is opaque; core never interprets it.

use crate::model::region::{Region, RegionValidationError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one armed reminder.
///
/// Doubles as the gateway registration identifier.
pub type ReminderId = Uuid;

/// One armed geofence reminder.
///
/// Equality is full-value equality; identity comparisons use `id` explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    /// User-facing label. May be empty.
    pub title: String,
    pub region: Region,
    /// Whether the trigger stays armed after it fires.
    pub repeats: bool,
}

impl Reminder {
    /// Creates a reminder with a generated id.
    pub fn new(title: impl Into<String>, region: Region, repeats: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            region,
            repeats,
        }
    }

    /// Creates a reminder with a caller-provided id.
    ///
    /// Used when reading registrations back from the gateway.
    ///
    /// # Errors
    /// - `NilId` when `id` is the nil UUID.
    /// - `Region` when the region fails validation.
    pub fn with_id(
        id: ReminderId,
        title: impl Into<String>,
        region: Region,
        repeats: bool,
    ) -> Result<Self, ReminderValidationError> {
        let reminder = Self {
            id,
            title: title.into(),
            region,
            repeats,
        };
        reminder.validate()?;
        Ok(reminder)
    }

    /// Validates identity and region invariants.
    pub fn validate(&self) -> Result<(), ReminderValidationError> {
        if self.id.is_nil() {
            return Err(ReminderValidationError::NilId);
        }
        self.region.validate()?;
        Ok(())
    }
}

/// Reminder validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderValidationError {
    NilId,
    Region(RegionValidationError),
}

impl Display for ReminderValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "reminder id must not be nil"),
            Self::Region(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReminderValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NilId => None,
            Self::Region(err) => Some(err),
        }
    }
}

impl From<RegionValidationError> for ReminderValidationError {
    fn from(value: RegionValidationError) -> Self {
        Self::Region(value)
    }
}
