//! Alert event model.
//!
//! An alert is the ephemeral record that a reminder fired and is waiting for
//! the user to acknowledge it.

use crate::model::reminder::{Reminder, ReminderId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A delivered reminder awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub reminder_id: ReminderId,
    /// Unix epoch milliseconds when the engine routed the delivery.
    pub fired_at_ms: i64,
    /// Snapshot of the reminder taken before any cleanup.
    pub reminder: Reminder,
}

impl AlertEvent {
    /// Builds an event for `reminder` stamped with the current wall clock.
    pub fn fired_now(reminder: Reminder) -> Self {
        Self::fired_at(reminder, now_epoch_ms())
    }

    pub fn fired_at(reminder: Reminder, fired_at_ms: i64) -> Self {
        Self {
            reminder_id: reminder.id,
            fired_at_ms,
            reminder,
        }
    }
}

/// User decision when acknowledging an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertResolution {
    /// Clear the alert and leave the reminder as it is.
    Keep,
    /// Clear the alert and delete a one-shot reminder.
    Dismiss,
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
