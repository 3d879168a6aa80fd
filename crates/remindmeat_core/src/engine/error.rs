//! Core error taxonomy and bulk reconciliation report.

use crate::gateway::GatewayError;
use crate::model::region::RegionValidationError;
use crate::model::reminder::{Reminder, ReminderId, ReminderValidationError};
use crate::store::reminder_store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the reconciliation engine and core runtime.
#[derive(Debug)]
pub enum CoreError {
    /// Store already holds this id. Never expected with engine-issued ids.
    DuplicateId(ReminderId),
    /// Neither entry nor exit was requested.
    InvalidTriggerEdge,
    /// Center or radius failed validation.
    InvalidRegion(RegionValidationError),
    /// The gateway refused the registration because its quota is full.
    QuotaExceeded { limit: usize },
    /// The gateway refused the region for a platform-specific reason.
    RegistrationRejected(String),
    /// Notification permission is denied for this session.
    AuthorizationDenied,
    /// The gateway failed or timed out; the affected reminder is unchanged.
    GatewayUnreachable(GatewayError),
    /// The gateway reported a registration that cannot be represented.
    InvalidRegistration {
        id: ReminderId,
        source: ReminderValidationError,
    },
    /// The owning task is gone.
    EngineStopped,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "duplicate reminder id: {id}"),
            Self::InvalidTriggerEdge => {
                write!(f, "select at least one of arriving or leaving")
            }
            Self::InvalidRegion(err) => write!(f, "{err}"),
            Self::QuotaExceeded { limit } => {
                write!(f, "cannot monitor more than {limit} regions")
            }
            Self::RegistrationRejected(reason) => write!(f, "registration rejected: {reason}"),
            Self::AuthorizationDenied => write!(f, "notification permission denied"),
            Self::GatewayUnreachable(err) => write!(f, "{err}"),
            Self::InvalidRegistration { id, source } => {
                write!(f, "invalid registration {id}: {source}")
            }
            Self::EngineStopped => write!(f, "reminder engine is not running"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidRegion(err) => Some(err),
            Self::GatewayUnreachable(err) => Some(err),
            Self::InvalidRegistration { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl CoreError {
    /// Stable code for logs and UI mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "duplicate_id",
            Self::InvalidTriggerEdge => "invalid_trigger_edge",
            Self::InvalidRegion(_) => "invalid_region",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::RegistrationRejected(_) => "registration_rejected",
            Self::AuthorizationDenied => "authorization_denied",
            Self::GatewayUnreachable(_) => "gateway_unreachable",
            Self::InvalidRegistration { .. } => "invalid_registration",
            Self::EngineStopped => "engine_stopped",
        }
    }

    /// Returns whether the UI can correct input or try again later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidTriggerEdge
                | Self::InvalidRegion(_)
                | Self::QuotaExceeded { .. }
                | Self::RegistrationRejected(_)
                | Self::GatewayUnreachable(_)
        )
    }
}

impl From<RegionValidationError> for CoreError {
    fn from(value: RegionValidationError) -> Self {
        match value {
            RegionValidationError::NoTriggerEdge => Self::InvalidTriggerEdge,
            other => Self::InvalidRegion(other),
        }
    }
}

impl From<GatewayError> for CoreError {
    fn from(value: GatewayError) -> Self {
        Self::GatewayUnreachable(value)
    }
}

impl From<StoreError> for CoreError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateId(id) => Self::DuplicateId(id),
            StoreError::InvalidRegistration { id, source } => {
                Self::InvalidRegistration { id, source }
            }
            StoreError::Gateway(err) => Self::GatewayUnreachable(err),
        }
    }
}

/// Outcome of one bulk reconciliation pass.
///
/// Failures are partial: every removal is attempted, and entries whose
/// unregister failed stay in the store so store and gateway still agree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReconcileReport {
    /// Ids unregistered and removed from the store, in previous store order.
    pub removed: Vec<ReminderId>,
    /// Number of entries kept untouched.
    pub retained: usize,
    /// Proposed entries that were not armed and were left out of the store.
    pub unarmed: Vec<Reminder>,
    /// Removals whose unregister call failed.
    pub failed: Vec<(ReminderId, GatewayError)>,
}

impl BulkReconcileReport {
    /// Returns whether every requested removal succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<ReminderId> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;
    use crate::gateway::GatewayError;
    use crate::model::region::RegionValidationError;

    #[test]
    fn missing_edge_maps_to_invalid_trigger_edge() {
        let err = CoreError::from(RegionValidationError::NoTriggerEdge);
        assert!(matches!(err, CoreError::InvalidTriggerEdge));
        assert_eq!(err.code(), "invalid_trigger_edge");
        assert!(err.is_recoverable());
    }

    #[test]
    fn authorization_denied_is_terminal() {
        assert!(!CoreError::AuthorizationDenied.is_recoverable());
        assert!(!CoreError::EngineStopped.is_recoverable());
    }

    #[test]
    fn gateway_errors_keep_source() {
        let err = CoreError::from(GatewayError::Unreachable("offline".to_string()));
        assert_eq!(err.code(), "gateway_unreachable");
        assert!(std::error::Error::source(&err).is_some());
    }
}
