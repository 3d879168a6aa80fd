//! Core of the RemindMeAt geofence reminder app.
//! Owns reminder state and keeps it reconciled with the notification gateway.

pub mod config;
pub mod db;
pub mod engine;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod store;

pub use config::{ConfigError, CoreConfig, GatewayConfig, LoggingConfig};
pub use engine::alert_router::{AlertPolicy, AlertRouter};
pub use engine::error::{BulkReconcileReport, CoreError, CoreResult};
pub use engine::reconcile::{CreateReminderRequest, ReconciliationEngine};
pub use engine::runtime::{ReminderCore, ReminderCoreHandle};
pub use gateway::memory::InMemoryGateway;
pub use gateway::sqlite::SqliteGateway;
pub use gateway::timeout::{with_configured_timeout, TimeoutGateway};
pub use gateway::{
    AuthorizationStatus, GatewayError, GatewayEvent, GatewayEventSender, NotificationGateway,
};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::alert::{AlertEvent, AlertResolution};
pub use model::region::{Coordinate, EdgeFlags, Region, RegionValidationError, TriggerEdge};
pub use model::reminder::{Reminder, ReminderId};
pub use store::reminder_store::ReminderStore;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
