//! Domain model for geofence reminders.
//!
//! # Responsibility
//! - Define the reminder record, its region geometry, and alert events.
//! - Keep identity (`ReminderId`) separate from content for diffing.
//!
//! # Invariants
//! - Every reminder is identified by a stable, never-reused `ReminderId`.
//! - Content changes are full replacements, never partial mutation.

pub mod alert;
pub mod region;
pub mod reminder;
