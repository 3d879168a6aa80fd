//! Reminder store layer.
//!
//! # Responsibility
//! - Hold the authoritative ordered list of armed reminders.
//! - Publish every committed change to observers.
//! - Compute id-keyed replacement diffs without mutating state.
//!
//! # Invariants
//! - Ids in the store are unique; ids are remembered after removal so they
//!   are never issued again.
//! - Observers only ever see whole-list snapshots.

pub mod reminder_store;
