//! Reconciliation engine and its owning runtime.
//!
//! # Responsibility
//! - Keep the reminder store and the gateway's registration set equal.
//! - Route deliveries to a single acknowledgeable alert slot.
//! - Serialize every mutation on one owning task.
//!
//! # Invariants
//! - Gateway calls happen before store mutations; a failed call never
//!   leaves the store ahead of the gateway.
//! - Store and alert slot are only written from the owning task.

pub mod alert_router;
pub mod error;
pub mod reconcile;
pub mod runtime;
