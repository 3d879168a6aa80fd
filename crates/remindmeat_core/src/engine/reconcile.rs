//! Reconciliation engine between the reminder store and the gateway.
//!
//! # Responsibility
//! - Mediate every create/delete/bulk mutation so each store entry has exactly
//!   one live gateway registration and vice versa.
//! - Turn gateway deliveries into alerts, then clean up fired one-shot reminders.
//! - Track notification authorization for the session.
//!
//! # Invariants
//! - Gateway first, store second: the store never holds an entry the gateway
//!   refused, and never drops an entry the gateway still monitors.
//! - Requests without an armed edge never reach the gateway.
//! - Once authorization is denied, no further registration is attempted.
//! - Delivery routing reads the store; removal is a separate step after routing.

use crate::config::CoreConfig;
use crate::engine::alert_router::{Acknowledgement, AlertRouter};
use crate::engine::error::{BulkReconcileReport, CoreError, CoreResult};
use crate::gateway::{
    AuthorizationStatus, GatewayEvent, NotificationGateway, PresentationOptions,
    RegistrationOutcome, RegistrationRequest, RejectionReason,
};
use crate::model::alert::{AlertEvent, AlertResolution};
use crate::model::region::{Coordinate, EdgeFlags, Region, TriggerEdge};
use crate::model::reminder::{Reminder, ReminderId};
use crate::store::reminder_store::ReminderStore;
use log::{debug, error, info, warn};
use std::time::Instant;
use uuid::Uuid;

/// Request model for arming a new reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateReminderRequest {
    pub title: String,
    pub center: Coordinate,
    /// Requested radius in meters. The gateway may clamp it.
    pub radius_m: f64,
    pub edges: EdgeFlags,
    /// `None` uses `CoreConfig::default_repeats`.
    pub repeats: Option<bool>,
}

impl CreateReminderRequest {
    pub fn new(
        title: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
        edge: TriggerEdge,
    ) -> Self {
        Self::with_edges(title, center, radius_m, edge.flags())
    }

    /// Builds a request from raw entry/exit toggles as a form would submit them.
    pub fn with_edges(
        title: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
        edges: EdgeFlags,
    ) -> Self {
        Self {
            title: title.into(),
            center,
            radius_m,
            edges,
            repeats: None,
        }
    }

    pub fn repeating(mut self, repeats: bool) -> Self {
        self.repeats = Some(repeats);
        self
    }
}

/// Owner of the reminder store, the alert slot and the gateway handle.
///
/// Not designed for concurrent writers: run it on one task (see
/// `engine::runtime::ReminderCore`) and feed gateway callbacks through
/// `handle_gateway_event`.
pub struct ReconciliationEngine<G> {
    gateway: G,
    store: ReminderStore,
    alerts: AlertRouter,
    authorization: AuthorizationStatus,
    default_repeats: bool,
}

impl<G: NotificationGateway> ReconciliationEngine<G> {
    pub fn new(gateway: G, config: &CoreConfig) -> Self {
        Self {
            gateway,
            store: ReminderStore::new(),
            alerts: AlertRouter::new(config.alert_policy),
            authorization: AuthorizationStatus::NotDetermined,
            default_repeats: config.default_repeats,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &ReminderStore {
        &self.store
    }

    pub fn alerts(&self) -> &AlertRouter {
        &self.alerts
    }

    pub fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }

    /// Presentation options for alerts arriving while foregrounded.
    pub fn will_present_while_foreground(&self) -> PresentationOptions {
        self.gateway.will_present_while_foreground()
    }

    /// Asks the gateway for notification permission.
    ///
    /// # Errors
    /// - `AuthorizationDenied` the first time a denial is observed.
    /// - `GatewayUnreachable` when the gateway call fails.
    pub async fn request_authorization(&mut self) -> CoreResult<AuthorizationStatus> {
        let status = self.gateway.request_authorization().await?;
        let was_denied = self.authorization == AuthorizationStatus::Denied;
        self.apply_authorization(status);
        if status == AuthorizationStatus::Denied && !was_denied {
            return Err(CoreError::AuthorizationDenied);
        }
        Ok(status)
    }

    /// Records an authorization result reported by the gateway.
    pub fn apply_authorization(&mut self, status: AuthorizationStatus) {
        if self.authorization != status {
            info!(
                "event=authorization_changed module=engine status=ok from={} to={}",
                self.authorization.as_str(),
                status.as_str()
            );
        }
        self.authorization = status;
    }

    /// Resynchronizes the store to the gateway's durable registrations.
    pub async fn load(&mut self) -> CoreResult<Vec<Reminder>> {
        let started_at = Instant::now();
        match self.store.load(&self.gateway).await {
            Ok(reminders) => {
                info!(
                    "event=engine_load module=engine status=ok count={} duration_ms={}",
                    reminders.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(reminders)
            }
            Err(err) => {
                let err = CoreError::from(err);
                error!(
                    "event=engine_load module=engine status=error error_code={} error={}",
                    err.code(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Arms a new reminder and appends it to the store.
    ///
    /// # Errors
    /// - `AuthorizationDenied` when permission was denied earlier this session.
    /// - `InvalidTriggerEdge`/`InvalidRegion` for bad input (gateway untouched).
    /// - `QuotaExceeded`/`RegistrationRejected` when the gateway refuses.
    /// - `GatewayUnreachable` when the gateway call fails.
    pub async fn create(&mut self, request: CreateReminderRequest) -> CoreResult<Reminder> {
        if self.authorization == AuthorizationStatus::Denied {
            debug!("event=reminder_create module=engine status=skip reason=authorization_denied");
            return Err(CoreError::AuthorizationDenied);
        }

        let edge = TriggerEdge::from_flags(request.edges)?;
        let region = Region::new(request.center, request.radius_m, edge)?;
        let reminder = Reminder {
            id: self.issue_id(),
            title: request.title,
            region,
            repeats: request.repeats.unwrap_or(self.default_repeats),
        };

        let outcome = self
            .gateway
            .register(RegistrationRequest::for_reminder(&reminder))
            .await
            .map_err(|err| {
                warn!(
                    "event=reminder_create module=engine status=error reminder_id={} error_code=gateway_unreachable error={}",
                    reminder.id, err
                );
                CoreError::GatewayUnreachable(err)
            })?;

        let registration = match outcome {
            RegistrationOutcome::Accepted(registration) => registration,
            RegistrationOutcome::Rejected(reason) => {
                warn!(
                    "event=reminder_create module=engine status=error reminder_id={} error_code=rejected reason={}",
                    reminder.id, reason
                );
                return Err(self.rejection_error(reason));
            }
        };

        let armed = match registration.to_reminder() {
            Ok(armed) if armed.id == reminder.id => armed,
            Ok(armed) => {
                // The gateway armed a foreign id; disarm it so store and gateway agree.
                self.disarm_best_effort(armed.id).await;
                return Err(CoreError::RegistrationRejected(format!(
                    "gateway echoed id {} for request {}",
                    armed.id, reminder.id
                )));
            }
            Err(source) => {
                self.disarm_best_effort(reminder.id).await;
                return Err(CoreError::InvalidRegistration {
                    id: reminder.id,
                    source,
                });
            }
        };

        if let Err(err) = self.store.add(armed.clone()) {
            error!(
                "event=reminder_create module=engine status=error reminder_id={} error_code=duplicate_id",
                armed.id
            );
            return Err(err.into());
        }

        info!(
            "event=reminder_create module=engine status=ok reminder_id={} edge={} repeats={} clamped={}",
            armed.id,
            armed.region.trigger_edge.as_str(),
            armed.repeats,
            armed.region.radius_m < reminder.region.radius_m
        );
        Ok(armed)
    }

    /// Disarms and removes one reminder.
    ///
    /// Unknown ids succeed. When the gateway call fails the store is untouched.
    pub async fn delete(&mut self, id: ReminderId) -> CoreResult<()> {
        if let Err(err) = self.gateway.unregister(id).await {
            warn!(
                "event=reminder_delete module=engine status=error reminder_id={} error_code=gateway_unreachable error={}",
                id, err
            );
            return Err(CoreError::GatewayUnreachable(err));
        }

        let removed = self.store.remove_by_id(id).is_some();
        info!(
            "event=reminder_delete module=engine status=ok reminder_id={} removed_from_store={}",
            id, removed
        );
        Ok(())
    }

    /// Replaces the reminder list with `proposed`.
    ///
    /// Entries present unchanged are untouched. Every other current entry is
    /// unregistered once; failures keep that entry in the store and are listed
    /// in the report. Proposed entries that are not already armed are reported
    /// as `unarmed` and left out. The store is swapped in one assignment after
    /// all gateway calls finish.
    pub async fn reconcile_bulk(
        &mut self,
        proposed: Vec<Reminder>,
    ) -> CoreResult<BulkReconcileReport> {
        let plan = self.store.plan_replace(proposed);
        let is_noop = plan.is_noop();
        let mut report = BulkReconcileReport {
            retained: plan.retained.len(),
            unarmed: plan.unarmed,
            ..BulkReconcileReport::default()
        };

        if is_noop {
            debug!("event=reconcile_bulk module=engine status=skip reason=no_removals");
            if self.store.reminders() != plan.retained.as_slice() {
                self.store.replace_all(plan.retained)?;
            }
            return Ok(report);
        }

        let mut contents = plan.retained;
        for reminder in plan.removed {
            match self.gateway.unregister(reminder.id).await {
                Ok(()) => report.removed.push(reminder.id),
                Err(err) => {
                    warn!(
                        "event=reconcile_bulk module=engine status=error reminder_id={} error={}",
                        reminder.id, err
                    );
                    report.failed.push((reminder.id, err));
                    contents.push(reminder);
                }
            }
        }

        self.store.replace_all(contents)?;
        info!(
            "event=reconcile_bulk module=engine status=ok removed={} retained={} unarmed={} failed={}",
            report.removed.len(),
            report.retained,
            report.unarmed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Routes a gateway delivery to the alert slot.
    ///
    /// Unknown ids are late callbacks for already removed reminders and are
    /// dropped. A fired one-shot reminder is removed after the alert is routed.
    pub async fn on_delivery_received(&mut self, id: ReminderId) -> Option<AlertEvent> {
        let Some(reminder) = self.store.get(id).cloned() else {
            debug!(
                "event=delivery_received module=engine status=skip reason=unknown_id reminder_id={}",
                id
            );
            return None;
        };

        let event = AlertEvent::fired_now(reminder);
        self.alerts.publish(event.clone());
        info!(
            "event=delivery_received module=engine status=ok reminder_id={} repeats={}",
            id, event.reminder.repeats
        );

        if !event.reminder.repeats {
            if let Err(err) = self.delete(id).await {
                warn!(
                    "event=delivery_cleanup module=engine status=error reminder_id={} error_code={}",
                    id,
                    err.code()
                );
            }
        }
        Some(event)
    }

    /// Clears the current alert; `Dismiss` on a one-shot reminder also deletes it.
    ///
    /// Returns the acknowledged event, or `None` when no alert was pending.
    pub async fn acknowledge_alert(
        &mut self,
        resolution: AlertResolution,
    ) -> CoreResult<Option<AlertEvent>> {
        let Some(Acknowledgement {
            event,
            delete_reminder,
            ..
        }) = self.alerts.acknowledge(resolution)
        else {
            return Ok(None);
        };

        if delete_reminder {
            self.delete(event.reminder_id).await?;
        }
        Ok(Some(event))
    }

    /// Applies one gateway-originated callback on the owning task.
    pub async fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Delivered(id) => {
                self.on_delivery_received(id).await;
            }
            GatewayEvent::AuthorizationChanged(status) => self.apply_authorization(status),
        }
    }

    fn issue_id(&self) -> ReminderId {
        loop {
            let id = Uuid::new_v4();
            if !self.store.has_issued(id) {
                return id;
            }
        }
    }

    fn rejection_error(&mut self, reason: RejectionReason) -> CoreError {
        match reason {
            RejectionReason::QuotaExceeded { limit } => CoreError::QuotaExceeded { limit },
            RejectionReason::NotAuthorized => {
                self.apply_authorization(AuthorizationStatus::Denied);
                CoreError::AuthorizationDenied
            }
            RejectionReason::InvalidRegion(details) => CoreError::RegistrationRejected(details),
        }
    }

    async fn disarm_best_effort(&self, id: ReminderId) {
        if let Err(err) = self.gateway.unregister(id).await {
            error!(
                "event=reminder_disarm module=engine status=error reminder_id={} error={}",
                id, err
            );
        }
    }
}
