//! Process-local notification gateway.
//!
//! # Responsibility
//! - Emulate platform registration semantics (quota, radius clamping,
//!   authorization answer, one-shot auto-removal) without persistence.
//! - Journal every call so callers can assert exactly what reached the gateway.
//! - Offer fault injection for unreachable-gateway and per-id unregister failures.
//!
//! # Invariants
//! - Registration order is arming order; re-registering an id replaces it in place.
//! - A delivered non-repeating registration is removed before the event is sent.

use crate::config::GatewayConfig;
use crate::gateway::{
    AuthorizationStatus, GatewayError, GatewayEvent, GatewayEventSender, GatewayResult,
    NotificationGateway, Registration, RegistrationOutcome, RegistrationRequest, RejectionReason,
};
use crate::model::region::Coordinate;
use crate::model::reminder::ReminderId;
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One call observed by the in-memory gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    RequestAuthorization,
    Register(ReminderId),
    Unregister(ReminderId),
    ListRegistrations,
}

#[derive(Debug)]
struct MonitoredRegistration {
    registration: Registration,
    inside: Option<bool>,
}

#[derive(Debug)]
struct MemoryState {
    registrations: Vec<MonitoredRegistration>,
    calls: Vec<GatewayCall>,
    authorization: AuthorizationStatus,
    authorization_answer: AuthorizationStatus,
    unreachable: bool,
    failing_unregisters: HashSet<ReminderId>,
}

/// In-memory `NotificationGateway`.
#[derive(Debug)]
pub struct InMemoryGateway {
    max_registrations: usize,
    max_radius_m: f64,
    state: Mutex<MemoryState>,
    events: Option<GatewayEventSender>,
}

impl InMemoryGateway {
    /// Creates a gateway with limits from `config`.
    pub fn new(config: &GatewayConfig) -> Self {
        let answer = if config.grant_authorization {
            AuthorizationStatus::Granted
        } else {
            AuthorizationStatus::Denied
        };
        Self {
            max_registrations: config.max_registrations,
            max_radius_m: config.max_radius_m,
            state: Mutex::new(MemoryState {
                registrations: Vec::new(),
                calls: Vec::new(),
                authorization: AuthorizationStatus::NotDetermined,
                authorization_answer: answer,
                unreachable: false,
                failing_unregisters: HashSet::new(),
            }),
            events: None,
        }
    }

    /// Attaches the sink deliveries and authorization changes are sent to.
    pub fn with_event_sender(mut self, events: GatewayEventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Simulates the gateway becoming unreachable (or reachable again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock_state().unreachable = unreachable;
    }

    /// Makes every `unregister(id)` call fail until cleared.
    pub fn fail_unregister_for(&self, id: ReminderId) {
        self.lock_state().failing_unregisters.insert(id);
    }

    pub fn clear_unregister_failures(&self) {
        self.lock_state().failing_unregisters.clear();
    }

    /// Simulates the user changing permission in system settings.
    pub fn change_authorization(&self, status: AuthorizationStatus) {
        {
            let mut state = self.lock_state();
            state.authorization = status;
            state.authorization_answer = status;
        }
        self.emit(GatewayEvent::AuthorizationChanged(status));
    }

    /// Returns the call journal in call order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock_state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock_state().calls.clear();
    }

    /// Returns how many `unregister(id)` calls were observed.
    pub fn unregister_count(&self, id: ReminderId) -> usize {
        self.lock_state()
            .calls
            .iter()
            .filter(|call| **call == GatewayCall::Unregister(id))
            .count()
    }

    /// Returns live registrations in arming order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.lock_state()
            .registrations
            .iter()
            .map(|entry| entry.registration.clone())
            .collect()
    }

    pub fn registration_ids(&self) -> Vec<ReminderId> {
        self.lock_state()
            .registrations
            .iter()
            .map(|entry| entry.registration.id)
            .collect()
    }

    /// Fires one registration as if its region had been crossed.
    ///
    /// Returns `false` and sends nothing when `id` is not registered.
    pub fn deliver(&self, id: ReminderId) -> bool {
        let known = self.fire(id);
        if known {
            self.emit(GatewayEvent::Delivered(id));
        }
        known
    }

    /// Sends a delivery callback without touching registrations, as a late
    /// platform callback for an already removed registration would.
    pub fn deliver_stale(&self, id: ReminderId) {
        self.emit(GatewayEvent::Delivered(id));
    }

    /// Evaluates a location sample against every registration and delivers
    /// the ones whose trigger edge was crossed.
    pub fn report_location(&self, point: Coordinate) -> Vec<ReminderId> {
        let fired = {
            let mut state = self.lock_state();
            let mut fired = Vec::new();
            for entry in &mut state.registrations {
                match entry.registration.observe(entry.inside, &point) {
                    Ok((inside, fires)) => {
                        entry.inside = Some(inside);
                        if fires {
                            fired.push(entry.registration.id);
                        }
                    }
                    Err(err) => warn!(
                        "event=location_eval module=gateway.memory status=error reminder_id={} error={}",
                        entry.registration.id, err
                    ),
                }
            }
            fired
        };

        for id in &fired {
            self.fire(*id);
            self.emit(GatewayEvent::Delivered(*id));
        }
        fired
    }

    fn fire(&self, id: ReminderId) -> bool {
        let mut state = self.lock_state();
        let Some(index) = state
            .registrations
            .iter()
            .position(|entry| entry.registration.id == id)
        else {
            return false;
        };
        if !state.registrations[index].registration.repeats {
            state.registrations.remove(index);
        }
        true
    }

    fn emit(&self, event: GatewayEvent) {
        match &self.events {
            Some(sender) => {
                if !sender.send(event) {
                    debug!("event=gateway_emit module=gateway.memory status=skip reason=receiver_closed");
                }
            }
            None => debug!("event=gateway_emit module=gateway.memory status=skip reason=no_sender"),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self, call: GatewayCall) -> GatewayResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.lock_state();
        state.calls.push(call);
        if state.unreachable {
            return Err(GatewayError::Unreachable(
                "in-memory gateway is offline".to_string(),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl NotificationGateway for InMemoryGateway {
    async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus> {
        let mut state = self.begin_call(GatewayCall::RequestAuthorization)?;
        if state.authorization == AuthorizationStatus::NotDetermined {
            state.authorization = state.authorization_answer;
        }
        Ok(state.authorization)
    }

    async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome> {
        let mut state = self.begin_call(GatewayCall::Register(request.id))?;
        if state.authorization == AuthorizationStatus::Denied {
            return Ok(RegistrationOutcome::Rejected(RejectionReason::NotAuthorized));
        }

        let existing = state
            .registrations
            .iter()
            .position(|entry| entry.registration.id == request.id);
        if existing.is_none() && state.registrations.len() >= self.max_registrations {
            return Ok(RegistrationOutcome::Rejected(
                RejectionReason::QuotaExceeded {
                    limit: self.max_registrations,
                },
            ));
        }

        let registration = Registration::accept(request, self.max_radius_m);
        let monitored = MonitoredRegistration {
            registration: registration.clone(),
            inside: None,
        };
        match existing {
            Some(index) => state.registrations[index] = monitored,
            None => state.registrations.push(monitored),
        }
        Ok(RegistrationOutcome::Accepted(registration))
    }

    async fn unregister(&self, id: ReminderId) -> GatewayResult<()> {
        let mut state = self.begin_call(GatewayCall::Unregister(id))?;
        if state.failing_unregisters.contains(&id) {
            return Err(GatewayError::Backend(format!(
                "injected unregister failure for {id}"
            )));
        }
        state.registrations.retain(|entry| entry.registration.id != id);
        Ok(())
    }

    async fn list_registrations(&self) -> GatewayResult<Vec<Registration>> {
        let state = self.begin_call(GatewayCall::ListRegistrations)?;
        Ok(state
            .registrations
            .iter()
            .map(|entry| entry.registration.clone())
            .collect())
    }
}
