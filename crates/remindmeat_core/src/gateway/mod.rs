//! Notification gateway contracts.
//!
//! # Responsibility
//! - Describe the platform region-monitoring/alerting capability the core consumes.
//! - Carry gateway-originated callbacks (deliveries, authorization changes) as
//!   channel events so they can be marshaled onto the engine's owning task.
//!
//! # Invariants
//! - `unregister` is idempotent: unknown ids are not an error.
//! - `list_registrations` returns typed registrations; there is no
//!   narrowing of generic requests on the read path.
//! - An accepted registration echoes the values the gateway actually armed
//!   (radius may be clamped).

use crate::model::region::{Coordinate, EdgeFlags, Region, RegionTransition, TriggerEdge};
use crate::model::reminder::{Reminder, ReminderId, ReminderValidationError};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod memory;
pub mod sqlite;
pub mod timeout;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Notification permission state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Granted,
    Denied,
}

impl AuthorizationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDetermined => "not_determined",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "not_determined" => Some(Self::NotDetermined),
            "granted" => Some(Self::Granted),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Region-monitoring registration submitted to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRequest {
    pub id: ReminderId,
    pub center: Coordinate,
    pub radius_m: f64,
    pub flags: EdgeFlags,
    pub title: String,
    pub repeats: bool,
}

impl RegistrationRequest {
    /// Builds the request arming `reminder`'s region.
    pub fn for_reminder(reminder: &Reminder) -> Self {
        Self {
            id: reminder.id,
            center: reminder.region.center,
            radius_m: reminder.region.radius_m,
            flags: reminder.region.trigger_edge.flags(),
            title: reminder.title.clone(),
            repeats: reminder.repeats,
        }
    }
}

/// Live registration as the gateway reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: ReminderId,
    pub center: Coordinate,
    pub radius_m: f64,
    pub flags: EdgeFlags,
    pub title: String,
    pub repeats: bool,
}

impl Registration {
    /// Builds the registration a gateway arms for `request` after clamping
    /// the radius to `max_radius_m`.
    pub fn accept(request: RegistrationRequest, max_radius_m: f64) -> Self {
        Self {
            id: request.id,
            center: request.center,
            radius_m: request.radius_m.min(max_radius_m),
            flags: request.flags,
            title: request.title,
            repeats: request.repeats,
        }
    }

    /// Returns the region this registration monitors.
    pub fn region(&self) -> Result<Region, ReminderValidationError> {
        let edge = TriggerEdge::from_flags(self.flags)?;
        Ok(Region::new(self.center, self.radius_m, edge)?)
    }

    /// Converts the registration into the store-side reminder.
    pub fn to_reminder(&self) -> Result<Reminder, ReminderValidationError> {
        Reminder::with_id(self.id, self.title.clone(), self.region()?, self.repeats)
    }

    /// Evaluates one location sample against this registration.
    ///
    /// Returns the new presence and whether the trigger fires.
    pub fn observe(
        &self,
        was_inside: Option<bool>,
        point: &Coordinate,
    ) -> Result<(bool, bool), ReminderValidationError> {
        let region = self.region()?;
        let transition = region.transition(was_inside, point);
        let inside = match transition {
            RegionTransition::Entered => true,
            RegionTransition::Exited => false,
            RegionTransition::Unchanged => was_inside.unwrap_or(false),
        };
        Ok((inside, region.fires_on(transition)))
    }
}

/// Why the gateway refused a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The platform limit of concurrently monitored regions is reached.
    QuotaExceeded { limit: usize },
    /// Notification permission is not granted.
    NotAuthorized,
    /// The platform refused the region shape.
    InvalidRegion(String),
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded { limit } => {
                write!(f, "registration quota of {limit} regions exceeded")
            }
            Self::NotAuthorized => write!(f, "notifications are not authorized"),
            Self::InvalidRegion(details) => write!(f, "region rejected: {details}"),
        }
    }
}

/// Result of one `register` call that reached the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Accepted(Registration),
    Rejected(RejectionReason),
}

/// Transport-level gateway failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway could not be reached or refused to answer.
    Unreachable(String),
    /// The call did not complete within the boundary timeout.
    Timeout(Duration),
    /// The gateway's own storage failed.
    Backend(String),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(details) => write!(f, "notification gateway unreachable: {details}"),
            Self::Timeout(after) => {
                write!(f, "notification gateway timed out after {}ms", after.as_millis())
            }
            Self::Backend(details) => write!(f, "notification gateway backend error: {details}"),
        }
    }
}

impl Error for GatewayError {}

/// Presentation options requested while the app is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationOptions {
    pub banner: bool,
    pub sound: bool,
    pub badge: bool,
    pub list: bool,
}

impl PresentationOptions {
    pub const ALL: Self = Self {
        banner: true,
        sound: true,
        badge: true,
        list: true,
    };
}

/// Gateway-originated callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A registered region fired.
    Delivered(ReminderId),
    /// The user changed notification permission outside the app.
    AuthorizationChanged(AuthorizationStatus),
}

pub type GatewayEventReceiver = mpsc::UnboundedReceiver<GatewayEvent>;

/// Cloneable sink gateways use to hand callbacks to the engine's task.
#[derive(Debug, Clone)]
pub struct GatewayEventSender {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl GatewayEventSender {
    /// Creates a connected sender/receiver pair.
    pub fn channel() -> (Self, GatewayEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Forwards one event. Returns `false` when the engine task is gone.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn delivered(&self, id: ReminderId) -> bool {
        self.send(GatewayEvent::Delivered(id))
    }
}

/// Platform region-monitoring capability.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Asks the user for notification permission.
    async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus>;

    /// Arms one region trigger.
    async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome>;

    /// Disarms one region trigger. Unknown ids succeed.
    async fn unregister(&self, id: ReminderId) -> GatewayResult<()>;

    /// Lists every live registration, in arming order.
    async fn list_registrations(&self) -> GatewayResult<Vec<Registration>>;

    /// Options for alerts that fire while the app is foregrounded.
    fn will_present_while_foreground(&self) -> PresentationOptions {
        PresentationOptions::ALL
    }
}

#[async_trait]
impl<G: NotificationGateway + ?Sized> NotificationGateway for Arc<G> {
    async fn request_authorization(&self) -> GatewayResult<AuthorizationStatus> {
        (**self).request_authorization().await
    }

    async fn register(&self, request: RegistrationRequest) -> GatewayResult<RegistrationOutcome> {
        (**self).register(request).await
    }

    async fn unregister(&self, id: ReminderId) -> GatewayResult<()> {
        (**self).unregister(id).await
    }

    async fn list_registrations(&self) -> GatewayResult<Vec<Registration>> {
        (**self).list_registrations().await
    }

    fn will_present_while_foreground(&self) -> PresentationOptions {
        (**self).will_present_while_foreground()
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayEvent, GatewayEventSender, Registration, RegistrationRequest};
    use crate::model::region::{Coordinate, EdgeFlags, Region, TriggerEdge};
    use crate::model::reminder::Reminder;

    fn reminder(edge: TriggerEdge) -> Reminder {
        let region = Region::new(Coordinate::new(37.0, -122.0), 400.0, edge).expect("region");
        Reminder::new("Pharmacy", region, false)
    }

    #[test]
    fn request_carries_reminder_flags() {
        let reminder = reminder(TriggerEdge::Both);
        let request = RegistrationRequest::for_reminder(&reminder);
        assert_eq!(request.id, reminder.id);
        assert_eq!(request.flags, EdgeFlags::BOTH);
        assert_eq!(request.radius_m, 400.0);
    }

    #[test]
    fn accept_clamps_radius_and_round_trips_into_reminder() {
        let reminder = reminder(TriggerEdge::OnExit);
        let request = RegistrationRequest::for_reminder(&reminder);
        let registration = Registration::accept(request, 100.0);
        assert_eq!(registration.radius_m, 100.0);

        let restored = registration.to_reminder().expect("registration converts");
        assert_eq!(restored.id, reminder.id);
        assert_eq!(restored.region.trigger_edge, TriggerEdge::OnExit);
        assert_eq!(restored.region.radius_m, 100.0);
    }

    #[test]
    fn observe_reports_presence_and_firing() {
        let request = RegistrationRequest::for_reminder(&reminder(TriggerEdge::OnExit));
        let registration = Registration::accept(request, 1_000.0);
        let inside = Coordinate::new(37.0, -122.0);
        let outside = Coordinate::new(37.1, -122.0);

        assert_eq!(registration.observe(None, &inside).expect("observe"), (true, false));
        assert_eq!(registration.observe(Some(true), &outside).expect("observe"), (false, true));
        assert_eq!(registration.observe(Some(false), &outside).expect("observe"), (false, false));
    }

    #[test]
    fn sender_reports_closed_receiver() {
        let (sender, mut receiver) = GatewayEventSender::channel();
        let id = uuid::Uuid::new_v4();
        assert!(sender.delivered(id));
        assert_eq!(receiver.try_recv().expect("event"), GatewayEvent::Delivered(id));

        drop(receiver);
        assert!(!sender.delivered(id));
    }
}
