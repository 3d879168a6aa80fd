//! Alert routing to the presentation layer.
//!
//! # Responsibility
//! - Hold the delivered reminder awaiting user acknowledgement.
//! - Publish the current slot to observers on every change.
//! - Decide whether an acknowledgement should delete the reminder.
//!
//! # Invariants
//! - At most one event is current at any time.
//! - `Overwrite` replaces an unacknowledged event; `Queue` holds later events
//!   back in arrival order until the current one is acknowledged.
//! - Repeating reminders are never marked for deletion by acknowledgement.

use crate::model::alert::{AlertEvent, AlertResolution};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::watch;

/// What happens to an unacknowledged alert when another one fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPolicy {
    /// The newest event replaces the current one.
    #[default]
    Overwrite,
    /// Later events wait until the current one is acknowledged.
    Queue,
}

/// Acknowledged alert plus the follow-up the engine must perform.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledgement {
    pub event: AlertEvent,
    pub resolution: AlertResolution,
    /// Set for `Dismiss` on a non-repeating reminder.
    pub delete_reminder: bool,
}

/// Single-slot alert holder.
#[derive(Debug)]
pub struct AlertRouter {
    policy: AlertPolicy,
    current: watch::Sender<Option<AlertEvent>>,
    queued: VecDeque<AlertEvent>,
}

impl AlertRouter {
    pub fn new(policy: AlertPolicy) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            policy,
            current,
            queued: VecDeque::new(),
        }
    }

    /// Returns a live view of the current alert slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<AlertEvent>> {
        self.current.subscribe()
    }

    /// Read-only peek at the current alert.
    pub fn current(&self) -> Option<AlertEvent> {
        self.current.borrow().clone()
    }

    /// Number of events waiting behind the current one.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Makes `event` pending.
    ///
    /// Returns the unacknowledged event it overwrote, if any.
    pub fn publish(&mut self, event: AlertEvent) -> Option<AlertEvent> {
        let occupied = self.current.borrow().is_some();
        if occupied && self.policy == AlertPolicy::Queue {
            info!(
                "event=alert_publish module=alert status=ok mode=queued reminder_id={} queued={}",
                event.reminder_id,
                self.queued.len() + 1
            );
            self.queued.push_back(event);
            return None;
        }

        let reminder_id = event.reminder_id;
        let replaced = self.current.send_replace(Some(event));
        if let Some(previous) = &replaced {
            warn!(
                "event=alert_publish module=alert status=ok mode=overwrite reminder_id={} replaced_reminder_id={}",
                reminder_id, previous.reminder_id
            );
        } else {
            info!(
                "event=alert_publish module=alert status=ok mode=set reminder_id={}",
                reminder_id
            );
        }
        replaced
    }

    /// Clears the current alert and promotes the next queued one.
    ///
    /// Returns `None` when no alert is pending.
    pub fn acknowledge(&mut self, resolution: AlertResolution) -> Option<Acknowledgement> {
        let next = self.queued.pop_front();
        let event = self.current.send_replace(next)?;
        let delete_reminder = resolution == AlertResolution::Dismiss && !event.reminder.repeats;

        info!(
            "event=alert_ack module=alert status=ok reminder_id={} resolution={:?} delete_reminder={}",
            event.reminder_id, resolution, delete_reminder
        );
        Some(Acknowledgement {
            event,
            resolution,
            delete_reminder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AlertPolicy, AlertRouter};
    use crate::model::alert::{AlertEvent, AlertResolution};
    use crate::model::region::{Coordinate, Region, TriggerEdge};
    use crate::model::reminder::Reminder;

    fn event(title: &str, repeats: bool) -> AlertEvent {
        let region =
            Region::new(Coordinate::new(-33.87, 151.21), 60.0, TriggerEdge::Both).expect("region");
        AlertEvent::fired_at(Reminder::new(title, region, repeats), 1_700_000_000_000)
    }

    #[test]
    fn overwrite_replaces_unacknowledged_event() {
        let mut router = AlertRouter::new(AlertPolicy::Overwrite);
        let first = event("first", false);
        let second = event("second", false);

        assert!(router.publish(first.clone()).is_none());
        assert_eq!(router.publish(second.clone()), Some(first));
        assert_eq!(router.current(), Some(second));
        assert_eq!(router.queued_len(), 0);
    }

    #[test]
    fn queue_promotes_next_event_on_acknowledge() {
        let mut router = AlertRouter::new(AlertPolicy::Queue);
        let first = event("first", false);
        let second = event("second", false);
        router.publish(first.clone());
        router.publish(second.clone());
        assert_eq!(router.current(), Some(first.clone()));
        assert_eq!(router.queued_len(), 1);

        let ack = router.acknowledge(AlertResolution::Keep).expect("pending alert");
        assert_eq!(ack.event, first);
        assert_eq!(router.current(), Some(second));
    }

    #[test]
    fn dismiss_marks_only_one_shot_reminders_for_deletion() {
        let mut router = AlertRouter::new(AlertPolicy::Overwrite);
        router.publish(event("one-shot", false));
        let ack = router.acknowledge(AlertResolution::Dismiss).expect("pending");
        assert!(ack.delete_reminder);

        router.publish(event("repeating", true));
        let ack = router.acknowledge(AlertResolution::Dismiss).expect("pending");
        assert!(!ack.delete_reminder);

        router.publish(event("kept", false));
        let ack = router.acknowledge(AlertResolution::Keep).expect("pending");
        assert!(!ack.delete_reminder);
    }

    #[test]
    fn acknowledge_without_alert_returns_none_and_observers_see_clear() {
        let mut router = AlertRouter::new(AlertPolicy::Overwrite);
        assert!(router.acknowledge(AlertResolution::Keep).is_none());

        let observer = router.subscribe();
        router.publish(event("a", false));
        assert!(observer.borrow().is_some());
        router.acknowledge(AlertResolution::Keep);
        assert!(observer.borrow().is_none());
    }
}
