//! Observable in-memory reminder store.
//!
//! # Responsibility
//! - Keep armed reminders in insertion order.
//! - Resynchronize from the gateway's durable registration set on `load`.
//! - Stage bulk replacements as an explicit diff (`plan_replace`) and commit
//!   them with one assignment (`replace_all`).
//!
//! # Invariants
//! - `remove_by_id` is a no-op for absent ids.
//! - `replace_all` either swaps the whole list or leaves it untouched.
//! - Diffing compares ids first and full values second; two reminders with equal
//!   content but different ids are never treated as the same entry.

use crate::gateway::{GatewayError, NotificationGateway};
use crate::model::reminder::{Reminder, ReminderId, ReminderValidationError};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::watch;

pub type StoreResult<T> = Result<T, StoreError>;

/// Reminder store errors.
#[derive(Debug)]
pub enum StoreError {
    /// The id is already present. Engine-issued ids make this a programming error.
    DuplicateId(ReminderId),
    /// A registration read back from the gateway does not form a valid reminder.
    InvalidRegistration {
        id: ReminderId,
        source: ReminderValidationError,
    },
    Gateway(GatewayError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "reminder id already present: {id}"),
            Self::InvalidRegistration { id, source } => {
                write!(f, "invalid registration {id}: {source}")
            }
            Self::Gateway(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DuplicateId(_) => None,
            Self::InvalidRegistration { source, .. } => Some(source),
            Self::Gateway(err) => Some(err),
        }
    }
}

impl From<GatewayError> for StoreError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

/// Staged result of diffing the current list against a proposed one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacePlan {
    /// Entries present unchanged in both lists, in proposed order.
    pub retained: Vec<Reminder>,
    /// Current entries whose id is gone or whose content changed, in current order.
    pub removed: Vec<Reminder>,
    /// Proposed entries that are not armed: unknown ids, changed content, or
    /// repeated ids. Creating them is the caller's decision.
    pub unarmed: Vec<Reminder>,
}

impl ReplacePlan {
    /// Returns whether applying the plan would unregister nothing.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Ordered, observable list of armed reminders.
#[derive(Debug)]
pub struct ReminderStore {
    reminders: Vec<Reminder>,
    issued: HashSet<ReminderId>,
    published: watch::Sender<Vec<Reminder>>,
}

impl Default for ReminderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderStore {
    pub fn new() -> Self {
        let (published, _) = watch::channel(Vec::new());
        Self {
            reminders: Vec::new(),
            issued: HashSet::new(),
            published,
        }
    }

    /// Returns a live view of the ordered reminder list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Reminder>> {
        self.published.subscribe()
    }

    pub fn reminders(&self) -> &[Reminder] {
        &self.reminders
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    pub fn get(&self, id: ReminderId) -> Option<&Reminder> {
        self.reminders.iter().find(|reminder| reminder.id == id)
    }

    pub fn contains(&self, id: ReminderId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<ReminderId> {
        self.reminders.iter().map(|reminder| reminder.id).collect()
    }

    /// Returns whether `id` was ever held by this store.
    pub fn has_issued(&self, id: ReminderId) -> bool {
        self.issued.contains(&id)
    }

    /// Replaces the contents with the gateway's live registrations.
    ///
    /// # Errors
    /// - `Gateway` when listing fails; the store is left untouched.
    /// - `InvalidRegistration`/`DuplicateId` when the gateway reports state that
    ///   cannot be represented; the store is left untouched.
    pub async fn load<G: NotificationGateway + ?Sized>(
        &mut self,
        gateway: &G,
    ) -> StoreResult<Vec<Reminder>> {
        let registrations = gateway.list_registrations().await?;
        let mut loaded = Vec::with_capacity(registrations.len());
        for registration in &registrations {
            let reminder = registration
                .to_reminder()
                .map_err(|source| StoreError::InvalidRegistration {
                    id: registration.id,
                    source,
                })?;
            loaded.push(reminder);
        }

        self.replace_all(loaded)?;
        info!(
            "event=store_load module=store status=ok count={}",
            self.reminders.len()
        );
        Ok(self.reminders.clone())
    }

    /// Appends one reminder.
    ///
    /// # Errors
    /// - `DuplicateId` when a reminder with the same id is present.
    pub fn add(&mut self, reminder: Reminder) -> StoreResult<()> {
        if self.contains(reminder.id) {
            return Err(StoreError::DuplicateId(reminder.id));
        }
        self.issued.insert(reminder.id);
        self.reminders.push(reminder);
        self.publish();
        Ok(())
    }

    /// Removes the reminder with `id`, returning it when present.
    pub fn remove_by_id(&mut self, id: ReminderId) -> Option<Reminder> {
        let index = self.reminders.iter().position(|reminder| reminder.id == id)?;
        let removed = self.reminders.remove(index);
        self.publish();
        Some(removed)
    }

    /// Diffs the current list against `proposed` without mutating the store.
    pub fn plan_replace(&self, proposed: Vec<Reminder>) -> ReplacePlan {
        let current: HashMap<ReminderId, &Reminder> = self
            .reminders
            .iter()
            .map(|reminder| (reminder.id, reminder))
            .collect();

        let mut plan = ReplacePlan::default();
        let mut seen = HashSet::new();
        for reminder in proposed {
            if !seen.insert(reminder.id) {
                plan.unarmed.push(reminder);
                continue;
            }
            match current.get(&reminder.id) {
                Some(existing) if **existing == reminder => plan.retained.push(reminder),
                _ => plan.unarmed.push(reminder),
            }
        }

        let retained: HashSet<ReminderId> =
            plan.retained.iter().map(|reminder| reminder.id).collect();
        plan.removed = self
            .reminders
            .iter()
            .filter(|reminder| !retained.contains(&reminder.id))
            .cloned()
            .collect();

        debug!(
            "event=store_plan_replace module=store status=ok retained={} removed={} unarmed={}",
            plan.retained.len(),
            plan.removed.len(),
            plan.unarmed.len()
        );
        plan
    }

    /// Swaps the whole list in one assignment.
    ///
    /// # Errors
    /// - `DuplicateId` when `contents` repeats an id; the store is left untouched.
    pub fn replace_all(&mut self, contents: Vec<Reminder>) -> StoreResult<()> {
        let mut ids = HashSet::with_capacity(contents.len());
        if let Some(duplicate) = contents.iter().find(|reminder| !ids.insert(reminder.id)) {
            return Err(StoreError::DuplicateId(duplicate.id));
        }

        self.issued.extend(ids);
        self.reminders = contents;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.published.send_replace(self.reminders.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::{ReminderStore, StoreError};
    use crate::model::region::{Coordinate, Region, TriggerEdge};
    use crate::model::reminder::Reminder;

    fn reminder(title: &str) -> Reminder {
        let center = Coordinate::new(35.68, 139.76);
        let region = Region::new(center, 80.0, TriggerEdge::OnEntry).expect("region");
        Reminder::new(title, region, false)
    }

    #[test]
    fn add_rejects_duplicate_ids() {
        let mut store = ReminderStore::new();
        let a = reminder("a");
        store.add(a.clone()).expect("first add");
        let err = store.add(a.clone()).expect_err("duplicate add must fail");
        assert!(matches!(err, StoreError::DuplicateId(id) if id == a.id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_absent_id_is_noop() {
        let mut store = ReminderStore::new();
        store.add(reminder("a")).expect("add");
        assert!(store.remove_by_id(uuid::Uuid::new_v4()).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removed_ids_stay_issued() {
        let mut store = ReminderStore::new();
        let a = reminder("a");
        store.add(a.clone()).expect("add");
        store.remove_by_id(a.id).expect("remove");
        assert!(!store.contains(a.id));
        assert!(store.has_issued(a.id));
    }

    #[test]
    fn plan_replace_separates_retained_removed_and_changed() {
        let mut store = ReminderStore::new();
        let a = reminder("a");
        let b = reminder("b");
        let c = reminder("c");
        for item in [&a, &b, &c] {
            store.add(item.clone()).expect("add");
        }

        let mut changed_b = b.clone();
        changed_b.title = "b renamed".to_string();
        let plan = store.plan_replace(vec![c.clone(), changed_b.clone()]);

        assert_eq!(plan.retained, vec![c.clone()]);
        assert_eq!(plan.removed, vec![a.clone(), b.clone()]);
        assert_eq!(plan.unarmed, vec![changed_b]);
        // Planning does not mutate.
        assert_eq!(store.ids(), vec![a.id, b.id, c.id]);
    }

    #[test]
    fn plan_replace_keys_on_id_not_content() {
        let mut store = ReminderStore::new();
        let a = reminder("same");
        store.add(a.clone()).expect("add");

        let twin = Reminder {
            id: uuid::Uuid::new_v4(),
            ..a.clone()
        };
        let plan = store.plan_replace(vec![twin.clone()]);
        assert_eq!(plan.removed, vec![a]);
        assert_eq!(plan.unarmed, vec![twin]);
        assert!(plan.retained.is_empty());
    }

    #[test]
    fn plan_replace_with_same_list_is_noop() {
        let mut store = ReminderStore::new();
        store.add(reminder("a")).expect("add");
        store.add(reminder("b")).expect("add");
        let plan = store.plan_replace(store.reminders().to_vec());
        assert!(plan.is_noop());
        assert_eq!(plan.retained.len(), 2);
    }

    #[test]
    fn replace_all_rejects_duplicates_atomically() {
        let mut store = ReminderStore::new();
        let a = reminder("a");
        store.add(a.clone()).expect("add");
        let b = reminder("b");
        let err = store
            .replace_all(vec![b.clone(), b.clone()])
            .expect_err("duplicate contents must fail");
        assert!(matches!(err, StoreError::DuplicateId(_)));
        assert_eq!(store.ids(), vec![a.id]);
    }

    #[test]
    fn observers_see_each_committed_snapshot() {
        let mut store = ReminderStore::new();
        let observer = store.subscribe();
        let a = reminder("a");
        store.add(a.clone()).expect("add");
        assert_eq!(*observer.borrow(), vec![a.clone()]);

        store.replace_all(Vec::new()).expect("replace");
        assert!(observer.borrow().is_empty());
    }
}
