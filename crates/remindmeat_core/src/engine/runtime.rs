//! Owning task for the reconciliation engine.
//!
//! # Responsibility
//! - Run the engine on exactly one task and serialize every mutation on it.
//! - Marshal gateway callbacks (deliveries, authorization changes) onto that
//!   task before they touch the store.
//! - Expose the presentation-facing surface through a cloneable handle.
//!
//! # Invariants
//! - Pending gateway events are applied before the next queued command.
//! - The task stops when every handle is dropped; it then returns the engine.

use crate::engine::error::{BulkReconcileReport, CoreError, CoreResult};
use crate::engine::reconcile::{CreateReminderRequest, ReconciliationEngine};
use crate::gateway::{AuthorizationStatus, GatewayEventReceiver, NotificationGateway};
use crate::model::alert::{AlertEvent, AlertResolution};
use crate::model::region::{Coordinate, TriggerEdge};
use crate::model::reminder::{Reminder, ReminderId};
use log::{debug, info};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_QUEUE_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<CoreResult<T>>;

enum Command {
    RequestAuthorization(Reply<AuthorizationStatus>),
    Load(Reply<Vec<Reminder>>),
    Create(CreateReminderRequest, Reply<Reminder>),
    Delete(ReminderId, Reply<()>),
    ReplaceList(Vec<Reminder>, Reply<BulkReconcileReport>),
    Acknowledge(AlertResolution, Reply<Option<AlertEvent>>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestAuthorization(_) => "request_authorization",
            Self::Load(_) => "load",
            Self::Create(..) => "create",
            Self::Delete(..) => "delete",
            Self::ReplaceList(..) => "replace_list",
            Self::Acknowledge(..) => "acknowledge",
        }
    }
}

/// Engine plus the channels feeding it.
pub struct ReminderCore<G> {
    engine: ReconciliationEngine<G>,
    commands: mpsc::Receiver<Command>,
    events: GatewayEventReceiver,
}

impl<G: NotificationGateway + 'static> ReminderCore<G> {
    /// Wires `engine` to gateway `events` and returns the presentation handle.
    pub fn new(
        engine: ReconciliationEngine<G>,
        events: GatewayEventReceiver,
    ) -> (Self, ReminderCoreHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let handle = ReminderCoreHandle {
            commands: command_tx,
            reminders: engine.store().subscribe(),
            alert: engine.alerts().subscribe(),
        };
        (
            Self {
                engine,
                commands,
                events,
            },
            handle,
        )
    }

    /// Spawns the owning task on the current tokio runtime.
    pub fn spawn(
        engine: ReconciliationEngine<G>,
        events: GatewayEventReceiver,
    ) -> (ReminderCoreHandle, JoinHandle<ReconciliationEngine<G>>) {
        let (core, handle) = Self::new(engine, events);
        (handle, tokio::spawn(core.run()))
    }

    /// Processes commands and gateway events until every handle is dropped.
    pub async fn run(mut self) -> ReconciliationEngine<G> {
        info!("event=core_run module=runtime status=start");
        let mut events_open = true;
        loop {
            tokio::select! {
                biased;
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.engine.handle_gateway_event(event).await,
                    None => {
                        debug!("event=core_run module=runtime status=ok reason=gateway_events_closed");
                        events_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
            }
        }
        info!("event=core_run module=runtime status=ok reason=handles_dropped");
        self.engine
    }

    async fn dispatch(&mut self, command: Command) {
        let name = command.name();
        let delivered = match command {
            Command::RequestAuthorization(reply) => reply
                .send(self.engine.request_authorization().await)
                .is_ok(),
            Command::Load(reply) => reply.send(self.engine.load().await).is_ok(),
            Command::Create(request, reply) => {
                reply.send(self.engine.create(request).await).is_ok()
            }
            Command::Delete(id, reply) => reply.send(self.engine.delete(id).await).is_ok(),
            Command::ReplaceList(list, reply) => reply
                .send(self.engine.reconcile_bulk(list).await)
                .is_ok(),
            Command::Acknowledge(resolution, reply) => reply
                .send(self.engine.acknowledge_alert(resolution).await)
                .is_ok(),
        };
        if !delivered {
            debug!("event=core_reply module=runtime status=skip command={name} reason=caller_gone");
        }
    }
}

/// Presentation-facing surface of the reminder core.
#[derive(Clone)]
pub struct ReminderCoreHandle {
    commands: mpsc::Sender<Command>,
    reminders: watch::Receiver<Vec<Reminder>>,
    alert: watch::Receiver<Option<AlertEvent>>,
}

impl ReminderCoreHandle {
    pub async fn request_authorization(&self) -> CoreResult<AuthorizationStatus> {
        self.call(Command::RequestAuthorization).await
    }

    /// Resynchronizes pending reminders from the gateway.
    pub async fn load(&self) -> CoreResult<Vec<Reminder>> {
        self.call(Command::Load).await
    }

    pub async fn create_reminder(
        &self,
        title: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
        edge: TriggerEdge,
    ) -> CoreResult<Reminder> {
        self.create_reminder_with(CreateReminderRequest::new(title, center, radius_m, edge))
            .await
    }

    /// Creates a reminder from a fully specified request.
    pub async fn create_reminder_with(
        &self,
        request: CreateReminderRequest,
    ) -> CoreResult<Reminder> {
        self.call(|reply| Command::Create(request, reply)).await
    }

    pub async fn delete_reminder(&self, id: ReminderId) -> CoreResult<()> {
        self.call(|reply| Command::Delete(id, reply)).await
    }

    pub async fn replace_reminder_list(
        &self,
        list: Vec<Reminder>,
    ) -> CoreResult<BulkReconcileReport> {
        self.call(|reply| Command::ReplaceList(list, reply)).await
    }

    pub async fn acknowledge_alert(
        &self,
        resolution: AlertResolution,
    ) -> CoreResult<Option<AlertEvent>> {
        self.call(|reply| Command::Acknowledge(resolution, reply)).await
    }

    /// Live ordered list of pending reminders.
    pub fn observe_pending_reminders(&self) -> watch::Receiver<Vec<Reminder>> {
        self.reminders.clone()
    }

    /// Live view of the alert awaiting acknowledgement.
    pub fn observe_alert(&self) -> watch::Receiver<Option<AlertEvent>> {
        self.alert.clone()
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> CoreResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        response.await.map_err(|_| CoreError::EngineStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::ReminderCore;
    use crate::config::CoreConfig;
    use crate::engine::error::CoreError;
    use crate::engine::reconcile::ReconciliationEngine;
    use crate::gateway::memory::InMemoryGateway;
    use crate::gateway::GatewayEventSender;
    use crate::model::alert::AlertResolution;
    use crate::model::region::{Coordinate, TriggerEdge};
    use std::sync::Arc;

    #[tokio::test]
    async fn delivery_is_marshaled_onto_the_owning_task() {
        let config = CoreConfig::default();
        let (sender, events) = GatewayEventSender::channel();
        let gateway = Arc::new(InMemoryGateway::new(&config.gateway).with_event_sender(sender));
        let engine = ReconciliationEngine::new(Arc::clone(&gateway), &config);
        let (handle, task) = ReminderCore::spawn(engine, events);

        let reminder = handle
            .create_reminder("Gym", Coordinate::new(40.0, -74.0), 75.0, TriggerEdge::OnEntry)
            .await
            .expect("create");
        let mut alert = handle.observe_alert();

        assert!(gateway.deliver(reminder.id));
        alert.changed().await.expect("alert published");
        assert_eq!(
            alert.borrow().as_ref().map(|event| event.reminder_id),
            Some(reminder.id)
        );

        let acknowledged = handle
            .acknowledge_alert(AlertResolution::Keep)
            .await
            .expect("acknowledge");
        assert_eq!(acknowledged.map(|event| event.reminder_id), Some(reminder.id));
        assert!(handle.observe_pending_reminders().borrow().is_empty());

        drop(handle);
        let engine = task.await.expect("core task joins");
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn handle_reports_stopped_engine() {
        let config = CoreConfig::default();
        let (_sender, events) = GatewayEventSender::channel();
        let engine = ReconciliationEngine::new(InMemoryGateway::new(&config.gateway), &config);
        let (core, handle) = ReminderCore::new(engine, events);
        drop(core);

        let err = handle.load().await.expect_err("engine is gone");
        assert!(matches!(err, CoreError::EngineStopped));
    }
}
