use remindmeat_core::gateway::memory::{GatewayCall, InMemoryGateway};
use remindmeat_core::{
    AlertResolution, Coordinate, CoreConfig, CoreError, CreateReminderRequest, EdgeFlags,
    GatewayConfig, ReconciliationEngine, Reminder, ReminderId, TriggerEdge,
};
use std::collections::HashSet;
use std::sync::Arc;

type Engine = ReconciliationEngine<Arc<InMemoryGateway>>;

fn setup() -> (Arc<InMemoryGateway>, Engine) {
    setup_with(CoreConfig::default())
}

fn setup_with(config: CoreConfig) -> (Arc<InMemoryGateway>, Engine) {
    let gateway = Arc::new(InMemoryGateway::new(&config.gateway));
    let engine = ReconciliationEngine::new(Arc::clone(&gateway), &config);
    (gateway, engine)
}

fn request(title: &str) -> CreateReminderRequest {
    CreateReminderRequest::new(
        title,
        Coordinate::new(37.0, -122.0),
        50.0,
        TriggerEdge::OnEntry,
    )
}

fn store_ids(engine: &Engine) -> HashSet<ReminderId> {
    engine.store().ids().into_iter().collect()
}

fn gateway_ids(gateway: &InMemoryGateway) -> HashSet<ReminderId> {
    gateway.registration_ids().into_iter().collect()
}

#[tokio::test]
async fn store_and_gateway_stay_in_bijection_across_mutations() {
    let (gateway, mut engine) = setup();

    let a = engine.create(request("a")).await.expect("create a");
    let b = engine.create(request("b")).await.expect("create b");
    let c = engine.create(request("c")).await.expect("create c");
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));

    engine.delete(b.id).await.expect("delete b");
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));

    let d = engine.create(request("d")).await.expect("create d");
    engine
        .reconcile_bulk(vec![d.clone(), a.clone()])
        .await
        .expect("bulk");
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));
    assert!(!gateway_ids(&gateway).contains(&c.id));

    // Deleting an id the gateway already dropped still succeeds.
    engine.delete(c.id).await.expect("unknown id is fine");
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));
}

#[tokio::test]
async fn load_twice_yields_the_same_contents() {
    let (gateway, mut engine) = setup();
    engine.create(request("a")).await.expect("create");
    engine.create(request("b")).await.expect("create");

    let first = engine.load().await.expect("first load");
    let second = engine.load().await.expect("second load");
    assert_eq!(first, second);
    assert_eq!(engine.store().reminders(), first.as_slice());
    assert_eq!(
        gateway
            .calls()
            .iter()
            .filter(|call| **call == GatewayCall::ListRegistrations)
            .count(),
        2
    );
}

#[tokio::test]
async fn load_resynchronizes_a_fresh_engine_from_durable_registrations() {
    let config = CoreConfig::default();
    let gateway = Arc::new(InMemoryGateway::new(&config.gateway));
    let mut before_restart = ReconciliationEngine::new(Arc::clone(&gateway), &config);
    let armed = before_restart.create(request("kept")).await.expect("create");
    drop(before_restart);

    let mut after_restart = ReconciliationEngine::new(Arc::clone(&gateway), &config);
    assert!(after_restart.store().is_empty());
    let loaded = after_restart.load().await.expect("load");
    assert_eq!(loaded, vec![armed]);
}

#[tokio::test]
async fn bulk_replace_unregisters_only_removed_or_changed_entries() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("a")).await.expect("create");
    let b = engine.create(request("b")).await.expect("create");
    let c = engine.create(request("c")).await.expect("create");
    gateway.clear_calls();

    let mut changed_c = c.clone();
    changed_c.title = "c edited".to_string();
    let report = engine
        .reconcile_bulk(vec![b.clone(), changed_c.clone()])
        .await
        .expect("bulk");

    assert_eq!(
        gateway.calls(),
        vec![GatewayCall::Unregister(a.id), GatewayCall::Unregister(c.id)]
    );
    assert_eq!(gateway.unregister_count(b.id), 0);
    assert_eq!(report.removed, vec![a.id, c.id]);
    assert_eq!(report.retained, 1);
    assert_eq!(report.unarmed, vec![changed_c]);
    assert!(report.is_complete());
    assert_eq!(engine.store().reminders(), &[b][..]);
}

#[tokio::test]
async fn bulk_replace_with_unchanged_list_touches_nothing() {
    let (gateway, mut engine) = setup();
    engine.create(request("a")).await.expect("create");
    engine.create(request("b")).await.expect("create");
    gateway.clear_calls();

    let current = engine.store().reminders().to_vec();
    let report = engine.reconcile_bulk(current.clone()).await.expect("bulk");

    assert!(gateway.calls().is_empty());
    assert!(report.removed.is_empty());
    assert_eq!(engine.store().reminders(), current.as_slice());
}

#[tokio::test]
async fn failed_load_leaves_the_store_untouched() {
    let (gateway, mut engine) = setup();
    let kept = engine.create(request("kept")).await.expect("create");
    gateway.set_unreachable(true);

    let err = engine.load().await.expect_err("offline");
    assert!(matches!(err, CoreError::GatewayUnreachable(_)));
    assert_eq!(err.code(), "gateway_unreachable");
    assert_eq!(engine.store().reminders(), &[kept][..]);
}

#[tokio::test]
async fn bulk_replace_applies_reordering_without_gateway_calls() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("a")).await.expect("create");
    let b = engine.create(request("b")).await.expect("create");
    gateway.clear_calls();

    engine
        .reconcile_bulk(vec![b.clone(), a.clone()])
        .await
        .expect("bulk");
    assert!(gateway.calls().is_empty());
    assert_eq!(engine.store().ids(), vec![b.id, a.id]);
}

#[tokio::test]
async fn bulk_replace_can_remove_everything() {
    let (gateway, mut engine) = setup();
    for title in ["a", "b", "c"] {
        engine.create(request(title)).await.expect("create");
    }

    let report = engine.reconcile_bulk(Vec::new()).await.expect("bulk");
    assert_eq!(report.removed.len(), 3);
    assert!(engine.store().is_empty());
    assert!(gateway.registration_ids().is_empty());
}

#[tokio::test]
async fn bulk_replace_keeps_entries_whose_unregister_failed() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("a")).await.expect("create");
    let b = engine.create(request("b")).await.expect("create");
    let c = engine.create(request("c")).await.expect("create");
    gateway.fail_unregister_for(a.id);

    let report = engine.reconcile_bulk(vec![c.clone()]).await.expect("bulk");

    assert!(!report.is_complete());
    assert_eq!(report.failed_ids(), vec![a.id]);
    assert_eq!(report.removed, vec![b.id]);
    assert_eq!(engine.store().ids(), vec![c.id, a.id]);
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));
}

#[tokio::test]
async fn failed_unregister_is_retried_by_the_next_bulk_replace() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("a")).await.expect("create");
    let b = engine.create(request("b")).await.expect("create");
    gateway.fail_unregister_for(a.id);

    let first = engine.reconcile_bulk(vec![b.clone()]).await.expect("bulk");
    assert_eq!(first.failed_ids(), vec![a.id]);
    assert_eq!(engine.store().ids(), vec![b.id, a.id]);

    gateway.clear_unregister_failures();
    let retry = engine.reconcile_bulk(vec![b.clone()]).await.expect("bulk");
    assert!(retry.is_complete());
    assert_eq!(retry.removed, vec![a.id]);
    assert_eq!(engine.store().reminders(), &[b][..]);
    assert_eq!(store_ids(&engine), gateway_ids(&gateway));
}

#[tokio::test]
async fn create_without_trigger_edge_never_reaches_gateway() {
    let (gateway, mut engine) = setup();
    let request = CreateReminderRequest::with_edges(
        "nowhere",
        Coordinate::new(37.0, -122.0),
        50.0,
        EdgeFlags::NONE,
    );

    let err = engine.create(request).await.expect_err("no edge");
    assert!(matches!(err, CoreError::InvalidTriggerEdge));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn create_with_invalid_region_never_reaches_gateway() {
    let (gateway, mut engine) = setup();
    let request = CreateReminderRequest::new(
        "bad",
        Coordinate::new(95.0, 0.0),
        50.0,
        TriggerEdge::Both,
    );

    let err = engine.create(request).await.expect_err("bad latitude");
    assert!(matches!(err, CoreError::InvalidRegion(_)));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn stale_delivery_is_dropped_silently() {
    let (_gateway, mut engine) = setup();
    let a = engine.create(request("a")).await.expect("create");
    engine.delete(a.id).await.expect("delete");

    assert!(engine.on_delivery_received(a.id).await.is_none());
    assert!(engine
        .on_delivery_received(uuid::Uuid::new_v4())
        .await
        .is_none());
    assert!(engine.alerts().current().is_none());
}

#[tokio::test]
async fn quota_rejection_adds_nothing() {
    let config = CoreConfig {
        gateway: GatewayConfig {
            max_registrations: 1,
            ..GatewayConfig::default()
        },
        ..CoreConfig::default()
    };
    let (gateway, mut engine) = setup_with(config);
    engine.create(request("first")).await.expect("create");

    let err = engine.create(request("second")).await.expect_err("quota");
    assert!(matches!(err, CoreError::QuotaExceeded { limit: 1 }));
    assert!(err.is_recoverable());
    assert_eq!(engine.store().len(), 1);
    assert_eq!(gateway.registration_ids().len(), 1);
}

#[tokio::test]
async fn pharmacy_reminder_is_armed_and_stored() {
    let (gateway, mut engine) = setup();
    let reminder = engine.create(request("Pharmacy")).await.expect("create");

    assert_eq!(engine.store().reminders(), &[reminder.clone()][..]);
    assert_eq!(reminder.title, "Pharmacy");
    assert_eq!(reminder.region.center, Coordinate::new(37.0, -122.0));
    assert_eq!(reminder.region.radius_m, 50.0);
    assert_eq!(reminder.region.trigger_edge, TriggerEdge::OnEntry);

    let registrations = gateway.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].id, reminder.id);
    assert!(registrations[0].flags.notify_on_entry);
    assert!(!registrations[0].flags.notify_on_exit);
}

#[tokio::test]
async fn replacing_with_one_of_two_unregisters_the_other() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("A")).await.expect("create");
    let b = engine.create(request("B")).await.expect("create");
    gateway.clear_calls();

    engine.reconcile_bulk(vec![b.clone()]).await.expect("bulk");

    assert_eq!(gateway.calls(), vec![GatewayCall::Unregister(a.id)]);
    assert_eq!(engine.store().reminders(), &[b][..]);
}

#[tokio::test]
async fn delivered_one_shot_is_alerted_then_removed_on_dismiss() {
    let (gateway, mut engine) = setup();
    let a = engine.create(request("A")).await.expect("create");

    assert!(gateway.deliver(a.id));
    let event = engine
        .on_delivery_received(a.id)
        .await
        .expect("alert routed");
    assert_eq!(event.reminder_id, a.id);
    assert_eq!(
        engine.alerts().current().map(|current| current.reminder_id),
        Some(a.id)
    );

    let acknowledged = engine
        .acknowledge_alert(AlertResolution::Dismiss)
        .await
        .expect("acknowledge");
    assert_eq!(acknowledged.map(|event| event.reminder_id), Some(a.id));
    assert!(!engine.store().contains(a.id));
    assert!(gateway.unregister_count(a.id) >= 1);
    assert!(engine.alerts().current().is_none());
}

#[tokio::test]
async fn dismissing_a_repeating_reminder_keeps_it_armed() {
    let (gateway, mut engine) = setup();
    let repeating = engine
        .create(request("weekly").repeating(true))
        .await
        .expect("create");

    engine
        .on_delivery_received(repeating.id)
        .await
        .expect("alert routed");
    engine
        .acknowledge_alert(AlertResolution::Dismiss)
        .await
        .expect("acknowledge");

    assert!(engine.store().contains(repeating.id));
    assert_eq!(gateway.unregister_count(repeating.id), 0);
}

#[tokio::test]
async fn ids_are_never_reused_after_deletion() {
    let (_gateway, mut engine) = setup();
    let mut seen: HashSet<ReminderId> = HashSet::new();
    for round in 0..10 {
        let reminder: Reminder = engine
            .create(request(&format!("r{round}")))
            .await
            .expect("create");
        assert!(seen.insert(reminder.id));
        engine.delete(reminder.id).await.expect("delete");
    }
}
