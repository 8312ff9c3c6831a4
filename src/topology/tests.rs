use super::*;
use crate::broker::mock::BrokerCall;
use crate::broker::MockBroker;
use crate::codec::{encode_envelope, Event, Metadata};
use crate::endpoints::StreamLevel;
use crate::error::HandlerError;
use crate::handler::{Ack, EventProcessor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn noop(
    _event: Event,
    _metadata: Metadata,
    _ack: Ack,
) -> futures::future::Ready<std::result::Result<(), HandlerError>> {
    futures::future::ready(Ok(()))
}

fn counting(count: Arc<AtomicUsize>) -> impl EventProcessor + 'static {
    move |_event: Event, _metadata: Metadata, ack: Ack| {
        let count = count.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            ack.ack().await?;
            Ok::<(), HandlerError>(())
        }
    }
}

fn public(name: &str, event_type: &str) -> EventDescriptor {
    EventDescriptor::new(name, event_type, StreamLevel::Public)
}

fn engine(broker: &MockBroker) -> TopologyEngine {
    TopologyEngine::new(Arc::new(ConnectionManager::new(Arc::new(broker.clone()))))
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_plan_single_handled_event() {
    let definition =
        StreamDefinition::new("orders", "created").handle(vec![public("OrderPlaced", "created")], noop);

    let plan = TopologyPlan::build(&[definition]);

    assert_eq!(plan.exchanges, vec!["orders:created::Public".to_string()]);
    assert_eq!(plan.queues.len(), 1);
    assert_eq!(plan.queues[0].name, "orders:created::EventHandler");
    assert_eq!(
        plan.binds,
        vec![Binding {
            exchange: "orders:created::Public".to_string(),
            queue: "orders:created::EventHandler".to_string(),
            topic: "OrderPlaced".to_string(),
        }]
    );
    assert!(plan.conflicts.is_empty());
}

#[test]
fn test_plan_shared_exchange_gets_one_assert_two_bindings() {
    let first =
        StreamDefinition::new("orders", "created").handle(vec![public("OrderPlaced", "created")], noop);
    let second = StreamDefinition::new("orders", "created")
        .handle(vec![public("OrderAmended", "created")], noop);

    let plan = TopologyPlan::build(&[first, second]);

    assert_eq!(plan.exchanges, vec!["orders:created::Public".to_string()]);
    let topics: Vec<_> = plan.binds.iter().map(|b| b.topic.as_str()).collect();
    assert_eq!(topics, vec!["OrderPlaced", "OrderAmended"]);
    assert!(plan
        .binds
        .iter()
        .all(|b| b.exchange == "orders:created::Public"));
}

#[test]
fn test_plan_same_queue_keeps_first_owner_and_records_conflict() {
    let first =
        StreamDefinition::new("orders", "created").handle(vec![public("OrderPlaced", "created")], noop);
    let second = StreamDefinition::new("orders", "created")
        .handle(vec![public("OrderAmended", "created")], noop);

    let plan = TopologyPlan::build(&[first, second]);

    assert_eq!(plan.queues.len(), 1);
    assert_eq!(plan.queues[0].owner, 0);
    assert_eq!(
        plan.conflicts,
        vec![QueueConflict {
            queue: "orders:created::EventHandler".to_string(),
            owner: 0,
            rejected: 1,
        }]
    );
}

#[test]
fn test_plan_levels_split_exchanges_but_share_queue() {
    let definition = StreamDefinition::new("orders", "created").handle(
        vec![
            public("OrderPlaced", "created"),
            EventDescriptor::new("OrderAudited", "created", StreamLevel::Private),
        ],
        noop,
    );

    let plan = TopologyPlan::build(&[definition]);

    assert_eq!(
        plan.exchanges,
        vec![
            "orders:created::Public".to_string(),
            "orders:created::Private".to_string()
        ]
    );
    assert_eq!(plan.queues.len(), 1);
    assert!(plan.conflicts.is_empty());
}

#[test]
fn test_plan_reactions_target_foreign_public_exchange() {
    let definition = StreamDefinition::new("shipping", "parcel")
        .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"))
        .process_reactions("orders", noop);

    let plan = TopologyPlan::build(&[definition]);

    assert_eq!(plan.exchanges, vec!["orders:created::Public".to_string()]);
    assert_eq!(plan.queues[0].name, "shipping:parcel::EventReaction");
    assert_eq!(plan.binds[0].topic, "OrderPlaced");
}

#[test]
fn test_plan_handler_and_reaction_queues_coexist() {
    let definition = StreamDefinition::new("shipping", "parcel")
        .handle(vec![public("ParcelShipped", "parcel")], noop)
        .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"))
        .process_reactions("orders", noop);

    let plan = TopologyPlan::build(&[definition]);

    let queues: Vec<_> = plan.queues.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(
        queues,
        vec!["shipping:parcel::EventHandler", "shipping:parcel::EventReaction"]
    );
    assert!(plan.conflicts.is_empty());
}

#[test]
fn test_plan_drops_duplicate_bindings() {
    let definition = StreamDefinition::new("orders", "created").handle(
        vec![public("OrderPlaced", "created"), public("OrderPlaced", "created")],
        noop,
    );

    let plan = TopologyPlan::build(&[definition]);

    assert_eq!(plan.binds.len(), 1);
}

#[test]
fn test_definition_without_events_contributes_nothing() {
    let plan = TopologyPlan::build(&[StreamDefinition::new("idle", "thing").handle(vec![], noop)]);

    assert!(plan.exchanges.is_empty());
    assert!(plan.queues.is_empty());
    assert!(plan.binds.is_empty());
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_subscribe_rejects_reaction_without_process() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let definition = StreamDefinition::new("shipping", "parcel")
        .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"));

    let err = engine.subscribe(definition).await.unwrap_err();

    assert!(matches!(
        err,
        StreamError::UnknownReactionScope { ref scope, .. } if scope == "orders"
    ));
}

#[tokio::test]
async fn test_subscribe_rejects_foreign_event_type() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let definition =
        StreamDefinition::new("orders", "created").handle(vec![public("Refunded", "refund")], noop);

    let err = engine.subscribe(definition).await.unwrap_err();

    assert!(matches!(err, StreamError::ForeignEventType { .. }));
}

#[tokio::test]
async fn test_reject_policy_refuses_conflicting_definition() {
    let broker = MockBroker::new();
    let engine = engine(&broker).with_conflict_policy(ConflictPolicy::Reject);

    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();
    let err = engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderAmended", "created")], noop),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StreamError::QueueConflict { owner: 0, rejected: 1, .. }
    ));
    assert_eq!(engine.plan().await.binds.len(), 1);
}

#[tokio::test]
async fn test_subscribe_after_connect_fails() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    engine.connect().await.unwrap();

    let err = engine
        .subscribe(StreamDefinition::new("late", "thing"))
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::AlreadyActive));
}

// ============================================================================
// Activation
// ============================================================================

#[tokio::test]
async fn test_connect_runs_phases_in_order() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop)
                .react_to(ReactionDescriptor::new("billing", "invoice", "InvoicePaid"))
                .process_reactions("billing", noop),
        )
        .await
        .unwrap();

    engine.connect().await.unwrap();

    let phase = |call: &BrokerCall| match call {
        BrokerCall::AssertExchange { .. } => 0,
        BrokerCall::AssertQueue { .. } => 1,
        BrokerCall::BindQueue { .. } => 2,
        BrokerCall::Consume { .. } => 3,
        _ => 4,
    };
    let phases: Vec<_> = broker.calls().await.iter().map(phase).collect();
    assert_eq!(phases, vec![0, 0, 1, 1, 2, 2, 3, 3]);
}

#[tokio::test]
async fn test_connect_declares_with_fixed_policy_and_manual_ack() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();

    engine.connect().await.unwrap();

    for call in broker.calls().await {
        match call {
            BrokerCall::AssertExchange { options, .. } | BrokerCall::AssertQueue { options, .. } => {
                assert!(options.auto_delete && options.durable)
            }
            BrokerCall::Consume { no_ack, .. } => assert!(!no_ack),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_second_connect_is_noop() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();

    engine.connect().await.unwrap();
    let calls = broker.calls().await.len();
    engine.connect().await.unwrap();

    assert!(engine.is_active().await);
    assert_eq!(broker.calls().await.len(), calls);
}

#[tokio::test]
async fn test_same_queue_is_asserted_and_consumed_once() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    for name in ["OrderPlaced", "OrderAmended"] {
        engine
            .subscribe(
                StreamDefinition::new("orders", "created")
                    .handle(vec![public(name, "created")], noop),
            )
            .await
            .unwrap();
    }

    engine.connect().await.unwrap();

    assert_eq!(broker.asserted_exchanges().await.len(), 1);
    assert_eq!(broker.asserted_queues().await.len(), 1);
    assert_eq!(broker.consumers().await.len(), 1);
    assert_eq!(broker.bindings().await.len(), 2);
}

#[tokio::test]
async fn test_failed_assert_leaves_engine_retryable() {
    let broker = MockBroker::new();
    broker
        .set_fail_on_assert_exchange(Some("orders:created::Public"))
        .await;
    let engine = engine(&broker);
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();

    let err = engine.connect().await.unwrap_err();
    assert!(matches!(err, StreamError::Topology { ref resource, .. } if resource == "orders:created::Public"));
    assert!(!engine.is_active().await);
    assert!(broker.consumers().await.is_empty());

    broker.set_fail_on_assert_exchange(None).await;
    engine.connect().await.unwrap();
    assert!(engine.is_active().await);
    assert_eq!(broker.consumers().await.len(), 1);
}

#[tokio::test]
async fn test_connection_failure_surfaces() {
    let broker = MockBroker::new();
    broker.set_fail_on_connect(true).await;
    let engine = engine(&broker);

    let err = engine.connect().await.unwrap_err();

    assert!(matches!(err, StreamError::Connection { .. }));
    assert!(!engine.is_active().await);
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_handler_queue_delivers_to_processing() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let count = Arc::new(AtomicUsize::new(0));
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], counting(count.clone())),
        )
        .await
        .unwrap();
    engine.connect().await.unwrap();

    let data = encode_envelope(&Event::new("OrderPlaced", "created"), &Metadata::new()).unwrap();
    let acker = broker
        .deliver(
            "orders:created::EventHandler",
            "orders:created::Public",
            "OrderPlaced",
            data,
        )
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(acker.acks(), 1);
}

#[tokio::test]
async fn test_reaction_queue_dispatches_by_foreign_scope() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let billing = Arc::new(AtomicUsize::new(0));
    let orders = Arc::new(AtomicUsize::new(0));
    engine
        .subscribe(
            StreamDefinition::new("shipping", "parcel")
                .react_to(ReactionDescriptor::new("billing", "invoice", "InvoicePaid"))
                .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"))
                .process_reactions("billing", counting(billing.clone()))
                .process_reactions("orders", counting(orders.clone())),
        )
        .await
        .unwrap();
    engine.connect().await.unwrap();

    let data = encode_envelope(&Event::new("OrderPlaced", "created"), &Metadata::new()).unwrap();
    broker
        .deliver(
            "shipping:parcel::EventReaction",
            "orders:created::Public",
            "OrderPlaced",
            data,
        )
        .await
        .unwrap();

    assert_eq!(orders.load(Ordering::SeqCst), 1);
    assert_eq!(billing.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_conflicting_reaction_queue_routes_later_definition_exchanges() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let orders = Arc::new(AtomicUsize::new(0));
    let billing = Arc::new(AtomicUsize::new(0));
    engine
        .subscribe(
            StreamDefinition::new("shipping", "parcel")
                .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"))
                .process_reactions("orders", counting(orders.clone())),
        )
        .await
        .unwrap();
    engine
        .subscribe(
            StreamDefinition::new("shipping", "parcel")
                .react_to(ReactionDescriptor::new("billing", "invoice", "InvoicePaid"))
                .process_reactions("billing", counting(billing.clone())),
        )
        .await
        .unwrap();
    engine.connect().await.unwrap();

    assert_eq!(broker.consumers().await.len(), 1);
    assert!(broker.bindings().await.contains(&(
        "billing:invoice::Public".to_string(),
        "shipping:parcel::EventReaction".to_string(),
        "InvoicePaid".to_string()
    )));

    let data = encode_envelope(&Event::new("InvoicePaid", "invoice"), &Metadata::new()).unwrap();
    let acker = broker
        .deliver(
            "shipping:parcel::EventReaction",
            "billing:invoice::Public",
            "InvoicePaid",
            data,
        )
        .await
        .unwrap();

    assert_eq!(billing.load(Ordering::SeqCst), 1);
    assert_eq!(orders.load(Ordering::SeqCst), 0);
    assert_eq!(acker.acks(), 1);
    assert_eq!(acker.rejects(), 0);
}

#[tokio::test]
async fn test_conflicting_reaction_queue_keeps_first_process_for_shared_exchange() {
    let broker = MockBroker::new();
    let engine = engine(&broker);
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    for count in [&first, &second] {
        engine
            .subscribe(
                StreamDefinition::new("shipping", "parcel")
                    .react_to(ReactionDescriptor::new("orders", "created", "OrderPlaced"))
                    .process_reactions("orders", counting(count.clone())),
            )
            .await
            .unwrap();
    }
    engine.connect().await.unwrap();

    let data = encode_envelope(&Event::new("OrderPlaced", "created"), &Metadata::new()).unwrap();
    broker
        .deliver(
            "shipping:parcel::EventReaction",
            "orders:created::Public",
            "OrderPlaced",
            data,
        )
        .await
        .unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_engine_stays_responsive_while_connect_waits_on_broker() {
    let broker = MockBroker::new();
    broker.set_connect_delay(Duration::from_millis(300)).await;
    let engine = Arc::new(engine(&broker));
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();

    let connecting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.connect().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let active = tokio::time::timeout(Duration::from_millis(100), engine.is_active())
        .await
        .expect("is_active blocked by connect");
    assert!(!active);
    let plan = tokio::time::timeout(Duration::from_millis(100), engine.plan())
        .await
        .expect("plan blocked by connect");
    assert_eq!(plan.queues.len(), 1);
    let err = tokio::time::timeout(
        Duration::from_millis(100),
        engine.subscribe(StreamDefinition::new("billing", "invoice")),
    )
    .await
    .expect("subscribe blocked by connect")
    .unwrap_err();
    assert!(matches!(err, StreamError::AlreadyActive));

    connecting.await.unwrap().unwrap();
    assert!(engine.is_active().await);
}

#[tokio::test]
async fn test_concurrent_connects_activate_once() {
    let broker = MockBroker::new();
    broker.set_connect_delay(Duration::from_millis(20)).await;
    let engine = engine(&broker);
    engine
        .subscribe(
            StreamDefinition::new("orders", "created")
                .handle(vec![public("OrderPlaced", "created")], noop),
        )
        .await
        .unwrap();

    let (first, second) = tokio::join!(engine.connect(), engine.connect());
    first.unwrap();
    second.unwrap();

    assert_eq!(broker.asserted_queues().await.len(), 1);
    assert_eq!(broker.consumers().await.len(), 1);
}
