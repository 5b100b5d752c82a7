mod support;

use std::sync::Arc;

use replica_bus::{Bus, LocalBus};
use replica_sync::model::{
    Drawing, DrawingTool, ExploredRegion, Facing, GridType, Measurement, MeasurementShape, Point,
    Snapshot, StairType, Stairs, Token,
};
use replica_sync::replica::{self, ReplicaHandle, Role};
use replica_sync::store::SessionStore;
use replica_sync::transport::{self, TransportKind, TransportProbe, window_pair};

use support::{config, scene, settle, wait_for_sync};

struct Pair {
    primary: ReplicaHandle,
    mirror: ReplicaHandle,
    primary_store: Arc<SessionStore>,
    mirror_store: Arc<SessionStore>,
}

impl Pair {
    fn over_window(initial: Snapshot) -> Self {
        let (left, right) = window_pair();
        let probe = |endpoint| TransportProbe {
            window_channel_available: true,
            window: Some(endpoint),
            bus: None,
            channel: config().channel,
        };
        Self::spawn(initial, transport::select(probe(left)), transport::select(probe(right)))
    }

    fn spawn(
        initial: Snapshot,
        primary_transport: Option<Arc<dyn transport::Transport>>,
        mirror_transport: Option<Arc<dyn transport::Transport>>,
    ) -> Self {
        let primary_store = SessionStore::new(initial);
        let mirror_store = SessionStore::new(Snapshot::default());
        let primary = replica::spawn(
            Role::Primary,
            primary_store.clone(),
            primary_transport,
            &config(),
        );
        let mirror = replica::spawn(
            Role::Mirror,
            mirror_store.clone(),
            mirror_transport,
            &config(),
        );
        Self {
            primary,
            mirror,
            primary_store,
            mirror_store,
        }
    }

    fn converged(&self) -> bool {
        self.primary_store.snapshot() == self.mirror_store.snapshot()
    }

    async fn shutdown(self) {
        self.primary.shutdown().await;
        self.mirror.shutdown().await;
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn mirror_converges_over_window_channel() {
    let pair = Pair::over_window(scene());
    assert_eq!(pair.primary.transport_kind(), Some(TransportKind::WindowChannel));
    wait_for_sync(&pair.mirror).await;
    assert!(pair.converged());

    let store = &pair.primary_store;
    store.add_token(Token::new("t4", 5.0, 5.0, "wolf.png"));
    store.remove::<Token>("t2");
    store.move_token("t3", 300.0, 300.0);
    store.upsert(Drawing {
        id: "w1".into(),
        tool: DrawingTool::Wall,
        points: vec![Point::new(0.0, 0.0), Point::new(0.0, 100.0)],
        color: "#000".into(),
        size: 4.0,
        transform: None,
    });
    store.upsert(Stairs {
        id: "s1".into(),
        x: 40.0,
        y: 40.0,
        direction: Facing::North,
        stair_type: StairType::Down,
        width: 50.0,
        height: 100.0,
    });
    store.set_grid_type(GridType::Hex);
    store.set_grid_size(70);
    store.set_map(None);
    store.push_explored_region(ExploredRegion::now(vec![
        Point::new(0.0, 0.0),
        Point::new(10.0, 0.0),
        Point::new(10.0, 10.0),
    ]));
    settle().await;

    assert!(pair.converged());
    let mirror = pair.mirror_store.snapshot();
    assert!(mirror.token("t2").is_none());
    assert_eq!(mirror.token("t3").map(|t| t.x), Some(300.0));
    assert_eq!(mirror.explored_regions.len(), 1);
    assert_eq!(mirror.grid_size, 70);
    assert!(mirror.is_consistent());
    pair.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn late_mirror_bootstraps_over_broadcast_bus() {
    let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
    let probe = || TransportProbe {
        bus: Some(bus.clone()),
        channel: config().channel,
        ..Default::default()
    };

    let primary_store = SessionStore::new(scene());
    let primary = replica::spawn(
        Role::Primary,
        primary_store.clone(),
        transport::select(probe()),
        &config(),
    );
    primary_store.move_token("t1", 42.0, 42.0);
    settle().await;

    let mirror_store = SessionStore::new(Snapshot::default());
    let mirror = replica::spawn(
        Role::Mirror,
        mirror_store.clone(),
        transport::select(probe()),
        &config(),
    );
    assert_eq!(mirror.transport_kind(), Some(TransportKind::Broadcast));
    wait_for_sync(&mirror).await;
    settle().await;

    assert_eq!(mirror_store.snapshot(), primary_store.snapshot());
    assert_eq!(mirror_store.snapshot().token("t1").map(|t| t.x), Some(42.0));
    assert_eq!(primary.stats().bootstraps_served, 1);
    primary.shutdown().await;
    mirror.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn applied_operations_are_not_echoed() {
    let pair = Pair::over_window(scene());
    wait_for_sync(&pair.mirror).await;
    settle().await;

    for step in 0..10 {
        pair.primary_store.move_token("t1", f64::from(step), 1.0);
        settle().await;
    }
    assert!(pair.converged());
    assert_eq!(pair.mirror.stats().ops_sent, 0);
    assert_eq!(pair.primary.stats().ops_applied, 0);

    let primary_sent = pair.primary.stats().ops_sent;
    pair.mirror_store.move_token("t2", 77.0, 88.0);
    settle().await;
    assert!(pair.converged());
    assert_eq!(pair.primary.stats().ops_applied, 1);
    assert_eq!(pair.primary.stats().ops_sent, primary_sent);
    assert_eq!(pair.mirror.stats().ops_sent, 1);
    pair.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn ephemeral_state_reaches_the_mirror() {
    let pair = Pair::over_window(scene());
    wait_for_sync(&pair.mirror).await;

    let ruler = Measurement {
        shape: MeasurementShape::Cone,
        origin: Point::new(1.0, 2.0),
        target: Point::new(3.0, 4.0),
        color: None,
    };
    pair.primary.set_measurement(Some(ruler.clone()));
    assert_eq!(pair.primary.toggle_door("d1").await, Some(true));
    settle().await;

    assert_eq!(pair.mirror_store.measurement(), Some(ruler));
    assert!(pair.mirror_store.snapshot().doors[0].is_open);
    assert!(pair.converged());

    pair.primary.set_measurement(None);
    settle().await;
    assert_eq!(pair.mirror_store.measurement(), None);
    pair.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn shutdown_flushes_pending_changes() {
    let pair = Pair::over_window(scene());
    wait_for_sync(&pair.mirror).await;
    settle().await;

    pair.primary_store.move_token("t1", 1.0, 1.0);
    tokio::task::yield_now().await;
    pair.primary_store.move_token("t1", 2.0, 2.0);
    tokio::task::yield_now().await;

    let Pair {
        primary,
        mirror,
        primary_store,
        mirror_store,
    } = pair;
    primary.shutdown().await;
    settle().await;
    assert_eq!(mirror_store.snapshot(), primary_store.snapshot());
    mirror.shutdown().await;
}
