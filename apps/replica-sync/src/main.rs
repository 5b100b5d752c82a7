use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use replica_bus::{Bus, LocalBus};
use replica_sync::config::SyncConfig;
use replica_sync::metrics;
use replica_sync::model::{
    Door, DoorOrientation, ExploredRegion, MapConfig, Measurement, MeasurementShape, Point,
    Snapshot, Token, TokenType,
};
use replica_sync::replica::{self, ReplicaHandle, Role};
use replica_sync::store::SessionStore;
use replica_sync::sync::SyncStatsSnapshot;
use replica_sync::telemetry::{self, logging::{self as logctl, LogConfig, LogLevel}};
use replica_sync::transport::{self, Transport, TransportProbe, window_pair};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Command::Demo(args) => run_demo(args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "replica-sync",
    about = "Keep a primary and a mirror tabletop replica in step",
    version
)]
struct Cli {
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "REPLICA_SYNC_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "REPLICA_SYNC_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a primary and a mirror in this process and report whether they converge
    Demo(DemoArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum Binding {
    Window,
    Broadcast,
    None,
}

#[derive(Args, Debug)]
struct DemoArgs {
    #[arg(long, value_enum, default_value_t = Binding::Window, help = "Transport joining the two replicas")]
    binding: Binding,

    #[arg(long, default_value_t = 50, help = "Number of token moves in the burst")]
    moves: u32,

    #[arg(
        long = "throttle-ms",
        env = "REPLICA_SYNC_THROTTLE_MS",
        help = "Minimum spacing between detection passes"
    )]
    throttle_ms: Option<u64>,

    #[arg(long, help = "Print the prometheus counters after the run")]
    print_metrics: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("mirror did not receive the initial state within {0:?}")]
    BootstrapTimedOut(Duration),
    #[error("replicas diverged after the demo")]
    Diverged,
}

async fn run_demo(args: DemoArgs) -> Result<(), CliError> {
    let mut config = SyncConfig::from_env();
    if let Some(ms) = args.throttle_ms {
        config = config.with_throttle(Duration::from_millis(ms));
    }

    let scene = seed_scene();
    let lead = scene.tokens[0].id.clone();
    let scout = scene.tokens[1].id.clone();
    let door = scene.doors[0].id.clone();

    let (primary_transport, mirror_transport) = connect(args.binding, &config);
    let primary_store = SessionStore::with_explored_limit(scene, config.explored_region_limit);
    let mirror_store =
        SessionStore::with_explored_limit(Snapshot::default(), config.explored_region_limit);

    let primary = replica::spawn(Role::Primary, primary_store.clone(), primary_transport, &config);
    let mirror = replica::spawn(Role::Mirror, mirror_store.clone(), mirror_transport, &config);
    info!(binding = ?args.binding, transport = ?primary.transport_kind(), "replicas started");

    let standalone = primary.transport_kind().is_none();
    if !standalone {
        wait_for_bootstrap(&mirror, config.bootstrap_timeout).await?;
    }

    for step in 0..args.moves {
        let offset = f64::from(step);
        primary_store.move_token(&lead, 100.0 + offset, 200.0 + offset * 0.5);
        sleep(Duration::from_millis(1)).await;
    }
    primary.toggle_door(door).await;
    primary.set_measurement(Some(Measurement {
        shape: MeasurementShape::Ruler,
        origin: Point::new(0.0, 0.0),
        target: Point::new(300.0, 400.0),
        color: Some("#ffcc00".into()),
    }));
    primary_store.push_explored_region(ExploredRegion::now(vec![
        Point::new(0.0, 0.0),
        Point::new(120.0, 0.0),
        Point::new(120.0, 90.0),
    ]));
    primary_store.set_daylight_mode(true);

    // The mirror may only move tokens.
    mirror_store.move_token(&scout, 640.0, 480.0);

    sleep(config.throttle_period * 3).await;
    primary.flush().await;
    mirror.flush().await;
    sleep(config.throttle_period).await;

    let converged = primary_store.snapshot() == mirror_store.snapshot()
        && primary_store.measurement() == mirror_store.measurement();
    println!("binding:        {:?}", args.binding);
    println!("converged:      {converged}");
    report("primary", primary.stats());
    report("mirror", mirror.stats());
    if let Some(stat) = telemetry::stat("sync.detection_pass") {
        println!(
            "pass timing:    count={} avg_us={:.1} max_us={:.1}",
            stat.count,
            stat.total_ns as f64 / stat.count.max(1) as f64 / 1_000.0,
            stat.max_ns as f64 / 1_000.0
        );
    }
    if args.print_metrics {
        print!("{}", metrics::render());
    }

    primary.shutdown().await;
    mirror.shutdown().await;

    if standalone || converged {
        Ok(())
    } else {
        Err(CliError::Diverged)
    }
}

fn connect(
    binding: Binding,
    config: &SyncConfig,
) -> (Option<Arc<dyn Transport>>, Option<Arc<dyn Transport>>) {
    match binding {
        Binding::Window => {
            let (left, right) = window_pair();
            let probe = |endpoint| TransportProbe {
                window_channel_available: true,
                window: Some(endpoint),
                bus: None,
                channel: config.channel.clone(),
            };
            (transport::select(probe(left)), transport::select(probe(right)))
        }
        Binding::Broadcast => {
            let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
            let probe = || TransportProbe {
                window_channel_available: config.window_channel_available,
                window: None,
                bus: Some(bus.clone()),
                channel: config.channel.clone(),
            };
            (transport::select(probe()), transport::select(probe()))
        }
        Binding::None => (None, None),
    }
}

async fn wait_for_bootstrap(mirror: &ReplicaHandle, timeout: Duration) -> Result<(), CliError> {
    let deadline = Instant::now() + timeout;
    while !mirror.is_synchronized() {
        if Instant::now() >= deadline {
            return Err(CliError::BootstrapTimedOut(timeout));
        }
        sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

fn seed_scene() -> Snapshot {
    let token = |name: &str, x: f64, y: f64, token_type: TokenType| {
        let mut token = Token::new(Uuid::new_v4().to_string(), x, y, format!("{name}.png"));
        token.name = Some(name.to_string());
        token.token_type = Some(token_type);
        token
    };
    Snapshot {
        tokens: vec![
            token("fighter", 100.0, 200.0, TokenType::Pc),
            token("scout", 150.0, 220.0, TokenType::Pc),
            token("goblin", 400.0, 300.0, TokenType::Monster),
        ],
        doors: vec![Door {
            id: Uuid::new_v4().to_string(),
            x: 250.0,
            y: 250.0,
            orientation: DoorOrientation::Vertical,
            is_open: false,
            is_locked: false,
            size: 50.0,
        }],
        map: Some(MapConfig {
            src: "crypt.png".into(),
            x: 0.0,
            y: 0.0,
            width: 1600.0,
            height: 1200.0,
            scale: 1.0,
        }),
        ..Default::default()
    }
}

fn report(label: &str, stats: SyncStatsSnapshot) {
    println!(
        "{label:<8} passes={} sent={} applied={} ignored={} bootstraps={} bytes={}",
        stats.detection_passes,
        stats.ops_sent,
        stats.ops_applied,
        stats.frames_ignored,
        stats.bootstraps_served,
        stats.bytes_sent
    );
}
