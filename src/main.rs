//! WolfHA - Active/Passive Role Coordination
//!
//! Runs a node from its configuration file, and provides operator
//! tooling: configuration checks, status queries, and an in-process
//! failover simulation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfha::config::{HaConfig, LoggingConfig, WolfHaConfig};
use wolfha::coordination::{CoordinationService, InMemoryCluster};
use wolfha::coordinator::{CoordinatorHandle, CoordinatorService, RoleState};
use wolfha::error::{Error, Result};
use wolfha::identity::NodeIdentity;
use wolfha::subsystem::SimulatedEngine;
use wolfha::transport::{ManagementServer, TcpSnapshotClient};

/// WolfHA - Active/Passive Role Coordination
#[derive(Parser)]
#[command(name = "wolfha")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfha.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format (pretty, json), overrides the config file
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node from the configuration file
    Start,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfha.toml")]
        output: PathBuf,

        /// Event transport address of this node
        #[arg(long, default_value = "127.0.0.1:11224")]
        transport: String,

        /// Management address of this node
        #[arg(long, default_value = "127.0.0.1:10005")]
        management: String,
    },

    /// Query a node's role through its management endpoint
    Status {
        /// Management address to query
        #[arg(short, long, default_value = "127.0.0.1:10005")]
        address: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run an in-process cluster and repeatedly fail the active node
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Number of failovers
        #[arg(short, long, default_value_t = 3)]
        rounds: usize,

        /// Retry interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        retry_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that read the config file log the way it asks
    let mut logging = match cli.command {
        Commands::Start | Commands::Validate => WolfHaConfig::from_file(&cli.config)
            .map(|c| c.logging)
            .unwrap_or_default(),
        _ => LoggingConfig::default(),
    };
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    init_logging(&logging);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Validate => run_validate(cli.config),
        Commands::Init {
            output,
            transport,
            management,
        } => run_init(output, transport, management),
        Commands::Status { address, json } => run_status(address, json).await,
        Commands::Simulate {
            nodes,
            rounds,
            retry_ms,
        } => run_simulate(nodes, rounds, retry_ms).await,
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Run a node until interrupted
///
/// The node contends on a cluster of its own and drives a simulated
/// engine, so a single process comes up active and serves snapshots
/// and role queries on its management address.
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting WolfHA node...");

    let config = match WolfHaConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!("Loaded configuration for node: {}", config.identity());

    let cluster = InMemoryCluster::new();
    let coordination: Arc<dyn CoordinationService> = Arc::new(cluster.join().await);
    let engine = SimulatedEngine::new(config.identity().transport());
    let client = Arc::new(TcpSnapshotClient::new(
        config.connect_timeout(),
        config.snapshot_timeout(),
    ));

    let service = CoordinatorService::from_config(&config, coordination, engine.management(), client);
    let bind = config.management_bind_address();
    let server = match ManagementServer::bind(bind, service.snapshot_source()).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("Failed to bind management server on {}: {}", bind, e);
            return Err(e);
        }
    };
    tracing::info!("Management server listening on {}", bind);

    let runner = Arc::clone(&server);
    let serving = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Management server error: {}", e);
        }
    });

    let handle = service.start().await?;
    tracing::info!("Node {} is {}", handle.identity(), handle.role());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");

    server.stop();
    let result = handle.shutdown().await;
    let _ = serving.await;
    result
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = WolfHaConfig::from_file(&config_path)?;

    println!("Configuration is valid");
    println!("  Identity:        {}", config.identity());
    println!("  Management bind: {}", config.management_bind_address());
    println!("  Retry interval:  {:?}", config.retry_interval());
    println!("  Locks:           {} / {}", config.ha.active_lock, config.ha.passive_lock);
    Ok(())
}

/// Write a default configuration file
fn run_init(output: PathBuf, transport: String, management: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!("{:?} already exists", output)));
    }

    let config = WolfHaConfig::new(transport, management);
    config.validate()?;
    std::fs::write(&output, config.to_toml()?)?;

    println!("Wrote configuration to {:?}", output);
    Ok(())
}

/// Query a node's role
async fn run_status(address: String, json: bool) -> Result<()> {
    let client = TcpSnapshotClient::new(Duration::from_secs(5), Duration::from_secs(10));
    let role = client.query_role(&address).await?;

    if json {
        let status = serde_json::json!({
            "address": address,
            "role": role,
            "active": role.is_active(),
        });
        println!("{}", status);
    } else {
        println!("{}: {}", address, role);
    }
    Ok(())
}

/// One simulated cluster node
struct SimNode {
    handle: CoordinatorHandle,
    engine: Arc<SimulatedEngine>,
    server: Arc<ManagementServer>,
    member_id: String,
}

async fn spawn_node(cluster: &InMemoryCluster, index: usize, ha: &HaConfig) -> Result<SimNode> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let management = listener.local_addr()?.to_string();
    let identity = NodeIdentity::new(format!("127.0.0.1:{}", 11224 + index), management);

    let member = cluster.join().await;
    let member_id = member.member_id().to_string();
    let coordination: Arc<dyn CoordinationService> = Arc::new(member);

    let engine = SimulatedEngine::new(format!("node-{}", index));
    let client = Arc::new(TcpSnapshotClient::new(
        Duration::from_millis(ha.connect_timeout_ms),
        Duration::from_millis(ha.snapshot_timeout_ms),
    ));

    let service = CoordinatorService::new(identity, coordination, engine.management(), client, ha);
    let server = Arc::new(ManagementServer::from_listener(listener, service.snapshot_source()));
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            tracing::error!("Management server error: {}", e);
        }
    });

    let handle = service.start().await?;
    Ok(SimNode {
        handle,
        engine,
        server,
        member_id,
    })
}

/// Simulate repeated failovers in one process
async fn run_simulate(nodes: usize, rounds: usize, retry_ms: u64) -> Result<()> {
    if nodes < 2 {
        return Err(Error::Config("simulation needs at least 2 nodes".into()));
    }

    let ha = HaConfig {
        retry_interval_ms: retry_ms.max(1),
        ..HaConfig::default()
    };
    let cluster = InMemoryCluster::new();

    let mut running = Vec::with_capacity(nodes);
    let mut next_index = 0;
    for _ in 0..nodes {
        running.push(spawn_node(&cluster, next_index, &ha).await?);
        next_index += 1;
    }

    for round in 1..=rounds {
        for node in &running {
            node.engine.ingest(100).await;
        }

        for node in &running {
            println!(
                "round {}: {} {:<16} processed={} emitted={}",
                round,
                node.engine.name(),
                node.handle.role().to_string(),
                node.engine.processed().await,
                node.engine.emitted().await
            );
        }

        let Some(position) = running.iter().position(|n| n.handle.role().is_active()) else {
            return Err(Error::Coordination("no active node in simulated cluster".into()));
        };

        let victim = running.remove(position);
        println!("round {}: failing active {}", round, victim.engine.name());
        victim.server.stop();
        cluster.remove_member(&victim.member_id).await;
        if let Err(e) = victim.handle.shutdown().await {
            tracing::debug!("Failed node shut down with error: {}", e);
        }

        let deadline = Duration::from_millis(ha.retry_interval_ms * 2);
        let mut promoted = None;
        for node in &running {
            if node.handle.wait_for(RoleState::Active, deadline).await {
                promoted = Some(node.engine.name().to_string());
                break;
            }
        }
        match promoted {
            Some(name) => println!("round {}: {} took over", round, name),
            None => {
                return Err(Error::Coordination(format!(
                    "no node promoted within {:?}",
                    deadline
                )))
            }
        }

        running.push(spawn_node(&cluster, next_index, &ha).await?);
        next_index += 1;
    }

    for node in running {
        node.server.stop();
        node.handle.shutdown().await?;
    }
    Ok(())
}
