use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use clustermap::{ClusterLayout, StaticClusterMap};
use common::traits::ReplicaDirectory;
use common::{ClusterMapConfig, DataNodeId, NetworkError, RouterConfig, ServerErrorCode};
use router::{LoggingNotificationSystem, Router};
use sim_datanode::{FaultMode, SimCluster};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format =
            std::env::var("BLOBMESH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "routerctl")]
#[command(about = "Blob router inspection and simulation utility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fault {
    /// Node answers every request with an IO error.
    IoError,
    /// Every request to the node fails in the transport with a timeout.
    Timeout,
    /// Node never answers.
    Unresponsive,
}

impl Fault {
    fn mode(self) -> FaultMode {
        match self {
            Fault::IoError => FaultMode::ErrorCode(ServerErrorCode::IoError),
            Fault::Timeout => FaultMode::NetworkError(NetworkError::RequestTimeout),
            Fault::Unresponsive => FaultMode::Unresponsive,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check a cluster layout and, optionally, router and cluster map configs
    Validate {
        /// YAML cluster layout
        #[arg(long)]
        layout: PathBuf,
        /// YAML router config
        #[arg(long)]
        config: Option<PathBuf>,
        /// YAML cluster map config
        #[arg(long)]
        map_config: Option<PathBuf>,
    },
    /// Parse a blob id against a cluster layout
    BlobId {
        /// YAML cluster layout
        #[arg(long)]
        layout: PathBuf,
        /// Blob id string
        id: String,
    },
    /// Run put, get and delete for each blob against a simulated cluster
    Simulate {
        #[arg(long, default_value_t = 2)]
        datacenters: usize,
        #[arg(long, default_value_t = 3)]
        nodes: usize,
        #[arg(long, default_value_t = 4)]
        partitions: u64,
        #[arg(long, default_value_t = 16)]
        blobs: usize,
        /// Node to break, as host:port
        #[arg(long)]
        fail_node: Option<DataNodeId>,
        #[arg(long, value_enum, default_value_t = Fault::IoError, requires = "fail_node")]
        fault: Fault,
        /// YAML router config; defaults are used when absent
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_router_config(path: Option<&Path>) -> Result<RouterConfig> {
    let config = match path {
        Some(path) => RouterConfig::load(path)
            .with_context(|| format!("loading router config {}", path.display()))?,
        None => RouterConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn load_map(layout: &Path, map_config: Option<&Path>) -> Result<StaticClusterMap> {
    let layout = ClusterLayout::load(layout)
        .with_context(|| format!("loading cluster layout {}", layout.display()))?;
    let map_config = match map_config {
        Some(path) => ClusterMapConfig::load(path)
            .with_context(|| format!("loading cluster map config {}", path.display()))?,
        None => ClusterMapConfig::default(),
    };
    let map_config = map_config.with_env_overrides()?;
    map_config.validate()?;
    Ok(StaticClusterMap::new(&layout, &map_config)?)
}

fn validate(layout: &Path, config: Option<&Path>, map_config: Option<&Path>) -> Result<()> {
    let map = load_map(layout, map_config)?;
    if config.is_some() {
        let config = load_router_config(config)?;
        println!(
            "Router config OK (datacenter {}, put target {})",
            config.datacenter_name, config.put_success_target
        );
    }
    println!(
        "Layout OK: {} partitions, {} writable",
        map.partition_ids().len(),
        map.writable_partitions().len()
    );
    Ok(())
}

fn describe_blob_id(layout: &Path, id: &str) -> Result<()> {
    let map = load_map(layout, None)?;
    let blob_id = router::utils::blob_id_from_str(id, &map)?;
    println!("Version:   {}", blob_id.version());
    println!("Partition: {}", blob_id.partition());
    println!("UUID:      {}", blob_id.uuid());
    Ok(())
}

struct Workload {
    datacenters: usize,
    nodes: usize,
    partitions: u64,
    blobs: usize,
    fail_node: Option<DataNodeId>,
    fault: Fault,
}

async fn simulate(workload: Workload, config: RouterConfig) -> Result<()> {
    let cluster = SimCluster::uniform(workload.datacenters, workload.nodes, workload.partitions)?;
    if let Some(node_id) = &workload.fail_node {
        let node = cluster
            .node(node_id)
            .with_context(|| format!("no simulated node {node_id}"))?;
        node.set_fault(workload.fault.mode());
        info!(node = %node_id, fault = ?workload.fault, "injected fault");
    }

    let router = Router::new(
        config,
        cluster.map().clone(),
        cluster.network().clone(),
        Arc::new(LoggingNotificationSystem),
    )?;
    router.start();

    let puts: Vec<_> = (0..workload.blobs)
        .map(|i| router.put_blob(Bytes::from(format!("blob-{i}"))))
        .collect();
    let mut blob_ids = Vec::with_capacity(puts.len());
    for put in puts {
        match put.await {
            Ok(blob_id) => blob_ids.push(blob_id.to_string()),
            Err(err) => warn!(error = %err, "put failed"),
        }
    }

    let gets: Vec<_> = blob_ids.iter().map(|id| router.get_blob(id)).collect();
    for (id, get) in blob_ids.iter().zip(gets) {
        if let Err(err) = get.await {
            warn!(blob_id = %id, error = %err, "get failed");
        }
    }

    let deletes: Vec<_> = blob_ids.iter().map(|id| router.delete_blob(id)).collect();
    for (id, delete) in blob_ids.iter().zip(deletes) {
        if let Err(err) = delete.await {
            warn!(blob_id = %id, error = %err, "delete failed");
        }
    }

    router.close().await;
    info!(
        stored = blob_ids.len(),
        requests = cluster.network().requests_sent(),
        "simulation finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&router.metrics().snapshot())?
    );
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            layout,
            config,
            map_config,
        } => validate(&layout, config.as_deref(), map_config.as_deref())?,
        Commands::BlobId { layout, id } => describe_blob_id(&layout, &id)?,
        Commands::Simulate {
            datacenters,
            nodes,
            partitions,
            blobs,
            fail_node,
            fault,
            config,
        } => {
            let config = load_router_config(config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(simulate(
                Workload {
                    datacenters,
                    nodes,
                    partitions,
                    blobs,
                    fail_node,
                    fault,
                },
                config,
            ))?;
        }
    }

    Ok(())
}
