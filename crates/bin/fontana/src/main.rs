//! fontana - pay-per-API-call rollup node
//!
//! usage:
//!   fontana --genesis ./genesis.json              # run the node
//!   fontana recover --genesis ./genesis.json      # rebuild state from DA

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fontana_da::HttpDaClient;
use fontana_ledger::Ledger;
use fontana_node::{
    api, recover, Config, DaConfig, DaPoster, HttpL1Client, L1Config, Node, Sequencer,
    VaultWatcher,
};
use fontana_storage::Storage;
use fontana_types::GenesisConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fontana")]
#[command(about = "pay-per-API-call rollup node", long_about = None)]
struct Args {
    /// storage location
    #[arg(long, env = "FONTANA_DB_PATH", default_value = "./fontana.db")]
    db_path: PathBuf,

    /// genesis file (initial UTXO set and chain id)
    #[arg(long, env = "FONTANA_GENESIS", default_value = "./genesis.json")]
    genesis: PathBuf,

    /// HTTP API listen address
    #[arg(long, env = "FONTANA_LISTEN", default_value = "127.0.0.1:8545")]
    listen: SocketAddr,

    /// DA node JSON-RPC endpoint
    #[arg(long, env = "FONTANA_DA_NODE_URL", default_value = "http://127.0.0.1:26658")]
    da_node_url: String,

    /// DA auth token (bearer)
    #[arg(long, env = "FONTANA_DA_AUTH_TOKEN")]
    da_auth_token: Option<String>,

    /// 8-byte base namespace, 16 hex characters
    #[arg(long, env = "FONTANA_DA_NAMESPACE", default_value = "666f6e74616e6130")]
    da_namespace: String,

    /// DA-side finality depth for clients
    #[arg(long, env = "FONTANA_DA_CONFIRMATION_BLOCKS", default_value_t = 2)]
    da_confirmation_blocks: u64,

    /// sequencer cadence in seconds
    #[arg(long, env = "FONTANA_BLOCK_INTERVAL_SECONDS", default_value_t = 6)]
    block_interval_seconds: u64,

    /// pending-count trigger for early block production
    #[arg(long, env = "FONTANA_MAX_BATCH")]
    max_batch: Option<usize>,

    /// how many sealed state roots stay provable
    #[arg(long, env = "FONTANA_HISTORICAL_ROOTS_KEPT", default_value_t = 64)]
    historical_roots_kept: usize,

    /// L1 vault address to watch
    #[arg(long, env = "FONTANA_L1_VAULT_ADDRESS", default_value = "")]
    l1_vault_address: String,

    /// L1 node JSON-RPC endpoint
    #[arg(long, env = "FONTANA_L1_NODE_URL", default_value = "http://127.0.0.1:26657")]
    l1_node_url: String,

    /// vault poll cadence in seconds
    #[arg(long, env = "FONTANA_L1_POLL_INTERVAL_SECONDS", default_value_t = 12)]
    l1_poll_interval_seconds: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// run the node (default)
    Run,
    /// rebuild local state by replaying DA blobs
    Recover,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            db_path: self.db_path.clone(),
            genesis_path: self.genesis.clone(),
            listen: self.listen,
            block_interval: Duration::from_secs(self.block_interval_seconds),
            max_batch: self.max_batch,
            historical_roots_kept: self.historical_roots_kept,
            mailbox_capacity: fontana_node::config::DEFAULT_MAILBOX_CAPACITY,
            da: DaConfig {
                node_url: self.da_node_url.clone(),
                auth_token: self.da_auth_token.clone(),
                namespace_base: self.da_namespace.clone(),
                confirmation_blocks: self.da_confirmation_blocks,
            },
            l1: L1Config {
                vault_address: self.l1_vault_address.clone(),
                node_url: self.l1_node_url.clone(),
                poll_interval: Duration::from_secs(self.l1_poll_interval_seconds),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fontana=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    let namespace_base = config.validate().context("invalid configuration")?;

    let genesis =
        GenesisConfig::from_file(&config.genesis_path).context("loading genesis file")?;

    info!("starting fontana");
    info!("  chain id: {}", genesis.chain_id);
    info!("  database: {}", config.db_path.display());
    info!("  da node: {}", config.da.node_url);
    info!("  namespace base: {}", config.da.namespace_base);
    info!("  block interval: {}s", config.block_interval.as_secs());

    let storage = Arc::new(Storage::open(&config.db_path)?);

    match args.command.unwrap_or(Command::Run) {
        Command::Recover => {
            let da = HttpDaClient::new(&config.da.node_url, config.da.auth_token.clone())
                .map_err(|e| anyhow::anyhow!("da client: {e}"))?;
            let ledger = recover(
                &da,
                &namespace_base,
                &genesis,
                storage.clone(),
                config.historical_roots_kept,
            )
            .await?;
            storage.flush()?;
            info!(
                "recovery complete at height {} with state root {}",
                ledger.next_height() - 1,
                hex::encode(ledger.get_current_state_root()),
            );
            Ok(())
        }
        Command::Run => run_node(config, namespace_base, genesis, storage).await,
    }
}

async fn run_node(
    config: Config,
    namespace_base: fontana_da::Namespace,
    genesis: GenesisConfig,
    storage: Arc<Storage>,
) -> Result<()> {
    let ledger = Ledger::open(storage.clone(), &genesis, config.historical_roots_kept)?;
    info!(
        "ledger open at height {} with state root {}",
        ledger.next_height() - 1,
        hex::encode(ledger.get_current_state_root()),
    );

    let sequencer = Sequencer::new(config.block_interval, config.max_batch);
    let (node, handle) = Node::new(ledger, sequencer, config.mailbox_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = tokio::spawn(node.run(shutdown_rx.clone()));

    let da = Arc::new(
        HttpDaClient::new(&config.da.node_url, config.da.auth_token.clone())
            .map_err(|e| anyhow::anyhow!("da client: {e}"))?,
    );
    let poster = DaPoster::new(
        da,
        storage.clone(),
        namespace_base,
        config.block_interval,
    );
    let poster_task = tokio::spawn(poster.run(shutdown_rx.clone()));

    let watcher_task = if config.l1.vault_address.is_empty() {
        info!("no l1 vault address configured; bridge watcher disabled");
        None
    } else {
        let l1 = HttpL1Client::new(&config.l1.node_url)
            .map_err(|e| anyhow::anyhow!("l1 client: {e}"))?;
        let watcher = VaultWatcher::new(
            l1,
            config.l1.vault_address.clone(),
            config.l1.poll_interval,
            storage.clone(),
            handle.mailbox.clone(),
        );
        Some(tokio::spawn(watcher.run(shutdown_rx.clone())))
    };

    let app = api::router(api::ApiState {
        handle: handle.clone(),
        storage: storage.clone(),
        da_confirmation_blocks: config.da.confirmation_blocks,
    });
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!("api listening on {}", config.listen);

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!("api server error: {e}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    writer.await?;
    poster_task.await?;
    if let Some(task) = watcher_task {
        task.await?;
    }
    server.await?;
    storage.flush()?;
    info!("bye");
    Ok(())
}
