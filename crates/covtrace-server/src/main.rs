//! covtrace binary
//!
//! - `covtrace server`: HTTP API (plus an embedded worker with the memory broker)
//! - `covtrace worker`: record validation worker consuming the task queue
//! - `covtrace credentials`: issue a credential locally, bypassing activation codes

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use covtrace_core::{RefreshHash, Role, ServerKeys};
use covtrace_server::{
    auth::{CredentialRequest, IssueOptions},
    broker::TASKS_EXCHANGE,
    create_router, supervisor::PURGE_INTERVAL, AccessEnforcer, ApiConfig, AppState, Consumer,
    CredentialAuthority, CredentialConfig, MemoryBroker, MemoryStore, Publisher,
    RecordIngestPipeline, RecordValidator, RegistrationGate, Settings, Store, Supervisor,
};

/// covtrace contact-tracing backend
#[derive(Parser, Debug)]
#[command(name = "covtrace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COVTRACE_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "COVTRACE_LOG_FORMAT", default_value = "plain", global = true)]
    log_format: String,

    /// TOML settings file (resolver providers, directory publisher)
    #[arg(long, env = "COVTRACE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the root and refresh keys
    #[arg(long, env = "COVTRACE_HOME", default_value = "/etc/covtrace", global = true)]
    home: PathBuf,

    /// Refresh code hash (blake3, hmac-sha256)
    #[arg(long, env = "COVTRACE_REFRESH_HASH", default_value = "blake3", global = true)]
    refresh_hash: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the API server
    Server(ServerArgs),
    /// Run the record validation worker
    Worker(WorkerArgs),
    /// Issue a credential without an activation code
    Credentials(CredentialsArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BrokerKind {
    Memory,
    Redis,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Task queue backend
    #[arg(long, env = "COVTRACE_BROKER", value_enum, default_value = "memory")]
    broker: BrokerKind,

    /// Redis connection string
    #[arg(long, env = "COVTRACE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// PostgreSQL connection string; in-memory storage when unset
    #[arg(long, env = "COVTRACE_DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum concurrent validation tasks (0 = unbounded)
    #[arg(long, env = "COVTRACE_MAX_IN_FLIGHT", default_value = "0")]
    max_in_flight: usize,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// HTTP port
    #[arg(long, env = "COVTRACE_PORT", default_value = "9090")]
    port: u16,

    /// Server name, used as token issuer and audience
    #[arg(long, env = "COVTRACE_NAME", default_value = "covtrace-tracking.test")]
    name: String,

    /// JSON authorization rules replacing the default policy
    #[arg(long, env = "COVTRACE_POLICY_FILE")]
    policy_file: Option<PathBuf>,

    /// Lifetime of issued tokens
    #[arg(long, env = "COVTRACE_TOKEN_LIFETIME_HOURS", default_value = "168")]
    token_lifetime_hours: i64,

    /// Domain stamped on generated document proofs
    #[arg(long, env = "COVTRACE_PROOF_DOMAIN", default_value = "covtrace-tracking.test")]
    proof_domain: String,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Debug)]
struct CredentialsArgs {
    /// Server name, used as token issuer and audience
    #[arg(long, env = "COVTRACE_NAME", default_value = "covtrace-tracking.test")]
    name: String,

    /// Lifetime of the issued token
    #[arg(long, default_value = "168")]
    token_lifetime_hours: i64,

    /// Subject DID
    #[arg(long)]
    did: String,

    /// Role to grant
    #[arg(long, default_value = "admin")]
    role: String,

    /// Value signed by the proof
    #[arg(long)]
    code: String,

    /// JSON LD-signature envelope over `code`
    #[arg(long)]
    proof: String,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

fn load_keys(cli: &Cli) -> Result<Arc<ServerKeys>> {
    let refresh_hash: RefreshHash = cli.refresh_hash.parse()?;
    std::fs::create_dir_all(&cli.home)
        .with_context(|| format!("Failed to create home directory {}", cli.home.display()))?;
    let keys = ServerKeys::load_or_generate(&cli.home, refresh_hash)
        .context("Failed to load server keys")?;
    Ok(Arc::new(keys))
}

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn Store>> {
    match database_url {
        Some(url) => open_postgres(url).await,
        None => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str) -> Result<Arc<dyn Store>> {
    let store = covtrace_server::storage::PostgresStore::new(url)
        .await
        .context("Failed to open PostgreSQL store")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str) -> Result<Arc<dyn Store>> {
    bail!("a database URL was given but this build lacks the 'postgres' feature")
}

struct Broker {
    publisher: Arc<dyn Publisher>,
    consumer: Arc<dyn Consumer>,
}

async fn open_broker(args: &BackendArgs) -> Result<Broker> {
    match args.broker {
        BrokerKind::Memory => {
            let broker = Arc::new(MemoryBroker::new().with_queue(TASKS_EXCHANGE));
            Ok(Broker {
                publisher: broker.clone(),
                consumer: broker,
            })
        }
        BrokerKind::Redis => open_redis(&args.redis_url).await,
    }
}

#[cfg(feature = "redis")]
async fn open_redis(url: &str) -> Result<Broker> {
    let broker = Arc::new(
        covtrace_server::broker::RedisBroker::connect(url)
            .await
            .context("Failed to connect to Redis")?,
    );
    Ok(Broker {
        publisher: broker.clone(),
        consumer: broker,
    })
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_url: &str) -> Result<Broker> {
    bail!("the redis broker requires the 'redis' feature")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

async fn run_server(cli: &Cli, args: &ServerArgs) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let keys = load_keys(cli)?;
    let resolver = Arc::new(settings.build_resolver()?);
    let enforcer = match &args.policy_file {
        Some(path) => AccessEnforcer::from_file(path)
            .with_context(|| format!("Failed to load policy {}", path.display()))?,
        None => AccessEnforcer::with_default_rules()?,
    };

    let store = open_store(args.backend.database_url.as_deref()).await?;
    let broker = open_broker(&args.backend).await?;
    let registration = RegistrationGate::new(store.clone());

    let authority = CredentialAuthority::new(
        CredentialConfig::new(args.name.clone())
            .with_token_lifetime(chrono::Duration::hours(args.token_lifetime_hours)),
        keys,
        resolver.clone(),
        registration.clone(),
    )?;

    let mut supervisor = Supervisor::new();
    if let Some(returns) = broker.publisher.take_returns() {
        supervisor.spawn_return_monitor(returns);
    }
    supervisor.spawn_code_purge(store.clone(), PURGE_INTERVAL);
    if args.backend.broker == BrokerKind::Memory {
        info!("Memory broker selected, running embedded worker");
        let validator = RecordValidator::new(resolver, store.clone(), settings.build_directory()?);
        let deliveries = broker.consumer.subscribe(TASKS_EXCHANGE).await?;
        supervisor.spawn_worker(validator, deliveries, args.backend.max_in_flight);
    }

    let state = Arc::new(AppState {
        authority,
        enforcer,
        registration,
        ingest: RecordIngestPipeline::new(broker.publisher.clone()),
        publisher: broker.publisher.clone(),
        store: store.clone(),
        config: ApiConfig {
            proof_domain: args.proof_domain.clone(),
        },
    });

    info!(
        name = %args.name,
        port = args.port,
        broker = ?args.backend.broker,
        policy_rules = state.enforcer.len(),
        "Starting covtrace server"
    );

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(addr = %addr, "covtrace listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.shutdown().await;
    broker.publisher.close().await?;
    store.close().await;
    info!("covtrace server stopped");
    Ok(())
}

async fn run_worker(cli: &Cli, args: &WorkerArgs) -> Result<()> {
    if args.backend.broker == BrokerKind::Memory {
        bail!("the worker needs a shared broker; use --broker redis");
    }

    let settings = Settings::load(cli.config.as_deref())?;
    let resolver = Arc::new(settings.build_resolver()?);
    let store = open_store(args.backend.database_url.as_deref()).await?;
    let broker = open_broker(&args.backend).await?;

    let validator = RecordValidator::new(resolver, store.clone(), settings.build_directory()?);
    let deliveries = broker.consumer.subscribe(TASKS_EXCHANGE).await?;

    let mut supervisor = Supervisor::new();
    supervisor.spawn_worker(validator, deliveries, args.backend.max_in_flight);
    info!(max_in_flight = args.backend.max_in_flight, "covtrace worker running");

    shutdown_signal().await;
    supervisor.shutdown().await;
    broker.consumer.close().await?;
    store.close().await;
    info!("covtrace worker stopped");
    Ok(())
}

async fn run_credentials(cli: &Cli, args: &CredentialsArgs) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let keys = load_keys(cli)?;
    let resolver = Arc::new(settings.build_resolver()?);
    let role: Role = args.role.parse()?;
    let proof: serde_json::Value =
        serde_json::from_str(&args.proof).context("Proof is not valid JSON")?;

    let authority = CredentialAuthority::new(
        CredentialConfig::new(args.name.clone())
            .with_token_lifetime(chrono::Duration::hours(args.token_lifetime_hours)),
        keys,
        resolver,
        RegistrationGate::new(Arc::new(MemoryStore::new())),
    )?;

    let request = CredentialRequest {
        did: args.did.clone(),
        role,
        activation_code: args.code.clone(),
        proof,
    };
    let credential = authority
        .issue(&request, IssueOptions::bootstrap())
        .await
        .context("Failed to issue credential")?;

    println!("{}", serde_json::to_string_pretty(&credential)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, &cli.log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), home = %cli.home.display(), "covtrace starting");

    match &cli.command {
        Command::Server(args) => run_server(&cli, args).await,
        Command::Worker(args) => run_worker(&cli, args).await,
        Command::Credentials(args) => run_credentials(&cli, args).await,
    }
}
