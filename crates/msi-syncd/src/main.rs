// # msi-syncd - MSI Sync Daemon
//
// Thin integration layer over msi-core. All sync logic (bootstrap decision,
// stage sequencing, events, scheduling) lives in the library; this binary:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Wires the store, bundle, remote endpoint and policy
// 4. Registers every enabled source with the background scheduler
// 5. Runs one foreground sync of every source, then waits for a signal
//
// ## Configuration
//
// ### Remote
// - `MSI_API_BASE_URL`: Publications API root (default https://msi.nga.mil/api)
// - `MSI_HTTP_TIMEOUT_SECS`: Per-request timeout
// - `MSI_OFFLINE`: `true` to never contact the remote service
//
// ### Local data
// - `MSI_BUNDLE_DIR`: Directory of bundled `<source>.json` snapshots
// - `MSI_STORE_TYPE`: `memory` or `file`
// - `MSI_STORE_PATH`: Store directory (for file store)
// - `MSI_CACHE_DIR`: Image cache directory (optional)
//
// ### Sources and scheduling
// - `MSI_SOURCES`: Comma-separated source keys (default: all)
// - `MSI_REFRESH_INTERVAL_SECS`: Delay between background refreshes
// - `MSI_TASK_EXPIRATION_SECS`: Execution budget of one background refresh
// - `MSI_MAX_PENDING_REQUESTS`: Pending background request limit
//
// ### Logging
// - `MSI_LOG_LEVEL`: trace, debug, info, warn or error
//
// ## Example
//
// ```bash
// export MSI_STORE_TYPE=file
// export MSI_STORE_PATH=/var/lib/msi
// export MSI_SOURCES=asam,navigational_warning,light
//
// msi-syncd
// ```

use anyhow::{Context, Result};
use msi_core::catalog::register_catalog;
use msi_core::config::{StoreConfig, SyncConfig};
use msi_core::store::open_store;
use msi_core::traits::{BundleResource, RemoteEndpoint, SettingsPolicy, SourceCache};
use msi_core::{
    BackgroundScheduler, CoordinatorRegistry, DirectoryBundle, DirectoryCache, EventBus,
    SourceKey, SyncEnvironment, SyncStatusStore, TokioBackgroundFacility,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long shutdown waits for cancelled invocations to unwind
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SyncdExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<SyncdExitCode> for ExitCode {
    fn from(code: SyncdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration: the engine settings plus the log level
struct DaemonConfig {
    sync: SyncConfig,
    log_level: String,
}

impl DaemonConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep the `SyncConfig` defaults.
    fn from_env() -> Result<Self> {
        let mut sync = SyncConfig::new();

        if let Some(url) = var("MSI_API_BASE_URL") {
            sync.remote.base_url = url;
        }
        if let Some(secs) = parsed_var("MSI_HTTP_TIMEOUT_SECS")? {
            sync.remote.timeout_secs = secs;
        }
        if let Some(offline) = var("MSI_OFFLINE") {
            sync.offline = parse_flag("MSI_OFFLINE", &offline)?;
        }
        if let Some(dir) = var("MSI_BUNDLE_DIR") {
            sync.bundle.dir = dir;
        }

        sync.store = match var("MSI_STORE_TYPE").as_deref().unwrap_or("memory") {
            "memory" => StoreConfig::Memory,
            "file" => StoreConfig::File {
                dir: var("MSI_STORE_PATH").context(
                    "MSI_STORE_PATH is required when MSI_STORE_TYPE=file. \
                    Set it via: export MSI_STORE_PATH=/var/lib/msi",
                )?,
            },
            other => anyhow::bail!(
                "MSI_STORE_TYPE '{}' is not supported. Supported types: memory, file",
                other
            ),
        };

        sync.cache.dir = var("MSI_CACHE_DIR");
        if let Some(sources) = var("MSI_SOURCES") {
            sync.sources = sources
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(SourceKey::new)
                .collect();
        }

        if let Some(secs) = parsed_var("MSI_REFRESH_INTERVAL_SECS")? {
            sync.scheduler.refresh_interval_secs = secs;
        }
        if let Some(secs) = parsed_var("MSI_TASK_EXPIRATION_SECS")? {
            sync.scheduler.expiration_secs = secs;
        }
        if let Some(limit) = parsed_var("MSI_MAX_PENDING_REQUESTS")? {
            sync.scheduler.max_pending_requests = limit;
        }

        Ok(Self {
            sync,
            log_level: var("MSI_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if let StoreConfig::File { dir } = &self.sync.store {
            let path = std::path::Path::new(dir);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "MSI_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if self.sync.remote.base_url.starts_with("http://") {
            eprintln!(
                "WARNING: MSI_API_BASE_URL uses HTTP (not HTTPS). \
                Consider using HTTPS."
            );
        }

        log_level(&self.log_level)?;
        Ok(())
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, value, e))
        })
        .transpose()
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be true or false. Got: {}", name, value),
    }
}

fn log_level(name: &str) -> Result<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "MSI_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            name
        ),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return SyncdExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return SyncdExitCode::ConfigError.into();
    }

    // Validated above
    let level = log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SyncdExitCode::ConfigError.into();
    }

    info!("Starting msi-syncd daemon");
    info!(
        store = config.sync.store.type_name(),
        offline = config.sync.offline,
        "Configuration loaded"
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SyncdExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config.sync).await {
            error!("Daemon error: {:#}", e);
            SyncdExitCode::RuntimeError
        } else {
            SyncdExitCode::CleanShutdown
        }
    });

    result.into()
}

#[cfg(feature = "http")]
fn remote_endpoint(config: &SyncConfig) -> Result<Arc<dyn RemoteEndpoint>> {
    let endpoint =
        msi_remote_http::HttpRemoteEndpoint::new(&config.remote.base_url, config.remote.timeout())?;
    info!(base_url = %endpoint.base_url(), "HTTP remote endpoint ready");
    Ok(Arc::new(endpoint))
}

#[cfg(not(feature = "http"))]
fn remote_endpoint(_config: &SyncConfig) -> Result<Arc<dyn RemoteEndpoint>> {
    warn!("Built without the http feature; remote fetches will fail");
    Ok(Arc::new(msi_core::traits::OfflineEndpoint))
}

/// Run the daemon
async fn run_daemon(config: SyncConfig) -> Result<()> {
    let store = open_store(&config.store)
        .await
        .context("Failed to open local store")?;
    let bundle: Arc<dyn BundleResource> = Arc::new(DirectoryBundle::new(&config.bundle.dir));
    let remote = remote_endpoint(&config)?;
    let policy = SettingsPolicy::new(config.offline).with_enabled_sources(config.sources.clone());
    let cache = config
        .cache
        .dir
        .as_ref()
        .map(|dir| Arc::new(DirectoryCache::new(dir)) as Arc<dyn SourceCache>);

    let env = SyncEnvironment {
        store: Arc::clone(&store),
        remote,
        bundle,
        policy: Arc::new(policy),
        cache,
        events: EventBus::new(config.event_channel_capacity),
        status: SyncStatusStore::new(),
    };

    let registry = CoordinatorRegistry::new();
    let registered = register_catalog(&registry, &env, &config.sources)?;
    info!(sources = registered, "Sources registered");

    let restored = env
        .status
        .restore_from(store.as_ref(), registry.list_sources())
        .await;
    info!(sources = restored, "Restored last sync times");

    let events = spawn_event_logger(&env.events);

    // Background refresh
    let facility = Arc::new(TokioBackgroundFacility::new(
        config.scheduler.facility_settings(),
    ));
    let scheduler = BackgroundScheduler::new(facility.clone(), config.scheduler.refresh_interval());
    for coordinator in registry.coordinators() {
        if !scheduler.register(coordinator) {
            warn!("Background refresh unavailable for a source; foreground sync only");
        }
    }

    // Initial foreground sync of every source
    let invocations = registry.fetch_all();
    let initial = tokio::spawn(async move {
        let mut changed = 0;
        let mut cancelled = 0;
        for invocation in invocations {
            let report = invocation.wait().await;
            changed += report.total_changed();
            if report.cancelled {
                cancelled += 1;
            }
        }
        info!(changed, cancelled, "Initial sync finished");
    });

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    facility.shutdown();
    registry.cancel_all();
    if tokio::time::timeout(SHUTDOWN_GRACE, initial).await.is_err() {
        warn!("Initial sync did not stop within {:?}", SHUTDOWN_GRACE);
    }
    events.abort();

    store.flush().await.context("Failed to flush local store")?;
    info!("Local store flushed");
    Ok(())
}

/// Log every sync event at info level
fn spawn_event_logger(events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut subscription = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match &event {
                msi_core::SyncEvent::SourceUpdated { source, changed } => {
                    info!(source = %source, changed, "source updated")
                }
                msi_core::SyncEvent::SourceNeedsProcessed { source } => {
                    info!(source = %source, "source needs processing")
                }
                other => debug!(source = %other.source(), kind = other.kind(), "sync event"),
            }
        }
    })
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
