// # fleetd - Fleet Daemon
//
// This daemon is a THIN integration layer:
// - All device state and OTA logic lives in fleet-core
// - Broker, artifact store and policy service are plugin crates
// - Configuration is via environment variables ONLY
//
// The fleetd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime
// 3. Connecting to the broker and building the HTTP clients
// 4. Starting the fleet engine and stopping it on SIGTERM/SIGINT
//
// ## Configuration
//
// ### Broker
// - `FLEET_MQTT_URL`: Broker URL (mqtt://, tcp:// or mqtts://), default mqtt://localhost:1883
// - `FLEET_MQTT_USER`: Broker username (optional)
// - `FLEET_MQTT_PASS`: Broker password (optional)
// - `FLEET_MQTT_CLIENT_ID`: Client identifier (optional, generated when unset)
//
// ### Firmware
// - `FLEET_ARTIFACT_URL`: Base URL of the firmware metadata service
// - `FLEET_FIRMWARE_URL_TTL`: Lifetime of signed download URLs in seconds
// - `FLEET_OTA_CACHE_TTL`: Production version cache lifetime in seconds (0 disables)
//
// ### Network Policy
// - `FLEET_POLICY_URL`: Base URL of the broker policy service (optional)
// - `FLEET_POLICY_TOKEN`: Bearer token for the policy service (optional)
// - `FLEET_POLICY_DRY_RUN`: Log policy changes instead of sending them (true/false)
//
// Without a URL and token the policy client runs in dry-run mode.
//
// ### Watchdog
// - `FLEET_OFFLINE_THRESHOLD`: Silence before a device is marked offline, in seconds
// - `FLEET_SWEEP_INTERVAL`: Period of the offline sweep, in seconds
//
// ### State Store
// - `FLEET_STATE_STORE_TYPE`: Type of state store (file)
// - `FLEET_STATE_STORE_PATH`: Path to state file (for file store)
//
// Devices are registered by writing the state file, so the daemon has no use
// for the in-memory store: every device would be unknown and all telemetry
// would be dropped.
//
// ## Example
//
// ```bash
// export FLEET_MQTT_URL=mqtts://broker.example.com:8883
// export FLEET_MQTT_USER=fleetd
// export FLEET_MQTT_PASS=secret
// export FLEET_ARTIFACT_URL=https://firmware.example.com/esp32
// export FLEET_STATE_STORE_TYPE=file
// export FLEET_STATE_STORE_PATH=/var/lib/fleet/state.json
//
// fleetd
// ```

use anyhow::Result;
use fleet_artifact_http::{DEFAULT_URL_TTL_SECS, HttpArtifactStore};
use fleet_core::config::{OtaConfig, WatchdogConfig};
use fleet_core::{
    Collaborators, FileStore, FleetConfig, FleetEngine, FleetEvent, StateStoreConfig,
    Transport,
};
use fleet_policy_http::HttpPolicyService;
use fleet_transport_mqtt::{MqttConfig, MqttConnection};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound for draining the engine after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL the dry-run policy client reports in its logs
const DRY_RUN_POLICY_URL: &str = "http://policy.invalid";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum FleetExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<FleetExitCode> for ExitCode {
    fn from(code: FleetExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    mqtt_url: String,
    mqtt_user: Option<String>,
    mqtt_pass: Option<String>,
    mqtt_client_id: Option<String>,
    artifact_url: String,
    firmware_url_ttl: u64,
    ota_cache_ttl: Option<u64>,
    policy_url: Option<String>,
    policy_token: Option<String>,
    policy_dry_run: bool,
    offline_threshold: Option<u64>,
    sweep_interval: Option<u64>,
    state_store_type: String,
    state_store_path: Option<String>,
    log_level: String,
}

/// Read an optional variable, treating an empty value as unset
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Read and parse an optional numeric variable
fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a whole number. Got: {}", name, raw)),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            mqtt_url: optional_var("FLEET_MQTT_URL")
                .unwrap_or_else(|| "mqtt://localhost:1883".to_string()),
            mqtt_user: optional_var("FLEET_MQTT_USER"),
            mqtt_pass: optional_var("FLEET_MQTT_PASS"),
            mqtt_client_id: optional_var("FLEET_MQTT_CLIENT_ID"),
            artifact_url: optional_var("FLEET_ARTIFACT_URL").unwrap_or_default(),
            firmware_url_ttl: parsed_var("FLEET_FIRMWARE_URL_TTL")?.unwrap_or(DEFAULT_URL_TTL_SECS),
            ota_cache_ttl: parsed_var("FLEET_OTA_CACHE_TTL")?,
            policy_url: optional_var("FLEET_POLICY_URL"),
            policy_token: optional_var("FLEET_POLICY_TOKEN"),
            policy_dry_run: optional_var("FLEET_POLICY_DRY_RUN")
                .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")),
            offline_threshold: parsed_var("FLEET_OFFLINE_THRESHOLD")?,
            sweep_interval: parsed_var("FLEET_SWEEP_INTERVAL")?,
            state_store_type: optional_var("FLEET_STATE_STORE_TYPE")
                .unwrap_or_else(|| "file".to_string()),
            state_store_path: optional_var("FLEET_STATE_STORE_PATH"),
            log_level: optional_var("FLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Every error names the variable to fix and, where possible, an example
    /// value.
    fn validate(&self) -> Result<()> {
        // Broker URL scheme (the transport crate parses the rest)
        if !["mqtt://", "tcp://", "mqtts://", "ssl://"]
            .iter()
            .any(|scheme| self.mqtt_url.starts_with(scheme))
        {
            anyhow::bail!(
                "FLEET_MQTT_URL must use mqtt://, tcp:// or mqtts://. Got: {}",
                self.mqtt_url
            );
        }

        if self.mqtt_pass.is_some() && self.mqtt_user.is_none() {
            anyhow::bail!(
                "FLEET_MQTT_PASS is set but FLEET_MQTT_USER is not. \
                Set it via: export FLEET_MQTT_USER=fleetd"
            );
        }

        // Firmware metadata service
        if self.artifact_url.is_empty() {
            anyhow::bail!(
                "FLEET_ARTIFACT_URL is required. \
                Set it via: export FLEET_ARTIFACT_URL=https://firmware.example.com/esp32"
            );
        }

        if !self.artifact_url.starts_with("https://") && !self.artifact_url.starts_with("http://") {
            anyhow::bail!(
                "FLEET_ARTIFACT_URL must use HTTP or HTTPS scheme. Got: {}",
                self.artifact_url
            );
        }

        if self.artifact_url.starts_with("http://") {
            eprintln!(
                "WARNING: FLEET_ARTIFACT_URL uses HTTP (not HTTPS). \
                Signed firmware URLs will travel unencrypted."
            );
        }

        if !(60..=86_400).contains(&self.firmware_url_ttl) {
            anyhow::bail!(
                "FLEET_FIRMWARE_URL_TTL must be between 60 and 86400 seconds. Got: {}",
                self.firmware_url_ttl
            );
        }

        if let Some(ttl) = self.ota_cache_ttl
            && ttl > 3600
        {
            anyhow::bail!("FLEET_OTA_CACHE_TTL must be at most 3600 seconds. Got: {}", ttl);
        }

        // Policy service: either fully configured or dry-run
        if !self.policy_dry_run {
            match (&self.policy_url, &self.policy_token) {
                (Some(url), Some(_)) => {
                    if !url.starts_with("https://") && !url.starts_with("http://") {
                        anyhow::bail!("FLEET_POLICY_URL must use HTTP or HTTPS scheme. Got: {}", url);
                    }
                }
                (Some(_), None) => anyhow::bail!(
                    "FLEET_POLICY_TOKEN is required when FLEET_POLICY_URL is set. \
                    Set it via: export FLEET_POLICY_TOKEN=your_token \
                    (or FLEET_POLICY_DRY_RUN=true to skip policy changes)"
                ),
                (None, Some(_)) => anyhow::bail!(
                    "FLEET_POLICY_URL is required when FLEET_POLICY_TOKEN is set. \
                    Set it via: export FLEET_POLICY_URL=https://broker.example.com/api"
                ),
                (None, None) => {}
            }
        }

        // Watchdog ranges
        if let Some(threshold) = self.offline_threshold
            && !(10..=86_400).contains(&threshold)
        {
            anyhow::bail!(
                "FLEET_OFFLINE_THRESHOLD must be between 10 and 86400 seconds. Got: {}",
                threshold
            );
        }

        if let Some(interval) = self.sweep_interval
            && !(1..=3600).contains(&interval)
        {
            anyhow::bail!(
                "FLEET_SWEEP_INTERVAL must be between 1 and 3600 seconds. Got: {}",
                interval
            );
        }

        // Validate state store type
        match self.state_store_type.as_str() {
            "file" => {}
            "memory" => anyhow::bail!(
                "FLEET_STATE_STORE_TYPE=memory cannot be used by fleetd: \
                devices cannot be registered at runtime, so all telemetry would be \
                dropped as unknown. Use FLEET_STATE_STORE_TYPE=file with a state file \
                listing the fleet"
            ),
            _ => anyhow::bail!(
                "FLEET_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file",
                self.state_store_type
            ),
        }

        if self.state_store_type == "file" {
            let Some(ref path) = self.state_store_path else {
                anyhow::bail!(
                    "FLEET_STATE_STORE_PATH is required when FLEET_STATE_STORE_TYPE=file. \
                    Set it via: export FLEET_STATE_STORE_PATH=/var/lib/fleet/state.json"
                );
            };

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "FLEET_STATE_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FLEET_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Policy changes are only logged
    fn policy_is_dry_run(&self) -> bool {
        self.policy_dry_run || self.policy_url.is_none() || self.policy_token.is_none()
    }

    fn fleet_config(&self) -> FleetConfig {
        let mut watchdog = WatchdogConfig::default();
        if let Some(threshold) = self.offline_threshold {
            watchdog.offline_threshold_secs = threshold;
        }
        if let Some(interval) = self.sweep_interval {
            watchdog.sweep_interval_secs = interval;
        }

        let mut ota = OtaConfig::default();
        if let Some(ttl) = self.ota_cache_ttl {
            ota.cache_ttl_secs = ttl;
        }

        let state_store = match (self.state_store_type.as_str(), &self.state_store_path) {
            ("file", Some(path)) => StateStoreConfig::File { path: path.clone() },
            _ => StateStoreConfig::Memory,
        };

        FleetConfig {
            watchdog,
            ota,
            state_store,
            ..FleetConfig::default()
        }
    }

    fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            url: self.mqtt_url.clone(),
            username: self.mqtt_user.clone(),
            password: self.mqtt_pass.clone(),
            client_id: self.mqtt_client_id.clone(),
            ..MqttConfig::default()
        }
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return FleetExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return FleetExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FleetExitCode::ConfigError.into();
    }

    info!("Starting fleetd daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FleetExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            FleetExitCode::RuntimeError
        } else {
            FleetExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the engine over the given transport
async fn build_engine(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<(Arc<FleetEngine>, mpsc::Receiver<FleetEvent>)> {
    let fleet_config = config.fleet_config();

    let artifacts = Arc::new(HttpArtifactStore::new(&config.artifact_url, config.firmware_url_ttl)?);
    info!("Firmware metadata from {}", artifacts.base_url());

    let policy = if config.policy_is_dry_run() {
        warn!("Policy service in dry-run mode: broker access changes are only logged");
        let base = config.policy_url.as_deref().unwrap_or(DRY_RUN_POLICY_URL);
        Arc::new(HttpPolicyService::new_dry_run(base)?)
    } else {
        let (Some(url), Some(token)) = (&config.policy_url, &config.policy_token) else {
            anyhow::bail!("Policy service URL and token are required outside dry-run mode");
        };
        Arc::new(HttpPolicyService::new(url, token, false)?)
    };

    let collaborators = match &fleet_config.state_store {
        StateStoreConfig::File { path } => {
            info!("State store: file ({})", path);
            let store = Arc::new(FileStore::new(path).await?);
            Collaborators::with_store(store, transport, artifacts, policy)
        }
        StateStoreConfig::Memory => {
            anyhow::bail!("fleetd requires a file state store (FLEET_STATE_STORE_TYPE=file)");
        }
    };

    let (engine, events) = FleetEngine::new(collaborators, fleet_config)?;
    Ok((Arc::new(engine), events))
}

/// Log fleet events until the engine drops its sender
async fn log_events(mut events: mpsc::Receiver<FleetEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            FleetEvent::DevicesOffline { device_ids } => {
                info!("{} device(s) went offline", device_ids.len());
            }
            FleetEvent::OtaFailed { device_id, .. } => {
                warn!("Firmware update failed on {}", device_id);
            }
            other => debug!("Fleet event: {:?}", other),
        }
    }
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let connection = MqttConnection::connect(&config.mqtt_config())?;

    let (engine, events) = match build_engine(&config, Arc::new(connection.transport())).await {
        Ok(built) => built,
        Err(e) => {
            connection.shutdown().await;
            return Err(e);
        }
    };
    tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let run = engine.run_with_shutdown(connection.telemetry(), Some(shutdown_rx));
    tokio::pin!(run);

    info!("Daemon initialized successfully");

    let outcome = tokio::select! {
        // The engine only returns early when it cannot start
        result = &mut run => result.map_err(anyhow::Error::from),

        received = wait_for_shutdown_signal() => {
            match received {
                Ok(name) => info!("Received shutdown signal: {}", name),
                Err(ref e) => error!("Signal handler error: {}", e),
            }
            let _ = shutdown_tx.send(());

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut run).await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(_) => Err(anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT)),
            }
        }
    };

    connection.shutdown().await;
    info!("Shutting down daemon");
    outcome
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
