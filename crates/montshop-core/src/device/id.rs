use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use rand::RngCore;
use tracing::{debug, warn};

/// File holding the synthesized device id in the config directory
const DEVICE_ID_FILE: &str = "device_id";

/// Default time allowed for the platform bridge to answer.
pub const DEFAULT_DEVICE_ID_TIMEOUT: Duration = Duration::from_millis(2000);

/// Platform bridge that knows the host's device identifier.
pub trait DeviceIdProvider: Send + Sync {
    fn device_id(&self) -> BoxFuture<'_, Result<String>>;
}

/// Reads the systemd/dbus machine id.
pub struct MachineIdProvider {
    paths: Vec<PathBuf>,
}

impl MachineIdProvider {
    pub fn new() -> Self {
        Self {
            paths: vec![
                PathBuf::from("/etc/machine-id"),
                PathBuf::from("/var/lib/dbus/machine-id"),
            ],
        }
    }

    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Default for MachineIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceIdProvider for MachineIdProvider {
    fn device_id(&self) -> BoxFuture<'_, Result<String>> {
        let paths = self.paths.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                for path in &paths {
                    if let Ok(contents) = std::fs::read_to_string(path) {
                        let id = contents.trim();
                        if !id.is_empty() {
                            return Ok(id.to_string());
                        }
                    }
                }
                Err(anyhow::anyhow!("No machine id found"))
            })
            .await
            .context("Machine id lookup panicked")?
        })
    }
}

/// Resolves the `X-Device-Id` value for outgoing requests.
///
/// With a bridge configured, the bridge is asked (bounded by `timeout`) and a
/// successful answer is cached; a failure or timeout yields `None` for that
/// request only. Without a bridge the synthesized fallback id is used.
#[derive(Clone)]
pub struct DeviceIdResolver {
    provider: Option<Arc<dyn DeviceIdProvider>>,
    fallback: Option<String>,
    timeout: Duration,
    cached: Arc<Mutex<Option<String>>>,
}

impl DeviceIdResolver {
    pub fn new(provider: Option<Arc<dyn DeviceIdProvider>>, fallback: Option<String>) -> Self {
        Self {
            provider,
            fallback,
            timeout: DEFAULT_DEVICE_ID_TIMEOUT,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_bridge(provider: Arc<dyn DeviceIdProvider>) -> Self {
        Self::new(Some(provider), None)
    }

    pub fn with_fallback(device_id: impl Into<String>) -> Self {
        Self::new(None, Some(device_id.into()))
    }

    /// Neither bridge nor fallback: the header is never sent
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn resolve(&self) -> Option<String> {
        let Some(provider) = self.provider.as_ref() else {
            return self.fallback.clone();
        };

        if let Ok(cached) = self.cached.lock() {
            if cached.is_some() {
                return cached.clone();
            }
        }

        match tokio::time::timeout(self.timeout, provider.device_id()).await {
            Ok(Ok(id)) => {
                if let Ok(mut cached) = self.cached.lock() {
                    *cached = Some(id.clone());
                }
                Some(id)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Device id lookup failed, omitting header");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Device id lookup timed out, omitting header");
                None
            }
        }
    }
}

/// Load the synthesized device id from `config_dir`, creating it on first use.
pub fn load_or_create_device_id(config_dir: &Path) -> Result<String> {
    let path = config_dir.join(DEVICE_ID_FILE);
    if path.exists() {
        let id = std::fs::read_to_string(&path).context("Failed to read device id file")?;
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let id = synthesize_device_id();
    std::fs::create_dir_all(config_dir)?;
    std::fs::write(&path, &id).context("Failed to write device id file")?;
    debug!(path = %path.display(), "Created device id");
    Ok(id)
}

/// Random identifier for hosts with no platform bridge
pub fn synthesize_device_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("cli-{}", hex)
}
