use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use jobtrail_session::SessionConfig;
use jobtrail_transport::{ReconnectPolicy, StreamEndpoint, TransportConfig};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [stream]
//                    max_reconnect_attempts = 5
//
//   env var:         JOBTRAIL_STREAM__MAX_RECONNECT_ATTEMPTS=5   (double underscore = nesting)
//
//   (single underscore stays within field names: JOBTRAIL_SERVER__MESSAGES_PATH)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub stream: StreamFileConfig,
}

/// Where the assistant lives (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_messages_path")]
    pub messages_path: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            messages_path: default_messages_path(),
        }
    }
}

/// Event stream tuning (lives under `[stream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default = "default_stream_path")]
    pub path: String,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            path: default_stream_path(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            max_payload_bytes: default_max_payload_bytes(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_origin() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_messages_path() -> String {
    "/api/chat/messages".to_string()
}
fn default_stream_path() -> String {
    jobtrail_transport::DEFAULT_STREAM_PATH.to_string()
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    20
}
fn default_inactivity_timeout_secs() -> u64 {
    300
}
fn default_max_payload_bytes() -> usize {
    jobtrail_transport::MAX_PAYLOAD_BYTES
}
fn default_channel_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → JOBTRAIL_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `JOBTRAIL_SERVER__ORIGIN=https://jobs.example`  →  `server.origin`
///   `JOBTRAIL_STREAM__INACTIVITY_TIMEOUT_SECS=60`  →  `stream.inactivity_timeout_secs`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("JOBTRAIL_").split("__"))
}

// =============================================================================
// Runtime config (validated view of FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Scheme, host and port every relative path is resolved against.
    pub origin: Url,
    pub messages_path: String,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let origin = parse_origin(&fc.server.origin)?;

        // Both paths must be same-origin; reuse the stream's rules for the REST path.
        StreamEndpoint::parse(&fc.server.messages_path)
            .context("Invalid server.messages_path")?;
        StreamEndpoint::parse(&fc.stream.path).context("Invalid stream.path")?;

        let stream = &fc.stream;
        if stream.initial_backoff_ms == 0 || stream.max_backoff_ms < stream.initial_backoff_ms {
            bail!(
                "stream backoff must satisfy 0 < initial_backoff_ms ({}) <= max_backoff_ms ({})",
                stream.initial_backoff_ms,
                stream.max_backoff_ms
            );
        }

        Ok(Self {
            origin,
            messages_path: fc.server.messages_path.clone(),
            transport: TransportConfig {
                endpoint: stream.path.clone(),
                policy: ReconnectPolicy {
                    initial_delay: Duration::from_millis(stream.initial_backoff_ms),
                    max_delay: Duration::from_millis(stream.max_backoff_ms),
                    max_attempts: stream.max_reconnect_attempts,
                },
                inactivity_timeout: Duration::from_secs(stream.inactivity_timeout_secs),
                max_payload_bytes: stream.max_payload_bytes,
            },
            session: SessionConfig {
                event_capacity: stream.channel_capacity.max(1),
            },
        })
    }
}

fn parse_origin(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid server.origin {raw:?}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("server.origin must be http or https, got {:?}", url.scheme());
    }
    if url.host_str().is_none() {
        bail!("server.origin {raw:?} has no host");
    }
    if url.path() != "/" || url.query().is_some() {
        bail!("server.origin {raw:?} must not carry a path or query");
    }
    Ok(url)
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct JobtrailDirs {
    pub data_dir: PathBuf,
}

impl JobtrailDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".jobtrail"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
