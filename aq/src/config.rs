//! AgentQueue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP control plane
    pub http: HttpConfig,

    /// Queue and scheduler behaviour
    pub queue: QueueConfig,

    /// Child executor process
    pub executor: ExecutorConfig,

    /// Timeout profiles
    pub timeouts: TimeoutsConfig,

    /// Review loop
    pub review: ReviewConfig,

    /// Task chunking
    pub chunking: ChunkingConfig,
}

impl Config {
    /// Load configuration with fallback chain:
    /// explicit path, `./.agentqueue.yml`, `~/.config/agentqueue/agentqueue.yml`,
    /// built-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".agentqueue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("agentqueue").join("agentqueue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The state directory, defaulting under the local data dir
    pub fn state_dir(&self) -> PathBuf {
        self.queue.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agentqueue")
                .join("state")
        })
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub bind: String,

    /// Listen port
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Queue and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// State directory; defaults under the local data dir
    #[serde(rename = "state-dir")]
    pub state_dir: Option<PathBuf>,

    /// Namespace; derived from the working directory when unset
    pub namespace: Option<String>,

    /// Poll interval when the queue is empty or the semaphore is full
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Age after which a RUNNING task counts as stale
    #[serde(rename = "stale-threshold-ms")]
    pub stale_threshold_ms: i64,

    /// How often the stale scan re-runs
    #[serde(rename = "stale-scan-interval-ms")]
    pub stale_scan_interval_ms: u64,

    /// Heartbeat cadence for in-flight tasks
    #[serde(rename = "heartbeat-interval-ms")]
    pub heartbeat_interval_ms: u64,

    /// Window within which a runner heartbeat counts as alive
    #[serde(rename = "runner-alive-window-ms")]
    pub runner_alive_window_ms: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            namespace: None,
            poll_interval_ms: 1_000,
            stale_threshold_ms: 30_000,
            stale_scan_interval_ms: 60_000,
            heartbeat_interval_ms: 5_000,
            runner_alive_window_ms: 120_000,
        }
    }
}

/// Child executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Executor binary; a bare name is resolved through PATH
    pub command: String,

    /// Arguments passed to the executor
    pub args: Vec<String>,

    /// Working directory for the child; inherits ours when unset
    pub workdir: Option<PathBuf>,

    /// Environment variable that must hold the API credential;
    /// preflight fails closed when it is empty
    #[serde(rename = "auth-env")]
    pub auth_env: Option<String>,

    /// Global executor semaphore size
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Grace period between SIGTERM and SIGKILL on user-initiated shutdown
    #[serde(rename = "grace-period-ms")]
    pub grace_period_ms: u64,

    /// Output ring buffer capacity (chunks)
    #[serde(rename = "ring-capacity")]
    pub ring_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            workdir: None,
            auth_env: Some("ANTHROPIC_API_KEY".to_string()),
            max_concurrent: 4,
            grace_period_ms: 5_000,
            ring_capacity: 1_024,
        }
    }
}

/// One timeout profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    #[serde(rename = "idle-ms")]
    pub idle_ms: u64,

    #[serde(rename = "hard-ms")]
    pub hard_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            idle_ms: 60_000,
            hard_ms: 600_000,
        }
    }
}

/// The three timeout profiles
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub standard: ProfileConfig,
    pub long: ProfileConfig,
    pub extended: ProfileConfig,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            standard: ProfileConfig {
                idle_ms: 60_000,
                hard_ms: 600_000,
            },
            long: ProfileConfig {
                idle_ms: 120_000,
                hard_ms: 1_800_000,
            },
            extended: ProfileConfig {
                idle_ms: 300_000,
                hard_ms: 3_600_000,
            },
        }
    }
}

/// Review loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Upper bound on review iterations per task
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Fixed delay before a RETRY re-submission
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// When iterations run out: true -> INCOMPLETE, false -> ERROR
    #[serde(rename = "escalate-on-max")]
    pub escalate_on_max: bool,

    /// Activate the GD1-GD5 goal-drift criteria
    #[serde(rename = "goal-drift-guard")]
    pub goal_drift_guard: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            retry_delay_ms: 2_000,
            escalate_on_max: true,
            goal_drift_guard: false,
        }
    }
}

/// Task chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Minimum induced subtasks for a prompt to be decomposable
    #[serde(rename = "min-subtasks")]
    pub min_subtasks: usize,

    /// Maximum induced subtasks
    #[serde(rename = "max-subtasks")]
    pub max_subtasks: usize,

    /// Retries per subtask before FAILED
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Base retry delay
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Exponential backoff multiplier
    #[serde(rename = "retry-multiplier")]
    pub retry_multiplier: f64,

    /// Stop on the first failed subtask
    #[serde(rename = "fail-fast")]
    pub fail_fast: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_subtasks: 2,
            max_subtasks: 10,
            max_retries: 2,
            retry_delay_ms: 1_000,
            retry_multiplier: 2.0,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.executor.max_concurrent, 4);
        assert_eq!(config.queue.poll_interval_ms, 1_000);
        assert_eq!(config.review.max_iterations, 3);
        assert_eq!(config.timeouts.standard.idle_ms, 60_000);
        assert_eq!(config.timeouts.extended.hard_ms, 3_600_000);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
http:
  bind: 0.0.0.0
  port: 9090

queue:
  namespace: dev
  poll-interval-ms: 250
  stale-threshold-ms: 10000

executor:
  command: my-agent
  auth-env: MY_TOKEN
  max-concurrent: 2

review:
  max-iterations: 5
  goal-drift-guard: true
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.queue.namespace.as_deref(), Some("dev"));
        assert_eq!(config.queue.poll_interval_ms, 250);
        assert_eq!(config.executor.command, "my-agent");
        assert_eq!(config.executor.auth_env.as_deref(), Some("MY_TOKEN"));
        assert_eq!(config.executor.max_concurrent, 2);
        assert_eq!(config.review.max_iterations, 5);
        assert!(config.review.goal_drift_guard);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
executor:
  command: other-agent
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.executor.command, "other-agent");
        assert_eq!(config.executor.max_concurrent, 4);
        assert_eq!(config.http.port, 8787);
        assert_eq!(config.chunking.min_subtasks, 2);
        assert_eq!(config.chunking.max_subtasks, 10);
    }

    #[test]
    fn test_state_dir_override() {
        let mut config = Config::default();
        config.queue.state_dir = Some(PathBuf::from("/tmp/aq-test"));
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/aq-test"));
    }
}
