use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrigadeError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub junior_to_senior: u32,
    pub senior_to_executive: u32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            junior_to_senior: 3,
            senior_to_executive: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Shell command invoked for this tier; the prompt is piped to stdin.
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCommands {
    pub junior: CommandTemplate,
    pub senior: CommandTemplate,
    pub executive: CommandTemplate,
}

impl Default for WorkerCommands {
    fn default() -> Self {
        Self {
            junior: CommandTemplate {
                command: "worker-junior".to_string(),
            },
            senior: CommandTemplate {
                command: "worker-senior".to_string(),
            },
            executive: CommandTemplate {
                command: "worker-executive".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrigadeConfig {
    pub max_parallel: usize,
    pub tier_thresholds: TierThresholds,
    #[serde(with = "humantime_secs")]
    pub tier_timeout_junior: Duration,
    #[serde(with = "humantime_secs")]
    pub tier_timeout_senior: Duration,
    #[serde(with = "humantime_secs")]
    pub tier_timeout_executive: Duration,
    #[serde(with = "humantime_secs")]
    pub verification_command_timeout: Duration,
    #[serde(with = "humantime_secs")]
    pub health_check_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub termination_grace_period: Duration,
    #[serde(with = "humantime_secs")]
    pub lock_stale_threshold: Duration,
    #[serde(with = "humantime_secs")]
    pub lock_heartbeat_interval: Duration,
    #[serde(with = "humantime_secs")]
    pub lock_acquire_timeout: Duration,
    #[serde(with = "humantime_secs")]
    pub decision_gate_timeout: Duration,
    pub consecutive_skip_limit: u32,
    #[serde(with = "humantime_secs")]
    pub supervisor_poll_interval: Duration,
    pub crash_exit_code: i32,
    pub timeout_exit_code: i32,
    pub blocked_exit_code: i32,
    pub already_done_exit_code: i32,
    pub absorbed_exit_code: i32,
    pub worker_commands: WorkerCommands,
    pub marker_extensions: Vec<String>,
    pub incomplete_markers: Vec<String>,
    pub review_enabled: bool,
    pub review_junior_only: bool,
}

impl Default for BrigadeConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            tier_thresholds: TierThresholds::default(),
            tier_timeout_junior: Duration::from_secs(10 * 60),
            tier_timeout_senior: Duration::from_secs(20 * 60),
            tier_timeout_executive: Duration::from_secs(30 * 60),
            verification_command_timeout: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(2),
            termination_grace_period: Duration::from_secs(10),
            lock_stale_threshold: Duration::from_secs(60),
            lock_heartbeat_interval: Duration::from_secs(5),
            lock_acquire_timeout: Duration::from_secs(30),
            decision_gate_timeout: Duration::from_secs(10 * 60),
            consecutive_skip_limit: 3,
            supervisor_poll_interval: Duration::from_secs(1),
            crash_exit_code: 125,
            timeout_exit_code: 124,
            blocked_exit_code: 32,
            already_done_exit_code: 33,
            absorbed_exit_code: 34,
            worker_commands: WorkerCommands::default(),
            marker_extensions: [
                "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "cc", "cpp", "h",
                "hpp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            incomplete_markers: ["TODO", "FIXME", "HACK", "XXX"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            review_enabled: true,
            review_junior_only: false,
        }
    }
}

impl BrigadeConfig {
    /// Config sidecar path for a plan file: `<plan>.brigade.json`.
    pub fn sidecar_path(plan_path: &Path) -> PathBuf {
        let mut os = plan_path.as_os_str().to_owned();
        os.push(".brigade.json");
        PathBuf::from(os)
    }

    /// Load the sidecar config if present, defaulting otherwise (spec.md §4.13 / SPEC_FULL §3.1).
    pub fn load(plan_path: &Path) -> Result<Self, BrigadeError> {
        let path = Self::sidecar_path(plan_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        Ok(cfg)
    }

    pub fn tier_timeout(&self, tier: crate::models::plan::Tier) -> Duration {
        use crate::models::plan::Tier;
        match tier {
            Tier::Junior => self.tier_timeout_junior,
            Tier::Senior => self.tier_timeout_senior,
            Tier::Executive => self.tier_timeout_executive,
        }
    }

    pub fn tier_threshold(&self, tier: crate::models::plan::Tier) -> Option<u32> {
        use crate::models::plan::Tier;
        match tier {
            Tier::Junior => Some(self.tier_thresholds.junior_to_senior),
            Tier::Senior => Some(self.tier_thresholds.senior_to_executive),
            Tier::Executive => None,
        }
    }
}

/// `Duration` as whole seconds, since `serde` has no built-in for `Duration`.
mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
