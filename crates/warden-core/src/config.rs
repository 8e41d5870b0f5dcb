//! Kernel configuration
//!
//! Every service takes an explicit [`KernelConfig`] at construction; the
//! binary builds one from the environment at boot. Tests construct configs
//! directly.

use std::time::Duration;

use crate::stage::Stage;

/// Per-stage collaborator timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    pub execution: Duration,
    pub detection: Duration,
    pub verification: Duration,
    pub fixing: Duration,
    pub learning: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            execution: Duration::from_millis(300_000),
            detection: Duration::from_millis(60_000),
            verification: Duration::from_millis(120_000),
            fixing: Duration::from_millis(600_000),
            learning: Duration::from_millis(30_000),
        }
    }
}

impl StageTimeouts {
    /// Timeout for an executable stage
    pub fn for_stage(&self, stage: Stage) -> Option<Duration> {
        match stage {
            Stage::Execution => Some(self.execution),
            Stage::Detection => Some(self.detection),
            Stage::Verification => Some(self.verification),
            Stage::Fixing => Some(self.fixing),
            Stage::Learning => Some(self.learning),
            _ => None,
        }
    }

    /// Overall workflow budget: sum of stage timeouts with 50% headroom
    pub fn overall_workflow_timeout(&self) -> Duration {
        let total = self.execution + self.detection + self.verification + self.fixing
            + self.learning;
        total.mul_f64(1.5)
    }
}

/// Kernel-wide configuration
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub stage_timeouts: StageTimeouts,

    /// Maximum retries before escalation
    pub max_retries: u32,

    /// Heartbeat age at which an active instance becomes stale
    pub stale_threshold: Duration,

    /// Interval between stale sweeps
    pub sweep_interval: Duration,

    /// Context window usage that triggers an automatic checkpoint
    pub checkpoint_context_threshold_percent: f64,

    /// Optional JSON file with redaction patterns; built-in defaults otherwise
    pub redaction_pattern_file: Option<String>,

    /// Directory escalation handoffs are written to
    pub handoff_dir: String,

    /// Concurrent workflow limit for the scheduler
    pub max_concurrent_workflows: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            stage_timeouts: StageTimeouts::default(),
            max_retries: 3,
            stale_threshold: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            checkpoint_context_threshold_percent: 80.0,
            redaction_pattern_file: None,
            handoff_dir: "./handoffs".to_string(),
            max_concurrent_workflows: 8,
        }
    }
}

impl KernelConfig {
    /// Build from environment variables, falling back to defaults
    ///
    /// Recognized variables: `WARDEN_MAX_RETRIES`,
    /// `WARDEN_STALE_THRESHOLD_SECS`, `WARDEN_SWEEP_INTERVAL_SECS`,
    /// `WARDEN_CHECKPOINT_THRESHOLD_PERCENT`, `WARDEN_REDACTION_PATTERNS`,
    /// `WARDEN_HANDOFF_DIR`, `WARDEN_MAX_CONCURRENT_WORKFLOWS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("WARDEN_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("WARDEN_STALE_THRESHOLD_SECS") {
            config.stale_threshold = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("WARDEN_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<f64>("WARDEN_CHECKPOINT_THRESHOLD_PERCENT") {
            config.checkpoint_context_threshold_percent = v.clamp(0.0, 100.0);
        }
        if let Ok(v) = std::env::var("WARDEN_REDACTION_PATTERNS") {
            if !v.is_empty() {
                config.redaction_pattern_file = Some(v);
            }
        }
        if let Ok(v) = std::env::var("WARDEN_HANDOFF_DIR") {
            if !v.is_empty() {
                config.handoff_dir = v;
            }
        }
        if let Some(v) = env_parse::<usize>("WARDEN_MAX_CONCURRENT_WORKFLOWS") {
            config.max_concurrent_workflows = v.max(1);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
