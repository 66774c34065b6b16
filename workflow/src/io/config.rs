//! Workflow configuration stored under `.workflow/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::repetition::RepetitionGuard;
use crate::core::stagnation::{DEFAULT_THRESHOLD, DEFAULT_WINDOW, StagnationDetector};
use crate::events::CompactionConfig;
use crate::orchestrator::OrchestratorConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".workflow/config.toml";

/// Workflow configuration (TOML).
///
/// Meant to be edited by humans. Missing fields and tables fall back to
/// their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Ask for a narrative report once orchestration ends.
    pub final_report: bool,
    pub planning: PlanningConfig,
    pub implementation: ImplementationConfig,
    pub stagnation: StagnationConfig,
    pub compaction: CompactionConfig,
    pub invoker: InvokerConfig,
    pub prompt: PromptConfig,
    pub repetition: RepetitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanningConfig {
    pub max_iterations: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImplementationConfig {
    pub max_iterations: u32,
    /// Abort the remaining plan when a stage fails.
    pub fail_fast: bool,
    /// Safety cap on stages run in one session.
    pub max_stage_runs: usize,
}

impl Default for ImplementationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            fail_fast: true,
            max_stage_runs: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagnationConfig {
    pub window: usize,
    /// Token-overlap ratio at or above which two critiques count as repeats.
    pub threshold: f64,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// External generation program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvokerConfig {
    /// Program and arguments. `{role}` and `{output}` are substituted per call;
    /// the prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-last-message",
                "{output}",
                "-",
            ]
            .map(String::from)
            .to_vec(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Rendered prompts above this size drop their droppable sections.
    pub budget_bytes: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 40_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepetitionConfig {
    pub min_pattern: usize,
    pub max_pattern: usize,
    pub threshold: usize,
    pub window: usize,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            min_pattern: 200,
            max_pattern: 1000,
            threshold: 5,
            window: 5000,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            final_report: true,
            planning: PlanningConfig::default(),
            implementation: ImplementationConfig::default(),
            stagnation: StagnationConfig::default(),
            compaction: CompactionConfig::default(),
            invoker: InvokerConfig::default(),
            prompt: PromptConfig::default(),
            repetition: RepetitionConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.planning.max_iterations == 0 {
            return Err(anyhow!("planning.max_iterations must be >= 1"));
        }
        if self.implementation.max_iterations == 0 {
            return Err(anyhow!("implementation.max_iterations must be >= 1"));
        }
        if self.implementation.max_stage_runs == 0 {
            return Err(anyhow!("implementation.max_stage_runs must be >= 1"));
        }
        if self.stagnation.window < 2 {
            return Err(anyhow!("stagnation.window must be >= 2"));
        }
        if !(self.stagnation.threshold > 0.0 && self.stagnation.threshold <= 1.0) {
            return Err(anyhow!("stagnation.threshold must be in (0, 1]"));
        }
        let compaction = &self.compaction;
        if compaction.retain_recent == 0 {
            return Err(anyhow!("compaction.retain_recent must be >= 1"));
        }
        if compaction.threshold <= compaction.retain_recent {
            return Err(anyhow!(
                "compaction.threshold must be greater than compaction.retain_recent"
            ));
        }
        if compaction.hard_event_cap < compaction.threshold {
            return Err(anyhow!(
                "compaction.hard_event_cap must be >= compaction.threshold"
            ));
        }
        if compaction.payload_size_cap < 64 {
            return Err(anyhow!("compaction.payload_size_cap must be >= 64"));
        }
        if self.invoker.command.is_empty() || self.invoker.command[0].trim().is_empty() {
            return Err(anyhow!("invoker.command must be a non-empty array"));
        }
        if self.invoker.timeout_secs == 0 {
            return Err(anyhow!("invoker.timeout_secs must be > 0"));
        }
        if self.invoker.output_limit_bytes == 0 {
            return Err(anyhow!("invoker.output_limit_bytes must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        let repetition = &self.repetition;
        if repetition.min_pattern == 0 || repetition.min_pattern > repetition.max_pattern {
            return Err(anyhow!(
                "repetition.min_pattern must be >= 1 and <= repetition.max_pattern"
            ));
        }
        if repetition.threshold < 2 {
            return Err(anyhow!("repetition.threshold must be >= 2"));
        }
        Ok(())
    }

    pub fn detector(&self) -> StagnationDetector {
        StagnationDetector::new(self.stagnation.window, self.stagnation.threshold)
    }

    pub fn repetition_guard(&self) -> RepetitionGuard {
        let r = &self.repetition;
        RepetitionGuard::new(r.min_pattern, r.max_pattern, r.threshold, r.window)
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations: self.implementation.max_iterations,
            fail_fast: self.implementation.fail_fast,
            max_stage_runs: self.implementation.max_stage_runs,
            detector: self.detector(),
        }
    }

    pub fn invoker_timeout(&self) -> Duration {
        Duration::from_secs(self.invoker.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkflowConfig> {
    if !path.exists() {
        let cfg = WorkflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WorkflowConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let mut cfg = WorkflowConfig::default();
        cfg.implementation.fail_fast = false;
        cfg.stagnation.threshold = 0.75;
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[planning]\nmax_iterations = 5\n\n[compaction]\nthreshold = 40\n")
            .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.planning.max_iterations, 5);
        assert_eq!(cfg.compaction.threshold, 40);
        assert_eq!(cfg.compaction.retain_recent, 10);
        assert!(cfg.implementation.fail_fast);
    }

    #[test]
    fn rejects_nonsensical_values() {
        let mut cfg = WorkflowConfig::default();
        cfg.compaction.threshold = cfg.compaction.retain_recent;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkflowConfig::default();
        cfg.stagnation.threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkflowConfig::default();
        cfg.invoker.command.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invoker.command"));
    }

    #[test]
    fn hard_cap_below_threshold_is_rejected() {
        let mut cfg = WorkflowConfig::default();
        cfg.compaction.threshold = 30;
        cfg.compaction.retain_recent = 10;
        cfg.compaction.hard_event_cap = 20;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("hard_event_cap"));

        cfg.compaction.hard_event_cap = 30;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_file_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[planning]\nmax_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("planning.max_iterations"));
    }
}
