use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::LOOP_PORT;
use crate::enums::{Comparison, RetryBackoff};

/// One layer of a processor's dispatch stack, listed top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerDef {
  /// Bounds the number of concurrently outstanding jobs.
  Parallelize(ParallelizeDef),
  /// Turns activity errors into error documents on every output port.
  ErrorBounce,
  /// Re-issues failed jobs against the processor's alternate activities.
  Failover,
  /// Re-issues failed jobs after a backoff delay.
  Retry(RetryDef),
  /// Re-issues successful jobs while a condition holds.
  Loop(LoopDef),
}

impl LayerDef {
  /// The stack used when a processor does not configure one.
  pub fn default_stack() -> Vec<LayerDef> {
    vec![
      LayerDef::Parallelize(ParallelizeDef::default()),
      LayerDef::ErrorBounce,
      LayerDef::Failover,
      LayerDef::Retry(RetryDef::default()),
    ]
  }

  pub fn kind(&self) -> &'static str {
    match self {
      LayerDef::Parallelize(_) => "parallelize",
      LayerDef::ErrorBounce => "error_bounce",
      LayerDef::Failover => "failover",
      LayerDef::Retry(_) => "retry",
      LayerDef::Loop(_) => "loop",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelizeDef {
  /// Maximum concurrently outstanding jobs per invocation. Unbounded if unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDef {
  /// Maximum invocation attempts, including the first.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_initial_delay_ms")]
  pub initial_delay_ms: u64,
  #[serde(default)]
  pub backoff: RetryBackoff,
  #[serde(default = "default_backoff_factor")]
  pub backoff_factor: f64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms: u64,
  /// Jitter factor (0.0-1.0). A value of 0.1 means ±10% randomness.
  #[serde(default)]
  pub jitter: f64,
}

fn default_max_attempts() -> u32 {
  5
}

fn default_initial_delay_ms() -> u64 {
  1_000
}

fn default_backoff_factor() -> f64 {
  2.0
}

fn default_max_delay_ms() -> u64 {
  60_000
}

impl Default for RetryDef {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      initial_delay_ms: default_initial_delay_ms(),
      backoff: RetryBackoff::default(),
      backoff_factor: default_backoff_factor(),
      max_delay_ms: default_max_delay_ms(),
      jitter: 0.0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDef {
  /// Name of the condition activity.
  pub condition: String,
  /// Condition output compared to decide whether to loop again.
  #[serde(default = "default_compare_port")]
  pub compare_port: String,
  #[serde(default)]
  pub comparison: Comparison,
  #[serde(default = "default_compare_value")]
  pub compare_value: serde_json::Value,
  /// Processor output port → processor input port fed back on each pass.
  #[serde(default)]
  pub feedback: BTreeMap<String, String>,
  /// Pause before each repeated invocation.
  #[serde(default)]
  pub delay_ms: u64,
  /// Upper bound on invocations of a looped job, the first one included.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_iterations: Option<u32>,
}

fn default_compare_port() -> String {
  LOOP_PORT.to_string()
}

fn default_compare_value() -> serde_json::Value {
  serde_json::Value::String("true".to_string())
}

impl LoopDef {
  pub fn new(condition: impl Into<String>) -> Self {
    Self {
      condition: condition.into(),
      compare_port: default_compare_port(),
      comparison: Comparison::default(),
      compare_value: default_compare_value(),
      feedback: BTreeMap::new(),
      delay_ms: 0,
      max_iterations: None,
    }
  }
}
