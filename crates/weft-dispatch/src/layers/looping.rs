//! Repeating a job while a condition activity says so.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weft_activity::ActivityRef;
use weft_config::{Comparison, LoopDef};
use weft_event::{Data, DownEvent, Index, Job, JobError, JobResult, OwningProcess, UpEvent};

use crate::layer::{DispatchLayer, LayerContext, Wake};

/// What a loop condition decided for one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
  Continue,
  Stop,
}

/// A finished condition evaluation, delivered back to the loop layer.
#[derive(Debug)]
pub struct ConditionOutcome {
  pub result: JobResult,
  pub decision: Result<LoopDecision, JobError>,
}

/// The condition activity and how its output is judged.
pub struct LoopCondition {
  activity: ActivityRef,
  compare_port: String,
  comparison: Comparison,
  compare_value: serde_json::Value,
}

impl LoopCondition {
  pub fn new(activity: ActivityRef, def: &LoopDef) -> Self {
    Self {
      activity,
      compare_port: def.compare_port.clone(),
      comparison: def.comparison,
      compare_value: def.compare_value.clone(),
    }
  }

  pub fn activity(&self) -> &ActivityRef {
    &self.activity
  }

  /// Invoke the condition on a result's outputs and compare its answer.
  pub async fn evaluate(&self, result: &JobResult) -> Result<LoopDecision, JobError> {
    let fail = |message: String| {
      JobError::fatal(result.owning_process.clone(), result.index.clone(), message)
    };

    let outputs = self
      .activity
      .invoke(result.outputs.clone())
      .await
      .map_err(|e| fail(format!("loop condition '{}' failed: {}", self.activity.name(), e)))?;

    let value = match outputs.get(&self.compare_port) {
      Some(Data::Value(value)) => value,
      Some(_) => {
        return Err(fail(format!(
          "loop condition output '{}' is not a single value",
          self.compare_port
        )));
      }
      None => {
        return Err(fail(format!(
          "loop condition produced no '{}' output",
          self.compare_port
        )));
      }
    };

    let holds = self.compare(value).map_err(fail)?;
    Ok(if holds {
      LoopDecision::Continue
    } else {
      LoopDecision::Stop
    })
  }

  fn compare(&self, value: &serde_json::Value) -> Result<bool, String> {
    match self.comparison {
      Comparison::Equals => Ok(text(value) == text(&self.compare_value)),
      Comparison::NotEquals => Ok(text(value) != text(&self.compare_value)),
      Comparison::GreaterThan => Ok(number(value)? > number(&self.compare_value)?),
      Comparison::LessThan => Ok(number(value)? < number(&self.compare_value)?),
    }
  }
}

fn text(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn number(value: &serde_json::Value) -> Result<f64, String> {
  match value {
    serde_json::Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| format!("'{}' is not a comparable number", n)),
    serde_json::Value::String(s) => s
      .trim()
      .parse::<f64>()
      .map_err(|_| format!("'{}' is not a number", s)),
    other => Err(format!("'{}' is not a number", other)),
  }
}

struct LoopState {
  job: Job,
  iterations: u32,
}

struct ProcessLoops {
  cancel: CancellationToken,
  jobs: HashMap<Index, LoopState>,
}

/// After each Result, asks the condition activity whether to go round again.
/// Continuing re-sends the job with selected outputs fed back into its
/// inputs; stopping forwards the Result.
pub struct Loop {
  condition: Arc<LoopCondition>,
  /// Output port → input port.
  feedback: Vec<(String, String)>,
  delay: Duration,
  max_iterations: Option<u32>,
  processes: HashMap<OwningProcess, ProcessLoops>,
}

impl Loop {
  pub fn new(condition: ActivityRef, def: &LoopDef) -> Self {
    Self {
      condition: Arc::new(LoopCondition::new(condition, def)),
      feedback: def
        .feedback
        .iter()
        .map(|(output, input)| (output.clone(), input.clone()))
        .collect(),
      delay: Duration::from_millis(def.delay_ms),
      max_iterations: def.max_iterations,
      processes: HashMap::new(),
    }
  }

  fn take(&mut self, process: &OwningProcess, index: &Index) -> Option<LoopState> {
    let loops = self.processes.get_mut(process)?;
    let state = loops.jobs.remove(index);
    if loops.jobs.is_empty() {
      self.processes.remove(process);
    }
    state
  }

  fn next_job(&self, job: &Job, result: &JobResult) -> Job {
    let mut next = job.clone();
    for (output, input) in &self.feedback {
      if let Some(data) = result.outputs.get(output) {
        next.data.insert(input.clone(), data.clone());
      }
    }
    next
  }

  fn handle_outcome(&mut self, outcome: ConditionOutcome, ctx: &LayerContext) {
    let ConditionOutcome { result, decision } = outcome;
    let process = result.owning_process.clone();
    let index = result.index.clone();

    match decision {
      Err(error) => {
        self.take(&process, &index);
        ctx.send_up(UpEvent::Error(error));
      }
      Ok(LoopDecision::Stop) => {
        let iterations = self.take(&process, &index).map(|state| state.iterations);
        debug!(owning_process = %process, index = %index, ?iterations, "loop finished");
        ctx.send_up(UpEvent::Result(result));
      }
      Ok(LoopDecision::Continue) => {
        let max_iterations = self.max_iterations;
        let Some(loops) = self.processes.get(&process) else {
          return;
        };
        let cancel = loops.cancel.clone();
        let Some(state) = loops.jobs.get(&index) else {
          return;
        };
        let iterations = state.iterations + 1;

        if max_iterations.is_some_and(|max| iterations >= max) {
          warn!(
            owning_process = %process,
            index = %index,
            iterations,
            "loop reached its iteration limit"
          );
          self.take(&process, &index);
          ctx.send_up(UpEvent::Result(result));
          return;
        }

        let next = self.next_job(&state.job, &result);
        if let Some(state) = self
          .processes
          .get_mut(&process)
          .and_then(|loops| loops.jobs.get_mut(&index))
        {
          state.job = next.clone();
          state.iterations = iterations;
        }

        info!(owning_process = %process, index = %index, iterations, "loop_iteration");
        if self.delay.is_zero() {
          ctx.send_down(DownEvent::Job(next));
        } else {
          ctx.wake_after(self.delay, cancel, Wake::Resubmit(next));
        }
      }
    }
  }
}

impl DispatchLayer for Loop {
  fn name(&self) -> &'static str {
    "loop"
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    self
      .processes
      .entry(job.owning_process.clone())
      .or_insert_with(|| ProcessLoops {
        cancel: ctx.child_token(),
        jobs: HashMap::new(),
      })
      .jobs
      .insert(
        job.index.clone(),
        LoopState {
          job: job.clone(),
          iterations: 0,
        },
      );
    ctx.send_down(DownEvent::Job(job));
  }

  fn receive_result(&mut self, result: JobResult, ctx: &LayerContext) {
    let Some(loops) = self.processes.get(&result.owning_process) else {
      ctx.send_up(UpEvent::Result(result));
      return;
    };
    if !loops.jobs.contains_key(&result.index) {
      ctx.send_up(UpEvent::Result(result));
      return;
    }

    let condition = self.condition.clone();
    ctx.wake_when(loops.cancel.clone(), async move {
      let evaluated = {
        let result = result.clone();
        tokio::spawn(async move { condition.evaluate(&result).await })
      };
      let decision = evaluated.await.unwrap_or_else(|e| {
        Err(JobError::fatal(
          result.owning_process.clone(),
          result.index.clone(),
          format!("loop condition task failed: {}", e),
        ))
      });
      Wake::Condition(ConditionOutcome { result, decision })
    });
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    self.take(&error.owning_process, &error.index);
    ctx.send_up(UpEvent::Error(error));
  }

  fn receive_wake(&mut self, wake: Wake, ctx: &LayerContext) {
    match wake {
      Wake::Condition(outcome) => self.handle_outcome(outcome, ctx),
      Wake::Resubmit(job) => {
        let live = self
          .processes
          .get(&job.owning_process)
          .is_some_and(|loops| loops.jobs.contains_key(&job.index));
        if live {
          ctx.send_down(DownEvent::Job(job));
        }
      }
    }
  }

  fn finished_with(&mut self, owning_process: &OwningProcess, _ctx: &LayerContext) {
    if let Some(loops) = self.processes.remove(owning_process) {
      loops.cancel.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{LayerHarness, job, process};
  use serde_json::json;
  use weft_activity::{ActivityError, FnActivity};
  use weft_event::{DataMap, ErrorKind};

  /// Continues while the `count` output is below three.
  fn below_three() -> ActivityRef {
    FnActivity::new("below_three", |inputs: DataMap| async move {
      let count = inputs
        .get("count")
        .and_then(Data::as_value)
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
      let mut outputs = DataMap::new();
      outputs.insert("loop".to_string(), Data::value((count < 3).to_string()));
      Ok::<_, ActivityError>(outputs)
    })
    .into_ref()
  }

  fn counted(index: Index, count: i64) -> JobResult {
    let mut outputs = DataMap::new();
    outputs.insert("count".to_string(), Data::value(count));
    JobResult::new(process(), index, outputs)
  }

  fn def() -> LoopDef {
    let mut def = LoopDef::new("below_three");
    def.feedback.insert("count".to_string(), "seed".to_string());
    def
  }

  #[tokio::test]
  async fn test_continue_feeds_outputs_back() {
    let mut harness = LayerHarness::new(Loop::new(below_three(), &def()));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.jobs_below();

    harness.up(UpEvent::Result(counted(Index::from([0]), 1)));
    harness.next_wake().await;

    let sent = harness.jobs_sent_below();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data["seed"], Data::value(1));
    assert!(harness.events_above().is_empty());
  }

  #[tokio::test]
  async fn test_stop_forwards_result() {
    let mut harness = LayerHarness::new(Loop::new(below_three(), &def()));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.jobs_below();

    harness.up(UpEvent::Result(counted(Index::from([0]), 5)));
    harness.next_wake().await;

    assert!(harness.jobs_below().is_empty());
    assert_eq!(harness.events_above(), vec![UpEvent::Result(counted(Index::from([0]), 5))]);
  }

  #[tokio::test]
  async fn test_iteration_limit() {
    let mut def = def();
    def.max_iterations = Some(1);
    let mut harness = LayerHarness::new(Loop::new(below_three(), &def));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.jobs_below();

    harness.up(UpEvent::Result(counted(Index::from([0]), 0)));
    harness.next_wake().await;

    assert!(harness.jobs_below().is_empty());
    assert_eq!(harness.events_above().len(), 1);
  }

  #[tokio::test]
  async fn test_missing_compare_port_is_fatal() {
    let silent = FnActivity::new("silent", |_inputs: DataMap| async move {
      Ok::<_, ActivityError>(DataMap::new())
    })
    .into_ref();
    let mut harness = LayerHarness::new(Loop::new(silent, &def()));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.up(UpEvent::Result(counted(Index::from([0]), 0)));
    harness.next_wake().await;

    let above = harness.events_above();
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error, got {:?}", above[0]);
    };
    assert_eq!(error.kind, ErrorKind::Fatal);
    assert!(error.message.contains("'loop'"));
  }

  #[tokio::test]
  async fn test_panicking_condition_is_fatal() {
    let broken = FnActivity::new("broken", |_inputs: DataMap| async move {
      if true {
        panic!("condition bug");
      }
      Ok::<_, ActivityError>(DataMap::new())
    })
    .into_ref();
    let mut harness = LayerHarness::new(Loop::new(broken, &def()));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.up(UpEvent::Result(counted(Index::from([0]), 0)));
    harness.next_wake().await;

    let above = harness.events_above();
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error, got {:?}", above[0]);
    };
    assert_eq!(error.index, Index::from([0]));
    assert_eq!(error.kind, ErrorKind::Fatal);
    assert!(error.message.contains("condition bug"));
  }

  #[test]
  fn test_numeric_comparisons() {
    let mut def = LoopDef::new("check");
    def.comparison = Comparison::GreaterThan;
    def.compare_value = json!(10);
    let condition = LoopCondition::new(below_three(), &def);

    assert_eq!(condition.compare(&json!(11)), Ok(true));
    assert_eq!(condition.compare(&json!("9.5")), Ok(false));
    assert!(condition.compare(&json!("many")).is_err());
  }

  #[test]
  fn test_text_comparisons() {
    let condition = LoopCondition::new(below_three(), &LoopDef::new("check"));
    assert_eq!(condition.compare(&json!("true")), Ok(true));
    assert_eq!(condition.compare(&json!(true)), Ok(true));
    assert_eq!(condition.compare(&json!("false")), Ok(false));
  }

  #[tokio::test(start_paused = true)]
  async fn test_delay_between_iterations() {
    let mut def = def();
    def.delay_ms = 500;
    let mut harness = LayerHarness::new(Loop::new(below_three(), &def));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.jobs_below();

    let start = tokio::time::Instant::now();
    harness.up(UpEvent::Result(counted(Index::from([0]), 0)));
    harness.next_wake().await;
    assert!(harness.jobs_below().is_empty());

    harness.next_wake().await;
    assert_eq!(harness.jobs_below().len(), 1);
    assert!(start.elapsed() >= Duration::from_millis(500));
  }
}
