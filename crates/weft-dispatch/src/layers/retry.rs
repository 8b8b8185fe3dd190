//! Re-submission of failed jobs with backoff.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use weft_config::{RetryBackoff, RetryDef};
use weft_event::{DownEvent, ErrorKind, Index, Job, JobError, JobResult, OwningProcess, UpEvent};

use crate::error::ConfigurationError;
use crate::layer::{DispatchLayer, LayerContext, Wake};

/// Decides whether an error is worth another attempt.
pub type RetryClassifier = Arc<dyn Fn(&JobError) -> bool + Send + Sync>;

/// Backoff schedule for the retry layer.
#[derive(Clone)]
pub struct RetryPolicy {
  /// Maximum number of invocations, including the first.
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub backoff: RetryBackoff,
  pub backoff_factor: f64,
  pub max_delay: Duration,
  /// Jitter factor (0.0-1.0). A value of 0.1 means ±10% randomness.
  pub jitter: f64,
  classifier: RetryClassifier,
}

impl RetryPolicy {
  pub fn from_def(def: &RetryDef) -> Result<Self, ConfigurationError> {
    let invalid = |message: String| ConfigurationError::InvalidLayer {
      layer: "retry",
      message,
    };

    if def.max_attempts == 0 {
      return Err(invalid("max_attempts must be at least 1".to_string()));
    }
    if def.backoff_factor.is_nan() || def.backoff_factor < 1.0 {
      return Err(invalid(format!(
        "backoff_factor must be at least 1.0, got {}",
        def.backoff_factor
      )));
    }
    if !(0.0..=1.0).contains(&def.jitter) {
      return Err(invalid(format!(
        "jitter must be between 0.0 and 1.0, got {}",
        def.jitter
      )));
    }

    Ok(Self {
      max_attempts: def.max_attempts,
      initial_delay: Duration::from_millis(def.initial_delay_ms),
      backoff: def.backoff,
      backoff_factor: def.backoff_factor,
      max_delay: Duration::from_millis(def.max_delay_ms),
      jitter: def.jitter,
      classifier: Arc::new(|error: &JobError| error.kind == ErrorKind::Transient),
    })
  }

  /// Replace the default classifier, which retries `Transient` errors only.
  pub fn with_classifier<F>(mut self, classifier: F) -> Self
  where
    F: Fn(&JobError) -> bool + Send + Sync + 'static,
  {
    self.classifier = Arc::new(classifier);
    self
  }

  pub fn is_retryable(&self, error: &JobError) -> bool {
    (self.classifier)(error)
  }

  /// Delay before the next attempt, after `failed_attempts` attempts failed.
  ///
  /// The first retry waits `initial_delay`; constant backoff keeps it, linear
  /// backoff adds it per attempt and exponential backoff multiplies by
  /// `backoff_factor`. The result is capped at `max_delay` before jitter.
  pub fn delay_after(&self, failed_attempts: u32) -> Duration {
    let n = failed_attempts.max(1);
    let initial = self.initial_delay.as_secs_f64();
    let base = match self.backoff {
      RetryBackoff::Constant => initial,
      RetryBackoff::Linear => initial * n as f64,
      RetryBackoff::Exponential => initial * self.backoff_factor.powi(n as i32 - 1),
    };
    let capped = base.min(self.max_delay.as_secs_f64());

    let jittered = if self.jitter > 0.0 && capped > 0.0 {
      let mut rng = rand::thread_rng();
      let jitter_range = capped * self.jitter;
      let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
      (capped + jitter_offset).max(0.0)
    } else {
      capped
    };

    Duration::from_secs_f64(jittered)
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("initial_delay", &self.initial_delay)
      .field("backoff", &self.backoff)
      .field("backoff_factor", &self.backoff_factor)
      .field("max_delay", &self.max_delay)
      .field("jitter", &self.jitter)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Attempted,
  AwaitingRetry,
}

struct RetryState {
  job: Job,
  attempts: u32,
  phase: Phase,
}

struct ProcessRetries {
  cancel: CancellationToken,
  jobs: HashMap<Index, RetryState>,
}

/// Re-submits jobs whose errors the policy classifies as retryable, after a
/// backoff delay, up to `max_attempts` invocations per job.
pub struct Retry {
  policy: RetryPolicy,
  processes: HashMap<OwningProcess, ProcessRetries>,
}

impl Retry {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      policy,
      processes: HashMap::new(),
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  fn take(&mut self, process: &OwningProcess, index: &Index) -> Option<RetryState> {
    let retries = self.processes.get_mut(process)?;
    let state = retries.jobs.remove(index);
    if retries.jobs.is_empty() {
      self.processes.remove(process);
    }
    state
  }
}

impl DispatchLayer for Retry {
  fn name(&self) -> &'static str {
    "retry"
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    let retries = self
      .processes
      .entry(job.owning_process.clone())
      .or_insert_with(|| ProcessRetries {
        cancel: ctx.child_token(),
        jobs: HashMap::new(),
      });
    retries.jobs.insert(
      job.index.clone(),
      RetryState {
        job: job.clone(),
        attempts: 1,
        phase: Phase::Attempted,
      },
    );
    ctx.send_down(DownEvent::Job(job));
  }

  fn receive_result(&mut self, result: JobResult, ctx: &LayerContext) {
    self.take(&result.owning_process, &result.index);
    ctx.send_up(UpEvent::Result(result));
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    let retryable = self.policy.is_retryable(&error);
    let max_attempts = self.policy.max_attempts;

    let Some(retries) = self.processes.get_mut(&error.owning_process) else {
      ctx.send_up(UpEvent::Error(error));
      return;
    };
    let cancel = retries.cancel.clone();
    let Some(state) = retries.jobs.get_mut(&error.index) else {
      ctx.send_up(UpEvent::Error(error));
      return;
    };

    if retryable && state.attempts < max_attempts {
      let delay = self.policy.delay_after(state.attempts);
      state.attempts += 1;
      state.phase = Phase::AwaitingRetry;
      warn!(
        owning_process = %error.owning_process,
        index = %error.index,
        attempt = state.attempts,
        max_attempts,
        delay_ms = delay.as_millis() as u64,
        error = %error.message,
        "job_retry_scheduled"
      );
      ctx.wake_after(delay, cancel, Wake::Resubmit(state.job.clone()));
      return;
    }

    let attempts = state.attempts;
    self.take(&error.owning_process, &error.index);

    let mut error = error.with_attempts(attempts);
    if retryable && error.kind == ErrorKind::Transient {
      error = error.with_kind(ErrorKind::Fatal);
    }
    debug!(
      owning_process = %error.owning_process,
      index = %error.index,
      attempts,
      "giving up on job"
    );
    ctx.send_up(UpEvent::Error(error));
  }

  fn receive_wake(&mut self, wake: Wake, ctx: &LayerContext) {
    let job = match wake {
      Wake::Resubmit(job) => job,
      other @ Wake::Condition(_) => {
        debug!("retry layer ignoring foreign wake: {:?}", other);
        return;
      }
    };

    let state = self
      .processes
      .get_mut(&job.owning_process)
      .and_then(|retries| retries.jobs.get_mut(&job.index));
    match state {
      Some(state) if state.phase == Phase::AwaitingRetry => {
        state.phase = Phase::Attempted;
        ctx.send_down(DownEvent::Job(job));
      }
      _ => debug!(
        owning_process = %job.owning_process,
        index = %job.index,
        "dropping stale retry"
      ),
    }
  }

  fn finished_with(&mut self, owning_process: &OwningProcess, _ctx: &LayerContext) {
    if let Some(retries) = self.processes.remove(owning_process) {
      retries.cancel.cancel();
    }
  }
}
