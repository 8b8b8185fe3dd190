//! Re-issue of failed jobs against alternate activities.

use std::collections::HashMap;

use tracing::warn;
use weft_event::{DownEvent, Index, Job, JobError, JobResult, OwningProcess, UpEvent};

use crate::layer::{DispatchLayer, LayerContext};

struct Attempt {
  job: Job,
  cursor: usize,
}

/// Walks a processor's ordered activity list: when candidate `k` fails, the
/// same job is sent down again targeting candidate `k + 1`.
pub struct Failover {
  candidates: usize,
  processes: HashMap<OwningProcess, HashMap<Index, Attempt>>,
}

impl Failover {
  pub fn new(candidates: usize) -> Self {
    Self {
      candidates,
      processes: HashMap::new(),
    }
  }

  pub fn candidates(&self) -> usize {
    self.candidates
  }

  fn take(&mut self, process: &OwningProcess, index: &Index) -> Option<Attempt> {
    let attempts = self.processes.get_mut(process)?;
    let attempt = attempts.remove(index);
    if attempts.is_empty() {
      self.processes.remove(process);
    }
    attempt
  }
}

impl DispatchLayer for Failover {
  fn name(&self) -> &'static str {
    "failover"
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    let job = job.with_activity(0);
    self
      .processes
      .entry(job.owning_process.clone())
      .or_default()
      .insert(
        job.index.clone(),
        Attempt {
          job: job.clone(),
          cursor: 0,
        },
      );
    ctx.send_down(DownEvent::Job(job));
  }

  fn receive_result(&mut self, result: JobResult, ctx: &LayerContext) {
    self.take(&result.owning_process, &result.index);
    ctx.send_up(UpEvent::Result(result));
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    let candidates = self.candidates;
    let attempt = self
      .processes
      .get_mut(&error.owning_process)
      .and_then(|attempts| attempts.get_mut(&error.index));

    let Some(attempt) = attempt else {
      ctx.send_up(UpEvent::Error(error));
      return;
    };

    if error.kind.is_activity_failure() && attempt.cursor + 1 < candidates {
      attempt.cursor += 1;
      warn!(
        owning_process = %error.owning_process,
        index = %error.index,
        failed = attempt.cursor - 1,
        next = attempt.cursor,
        error = %error.message,
        "failing over to next activity"
      );
      let job = attempt.job.clone().with_activity(attempt.cursor);
      ctx.send_down(DownEvent::Job(job));
      return;
    }

    let tried = attempt.cursor + 1;
    self.take(&error.owning_process, &error.index);
    ctx.send_up(UpEvent::Error(error.with_candidates_tried(tried)));
  }

  fn finished_with(&mut self, owning_process: &OwningProcess, _ctx: &LayerContext) {
    self.processes.remove(owning_process);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{LayerHarness, job, process};
  use weft_event::{DataMap, ErrorKind};

  #[tokio::test]
  async fn test_fails_over_in_order() {
    let mut harness = LayerHarness::new(Failover::new(3));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    assert_eq!(harness.jobs_sent_below()[0].activity, 0);

    harness.up(UpEvent::Error(JobError::fatal(process(), Index::from([0]), "down")));
    assert_eq!(harness.jobs_sent_below()[0].activity, 1);

    harness.up(UpEvent::Error(JobError::transient(process(), Index::from([0]), "down")));
    assert_eq!(harness.jobs_sent_below()[0].activity, 2);

    harness.up(UpEvent::Result(JobResult::new(process(), Index::from([0]), DataMap::new())));
    let above = harness.events_above();
    assert_eq!(above.len(), 1);
    assert!(matches!(above[0], UpEvent::Result(_)));
  }

  #[tokio::test]
  async fn test_exhausted_candidates_forward_error() {
    let mut harness = LayerHarness::new(Failover::new(2));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.up(UpEvent::Error(JobError::fatal(process(), Index::from([0]), "a")));
    harness.up(UpEvent::Error(JobError::fatal(process(), Index::from([0]), "b")));

    let above = harness.events_above();
    assert_eq!(above.len(), 1);
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error");
    };
    assert_eq!(error.candidates_tried, Some(2));
    assert_eq!(error.message, "b");
  }

  #[tokio::test]
  async fn test_protocol_errors_are_not_failed_over() {
    let mut harness = LayerHarness::new(Failover::new(3));
    harness.down(DownEvent::Job(job(Index::from([0]))));
    harness.jobs_below();
    harness.up(UpEvent::Error(JobError::protocol(process(), Index::from([0]), "broken")));

    assert!(harness.jobs_below().is_empty());
    let above = harness.events_above();
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error");
    };
    assert_eq!(error.kind, ErrorKind::Protocol);
  }

  #[tokio::test]
  async fn test_cursor_resets_for_new_job() {
    let mut harness = LayerHarness::new(Failover::new(2));
    harness.down(DownEvent::Job(job(Index::from([0])).with_activity(1)));
    assert_eq!(harness.jobs_sent_below()[0].activity, 0);
  }
}
