//! The terminal stage of every stack: calls the activity for each job.

use std::time::Instant;

use tracing::{error, info, instrument};
use weft_activity::ActivityRef;
use weft_event::{Index, Job, JobError, JobQueue, JobResult, UpEvent};

use crate::layer::{DispatchLayer, LayerContext};

/// Invokes `activities[job.activity]` for every job that reaches the bottom of
/// the stack, each call on its own task.
pub struct Invoker {
  activities: Vec<ActivityRef>,
}

impl Invoker {
  pub fn new(activities: Vec<ActivityRef>) -> Self {
    Self { activities }
  }

  pub fn activity_count(&self) -> usize {
    self.activities.len()
  }
}

impl DispatchLayer for Invoker {
  fn name(&self) -> &'static str {
    "invoke"
  }

  fn receive_job_queue(&mut self, queue: JobQueue, ctx: &LayerContext) {
    error!(
      owning_process = %queue.owning_process,
      jobs = queue.len(),
      "job queue reached the activity invoker"
    );
    ctx.send_up(UpEvent::Error(JobError::protocol(
      queue.owning_process,
      Index::scalar(),
      "job queue reached the activity invoker without being split into jobs",
    )));
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    let Some(activity) = self.activities.get(job.activity).cloned() else {
      error!(
        owning_process = %job.owning_process,
        index = %job.index,
        activity = job.activity,
        "job targets an activity slot that does not exist"
      );
      let message = format!(
        "activity slot {} out of range ({} activities)",
        job.activity,
        self.activities.len()
      );
      ctx.send_up(UpEvent::Error(JobError::configuration(
        job.owning_process,
        job.index,
        message,
      )));
      return;
    };

    let ctx = ctx.clone();
    tokio::spawn(async move {
      let owning_process = job.owning_process.clone();
      let index = job.index.clone();
      // A panicking activity still has to answer for its index
      let event = match tokio::spawn(invoke_job(activity, job)).await {
        Ok(event) => event,
        Err(e) => {
          error!(
            owning_process = %owning_process,
            index = %index,
            error = %e,
            "job_failed"
          );
          UpEvent::Error(JobError::fatal(
            owning_process,
            index,
            format!("activity task failed: {}", e),
          ))
        }
      };
      ctx.send_up(event);
    });
  }
}

#[instrument(
  name = "invoke_job",
  skip(activity, job),
  fields(
    owning_process = %job.owning_process,
    index = %job.index,
    activity = %activity.name(),
  )
)]
async fn invoke_job(activity: ActivityRef, job: Job) -> UpEvent {
  let Job {
    owning_process,
    index,
    data,
    ..
  } = job;

  info!(
    owning_process = %owning_process,
    index = %index,
    activity = %activity.name(),
    "job_started"
  );
  let started = Instant::now();

  match activity.invoke(data).await {
    Ok(outputs) => {
      info!(
        owning_process = %owning_process,
        index = %index,
        duration_ms = started.elapsed().as_millis() as u64,
        "job_completed"
      );
      UpEvent::Result(JobResult::new(owning_process, index, outputs))
    }
    Err(e) => {
      error!(
        owning_process = %owning_process,
        index = %index,
        error = %e,
        "job_failed"
      );
      UpEvent::Error(JobError::new(owning_process, index, e.kind(), e.message()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{LayerHarness, job, process};
  use weft_activity::{ActivityError, FnActivity};
  use weft_event::{Data, DataMap, DownEvent, ErrorKind};

  fn echo() -> ActivityRef {
    FnActivity::new("echo", |inputs: DataMap| async move {
      Ok::<_, ActivityError>(inputs)
    })
    .into_ref()
  }

  fn panicking() -> ActivityRef {
    FnActivity::new("panicking", |_inputs: DataMap| async move {
      if true {
        panic!("activity bug");
      }
      Ok::<_, ActivityError>(DataMap::new())
    })
    .into_ref()
  }

  #[tokio::test]
  async fn test_result_is_sent_up() {
    let mut harness = LayerHarness::new(Invoker::new(vec![echo()]));
    let mut input = job(Index::from([0]));
    input.data.insert("in".to_string(), Data::value("x"));
    harness.down(DownEvent::Job(input));

    let UpEvent::Result(result) = harness.next_above().await else {
      panic!("expected result");
    };
    assert_eq!(result.outputs["in"], Data::value("x"));
  }

  #[tokio::test]
  async fn test_panicking_activity_becomes_fatal_error() {
    let mut harness = LayerHarness::new(Invoker::new(vec![panicking()]));
    harness.down(DownEvent::Job(job(Index::from([3]))));

    let UpEvent::Error(error) = harness.next_above().await else {
      panic!("expected error");
    };
    assert_eq!(error.owning_process, process());
    assert_eq!(error.index, Index::from([3]));
    assert_eq!(error.kind, ErrorKind::Fatal);
    assert!(error.message.contains("activity bug"));
  }

  #[tokio::test]
  async fn test_missing_activity_slot() {
    let mut harness = LayerHarness::new(Invoker::new(vec![echo()]));
    harness.down(DownEvent::Job(job(Index::from([0])).with_activity(4)));

    let UpEvent::Error(error) = harness.next_above().await else {
      panic!("expected error");
    };
    assert_eq!(error.kind, ErrorKind::Configuration);
  }
}
