//! Turning failures into error documents.

use tracing::debug;
use weft_config::PortDef;
use weft_event::{Data, DataMap, DownEvent, ErrorScope, Job, JobError, JobResult, UpEvent};

use crate::layer::{DispatchLayer, LayerContext};

/// Replaces index-scoped activity errors with Results that carry an error
/// document on every output port, and answers jobs whose inputs already hold
/// error documents without invoking anything.
///
/// Downstream consumers then see a value (the error document) at the failed
/// index instead of a hole.
pub struct ErrorBounce {
  output_ports: Vec<PortDef>,
}

impl ErrorBounce {
  pub fn new(output_ports: Vec<PortDef>) -> Self {
    Self { output_ports }
  }

  fn error_outputs(&self, message: &str) -> DataMap {
    self
      .output_ports
      .iter()
      .map(|port| (port.name.clone(), Data::error(message, port.depth)))
      .collect()
  }
}

impl DispatchLayer for ErrorBounce {
  fn name(&self) -> &'static str {
    "error_bounce"
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    let Some((port, at)) = job.first_error() else {
      ctx.send_down(DownEvent::Job(job));
      return;
    };

    let upstream = match job.data.get(port).and_then(|data| data.get(&at)) {
      Some(Data::Error(doc)) => doc.message.clone(),
      _ => "upstream error".to_string(),
    };
    let message = format!("input '{}' holds an error at {}: {}", port, at, upstream);
    if self.output_ports.is_empty() {
      // No port to carry an error document
      ctx.send_up(UpEvent::Error(JobError::fatal(
        job.owning_process,
        job.index,
        message,
      )));
      return;
    }
    debug!(
      owning_process = %job.owning_process,
      index = %job.index,
      port,
      "bouncing job with erroneous input"
    );

    let outputs = self.error_outputs(&message);
    ctx.send_up(UpEvent::Result(JobResult::new(
      job.owning_process,
      job.index,
      outputs,
    )));
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    if error.scope != ErrorScope::Index
      || !error.kind.is_activity_failure()
      || self.output_ports.is_empty()
    {
      ctx.send_up(UpEvent::Error(error));
      return;
    }

    debug!(
      owning_process = %error.owning_process,
      index = %error.index,
      kind = %error.kind,
      "bouncing activity error as error documents"
    );
    let outputs = self.error_outputs(&error.message);
    ctx.send_up(UpEvent::Result(JobResult::new(
      error.owning_process,
      error.index,
      outputs,
    )));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{LayerHarness, job, process};
  use weft_event::Index;

  fn bounce() -> ErrorBounce {
    ErrorBounce::new(vec![PortDef::new("out", 0), PortDef::new("rows", 1)])
  }

  #[tokio::test]
  async fn test_activity_error_becomes_error_result() {
    let mut harness = LayerHarness::new(bounce());
    harness.up(UpEvent::Error(JobError::fatal(process(), Index::from([2]), "boom")));

    let above = harness.events_above();
    let UpEvent::Result(result) = &above[0] else {
      panic!("expected result, got {:?}", above[0]);
    };
    assert_eq!(result.index, Index::from([2]));
    assert_eq!(result.outputs["out"], Data::error("boom", 0));
    assert_eq!(result.outputs["rows"], Data::error("boom", 1));
    assert_eq!(result.error_index, Some(Index::scalar()));
  }

  #[tokio::test]
  async fn test_process_errors_pass_through() {
    let mut harness = LayerHarness::new(bounce());
    harness.up(UpEvent::Error(JobError::protocol(process(), Index::scalar(), "late")));

    assert!(matches!(harness.events_above()[0], UpEvent::Error(_)));
  }

  #[tokio::test]
  async fn test_erroneous_input_is_not_invoked() {
    let mut harness = LayerHarness::new(bounce());
    let mut bad = job(Index::from([0]));
    bad
      .data
      .insert("in".to_string(), Data::list([Data::value(1), Data::error("upstream failed", 0)]));

    harness.down(DownEvent::Job(bad));
    assert!(harness.jobs_below().is_empty());

    let above = harness.events_above();
    let UpEvent::Result(result) = &above[0] else {
      panic!("expected result");
    };
    let Data::Error(doc) = &result.outputs["out"] else {
      panic!("expected error document");
    };
    assert!(doc.message.contains("upstream failed"));
  }

  #[tokio::test]
  async fn test_errors_pass_through_without_output_ports() {
    let mut harness = LayerHarness::new(ErrorBounce::new(Vec::new()));
    harness.up(UpEvent::Error(JobError::fatal(process(), Index::from([1]), "disk full")));

    let above = harness.events_above();
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error, got {:?}", above[0]);
    };
    assert_eq!(error.index, Index::from([1]));
    assert_eq!(error.message, "disk full");
  }

  #[tokio::test]
  async fn test_erroneous_input_without_output_ports_reports_error() {
    let mut harness = LayerHarness::new(ErrorBounce::new(Vec::new()));
    let mut bad = job(Index::from([0]));
    bad
      .data
      .insert("in".to_string(), Data::error("upstream failed", 0));

    harness.down(DownEvent::Job(bad));
    assert!(harness.jobs_below().is_empty());

    let above = harness.events_above();
    let UpEvent::Error(error) = &above[0] else {
      panic!("expected error, got {:?}", above[0]);
    };
    assert_eq!(error.index, Index::from([0]));
    assert!(error.message.contains("upstream failed"));
  }

  #[tokio::test]
  async fn test_clean_job_passes_down() {
    let mut harness = LayerHarness::new(bounce());
    harness.down(DownEvent::Job(job(Index::from([0]))));
    assert_eq!(harness.jobs_below(), vec![Index::from([0])]);
  }
}
