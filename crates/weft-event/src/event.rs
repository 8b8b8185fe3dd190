//! Dispatch events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DataMap, Index, OwningProcess};

/// A request to invoke an activity with one index's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub owning_process: OwningProcess,
  pub index: Index,
  pub data: DataMap,
  /// Slot of the activity to call in the processor's ordered activity list.
  /// Zero is the primary activity.
  #[serde(default)]
  pub activity: usize,
}

impl Job {
  pub fn new(owning_process: OwningProcess, index: Index, data: DataMap) -> Self {
    Self {
      owning_process,
      index,
      data,
      activity: 0,
    }
  }

  /// The same job targeted at another activity slot.
  pub fn with_activity(mut self, activity: usize) -> Self {
    self.activity = activity;
    self
  }

  /// First input port holding an error document, with the document's index.
  pub fn first_error(&self) -> Option<(&str, Index)> {
    self
      .data
      .iter()
      .find_map(|(port, data)| data.first_error().map(|index| (port.as_str(), index)))
  }
}

/// Outputs produced for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
  pub owning_process: OwningProcess,
  pub index: Index,
  pub outputs: DataMap,
  /// Location of the first element-level failure inside `outputs`, relative
  /// to the output value.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_index: Option<Index>,
}

impl JobResult {
  pub fn new(owning_process: OwningProcess, index: Index, outputs: DataMap) -> Self {
    let error_index = outputs.values().find_map(|data| data.first_error());
    Self {
      owning_process,
      index,
      outputs,
      error_index,
    }
  }
}

/// No further events will occur under `index` for `owning_process`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
  pub owning_process: OwningProcess,
  pub index: Index,
}

impl Completion {
  pub fn new(owning_process: OwningProcess, index: Index) -> Self {
    Self {
      owning_process,
      index,
    }
  }
}

/// Failure classes carried by [`JobError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Activity failure that may succeed if tried again.
  Transient,
  /// Activity failure that will not be retried (or retries are exhausted).
  Fatal,
  /// Internal invariant violation in the pipeline.
  Protocol,
  /// Invalid configuration discovered while dispatching.
  Configuration,
}

impl ErrorKind {
  /// True for failures reported by an activity.
  pub fn is_activity_failure(self) -> bool {
    matches!(self, ErrorKind::Transient | ErrorKind::Fatal)
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Transient => "transient",
      ErrorKind::Fatal => "fatal",
      ErrorKind::Protocol => "protocol",
      ErrorKind::Configuration => "configuration",
    };
    f.write_str(name)
  }
}

/// Whether an error ends one index or the whole invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
  Index,
  Process,
}

/// A failure for one index (or for the whole owning process).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
  pub owning_process: OwningProcess,
  pub index: Index,
  pub kind: ErrorKind,
  pub scope: ErrorScope,
  pub message: String,
  /// Number of invocation attempts made, set by the retry layer.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attempts: Option<u32>,
  /// Number of candidate activities tried, set by the failover layer.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub candidates_tried: Option<usize>,
}

impl JobError {
  pub fn new(
    owning_process: OwningProcess,
    index: Index,
    kind: ErrorKind,
    message: impl Into<String>,
  ) -> Self {
    let scope = match kind {
      ErrorKind::Transient | ErrorKind::Fatal => ErrorScope::Index,
      ErrorKind::Protocol | ErrorKind::Configuration => ErrorScope::Process,
    };
    Self {
      owning_process,
      index,
      kind,
      scope,
      message: message.into(),
      attempts: None,
      candidates_tried: None,
    }
  }

  pub fn transient(owning_process: OwningProcess, index: Index, message: impl Into<String>) -> Self {
    Self::new(owning_process, index, ErrorKind::Transient, message)
  }

  pub fn fatal(owning_process: OwningProcess, index: Index, message: impl Into<String>) -> Self {
    Self::new(owning_process, index, ErrorKind::Fatal, message)
  }

  pub fn protocol(owning_process: OwningProcess, index: Index, message: impl Into<String>) -> Self {
    Self::new(owning_process, index, ErrorKind::Protocol, message)
  }

  pub fn configuration(
    owning_process: OwningProcess,
    index: Index,
    message: impl Into<String>,
  ) -> Self {
    Self::new(owning_process, index, ErrorKind::Configuration, message)
  }

  pub fn with_kind(mut self, kind: ErrorKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_scope(mut self, scope: ErrorScope) -> Self {
    self.scope = scope;
    self
  }

  pub fn with_attempts(mut self, attempts: u32) -> Self {
    self.attempts = Some(attempts);
    self
  }

  pub fn with_candidates_tried(mut self, candidates: usize) -> Self {
    self.candidates_tried = Some(candidates);
    self
  }

  pub fn is_process_fatal(&self) -> bool {
    self.scope == ErrorScope::Process
  }
}

impl fmt::Display for JobError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} error in '{}' at {}: {}",
      self.kind, self.owning_process, self.index, self.message
    )
  }
}

/// The full ordered job sequence for one owning process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQueue {
  pub owning_process: OwningProcess,
  /// Iteration depth shared by every job index in the queue.
  pub depth: usize,
  pub jobs: Vec<Job>,
}

impl JobQueue {
  pub fn new(owning_process: OwningProcess, depth: usize, jobs: Vec<Job>) -> Self {
    Self {
      owning_process,
      depth,
      jobs,
    }
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }
}

/// Events travelling from the top of the stack towards the activity.
#[derive(Debug, Clone, PartialEq)]
pub enum DownEvent {
  JobQueue(JobQueue),
  Job(Job),
  /// Cache purge: layers release all state held for the process.
  FinishedWith(OwningProcess),
}

impl DownEvent {
  pub fn owning_process(&self) -> &OwningProcess {
    match self {
      DownEvent::JobQueue(queue) => &queue.owning_process,
      DownEvent::Job(job) => &job.owning_process,
      DownEvent::FinishedWith(process) => process,
    }
  }
}

/// Events travelling from the activity back to the process report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpEvent {
  Result(JobResult),
  Completion(Completion),
  Error(JobError),
}

impl UpEvent {
  pub fn owning_process(&self) -> &OwningProcess {
    match self {
      UpEvent::Result(result) => &result.owning_process,
      UpEvent::Completion(completion) => &completion.owning_process,
      UpEvent::Error(error) => &error.owning_process,
    }
  }

  pub fn index(&self) -> &Index {
    match self {
      UpEvent::Result(result) => &result.index,
      UpEvent::Completion(completion) => &completion.index,
      UpEvent::Error(error) => &error.index,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Data;

  fn process() -> OwningProcess {
    OwningProcess::parse("run:proc")
  }

  #[test]
  fn test_result_records_error_index() {
    let mut outputs = DataMap::new();
    outputs.insert(
      "out".to_string(),
      Data::list([Data::value(1), Data::error("failed", 0)]),
    );

    let result = JobResult::new(process(), Index::from([0]), outputs);
    assert_eq!(result.error_index, Some(Index::from([1])));
  }

  #[test]
  fn test_error_scope_follows_kind() {
    let transient = JobError::transient(process(), Index::from([0]), "timeout");
    let protocol = JobError::protocol(process(), Index::scalar(), "late result");

    assert_eq!(transient.scope, ErrorScope::Index);
    assert!(protocol.is_process_fatal());
    assert!(transient.kind.is_activity_failure());
    assert!(!protocol.kind.is_activity_failure());
  }

  #[test]
  fn test_error_display() {
    let error = JobError::fatal(process(), Index::from([1, 2]), "boom").with_attempts(3);
    assert_eq!(error.to_string(), "fatal error in 'run:proc' at [1,2]: boom");
    assert_eq!(error.attempts, Some(3));
  }

  #[test]
  fn test_job_first_error() {
    let mut data = DataMap::new();
    data.insert("a".to_string(), Data::value("x"));
    data.insert("b".to_string(), Data::list([Data::error("upstream", 0)]));

    let job = Job::new(process(), Index::scalar(), data);
    assert_eq!(job.first_error(), Some(("b", Index::from([0]))));
  }

  #[test]
  fn test_up_event_serde_tag() {
    let event = UpEvent::Completion(Completion::new(process(), Index::from([2])));
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["event"], "completion");
    assert_eq!(json["owning_process"], "run:proc");
    assert_eq!(json["index"], serde_json::json!([2]));
  }
}
