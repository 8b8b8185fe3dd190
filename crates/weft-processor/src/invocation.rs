//! A single invocation of a processor and the reassembly of its outputs.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use weft_config::PortDef;
use weft_event::{Data, DataMap, Index, JobError, JobResult, OwningProcess, UpEvent};

use crate::error::ProcessorError;
use crate::processor::Processor;

/// Outputs of a finished invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutput {
  pub owning_process: OwningProcess,
  /// One collection per output port, nested to the iteration depth.
  pub outputs: DataMap,
  /// Index-scoped failures, in arrival order. Each also appears as an error
  /// document inside `outputs`.
  pub errors: Vec<JobError>,
}

/// A handle to a running invocation.
///
/// Call `.wait()` to collect the outputs, or read raw events with
/// `.next_event()`. Dropping the handle releases the invocation's state in
/// the dispatch stack.
pub struct ProcessorInvocation<'a> {
  processor: &'a Processor,
  owning_process: OwningProcess,
  depth: usize,
  events: mpsc::UnboundedReceiver<UpEvent>,
  cancel: CancellationToken,
  released: bool,
}

impl<'a> ProcessorInvocation<'a> {
  pub(crate) fn new(
    processor: &'a Processor,
    owning_process: OwningProcess,
    depth: usize,
    events: mpsc::UnboundedReceiver<UpEvent>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      processor,
      owning_process,
      depth,
      events,
      cancel,
      released: false,
    }
  }

  pub fn owning_process(&self) -> &OwningProcess {
    &self.owning_process
  }

  /// Iteration depth of the invocation's job indices.
  pub fn depth(&self) -> usize {
    self.depth
  }

  /// A token that cancels this invocation when triggered.
  pub fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Stop waiting for outstanding jobs and purge the invocation's state.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// The next raw event for this invocation, or `None` once cancelled or the
  /// stack has shut down.
  pub async fn next_event(&mut self) -> Option<UpEvent> {
    tokio::select! {
      _ = self.cancel.cancelled() => None,
      _ = self.processor.stack.stopped() => None,
      event = self.events.recv() => event,
    }
  }

  /// Wait for the root completion and reassemble the outputs.
  #[instrument(
    name = "processor_invocation",
    skip(self),
    fields(
      processor = %self.processor.def.name,
      owning_process = %self.owning_process,
    )
  )]
  pub async fn wait(mut self) -> Result<ProcessorOutput, ProcessorError> {
    let result = self.collect().await;
    self.release();

    match &result {
      Ok(output) => info!(
        owning_process = %self.owning_process,
        errors = output.errors.len(),
        "invocation_completed"
      ),
      Err(ProcessorError::Cancelled) => warn!(
        owning_process = %self.owning_process,
        "invocation cancelled"
      ),
      Err(e) => error!(
        owning_process = %self.owning_process,
        error = %e,
        "invocation_failed"
      ),
    }

    result
  }

  async fn collect(&mut self) -> Result<ProcessorOutput, ProcessorError> {
    let mut assembly = Assembly::new(&self.processor.def.output_ports);
    let mut completed: HashSet<Index> = HashSet::new();

    loop {
      let event = tokio::select! {
        _ = self.cancel.cancelled() => return Err(ProcessorError::Cancelled),
        _ = self.processor.stack.stopped() => {
          return Err(weft_dispatch::DispatchError::StackClosed.into());
        }
        event = self.events.recv() => event,
      };
      let Some(event) = event else {
        return Err(weft_dispatch::DispatchError::StackClosed.into());
      };

      if let Some(prefix) = completed
        .iter()
        .find(|prefix| event.index().starts_with(prefix))
      {
        return Err(ProcessorError::Protocol {
          message: format!(
            "event at {} arrived after completion of {}",
            event.index(),
            prefix
          ),
        });
      }

      match event {
        UpEvent::Result(result) => assembly.result(result),
        UpEvent::Error(error) if error.is_process_fatal() => {
          return Err(ProcessorError::Failed { error });
        }
        UpEvent::Error(error) => assembly.error(error),
        UpEvent::Completion(completion) => {
          if completion.index.is_scalar() {
            break;
          }
          completed.insert(completion.index);
        }
      }
    }

    Ok(assembly.finish(self.owning_process.clone(), self.depth))
  }

  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.processor.router.close(&self.owning_process);
    if let Err(e) = self.processor.stack.finished_with(&self.owning_process) {
      warn!(
        owning_process = %self.owning_process,
        error = %e,
        "could not release invocation state"
      );
    }
  }
}

impl Drop for ProcessorInvocation<'_> {
  fn drop(&mut self) {
    self.release();
  }
}

/// Per-port values keyed by job index, folded into nested lists at the end.
struct Assembly {
  ports: Vec<PortDef>,
  values: BTreeMap<String, BTreeMap<Index, Data>>,
  errors: Vec<JobError>,
}

impl Assembly {
  fn new(ports: &[PortDef]) -> Self {
    Self {
      ports: ports.to_vec(),
      values: ports
        .iter()
        .map(|port| (port.name.clone(), BTreeMap::new()))
        .collect(),
      errors: Vec::new(),
    }
  }

  fn result(&mut self, result: JobResult) {
    for (port, data) in result.outputs {
      // Outputs that are not declared ports are not collected
      if let Some(values) = self.values.get_mut(&port) {
        values.insert(result.index.clone(), data);
      }
    }
  }

  fn error(&mut self, error: JobError) {
    for port in &self.ports {
      if let Some(values) = self.values.get_mut(&port.name) {
        values.insert(error.index.clone(), Data::error(&error.message, port.depth));
      }
    }
    self.errors.push(error);
  }

  fn finish(self, owning_process: OwningProcess, depth: usize) -> ProcessorOutput {
    let outputs = self
      .values
      .into_iter()
      .map(|(port, values)| {
        let entries: Vec<(Index, Data)> = values.into_iter().collect();
        (port, nest(&entries, 0, depth))
      })
      .collect();

    ProcessorOutput {
      owning_process,
      outputs,
      errors: self.errors,
    }
  }
}

/// Fold index-sorted entries that share their first `level` positions into
/// a collection `depth - level` levels deep. Positions nothing arrived for
/// become empty lists.
fn nest(entries: &[(Index, Data)], level: usize, depth: usize) -> Data {
  if level == depth {
    return entries
      .first()
      .map(|(_, data)| data.clone())
      .unwrap_or(Data::List(Vec::new()));
  }

  let mut items = Vec::new();
  let mut rest = entries;
  while let Some((index, _)) = rest.first() {
    let Some(&position) = index.as_slice().get(level) else {
      // Shallower than the iteration depth; nothing to place it under
      rest = &rest[1..];
      continue;
    };
    let group_len = rest
      .iter()
      .take_while(|(other, _)| other.as_slice().get(level) == Some(&position))
      .count();
    let (group, tail) = rest.split_at(group_len);

    while items.len() < position {
      items.push(Data::List(Vec::new()));
    }
    items.push(nest(group, level + 1, depth));
    rest = tail;
  }

  Data::List(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(index: &[usize], value: &str) -> (Index, Data) {
    (Index::new(index.to_vec()), Data::value(value))
  }

  #[test]
  fn test_nest_two_levels() {
    let entries = vec![
      entry(&[0, 0], "xp"),
      entry(&[0, 1], "xq"),
      entry(&[1, 0], "yp"),
      entry(&[1, 1], "yq"),
    ];

    assert_eq!(
      nest(&entries, 0, 2),
      Data::list([
        Data::list([Data::value("xp"), Data::value("xq")]),
        Data::list([Data::value("yp"), Data::value("yq")]),
      ])
    );
  }

  #[test]
  fn test_nest_scalar() {
    assert_eq!(nest(&[entry(&[], "only")], 0, 0), Data::value("only"));
  }

  #[test]
  fn test_nest_fills_holes() {
    let entries = vec![entry(&[0], "a"), entry(&[2], "c")];
    assert_eq!(
      nest(&entries, 0, 1),
      Data::list([Data::value("a"), Data::List(vec![]), Data::value("c")])
    );
  }

  #[test]
  fn test_nest_empty() {
    assert_eq!(nest(&[], 0, 1), Data::List(vec![]));
  }

  #[test]
  fn test_assembly_places_error_documents() {
    let process = OwningProcess::parse("run:proc");
    let mut assembly = Assembly::new(&[PortDef::new("out", 0)]);

    let mut outputs = DataMap::new();
    outputs.insert("out".to_string(), Data::value("ok"));
    assembly.result(JobResult::new(process.clone(), Index::from([0]), outputs));
    assembly.error(JobError::fatal(process.clone(), Index::from([1]), "boom"));

    let output = assembly.finish(process, 1);
    assert_eq!(
      output.outputs["out"],
      Data::list([Data::value("ok"), Data::error("boom", 0)])
    );
    assert_eq!(output.errors.len(), 1);
  }
}
