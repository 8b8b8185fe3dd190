//! The processor: one definition, one dispatch stack, many invocations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use weft_activity::{ActivityRef, ActivityRegistry};
use weft_config::ProcessorDef;
use weft_dispatch::{ConfigurationError, DispatchStack, HealthWarning, ProcessReport, check_stack};
use weft_event::{DataMap, OwningProcess, UpEvent};
use weft_iteration::IterationStrategy;

use crate::error::ProcessorError;
use crate::invocation::ProcessorInvocation;

/// Routes events leaving the stack to the invocation that owns them.
#[derive(Default)]
pub(crate) struct Router {
  routes: Mutex<HashMap<OwningProcess, mpsc::UnboundedSender<UpEvent>>>,
}

impl Router {
  /// Register a route, unless one already exists for `owning_process`.
  fn open(&self, owning_process: &OwningProcess) -> Option<mpsc::UnboundedReceiver<UpEvent>> {
    let mut routes = self.routes.lock();
    if routes.contains_key(owning_process) {
      return None;
    }
    let (sender, receiver) = mpsc::unbounded_channel();
    routes.insert(owning_process.clone(), sender);
    Some(receiver)
  }

  pub(crate) fn close(&self, owning_process: &OwningProcess) {
    self.routes.lock().remove(owning_process);
  }
}

impl ProcessReport for Router {
  fn receive(&self, event: UpEvent) {
    let routes = self.routes.lock();
    match routes.get(event.owning_process()) {
      Some(sender) => {
        // Ignore send errors - the invocation may have been dropped
        let _ = sender.send(event);
      }
      None => debug!(
        owning_process = %event.owning_process(),
        index = %event.index(),
        "dropping event for a process that is no longer running"
      ),
    }
  }
}

/// A processor ready to be invoked.
///
/// Owns the activities resolved from its definition, its iteration strategy
/// and a running dispatch stack shared by all of its invocations.
///
/// # Usage
///
/// ```ignore
/// let processor = Processor::new(def, &registry)?;
///
/// let output = processor.invoke(inputs)?.wait().await?;
/// println!("{:?}", output.outputs["out"]);
/// ```
pub struct Processor {
  pub(crate) def: ProcessorDef,
  strategy: IterationStrategy,
  pub(crate) stack: DispatchStack,
  pub(crate) router: Arc<Router>,
  warnings: Vec<HealthWarning>,
}

impl Processor {
  /// Resolve a definition against `registry` and start its dispatch stack.
  ///
  /// Must be called from within a tokio runtime.
  ///
  /// # Errors
  /// Returns an error if an activity is not registered, the iteration tree
  /// does not match the input ports or the dispatch stack is invalid.
  pub fn new(def: ProcessorDef, registry: &ActivityRegistry) -> Result<Self, ProcessorError> {
    let activities = def
      .activities
      .iter()
      .map(|name| {
        registry
          .get(name)
          .ok_or_else(|| ConfigurationError::UnknownActivity { name: name.clone() })
      })
      .collect::<Result<Vec<ActivityRef>, _>>()?;

    let strategy = IterationStrategy::new(&def.iteration_or_default(), &def.input_ports)?;
    let warnings = check_stack(&def.dispatch, registry, &def.output_ports);

    let router = Arc::new(Router::default());
    let stack = DispatchStack::from_defs(
      &def.dispatch,
      activities,
      registry,
      &def.output_ports,
      router.clone(),
    )?;

    info!(
      processor = %def.name,
      activities = ?def.activities,
      layers = ?stack.layer_names(),
      warnings = warnings.len(),
      "processor ready"
    );

    Ok(Self {
      def,
      strategy,
      stack,
      router,
      warnings,
    })
  }

  pub fn name(&self) -> &str {
    &self.def.name
  }

  pub fn def(&self) -> &ProcessorDef {
    &self.def
  }

  /// Findings of the pre-execution health check.
  pub fn warnings(&self) -> &[HealthWarning] {
    &self.warnings
  }

  pub fn layer_names(&self) -> &[&'static str] {
    self.stack.layer_names()
  }

  /// Invoke the processor as a new top-level run.
  pub fn invoke(&self, inputs: DataMap) -> Result<ProcessorInvocation<'_>, ProcessorError> {
    let run = OwningProcess::root(format!("run-{}", uuid::Uuid::new_v4()));
    self.invoke_within(&run, inputs)
  }

  /// Invoke the processor nested inside `parent`.
  ///
  /// The invocation's owning process is `parent` with the processor name
  /// appended. Jobs are produced and submitted before this returns; call
  /// `.wait()` on the handle to collect the outputs.
  pub fn invoke_within(
    &self,
    parent: &OwningProcess,
    inputs: DataMap,
  ) -> Result<ProcessorInvocation<'_>, ProcessorError> {
    let owning_process = parent.push(&self.def.name);
    let queue = self.strategy.produce_jobs(&owning_process, &inputs)?;

    let Some(events) = self.router.open(&owning_process) else {
      return Err(ProcessorError::AlreadyRunning { owning_process });
    };

    let depth = queue.depth;
    let jobs = queue.len();
    if let Err(e) = self.stack.receive_job_queue(queue) {
      self.router.close(&owning_process);
      return Err(e.into());
    }

    info!(
      owning_process = %owning_process,
      depth,
      jobs,
      "invocation_started"
    );

    Ok(ProcessorInvocation::new(
      self,
      owning_process,
      depth,
      events,
      CancellationToken::new(),
    ))
  }

  /// Stop the dispatch stack. Running invocations fail with a dispatch
  /// error.
  pub fn shutdown(&self) {
    self.stack.shutdown();
  }
}
