//! Assembly and lifetime of a dispatch stack.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weft_activity::{ActivityRef, ActivityRegistry};
use weft_config::{LayerDef, PortDef};
use weft_event::{DownEvent, JobQueue, OwningProcess};

use crate::error::{ConfigurationError, DispatchError};
use crate::invoke::Invoker;
use crate::layer::{DispatchLayer, LayerContext, Message, deliver};
use crate::layers::{ErrorBounce, Failover, Loop, Parallelize, Retry, RetryPolicy};
use crate::report::ProcessReport;

/// A running chain of dispatch layers ending in an activity invoker.
///
/// Dropping the stack shuts it down.
pub struct DispatchStack {
  top: mpsc::UnboundedSender<Message>,
  shutdown: CancellationToken,
  layer_names: Vec<&'static str>,
}

impl DispatchStack {
  /// Validate and start a stack. `layers` are listed top to bottom.
  ///
  /// An unbounded parallelize layer is added at the top when none is given.
  /// Must be called from within a tokio runtime.
  pub fn build(
    mut layers: Vec<Box<dyn DispatchLayer>>,
    invoker: Invoker,
    report: Arc<dyn ProcessReport>,
  ) -> Result<Self, ConfigurationError> {
    if invoker.activity_count() == 0 {
      return Err(ConfigurationError::NoActivities);
    }

    let positions = |name: &str, layers: &[Box<dyn DispatchLayer>]| -> Vec<usize> {
      layers
        .iter()
        .enumerate()
        .filter(|(_, layer)| layer.name() == name)
        .map(|(position, _)| position)
        .collect()
    };

    let parallelize = positions("parallelize", &layers);
    match parallelize.as_slice() {
      [] => layers.insert(0, Box::new(Parallelize::new(None))),
      [0] => {}
      [position] => {
        return Err(ConfigurationError::ParallelizeNotFirst {
          position: *position,
        });
      }
      _ => return Err(ConfigurationError::DuplicateParallelize),
    }

    let loops = positions("loop", &layers);
    let retries = positions("retry", &layers);
    for &loop_position in &loops {
      if let Some(&retry_position) = retries.iter().find(|&&retry| retry < loop_position) {
        return Err(ConfigurationError::LoopBelowRetry {
          loop_position,
          retry_position,
        });
      }
    }

    let layer_names: Vec<&'static str> = layers.iter().map(|layer| layer.name()).collect();
    let shutdown = CancellationToken::new();

    let mut actors = layers;
    actors.push(Box::new(invoker));

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (senders, inboxes): (Vec<_>, Vec<_>) =
      (0..actors.len()).map(|_| mpsc::unbounded_channel()).unzip();

    for (position, (layer, inbox)) in actors.into_iter().zip(inboxes).enumerate() {
      let above = if position == 0 {
        report_tx.clone()
      } else {
        senders[position - 1].clone()
      };
      let below = senders.get(position + 1).cloned();
      let ctx = LayerContext::new(
        layer.name(),
        position,
        above,
        below,
        senders[position].clone(),
        shutdown.clone(),
      );
      tokio::spawn(run_layer(layer, inbox, ctx));
    }
    tokio::spawn(run_report(report_rx, report, shutdown.clone()));

    info!(layers = ?layer_names, "dispatch stack started");

    Ok(Self {
      top: senders[0].clone(),
      shutdown,
      layer_names,
    })
  }

  /// Build a stack from layer definitions.
  ///
  /// `activities` are the processor's resolved activities, primary first;
  /// `registry` resolves loop condition activities and `output_ports` sizes
  /// the error documents produced by an error bounce layer.
  pub fn from_defs(
    defs: &[LayerDef],
    activities: Vec<ActivityRef>,
    registry: &ActivityRegistry,
    output_ports: &[PortDef],
    report: Arc<dyn ProcessReport>,
  ) -> Result<Self, ConfigurationError> {
    let mut layers: Vec<Box<dyn DispatchLayer>> = Vec::with_capacity(defs.len());
    for def in defs {
      let layer: Box<dyn DispatchLayer> = match def {
        LayerDef::Parallelize(def) => {
          if def.max_jobs == Some(0) {
            return Err(ConfigurationError::InvalidLayer {
              layer: "parallelize",
              message: "max_jobs must be at least 1".to_string(),
            });
          }
          Box::new(Parallelize::new(def.max_jobs))
        }
        LayerDef::ErrorBounce => Box::new(ErrorBounce::new(output_ports.to_vec())),
        LayerDef::Failover => Box::new(Failover::new(activities.len())),
        LayerDef::Retry(def) => Box::new(Retry::new(RetryPolicy::from_def(def)?)),
        LayerDef::Loop(def) => {
          let condition =
            registry
              .get(&def.condition)
              .ok_or_else(|| ConfigurationError::UnknownActivity {
                name: def.condition.clone(),
              })?;
          Box::new(Loop::new(condition, def))
        }
      };
      layers.push(layer);
    }

    Self::build(layers, Invoker::new(activities), report)
  }

  /// Submit the job queue of one invocation.
  pub fn receive_job_queue(&self, queue: JobQueue) -> Result<(), DispatchError> {
    self.send(DownEvent::JobQueue(queue))
  }

  /// Release every layer's state for `owning_process`. Pending retries and
  /// loop conditions for it are abandoned; activity calls already running
  /// are left to finish and their events are discarded as unexpected.
  pub fn finished_with(&self, owning_process: &OwningProcess) -> Result<(), DispatchError> {
    self.send(DownEvent::FinishedWith(owning_process.clone()))
  }

  /// Layer names, top to bottom, without the invoker.
  pub fn layer_names(&self) -> &[&'static str] {
    &self.layer_names
  }

  /// Stop every layer task.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }

  pub fn is_shutdown(&self) -> bool {
    self.shutdown.is_cancelled()
  }

  /// Resolves once the stack has shut down.
  pub async fn stopped(&self) {
    self.shutdown.cancelled().await
  }

  fn send(&self, event: DownEvent) -> Result<(), DispatchError> {
    if self.shutdown.is_cancelled() {
      return Err(DispatchError::StackClosed);
    }
    self
      .top
      .send(Message::Down(event))
      .map_err(|_| DispatchError::StackClosed)
  }
}

impl Drop for DispatchStack {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

async fn run_layer(
  mut layer: Box<dyn DispatchLayer>,
  mut inbox: mpsc::UnboundedReceiver<Message>,
  ctx: LayerContext,
) {
  let shutdown = ctx.shutdown_token().clone();
  debug!(layer = ctx.layer(), position = ctx.position(), "layer started");

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      message = inbox.recv() => match message {
        Some(message) => deliver(layer.as_mut(), message, &ctx),
        None => break,
      },
    }
  }

  debug!(layer = ctx.layer(), "layer stopped");
}

async fn run_report(
  mut inbox: mpsc::UnboundedReceiver<Message>,
  report: Arc<dyn ProcessReport>,
  shutdown: CancellationToken,
) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      message = inbox.recv() => match message {
        Some(Message::Up(event)) => report.receive(event),
        Some(other) => warn!(?other, "unexpected message at the top of the stack"),
        None => break,
      },
    }
  }
}
