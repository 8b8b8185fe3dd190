//! The dispatch layer contract and the context layers use to talk to their
//! neighbors.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use weft_event::{Completion, DownEvent, Job, JobError, JobQueue, JobResult, OwningProcess, UpEvent};

use crate::layers::ConditionOutcome;

/// Everything that can land in a layer's inbox.
#[derive(Debug)]
pub(crate) enum Message {
  Down(DownEvent),
  Up(UpEvent),
  Wake(Wake),
}

/// Deferred work a layer scheduled for itself, delivered back through its
/// own inbox so it is handled in order with the layer's other events.
#[derive(Debug)]
pub enum Wake {
  /// Send this job down once the wake fires.
  Resubmit(Job),
  /// A loop condition finished evaluating.
  Condition(ConditionOutcome),
}

/// One behavioral stage of a dispatch stack.
///
/// Each layer runs on its own task and owns its state exclusively; events are
/// handed to it one at a time. Every reaction defaults to forwarding the
/// event unchanged, so a layer only overrides what it acts on.
pub trait DispatchLayer: Send + 'static {
  /// Short name used for logging and stack validation.
  fn name(&self) -> &'static str;

  /// The full ordered job sequence of one invocation.
  fn receive_job_queue(&mut self, queue: JobQueue, ctx: &LayerContext) {
    ctx.send_down(DownEvent::JobQueue(queue));
  }

  /// A single job from the layer above.
  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    ctx.send_down(DownEvent::Job(job));
  }

  fn receive_result(&mut self, result: JobResult, ctx: &LayerContext) {
    ctx.send_up(UpEvent::Result(result));
  }

  fn receive_completion(&mut self, completion: Completion, ctx: &LayerContext) {
    ctx.send_up(UpEvent::Completion(completion));
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    ctx.send_up(UpEvent::Error(error));
  }

  /// Release all state held for `owning_process`. The notification itself is
  /// forwarded down by the stack after this returns.
  fn finished_with(&mut self, _owning_process: &OwningProcess, _ctx: &LayerContext) {}

  /// A wake scheduled through [`LayerContext::wake_when`] fired.
  fn receive_wake(&mut self, wake: Wake, ctx: &LayerContext) {
    match wake {
      Wake::Resubmit(job) => ctx.send_down(DownEvent::Job(job)),
      Wake::Condition(outcome) => ctx.send_up(UpEvent::Result(outcome.result)),
    }
  }
}

/// Hand one inbox message to the matching reaction.
pub(crate) fn deliver(layer: &mut dyn DispatchLayer, message: Message, ctx: &LayerContext) {
  match message {
    Message::Down(DownEvent::JobQueue(queue)) => layer.receive_job_queue(queue, ctx),
    Message::Down(DownEvent::Job(job)) => layer.receive_job(job, ctx),
    Message::Down(DownEvent::FinishedWith(process)) => {
      layer.finished_with(&process, ctx);
      if !ctx.is_bottom() {
        ctx.send_down(DownEvent::FinishedWith(process));
      }
    }
    Message::Up(UpEvent::Result(result)) => layer.receive_result(result, ctx),
    Message::Up(UpEvent::Completion(completion)) => layer.receive_completion(completion, ctx),
    Message::Up(UpEvent::Error(error)) => layer.receive_error(error, ctx),
    Message::Wake(wake) => layer.receive_wake(wake, ctx),
  }
}

/// A layer's view of the stack: channels to the neighbors above and below,
/// to its own inbox, and the stack's shutdown token.
#[derive(Debug, Clone)]
pub struct LayerContext {
  layer: &'static str,
  position: usize,
  above: mpsc::UnboundedSender<Message>,
  below: Option<mpsc::UnboundedSender<Message>>,
  inbox: mpsc::UnboundedSender<Message>,
  shutdown: CancellationToken,
}

impl LayerContext {
  pub(crate) fn new(
    layer: &'static str,
    position: usize,
    above: mpsc::UnboundedSender<Message>,
    below: Option<mpsc::UnboundedSender<Message>>,
    inbox: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
  ) -> Self {
    Self {
      layer,
      position,
      above,
      below,
      inbox,
      shutdown,
    }
  }

  pub fn layer(&self) -> &'static str {
    self.layer
  }

  /// Position in the stack, zero at the top.
  pub fn position(&self) -> usize {
    self.position
  }

  /// True for the activity invoker at the bottom of the stack.
  pub fn is_bottom(&self) -> bool {
    self.below.is_none()
  }

  pub fn send_down(&self, event: DownEvent) {
    let Some(below) = &self.below else {
      debug!(layer = self.layer, "nothing below the invoker, dropping event");
      return;
    };
    if below.send(Message::Down(event)).is_err() {
      debug!(layer = self.layer, "layer below has shut down, dropping event");
    }
  }

  pub fn send_up(&self, event: UpEvent) {
    if self.above.send(Message::Up(event)).is_err() {
      debug!(layer = self.layer, "layer above has shut down, dropping event");
    }
  }

  pub(crate) fn shutdown_token(&self) -> &CancellationToken {
    &self.shutdown
  }

  /// A token cancelled when the stack shuts down. Per-process tokens should
  /// be children of this one.
  pub fn child_token(&self) -> CancellationToken {
    self.shutdown.child_token()
  }

  /// Run `work` on its own task and deliver its wake to this layer, unless
  /// `cancel` fires first.
  pub fn wake_when<F>(&self, cancel: CancellationToken, work: F)
  where
    F: Future<Output = Wake> + Send + 'static,
  {
    let inbox = self.inbox.clone();
    let layer = self.layer;
    tokio::spawn(async move {
      tokio::select! {
        wake = work => {
          let _ = inbox.send(Message::Wake(wake));
        }
        _ = cancel.cancelled() => {
          debug!(layer, "scheduled wake abandoned");
        }
      }
    });
  }

  /// Deliver `wake` to this layer after `delay`, unless `cancel` fires first.
  pub fn wake_after(&self, delay: Duration, cancel: CancellationToken, wake: Wake) {
    self.wake_when(cancel, async move {
      tokio::time::sleep(delay).await;
      wake
    });
  }
}
