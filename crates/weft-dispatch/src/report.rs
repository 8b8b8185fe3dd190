//! Sinks for the events leaving the top of a dispatch stack.

use tokio::sync::mpsc;
use weft_event::UpEvent;

/// Receives every Result, Completion and Error that reaches the top of the
/// stack.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// stack's report task.
pub trait ProcessReport: Send + Sync {
  fn receive(&self, event: UpEvent);
}

/// A report that discards all events.
pub struct NoopReport;

impl ProcessReport for NoopReport {
  fn receive(&self, _event: UpEvent) {}
}

/// A report that forwards events to a channel.
pub struct ChannelReport {
  sender: mpsc::UnboundedSender<UpEvent>,
}

impl ChannelReport {
  pub fn new(sender: mpsc::UnboundedSender<UpEvent>) -> Self {
    Self { sender }
  }

  /// A report together with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ProcessReport for ChannelReport {
  fn receive(&self, event: UpEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
