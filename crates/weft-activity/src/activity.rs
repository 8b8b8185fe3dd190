//! The activity trait and a closure adapter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use weft_event::DataMap;

use crate::error::ActivityError;

/// Shared handle to an activity.
pub type ActivityRef = Arc<dyn Activity>;

/// A unit of work invoked once per job.
///
/// Invocations may be long-running and run concurrently with other
/// invocations of the same activity.
#[async_trait]
pub trait Activity: Send + Sync {
  /// Name used for registry lookup and logging.
  fn name(&self) -> &str;

  /// Input ports the activity requires.
  fn input_ports(&self) -> Vec<String> {
    Vec::new()
  }

  /// Invoke the activity with one job's inputs.
  async fn invoke(&self, inputs: DataMap) -> Result<DataMap, ActivityError>;
}

/// An activity backed by an async closure.
///
/// # Example
///
/// ```ignore
/// let upper = FnActivity::new("upper", |inputs: DataMap| async move {
///   let mut outputs = DataMap::new();
///   outputs.insert("out".to_string(), inputs["in"].clone());
///   Ok(outputs)
/// });
/// ```
pub struct FnActivity<F> {
  name: String,
  input_ports: Vec<String>,
  f: F,
}

impl<F, Fut> FnActivity<F>
where
  F: Fn(DataMap) -> Fut + Send + Sync,
  Fut: Future<Output = Result<DataMap, ActivityError>> + Send,
{
  pub fn new(name: impl Into<String>, f: F) -> Self {
    Self {
      name: name.into(),
      input_ports: Vec::new(),
      f,
    }
  }

  /// Declare the input ports the activity requires.
  pub fn with_input_ports<I, S>(mut self, ports: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.input_ports = ports.into_iter().map(Into::into).collect();
    self
  }

  pub fn into_ref(self) -> ActivityRef
  where
    F: 'static,
  {
    Arc::new(self)
  }
}

#[async_trait]
impl<F, Fut> Activity for FnActivity<F>
where
  F: Fn(DataMap) -> Fut + Send + Sync,
  Fut: Future<Output = Result<DataMap, ActivityError>> + Send,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn input_ports(&self) -> Vec<String> {
    self.input_ports.clone()
  }

  async fn invoke(&self, inputs: DataMap) -> Result<DataMap, ActivityError> {
    (self.f)(inputs).await
  }
}

impl<F> fmt::Debug for FnActivity<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnActivity")
      .field("name", &self.name)
      .field("input_ports", &self.input_ports)
      .finish()
  }
}
