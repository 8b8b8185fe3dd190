use serde::{Deserialize, Serialize};

use crate::iteration::IterationDef;
use crate::layer::LayerDef;

/// A processor definition: the activities it can call, its ports, how its
/// inputs are iterated and how its jobs are dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorDef {
  pub name: String,
  /// Activity names, primary first. Later entries are failover candidates.
  pub activities: Vec<String>,
  #[serde(default)]
  pub input_ports: Vec<PortDef>,
  #[serde(default)]
  pub output_ports: Vec<PortDef>,
  /// Defaults to the cross product of all input ports.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub iteration: Option<IterationDef>,
  #[serde(default = "LayerDef::default_stack")]
  pub dispatch: Vec<LayerDef>,
}

impl ProcessorDef {
  /// The configured iteration tree, or the default cross product.
  pub fn iteration_or_default(&self) -> IterationDef {
    self.iteration.clone().unwrap_or_else(|| {
      IterationDef::cross(
        self
          .input_ports
          .iter()
          .map(|port| IterationDef::port(&port.name)),
      )
    })
  }
}

/// A named port and the collection depth it expects (inputs) or produces
/// (outputs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDef {
  pub name: String,
  #[serde(default)]
  pub depth: usize,
}

impl PortDef {
  pub fn new(name: impl Into<String>, depth: usize) -> Self {
    Self {
      name: name.into(),
      depth,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_minimal_definition_uses_defaults() {
    let def: ProcessorDef = serde_json::from_value(json!({
      "name": "concat",
      "activities": ["concat"],
      "input_ports": [{ "name": "a" }, { "name": "b", "depth": 1 }],
      "output_ports": [{ "name": "out" }]
    }))
    .unwrap();

    assert_eq!(def.dispatch, LayerDef::default_stack());
    assert_eq!(def.input_ports[1], PortDef::new("b", 1));
    assert_eq!(
      def.iteration_or_default(),
      IterationDef::cross([IterationDef::port("a"), IterationDef::port("b")])
    );
  }
}
