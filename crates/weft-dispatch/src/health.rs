//! Pre-execution checks that flag suspicious stack configuration without
//! rejecting it.

use std::fmt;

use tracing::warn;
use weft_activity::{Activity, ActivityRegistry};
use weft_config::{LOOP_PORT, LayerDef, PortDef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthWarning {
  pub layer: &'static str,
  pub message: String,
}

impl fmt::Display for HealthWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} layer: {}", self.layer, self.message)
  }
}

/// Every input port the condition requires, apart from the loop-control
/// port, must be fed by one of the processor's output ports.
pub fn check_loop_condition(condition: &dyn Activity, output_ports: &[PortDef]) -> Vec<HealthWarning> {
  condition
    .input_ports()
    .into_iter()
    .filter(|port| port != LOOP_PORT)
    .filter(|port| !output_ports.iter().any(|output| &output.name == port))
    .map(|port| HealthWarning {
      layer: "loop",
      message: format!(
        "condition '{}' requires input '{}' which is not an output of the processor",
        condition.name(),
        port
      ),
    })
    .collect()
}

/// Run every health check that applies to `defs`, logging what is found.
pub fn check_stack(
  defs: &[LayerDef],
  registry: &ActivityRegistry,
  output_ports: &[PortDef],
) -> Vec<HealthWarning> {
  let mut warnings = Vec::new();

  for def in defs {
    let LayerDef::Loop(def) = def else {
      continue;
    };

    if let Some(condition) = registry.get(&def.condition) {
      warnings.extend(check_loop_condition(condition.as_ref(), output_ports));
    }

    for output in def.feedback.keys() {
      if !output_ports.iter().any(|port| &port.name == output) {
        warnings.push(HealthWarning {
          layer: "loop",
          message: format!("feedback reads '{}' which is not an output of the processor", output),
        });
      }
    }
  }

  for warning in &warnings {
    warn!(layer = warning.layer, "{}", warning.message);
  }
  warnings
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_activity::{ActivityError, ActivityRef, FnActivity};
  use weft_config::LoopDef;
  use weft_event::DataMap;

  fn condition(ports: &[&str]) -> ActivityRef {
    FnActivity::new("check", |_inputs: DataMap| async move {
      Ok::<_, ActivityError>(DataMap::new())
    })
    .with_input_ports(ports.iter().copied())
    .into_ref()
  }

  #[test]
  fn test_loop_port_is_ignored() {
    let outputs = vec![PortDef::new("value", 0)];
    let warnings = check_loop_condition(condition(&["value", "loop"]).as_ref(), &outputs);
    assert!(warnings.is_empty());
  }

  #[test]
  fn test_unfed_condition_input_warns() {
    let outputs = vec![PortDef::new("value", 0)];
    let warnings = check_loop_condition(condition(&["count"]).as_ref(), &outputs);

    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("'count'"));
    assert_eq!(warnings[0].to_string(), format!("loop layer: {}", warnings[0].message));
  }

  #[test]
  fn test_check_stack_covers_feedback() {
    let mut registry = ActivityRegistry::new();
    registry.register_ref(condition(&["value"]));

    let mut def = LoopDef::new("check");
    def.feedback.insert("missing".to_string(), "value".to_string());

    let warnings = check_stack(
      &[LayerDef::Loop(def)],
      &registry,
      &[PortDef::new("value", 0)],
    );
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("'missing'"));
  }
}
