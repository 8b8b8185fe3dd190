use serde::{Deserialize, Serialize};

/// Iteration strategy tree definition.
///
/// Leaves name input ports; `cross` combines its children independently
/// (every combination), `dot` walks them in lock-step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IterationDef {
  Port { name: String },
  Cross { children: Vec<IterationDef> },
  Dot { children: Vec<IterationDef> },
}

impl IterationDef {
  pub fn port(name: impl Into<String>) -> Self {
    IterationDef::Port { name: name.into() }
  }

  pub fn cross(children: impl IntoIterator<Item = IterationDef>) -> Self {
    IterationDef::Cross {
      children: children.into_iter().collect(),
    }
  }

  pub fn dot(children: impl IntoIterator<Item = IterationDef>) -> Self {
    IterationDef::Dot {
      children: children.into_iter().collect(),
    }
  }

  /// Port names referenced by the tree, left to right.
  pub fn port_names(&self) -> Vec<&str> {
    match self {
      IterationDef::Port { name } => vec![name.as_str()],
      IterationDef::Cross { children } | IterationDef::Dot { children } => {
        children.iter().flat_map(IterationDef::port_names).collect()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_deserialize_nested_tree() {
    let def: IterationDef = serde_json::from_value(json!({
      "type": "cross",
      "children": [
        { "type": "port", "name": "a" },
        { "type": "dot", "children": [
          { "type": "port", "name": "b" },
          { "type": "port", "name": "c" }
        ]}
      ]
    }))
    .unwrap();

    assert_eq!(
      def,
      IterationDef::cross([
        IterationDef::port("a"),
        IterationDef::dot([IterationDef::port("b"), IterationDef::port("c")]),
      ])
    );
    assert_eq!(def.port_names(), vec!["a", "b", "c"]);
  }
}
