//! Data handles carried by jobs and results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Index;

/// Named port → data, ordered by port name.
pub type DataMap = BTreeMap<String, Data>;

/// A data handle: a scalar value, a (possibly nested) list of handles, or an
/// error document standing in for data that failed to be produced.
///
/// Resolution of handles to concrete values belongs to the storage layer;
/// within the pipeline a scalar is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Data {
  Value(serde_json::Value),
  List(Vec<Data>),
  Error(ErrorDocument),
}

/// Placeholder for a failed value. `depth` is the collection depth the
/// missing data would have had.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDocument {
  pub message: String,
  #[serde(default)]
  pub depth: usize,
}

impl Data {
  pub fn value(value: impl Into<serde_json::Value>) -> Self {
    Data::Value(value.into())
  }

  pub fn list(items: impl IntoIterator<Item = Data>) -> Self {
    Data::List(items.into_iter().collect())
  }

  pub fn error(message: impl Into<String>, depth: usize) -> Self {
    Data::Error(ErrorDocument {
      message: message.into(),
      depth,
    })
  }

  /// Collection depth. Scalars are depth 0, an empty list is depth 1.
  pub fn depth(&self) -> usize {
    match self {
      Data::Value(_) => 0,
      Data::Error(doc) => doc.depth,
      Data::List(items) => 1 + items.iter().map(Data::depth).max().unwrap_or(0),
    }
  }

  pub fn as_value(&self) -> Option<&serde_json::Value> {
    match self {
      Data::Value(value) => Some(value),
      _ => None,
    }
  }

  /// Look up a nested element.
  pub fn get(&self, index: &Index) -> Option<&Data> {
    let mut current = self;
    for &position in index.as_slice() {
      match current {
        Data::List(items) => current = items.get(position)?,
        _ => return None,
      }
    }
    Some(current)
  }

  /// All elements `depth` levels down, in row-major order, with their index.
  ///
  /// Branches shallower than `depth` are treated as singleton lists, so a
  /// scalar met early is yielded once with its index padded by zeros.
  pub fn elements_at_depth(&self, depth: usize) -> Vec<(Index, Data)> {
    let mut out = Vec::new();
    self.collect_elements(Index::scalar(), depth, &mut out);
    out
  }

  fn collect_elements(&self, at: Index, remaining: usize, out: &mut Vec<(Index, Data)>) {
    if remaining == 0 {
      out.push((at, self.clone()));
      return;
    }
    match self {
      Data::List(items) => {
        for (position, item) in items.iter().enumerate() {
          item.collect_elements(at.child(position), remaining - 1, out);
        }
      }
      Data::Value(_) => out.push((pad(at, remaining), self.clone())),
      Data::Error(doc) => out.push((
        pad(at, remaining),
        Data::Error(ErrorDocument {
          message: doc.message.clone(),
          depth: doc.depth.saturating_sub(remaining),
        }),
      )),
    }
  }

  /// Wrap in singleton lists until the handle is at least `depth` deep.
  pub fn wrap_to_depth(self, depth: usize) -> Data {
    let mut data = self;
    while data.depth() < depth {
      data = Data::List(vec![data]);
    }
    data
  }

  /// Index of the first error document, depth-first.
  pub fn first_error(&self) -> Option<Index> {
    match self {
      Data::Value(_) => None,
      Data::Error(_) => Some(Index::scalar()),
      Data::List(items) => items.iter().enumerate().find_map(|(position, item)| {
        item
          .first_error()
          .map(|inner| Index::scalar().child(position).concat(&inner))
      }),
    }
  }
}

fn pad(mut index: Index, levels: usize) -> Index {
  for _ in 0..levels {
    index = index.child(0);
  }
  index
}

impl From<serde_json::Value> for Data {
  fn from(value: serde_json::Value) -> Self {
    Data::Value(value)
  }
}
