//! Iteration indices.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of one invocation within a processor's iteration space.
///
/// Indices order lexicographically. The empty index addresses a scalar
/// (non-iterated) invocation and, as a completion prefix, the whole
/// invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index(Vec<usize>);

impl Index {
  pub fn new(positions: Vec<usize>) -> Self {
    Self(positions)
  }

  /// The empty index.
  pub fn scalar() -> Self {
    Self(Vec::new())
  }

  /// Iteration depth (number of positions).
  pub fn depth(&self) -> usize {
    self.0.len()
  }

  pub fn is_scalar(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_slice(&self) -> &[usize] {
    &self.0
  }

  /// A new index one level deeper.
  pub fn child(&self, position: usize) -> Self {
    let mut positions = Vec::with_capacity(self.0.len() + 1);
    positions.extend_from_slice(&self.0);
    positions.push(position);
    Self(positions)
  }

  /// The first `len` positions (the whole index if `len` exceeds its depth).
  pub fn prefix(&self, len: usize) -> Self {
    Self(self.0[..len.min(self.0.len())].to_vec())
  }

  /// The index one level up, or `None` for the empty index.
  pub fn parent(&self) -> Option<Self> {
    if self.0.is_empty() {
      None
    } else {
      Some(self.prefix(self.0.len() - 1))
    }
  }

  pub fn starts_with(&self, prefix: &Index) -> bool {
    self.0.starts_with(&prefix.0)
  }

  /// This index followed by `other`.
  pub fn concat(&self, other: &Index) -> Self {
    let mut positions = Vec::with_capacity(self.0.len() + other.0.len());
    positions.extend_from_slice(&self.0);
    positions.extend_from_slice(&other.0);
    Self(positions)
  }

  /// Proper prefixes, deepest first, ending with the empty index.
  pub fn prefixes(&self) -> impl Iterator<Item = Index> + '_ {
    (0..self.0.len()).rev().map(|len| self.prefix(len))
  }
}

impl From<Vec<usize>> for Index {
  fn from(positions: Vec<usize>) -> Self {
    Self(positions)
  }
}

impl<const N: usize> From<[usize; N]> for Index {
  fn from(positions: [usize; N]) -> Self {
    Self(positions.to_vec())
  }
}

impl fmt::Display for Index {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, position) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ",")?;
      }
      write!(f, "{}", position)?;
    }
    write!(f, "]")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lexicographic_order() {
    let mut indices = vec![
      Index::from([1, 0]),
      Index::from([0, 1]),
      Index::from([0]),
      Index::from([0, 0]),
    ];
    indices.sort();

    assert_eq!(
      indices,
      vec![
        Index::from([0]),
        Index::from([0, 0]),
        Index::from([0, 1]),
        Index::from([1, 0]),
      ]
    );
  }

  #[test]
  fn test_prefixes_deepest_first() {
    let index = Index::from([2, 0, 1]);
    let prefixes: Vec<_> = index.prefixes().collect();

    assert_eq!(
      prefixes,
      vec![Index::from([2, 0]), Index::from([2]), Index::scalar()]
    );
    assert_eq!(Index::scalar().prefixes().count(), 0);
  }

  #[test]
  fn test_child_parent_concat() {
    let index = Index::from([3]).child(4);
    assert_eq!(index, Index::from([3, 4]));
    assert_eq!(index.parent(), Some(Index::from([3])));
    assert_eq!(Index::scalar().parent(), None);
    assert_eq!(index.concat(&Index::from([5])), Index::from([3, 4, 5]));
    assert!(index.starts_with(&Index::from([3])));
    assert!(!index.starts_with(&Index::from([4])));
  }

  #[test]
  fn test_display() {
    assert_eq!(Index::from([0, 12]).to_string(), "[0,12]");
    assert_eq!(Index::scalar().to_string(), "[]");
  }
}
