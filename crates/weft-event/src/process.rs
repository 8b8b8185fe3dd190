//! Owning process identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SEPARATOR: char = ':';

/// Hierarchical identifier scoping one (possibly nested) processor invocation.
///
/// The identifier is a persistent path: each value holds a shared reference to
/// its parent plus one local segment. [`push`](Self::push) and
/// [`pop`](Self::pop) return new identifiers and never touch the receiver, so
/// identifiers can be cloned freely across tasks.
#[derive(Clone, Default)]
pub struct OwningProcess {
  head: Option<Arc<Segment>>,
}

struct Segment {
  parent: Option<Arc<Segment>>,
  name: Box<str>,
  depth: usize,
}

impl OwningProcess {
  /// The empty identifier (no enclosing scope).
  pub fn empty() -> Self {
    Self::default()
  }

  /// Create a top-level identifier with a single segment.
  pub fn root(segment: impl AsRef<str>) -> Self {
    Self::empty().push(segment)
  }

  /// Parse a colon-separated identifier such as `run-1:outer:inner`.
  ///
  /// Empty segments are skipped.
  pub fn parse(s: &str) -> Self {
    Self::empty().push(s)
  }

  /// Return a new identifier with `segment` appended.
  ///
  /// A segment containing `:` is split and each part is appended in turn, so
  /// `parse(&p.to_string()) == p` always holds.
  pub fn push(&self, segment: impl AsRef<str>) -> Self {
    segment
      .as_ref()
      .split(SEPARATOR)
      .filter(|part| !part.is_empty())
      .fold(self.clone(), |parent, part| {
        let depth = parent.depth() + 1;
        Self {
          head: Some(Arc::new(Segment {
            parent: parent.head,
            name: part.into(),
            depth,
          })),
        }
      })
  }

  /// Return the enclosing identifier. Popping the empty identifier yields the
  /// empty identifier.
  pub fn pop(&self) -> Self {
    Self {
      head: self.head.as_ref().and_then(|head| head.parent.clone()),
    }
  }

  /// The innermost segment, if any.
  pub fn last(&self) -> Option<&str> {
    self.head.as_ref().map(|head| &*head.name)
  }

  /// Number of segments.
  pub fn depth(&self) -> usize {
    self.head.as_ref().map_or(0, |head| head.depth)
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  /// Segments from outermost to innermost.
  pub fn segments(&self) -> Vec<&str> {
    let mut segments = Vec::with_capacity(self.depth());
    let mut cursor = self.head.as_deref();
    while let Some(segment) = cursor {
      segments.push(&*segment.name);
      cursor = segment.parent.as_deref();
    }
    segments.reverse();
    segments
  }

  /// True if `other` is nested (at any depth) inside this identifier.
  pub fn is_ancestor_of(&self, other: &OwningProcess) -> bool {
    if other.depth() <= self.depth() {
      return false;
    }
    let mut cursor = other.clone();
    while cursor.depth() > self.depth() {
      cursor = cursor.pop();
    }
    cursor == *self
  }
}

impl PartialEq for OwningProcess {
  fn eq(&self, other: &Self) -> bool {
    let mut left = self.head.as_ref();
    let mut right = other.head.as_ref();
    loop {
      match (left, right) {
        (None, None) => return true,
        (Some(l), Some(r)) => {
          if Arc::ptr_eq(l, r) {
            return true;
          }
          if l.depth != r.depth || l.name != r.name {
            return false;
          }
          left = l.parent.as_ref();
          right = r.parent.as_ref();
        }
        _ => return false,
      }
    }
  }
}

impl Eq for OwningProcess {}

impl Hash for OwningProcess {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.depth().hash(state);
    let mut cursor = self.head.as_deref();
    while let Some(segment) = cursor {
      segment.name.hash(state);
      cursor = segment.parent.as_deref();
    }
  }
}

impl Ord for OwningProcess {
  fn cmp(&self, other: &Self) -> Ordering {
    self.segments().cmp(&other.segments())
  }
}

impl PartialOrd for OwningProcess {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for OwningProcess {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.segments().into_iter().enumerate() {
      if i > 0 {
        write!(f, "{}", SEPARATOR)?;
      }
      f.write_str(segment)?;
    }
    Ok(())
  }
}

impl fmt::Debug for OwningProcess {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "OwningProcess({})", self)
  }
}

impl Serialize for OwningProcess {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for OwningProcess {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(Self::parse(&raw))
  }
}
