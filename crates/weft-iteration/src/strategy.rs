//! Iteration strategy tree and job production.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use weft_config::{IterationDef, PortDef};
use weft_event::{DataMap, Index, Job, JobQueue, OwningProcess};

use crate::error::IterationError;

/// A node of a built iteration tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationNode {
  /// One input port and the depth the activity expects on it.
  Leaf { port: String, depth: usize },
  /// Every combination of the children's elements.
  Cross(Vec<IterationNode>),
  /// The children's elements paired position by position.
  Dot(Vec<IterationNode>),
}

/// Index/data pairs produced by one node for one invocation.
struct Tuples {
  depth: usize,
  entries: Vec<(Index, DataMap)>,
}

impl IterationNode {
  fn from_def(
    def: &IterationDef,
    declared: &BTreeMap<&str, usize>,
    seen: &mut BTreeSet<String>,
  ) -> Result<Self, IterationError> {
    match def {
      IterationDef::Port { name } => {
        let depth = *declared
          .get(name.as_str())
          .ok_or_else(|| IterationError::UnknownPort { port: name.clone() })?;
        if !seen.insert(name.clone()) {
          return Err(IterationError::DuplicatePort { port: name.clone() });
        }
        Ok(IterationNode::Leaf {
          port: name.clone(),
          depth,
        })
      }
      IterationDef::Cross { children } => Ok(IterationNode::Cross(
        children
          .iter()
          .map(|child| Self::from_def(child, declared, seen))
          .collect::<Result<_, _>>()?,
      )),
      IterationDef::Dot { children } => {
        if children.is_empty() {
          return Err(IterationError::EmptyNode);
        }
        Ok(IterationNode::Dot(
          children
            .iter()
            .map(|child| Self::from_def(child, declared, seen))
            .collect::<Result<_, _>>()?,
        ))
      }
    }
  }

  /// Ports under this node, left to right.
  pub fn ports(&self) -> Vec<&str> {
    match self {
      IterationNode::Leaf { port, .. } => vec![port.as_str()],
      IterationNode::Cross(children) | IterationNode::Dot(children) => {
        children.iter().flat_map(IterationNode::ports).collect()
      }
    }
  }

  fn evaluate(&self, inputs: &DataMap) -> Result<Tuples, IterationError> {
    match self {
      IterationNode::Leaf { port, depth } => {
        let data = inputs
          .get(port)
          .ok_or_else(|| IterationError::MissingInput { port: port.clone() })?;
        let data = data.clone().wrap_to_depth(*depth);
        let iteration_depth = data.depth() - depth;

        let entries = data
          .elements_at_depth(iteration_depth)
          .into_iter()
          .map(|(index, element)| {
            let mut map = DataMap::new();
            map.insert(port.clone(), element);
            (index, map)
          })
          .collect();

        Ok(Tuples {
          depth: iteration_depth,
          entries,
        })
      }
      IterationNode::Cross(children) => {
        let mut acc = Tuples {
          depth: 0,
          entries: vec![(Index::scalar(), DataMap::new())],
        };
        for child in children {
          let next = child.evaluate(inputs)?;
          let mut entries = Vec::with_capacity(acc.entries.len() * next.entries.len());
          for (left_index, left_data) in &acc.entries {
            for (right_index, right_data) in &next.entries {
              let mut data = left_data.clone();
              data.extend(right_data.iter().map(|(k, v)| (k.clone(), v.clone())));
              entries.push((left_index.concat(right_index), data));
            }
          }
          acc = Tuples {
            depth: acc.depth + next.depth,
            entries,
          };
        }
        Ok(acc)
      }
      IterationNode::Dot(children) => {
        let mut evaluated = children
          .iter()
          .map(|child| child.evaluate(inputs))
          .collect::<Result<Vec<_>, _>>()?
          .into_iter();
        // Dot nodes always have at least one child.
        let Some(mut acc) = evaluated.next() else {
          return Err(IterationError::EmptyNode);
        };

        for next in evaluated {
          let mismatch = |expected: usize, actual: usize| IterationError::CardinalityMismatch {
            ports: self.ports().join(", "),
            expected,
            actual,
          };
          if next.depth != acc.depth {
            return Err(mismatch(acc.depth, next.depth));
          }
          if next.entries.len() != acc.entries.len() {
            return Err(mismatch(acc.entries.len(), next.entries.len()));
          }
          for ((left_index, left_data), (right_index, right_data)) in
            acc.entries.iter_mut().zip(next.entries)
          {
            if *left_index != right_index {
              return Err(IterationError::IndexMismatch {
                ports: self.ports().join(", "),
                expected: left_index.clone(),
                actual: right_index,
              });
            }
            left_data.extend(right_data);
          }
        }
        Ok(acc)
      }
    }
  }
}

/// A processor's iteration strategy.
///
/// Built once from configuration and immutable afterwards.
#[derive(Debug, Clone)]
pub struct IterationStrategy {
  root: IterationNode,
}

impl IterationStrategy {
  /// Build a strategy from its definition and the processor's input ports.
  pub fn new(def: &IterationDef, input_ports: &[PortDef]) -> Result<Self, IterationError> {
    let declared: BTreeMap<&str, usize> = input_ports
      .iter()
      .map(|port| (port.name.as_str(), port.depth))
      .collect();
    let mut seen = BTreeSet::new();
    let root = IterationNode::from_def(def, &declared, &mut seen)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &IterationNode {
    &self.root
  }

  /// Expand the named inputs of one invocation into its job queue.
  ///
  /// Inputs not referenced by the tree are not iterated; each job receives
  /// them whole. Either the complete queue is returned or an error, never a
  /// partial sequence.
  pub fn produce_jobs(
    &self,
    owning_process: &OwningProcess,
    inputs: &DataMap,
  ) -> Result<JobQueue, IterationError> {
    let tuples = self.root.evaluate(inputs)?;

    let iterated: BTreeSet<&str> = self.root.ports().into_iter().collect();
    let passthrough: Vec<(&String, _)> = inputs
      .iter()
      .filter(|(port, _)| !iterated.contains(port.as_str()))
      .collect();

    let jobs: Vec<Job> = tuples
      .entries
      .into_iter()
      .map(|(index, mut data)| {
        for (port, value) in &passthrough {
          data.insert((*port).clone(), (*value).clone());
        }
        Job::new(owning_process.clone(), index, data)
      })
      .collect();

    debug!(
      owning_process = %owning_process,
      depth = tuples.depth,
      jobs = jobs.len(),
      "iteration produced jobs"
    );

    Ok(JobQueue::new(owning_process.clone(), tuples.depth, jobs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_event::Data;

  fn ports(names: &[(&str, usize)]) -> Vec<PortDef> {
    names
      .iter()
      .map(|(name, depth)| PortDef::new(*name, *depth))
      .collect()
  }

  fn values(items: &[&str]) -> Data {
    Data::list(items.iter().map(|item| Data::value(*item)))
  }

  fn inputs(entries: Vec<(&str, Data)>) -> DataMap {
    entries
      .into_iter()
      .map(|(name, data)| (name.to_string(), data))
      .collect()
  }

  fn process() -> OwningProcess {
    OwningProcess::parse("run:proc")
  }

  fn indices(queue: &JobQueue) -> Vec<Index> {
    queue.jobs.iter().map(|job| job.index.clone()).collect()
  }

  #[test]
  fn test_cross_product_row_major() {
    let def = IterationDef::cross([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let queue = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![("a", values(&["x", "y"])), ("b", values(&["p", "q"]))]),
      )
      .unwrap();

    assert_eq!(queue.depth, 2);
    assert_eq!(
      indices(&queue),
      vec![
        Index::from([0, 0]),
        Index::from([0, 1]),
        Index::from([1, 0]),
        Index::from([1, 1]),
      ]
    );
    let pairs: Vec<(String, String)> = queue
      .jobs
      .iter()
      .map(|job| {
        (
          job.data["a"].as_value().unwrap().as_str().unwrap().to_string(),
          job.data["b"].as_value().unwrap().as_str().unwrap().to_string(),
        )
      })
      .collect();
    assert_eq!(
      pairs,
      vec![
        ("x".to_string(), "p".to_string()),
        ("x".to_string(), "q".to_string()),
        ("y".to_string(), "p".to_string()),
        ("y".to_string(), "q".to_string()),
      ]
    );
  }

  #[test]
  fn test_cross_product_sums_depths_and_multiplies_counts() {
    let def = IterationDef::cross([
      IterationDef::port("a"),
      IterationDef::port("b"),
      IterationDef::port("c"),
    ]);
    let strategy =
      IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0), ("c", 0)])).unwrap();

    let nested = Data::list([values(&["1", "2"]), values(&["3"])]);
    let queue = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![
          ("a", values(&["x", "y", "z"])),
          ("b", nested),
          ("c", values(&["p", "q"])),
        ]),
      )
      .unwrap();

    // a: 3 elements at depth 1, b: 3 leaves at depth 2, c: 2 at depth 1.
    assert_eq!(queue.depth, 4);
    assert_eq!(queue.len(), 3 * 3 * 2);
    let all = indices(&queue);
    let mut sorted = all.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(all, sorted);
    assert!(all.iter().all(|index| index.depth() == 4));
  }

  #[test]
  fn test_dot_product_lock_step() {
    let def = IterationDef::dot([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let queue = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![("a", values(&["x", "y"])), ("b", values(&["p", "q"]))]),
      )
      .unwrap();

    assert_eq!(indices(&queue), vec![Index::from([0]), Index::from([1])]);
    assert_eq!(queue.jobs[1].data["a"], Data::value("y"));
    assert_eq!(queue.jobs[1].data["b"], Data::value("q"));
  }

  #[test]
  fn test_dot_product_mismatch_produces_no_jobs() {
    let def = IterationDef::dot([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let err = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![("a", values(&["x", "y", "z"])), ("b", values(&["p"]))]),
      )
      .unwrap_err();

    assert_eq!(
      err,
      IterationError::CardinalityMismatch {
        ports: "a, b".to_string(),
        expected: 3,
        actual: 1,
      }
    );
  }

  #[test]
  fn test_dot_product_depth_mismatch() {
    let def = IterationDef::dot([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let err = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![
          ("a", values(&["x"])),
          ("b", Data::list([values(&["p"])])),
        ]),
      )
      .unwrap_err();

    assert!(matches!(err, IterationError::CardinalityMismatch { .. }));
  }

  #[test]
  fn test_dot_product_ragged_lists_report_positions() {
    let def = IterationDef::dot([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let err = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![
          ("a", Data::list([values(&["x"]), values(&["y", "z"])])),
          ("b", Data::list([values(&["p", "q"]), values(&["r"])])),
        ]),
      )
      .unwrap_err();

    assert_eq!(
      err,
      IterationError::IndexMismatch {
        ports: "a, b".to_string(),
        expected: Index::from([1, 0]),
        actual: Index::from([0, 1]),
      }
    );
    assert!(err.to_string().contains("[1,0] against [0,1]"));
  }

  #[test]
  fn test_empty_collection_yields_no_jobs() {
    let def = IterationDef::cross([IterationDef::port("a"), IterationDef::port("b")]);
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0)])).unwrap();

    let queue = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![("a", values(&["x"])), ("b", Data::List(vec![]))]),
      )
      .unwrap();

    assert!(queue.is_empty());
    assert_eq!(queue.depth, 2);
  }

  #[test]
  fn test_declared_depth_limits_iteration() {
    let def = IterationDef::port("rows");
    let strategy = IterationStrategy::new(&def, &ports(&[("rows", 1)])).unwrap();

    let table = Data::list([values(&["a", "b"]), values(&["c"])]);
    let queue = strategy
      .produce_jobs(&process(), &inputs(vec![("rows", table)]))
      .unwrap();

    assert_eq!(queue.depth, 1);
    assert_eq!(queue.jobs[0].data["rows"], values(&["a", "b"]));
  }

  #[test]
  fn test_shallow_input_is_wrapped() {
    let def = IterationDef::port("items");
    let strategy = IterationStrategy::new(&def, &ports(&[("items", 1)])).unwrap();

    let queue = strategy
      .produce_jobs(&process(), &inputs(vec![("items", Data::value("solo"))]))
      .unwrap();

    assert_eq!(queue.depth, 0);
    assert_eq!(indices(&queue), vec![Index::scalar()]);
    assert_eq!(queue.jobs[0].data["items"], values(&["solo"]));
  }

  #[test]
  fn test_uniterated_inputs_passed_whole() {
    let def = IterationDef::port("a");
    let strategy = IterationStrategy::new(&def, &ports(&[("a", 0), ("config", 0)])).unwrap();

    let queue = strategy
      .produce_jobs(
        &process(),
        &inputs(vec![("a", values(&["x", "y"])), ("config", values(&["k"]))]),
      )
      .unwrap();

    assert_eq!(queue.len(), 2);
    assert!(queue.jobs.iter().all(|job| job.data["config"] == values(&["k"])));
  }

  #[test]
  fn test_empty_cross_is_single_scalar_job() {
    let strategy = IterationStrategy::new(&IterationDef::Cross { children: vec![] }, &[]).unwrap();
    let queue = strategy.produce_jobs(&process(), &DataMap::new()).unwrap();

    assert_eq!(indices(&queue), vec![Index::scalar()]);
  }

  #[test]
  fn test_produce_jobs_is_idempotent() {
    let def = IterationDef::cross([
      IterationDef::port("a"),
      IterationDef::dot([IterationDef::port("b"), IterationDef::port("c")]),
    ]);
    let strategy =
      IterationStrategy::new(&def, &ports(&[("a", 0), ("b", 0), ("c", 0)])).unwrap();
    let named = inputs(vec![
      ("a", values(&["x", "y"])),
      ("b", values(&["1", "2", "3"])),
      ("c", values(&["4", "5", "6"])),
    ]);

    let first = strategy.produce_jobs(&process(), &named).unwrap();
    let second = strategy.produce_jobs(&process(), &named).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
  }

  #[test]
  fn test_build_errors() {
    let unknown = IterationStrategy::new(&IterationDef::port("nope"), &ports(&[("a", 0)]));
    assert_eq!(
      unknown.unwrap_err(),
      IterationError::UnknownPort {
        port: "nope".to_string()
      }
    );

    let duplicate = IterationStrategy::new(
      &IterationDef::cross([IterationDef::port("a"), IterationDef::port("a")]),
      &ports(&[("a", 0)]),
    );
    assert_eq!(
      duplicate.unwrap_err(),
      IterationError::DuplicatePort {
        port: "a".to_string()
      }
    );

    let empty = IterationStrategy::new(&IterationDef::Dot { children: vec![] }, &[]);
    assert_eq!(empty.unwrap_err(), IterationError::EmptyNode);
  }

  #[test]
  fn test_missing_input() {
    let strategy = IterationStrategy::new(&IterationDef::port("a"), &ports(&[("a", 0)])).unwrap();
    let err = strategy
      .produce_jobs(&process(), &DataMap::new())
      .unwrap_err();

    assert_eq!(
      err,
      IterationError::MissingInput {
        port: "a".to_string()
      }
    );
  }
}
