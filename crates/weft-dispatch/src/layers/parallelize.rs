//! Bounded admission of a job queue, and completion tracking.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};
use weft_event::{
  Completion, DownEvent, Index, Job, JobError, JobQueue, JobResult, OwningProcess, UpEvent,
};

use crate::layer::{DispatchLayer, LayerContext};

/// Splits a job queue into individual jobs, keeping at most `max_jobs`
/// outstanding per owning process, and emits a Completion for every index
/// prefix once all jobs under it have resolved.
pub struct Parallelize {
  max_jobs: usize,
  processes: HashMap<OwningProcess, ProcessState>,
  /// Processes whose root completion has been emitted but which have not yet
  /// been purged with `finished_with`.
  closed: HashSet<OwningProcess>,
}

#[derive(Default)]
struct ProcessState {
  pending: VecDeque<Job>,
  outstanding: HashSet<Index>,
  /// Unresolved job count under each completion prefix.
  remaining: HashMap<Index, usize>,
  /// A process-scoped error was seen; no more admissions or completions.
  failed: bool,
}

enum Disposition {
  Outstanding,
  /// A finer-grained event under an outstanding index.
  Nested,
  Unexpected,
  Closed,
  /// Belongs to a process this layer never saw a queue for.
  Foreign,
}

/// Prefixes that receive a Completion once `index` resolves, deepest first.
fn completion_prefixes(index: &Index) -> Vec<Index> {
  if index.is_scalar() {
    vec![Index::scalar()]
  } else {
    index.prefixes().collect()
  }
}

impl Parallelize {
  pub fn new(max_jobs: Option<usize>) -> Self {
    Self {
      max_jobs: max_jobs.unwrap_or(usize::MAX),
      processes: HashMap::new(),
      closed: HashSet::new(),
    }
  }

  pub fn max_jobs(&self) -> Option<usize> {
    (self.max_jobs != usize::MAX).then_some(self.max_jobs)
  }

  fn classify(&self, process: &OwningProcess, index: &Index) -> Disposition {
    if let Some(state) = self.processes.get(process) {
      if state.outstanding.contains(index) {
        Disposition::Outstanding
      } else if index
        .prefixes()
        .any(|prefix| state.outstanding.contains(&prefix))
      {
        Disposition::Nested
      } else {
        Disposition::Unexpected
      }
    } else if self.closed.contains(process) {
      Disposition::Closed
    } else {
      Disposition::Foreign
    }
  }

  fn admit(&mut self, process: &OwningProcess, ctx: &LayerContext) {
    let Some(state) = self.processes.get_mut(process) else {
      return;
    };
    while !state.failed && state.outstanding.len() < self.max_jobs {
      let Some(job) = state.pending.pop_front() else {
        break;
      };
      state.outstanding.insert(job.index.clone());
      ctx.send_down(DownEvent::Job(job));
    }
  }

  /// Mark `index` resolved, emit any completions it unlocks and admit the
  /// next jobs.
  fn resolve(&mut self, process: &OwningProcess, index: &Index, ctx: &LayerContext) {
    let Some(state) = self.processes.get_mut(process) else {
      return;
    };
    state.outstanding.remove(index);

    let mut finished = false;
    for prefix in completion_prefixes(index) {
      let Some(count) = state.remaining.get_mut(&prefix) else {
        continue;
      };
      *count -= 1;
      if *count > 0 {
        continue;
      }
      state.remaining.remove(&prefix);
      if state.failed {
        continue;
      }
      finished = prefix.is_scalar();
      ctx.send_up(UpEvent::Completion(Completion::new(process.clone(), prefix)));
    }

    if finished || (state.failed && state.outstanding.is_empty()) {
      debug!(owning_process = %process, "all jobs resolved");
      self.processes.remove(process);
      self.closed.insert(process.clone());
      return;
    }

    self.admit(process, ctx);
  }

  fn fail(&mut self, process: &OwningProcess) {
    if let Some(state) = self.processes.get_mut(process) {
      state.failed = true;
      state.pending.clear();
    }
  }

  fn report_protocol(&self, process: &OwningProcess, what: String, ctx: &LayerContext) {
    warn!(owning_process = %process, "{}", what);
    ctx.send_up(UpEvent::Error(JobError::protocol(
      process.clone(),
      Index::scalar(),
      what,
    )));
  }

  /// Route one upward event: forward it, then account for it.
  fn receive_up(&mut self, event: UpEvent, ctx: &LayerContext) {
    let process = event.owning_process().clone();
    let index = event.index().clone();

    match self.classify(&process, &index) {
      Disposition::Outstanding => {
        let fatal = matches!(&event, UpEvent::Error(error) if error.is_process_fatal());
        ctx.send_up(event);
        if fatal {
          self.fail(&process);
        }
        self.resolve(&process, &index, ctx);
      }
      Disposition::Nested | Disposition::Foreign => {
        let fatal = matches!(&event, UpEvent::Error(error) if error.is_process_fatal());
        ctx.send_up(event);
        if fatal {
          self.fail(&process);
          if self
            .processes
            .get(&process)
            .is_some_and(|state| state.outstanding.is_empty())
          {
            self.processes.remove(&process);
            self.closed.insert(process);
          }
        }
      }
      Disposition::Unexpected => {
        let what = format!("{} for index {} that was never admitted", describe(&event), index);
        // Errors are never dropped, pass the original along as well
        if let UpEvent::Error(_) = &event {
          ctx.send_up(event);
        }
        self.report_protocol(&process, what, ctx);
      }
      Disposition::Closed => {
        let what = format!("{} at {} after the process completed", describe(&event), index);
        if let UpEvent::Error(_) = &event {
          ctx.send_up(event);
        }
        self.report_protocol(&process, what, ctx);
      }
    }
  }
}

fn describe(event: &UpEvent) -> String {
  match event {
    UpEvent::Result(_) => "result".to_string(),
    UpEvent::Completion(_) => "completion".to_string(),
    UpEvent::Error(error) => format!("error ({})", error.message),
  }
}

impl DispatchLayer for Parallelize {
  fn name(&self) -> &'static str {
    "parallelize"
  }

  fn receive_job_queue(&mut self, queue: JobQueue, ctx: &LayerContext) {
    let process = queue.owning_process.clone();
    if self.processes.contains_key(&process) || self.closed.contains(&process) {
      self.report_protocol(
        &process,
        format!("duplicate job queue for '{}'", process),
        ctx,
      );
      return;
    }

    debug!(
      owning_process = %process,
      jobs = queue.len(),
      max_jobs = self.max_jobs,
      "admitting job queue"
    );

    if queue.is_empty() {
      ctx.send_up(UpEvent::Completion(Completion::new(
        process.clone(),
        Index::scalar(),
      )));
      self.closed.insert(process);
      return;
    }

    let mut state = ProcessState::default();
    for job in queue.jobs {
      for prefix in completion_prefixes(&job.index) {
        *state.remaining.entry(prefix).or_insert(0) += 1;
      }
      state.pending.push_back(job);
    }
    self.processes.insert(process.clone(), state);
    self.admit(&process, ctx);
  }

  fn receive_job(&mut self, job: Job, ctx: &LayerContext) {
    // A lone job is treated as a queue of one
    let queue = JobQueue::new(job.owning_process.clone(), job.index.depth(), vec![job]);
    self.receive_job_queue(queue, ctx);
  }

  fn receive_result(&mut self, result: JobResult, ctx: &LayerContext) {
    self.receive_up(UpEvent::Result(result), ctx);
  }

  fn receive_completion(&mut self, completion: Completion, ctx: &LayerContext) {
    self.receive_up(UpEvent::Completion(completion), ctx);
  }

  fn receive_error(&mut self, error: JobError, ctx: &LayerContext) {
    self.receive_up(UpEvent::Error(error), ctx);
  }

  fn finished_with(&mut self, owning_process: &OwningProcess, _ctx: &LayerContext) {
    self.processes.remove(owning_process);
    self.closed.remove(owning_process);
  }
}
