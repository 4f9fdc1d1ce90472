//! The single timeline on which all lifecycle work runs.
//!
//! Register, update and bootstrap share the registration state and must never
//! overlap, so they are all funnelled through one ordered queue served by one
//! worker. Tasks are single-shot: a renewal is scheduled again explicitly once
//! the previous cycle completed.
//!
//! Two implementations are provided:
//!
//!  * [`SingleWorker`] owns a background thread and real time,
//!  * [`ManualScheduler`] keeps a virtual clock and only runs tasks when told
//!    to, which makes lifecycle sequences deterministic in tests.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, trace, warn};

// =============================================================================
// Public Interface
// =============================================================================

/// A unit of work for the timeline.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle on a scheduled task, used to cancel it before it runs.
///
/// Cancelling never interrupts a task that already started.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}
impl TaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancelled() -> Self {
        let handle = TaskHandle::default();
        handle.cancel();
        handle
    }
}

/// An ordered, single-worker task queue.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Run `task` as soon as the worker is free.
    fn submit(&self, task: Task) -> TaskHandle {
        self.schedule(Duration::from_secs(0), task)
    }

    /// Stop accepting tasks and drop the pending ones. Idempotent.
    fn shutdown(&self);
}

// -----------------------------------------------------------------------------
// Background worker
// -----------------------------------------------------------------------------

/// A [`Scheduler`] backed by one dedicated thread.
pub struct SingleWorker {
    commands: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}
impl SingleWorker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("lwm2m-lifecycle".into())
            .spawn(move || worker_loop(rx))
            .map_err(|e| error!("cannot start the lifecycle worker: {}", e))
            .ok();
        SingleWorker {
            commands: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
        }
    }
}
impl Default for SingleWorker {
    fn default() -> Self {
        Self::new()
    }
}
impl Scheduler for SingleWorker {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::default();
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or_else(|| {
            warn!("delay {:?} out of range, clamped", delay);
            now.checked_add(FAR_FUTURE).unwrap_or(now)
        });
        let scheduled = Scheduled {
            deadline,
            seq: 0,
            task,
            handle: handle.clone(),
        };
        let sent = match self.commands.lock() {
            Ok(commands) => commands
                .as_ref()
                .map_or(false, |tx| tx.send(Command::Schedule(scheduled)).is_ok()),
            Err(_) => false,
        };
        if sent {
            handle
        } else {
            warn!("lifecycle worker is stopped, task dropped");
            TaskHandle::cancelled()
        }
    }

    fn shutdown(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            if let Some(tx) = commands.take() {
                let _ = tx.send(Command::Shutdown);
            }
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            // A task may shut the timeline down from the worker itself.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
impl Drop for SingleWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// -----------------------------------------------------------------------------
// Manual scheduler
// -----------------------------------------------------------------------------

/// A [`Scheduler`] with a virtual clock, driven by explicit calls to
/// [`run_until_idle`](ManualScheduler::run_until_idle) and
/// [`advance`](ManualScheduler::advance). Tasks run on the calling thread.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<ManualQueue>,
}
impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.queue.lock().map(|q| q.now).unwrap_or_default()
    }

    /// Delays, relative to now, of the tasks still waiting to run, soonest
    /// first. Cancelled tasks are not listed.
    pub fn pending(&self) -> Vec<Duration> {
        let queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(_) => return Vec::new(),
        };
        let mut delays: Vec<Duration> = queue
            .tasks
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| t.due.checked_sub(queue.now).unwrap_or_default())
            .collect();
        delays.sort();
        delays
    }

    /// Run every task that is due now, including tasks they submit. Returns
    /// the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        self.advance(Duration::from_secs(0))
    }

    /// Move the clock forward by `by`, running due tasks in deadline order
    /// with the clock set to each task's deadline. Returns the number of tasks
    /// run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;
        while let Some(task) = self.next_due(target) {
            run_guarded(task);
            ran += 1;
        }
        if let Ok(mut queue) = self.queue.lock() {
            if queue.now < target {
                queue.now = target;
            }
        }
        ran
    }

    fn next_due(&self, target: Duration) -> Option<Task> {
        let mut queue = self.queue.lock().ok()?;
        queue.tasks.retain(|t| !t.handle.is_cancelled());
        let next = queue
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(index, _)| index)?;
        let task = queue.tasks.swap_remove(next);
        if task.due > queue.now {
            queue.now = task.due;
        }
        Some(task.task)
    }
}
impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(_) => return TaskHandle::cancelled(),
        };
        if queue.shut_down {
            return TaskHandle::cancelled();
        }
        let handle = TaskHandle::default();
        let due = queue.now.checked_add(delay).unwrap_or(Duration::MAX);
        queue.seq += 1;
        let seq = queue.seq;
        queue.tasks.push(ManualTask {
            due,
            seq,
            task,
            handle: handle.clone(),
        });
        handle
    }

    fn shutdown(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.shut_down = true;
            queue.tasks.clear();
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Deadline used for delays the clock cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

enum Command {
    Schedule(Scheduled),
    Shutdown,
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}
// Reversed so that the `BinaryHeap` pops the earliest deadline first, FIFO
// among equal deadlines.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for Scheduled {}

fn worker_loop(rx: Receiver<Command>) {
    debug!("lifecycle worker started");
    let mut queue: BinaryHeap<Scheduled> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        while queue
            .peek()
            .map_or(false, |next| next.deadline <= Instant::now())
        {
            if let Some(scheduled) = queue.pop() {
                if scheduled.handle.is_cancelled() {
                    trace!("skipping cancelled task");
                } else {
                    run_guarded(scheduled.task);
                }
            }
        }

        let command = match queue.peek() {
            Some(next) => {
                let wait = next.deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Schedule(mut scheduled) => {
                seq += 1;
                scheduled.seq = seq;
                queue.push(scheduled);
            }
            Command::Shutdown => break,
        }
    }
    debug!("lifecycle worker stopped, {} task(s) dropped", queue.len());
}

/// A panicking task must not take the timeline down with it.
fn run_guarded(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        error!("lifecycle task panicked");
    }
}

struct ManualTask {
    due: Duration,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}

#[derive(Default)]
struct ManualQueue {
    now: Duration,
    seq: u64,
    tasks: Vec<ManualTask>,
    shut_down: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |n: u32| -> Task {
            let sink = sink.clone();
            Box::new(move || sink.lock().unwrap().push(n))
        };
        (log, make)
    }

    #[test]
    fn manual_runs_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();
        scheduler.schedule(Duration::from_secs(5), task(5));
        scheduler.schedule(Duration::from_secs(1), task(1));
        scheduler.submit(task(0));

        assert_eq!(scheduler.run_until_idle(), 1);
        assert_eq!(
            scheduler.pending(),
            vec![Duration::from_secs(1), Duration::from_secs(5)]
        );
        assert_eq!(scheduler.advance(Duration::from_secs(10)), 2);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 5]);
        assert_eq!(scheduler.now(), Duration::from_secs(10));
    }

    #[test]
    fn manual_cancelled_task_never_runs() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();
        let handle = scheduler.schedule(Duration::from_secs(1), task(1));
        handle.cancel();
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.advance(Duration::from_secs(2)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn manual_tasks_can_reschedule() {
        let scheduler = Arc::new(ManualScheduler::new());
        let (log, task) = recorder();
        let inner = scheduler.clone();
        let follow_up = task(2);
        scheduler.submit(Box::new(move || {
            inner.schedule(Duration::from_secs(3), follow_up);
        }));
        scheduler.run_until_idle();
        assert_eq!(scheduler.pending(), vec![Duration::from_secs(3)]);
        scheduler.advance(Duration::from_secs(3));
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn manual_out_of_range_delay() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();
        scheduler.advance(Duration::from_secs(1));
        scheduler.schedule(Duration::MAX, task(1));
        assert_eq!(scheduler.advance(Duration::from_secs(3600)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn manual_shutdown_drops_tasks() {
        let scheduler = ManualScheduler::new();
        let (_, task) = recorder();
        scheduler.schedule(Duration::from_secs(1), task(1));
        scheduler.shutdown();
        assert!(scheduler.pending().is_empty());
        assert!(scheduler.submit(task(2)).is_cancelled());
    }

    #[test]
    fn worker_runs_tasks_in_order() {
        let worker = SingleWorker::new();
        let (tx, rx) = channel();
        for n in 0..3 {
            let tx = tx.clone();
            worker.submit(Box::new(move || tx.send(n).unwrap()));
        }
        let received: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[test]
    fn worker_honours_delay_and_cancel() {
        let worker = SingleWorker::new();
        let (tx, rx) = channel();
        let cancelled_tx = tx.clone();
        let handle = worker.schedule(
            Duration::from_millis(20),
            Box::new(move || cancelled_tx.send("cancelled").unwrap()),
        );
        handle.cancel();
        let start = Instant::now();
        worker.schedule(
            Duration::from_millis(50),
            Box::new(move || tx.send("delayed").unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "delayed");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn worker_clamps_out_of_range_delay() {
        let worker = SingleWorker::new();
        let (tx, rx) = channel();
        let far = worker.schedule(Duration::from_secs(u64::MAX), Box::new(|| {}));
        assert!(!far.is_cancelled());
        worker.submit(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn worker_survives_panicking_task() {
        let worker = SingleWorker::new();
        let (tx, rx) = channel();
        worker.submit(Box::new(|| panic!("boom")));
        worker.submit(Box::new(move || tx.send(()).unwrap()));
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn worker_rejects_after_shutdown() {
        let worker = SingleWorker::new();
        worker.shutdown();
        assert!(worker.submit(Box::new(|| {})).is_cancelled());
    }
}
