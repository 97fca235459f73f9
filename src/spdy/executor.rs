//! Stream task execution
//!
//! Worker tasks run outside the session loop. The session asks the
//! [`StreamTaskFactory`] for a task per accepted stream and hands it to an
//! [`Executor`]. Exactly one of `run` or `cancel` is invoked per task,
//! never both, never twice: a popped task is run once, and `stop` cancels
//! only tasks still queued.
//!
//! Two implementations are provided: [`InlineExecutor`] runs tasks on the
//! caller's thread under test control, and [`ThreadPoolExecutor`] is the
//! production pool.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::stream::StreamHandle;

/// A unit of work bound to one stream
pub trait StreamTask: Send {
    /// Perform the stream's work. Called at most once.
    fn run(&mut self);

    /// Give up without running. Called at most once, only if `run` never
    /// was.
    fn cancel(&mut self);
}

/// Produces the worker task for a newly accepted stream
pub trait StreamTaskFactory {
    /// Create the task that will serve `stream`
    fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask>;
}

/// Schedules stream tasks for execution
pub trait Executor {
    /// Submit a task at the given stream priority (0 = highest)
    fn add_task(&self, task: Box<dyn StreamTask>, priority: u8);

    /// Stop accepting tasks and cancel everything still queued
    fn stop(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wraps a factory task so a worker panic surfaces as a stream failure
/// instead of tearing down the executor; the session answers it with
/// RST_STREAM(INTERNAL_ERROR).
pub(crate) struct PanicGuardTask {
    task: Box<dyn StreamTask>,
    stream: StreamHandle,
}

impl PanicGuardTask {
    pub fn new(task: Box<dyn StreamTask>, stream: StreamHandle) -> Self {
        PanicGuardTask { task, stream }
    }
}

impl StreamTask for PanicGuardTask {
    fn run(&mut self) {
        if catch_unwind(AssertUnwindSafe(|| self.task.run())).is_err() {
            log::warn!("worker for stream {} panicked", self.stream.stream_id());
            self.stream.fail();
        }
    }

    fn cancel(&mut self) {
        self.task.cancel();
    }
}

struct InlineState {
    tasks: VecDeque<Box<dyn StreamTask>>,
    run_on_add: bool,
    stopped: bool,
}

/// An executor that runs tasks on the calling thread, either as they are
/// added or when told to. Deterministic, for tests and single-threaded
/// embeddings.
pub struct InlineExecutor {
    state: Mutex<InlineState>,
}

impl InlineExecutor {
    /// Create an executor that queues tasks until [`InlineExecutor::run_all`]
    pub fn new() -> Self {
        InlineExecutor {
            state: Mutex::new(InlineState {
                tasks: VecDeque::new(),
                run_on_add: false,
                stopped: false,
            }),
        }
    }

    /// Run tasks immediately inside `add_task` when set
    pub fn set_run_on_add(&self, run: bool) {
        lock(&self.state).run_on_add = run;
    }

    /// Run the oldest queued task, if any
    pub fn run_one(&self) {
        let task = lock(&self.state).tasks.pop_front();
        if let Some(mut task) = task {
            task.run();
        }
    }

    /// Run every queued task in order
    pub fn run_all(&self) {
        loop {
            let task = lock(&self.state).tasks.pop_front();
            match task {
                Some(mut task) => task.run(),
                None => break,
            }
        }
    }

    /// Whether `stop` has been called
    pub fn stopped(&self) -> bool {
        lock(&self.state).stopped
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for InlineExecutor {
    fn add_task(&self, task: Box<dyn StreamTask>, _priority: u8) {
        let mut task = task;
        let run_now = {
            let mut state = lock(&self.state);
            if state.stopped {
                task.cancel();
                return;
            }
            if state.run_on_add {
                true
            } else {
                state.tasks.push_back(task);
                return;
            }
        };
        if run_now {
            task.run();
        }
    }

    fn stop(&self) {
        let drained: Vec<_> = {
            let mut state = lock(&self.state);
            state.stopped = true;
            state.tasks.drain(..).collect()
        };
        for mut task in drained {
            task.cancel();
        }
    }
}

struct QueuedTask {
    priority: u8,
    seq: u64,
    task: Box<dyn StreamTask>,
}

struct PoolState {
    queue: VecDeque<QueuedTask>,
    next_seq: u64,
    stopped: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Fixed-size thread pool executor
///
/// Tasks are picked by priority, FIFO within a priority. `stop` cancels
/// queued tasks, wakes the workers and joins them; running tasks are
/// expected to return promptly once their stream is reset.
pub struct ThreadPoolExecutor {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Start a pool with the given number of worker threads
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                next_seq: 0,
                stopped: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        ThreadPoolExecutor {
            shared,
            workers: Mutex::new(workers),
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let mut task = {
            let mut state = lock(&shared.state);
            loop {
                if state.stopped {
                    return;
                }
                // Lowest (priority, seq) pair wins.
                let best = state
                    .queue
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, t)| (t.priority, t.seq))
                    .map(|(i, _)| i);
                match best {
                    Some(i) => {
                        break state
                            .queue
                            .remove(i)
                            .map(|t| t.task)
                            .unwrap_or_else(|| unreachable!("index from enumerate"));
                    }
                    None => {
                        state = shared
                            .available
                            .wait(state)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                }
            }
        };
        task.run();
    }
}

impl Executor for ThreadPoolExecutor {
    fn add_task(&self, task: Box<dyn StreamTask>, priority: u8) {
        let mut task = task;
        {
            let mut state = lock(&self.shared.state);
            if !state.stopped {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push_back(QueuedTask {
                    priority,
                    seq,
                    task,
                });
                drop(state);
                self.shared.available.notify_one();
                return;
            }
        }
        task.cancel();
    }

    fn stop(&self) {
        let drained: Vec<_> = {
            let mut state = lock(&self.shared.state);
            if state.stopped {
                Vec::new()
            } else {
                state.stopped = true;
                state.queue.drain(..).map(|t| t.task).collect()
            }
        };
        for mut task in drained {
            task.cancel();
        }
        self.shared.available.notify_all();

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
