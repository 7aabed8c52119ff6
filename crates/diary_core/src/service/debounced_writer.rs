//! Cancelable debounced write task.
//!
//! # Responsibility
//! - Coalesce bursts of scheduled writes into the most recent one.
//! - Give teardown a single cancellation point.
//!
//! # Invariants
//! - At most one write is pending; scheduling replaces it and restarts the delay.
//! - `cancel_all` is idempotent and never terminal: later `schedule` calls work.
//! - Writes run on one timer worker thread, never concurrently with each other.
//! - A write still pending when the writer is dropped is discarded.

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Deferred durable write.
pub type WriteJob = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Schedule {
        generation: u64,
        delay: Duration,
        job: WriteJob,
    },
    Cancel,
    Flush(Sender<()>),
    Shutdown,
}

struct Pending {
    generation: u64,
    deadline: Instant,
    job: WriteJob,
}

/// Debounced writer backed by one timer worker thread.
pub struct DebouncedWriter {
    name: &'static str,
    tx: Sender<Command>,
    scheduled: AtomicU64,
    settled: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl DebouncedWriter {
    /// Starts the timer worker. `name` tags log events.
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = unbounded();
        let settled = Arc::new(AtomicU64::new(0));
        let worker_settled = Arc::clone(&settled);
        let worker = std::thread::Builder::new()
            .name(format!("debounce-{name}"))
            .spawn(move || run_worker(name, rx, worker_settled))
            .map_err(|err| {
                error!(
                    "event=debounce_start module=service status=error writer={} error={}",
                    name, err
                );
            })
            .ok();

        Self {
            name,
            tx,
            scheduled: AtomicU64::new(0),
            settled,
            worker,
        }
    }

    /// Replaces any pending write with `job`, due after `delay`.
    pub fn schedule(&self, job: WriteJob, delay: Duration) {
        if self.worker.is_none() {
            // No timer thread: degrade to a synchronous write.
            run_job(self.name, job);
            return;
        }
        let generation = self.scheduled.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .tx
            .send(Command::Schedule {
                generation,
                delay,
                job,
            })
            .is_err()
        {
            warn!(
                "event=debounce_schedule module=service status=error writer={} error_code=worker_gone",
                self.name
            );
            self.settled.store(generation, Ordering::SeqCst);
        }
    }

    /// Drops the pending write without running it.
    pub fn cancel_all(&self) {
        let _ = self.tx.send(Command::Cancel);
    }

    /// Runs the pending write now and waits for it to finish.
    ///
    /// Must not be called from inside a scheduled job.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Returns whether a scheduled write has neither run nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst) != self.settled.load(Ordering::SeqCst)
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(name: &'static str, rx: Receiver<Command>, settled: Arc<AtomicU64>) {
    let mut pending: Option<Pending> = None;

    loop {
        let deadline = pending.as_ref().map(|current| current.deadline);
        let command = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    fire(name, pending.take(), &settled);
                    continue;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        fire(name, pending.take(), &settled);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Schedule {
                generation,
                delay,
                job,
            } => {
                if pending.is_some() {
                    debug!(
                        "event=debounce_coalesce module=service status=ok writer={}",
                        name
                    );
                }
                pending = Some(Pending {
                    generation,
                    deadline: Instant::now() + delay,
                    job,
                });
            }
            Command::Cancel => {
                if let Some(dropped) = pending.take() {
                    settled.store(dropped.generation, Ordering::SeqCst);
                    debug!(
                        "event=debounce_cancel module=service status=ok writer={}",
                        name
                    );
                }
            }
            Command::Flush(ack) => {
                fire(name, pending.take(), &settled);
                let _ = ack.send(());
            }
            Command::Shutdown => {
                if let Some(dropped) = pending.take() {
                    settled.store(dropped.generation, Ordering::SeqCst);
                    warn!(
                        "event=debounce_shutdown module=service status=discarded writer={}",
                        name
                    );
                }
                break;
            }
        }
    }
}

fn fire(name: &'static str, pending: Option<Pending>, settled: &AtomicU64) {
    if let Some(current) = pending {
        run_job(name, current.job);
        settled.store(current.generation, Ordering::SeqCst);
    }
}

fn run_job(name: &'static str, job: WriteJob) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(
            "event=debounce_write module=service status=error writer={} error_code=job_panicked",
            name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::DebouncedWriter;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn job(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> Box<dyn FnOnce() + Send + 'static> {
        let log = Arc::clone(log);
        Box::new(move || log.lock().unwrap().push(label))
    }

    #[test]
    fn coalesces_to_most_recent_write() {
        let writer = DebouncedWriter::new("test");
        let log = recorder();
        writer.schedule(job(&log, "w1"), Duration::from_millis(50));
        writer.schedule(job(&log, "w2"), Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(*log.lock().unwrap(), vec!["w2"]);
        assert!(!writer.is_pending());
    }

    #[test]
    fn cancel_all_is_safe_when_idle_and_not_terminal() {
        let writer = DebouncedWriter::new("test");
        let log = recorder();
        writer.cancel_all();
        writer.cancel_all();

        writer.schedule(job(&log, "dropped"), Duration::from_millis(30));
        writer.cancel_all();
        std::thread::sleep(Duration::from_millis(120));
        assert!(log.lock().unwrap().is_empty());

        writer.schedule(job(&log, "kept"), Duration::from_millis(10));
        writer.flush();
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[test]
    fn flush_runs_pending_write_immediately() {
        let writer = DebouncedWriter::new("test");
        let log = recorder();
        writer.schedule(job(&log, "now"), Duration::from_secs(60));
        assert!(writer.is_pending());
        writer.flush();
        assert_eq!(*log.lock().unwrap(), vec!["now"]);
        assert!(!writer.is_pending());
    }

    #[test]
    fn drop_discards_pending_write() {
        let log = recorder();
        {
            let writer = DebouncedWriter::new("test");
            writer.schedule(job(&log, "lost"), Duration::from_secs(60));
        }
        assert!(log.lock().unwrap().is_empty());
    }
}
