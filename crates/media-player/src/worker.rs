//! Command worker for work that must not run on the notification thread.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Jobs accepted by the command worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Seek back to the start for another play of the current item.
    Rewind,
    /// Surface end-of-stream after `delay` unless `generation` went stale.
    DelayedEos { generation: u64, delay: Duration },
    /// The resource arbiter took our output away.
    PauseForRevoke,
    Shutdown,
}

/// What the worker hands back to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Rewind,
    DeliverEos { generation: u64 },
    PauseForRevoke,
}

/// Handle for sending jobs to the command worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<Job>,
}

impl WorkerHandle {
    pub fn submit(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!(?job, "command worker gone; job dropped");
        }
    }
}

/// Job channel for the command worker; the handle can be shared before the worker runs.
pub fn command_channel() -> (WorkerHandle, Receiver<Job>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (WorkerHandle { tx }, rx)
}

/// Spawn the command worker thread draining `rx`.
pub fn spawn_command_worker(
    rx: Receiver<Job>,
    mut run: impl FnMut(Task) + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("command-worker".to_string())
        .spawn(move || worker_main(rx, &mut run))
}

/// Main loop for the command worker.
fn worker_main(rx: Receiver<Job>, run: &mut dyn FnMut(Task)) {
    let mut eos_due: Option<(Instant, u64)> = None;

    loop {
        let job = match eos_due {
            Some((deadline, generation)) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(job) => job,
                    Err(RecvTimeoutError::Timeout) => {
                        eos_due = None;
                        run(Task::DeliverEos { generation });
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        match job {
            Job::Rewind => run(Task::Rewind),
            Job::PauseForRevoke => run(Task::PauseForRevoke),
            Job::DelayedEos { generation, delay } => {
                if delay.is_zero() {
                    run(Task::DeliverEos { generation });
                } else {
                    eos_due = Some((Instant::now() + delay, generation));
                }
            }
            Job::Shutdown => break,
        }
    }
    tracing::debug!("command worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_jobs_in_order_and_delays_eos() {
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let (handle, rx) = command_channel();
        let join = spawn_command_worker(rx, move |task| {
            let _ = seen_tx.send((task, Instant::now()));
        })
        .unwrap();

        let submitted = Instant::now();
        handle.submit(Job::DelayedEos {
            generation: 4,
            delay: Duration::from_millis(50),
        });
        handle.submit(Job::Rewind);

        let (first, _) = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, Task::Rewind);
        let (second, at) = seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second, Task::DeliverEos { generation: 4 });
        assert!(at.duration_since(submitted) >= Duration::from_millis(50));

        handle.submit(Job::Shutdown);
        join.join().unwrap();
    }

    #[test]
    fn immediate_eos_runs_inline() {
        let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
        let (handle, rx) = command_channel();
        let join = spawn_command_worker(rx, move |task| {
            let _ = seen_tx.send(task);
        })
        .unwrap();
        handle.submit(Job::DelayedEos {
            generation: 1,
            delay: Duration::ZERO,
        });
        handle.submit(Job::PauseForRevoke);
        assert_eq!(
            seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Task::DeliverEos { generation: 1 }
        );
        assert_eq!(
            seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Task::PauseForRevoke
        );
        drop(handle);
        join.join().unwrap();
    }
}
