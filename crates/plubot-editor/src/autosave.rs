use crate::persistence::Persistence;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};
use plubot_core::FlowSnapshot;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Command {
    Schedule { project_id: String, snapshot: FlowSnapshot },
    Cancel,
    Flush(Sender<()>),
}

struct Pending {
    project_id: String,
    snapshot: FlowSnapshot,
    deadline: Instant,
}

/// Debounced background writer.
///
/// Each [`AutoSaver::schedule`] replaces the pending snapshot and restarts the
/// debounce window. Snapshots carry the project they belong to, so one saver
/// follows an editor across project switches: a pending snapshot for the
/// previous project is written out before the new project's one replaces it.
/// Dropping the saver discards anything still pending and joins the worker
/// thread.
pub struct AutoSaver {
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl AutoSaver {
    pub fn spawn<F>(delay: Duration, mut write: F) -> Self
    where
        F: FnMut(&str, FlowSnapshot) + Send + 'static,
    {
        let (tx, rx) = unbounded::<Command>();
        let worker = thread::spawn(move || {
            let mut pending: Option<Pending> = None;
            let mut last_written: Option<(String, FlowSnapshot)> = None;
            let mut write_if_changed = |done: Pending, last: &mut Option<(String, FlowSnapshot)>| {
                let unchanged = last.as_ref().is_some_and(|(project_id, prev)| {
                    *project_id == done.project_id && prev.same_graph(&done.snapshot)
                });
                if unchanged {
                    tracing::trace!("Auto-save skipped, graph unchanged");
                    return;
                }
                write(&done.project_id, done.snapshot.clone());
                *last = Some((done.project_id, done.snapshot));
            };

            loop {
                let received = match &pending {
                    Some(p) => rx.recv_deadline(p.deadline),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(Command::Schedule {
                        project_id,
                        snapshot,
                    }) => {
                        if let Some(previous) = pending.take()
                            && previous.project_id != project_id
                        {
                            tracing::debug!(
                                "Project switched from {} to {}, writing pending backup",
                                previous.project_id,
                                project_id
                            );
                            write_if_changed(previous, &mut last_written);
                        }
                        pending = Some(Pending {
                            project_id,
                            snapshot,
                            deadline: Instant::now() + delay,
                        });
                    }
                    Ok(Command::Cancel) => pending = None,
                    Ok(Command::Flush(done)) => {
                        if let Some(p) = pending.take() {
                            write_if_changed(p, &mut last_written);
                        }
                        let _ = done.send(());
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if let Some(p) = pending.take() {
                            write_if_changed(p, &mut last_written);
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        if pending.is_some() {
                            tracing::debug!("Auto-saver stopped with a pending snapshot");
                        }
                        break;
                    }
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Debounced backups through `persistence`, keyed by each snapshot's project.
    pub fn persisting(delay: Duration, persistence: Persistence) -> Self {
        Self::spawn(delay, move |project_id, snapshot| {
            persistence.backup(project_id, &snapshot);
        })
    }

    pub fn schedule(&self, project_id: &str, snapshot: FlowSnapshot) {
        self.send(Command::Schedule {
            project_id: project_id.to_string(),
            snapshot,
        });
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Write the pending snapshot now and wait for the worker to finish it.
    pub fn flush(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.send(Command::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    fn send(&self, command: Command) -> bool {
        match &self.tx {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("Auto-save worker panicked");
        }
    }
}
