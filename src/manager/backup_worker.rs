use crossbeam::channel::{bounded, select, tick, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::backup::{BackupGate, BackupJob, BackupReceipt};
use crate::buffer::BufferId;
use crate::error::BackupError;

#[derive(Debug)]
pub enum BackupMessage {
    Write(BackupJob),
    Shutdown,
}

#[derive(Debug)]
pub enum BackupResponse {
    /// The backup interval elapsed; time to ask the manager for a job
    Due,
    Written(BackupReceipt),
    Failed { id: BufferId, error: BackupError },
}

/// Background thread that paces periodic backups and writes them.
///
/// Every interval it reports [`BackupResponse::Due`]; the owner answers with
/// a job from `FileManager::prepare_backup`, which is written under the shared
/// gate and acknowledged so the owner can call `FileManager::complete_backup`.
pub struct BackupWorker {
    cmd_tx: Sender<BackupMessage>,
    resp_rx: Receiver<BackupResponse>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BackupWorker {
    pub fn new(gate: BackupGate, interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = bounded::<BackupMessage>(16);
        let (resp_tx, resp_rx) = bounded::<BackupResponse>(16);

        let handle = thread::Builder::new()
            .name("jot-backup".into())
            .spawn(move || Self::backup_worker(cmd_rx, resp_tx, gate, interval))
            .map_err(|err| warn!(error = %err, "could not start the backup thread"))
            .ok();

        Self {
            cmd_tx,
            resp_rx,
            handle,
        }
    }

    fn backup_worker(
        cmd_rx: Receiver<BackupMessage>,
        resp_tx: Sender<BackupResponse>,
        gate: BackupGate,
        interval: Duration,
    ) {
        let ticker = tick(interval);
        loop {
            select! {
                recv(cmd_rx) -> msg => match msg {
                    Ok(BackupMessage::Write(job)) => {
                        let id = job.id;
                        let response = match job.write(&gate) {
                            Ok(receipt) => BackupResponse::Written(receipt),
                            Err(error) => {
                                warn!(%id, error = %error, "backup failed");
                                BackupResponse::Failed { id, error }
                            }
                        };
                        if resp_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Ok(BackupMessage::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => {
                    // a pending Due is as good as a new one
                    let _ = resp_tx.try_send(BackupResponse::Due);
                }
            }
        }
        debug!("backup thread stopped");
    }

    pub fn submit(&self, job: BackupJob) -> Result<(), String> {
        self.cmd_tx
            .send(BackupMessage::Write(job))
            .map_err(|e| format!("Failed to send backup job: {}", e))
    }

    pub fn try_recv_response(&self) -> Option<BackupResponse> {
        self.resp_rx.try_recv().ok()
    }

    pub fn recv_response_timeout(&self, timeout: Duration) -> Option<BackupResponse> {
        self.resp_rx.recv_timeout(timeout).ok()
    }

    pub fn shutdown(mut self) {
        let _ = self.cmd_tx.send(BackupMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackupWorker {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(BackupMessage::Shutdown);
    }
}
