// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control socket server: accepts manager links, collects their state
//! reports and relays commands back down.
//!
//! Reports deliberately outlive the connection that carried them. A
//! manager that announces `ErrorStop` and exits tears its link down
//! before the supervisor reaps the process, and the reconcile pass still
//! needs that final state to classify the exit. Entries are only dropped
//! through [`Registry::forget`], once the exit has been processed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use portico_protocol::frame::{FrameError, FramedStream, MessageType};
use portico_protocol::pipe::{ManagerState, PipeMessage};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SupervisorError;

pub(crate) fn lock_std<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct ReportEntry {
    message: PipeMessage,
    at: Instant,
}

/// What the supervisor knows about its managers, keyed by pid: the last
/// report each one sent and a command channel to each live link.
#[derive(Default)]
pub struct Registry {
    reports: Mutex<HashMap<u32, ReportEntry>>,
    links: Mutex<HashMap<u32, mpsc::Sender<PipeMessage>>>,
}

impl Registry {
    /// Last state report received from this pid, if any.
    pub fn last_report(&self, pid: u32) -> Option<PipeMessage> {
        lock_std(&self.reports).get(&pid).map(|e| e.message.clone())
    }

    /// Time since this pid last reported.
    pub fn report_age(&self, pid: u32) -> Option<Duration> {
        lock_std(&self.reports).get(&pid).map(|e| e.at.elapsed())
    }

    /// Whether this pid currently has a live control link.
    pub fn connected(&self, pid: u32) -> bool {
        lock_std(&self.links).contains_key(&pid)
    }

    /// Drop everything known about a pid. Called once its exit has been
    /// processed.
    pub fn forget(&self, pid: u32) {
        lock_std(&self.reports).remove(&pid);
        lock_std(&self.links).remove(&pid);
    }

    /// Send a command to one manager. Returns false when the pid has no
    /// live link or the link is gone.
    pub async fn command(&self, pid: u32, state: ManagerState, description: &str) -> bool {
        let sender = match lock_std(&self.links).get(&pid) {
            Some(sender) => sender.clone(),
            None => return false,
        };
        let msg = PipeMessage::new(std::process::id(), state, description);
        sender.send(msg).await.is_ok()
    }

    /// Send a command to every linked manager. Returns how many links
    /// accepted it.
    pub async fn broadcast(&self, state: ManagerState, description: &str) -> usize {
        let senders: Vec<_> = lock_std(&self.links).values().cloned().collect();
        let mut reached = 0;
        for sender in senders {
            let msg = PipeMessage::new(std::process::id(), state, description);
            if sender.send(msg).await.is_ok() {
                reached += 1;
            }
        }
        reached
    }

    fn record(&self, message: PipeMessage) {
        lock_std(&self.reports).insert(
            message.pid,
            ReportEntry {
                message,
                at: Instant::now(),
            },
        );
    }

    fn attach(&self, pid: u32, sender: mpsc::Sender<PipeMessage>) {
        lock_std(&self.links).insert(pid, sender);
    }

    fn detach(&self, pid: u32, sender: &mpsc::Sender<PipeMessage>) {
        let mut links = lock_std(&self.links);
        // A redial may already have replaced the entry with a new link.
        if links.get(&pid).is_some_and(|s| s.same_channel(sender)) {
            links.remove(&pid);
        }
    }
}

/// Unix socket listener the managers dial back to.
pub struct ControlServer {
    registry: Arc<Registry>,
    accept_task: JoinHandle<()>,
    path: PathBuf,
}

impl ControlServer {
    /// Bind the control socket and start accepting manager links.
    pub fn bind(path: &Path) -> Result<Self, SupervisorError> {
        // A socket file left over from an earlier run would fail the bind.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(|source| SupervisorError::Bind {
            path: path.to_path_buf(),
            source,
        })?;

        let registry = Arc::new(Registry::default());
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&registry)));

        Ok(Self {
            registry,
            accept_task,
            path: path.to_path_buf(),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Stop accepting links and remove the socket file.
    pub async fn close(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn accept_loop(listener: UnixListener, registry: Arc<Registry>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(serve_link(stream, Arc::clone(&registry)));
            }
            Err(err) => {
                warn!(error = %err, "Control socket accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// One manager link: read reports until the stream ends, write commands
/// queued for this pid.
///
/// The link learns which pid it belongs to from the first report, so a
/// command can only be relayed to a manager that has reported at least
/// once.
async fn serve_link(stream: UnixStream, registry: Arc<Registry>) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedStream::new(read_half);
    let (command_tx, command_rx) = mpsc::channel::<PipeMessage>(8);
    let writer = tokio::spawn(write_commands(FramedStream::new(write_half), command_rx));

    let mut pid = None;
    loop {
        match reader.read_frame().await {
            Ok(frame) if frame.message_type == MessageType::StateReport => {
                let msg: PipeMessage = match frame.decode() {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "Undecodable report from manager");
                        continue;
                    }
                };
                if pid.is_none() {
                    pid = Some(msg.pid);
                    registry.attach(msg.pid, command_tx.clone());
                    debug!(pid = msg.pid, "Manager link established");
                }
                registry.record(msg);
            }
            Ok(frame) => {
                warn!(message_type = ?frame.message_type, "Unexpected frame from manager");
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => {
                warn!(error = %err, "Manager link failed");
                break;
            }
        }
    }

    // Detach before dropping our sender: the registry holds a clone and
    // would keep the writer task alive past the link.
    if let Some(pid) = pid {
        registry.detach(pid, &command_tx);
    }
    drop(command_tx);
    let _ = writer.await;
}

async fn write_commands(
    mut writer: FramedStream<OwnedWriteHalf>,
    mut commands: mpsc::Receiver<PipeMessage>,
) {
    while let Some(msg) = commands.recv().await {
        if let Err(err) = writer.send_command(&msg).await {
            warn!(error = %err, "Cannot send command to manager");
            break;
        }
    }
}
