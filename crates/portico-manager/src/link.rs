// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager side of the supervisor control socket.
//!
//! Reports lifecycle changes and heartbeats upward, applies commanded
//! stop modes downward, and watches for an orphaned state: a vanished
//! supervisor process or a dead socket both end this manager, because a
//! child that nobody supervises must not keep consuming.
//!
//! Frames are read by a dedicated task. `read_frame` is not safe to
//! cancel mid-frame, so it never sits in a `select!` arm directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use portico_protocol::{FrameError, FramedStream, ManagerState, MessageType, PipeMessage};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::manager::Manager;

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub socket: PathBuf,
    pub heartbeat: Duration,
    /// Supervisor pid for orphan detection; absent when unknown.
    pub parent_pid: Option<u32>,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl LinkSettings {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            heartbeat: Duration::from_millis(5000),
            parent_pid: None,
            connect_attempts: 5,
            connect_backoff: Duration::from_millis(500),
        }
    }
}

/// Run the control link until the manager leaves `Running`. The final
/// state report is sent before this returns, so the supervisor always
/// learns why the process is about to exit.
pub async fn run_link(manager: Arc<Manager>, settings: LinkSettings) {
    let Some(stream) = connect(&settings).await else {
        warn!(socket = %settings.socket.display(), "Control socket unreachable, stopping");
        manager.request_exit(ManagerState::SupervisorStop, "control socket unreachable");
        return;
    };
    info!(socket = %settings.socket.display(), "Control link established");

    let (read_half, write_half) = stream.into_split();
    let (command_tx, mut commands) = mpsc::channel::<PipeMessage>(8);
    let reader = tokio::spawn(read_commands(read_half, command_tx));

    let mut writer = FramedStream::new(write_half);
    let mut lifecycle = manager.lifecycle();
    let pid = std::process::id();

    // The first report maps this pid to its current state on the
    // supervisor side
    let initial = manager.state();
    if send(&mut writer, pid, initial, "pool starting").await.is_err() {
        manager.request_exit(ManagerState::SupervisorStop, "control socket write failed");
        reader.abort();
        return;
    }
    if initial != ManagerState::Running {
        // Exit requested before the link came up; the report above was
        // already the final one
        reader.abort();
        return;
    }

    loop {
        tokio::select! {
            biased;

            changed = lifecycle.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *lifecycle.borrow_and_update();
                let reason = manager.exit_reason();
                let description = if reason.is_empty() { state.to_string() } else { reason };
                let _ = send(&mut writer, pid, state, description).await;
                if state != ManagerState::Running {
                    break;
                }
            }

            command = commands.recv() => match command {
                Some(msg) => {
                    info!(state = %msg.state, description = %msg.description, "Supervisor command");
                    match msg.state {
                        ManagerState::SupervisorStop
                        | ManagerState::UserStop
                        | ManagerState::UserRestart
                        | ManagerState::ErrorStop => {
                            manager.request_exit(msg.state, msg.description);
                        }
                        other => warn!(state = %other, "Ignoring non-stop command"),
                    }
                }
                None => {
                    warn!("Control socket closed by supervisor");
                    manager.request_exit(ManagerState::SupervisorStop, "control socket closed");
                }
            },

            _ = sleep(settings.heartbeat) => {
                if let Some(parent) = settings.parent_pid
                    && !process_alive(parent)
                {
                    warn!(parent_pid = parent, "Supervisor process is gone");
                    manager.request_exit(ManagerState::SupervisorStop, "supervisor process gone");
                    continue;
                }
                if send(&mut writer, pid, manager.state(), "heartbeat").await.is_err() {
                    warn!("Control socket write failed");
                    manager.request_exit(ManagerState::SupervisorStop, "control socket write failed");
                }
            }
        }
    }

    reader.abort();
    info!("Control link closed");
}

async fn connect(settings: &LinkSettings) -> Option<UnixStream> {
    for attempt in 1..=settings.connect_attempts {
        match UnixStream::connect(&settings.socket).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                debug!(attempt, error = %e, "Control socket connect failed");
                sleep(settings.connect_backoff).await;
            }
        }
    }
    None
}

async fn read_commands(read_half: OwnedReadHalf, commands: mpsc::Sender<PipeMessage>) {
    let mut reader = FramedStream::new(read_half);
    loop {
        match reader.read_frame().await {
            Ok(frame) if frame.message_type == MessageType::Command => {
                match frame.decode::<PipeMessage>() {
                    Ok(msg) => {
                        if commands.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Undecodable command frame"),
                }
            }
            Ok(frame) => {
                debug!(message_type = ?frame.message_type, "Ignoring non-command frame");
            }
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => {
                warn!(error = %e, "Control socket read failed");
                break;
            }
        }
    }
}

async fn send(
    writer: &mut FramedStream<OwnedWriteHalf>,
    pid: u32,
    state: ManagerState,
    description: impl Into<String>,
) -> Result<(), FrameError> {
    writer
        .send_report(&PipeMessage::new(pid, state, description))
        .await
}

fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerSettings;
    use portico_backend::{ExchangeDir, MemoryJournal, MockBackend};
    use portico_queue::InMemoryBroker;
    use portico_schema::SchemaModel;
    use serde_json::json;
    use tokio::net::UnixListener;

    struct Fixture {
        manager: Arc<Manager>,
        _exchange: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let exchange = tempfile::tempdir().unwrap();
        let model = Arc::new(
            SchemaModel::from_value(json!({
                "methods": {"ping": {"object": "EchoService"}},
                "enums": {}
            }))
            .unwrap(),
        );
        let manager = Manager::new(
            ManagerSettings::default(),
            Arc::new(InMemoryBroker::new()),
            Arc::new(MockBackend::new()),
            model,
            ExchangeDir::new(exchange.path()),
            Arc::new(MemoryJournal::new()),
        );
        Fixture {
            manager,
            _exchange: exchange,
        }
    }

    fn fast_settings(socket: impl Into<PathBuf>) -> LinkSettings {
        LinkSettings {
            heartbeat: Duration::from_millis(5000),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(10),
            ..LinkSettings::new(socket)
        }
    }

    async fn read_report(stream: &mut FramedStream<UnixStream>) -> PipeMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), stream.read_frame())
            .await
            .expect("no report within deadline")
            .unwrap();
        assert_eq!(frame.message_type, MessageType::StateReport);
        frame.decode().unwrap()
    }

    #[tokio::test]
    async fn test_link_reports_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let fx = fixture();

        let link = tokio::spawn(run_link(fx.manager.clone(), fast_settings(&socket)));
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = FramedStream::new(stream);

        let first = read_report(&mut stream).await;
        assert_eq!(first.state, ManagerState::Running);
        assert_eq!(first.pid, std::process::id());

        fx.manager.request_exit(ManagerState::UserStop, "operator stop");
        let last = read_report(&mut stream).await;
        assert_eq!(last.state, ManagerState::UserStop);
        assert_eq!(last.description, "operator stop");

        tokio::time::timeout(Duration::from_secs(2), link)
            .await
            .expect("link never finished")
            .unwrap();
    }

    #[tokio::test]
    async fn test_link_applies_commanded_stop() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let fx = fixture();

        let link = tokio::spawn(run_link(fx.manager.clone(), fast_settings(&socket)));
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = FramedStream::new(stream);
        assert_eq!(read_report(&mut stream).await.state, ManagerState::Running);

        stream
            .send_command(&PipeMessage::new(
                std::process::id(),
                ManagerState::SupervisorStop,
                "shutting the tree down",
            ))
            .await
            .unwrap();

        let last = read_report(&mut stream).await;
        assert_eq!(last.state, ManagerState::SupervisorStop);
        assert_eq!(last.description, "shutting the tree down");
        assert_eq!(fx.manager.state(), ManagerState::SupervisorStop);

        tokio::time::timeout(Duration::from_secs(2), link)
            .await
            .expect("link never finished")
            .unwrap();
    }

    #[tokio::test]
    async fn test_link_unreachable_socket_stops_manager() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("missing.sock");
        let fx = fixture();

        run_link(fx.manager.clone(), fast_settings(&socket)).await;
        assert_eq!(fx.manager.state(), ManagerState::SupervisorStop);
        assert_eq!(fx.manager.exit_reason(), "control socket unreachable");
    }

    #[tokio::test]
    async fn test_link_detects_dead_parent() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let fx = fixture();

        let mut settings = fast_settings(&socket);
        settings.heartbeat = Duration::from_millis(20);
        // No /proc entry can exist for the pid ceiling
        settings.parent_pid = Some(u32::MAX);

        let link = tokio::spawn(run_link(fx.manager.clone(), settings));
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = FramedStream::new(stream);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let report = read_report(&mut stream).await;
            if report.state == ManagerState::SupervisorStop {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "orphan never detected");
        }
        assert_eq!(fx.manager.exit_reason(), "supervisor process gone");

        tokio::time::timeout(Duration::from_secs(2), link)
            .await
            .expect("link never finished")
            .unwrap();
    }

    #[tokio::test]
    async fn test_link_closed_socket_stops_manager() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let fx = fixture();

        let link = tokio::spawn(run_link(fx.manager.clone(), fast_settings(&socket)));
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = FramedStream::new(stream);
        assert_eq!(read_report(&mut stream).await.state, ManagerState::Running);

        // Supervisor dies without a command
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), link)
            .await
            .expect("link never finished")
            .unwrap();
        assert_eq!(fx.manager.state(), ManagerState::SupervisorStop);
        assert_eq!(fx.manager.exit_reason(), "control socket closed");
    }
}
