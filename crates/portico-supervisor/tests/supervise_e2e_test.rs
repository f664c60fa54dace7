// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the supervisor: real child processes get
//! spawned, watched, respawned and stopped over the control socket.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portico_protocol::frame::FramedStream;
use portico_protocol::pipe::{ManagerState, PipeMessage};
use portico_supervisor::{ControlServer, Supervisor, SupervisorSettings};
use tokio::net::UnixStream;

fn sleeper_script(dir: &Path) -> PathBuf {
    let path = dir.join("sleeper.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn fast_settings(managers: u32, bin: &Path, socket: &Path) -> SupervisorSettings {
    SupervisorSettings {
        managers,
        manager_bin: bin.to_path_buf(),
        socket: socket.to_path_buf(),
        poll_interval: Duration::from_millis(20),
        stale_after: Duration::from_secs(10),
        spawn_grace: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_crashed_manager_respawns_into_same_slot() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("control.sock");
    let server = ControlServer::bind(&socket).unwrap();
    // `false` exits immediately without ever dialing back: a crash.
    let supervisor = Supervisor::new(
        fast_settings(1, Path::new("false"), &socket),
        server.registry(),
    );

    supervisor.reconcile().await;
    let first = supervisor.statuses().await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].slot, 1);
    let first_pid = first[0].pid;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        supervisor.reconcile().await;
        let statuses = supervisor.statuses().await;
        if statuses.len() == 1 && statuses[0].pid != first_pid {
            assert_eq!(statuses[0].slot, 1);
            break;
        }
        assert!(Instant::now() < deadline, "crashed manager never respawned");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    supervisor.stop_all().await;
    server.close().await;
}

#[tokio::test]
async fn test_silent_manager_killed_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let script = sleeper_script(dir.path());
    let socket = dir.path().join("control.sock");
    let server = ControlServer::bind(&socket).unwrap();
    let settings = SupervisorSettings {
        stale_after: Duration::from_millis(100),
        ..fast_settings(1, &script, &socket)
    };
    let supervisor = Supervisor::new(settings, server.registry());

    supervisor.reconcile().await;
    let first_pid = supervisor.statuses().await[0].pid;

    // The sleeper never dials the control socket, so its silence clock
    // runs from the spawn.
    tokio::time::sleep(Duration::from_millis(150)).await;
    supervisor.reconcile().await;

    let statuses = supervisor.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].slot, 1);
    assert_ne!(statuses[0].pid, first_pid);

    supervisor.stop_all().await;
    server.close().await;
}

#[tokio::test]
async fn test_user_stop_retires_slot() {
    let dir = tempfile::tempdir().unwrap();
    let script = sleeper_script(dir.path());
    let socket = dir.path().join("control.sock");
    let server = ControlServer::bind(&socket).unwrap();
    let registry = server.registry();
    let supervisor = Supervisor::new(fast_settings(1, &script, &socket), registry.clone());

    supervisor.reconcile().await;
    let statuses = supervisor.statuses().await;
    assert_eq!(statuses.len(), 1);
    let pid = statuses[0].pid;

    // Stand in for the child's own link: report Running, then announce
    // an operator stop.
    let stream = UnixStream::connect(&socket).await.unwrap();
    let (_read_half, write_half) = stream.into_split();
    let mut writer = FramedStream::new(write_half);
    writer
        .send_report(&PipeMessage::new(pid, ManagerState::Running, "pool up"))
        .await
        .unwrap();
    writer
        .send_report(&PipeMessage::new(
            pid,
            ManagerState::UserStop,
            "operator stop",
        ))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while registry.last_report(pid).map(|m| m.state) != Some(ManagerState::UserStop) {
        assert!(Instant::now() < deadline, "stop report never landed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The manager would exit after announcing the stop; the sleeper
    // needs help.
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.child_count().await != 0 {
        supervisor.reconcile().await;
        assert!(Instant::now() < deadline, "stopped manager never reaped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The slot is retired: another pass spawns nothing.
    supervisor.reconcile().await;
    assert_eq!(supervisor.child_count().await, 0);

    server.close().await;
}

#[tokio::test]
async fn test_stop_all_kills_stragglers() {
    let dir = tempfile::tempdir().unwrap();
    let script = sleeper_script(dir.path());
    let socket = dir.path().join("control.sock");
    let server = ControlServer::bind(&socket).unwrap();
    let supervisor = Supervisor::new(fast_settings(2, &script, &socket), server.registry());

    supervisor.reconcile().await;
    assert_eq!(supervisor.child_count().await, 2);

    // Sleepers ignore the broadcast; the grace period runs out and they
    // get killed.
    supervisor.stop_all().await;
    assert_eq!(supervisor.child_count().await, 0);

    server.close().await;
}

#[tokio::test]
async fn test_run_loop_converges_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let script = sleeper_script(dir.path());
    let socket = dir.path().join("control.sock");
    let server = ControlServer::bind(&socket).unwrap();
    let supervisor = Supervisor::new(fast_settings(2, &script, &socket), server.registry());

    let loop_task = tokio::spawn(Arc::clone(&supervisor).run());

    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.child_count().await != 2 {
        assert!(Instant::now() < deadline, "pool never came up");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    supervisor.shutdown_handle().notify_one();
    tokio::time::timeout(Duration::from_secs(2), loop_task)
        .await
        .expect("run loop did not stop")
        .unwrap();

    supervisor.stop_all().await;
    assert_eq!(supervisor.child_count().await, 0);
    server.close().await;
}
