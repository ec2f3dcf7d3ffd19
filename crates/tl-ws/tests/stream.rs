use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tl_driver::AgentDriver;
use tl_pty::session::SpawnOptions;
use tl_pty::PtyManager;
use tl_ws::{Attachment, ClientFrame, ServerFrame, WsService};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn spawn_opts(dir: &tempfile::TempDir, id: &str, command: &str) -> SpawnOptions {
    SpawnOptions {
        session_id: id.to_string(),
        command: command.to_string(),
        workdir: None,
        env: HashMap::new(),
        log_file_path: dir.path().join(format!("{id}.cast")),
        rows: 24,
        cols: 80,
        output: None,
        on_exit: None,
    }
}

async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("attachment queue closed")
}

async fn collect_stdout_until(rx: &mut mpsc::Receiver<ServerFrame>, needle: &str) -> String {
    let mut seen = String::new();
    loop {
        match recv_frame(rx).await {
            ServerFrame::Stdout { data } => {
                seen.push_str(&data);
                if seen.contains(needle) {
                    return seen;
                }
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn live_output_reaches_attachment_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));

    let process = service
        .attach_session(spawn_opts(&dir, "live-1", "/bin/cat"), None)
        .unwrap();

    let hub = service.hub_manager().get_or_create("live-1");
    let (attachment, mut rx) = Attachment::new();
    service.send_history(&attachment, &process);
    hub.register(Arc::clone(&attachment));

    process.write(b"echo-me\n").unwrap();
    let seen = collect_stdout_until(&mut rx, "echo-me").await;
    assert!(seen.contains("echo-me"));

    process.close().unwrap();
}

#[tokio::test]
async fn exit_emits_final_status_frame() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    let (exit_tx, exit_rx) = std::sync::mpsc::channel();

    // Register the listener before the child can exit.
    let hub = service.hub_manager().get_or_create("exit-1");
    let (attachment, mut rx) = Attachment::new();
    hub.register(attachment);

    let _process = service
        .attach_session(
            spawn_opts(&dir, "exit-1", "/bin/echo done"),
            Some(Box::new(move |code, err| {
                exit_tx.send((code, err.is_some())).unwrap();
            })),
        )
        .unwrap();

    let (code, failed) = exit_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(code, 0);
    assert!(!failed);

    // The status frame lands after any remaining stdout frames.
    loop {
        match recv_frame(&mut rx).await {
            ServerFrame::Status { state, code } => {
                assert_eq!(state, "exited");
                assert_eq!(code, Some(0));
                break;
            }
            ServerFrame::Stdout { .. } | ServerFrame::History { .. } => {}
            other => panic!("unexpected frame before status: {other:?}"),
        }
    }
}

#[tokio::test]
async fn reattachment_gets_history_first() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));

    let process = service
        .attach_session(spawn_opts(&dir, "hist-1", "/bin/cat"), None)
        .unwrap();
    let hub = service.hub_manager().get_or_create("hist-1");

    // First client types, then disconnects.
    let (first, mut first_rx) = Attachment::new();
    hub.register(Arc::clone(&first));
    process.write(b"A\n").unwrap();
    collect_stdout_until(&mut first_rx, "A").await;
    hub.unregister(&first);

    // Process kept running without clients; a new attachment replays the
    // scrollback before anything live.
    assert!(!process.is_closed());
    let (second, mut second_rx) = Attachment::new();
    service.send_history(&second, &process);
    hub.register(Arc::clone(&second));

    match recv_frame(&mut second_rx).await {
        ServerFrame::History { data } => assert!(data.contains('A')),
        other => panic!("expected history first, got {other:?}"),
    }

    process.close().unwrap();
}

#[tokio::test]
async fn empty_history_sends_no_frame() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    let process = service
        .attach_session(spawn_opts(&dir, "hist-2", "/bin/cat"), None)
        .unwrap();

    let (attachment, mut rx) = Attachment::new();
    service.send_history(&attachment, &process);
    assert!(rx.try_recv().is_err());

    process.close().unwrap();
}

#[tokio::test]
async fn bound_driver_produces_smart_event_frames() {
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    service.bind_driver("drv-1", AgentDriver::for_command("claude"));

    let hub = service.hub_manager().get_or_create("drv-1");
    let (attachment, mut rx) = Attachment::new();
    hub.register(attachment);

    service.broadcast_output("drv-1", b"Do you want to write config.yaml?");

    match recv_frame(&mut rx).await {
        ServerFrame::Stdout { data } => {
            assert_eq!(data, "Do you want to write config.yaml?")
        }
        other => panic!("expected stdout first, got {other:?}"),
    }
    match recv_frame(&mut rx).await {
        ServerFrame::SmartEvent { payload } => {
            assert_eq!(payload.options, vec!["1", "2", "esc"]);
        }
        other => panic!("expected smart event, got {other:?}"),
    }
}

#[tokio::test]
async fn generic_sessions_forward_raw_only() {
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    let hub = service.hub_manager().get_or_create("gen-1");
    let (attachment, mut rx) = Attachment::new();
    hub.register(attachment);

    service.broadcast_output("gen-1", b"Continue? (y/n)");
    match recv_frame(&mut rx).await {
        ServerFrame::Stdout { data } => assert_eq!(data, "Continue? (y/n)"),
        other => panic!("unexpected frame {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn detach_session_closes_hub_and_unbinds_driver() {
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    service.bind_driver("det-1", AgentDriver::for_command("claude"));
    let hub = service.hub_manager().get_or_create("det-1");
    let (attachment, _rx) = Attachment::new();
    hub.register(Arc::clone(&attachment));

    service.detach_session("det-1");
    assert!(attachment.is_closed());
    assert!(service.driver("det-1").is_none());
    assert!(service.hub_manager().get("det-1").is_none());
}

#[tokio::test]
async fn client_frames_route_through_hub_callback() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(WsService::new(Arc::new(PtyManager::new())));
    let process = service
        .attach_session(spawn_opts(&dir, "route-1", "/bin/cat"), None)
        .unwrap();

    let hub = service.hub_manager().get_or_create("route-1");
    let writer = Arc::clone(&process);
    hub.set_on_message(Some(Box::new(move |attachment, frame| match frame {
        ClientFrame::Stdin { data } => {
            let _ = writer.write(data.as_bytes());
        }
        ClientFrame::Ping => attachment.send(ServerFrame::Pong),
        _ => {}
    })));

    let (attachment, mut rx) = Attachment::new();
    hub.register(Arc::clone(&attachment));

    hub.handle_message(&attachment, ClientFrame::Ping);
    assert!(matches!(recv_frame(&mut rx).await, ServerFrame::Pong));

    hub.handle_message(
        &attachment,
        ClientFrame::Stdin {
            data: "routed\n".to_string(),
        },
    );
    collect_stdout_until(&mut rx, "routed").await;

    process.close().unwrap();
}
