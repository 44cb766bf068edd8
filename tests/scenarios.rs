//! End-to-end scenarios S1-S6 (spec.md §8), each driving the public API
//! against a real `sh`-scripted fake child instead of the actual assistant
//! or sidecar binaries.

use std::time::Duration;

use agent_supervisor::log::{read_from, tail};
use agent_supervisor::session::{CloseTimeouts, ManagerConfig, Session, SessionConfig, SessionManager};
use agent_supervisor::sidecar::{Sidecar, SidecarConfig};

fn sh_config(script: &str) -> SessionConfig {
    SessionConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        ..Default::default()
    }
}

/// S1 — single successful turn: init, one assistant event, one result.
#[tokio::test]
async fn s1_single_successful_turn() {
    let script = r#"printf '%s\n' \
      '{"type":"system","subtype":"init","cwd":"/h/u","session_id":"abc-123","model":"M","tools":["Read"],"permissionMode":"bypassPermissions","claude_code_version":"2.0.76","apiKeySource":"none"}' \
      '{"type":"assistant","message":{"id":"m1","type":"message","role":"assistant","model":"M","content":[{"type":"text","text":"Hi"}],"stop_reason":null,"usage":{"input_tokens":3,"output_tokens":1}},"session_id":"abc-123"}' \
      '{"type":"result","subtype":"success","is_error":false,"result":"Hi","session_id":"abc-123","duration_ms":10,"duration_api_ms":5,"num_turns":1,"total_cost_usd":0.01,"usage":{"input_tokens":3,"output_tokens":1}}'
    "#;
    let session = Session::spawn("s1", sh_config(script)).await.unwrap();
    session.wait_for_init(Duration::from_secs(2)).await.unwrap();

    let e1 = session.recv().await.unwrap();
    assert!(e1.is_init());
    let e2 = session.recv().await.unwrap();
    assert!(e2.is_assistant());
    assert_eq!(e2.text(), "Hi");
    let e3 = session.recv().await.unwrap();
    assert!(e3.is_result());

    session.wait().await;
    let info = session.info().await;
    assert_eq!(info.turn_count, 1);
    assert_eq!(info.total_cost_usd, 0.01);
}

/// S2 — a malformed line is discarded; only the well-formed event survives.
#[tokio::test]
async fn s2_malformed_line_tolerated() {
    let script = r#"printf 'not json\n{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"ok"}]}}\n'"#;
    let session = Session::spawn("s2", sh_config(script)).await.unwrap();

    let event = session.recv().await.unwrap();
    assert!(event.is_assistant());
    assert_eq!(event.text(), "ok");

    session.wait().await;
}

/// S3 — truncation during tail: the tailer resets to offset 0 and
/// re-delivers everything once it notices the file shrank.
#[tokio::test]
async fn s3_truncation_during_tail() {
    fn entry_line(timestamp: &str) -> String {
        format!(
            r#"{{"type":"assistant","timestamp":"{timestamp}","sessionId":"s1","uuid":"{timestamp}"}}"#
        )
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");
    tokio::fs::write(
        &path,
        format!("{}\n{}\n{}\n", entry_line("t1"), entry_line("t2"), entry_line("t3")),
    )
    .await
    .unwrap();

    let (entries, offset) = read_from(&path, 0).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(offset, tokio::fs::metadata(&path).await.unwrap().len());

    let cancel = std::sync::Arc::new(tokio::sync::Notify::new());
    let mut rx = tail(path.clone(), cancel.clone(), 100);

    tokio::fs::write(&path, b"").await.unwrap();
    tokio::fs::write(&path, format!("{}\n{}\n", entry_line("u1"), entry_line("u2")))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("first post-truncation entry")
        .expect("entry");
    assert_eq!(first.timestamp, "u1");
    let second = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("second post-truncation entry")
        .expect("entry");
    assert_eq!(second.timestamp, "u2");

    cancel.notify_waiters();
}

/// S4 — manager cap honored: three concurrent `Create`s against a
/// capacity-2 manager leave exactly two sessions live.
#[tokio::test]
async fn s4_manager_cap_honored() {
    let manager = SessionManager::new(ManagerConfig {
        max_sessions: 2,
        idle_ttl: None,
        ..Default::default()
    });

    let (a, b, c) = tokio::join!(
        manager.create("a", sh_config("sleep 5")),
        manager.create("b", sh_config("sleep 5")),
        manager.create("c", sh_config("sleep 5")),
    );
    let results = [a.is_ok(), b.is_ok(), c.is_ok()];
    assert_eq!(results.iter().filter(|ok| **ok).count(), 2);
    assert_eq!(manager.count().await, 2);
}

/// S5 — sidecar RPC correlation across an interleaved push notification:
/// a `stream.chunk` notification arrives before the `init` response it
/// has nothing to do with, and `Call` still returns the right response.
#[tokio::test]
async fn s5_sidecar_rpc_with_interleaved_stream_chunks() {
    let config = SidecarConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            r#"printf '{"jsonrpc":"2.0","method":"stream.chunk","params":{"content":"x","done":false}}\n'
               read -r line
               id=$(echo "$line" | grep -o '"id":[0-9]*' | cut -d: -f2)
               printf '{"jsonrpc":"2.0","id":%s,"result":{"ready":true}}\n' "$id"
               printf '{"jsonrpc":"2.0","method":"stream.done","params":{"usage":{"input_tokens":1,"output_tokens":1,"total_tokens":2}}}\n'
               sleep 5"#
                .to_string(),
        ],
        startup_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(2),
        notification_channel_capacity: 16,
        ..Default::default()
    };
    let sidecar = Sidecar::new(config);
    sidecar.start().await.expect("start performs the init call");

    let chunk = sidecar.recv_notification().await.expect("chunk notification");
    assert_eq!(chunk.method, "stream.chunk");
    assert_eq!(
        chunk.params.as_ref().unwrap().get("content").and_then(|v| v.as_str()),
        Some("x")
    );

    let done = sidecar.recv_notification().await.expect("done notification");
    assert_eq!(done.method, "stream.done");
    let usage = &done.params.as_ref().unwrap()["usage"];
    let total = usage["input_tokens"].as_u64().unwrap() + usage["output_tokens"].as_u64().unwrap();
    assert_eq!(total, 2);

    sidecar.stop().await.ok();
}

/// S6 — graceful shutdown ladder: the fake child ignores stdin closing and
/// SIGTERM, so `Close` must escalate all the way to a process-group
/// SIGKILL and still return promptly.
#[tokio::test]
async fn s6_graceful_shutdown_ladder_escalates_to_sigkill() {
    let session = Session::spawn(
        "s6",
        SessionConfig {
            close_timeouts: CloseTimeouts {
                stdin_close: Duration::from_millis(100),
                term: Duration::from_millis(100),
                kill: Duration::from_secs(2),
            },
            ..sh_config("trap '' TERM; sleep 30")
        },
    )
    .await
    .unwrap();

    let started = tokio::time::Instant::now();
    session.close().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(8));
    session.wait().await;
}
