//! Integration tests for the procwatch daemon

use hyper::{Body, Client, Method, Request, StatusCode};
use procwatch_daemon::{
    collector::{LinuxProcessCollector, ProcessCollector},
    config::Config,
    executor::{send_signal, Signal},
    handler::DaemonState,
    server::{ApiRequest, HttpServer, RequestHandler, TokenGate, AUTH_HEADER},
};
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Restart over HTTP: terminate `sleep 100`, relaunch it, report both pids
#[tokio::test]
async fn test_restart_scenario_over_http() {
    let mut config = Config::default();
    config.server.token = "integration".to_string();
    config.restart.poll_interval_ms = 20;

    let state = Arc::new(DaemonState::new(&config.restart));
    let addr = "127.0.0.1:0".parse().unwrap();
    let server = HttpServer::bind(
        &addr,
        TokenGate::new(config.server.token.clone()),
        state,
        std::future::pending(),
    )
    .unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut child = std::process::Command::new("sleep").arg("100").spawn().unwrap();
    let old_pid = child.id();

    let started = Instant::now();
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/api/process/{}/restart", addr, old_pid))
        .header(AUTH_HEADER, "integration")
        .body(Body::empty())
        .unwrap();
    let response = Client::new().request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(6));

    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["old_pid"].as_u64(), Some(old_pid as u64));
    let new_pid = body["new_pid"].as_u64().unwrap() as u32;
    assert!(new_pid > 0);
    assert_ne!(new_pid, old_pid);

    assert_eq!(child.wait().unwrap().signal(), Some(libc::SIGTERM));
    assert!(LinuxProcessCollector::new().resolve(new_pid).is_some());
    send_signal(new_pid, Signal::Kill).unwrap();
}

/// Handler can be driven directly without the transport
#[tokio::test]
async fn test_handler_without_transport() {
    let state = DaemonState::new(&Config::default().restart);
    let reply = state.handle(ApiRequest::Health).await;
    assert_eq!(reply.status, 200);

    let reply = state.handle(ApiRequest::Restart { pid: 999_999_999 }).await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.body["error"], "Process not found");
}

/// Two concurrent restarts of one pid race; the loser reports its failure
#[tokio::test]
async fn test_concurrent_restart_race() {
    let state = Arc::new(DaemonState::new(&Config::default().restart));
    let mut child = std::process::Command::new("sleep").arg("100").spawn().unwrap();
    let pid = child.id();

    let first = tokio::spawn({
        let state = Arc::clone(&state);
        async move { state.handle(ApiRequest::Restart { pid }).await }
    });
    let second = tokio::spawn({
        let state = Arc::clone(&state);
        async move { state.handle(ApiRequest::Restart { pid }).await }
    });
    let replies = [first.await.unwrap(), second.await.unwrap()];
    child.wait().unwrap();

    let relaunched: Vec<u32> = replies
        .iter()
        .filter(|r| r.status == 200)
        .map(|r| r.body["new_pid"].as_u64().unwrap() as u32)
        .collect();
    assert!(!relaunched.is_empty());
    // the loser sees either a vanished pid or a zombie with no command line
    for reply in replies.iter().filter(|r| r.status != 200) {
        assert!(reply.status == 404 || reply.status == 400, "{:?}", reply);
    }
    for new_pid in relaunched {
        let _ = send_signal(new_pid, Signal::Kill);
    }
}
