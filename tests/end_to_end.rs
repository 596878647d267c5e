//! Live-socket coverage for the six concrete scenarios named in spec §8,
//! the ones the in-module `#[cfg(test)]` suites (duplex-based, or pure
//! function calls) don't already exercise end to end: a proxy really
//! listening on a TCP port, forwarding to a real upstream listener.

use gleip_core::ca::CertificateAuthority;
use gleip_core::config::ProxyConfig;
use gleip_core::events::Event;
use gleip_core::flow::FlowEngine;
use gleip_core::models::{FlowStep, FuzzSettings, RequestStep};
use gleip_core::proxy::run_server;
use gleip_core::store::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo_upstream(response: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
            });
        }
    });
    addr
}

async fn start_test_proxy(state: AppState) -> (gleip_core::proxy::ProxyHandle, std::net::SocketAddr) {
    let ca_dir = tempfile::tempdir().unwrap();
    let ca = Arc::new(CertificateAuthority::new(ca_dir.path()).unwrap());
    let config = ProxyConfig { bind_address: "127.0.0.1".to_string(), port: 0 };
    let handle = run_server(config, ca, state).await.unwrap();
    let addr = handle.local_addr();
    (handle, addr)
}

/// Scenario 1: plain HTTP GET via the proxy, absolute-form target.
#[tokio::test]
async fn scenario_1_http_get_via_proxy() {
    let upstream_response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
    let upstream_addr = spawn_echo_upstream(upstream_response).await;

    let state = AppState::new();
    let (handle, proxy_addr) = start_test_proxy(state.clone()).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "GET http://{upstream_addr}/hi HTTP/1.1\r\nHost: {upstream_addr}\r\nConnection: close\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, upstream_response);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let summaries = state.transactions.list_summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].method, "GET");
    assert!(summaries[0].url.ends_with("/hi"));
    assert_eq!(summaries[0].status_code, Some(200));
    assert_eq!(summaries[0].response_size, Some(2));

    handle.stop();
}

/// Scenario 3: interception enabled, the pending request is forwarded with
/// a modified body; the client still sees the upstream's real response,
/// and the stored request dump reflects the edit.
#[tokio::test]
async fn scenario_3_intercept_and_modify_request() {
    let upstream_response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
    let upstream_addr = spawn_echo_upstream(upstream_response).await;

    let state = AppState::new();
    state.intercept.set_enabled(true);
    let (handle, proxy_addr) = start_test_proxy(state.clone()).await;

    let client_task = tokio::spawn({
        let upstream_addr = upstream_addr;
        async move {
            let mut client = TcpStream::connect(proxy_addr).await.unwrap();
            let request = format!(
                "POST /login HTTP/1.1\r\nHost: {upstream_addr}\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello"
            );
            client.write_all(request.as_bytes()).await.unwrap();
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        }
    });

    let modified = loop {
        let pending = state.intercept.list_pending();
        if let Some(entry) = pending.into_iter().next() {
            break entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let new_dump = format!(
        "POST /login HTTP/1.1\r\nHost: {upstream_addr}\r\nContent-Length: 5\r\nConnection: close\r\n\r\nworld"
    )
    .into_bytes();
    state.intercept.forward_modified(modified.id, new_dump.clone()).unwrap();

    let received = client_task.await.unwrap();
    assert_eq!(received, upstream_response);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let tx = state.transactions.get(modified.id).await.unwrap();
    assert_eq!(tx.request_dump, new_dump);

    handle.stop();
}

/// Scenario 6: a fuzz-mode request step sends one request per wordlist
/// word, in order, recording a `FuzzResult` per word and broadcasting a
/// `flow:fuzzUpdate` event after each.
#[tokio::test]
async fn scenario_6_fuzz_run_sends_one_request_per_word_in_order() {
    let upstream_response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    let upstream_addr = spawn_echo_upstream(upstream_response).await;

    let state = AppState::new();
    let mut events = state.events.subscribe();
    let engine = FlowEngine::new(state.clone());
    let flow = state.flows.create(None);

    let request_dump = format!("GET /fuzz/{{{{fuzz}}}} HTTP/1.1\r\nHost: {upstream_addr}\r\n\r\n").into_bytes();
    let mut request_step = RequestStep::new(upstream_addr.to_string(), false, request_dump);
    request_step.is_fuzz_mode = true;
    request_step.fuzz_settings = Some(FuzzSettings {
        delay_secs: 0.0,
        wordlist: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        results: Vec::new(),
    });
    let step = FlowStep::request("fuzz step", request_step);
    let step_id = step.id;
    state.flows.add_step(flow.id, step).unwrap();

    engine.start_fuzzing(flow.id, step_id).await.unwrap();

    let mut saw_final_update = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(Event::FlowFuzzUpdate(payload))) if payload.step_id == step_id && !payload.is_fuzzing => {
                assert_eq!(payload.fuzz_results.len(), 3);
                assert_eq!(payload.fuzz_results[0].word, "a");
                assert_eq!(payload.fuzz_results[1].word, "b");
                assert_eq!(payload.fuzz_results[2].word, "c");
                saw_final_update = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_final_update, "expected a terminal flow:fuzzUpdate with three ordered results");
    assert!(!engine.is_fuzzing());

    let stored = state.flows.get(flow.id).unwrap();
    let stored_step = stored.steps.into_iter().find(|s| s.id == step_id).unwrap();
    let results = &stored_step.request_step.unwrap().fuzz_settings.unwrap().results;
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().map(|r| r.word.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
}
