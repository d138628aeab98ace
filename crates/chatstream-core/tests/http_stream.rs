//! End-to-end tests for the HTTP transport against a local event-stream server.
//!
//! The server speaks just enough HTTP/1.1 to send a chunked
//! `text/event-stream` body, so reqwest sees real chunk boundaries.

use std::time::Duration;

use chatstream_core::{
    ChatClientConfig, Conversation, EndReason, FAILURE_TEXT, LedgerOutcome, Stage, TransportError,
    TurnOutcome,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

enum Reply {
    /// 200 with these body pieces, each sent as its own HTTP chunk.
    Stream(Vec<&'static str>),
    /// 200 with these pieces, then the connection drops mid-chunk.
    Truncated(Vec<&'static str>),
    /// Non-success status with a short body.
    Status(u16, &'static str),
}

/// Serves one reply per accepted connection and returns the request lines.
async fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = tokio::spawn(async move {
        let mut request_lines = Vec::new();
        for reply in replies {
            let (mut socket, _) = listener.accept().await.expect("accept");
            request_lines.push(read_request_head(&mut socket).await);
            write_reply(&mut socket, reply).await;
        }
        request_lines
    });
    (base, handle)
}

async fn read_request_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn write_reply(socket: &mut TcpStream, reply: Reply) {
    match reply {
        Reply::Stream(pieces) => {
            write_stream_head(socket).await;
            write_pieces(socket, &pieces).await;
            socket.write_all(b"0\r\n\r\n").await.expect("write terminator");
            let _ = socket.shutdown().await;
        }
        Reply::Truncated(pieces) => {
            write_stream_head(socket).await;
            write_pieces(socket, &pieces).await;
            // Promise 64 bytes, deliver 3, hang up.
            socket.write_all(b"40\r\nabc").await.expect("write partial chunk");
            socket.flush().await.expect("flush");
        }
        Reply::Status(status, body) => {
            let head = format!(
                "HTTP/1.1 {status} Oops\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.expect("write status");
            let _ = socket.shutdown().await;
        }
    }
}

async fn write_stream_head(socket: &mut TcpStream) {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        )
        .await
        .expect("write head");
}

async fn write_pieces(socket: &mut TcpStream, pieces: &[&str]) {
    for piece in pieces {
        let framed = format!("{:x}\r\n{piece}\r\n", piece.len());
        socket.write_all(framed.as_bytes()).await.expect("write chunk");
        socket.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn config(base: &str) -> ChatClientConfig {
    ChatClientConfig::new(base).connect_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn streams_two_turns_and_threads_the_checkpoint() {
    let (base, server) = serve(vec![
        Reply::Stream(vec![
            "data: {\"type\":\"checkpoint\",\"checkpoint_id\":\"c1\"}\n",
            "data: {\"type\":\"content\",\"con",
            "tent\":\"Hel\"}\ndata: {\"type\":\"content\",\"content\":\"lo\"}\n",
            "data: {\"type\":\"end\"}\n",
        ]),
        Reply::Stream(vec!["data: {\"type\":\"content\",\"content\":\"again\"}\ndata: {\"type\":\"end\"}\n"]),
    ])
    .await;
    let mut chat = Conversation::from_config(&config(&base)).expect("conversation");

    let mut turn = chat.submit("hi").expect("submit");
    let mut last = None;
    while let Some(snapshot) = turn.next_snapshot().await {
        last = Some(snapshot);
    }
    assert_eq!(
        turn.outcome(),
        Some(&TurnOutcome::Ended(EndReason::EndEvent))
    );
    drop(turn);
    let last = last.expect("at least one snapshot");
    assert_eq!(last.text, "Hello");
    assert!(!last.pending);
    assert_eq!(chat.checkpoint(), Some("c1"));

    let outcome = chat.submit("and again").expect("submit").finish().await;
    assert_eq!(outcome, TurnOutcome::Ended(EndReason::EndEvent));

    let requests = server.await.expect("server");
    assert!(requests[0].starts_with("GET /chat_stream/hi HTTP/1.1\r\n"));
    assert!(requests[0].to_ascii_lowercase().contains("accept: text/event-stream"));
    assert!(requests[1].starts_with("GET /chat_stream/and%20again?checkpoint_id=c1 HTTP/1.1\r\n"));

    let ledger = chat.ledger().entries();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.iter().all(|e| e.status == Some(200)));
    assert!(ledger.iter().all(|e| e.outcome == LedgerOutcome::Completed));
}

#[tokio::test]
async fn research_events_over_http() {
    let (base, _server) = serve(vec![Reply::Stream(vec![
        "data: {\"type\":\"search_start\",\"query\":\"rust\"}\n",
        "data: {\"type\":\"search_results\",\"urls\":[\"https://a.example\",\"https://b.example\"]}\n",
        "data: {not valid json\n",
        "data: {\"type\":\"content\",\"content\":\"Done.\"}\n",
        "data: {\"type\":\"end\"}\n",
    ])])
    .await;
    let mut chat = Conversation::from_config(&config(&base)).expect("conversation");
    let mut turn = chat.submit("search rust").expect("submit");
    let mut last = None;
    while let Some(snapshot) = turn.next_snapshot().await {
        last = Some(snapshot);
    }
    let last = last.expect("snapshot");
    let progress = last.progress.expect("progress");
    assert_eq!(
        progress.stages,
        vec![Stage::Searching, Stage::Reading, Stage::Writing]
    );
    assert_eq!(progress.query, "rust");
    assert_eq!(progress.sources.len(), 2);
    assert_eq!(last.text, "Done.");
}

#[tokio::test]
async fn non_success_status_becomes_failure_text() {
    let (base, _server) = serve(vec![Reply::Status(503, "busy")]).await;
    let mut chat = Conversation::from_config(&config(&base)).expect("conversation");
    let mut turn = chat.submit("hi").expect("submit");
    let snapshot = turn.next_snapshot().await.expect("failure snapshot");
    assert_eq!(snapshot.text, FAILURE_TEXT);
    assert!(matches!(
        turn.outcome(),
        Some(TurnOutcome::Failed(TransportError::Status { status: 503, .. }))
    ));
    let request_id = turn.request_id();
    drop(turn);
    let entry = chat.ledger().get(request_id).expect("ledger entry");
    assert_eq!(entry.status, Some(503));
    assert!(matches!(entry.outcome, LedgerOutcome::Failed { .. }));
}

#[tokio::test]
async fn dropped_connection_keeps_partial_content() {
    let (base, _server) = serve(vec![Reply::Truncated(vec![
        "data: {\"type\":\"content\",\"content\":\"partial\"}\n",
    ])])
    .await;
    let mut chat = Conversation::from_config(&config(&base)).expect("conversation");
    let mut turn = chat.submit("hi").expect("submit");
    let mut texts = Vec::new();
    while let Some(snapshot) = turn.next_snapshot().await {
        texts.push(snapshot.text);
    }
    assert_eq!(texts, vec!["partial".to_string()]);
    assert!(matches!(turn.outcome(), Some(TurnOutcome::Failed(_))));
}

#[tokio::test]
async fn refused_connection_becomes_failure_text() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let mut chat = Conversation::from_config(&config(&format!("http://127.0.0.1:{port}")))
        .expect("conversation");
    let mut turn = chat.submit("hi").expect("submit");
    let snapshot = turn.next_snapshot().await.expect("failure snapshot");
    assert_eq!(snapshot.text, FAILURE_TEXT);
    assert!(matches!(
        turn.outcome(),
        Some(TurnOutcome::Failed(TransportError::Connect { .. }))
    ));
}
