use std::sync::Arc;

use chatstream_core::prelude::*;
use chatstream_core::{HttpTransport, SessionOptions, StreamRequest, StreamSession};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    let config = ChatClientConfig::from_env()?;
    let transport = Arc::new(HttpTransport::new(&config)?);

    let request = StreamRequest::new("Summarize today's Rust news.", None);
    let mut session = StreamSession::new(transport, request, SessionOptions::default())?;

    while let Some(event) = session.next_event().await {
        match event {
            StreamEvent::Content { delta } => print!("{delta}"),
            StreamEvent::SearchStart { query } => eprintln!("[searching] {query}"),
            StreamEvent::SearchResults { urls } => eprintln!("[reading] {} source(s)", urls.len()),
            StreamEvent::SearchError { detail } => eprintln!("[error] {detail}"),
            StreamEvent::Checkpoint { token } => eprintln!("[checkpoint] {token}"),
            StreamEvent::End => println!(),
        }
    }

    if let Some(err) = session.failure() {
        eprintln!("stream failed: {err}");
    }
    Ok(())
}
