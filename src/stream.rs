// src/stream.rs

//! Job log streaming over websocket.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

/// Connect to `url` with a bearer token and hand each text message to
/// `on_message` until the server closes the socket. Returns the number of
/// messages received.
pub async fn stream_job_log<F>(url: &str, token: &str, mut on_message: F) -> Result<usize>
where
    F: FnMut(&str),
{
    let mut request = url
        .into_client_request()
        .with_context(|| format!("Invalid websocket URL: {}", url))?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).context("Invalid access token")?,
    );

    let (mut ws, _) = connect_async(request)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    tracing::debug!(%url, "connected to job log");

    let mut received = 0;
    while let Some(msg) = ws.next().await {
        match msg.context("Job log stream failed")? {
            Message::Text(text) => {
                received += 1;
                on_message(&text);
            }
            Message::Binary(bytes) => {
                received += 1;
                on_message(&String::from_utf8_lossy(&bytes));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(received)
}
