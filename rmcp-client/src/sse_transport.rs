//! Legacy HTTP+SSE transport for MCP servers.
//!
//! The server keeps a `GET` event stream open. Its first `endpoint` event
//! names the URL that client messages must be `POST`ed to; every later
//! `message` event carries one JSON-RPC message for the client. The stream and
//! the POST loop are bridged into the sink/stream pair that `rmcp` accepts as
//! a transport.

use std::time::Duration;

use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use eventsource_stream::Event;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::header::CACHE_CONTROL;
use rmcp::model::ClientJsonRpcMessage;
use rmcp::model::ServerJsonRpcMessage;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;
use tracing::debug;
use tracing::warn;
use url::Url;

const CHANNEL_CAPACITY: usize = 64;
const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

pub(crate) struct SseTransport {
    pub(crate) sink: PollSender<ClientJsonRpcMessage>,
    pub(crate) stream: ReceiverStream<ServerJsonRpcMessage>,
    /// Reader and writer tasks; aborted when the client shuts down.
    pub(crate) tasks: Vec<AbortHandle>,
}

pub(crate) async fn connect(
    client: reqwest::Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<SseTransport> {
    let base = Url::parse(url).map_err(|err| anyhow!("invalid SSE url `{url}`: {err}"))?;

    let response = client
        .get(base.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await?;
    if !response.status().is_success() {
        bail!("SSE connection failed with status: {}", response.status());
    }

    let mut events = Box::pin(response.bytes_stream().eventsource());
    let endpoint = match timeout {
        Some(duration) => tokio::time::timeout(duration, wait_for_endpoint(&mut events, &base))
            .await
            .map_err(|_| anyhow!("timed out waiting for SSE endpoint event after {duration:?}"))??,
        None => wait_for_endpoint(&mut events, &base).await?,
    };
    debug!("SSE endpoint for {base} resolved to {endpoint}");

    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);

    let reader = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let Some(message) = decode_message(&event) else {
                        continue;
                    };
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("SSE stream error: {err}");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match client.post(endpoint.clone()).json(&message).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!("SSE POST to {endpoint} failed with status {}", response.status());
                }
                Ok(_) => {}
                Err(err) => warn!("SSE POST to {endpoint} failed: {err}"),
            }
        }
    });

    Ok(SseTransport {
        sink: PollSender::new(outbound_tx),
        stream: ReceiverStream::new(inbound_rx),
        tasks: vec![reader.abort_handle(), writer.abort_handle()],
    })
}

async fn wait_for_endpoint<S, E>(events: &mut S, base: &Url) -> Result<Url>
where
    S: Stream<Item = Result<Event, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(event) = events.next().await {
        let event = event.map_err(|err| anyhow!("SSE stream error: {err}"))?;
        if let Some(endpoint) = resolve_endpoint(&event, base)? {
            return Ok(endpoint);
        }
    }
    bail!("SSE stream closed before the server announced its endpoint")
}

fn resolve_endpoint(event: &Event, base: &Url) -> Result<Option<Url>> {
    if event.event != ENDPOINT_EVENT {
        return Ok(None);
    }
    let endpoint = base
        .join(event.data.trim())
        .map_err(|err| anyhow!("invalid SSE endpoint `{}`: {err}", event.data))?;
    Ok(Some(endpoint))
}

fn decode_message(event: &Event) -> Option<ServerJsonRpcMessage> {
    if !(event.event.is_empty() || event.event == MESSAGE_EVENT) {
        return None;
    }
    match serde_json::from_str(&event.data) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!("dropping malformed SSE message: {err}");
            None
        }
    }
}
