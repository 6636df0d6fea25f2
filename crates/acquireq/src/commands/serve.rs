//! `acquireq serve`: the JSON-lines transport.
//!
//! Reads requests from `reader` until EOF. Replies and streamed snapshots
//! share one writer task, so each output line is written whole.

use std::collections::HashSet;

use acquireq_core::ResourceId;
use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinSet,
};

use super::{execute, App, ErrorBody, Line, Request};

/// Serve requests until `reader` reaches EOF, then hand back the writer
///
/// # Errors
///
/// Returns an error if reading input or writing output fails
pub async fn serve<R, W>(app: &App, reader: R, writer: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Line>();
    let output = tokio::spawn(write_lines(rx, writer));

    let mut forwarders = JoinSet::new();
    let mut subscribed: HashSet<ResourceId> = HashSet::new();
    let mut lines = reader.lines();

    while let Some(raw) = lines.next_line().await? {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable request");
                let _ = tx.send(Line::Error(ErrorBody::bad_request(e.to_string())));
                continue;
            }
        };

        let subscribe_to = match &request {
            Request::Subscribe { resource_id } => Some(resource_id.clone()),
            _ => None,
        };
        // Subscribe before replying so no commit slips between the
        // reply's snapshot and the stream
        let subscription = subscribe_to
            .as_ref()
            .filter(|id| !subscribed.contains(*id))
            .map(|id| app.publisher.subscribe(id));

        match execute(app, request).await {
            Ok(outcome) => {
                let _ = tx.send(Line::Ok(outcome));
                if let (Some(id), Some(mut subscription)) = (subscribe_to, subscription) {
                    if let Ok(current) = app.engine.snapshot(&id).await {
                        let _ = tx.send(Line::Snapshot(current));
                    }
                    subscribed.insert(id);
                    let tx = tx.clone();
                    forwarders.spawn(async move {
                        while let Some(snapshot) = subscription.recv().await {
                            if tx.send(Line::Snapshot((*snapshot).clone())).is_err() {
                                break;
                            }
                        }
                    });
                }
            }
            Err(e) => {
                if e.is_infrastructure() {
                    tracing::warn!(error = %e, "request failed");
                }
                let _ = tx.send(Line::Error(ErrorBody::from(&e)));
            }
        }
    }

    forwarders.shutdown().await;
    drop(tx);
    output.await?
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<Line>, mut writer: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.to_json().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(writer)
}
