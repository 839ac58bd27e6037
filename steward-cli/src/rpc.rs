use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use steward_core::deps::Dependencies;
use steward_core::logging::{self, LogCategory};
use steward_core::process::{ProgressHook, ProgressUpdate};
use steward_kernel::{DispatchError, ErrorKind};

use crate::tools;

/// Frames larger than this are a protocol violation, not a payload.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum IncomingKind {
    Request,
}

/// deny_unknown_fields keeps the request schema closed; hosts sending
/// fields we do not understand get their frame dropped, not half-honored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Incoming {
    #[serde(rename = "type")]
    kind: IncomingKind,
    id: u64,
    tool: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outgoing {
    Progress {
        id: u64,
        stage: String,
        message: String,
    },
    Response {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<ResponsePayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
}

#[derive(Debug, Serialize)]
struct ResponsePayload {
    text: String,
    metadata: Value,
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error_kind: ErrorKind,
    message: String,
}

/// Read one length-prefixed frame; `None` on clean EOF.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let length = u32::from_be_bytes(header);
    if length > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {length} bytes exceeds the {MAX_FRAME_BYTES} limit"),
        ));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Serve requests from stdin until EOF. Requests run concurrently; a
/// single writer task serializes outgoing frames. On EOF new requests
/// stop being accepted and in-flight ones drain before shutdown.
pub async fn serve(deps: Arc<Dependencies>) -> std::io::Result<()> {
    let mut stdin = tokio::io::stdin();
    let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(64);

    let writer_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let body = match serde_json::to_vec(&message) {
                Ok(body) => body,
                Err(_) => continue,
            };
            if write_frame(&mut stdout, &body).await.is_err() {
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();

    while let Some(frame) = read_frame(&mut stdin).await? {
        let incoming: Incoming = match serde_json::from_slice(&frame) {
            Ok(incoming) => incoming,
            Err(err) => {
                logging::warn(
                    LogCategory::Errors,
                    format!("dropping malformed request frame: {err}"),
                );
                continue;
            }
        };

        // Parsing already pinned `type` to "request".
        let Incoming {
            kind: IncomingKind::Request,
            id,
            tool,
            params,
        } = incoming;
        let deps = deps.clone();
        let out_tx = out_tx.clone();
        in_flight.spawn(async move {
            let response = handle_request(id, &tool, params, &out_tx, &deps).await;
            let _ = out_tx.send(response).await;
        });

        // Reap finished requests so the set stays small on long sessions.
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

async fn handle_request(
    id: u64,
    tool: &str,
    params: Value,
    out_tx: &mpsc::Sender<Outgoing>,
    deps: &Arc<Dependencies>,
) -> Outgoing {
    let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressUpdate>(32);
    let forwarder = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                let _ = out_tx
                    .send(Outgoing::Progress {
                        id,
                        stage: update.stage,
                        message: update.message,
                    })
                    .await;
            }
        })
    };

    let result = tools::handle(tool, params, Some(ProgressHook::new(progress_tx)), deps).await;
    let _ = forwarder.await;

    match result {
        Ok(output) => Outgoing::Response {
            id,
            result: Some(ResponsePayload {
                text: output.text,
                metadata: output.metadata,
            }),
            error: None,
        },
        Err(DispatchError { kind, message }) => Outgoing::Response {
            id,
            result: None,
            error: Some(ErrorPayload {
                error_kind: kind,
                message,
            }),
        },
    }
}
