//! JSON-lines task worker.
//!
//! Reads one [`TaskRequest`] per line, writes one
//! [`TaskResult`](crate::orchestrator::TaskResult) per line and
//! releases every specialist tier when it stops, however it stops:
//!
//! ```text
//! input ──line──▶ TaskRequest ──execute──▶ TaskResult ──line──▶ output
//!   │ EOF / read error        shutdown signal        write error │
//!   └─────────────────────────────┬───────────────────────────────┘
//!                                 ▼
//!                       ModelCache::shutdown()
//! ```
//!
//! Lines that are not UTF-8 or not a valid request get a `failed` result
//! with kind `invalid_task`; the worker keeps going.

use std::future::Future;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::orchestrator::{ComputeOrchestrator, TaskRequest};

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfInput,
    Signal,
    ReadError,
    WriteError,
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub executed: usize,
    pub rejected: usize,
    pub released: usize,
    pub stop_reason: StopReason,
}

/// Serve requests from `input` until it ends, fails, or `shutdown` resolves.
pub async fn serve<R, W, S>(
    orchestrator: &ComputeOrchestrator,
    mut input: R,
    mut output: W,
    shutdown: S,
) -> WorkerSummary
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut executed = 0;
    let mut rejected = 0;
    let mut buf = Vec::new();

    let stop_reason = loop {
        buf.clear();
        let read = tokio::select! {
            read = input.read_until(b'\n', &mut buf) => read,
            _ = &mut shutdown => {
                tracing::info!("Worker: shutdown requested");
                break StopReason::Signal;
            }
        };

        match read {
            Ok(0) => break StopReason::EndOfInput,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Worker: reading input failed: {}", e);
                break StopReason::ReadError;
            }
        }

        let Some(reply) = handle_line(orchestrator, &buf, &mut executed, &mut rejected).await
        else {
            continue;
        };

        if let Err(e) = write_line(&mut output, &reply).await {
            tracing::warn!("Worker: writing output failed: {}", e);
            break StopReason::WriteError;
        }
    };

    let mut released = 0;
    for (tier, result) in orchestrator.cache().shutdown().await {
        match result {
            Ok(_) => released += 1,
            Err(e) => tracing::error!("Worker: failed to release '{}': {}", tier, e),
        }
    }

    tracing::info!(
        "Worker: stopped ({:?}), {} executed, {} rejected, {} released",
        stop_reason,
        executed,
        rejected,
        released
    );

    WorkerSummary {
        executed,
        rejected,
        released,
        stop_reason,
    }
}

/// JSON reply for one raw input line, or `None` for a blank line.
async fn handle_line(
    orchestrator: &ComputeOrchestrator,
    raw: &[u8],
    executed: &mut usize,
    rejected: &mut usize,
) -> Option<String> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            *rejected += 1;
            return Some(rejection(&format!("input line is not UTF-8: {}", e)));
        }
    };
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<TaskRequest>(line) {
        Ok(request) => {
            *executed += 1;
            let result = orchestrator.execute_request(request).await;
            match serde_json::to_string(&result) {
                Ok(json) => Some(json),
                Err(e) => Some(rejection(&format!("result not serializable: {}", e))),
            }
        }
        Err(e) => {
            tracing::warn!("Worker: rejecting malformed request: {}", e);
            *rejected += 1;
            Some(rejection(&e.to_string()))
        }
    }
}

fn rejection(message: &str) -> String {
    serde_json::json!({
        "status": "failed",
        "error": { "kind": "invalid_task", "message": message }
    })
    .to_string()
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> std::io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
