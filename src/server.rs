use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info};

use crate::engine::{Engine, ErrorKind};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{
    CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, REQUEST_DURATION_SECONDS, REQUESTS_TOTAL,
    request_label,
};
use crate::protocol::{Response, dispatch, parse_request};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one client: read request lines, answer each with one response line.
/// A malformed or oversized line is answered with a validation error and the
/// connection stays open.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let resp = Response::failure(ErrorKind::Validation, "request line too long");
                lines.send(resp.to_line()).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match parse_request(&line) {
            Ok(req) => {
                let op = request_label(&req);
                let started = Instant::now();
                // Not raced against anything: once a commit reaches the log writer it must finish.
                let response = dispatch(&engine, req).await;
                let status = response.error_kind().unwrap_or("ok").to_string();
                metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
                metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
                response
            }
            Err(response) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => "unparsed", "status" => "validation_error").increment(1);
                response
            }
        };
        lines.send(response.to_line()).await?;
    }
    Ok(())
}

/// Accept loop with a connection limit. Stops accepting when `shutdown`
/// resolves, then waits (bounded) for in-flight connections to finish.
pub async fn run(
    listener: TcpListener,
    engine: Arc<Engine>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                debug!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    Ok(())
}
