//! Per-connection task
//!
//! Owns the socket, the line decoder and the connection's batch. Nothing
//! here can fail the listener: every error ends at most this connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::decoder::{Decoded, LineDecoder};
use crate::constants::{MAX_LINE_LEN, READ_BUFFER_SIZE};
use crate::logic::features::RawRecord;
use crate::logic::model::BatchAssembler;
use crate::logic::pipeline::Pipeline;

/// Per-connection diagnostics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub bytes: usize,
    pub lines: usize,
    pub malformed: usize,
    pub undecodable: usize,
}

struct Connection {
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    assembler: BatchAssembler,
    summary: ConnectionSummary,
}

/// Serve one client until EOF, read error or idle timeout. The stream is
/// dropped (closed) on return.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, pipeline: Arc<Pipeline>) -> ConnectionSummary
where
    S: AsyncRead + Unpin,
{
    log::info!("Connection from {}", peer);
    pipeline.stats().record_connection();

    let mut connection = Connection {
        peer,
        assembler: BatchAssembler::new(pipeline.batch_size()),
        pipeline,
        summary: ConnectionSummary::default(),
    };
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = match connection.pipeline.idle_timeout() {
            Some(limit) => match tokio::time::timeout(limit, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    log::warn!("Connection {} idle for {}s, closing", peer, limit.as_secs());
                    break;
                }
            },
            None => stream.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::error!("Read error on {}: {}", peer, e);
                break;
            }
        };

        connection.summary.bytes += n;
        let decoded = decoder.feed(&buf[..n]);
        connection.handle_overlong(decoder.take_overlong());
        connection.handle_decoded(decoded).await;
    }

    let tail = decoder.finish();
    connection.handle_decoded(tail).await;
    connection.close().await
}

impl Connection {
    fn handle_overlong(&mut self, count: usize) {
        for _ in 0..count {
            self.summary.malformed += 1;
            self.pipeline.stats().record_malformed();
            log::warn!("Dropping line over {} bytes from {}", MAX_LINE_LEN, self.peer);
        }
    }

    async fn handle_decoded(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Lines(lines) => {
                for line in lines {
                    self.handle_line(&line).await;
                }
            }
            Decoded::Undecodable(hex) => {
                self.summary.undecodable += 1;
                self.pipeline.stats().record_undecodable();
                log::warn!("Undecodable data from {} (hex): {}", self.peer, hex);
            }
        }
    }

    async fn handle_line(&mut self, line: &str) {
        self.summary.lines += 1;
        log::debug!("Received from {}: {}", self.peer, line);

        let Some(record) = RawRecord::parse_line(line) else {
            self.summary.malformed += 1;
            self.pipeline.stats().record_malformed();
            log::warn!("Malformed line from {}: {:?}", self.peer, line);
            return;
        };

        self.pipeline.stats().record_accepted();
        if let Some(batch) = self.assembler.push(record) {
            self.pipeline.process_batch(batch).await;
        }
    }

    async fn close(mut self) -> ConnectionSummary {
        if let Some(partial) = self.assembler.take_partial() {
            if self.pipeline.flush_on_close() {
                log::info!("Flushing partial batch of {} records from {}", partial.len(), self.peer);
                self.pipeline.process_batch(partial).await;
            } else {
                log::warn!(
                    "Discarding partial batch of {} records from {}",
                    partial.len(),
                    self.peer
                );
                self.pipeline.stats().record_discarded(partial.len());
            }
        }

        log::info!(
            "Connection {} closed: {} bytes, {} lines, {} malformed, {} undecodable",
            self.peer,
            self.summary.bytes,
            self.summary.lines,
            self.summary.malformed,
            self.summary.undecodable
        );
        self.summary
    }
}
