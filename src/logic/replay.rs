//! Traffic replay client (`send` subcommand)
//!
//! Streams delimited records to a running listener the way the capture
//! agent does: `chunk_lines` records per connection, one connection per
//! chunk, optionally pausing between chunks.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Replay parameters
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub addr: String,
    pub chunk_lines: usize,
    pub interval: Option<Duration>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub connections: usize,
    pub lines: usize,
    pub bytes: usize,
}

/// Non-blank lines from `path`, or from stdin when `None`
pub async fn read_source(path: Option<&Path>) -> std::io::Result<Vec<String>> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };

    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Send `lines` in chunks, one connection per chunk. Each connection is
/// held until the listener has closed it, so chunks are processed in order.
pub async fn replay(lines: &[String], options: &ReplayOptions) -> std::io::Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (i, chunk) in lines.chunks(options.chunk_lines.max(1)).enumerate() {
        if i > 0 {
            if let Some(interval) = options.interval {
                tokio::time::sleep(interval).await;
            }
        }

        let mut payload = chunk.join("\n");
        payload.push('\n');

        let mut stream = TcpStream::connect(&options.addr).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.shutdown().await?;

        let mut ignored = Vec::new();
        stream.read_to_end(&mut ignored).await?;

        summary.connections += 1;
        summary.lines += chunk.len();
        summary.bytes += payload.len();
        log::debug!("Sent chunk {} ({} lines)", i + 1, chunk.len());
    }

    log::info!(
        "Replayed {} lines over {} connections to {}",
        summary.lines,
        summary.connections,
        options.addr
    );
    Ok(summary)
}
