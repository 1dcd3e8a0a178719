//! Connection Listener
//!
//! Accepts TCP clients and runs one task per connection, at most
//! `max_connections` at a time. The shared `Pipeline` is the only state the
//! tasks see.

pub mod connection;
pub mod decoder;


use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::logic::pipeline::Pipeline;

use connection::handle_connection;

/// Bind the listening socket. Failure here is fatal to the caller.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections until `shutdown` resolves, then wait for the
/// in-flight connection tasks.
pub async fn serve<F>(listener: TcpListener, pipeline: Arc<Pipeline>, max_connections: usize, shutdown: F)
where
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    log::info!("Server running in {} mode...", pipeline.mode());

    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Accept failed: {}", e);
                    continue;
                }
            },
        };

        let pipeline = pipeline.clone();
        tasks.spawn(async move {
            let _permit = permit;
            handle_connection(stream, peer, pipeline).await
        });

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                log::error!("Connection task failed: {}", e);
            }
        }
    }

    log::info!("Listener stopped, waiting for {} open connections", tasks.len());
    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            log::error!("Connection task failed: {}", e);
        }
    }
}
