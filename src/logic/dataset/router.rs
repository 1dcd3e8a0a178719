//! Result Router - single writer for every persisted store
//!
//! Connection tasks send whole batches over a bounded channel; one blocking
//! task owns the stores and appends in the order batches arrive, so each
//! connection's records keep their order.

use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::writer::StoreWriter;
use crate::constants::{ANOMALY_FILE, COLLECTION_FILE, NORMAL_FILE, ROUTER_CHANNEL_CAPACITY};
use crate::logic::features::RawRecord;
use crate::logic::model::AnomalyVerdict;

/// Stores the router writes to
#[derive(Debug, Clone)]
pub struct Stores {
    pub collection: StoreWriter,
    pub anomalies: StoreWriter,
    /// Normal traffic is only persisted when configured
    pub normal: Option<StoreWriter>,
}

impl Stores {
    /// Standard store files inside `data_dir`
    pub fn in_dir(data_dir: &Path, persist_normal: bool) -> Self {
        Self {
            collection: StoreWriter::new(data_dir.join(COLLECTION_FILE)),
            anomalies: StoreWriter::new(data_dir.join(ANOMALY_FILE)),
            normal: persist_normal.then(|| StoreWriter::new(data_dir.join(NORMAL_FILE))),
        }
    }
}

#[derive(Debug)]
pub enum RouteCommand {
    /// Collection mode: raw records, persisted verbatim
    Collected(Vec<RawRecord>),
    /// Realtime mode: scored records
    Scored(Vec<AnomalyVerdict>),
}

impl RouteCommand {
    pub fn len(&self) -> usize {
        match self {
            RouteCommand::Collected(records) => records.len(),
            RouteCommand::Scored(verdicts) => verdicts.len(),
        }
    }
}

/// What the router did over its lifetime
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterSummary {
    pub collected: u64,
    pub anomalies: u64,
    pub normal: u64,
    pub written: u64,
    pub failed_writes: u64,
}

/// Cloneable sending side, held by the pipeline context
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<RouteCommand>,
}

impl RouterHandle {
    pub async fn collect(&self, records: Vec<RawRecord>) {
        self.send(RouteCommand::Collected(records)).await;
    }

    pub async fn route_verdicts(&self, verdicts: Vec<AnomalyVerdict>) {
        self.send(RouteCommand::Scored(verdicts)).await;
    }

    async fn send(&self, command: RouteCommand) {
        if let Err(e) = self.tx.send(command).await {
            log::error!("Result router is gone, dropping {} records", e.0.len());
        }
    }
}

/// Receiving side; resolves once every handle is dropped and the queue drained
pub struct RouterTask {
    join: JoinHandle<RouterSummary>,
}

impl RouterTask {
    pub async fn finish(self) -> RouterSummary {
        match self.join.await {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("Result router task failed: {}", e);
                RouterSummary::default()
            }
        }
    }
}

/// Start the writer task
pub fn spawn(stores: Stores) -> (RouterHandle, RouterTask) {
    let (tx, mut rx) = mpsc::channel::<RouteCommand>(ROUTER_CHANNEL_CAPACITY);

    let join = tokio::task::spawn_blocking(move || {
        let mut router = ResultRouter::new(stores);
        while let Some(command) = rx.blocking_recv() {
            router.handle(command);
        }
        log::debug!("Result router drained");
        router.summary
    });

    (RouterHandle { tx }, RouterTask { join })
}

/// Synchronous routing logic, owned by the writer task
pub struct ResultRouter {
    stores: Stores,
    summary: RouterSummary,
}

impl ResultRouter {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            summary: RouterSummary::default(),
        }
    }

    pub fn handle(&mut self, command: RouteCommand) {
        match command {
            RouteCommand::Collected(records) => {
                for record in &records {
                    self.summary.collected += 1;
                    write(&self.stores.collection, record, &mut self.summary);
                }
            }
            RouteCommand::Scored(verdicts) => {
                for AnomalyVerdict { record, verdict } in &verdicts {
                    if verdict.is_anomaly() {
                        log::warn!("Anomaly detected: {}", record);
                        self.summary.anomalies += 1;
                        write(&self.stores.anomalies, record, &mut self.summary);
                    } else {
                        log::info!("Normal traffic: {}", record);
                        self.summary.normal += 1;
                        if let Some(store) = &self.stores.normal {
                            write(store, record, &mut self.summary);
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub fn summary(&self) -> &RouterSummary {
        &self.summary
    }
}

fn write(store: &StoreWriter, record: &RawRecord, summary: &mut RouterSummary) {
    match store.append(record) {
        Ok(()) => summary.written += 1,
        Err(e) => {
            log::error!("Failed to persist {}: {}", record, e);
            summary.failed_writes += 1;
        }
    }
}
