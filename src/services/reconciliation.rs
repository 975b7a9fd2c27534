// Reconciler - background repair of graph nodes missing for primary records
// Walks the record store in id order, creates absent nodes and re-links page
// owners. Runs outside the request path, either once or on an interval.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::record_store::RecordStore;
use crate::models::{NodeKind, Record};
use crate::services::node_sync::{ManagesLink, NodeSync};

/// Records repaired concurrently within one page.
const REPAIR_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub nodes_created: u64,
    pub manages_created: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Created,
    Unchanged,
    Failed,
}

#[derive(Clone)]
pub struct Reconciler {
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
    node_sync: NodeSync,
    batch_size: u32,
}

impl Reconciler {
    pub fn new(graph: Arc<dyn GraphStore>, records: Arc<dyn RecordStore>, batch_size: u32) -> Self {
        Self {
            node_sync: NodeSync::new(Arc::clone(&graph)),
            graph,
            records,
            batch_size: batch_size.max(1),
        }
    }

    /// One full pass over the record store.
    ///
    /// Two sweeps: every missing node is created before any MANAGES edge is
    /// attempted, so a page can be linked to an owner from any later page.
    pub async fn run_once(&self) -> AppResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut cursor: Option<String> = None;
        while let Some(batch) = self.next_batch(&mut cursor).await? {
            for chunk in batch.chunks(REPAIR_CONCURRENCY) {
                let outcomes = join_all(chunk.iter().map(|record| self.ensure_node(record))).await;
                for outcome in outcomes {
                    report.scanned += 1;
                    match outcome {
                        Repair::Created => report.nodes_created += 1,
                        Repair::Failed => report.failures += 1,
                        Repair::Unchanged => {}
                    }
                }
            }
        }

        let mut cursor: Option<String> = None;
        while let Some(batch) = self.next_batch(&mut cursor).await? {
            let pages: Vec<&Record> = batch
                .iter()
                .filter(|record| record.kind == NodeKind::Page && record.owner_id.is_some())
                .collect();
            for chunk in pages.chunks(REPAIR_CONCURRENCY) {
                let outcomes = join_all(chunk.iter().map(|page| self.ensure_manages(page))).await;
                for outcome in outcomes {
                    match outcome {
                        Repair::Created => report.manages_created += 1,
                        Repair::Failed => report.failures += 1,
                        Repair::Unchanged => {}
                    }
                }
            }
        }

        if report.nodes_created > 0 || report.manages_created > 0 || report.failures > 0 {
            info!("Reconciliation finished: {:?}", report);
        }
        Ok(report)
    }

    /// Next keyset page of records after `cursor`, advancing it. `None` once exhausted.
    async fn next_batch(&self, cursor: &mut Option<String>) -> AppResult<Option<Vec<Record>>> {
        let ids = self.records.list_ids(cursor.as_deref(), self.batch_size).await?;
        let Some(last) = ids.last().cloned() else {
            return Ok(None);
        };
        *cursor = Some(last);
        Ok(Some(self.records.find_many(&ids).await?))
    }

    async fn ensure_node(&self, record: &Record) -> Repair {
        match self.graph.node(&record.id).await {
            Ok(Some(_)) => Repair::Unchanged,
            Ok(None) => match self.node_sync.create_node(record).await {
                Ok(_) => {
                    warn!("Repaired missing graph node {}", record.id);
                    Repair::Created
                }
                Err(e) => {
                    error!("Could not repair node {}: {}", record.id, e);
                    Repair::Failed
                }
            },
            Err(e) => {
                error!("Could not check node {}: {}", record.id, e);
                Repair::Failed
            }
        }
    }

    async fn ensure_manages(&self, page: &Record) -> Repair {
        let Some(owner) = page.owner_id.as_deref() else {
            return Repair::Unchanged;
        };

        match self.node_sync.link_manager(owner, &page.id).await {
            ManagesLink::Created => {
                warn!("Repaired missing MANAGES edge {} -> {}", owner, page.id);
                Repair::Created
            }
            ManagesLink::AlreadyPresent => Repair::Unchanged,
            ManagesLink::OwnerNotFound => {
                debug!("Page {} has no owner node {} to link", page.id, owner);
                Repair::Unchanged
            }
            ManagesLink::Failed(e) => {
                error!("Could not link page {} to {}: {}", page.id, owner, e);
                Repair::Failed
            }
        }
    }

    /// Run `run_once` every `interval` until the handle is aborted.
    pub fn spawn_periodic(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Reconciliation pass failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::graph_store::neighborhoods;
    use crate::infrastructure::record_store::SqliteRecordStore;
    use crate::infrastructure::sqlite_graph_store::SqliteGraphStore;

    #[tokio::test]
    async fn test_missing_nodes_and_links_are_repaired() {
        let graph = Arc::new(SqliteGraphStore::new_in_memory().await.unwrap());
        let records = Arc::new(SqliteRecordStore::new_in_memory().await.unwrap());

        let owner = Record::user("owner", "owner", "Owner", None);
        let synced = Record::user("synced", "synced", "Synced", None);
        let page = Record::page("page", "page", "Page", "owner");
        for record in [&owner, &synced, &page] {
            records.upsert(record).await.unwrap();
        }
        graph.create_node(&synced.as_graph_node()).await.unwrap();

        let reconciler = Reconciler::new(graph.clone(), records.clone(), 2);
        let report = reconciler.run_once().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                scanned: 3,
                nodes_created: 2,
                manages_created: 1,
                failures: 0
            }
        );
        assert_eq!(
            graph.neighbors("page", neighborhoods::PAGE_MANAGERS).await.unwrap(),
            vec!["owner"]
        );

        let second = reconciler.run_once().await.unwrap();
        assert_eq!(second.scanned, 3);
        assert_eq!((second.nodes_created, second.manages_created), (0, 0));
    }

    #[tokio::test]
    async fn test_owner_in_later_batch_is_linked_in_one_pass() {
        let graph = Arc::new(SqliteGraphStore::new_in_memory().await.unwrap());
        let records = Arc::new(SqliteRecordStore::new_in_memory().await.unwrap());
        records
            .upsert(&Record::page("a-page", "a-page", "A Page", "z-owner"))
            .await
            .unwrap();
        records
            .upsert(&Record::user("z-owner", "z-owner", "Zed", None))
            .await
            .unwrap();

        let report = Reconciler::new(graph.clone(), records, 1).run_once().await.unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                scanned: 2,
                nodes_created: 2,
                manages_created: 1,
                failures: 0
            }
        );
        assert_eq!(
            graph.neighbors("a-page", neighborhoods::PAGE_MANAGERS).await.unwrap(),
            vec!["z-owner"]
        );
    }

    #[tokio::test]
    async fn test_periodic_run_repairs_in_background() {
        let graph = Arc::new(SqliteGraphStore::new_in_memory().await.unwrap());
        let records = Arc::new(SqliteRecordStore::new_in_memory().await.unwrap());
        records.upsert(&Record::user("u1", "u1", "U", None)).await.unwrap();

        let handle = Reconciler::new(graph.clone(), records, 10)
            .spawn_periodic(Duration::from_millis(10));

        let mut repaired = false;
        for _ in 0..50 {
            if graph.node("u1").await.unwrap().is_some() {
                repaired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(repaired);
    }
}
