// Node Sync - mirror freshly created primary records into the graph store
// The primary record is already durable when this runs, so a failure here
// leaves the entity temporarily missing from the graph (see Reconciler) and
// never orphans the primary record.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::GraphStore;
use crate::models::{EdgeType, NodeKind, Record};

/// Outcome of linking a page to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagesLink {
    Created,
    AlreadyPresent,
    /// Owner node missing or not a User.
    OwnerNotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSyncReport {
    pub page_id: String,
    pub manages: ManagesLink,
}

#[derive(Clone)]
pub struct NodeSync {
    graph: Arc<dyn GraphStore>,
}

impl NodeSync {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Create the graph node for `record` (user or page, by its kind).
    pub async fn create_node(&self, record: &Record) -> AppResult<&'static str> {
        if record.id.trim().is_empty() {
            return Err(AppError::Validation("entity id must not be empty".to_string()));
        }

        let summary = self.graph.create_node(&record.as_graph_node()).await?;
        if summary.nodes_created == 0 {
            return Err(AppError::Internal(format!(
                "Could not create {} node {}",
                record.kind, record.id
            )));
        }

        info!("Created {} node {}", record.kind, record.id);
        Ok("node created")
    }

    /// Create a Page node, then link `owner_id -[MANAGES]-> page`.
    ///
    /// Node creation errors propagate. A failed link is reported in the
    /// result and does not undo the node.
    pub async fn create_page_node(&self, page: &Record, owner_id: &str) -> AppResult<PageSyncReport> {
        if page.kind != NodeKind::Page {
            return Err(AppError::Validation(format!(
                "record {} is a {}, not a page",
                page.id, page.kind
            )));
        }
        self.create_node(page).await?;

        let manages = self.link_manager(owner_id, &page.id).await;
        if manages != ManagesLink::Created {
            warn!("Page {} created without owner link: {:?}", page.id, manages);
        }

        Ok(PageSyncReport {
            page_id: page.id.clone(),
            manages,
        })
    }

    /// Create `owner -[MANAGES]-> page` if absent. Never errors; the outcome says what happened.
    pub async fn link_manager(&self, owner_id: &str, page_id: &str) -> ManagesLink {
        if owner_id.trim().is_empty() {
            return ManagesLink::OwnerNotFound;
        }

        match self
            .graph
            .create_edge_if_absent(EdgeType::Manages, owner_id, page_id)
            .await
        {
            Ok(s) if s.relationships_created > 0 => ManagesLink::Created,
            Ok(s) if s.matched > 0 => ManagesLink::AlreadyPresent,
            Ok(_) => ManagesLink::OwnerNotFound,
            Err(e) => ManagesLink::Failed(e.to_string()),
        }
    }

    /// Dispatch on the record kind. Pages without an owner get a bare node.
    pub async fn sync_record(&self, record: &Record) -> AppResult<Option<PageSyncReport>> {
        match (record.kind, record.owner_id.as_deref()) {
            (NodeKind::Page, Some(owner)) => self.create_page_node(record, owner).await.map(Some),
            _ => self.create_node(record).await.map(|_| None),
        }
    }
}
