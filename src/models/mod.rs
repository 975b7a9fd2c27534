// Graph Models - node kinds, edge types and the records mirrored into the graph

pub mod notification;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub use notification::{FollowNotification, FollowNotificationPayload};

/// Node identifier shared with the primary record store.
pub type NodeId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn current_time_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Kind of entity a graph node mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    User,
    Page,
}

impl NodeKind {
    pub const ALL: [NodeKind; 2] = [NodeKind::User, NodeKind::Page];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::User => "user",
            NodeKind::Page => "page",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(NodeKind::User),
            "page" => Ok(NodeKind::Page),
            other => Err(AppError::Internal(format!("unknown node kind '{}'", other))),
        }
    }
}

/// Directed relationship types held by the graph store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Source follows target. Either end may be a User or a Page.
    Follow,
    /// Source User administers target Page.
    Manages,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Follow => "FOLLOW",
            EdgeType::Manages => "MANAGES",
        }
    }

    /// Node kinds allowed at the (source, target) ends of this edge type.
    pub fn endpoint_kinds(&self) -> (&'static [NodeKind], &'static [NodeKind]) {
        match self {
            EdgeType::Follow => (&NodeKind::ALL, &NodeKind::ALL),
            EdgeType::Manages => (&[NodeKind::User], &[NodeKind::Page]),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of an edge the origin node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// origin -> neighbor
    Outgoing,
    /// neighbor -> origin
    Incoming,
}

/// Vertex in the graph store. `email` is a debugging aid, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub email: Option<String>,
}

/// Change counters reported by a graph-store write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Number of pattern matches the write operated on.
    pub matched: u64,
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
}

/// Filter applied to the node at the far end of a neighborhood query.
#[derive(Debug, Clone, Copy)]
pub struct NeighborQuery {
    pub edge: EdgeType,
    pub direction: Direction,
    /// Kinds the origin node must have for the query to match at all.
    pub origin_kinds: &'static [NodeKind],
    /// Kinds a neighbor must have to be returned.
    pub neighbor_kinds: &'static [NodeKind],
}

/// Primary-store entity. The record store owns every descriptive field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: NodeId,
    pub kind: NodeKind,
    pub email: String,
    pub username: String,
    pub firstname: String,
    pub lastname: Option<String>,
    /// Managing user, set for pages only.
    pub owner_id: Option<NodeId>,
    pub created_at: Timestamp,
}

impl Record {
    pub fn user(id: &str, username: &str, firstname: &str, lastname: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::User,
            email: format!("{}@example.com", username),
            username: username.to_string(),
            firstname: firstname.to_string(),
            lastname: lastname.map(str::to_string),
            owner_id: None,
            created_at: current_time_millis(),
        }
    }

    pub fn page(id: &str, username: &str, name: &str, owner_id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Page,
            email: format!("{}@example.com", username),
            username: username.to_string(),
            firstname: name.to_string(),
            lastname: None,
            owner_id: Some(owner_id.to_string()),
            created_at: current_time_millis(),
        }
    }

    pub fn as_graph_node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            kind: self.kind,
            email: Some(self.email.clone()),
        }
    }
}

/// Ranked "people you may know" entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub record: Record,
    /// Distinct followed nodes that lead to this candidate.
    pub common_connections: u64,
}
