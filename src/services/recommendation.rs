// Recommendation Engine - "people you may know"
//
// origin -> followed (hop 1) -> candidates one or two further FOLLOW hops out.
// A candidate's score is the number of distinct followed nodes that lead to
// it. Ranking: score descending, then candidate id ascending so equal scores
// always come back in the same order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::{neighborhoods, GraphStore};
use crate::infrastructure::record_store::RecordStore;
use crate::models::{EdgeType, NodeId, Recommendation};
use crate::services::hydration::hydrate_in_order;

#[derive(Debug, Clone, Copy)]
pub struct DiscoveryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
        }
    }
}

/// Candidate id with its common-connection score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub id: NodeId,
    pub score: u64,
}

#[derive(Clone)]
pub struct RecommendationEngine {
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
    config: DiscoveryConfig,
}

impl RecommendationEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            graph,
            records,
            config,
        }
    }

    /// Ranked suggestions for `origin_id`, hydrated in rank order.
    /// `None` uses the configured default; larger limits are capped.
    pub async fn discover(
        &self,
        origin_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<Recommendation>> {
        let ranked = self.rank(origin_id, limit).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<NodeId> = ranked.iter().map(|c| c.id.clone()).collect();
        let scores: HashMap<NodeId, u64> = ranked.into_iter().map(|c| (c.id, c.score)).collect();

        let records = hydrate_in_order(self.records.as_ref(), &ids).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let common_connections = scores.get(&record.id).copied().unwrap_or_default();
                Recommendation {
                    record,
                    common_connections,
                }
            })
            .collect())
    }

    /// Scored candidate ids, without hydration.
    pub async fn rank(&self, origin_id: &str, limit: Option<usize>) -> AppResult<Vec<ScoredCandidate>> {
        if origin_id.trim().is_empty() {
            return Err(AppError::Validation("origin id must not be empty".to_string()));
        }
        let limit = self.effective_limit(limit)?;

        let followed = self.graph.neighbors(origin_id, neighborhoods::FOLLOWING).await?;
        if followed.is_empty() {
            return Ok(Vec::new());
        }

        let second_hop = self.graph.outgoing_many(EdgeType::Follow, &followed).await?;

        let middle: Vec<NodeId> = second_hop
            .iter()
            .map(|(_, target)| target.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let third_hop = self.graph.outgoing_many(EdgeType::Follow, &middle).await?;

        let ranked = rank_candidates(origin_id, &followed, &second_hop, &third_hop, limit);
        debug!(
            "discover {}: {} followed, {} candidates returned",
            origin_id,
            followed.len(),
            ranked.len()
        );
        Ok(ranked)
    }

    fn effective_limit(&self, limit: Option<usize>) -> AppResult<usize> {
        match limit {
            None => Ok(self.config.default_limit),
            Some(0) => Err(AppError::Validation("limit must be positive".to_string())),
            Some(n) => Ok(n.min(self.config.max_limit)),
        }
    }
}

/// Score and rank candidates from pre-fetched hop edges.
///
/// `second_hop` holds `(followed, x)` edges, `third_hop` holds `(x, y)` edges.
/// A followed node reaches every `x` and every `y` behind such an `x`.
pub fn rank_candidates(
    origin: &str,
    followed: &[NodeId],
    second_hop: &[(NodeId, NodeId)],
    third_hop: &[(NodeId, NodeId)],
    limit: usize,
) -> Vec<ScoredCandidate> {
    let followed_set: HashSet<&str> = followed.iter().map(String::as_str).collect();

    let mut onward: HashMap<&str, Vec<&str>> = HashMap::new();
    for (source, target) in third_hop {
        onward.entry(source.as_str()).or_default().push(target.as_str());
    }

    // candidate -> distinct followed nodes that reach it
    let mut via: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for (hop1, x) in second_hop {
        if !followed_set.contains(hop1.as_str()) {
            continue;
        }
        via.entry(x.as_str()).or_default().insert(hop1.as_str());
        for y in onward.get(x.as_str()).into_iter().flatten() {
            via.entry(*y).or_default().insert(hop1.as_str());
        }
    }

    let mut ranked: Vec<ScoredCandidate> = via
        .into_iter()
        .filter(|(candidate, _)| *candidate != origin && !followed_set.contains(candidate))
        .map(|(candidate, paths)| ScoredCandidate {
            id: candidate.to_string(),
            score: paths.len() as u64,
        })
        .collect();

    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(limit);
    ranked
}
