// Order-preserving hydration - graph ids in, full records out, same order
// The record store answers multi-id lookups in whatever order it likes, so
// every read path funnels through here.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::error::AppResult;
use crate::infrastructure::record_store::RecordStore;
use crate::models::{NodeId, Record};

/// Arrange `items` to follow `ids`. Items with no id in `ids` are dropped,
/// ids with no item are skipped, repeated ids keep their first position.
pub fn reorder_by_ids<T, F>(ids: &[NodeId], items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut by_id: HashMap<String, T> = HashMap::with_capacity(items.len());
    for item in items {
        by_id.entry(key(&item).to_string()).or_insert(item);
    }

    ids.iter().filter_map(|id| by_id.remove(id.as_str())).collect()
}

/// Fetch records for `ids` and return them in `ids` order.
pub async fn hydrate_in_order(records: &dyn RecordStore, ids: &[NodeId]) -> AppResult<Vec<Record>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::with_capacity(ids.len());
    let unique: Vec<NodeId> = ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();

    let fetched = records.find_many(&unique).await?;
    let ordered = reorder_by_ids(&unique, fetched, |r| r.id.as_str());

    if ordered.len() < unique.len() {
        let present: HashSet<&str> = ordered.iter().map(|r| r.id.as_str()).collect();
        let missing: Vec<&str> = unique
            .iter()
            .map(String::as_str)
            .filter(|id| !present.contains(id))
            .collect();
        warn!(
            "{} graph node(s) have no primary record: {:?}",
            missing.len(),
            missing
        );
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::record_store::SqliteRecordStore;

    fn ids(list: &[&str]) -> Vec<NodeId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reorder_follows_id_order() {
        let items = vec!["c", "a", "b"];
        let ordered = reorder_by_ids(&ids(&["a", "b", "c"]), items, |s| s);
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reorder_skips_missing_and_duplicates() {
        let items = vec!["b", "a"];
        let ordered = reorder_by_ids(&ids(&["a", "x", "b", "a"]), items, |s| s);
        assert_eq!(ordered, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_hydrate_in_order() {
        let store = SqliteRecordStore::new_in_memory().await.unwrap();
        for id in ["u1", "u2", "u3"] {
            store.upsert(&Record::user(id, id, id, None)).await.unwrap();
        }

        let hydrated = hydrate_in_order(&store, &ids(&["u3", "ghost", "u1", "u2", "u3"]))
            .await
            .unwrap();
        let order: Vec<_> = hydrated.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["u3", "u1", "u2"]);
    }
}
