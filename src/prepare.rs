//! Prepared-query cache (spec.md §4.6): a bidirectional mapping between a
//! logical query (its CQL text) and the server-assigned opaque QueryId,
//! mutated under a single lock so inserts and lookups observe a consistent
//! view.

use std::{collections::HashMap, sync::Mutex};

use crate::error::{ErrorKind, Result};

#[derive(Default)]
struct Tables {
    by_query: HashMap<String, Vec<u8>>,
    by_id: HashMap<Vec<u8>, String>,
}

/// Bidirectional `query text <-> QueryId` cache, safe for concurrent
/// lookup and insert.
pub(crate) struct PreparedCache {
    tables: Mutex<Tables>,
}

impl PreparedCache {
    pub(crate) fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    pub(crate) fn lookup_by_query(&self, query: &str) -> Option<Vec<u8>> {
        self.tables.lock().unwrap().by_query.get(query).cloned()
    }

    pub(crate) fn lookup_by_id(&self, id: &[u8]) -> Option<String> {
        self.tables.lock().unwrap().by_id.get(id).cloned()
    }

    /// Every query text currently cached, used by the cluster controller's
    /// "prepare all cached statements on a host that just came back up"
    /// recovery step (spec.md §4.9's `prepareAll`).
    pub(crate) fn all_queries(&self) -> Vec<String> {
        self.tables.lock().unwrap().by_query.keys().cloned().collect()
    }

    /// Records a successful PREPARE. Both indices are updated under the
    /// same critical section; a different QueryId later observed for a
    /// query text already mapped to a distinct QueryId is a fatal
    /// HashCollision (spec.md §4.6) rather than a silent overwrite, since
    /// the driver's retry/re-prepare logic depends on the mapping being
    /// stable once established.
    pub(crate) fn insert(&self, query: &str, id: Vec<u8>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.by_query.get(query) {
            if existing != &id {
                return Err(ErrorKind::InternalError(format!(
                    "prepared-query hash collision for {query:?}: existing id {} != new id {}",
                    hex::encode(existing),
                    hex::encode(&id),
                ))
                .into());
            }
            return Ok(());
        }
        tables.by_query.insert(query.to_string(), id.clone());
        tables.by_id.insert(id, query.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inserts_and_looks_up_both_directions() {
        let cache = PreparedCache::new();
        cache.insert("SELECT * FROM t", vec![1, 2, 3]).unwrap();
        assert_eq!(cache.lookup_by_query("SELECT * FROM t"), Some(vec![1, 2, 3]));
        assert_eq!(cache.lookup_by_id(&[1, 2, 3]), Some("SELECT * FROM t".to_string()));
    }

    #[test]
    fn reinserting_identical_mapping_is_a_no_op() {
        let cache = PreparedCache::new();
        cache.insert("SELECT 1", vec![9]).unwrap();
        cache.insert("SELECT 1", vec![9]).unwrap();
        assert_eq!(cache.lookup_by_query("SELECT 1"), Some(vec![9]));
    }

    #[test]
    fn conflicting_id_for_same_query_is_a_hash_collision() {
        let cache = PreparedCache::new();
        cache.insert("SELECT 1", vec![9]).unwrap();
        let err = cache.insert("SELECT 1", vec![10]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InternalError(_)));
    }
}
