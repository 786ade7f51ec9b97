//! Long-term memory persistence.
//!
//! Only the long-term tier outlives a process: conversational history and the
//! working set are rebuilt by the next session.

use crate::error::{Error, Result};
use crate::memory::schema::{initialize_schema, is_initialized};
use crate::memory::types::{MemoryId, MemoryItem, MemoryRole, MemoryTier};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Durable storage for the long-term tier.
pub trait LongTermStore: Send + Sync {
    /// Load every persisted item, oldest first.
    fn load(&self) -> Result<Vec<MemoryItem>>;

    /// Replace the persisted set with `items`.
    fn save(&self, items: &[MemoryItem]) -> Result<()>;
}

/// SQLite-backed long-term store.
///
/// Several projects can share one database file; each store instance only sees
/// rows for its own scope.
pub struct SqliteLongTermStore {
    conn: Arc<Mutex<Connection>>,
    scope: String,
}

impl SqliteLongTermStore {
    pub const DEFAULT_SCOPE: &'static str = "default";

    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            scope: Self::DEFAULT_SCOPE.to_string(),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::MemoryStorage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::MemoryStorage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            scope: Self::DEFAULT_SCOPE.to_string(),
        })
    }

    /// Restrict this store to rows for `scope` (usually the project root).
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&mut conn).map_err(|e| Error::MemoryStorage(e.to_string()))
    }

    /// Map a row, or `None` when its id is unusable.
    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Option<MemoryItem>> {
        let id_str: String = row.get(0)?;
        let Some(id) = MemoryId::parse(&id_str) else {
            warn!(id = %id_str, "Skipping long-term row with a malformed id");
            return Ok(None);
        };
        let role_str: String = row.get(2)?;
        let tags_json: String = row.get(4)?;
        let created_at_str: String = row.get(7)?;

        let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(MemoryItem {
            id,
            content: row.get(1)?,
            role: MemoryRole::parse(&role_str).unwrap_or(MemoryRole::System),
            tier: MemoryTier::LongTerm,
            relevance: row.get(3)?,
            tags,
            created_at,
            source: row.get(5)?,
            seq: row.get::<_, i64>(6)? as u64,
        }))
    }
}

impl LongTermStore for SqliteLongTermStore {
    fn load(&self) -> Result<Vec<MemoryItem>> {
        let items = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, content, role, relevance, tags, source, seq, created_at
                 FROM long_term_items WHERE scope = ?1
                 ORDER BY seq ASC, created_at ASC",
            )?;
            let items = stmt
                .query_map(params![self.scope], |row| Self::row_to_item(row))?
                .filter_map(|r| match r {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable long-term row");
                        None
                    }
                })
                .collect::<Vec<_>>();
            Ok(items)
        })?;

        debug!(scope = %self.scope, count = items.len(), "Loaded long-term memory");
        Ok(items)
    }

    fn save(&self, items: &[MemoryItem]) -> Result<()> {
        let mut encoded = Vec::with_capacity(items.len());
        for item in items {
            encoded.push((item, serde_json::to_string(&item.tags)?));
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM long_term_items WHERE scope = ?1",
                params![self.scope],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO long_term_items
                        (id, scope, content, role, relevance, tags, source, seq, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for (item, tags) in &encoded {
                    stmt.execute(params![
                        item.id.to_string(),
                        self.scope,
                        item.content,
                        item.role.as_str(),
                        item.relevance,
                        tags,
                        item.source,
                        item.seq as i64,
                        item.created_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()
        })?;

        debug!(scope = %self.scope, count = items.len(), "Saved long-term memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::COMPRESSION_TAG;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn decision(text: &str, seq: u64) -> MemoryItem {
        let mut item = MemoryItem::new(MemoryTier::LongTerm, MemoryRole::System, text)
            .with_tags(["architecture"]);
        item.seq = seq;
        item
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = SqliteLongTermStore::in_memory().unwrap();
        let items = vec![
            decision("Use tokio", 1),
            decision("Summary of setup", 2).with_tags([COMPRESSION_TAG]),
        ];

        store.save(&items).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, items[0].id);
        assert_eq!(loaded[0].content, "Use tokio");
        assert!(loaded[1].is_compression_summary());
        assert!(loaded[1].has_tag("architecture"));
    }

    #[test]
    fn test_save_replaces_previous_set() {
        let store = SqliteLongTermStore::in_memory().unwrap();
        store.save(&[decision("old", 1)]).unwrap();
        store.save(&[decision("new", 1)]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "new");
    }

    #[test]
    fn test_malformed_id_row_is_skipped() {
        let store = SqliteLongTermStore::in_memory().unwrap();
        store.save(&[decision("kept", 1)]).unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO long_term_items
                        (id, scope, content, role, relevance, tags, source, seq, created_at)
                     VALUES ('not-a-uuid', ?1, 'corrupt', 'system', 1.0, '[]', NULL, 2, ?2)",
                    params![store.scope, Utc::now().to_rfc3339()],
                )
            })
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "kept");

        // Saving the loaded set drops the corrupt row instead of duplicating it
        store.save(&loaded).unwrap();
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].id, loaded[0].id);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.db");

        let alpha = SqliteLongTermStore::open(&path).unwrap().with_scope("alpha");
        alpha.save(&[decision("alpha fact", 1)]).unwrap();

        let beta = SqliteLongTermStore::open(&path).unwrap().with_scope("beta");
        assert!(beta.load().unwrap().is_empty());

        let reopened = SqliteLongTermStore::open(&path).unwrap().with_scope("alpha");
        assert_eq!(reopened.load().unwrap()[0].content, "alpha fact");
    }
}
