//! Backend-specific algorithms for emptying the store.
//!
//! The strategy is picked once at startup from `reset.strategy` and shared by
//! every job. Both variants skip the ledger and migration tables, are safe to
//! re-run on an empty store, and stop at the first error.
//!
//! | Variant       | Table list              | Atomicity                          |
//! |---------------|-------------------------|------------------------------------|
//! | `enumerated`  | fixed, children first   | none: earlier deletes stay applied |
//! | `catalog`     | read from `sqlite_schema` | one transaction, rolled back on error |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::db::{ResetDb, ResetResult, is_protected_table};
use crate::errors::ResetError;

/// Default collections for the enumerated strategy, children before parents.
pub const DEFAULT_COLLECTIONS: &[&str] = &["project_skills", "projects", "skills", "experience"];

/// Emitted once per collection a strategy has emptied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCleared {
    pub collection: String,
    pub rows_deleted: usize,
    /// 1-based position of this collection in the run.
    pub index: usize,
    pub total: usize,
}

pub trait ClearingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Empty every tracked collection, reporting each one through
    /// `on_cleared`. Returns the number of collections emptied.
    fn clear(
        &self,
        db: &ResetDb,
        on_cleared: &mut dyn FnMut(CollectionCleared),
    ) -> ResetResult<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Fixed, dependency-ordered list. For embedded deployments.
    #[default]
    Enumerated,
    /// Whatever user tables the catalog reports. For full SQL deployments.
    Catalog,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Enumerated => write!(f, "enumerated"),
            StrategyKind::Catalog => write!(f, "catalog"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enumerated" => Ok(StrategyKind::Enumerated),
            "catalog" => Ok(StrategyKind::Catalog),
            _ => anyhow::bail!(
                "Invalid reset strategy '{}'. Valid values: enumerated, catalog",
                s
            ),
        }
    }
}

/// Build the strategy selected by configuration.
pub fn build_strategy(
    kind: StrategyKind,
    collections: &[String],
) -> ResetResult<Arc<dyn ClearingStrategy>> {
    let strategy: Arc<dyn ClearingStrategy> = match kind {
        StrategyKind::Enumerated => Arc::new(EnumeratedStrategy::new(collections.to_vec())?),
        StrategyKind::Catalog => Arc::new(CatalogStrategy),
    };
    Ok(strategy)
}

/// Reject names that are not plain SQL identifiers or that name a protected
/// table.
pub fn validate_collection_name(name: &str) -> ResetResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(ResetError::InvalidCollectionName {
            name: name.to_string(),
        });
    }
    if is_protected_table(name) {
        return Err(ResetError::ProtectedCollection {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn delete_all(conn: &rusqlite::Connection, collection: &str) -> ResetResult<usize> {
    conn.execute(&format!("DELETE FROM {}", quote_ident(collection)), [])
        .map_err(|source| ResetError::ClearFailed {
            collection: collection.to_string(),
            source,
        })
}

// ── Enumerated ────────────────────────────────────────────────────────

/// Empties a fixed list of collections in order, one batch delete each.
///
/// There is no wrapping transaction: if collection `k` fails, collections
/// `1..k` stay cleared and the rest are untouched.
#[derive(Debug, Clone)]
pub struct EnumeratedStrategy {
    collections: Vec<String>,
}

impl EnumeratedStrategy {
    pub fn new(collections: Vec<String>) -> ResetResult<Self> {
        for (i, name) in collections.iter().enumerate() {
            validate_collection_name(name)?;
            if collections[..i].iter().any(|c| c.eq_ignore_ascii_case(name)) {
                return Err(ResetError::Other(anyhow::anyhow!(
                    "Collection '{}' is listed more than once",
                    name
                )));
            }
        }
        Ok(Self { collections })
    }

    pub fn with_defaults() -> Self {
        Self {
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }
}

impl ClearingStrategy for EnumeratedStrategy {
    fn name(&self) -> &'static str {
        "enumerated"
    }

    fn clear(
        &self,
        db: &ResetDb,
        on_cleared: &mut dyn FnMut(CollectionCleared),
    ) -> ResetResult<usize> {
        let total = self.collections.len();
        for (i, collection) in self.collections.iter().enumerate() {
            let rows_deleted = delete_all(db.conn(), collection)?;
            tracing::debug!(collection = %collection, rows_deleted, "collection cleared");
            on_cleared(CollectionCleared {
                collection: collection.clone(),
                rows_deleted,
                index: i + 1,
                total,
            });
        }
        Ok(total)
    }
}

// ── Catalog-driven ────────────────────────────────────────────────────

/// Empties every user table the SQLite catalog reports, excluding system,
/// migration and ledger tables, inside one transaction with foreign-key
/// checks deferred to commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStrategy;

impl CatalogStrategy {
    /// User tables eligible for clearing, in name order.
    pub fn user_tables(db: &ResetDb) -> ResetResult<Vec<String>> {
        let mut stmt = db
            .conn()
            .prepare("SELECT name FROM sqlite_schema WHERE type = 'table' ORDER BY name")
            .context("Failed to prepare catalog query")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query catalog")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read catalog row")?;
        Ok(names
            .into_iter()
            .filter(|name| !is_protected_table(name))
            .collect())
    }
}

impl ClearingStrategy for CatalogStrategy {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn clear(
        &self,
        db: &ResetDb,
        on_cleared: &mut dyn FnMut(CollectionCleared),
    ) -> ResetResult<usize> {
        let tables = Self::user_tables(db)?;
        let total = tables.len();

        let tx = db
            .conn()
            .unchecked_transaction()
            .context("Failed to begin catalog clear transaction")?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")
            .context("Failed to defer foreign keys")?;

        for (i, table) in tables.iter().enumerate() {
            let rows_deleted = delete_all(&tx, table)?;
            tracing::debug!(collection = %table, rows_deleted, "collection cleared");
            on_cleared(CollectionCleared {
                collection: table.clone(),
                rows_deleted,
                index: i + 1,
                total,
            });
        }

        tx.commit().context("Failed to commit catalog clear")?;
        Ok(total)
    }
}
