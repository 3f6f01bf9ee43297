use crate::error::Result;
use crate::models::{Relation, RelationKind};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Weighted, undirected "played consecutively" graph
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Strengthen the edge between `a` and `b` by one. Self-edges are ignored.
    async fn add_relation(&self, kind: RelationKind, a: i64, b: i64) -> Result<()>;

    /// Neighbours of `id`, heaviest first
    async fn get_relations(&self, kind: RelationKind, id: i64) -> Result<Vec<Relation>>;
}

fn table(kind: RelationKind) -> &'static str {
    match kind {
        RelationKind::Song => "songrelations",
        RelationKind::Artist => "artistrelations",
    }
}

pub struct SqliteRelationStore {
    db: SqlitePool,
}

impl SqliteRelationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RelationStore for SqliteRelationStore {
    async fn add_relation(&self, kind: RelationKind, a: i64, b: i64) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let (ida, idb) = if a < b { (a, b) } else { (b, a) };

        sqlx::query(&format!(
            "INSERT INTO {} (ida, idb, weight) VALUES (?, ?, 1) \
             ON CONFLICT(ida, idb) DO UPDATE SET weight = weight + 1",
            table(kind)
        ))
        .bind(ida)
        .bind(idb)
        .execute(&self.db)
        .await?;

        tracing::debug!("Strengthened {} relation {} <-> {}", kind.as_str(), ida, idb);
        Ok(())
    }

    async fn get_relations(&self, kind: RelationKind, id: i64) -> Result<Vec<Relation>> {
        let table = table(kind);
        let rows: Vec<(i64, i64)> = sqlx::query_as(&format!(
            "SELECT idb AS id, weight FROM {table} WHERE ida = ? \
             UNION ALL \
             SELECT ida AS id, weight FROM {table} WHERE idb = ? \
             ORDER BY weight DESC, id ASC"
        ))
        .bind(id)
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, weight)| Relation { id, weight })
            .collect())
    }
}
