//! Durable vector index on SQLite
//!
//! ## Database Schema
//!
//! ```sql
//! -- One row per collection; `generation` is the live version.
//! CREATE TABLE collections (
//!     name TEXT PRIMARY KEY,
//!     generation INTEGER NOT NULL,
//!     dimension INTEGER,               -- NULL until the first vector is stored
//!     model_id TEXT,
//!     source_fingerprint TEXT,
//!     built_at TEXT NOT NULL
//! );
//!
//! -- Entries of every generation; only rows matching the live generation are visible.
//! CREATE TABLE entries (
//!     collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
//!     generation INTEGER NOT NULL,
//!     chunk_id INTEGER NOT NULL,
//!     source_label TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB NOT NULL,         -- f16 vector
//!     PRIMARY KEY (collection, generation, chunk_id)
//! );
//! ```
//!
//! Rebuilds write the new generation, move the pointer and delete the old rows in
//! one transaction. Queries read the pointer and the rows inside one read
//! transaction, so under WAL they always see one complete generation.

use super::{
    Collection, CollectionInfo, CollectionMeta, IndexedEntry, RetrievalResult, StorageMode,
    VectorIndex, check_entries, check_name, check_query,
};
use crate::error::{IndexError, Result};
use crate::similarity::rank;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use sunzi_chunk::Chunk;
use tokio::sync::Mutex;

/// Database file created inside the storage directory.
pub const DB_FILE_NAME: &str = "sunzi.db";

const INFO_QUERY: &str = r#"
    SELECT c.name, c.generation, c.dimension, c.model_id, c.source_fingerprint, c.built_at,
           (SELECT COUNT(*) FROM entries e
             WHERE e.collection = c.name AND e.generation = c.generation) AS entry_count
    FROM collections c
"#;

struct CollectionRow {
    generation: i64,
    dimension: Option<usize>,
}

/// SQLite-backed [`VectorIndex`].
///
/// Writes are serialized through an async mutex; reads run concurrently.
#[derive(Debug)]
pub struct SqliteIndex {
    path: Option<PathBuf>,
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteIndex {
    /// Open (or create) the durable index stored in directory `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base).await?;
        let db_path = base.join(DB_FILE_NAME);

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;

        tracing::debug!("Opened vector index at {}", db_path.display());
        Self::new_with_pool(Some(base.to_path_buf()), pool).await
    }

    /// Schema and queries against a private `:memory:` database, for tests.
    #[cfg(test)]
    pub(crate) async fn open_memory() -> Result<Self> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.foreign_keys(true))
            .await?;
        Self::new_with_pool(None, pool).await
    }

    async fn new_with_pool(path: Option<PathBuf>, pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            path,
            pool,
            write_lock: Mutex::new(()),
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                generation INTEGER NOT NULL,
                dimension INTEGER,
                model_id TEXT,
                source_fingerprint TEXT,
                built_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                collection TEXT NOT NULL,
                generation INTEGER NOT NULL,
                chunk_id INTEGER NOT NULL,
                source_label TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, generation, chunk_id),
                FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_row(conn: &mut SqliteConnection, name: &str) -> Result<Option<CollectionRow>> {
        let row = sqlx::query("SELECT generation, dimension FROM collections WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(|row| -> Result<CollectionRow> {
            let dimension: Option<i64> = row.try_get("dimension")?;
            Ok(CollectionRow {
                generation: row.try_get("generation")?,
                dimension: dimension.map(|d| d as usize),
            })
        })
        .transpose()
    }

    async fn insert_entries(
        conn: &mut SqliteConnection,
        name: &str,
        generation: i64,
        entries: &[IndexedEntry],
    ) -> Result<()> {
        for entry in entries {
            let chunk = entry.chunk();
            sqlx::query(
                r#"
                INSERT INTO entries (collection, generation, chunk_id, source_label, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(name)
            .bind(generation)
            .bind(chunk.id())
            .bind(chunk.source_label())
            .bind(chunk.text())
            .bind(bytemuck::cast_slice::<f16, u8>(entry.vector()))
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => IndexError::DuplicateId {
                    collection: name.to_string(),
                    id: chunk.id(),
                },
                other => other.into(),
            })?;
        }
        Ok(())
    }
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f16>> {
    if bytes.is_empty() || bytes.len() % std::mem::size_of::<f16>() != 0 {
        return Err(IndexError::corrupt(format!(
            "embedding blob of {} bytes is not an f16 vector",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec::<u8, f16>(bytes))
}

fn info_from_row(row: &SqliteRow) -> Result<CollectionInfo> {
    let dimension: Option<i64> = row.try_get("dimension")?;
    let entry_count: i64 = row.try_get("entry_count")?;
    let built_at: DateTime<Utc> = row.try_get("built_at")?;
    Ok(CollectionInfo {
        name: row.try_get("name")?,
        generation: row.try_get("generation")?,
        dimension: dimension.map(|d| d as usize),
        meta: CollectionMeta {
            model_id: row.try_get("model_id")?,
            source_fingerprint: row.try_get("source_fingerprint")?,
        },
        entry_count: entry_count as usize,
        built_at,
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn create_collection(&self, name: &str) -> Result<Collection> {
        check_name(name)?;
        let _guard = self.write_lock.lock().await;

        let result = sqlx::query(
            "INSERT INTO collections (name, generation, built_at) VALUES (?1, 1, ?2)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::AlreadyExists {
                name: name.to_string(),
            });
        }
        tracing::info!("Created collection '{}'", name);
        Ok(Collection::new(name, 1))
    }

    async fn replace_collection(&self, name: &str) -> Result<Collection> {
        check_name(name)?;
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let generation = Self::fetch_row(&mut tx, name)
            .await?
            .map_or(1, |row| row.generation + 1);

        sqlx::query(
            r#"
            INSERT INTO collections (name, generation, built_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                generation = excluded.generation,
                dimension = NULL,
                model_id = NULL,
                source_fingerprint = NULL,
                built_at = excluded.built_at
            "#,
        )
        .bind(name)
        .bind(generation)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entries WHERE collection = ?1 AND generation <> ?2")
            .bind(name)
            .bind(generation)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("Replaced collection '{}' (generation {})", name, generation);
        Ok(Collection::new(name, generation))
    }

    async fn collection(&self, name: &str) -> Result<Collection> {
        let mut conn = self.pool.acquire().await?;
        let row = Self::fetch_row(&mut conn, name)
            .await?
            .ok_or_else(|| IndexError::not_found(name))?;
        Ok(Collection::new(name, row.generation))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let row = sqlx::query(&format!("{INFO_QUERY} WHERE c.name = ?1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| IndexError::not_found(name))?;
        info_from_row(&row)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(&format!("{INFO_QUERY} ORDER BY c.name"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(info_from_row).collect()
    }

    async fn insert(&self, collection: &Collection, entries: Vec<IndexedEntry>) -> Result<usize> {
        let name = collection.name();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = Self::fetch_row(&mut tx, name)
            .await?
            .ok_or_else(|| IndexError::not_found(name))?;
        if row.generation != collection.generation() {
            return Err(IndexError::StaleHandle {
                name: name.to_string(),
                handle: collection.generation(),
                live: row.generation,
            });
        }

        // Ids already stored are caught by the primary key during the insert.
        let dimension = check_entries(name, &entries, row.dimension, &HashSet::new())?;
        Self::insert_entries(&mut tx, name, row.generation, &entries).await?;

        if row.dimension.is_none() {
            if let Some(dimension) = dimension {
                sqlx::query("UPDATE collections SET dimension = ?1 WHERE name = ?2")
                    .bind(dimension as i64)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        tracing::debug!("Inserted {} entries into '{}'", entries.len(), name);
        Ok(entries.len())
    }

    async fn rebuild_collection(
        &self,
        name: &str,
        meta: CollectionMeta,
        entries: Vec<IndexedEntry>,
    ) -> Result<Collection> {
        check_name(name)?;
        let dimension = check_entries(name, &entries, None, &HashSet::new())?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let generation = Self::fetch_row(&mut tx, name)
            .await?
            .map_or(1, |row| row.generation + 1);

        sqlx::query(
            r#"
            INSERT INTO collections (name, generation, dimension, model_id, source_fingerprint, built_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name) DO UPDATE SET
                generation = excluded.generation,
                dimension = excluded.dimension,
                model_id = excluded.model_id,
                source_fingerprint = excluded.source_fingerprint,
                built_at = excluded.built_at
            "#,
        )
        .bind(name)
        .bind(generation)
        .bind(dimension.map(|d| d as i64))
        .bind(&meta.model_id)
        .bind(&meta.source_fingerprint)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        Self::insert_entries(&mut tx, name, generation, &entries).await?;

        sqlx::query("DELETE FROM entries WHERE collection = ?1 AND generation <> ?2")
            .bind(name)
            .bind(generation)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            "Rebuilt collection '{}' with {} entries (generation {})",
            name,
            entries.len(),
            generation
        );
        Ok(Collection::new(name, generation))
    }

    async fn query(
        &self,
        collection: &Collection,
        vector: &[f16],
        k: usize,
    ) -> Result<RetrievalResult> {
        let name = collection.name();
        let mut tx = self.pool.begin().await?;

        let row = Self::fetch_row(&mut tx, name)
            .await?
            .ok_or_else(|| IndexError::not_found(name))?;
        check_query(vector, k, row.dimension)?;

        let rows = sqlx::query(
            "SELECT chunk_id, source_label, content, embedding FROM entries
             WHERE collection = ?1 AND generation = ?2",
        )
        .bind(name)
        .bind(row.generation)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk = Chunk::new(
                row.try_get::<i64, _>("chunk_id")?,
                row.try_get::<String, _>("content")?,
                row.try_get::<String, _>("source_label")?,
            );
            let bytes: Vec<u8> = row.try_get("embedding")?;
            candidates.push((chunk, decode_vector(&bytes)?));
        }

        let result = rank(
            vector,
            candidates.iter().map(|(chunk, v)| (chunk, v.as_slice())),
            k,
        );
        tracing::debug!(
            "Query on '{}' scored {} entries, returning {}",
            name,
            candidates.len(),
            result.len()
        );
        Ok(result)
    }

    fn storage_mode(&self) -> StorageMode {
        match &self.path {
            Some(path) => StorageMode::Durable { path: path.clone() },
            None => StorageMode::InMemory,
        }
    }
}
