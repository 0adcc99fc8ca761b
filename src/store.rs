//! SQLite persistence for documents and chunks.
//!
//! Two collections back the engine state:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `docs` | Document metadata keyed by id |
//! | `chunks` | Chunk text + nullable embedding BLOB, indexed by `doc_id` |
//!
//! Embeddings are stored packed as little-endian f32 bytes next to the chunk
//! record; unrecognized import fields ride along as JSON text in `extra_json`.
//! Writes are transactional: a bulk put is all-or-nothing, an ingestion
//! commit covers the document and its chunks in one transaction, and an
//! import swaps the whole corpus through `replace_all` in one transaction.
//! `clear_all` runs two transactions in order (chunks, then docs).
//!
//! Insertion order is observable: `load_all` returns rows in `rowid` order,
//! which is what keeps the in-memory index's tie-break stable across
//! restarts.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;
use crate::models::{Chunk, Document};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` in WAL mode.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create the schema. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS docs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                added_at TEXT NOT NULL,
                extra_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                doc_name TEXT NOT NULL,
                page INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB,
                extra_json TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (doc_id) REFERENCES docs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Every document and chunk, in insertion order.
    pub async fn load_all(&self) -> Result<(Vec<Document>, Vec<Chunk>)> {
        let doc_rows = sqlx::query(
            "SELECT id, name, mime_type, size_bytes, added_at, extra_json \
             FROM docs ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let docs: Vec<Document> = doc_rows
            .iter()
            .map(|row| Document {
                id: row.get("id"),
                name: row.get("name"),
                mime_type: row.get("mime_type"),
                size_bytes: row.get::<i64, _>("size_bytes") as u64,
                added_at: row.get("added_at"),
                extra: parse_extra(&row.get::<String, _>("extra_json")),
            })
            .collect();

        let chunk_rows = sqlx::query(
            "SELECT id, doc_id, doc_name, page, ordinal, text, embedding, extra_json \
             FROM chunks ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let chunks: Vec<Chunk> = chunk_rows
            .iter()
            .map(|row| Chunk {
                id: row.get("id"),
                doc_id: row.get("doc_id"),
                doc_name: row.get("doc_name"),
                page: row.get::<i64, _>("page") as u32,
                ordinal: row.get::<i64, _>("ordinal") as u32,
                text: row.get("text"),
                embedding: row
                    .get::<Option<Vec<u8>>, _>("embedding")
                    .map(|blob| blob_to_vec(&blob)),
                extra: parse_extra(&row.get::<String, _>("extra_json")),
            })
            .collect();

        Ok((docs, chunks))
    }

    /// Write documents in one transaction: all visible on success, none on
    /// failure.
    pub async fn put_documents(&self, docs: &[Document]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            insert_document(&mut tx, doc).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Write chunks in one transaction.
    pub async fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            insert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Commit one ingested document together with its chunks atomically.
    pub async fn commit_ingest(&self, doc: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_document(&mut tx, doc).await?;
        for chunk in chunks {
            insert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Swap the entire corpus for the given one in a single transaction.
    /// Used by import: either the old state survives intact or the new
    /// state is fully in place, never a half-cleared store.
    pub async fn replace_all(&self, docs: &[Document], chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM docs").execute(&mut *tx).await?;
        for doc in docs {
            insert_document(&mut tx, doc).await?;
        }
        for chunk in chunks {
            insert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace stored embeddings for the given chunk ids in one transaction.
    /// Used by re-indexing.
    pub async fn update_embeddings(&self, updates: &[(String, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in updates {
            sqlx::query("UPDATE chunks SET embedding = ? WHERE id = ?")
                .bind(vec_to_blob(vector))
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Empty both collections: chunks first, then docs, each in its own
    /// transaction.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM docs").execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }
}

async fn insert_document(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc: &Document,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO docs (id, name, mime_type, size_bytes, added_at, extra_json)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            mime_type = excluded.mime_type,
            size_bytes = excluded.size_bytes,
            added_at = excluded.added_at,
            extra_json = excluded.extra_json
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.name)
    .bind(&doc.mime_type)
    .bind(doc.size_bytes as i64)
    .bind(&doc.added_at)
    .bind(extra_to_json(&doc.extra))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_chunk(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, chunk: &Chunk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, doc_id, doc_name, page, ordinal, text, embedding, extra_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            doc_id = excluded.doc_id,
            doc_name = excluded.doc_name,
            page = excluded.page,
            ordinal = excluded.ordinal,
            text = excluded.text,
            embedding = excluded.embedding,
            extra_json = excluded.extra_json
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.doc_id)
    .bind(&chunk.doc_name)
    .bind(chunk.page as i64)
    .bind(chunk.ordinal as i64)
    .bind(&chunk.text)
    .bind(chunk.embedding.as_ref().map(|v| vec_to_blob(v)))
    .bind(extra_to_json(&chunk.extra))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn extra_to_json(extra: &serde_json::Map<String, serde_json::Value>) -> String {
    serde_json::to_string(extra).unwrap_or_else(|_| "{}".to_string())
}

fn parse_extra(json: &str) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            name: format!("{}.txt", id),
            mime_type: "text/plain".to_string(),
            size_bytes: 42,
            added_at: "2025-06-01T00:00:00Z".to_string(),
            extra: Default::default(),
        }
    }

    fn sample_chunk(doc_id: &str, ordinal: u32, embedded: bool) -> Chunk {
        Chunk {
            id: Chunk::make_id(doc_id, 1, ordinal),
            doc_id: doc_id.to_string(),
            doc_name: format!("{}.txt", doc_id),
            page: 1,
            ordinal,
            text: "some chunk text that is long enough".to_string(),
            embedding: embedded.then(|| vec![0.6, 0.8]),
            extra: Default::default(),
        }
    }

    async fn open_store(tmp: &TempDir) -> Store {
        let store = Store::connect(&tmp.path().join("gqa.sqlite")).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn roundtrip_preserves_order_and_embeddings() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let doc = sample_doc("d1");
        let chunks = vec![
            sample_chunk("d1", 0, true),
            sample_chunk("d1", 1, false),
            sample_chunk("d1", 2, true),
        ];
        store.put_documents(&[doc]).await.unwrap();
        store.put_chunks(&chunks).await.unwrap();

        let (docs, loaded) = store.load_all().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d1");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, "d1|p1|c0");
        assert_eq!(loaded[1].id, "d1|p1|c1");
        assert_eq!(loaded[0].embedding, Some(vec![0.6, 0.8]));
        assert!(loaded[1].embedding.is_none());
    }

    #[tokio::test]
    async fn update_embeddings_replaces_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .commit_ingest(&sample_doc("d1"), &[sample_chunk("d1", 0, false)])
            .await
            .unwrap();
        store
            .update_embeddings(&[("d1|p1|c0".to_string(), vec![1.0, 0.0])])
            .await
            .unwrap();

        let (_, chunks) = store.load_all().await.unwrap();
        assert_eq!(chunks[0].embedding, Some(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn replace_all_swaps_the_corpus() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .commit_ingest(&sample_doc("old"), &[sample_chunk("old", 0, true)])
            .await
            .unwrap();

        let new_doc = sample_doc("new");
        let new_chunks = vec![sample_chunk("new", 0, false), sample_chunk("new", 1, false)];
        store
            .replace_all(&[new_doc], &new_chunks)
            .await
            .unwrap();

        let (docs, chunks) = store.load_all().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "new");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.doc_id == "new"));
    }

    #[tokio::test]
    async fn extras_roundtrip_through_the_store() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let mut doc = sample_doc("d1");
        doc.extra
            .insert("origin".to_string(), serde_json::json!("web"));
        let mut chunk = sample_chunk("d1", 0, false);
        chunk.extra.insert("lang".to_string(), serde_json::json!("ko"));

        store.commit_ingest(&doc, &[chunk]).await.unwrap();

        let (docs, chunks) = store.load_all().await.unwrap();
        assert_eq!(docs[0].extra["origin"], "web");
        assert_eq!(chunks[0].extra["lang"], "ko");
    }

    #[tokio::test]
    async fn clear_all_empties_both_collections() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .commit_ingest(&sample_doc("d1"), &[sample_chunk("d1", 0, true)])
            .await
            .unwrap();
        store.clear_all().await.unwrap();

        let (docs, chunks) = store.load_all().await.unwrap();
        assert!(docs.is_empty());
        assert!(chunks.is_empty());
    }
}
