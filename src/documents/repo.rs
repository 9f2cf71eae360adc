use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub extracted_text: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub indexed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub extracted_text: String,
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A stored chunk vector, as scanned by search.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkEmbedding {
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct DocumentStats {
    pub documents: i64,
    pub indexed: i64,
    pub processing: i64,
    pub failed: i64,
    pub chunks: i64,
    pub total_bytes: i64,
}

/// Every method is scoped to `owner`; rows of other users are invisible.
#[async_trait]
pub trait DocumentRepo: Send + Sync {
    async fn insert(&self, doc: NewDocument) -> anyhow::Result<Document>;
    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Document>>;
    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Document>>;
    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>>;

    /// Removes the document and its chunks, returning the removed row.
    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>>;

    /// Swaps the chunk set of a document and marks it indexed. Returns false
    /// when the document no longer exists.
    async fn replace_chunks(&self, owner: Uuid, id: Uuid, chunks: Vec<NewChunk>)
        -> anyhow::Result<bool>;

    async fn set_status(
        &self,
        owner: Uuid,
        id: Uuid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn chunk_embeddings(&self, owner: Uuid) -> anyhow::Result<Vec<ChunkEmbedding>>;
    async fn stats(&self, owner: Uuid) -> anyhow::Result<DocumentStats>;
    async fn storage_keys(&self, owner: Uuid) -> anyhow::Result<Vec<String>>;
}

const DOC_COLUMNS: &str = "id, owner_id, filename, content_type, size_bytes, storage_key, \
                           extracted_text, status, error, created_at, indexed_at";

pub struct PgDocumentRepo {
    db: PgPool,
}

impl PgDocumentRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentRepo for PgDocumentRepo {
    async fn insert(&self, doc: NewDocument) -> anyhow::Result<Document> {
        let row = sqlx::query_as::<_, Document>(&format!(
            r#"
            INSERT INTO documents
                (id, owner_id, filename, content_type, size_bytes, storage_key, extracted_text, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'processing')
            RETURNING {DOC_COLUMNS}
            "#
        ))
        .bind(doc.id)
        .bind(doc.owner_id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.size_bytes)
        .bind(&doc.storage_key)
        .bind(&doc.extracted_text)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(&format!(
            r#"
            SELECT {DOC_COLUMNS}
            FROM documents
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOC_COLUMNS} FROM documents WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>> {
        // chunks go with the row (ON DELETE CASCADE)
        let row = sqlx::query_as::<_, Document>(&format!(
            "DELETE FROM documents WHERE id = $1 AND owner_id = $2 RETURNING {DOC_COLUMNS}"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn replace_chunks(
        &self,
        owner: Uuid,
        id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM documents WHERE id = $1 AND owner_id = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (document_id, owner_id, chunk_index, content, embedding)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(owner)
            .bind(chunk.index)
            .bind(&chunk.content)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE documents
               SET status = 'indexed', error = NULL, indexed_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn set_status(
        &self,
        owner: Uuid,
        id: Uuid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE documents SET status = $3, error = $4 WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .bind(status.as_str())
            .bind(error)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn chunk_embeddings(&self, owner: Uuid) -> anyhow::Result<Vec<ChunkEmbedding>> {
        let rows = sqlx::query_as::<_, ChunkEmbedding>(
            r#"
            SELECT document_id, chunk_index, content, embedding
            FROM document_chunks
            WHERE owner_id = $1
            "#,
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn stats(&self, owner: Uuid) -> anyhow::Result<DocumentStats> {
        let stats = sqlx::query_as::<_, DocumentStats>(
            r#"
            SELECT COUNT(*)                                        AS documents,
                   COUNT(*) FILTER (WHERE status = 'indexed')      AS indexed,
                   COUNT(*) FILTER (WHERE status = 'processing')   AS processing,
                   COUNT(*) FILTER (WHERE status = 'failed')       AS failed,
                   (SELECT COUNT(*) FROM document_chunks c WHERE c.owner_id = $1) AS chunks,
                   COALESCE(SUM(size_bytes), 0)::BIGINT            AS total_bytes
            FROM documents
            WHERE owner_id = $1
            "#,
        )
        .bind(owner)
        .fetch_one(&self.db)
        .await?;
        Ok(stats)
    }

    async fn storage_keys(&self, owner: Uuid) -> anyhow::Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT storage_key FROM documents WHERE owner_id = $1",
        )
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        Ok(keys)
    }
}
