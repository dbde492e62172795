use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::FeedQuery;
use crate::infra::db::Db;

pub const POSTS_COLLECTION: &str = "posts";

const CHANGE_CHANNEL: &str = "documents_changed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub collection: &'static str,
    pub id: Uuid,
}

impl DocumentRef {
    pub fn post(id: Uuid) -> Self {
        Self {
            collection: POSTS_COLLECTION,
            id,
        }
    }
}

/// A partial write to one array field of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldMutation {
    /// Adds `value` unless an equal element is already present.
    AddToSet { field: &'static str, value: Value },
    /// Removes every element equal to `value`. Object elements that carry an
    /// `id` match on the id alone. Fails when no element matched.
    RemoveFromSet { field: &'static str, value: Value },
    /// Appends `value` at the end.
    Append { field: &'static str, value: Value },
}

impl FieldMutation {
    pub fn field(&self) -> &'static str {
        match self {
            Self::AddToSet { field, .. }
            | Self::RemoveFromSet { field, .. }
            | Self::Append { field, .. } => field,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::AddToSet { value, .. }
            | Self::RemoveFromSet { value, .. }
            | Self::Append { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: Uuid,
    pub body: Value,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub collection: String,
    pub id: Uuid,
    pub op: ChangeOp,
}

/// Write side used by optimistic mutations. Each call either applies fully or
/// leaves the document untouched.
#[async_trait]
pub trait RemoteMutationSink: Send + Sync {
    async fn mutate(&self, document: DocumentRef, mutation: FieldMutation) -> Result<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn create(&self, collection: &'static str, body: Value) -> Result<RawDocument>;

    async fn get(&self, document: DocumentRef) -> Result<Option<RawDocument>>;

    async fn delete(&self, document: DocumentRef) -> Result<bool>;

    /// Posts matching `query`, newest first.
    async fn query(&self, query: &FeedQuery) -> Result<Vec<RawDocument>>;

    /// Change notices for every collection. The stream ends or errors when the
    /// underlying connection is lost.
    async fn watch(&self) -> Result<BoxStream<'static, Result<ChangeNotice>>>;
}

#[derive(Clone)]
pub struct PgDocumentStore {
    db: Db,
}

impl PgDocumentStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn raw_document(row: &PgRow) -> Result<RawDocument> {
    Ok(RawDocument {
        id: row.try_get("id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RemoteMutationSink for PgDocumentStore {
    async fn mutate(&self, document: DocumentRef, mutation: FieldMutation) -> Result<()> {
        let sql = match &mutation {
            FieldMutation::AddToSet { .. } => {
                "UPDATE documents \
                 SET body = jsonb_set(body, ARRAY[$3], \
                        CASE WHEN COALESCE(body->$3, '[]'::jsonb) @> jsonb_build_array($4::jsonb) \
                             THEN COALESCE(body->$3, '[]'::jsonb) \
                             ELSE COALESCE(body->$3, '[]'::jsonb) || jsonb_build_array($4::jsonb) \
                        END), \
                     updated_at = now() \
                 WHERE collection = $1 AND id = $2"
            }
            // Elements with an id match on it, id-less legacy elements only on
            // their whole value. Removing nothing leaves the row untouched.
            FieldMutation::RemoveFromSet { .. } => {
                "UPDATE documents \
                 SET body = jsonb_set(body, ARRAY[$3], COALESCE(( \
                        SELECT jsonb_agg(element ORDER BY position) \
                        FROM jsonb_array_elements(COALESCE(body->$3, '[]'::jsonb)) \
                             WITH ORDINALITY AS elements(element, position) \
                        WHERE NOT CASE \
                            WHEN element = $4::jsonb THEN true \
                            WHEN jsonb_typeof(element) = 'object' \
                                 AND jsonb_typeof($4::jsonb) = 'object' \
                                 AND element ? 'id' THEN element->'id' = $4::jsonb->'id' \
                            ELSE false \
                        END \
                     ), '[]'::jsonb)), \
                     updated_at = now() \
                 WHERE collection = $1 AND id = $2 \
                   AND EXISTS ( \
                        SELECT 1 \
                        FROM jsonb_array_elements(COALESCE(body->$3, '[]'::jsonb)) AS elements(element) \
                        WHERE CASE \
                            WHEN element = $4::jsonb THEN true \
                            WHEN jsonb_typeof(element) = 'object' \
                                 AND jsonb_typeof($4::jsonb) = 'object' \
                                 AND element ? 'id' THEN element->'id' = $4::jsonb->'id' \
                            ELSE false \
                        END \
                   )"
            }
            FieldMutation::Append { .. } => {
                "UPDATE documents \
                 SET body = jsonb_set(body, ARRAY[$3], \
                        COALESCE(body->$3, '[]'::jsonb) || jsonb_build_array($4::jsonb)), \
                     updated_at = now() \
                 WHERE collection = $1 AND id = $2"
            }
        };

        let result = sqlx::query(sql)
            .bind(document.collection)
            .bind(document.id)
            .bind(mutation.field())
            .bind(mutation.value())
            .execute(self.db.pool())
            .await
            .with_context(|| format!("failed to update {} on {}", mutation.field(), document.id))?;

        if result.rows_affected() == 0 {
            return Err(match mutation {
                FieldMutation::RemoveFromSet { field, .. } => anyhow!(
                    "document {} not found or {} holds no matching element",
                    document.id,
                    field
                ),
                _ => anyhow!("document {} not found", document.id),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }

    async fn create(&self, collection: &'static str, body: Value) -> Result<RawDocument> {
        let row = sqlx::query(
            "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
             RETURNING id, body, created_at",
        )
        .bind(collection)
        .bind(Uuid::new_v4())
        .bind(body)
        .fetch_one(self.db.pool())
        .await?;

        raw_document(&row)
    }

    async fn get(&self, document: DocumentRef) -> Result<Option<RawDocument>> {
        let row = sqlx::query(
            "SELECT id, body, created_at FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(document.collection)
        .bind(document.id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(raw_document).transpose()
    }

    async fn delete(&self, document: DocumentRef) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(document.collection)
            .bind(document.id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, query: &FeedQuery) -> Result<Vec<RawDocument>> {
        let rows = match query {
            FeedQuery::Discover => {
                sqlx::query(
                    "SELECT id, body, created_at \
                     FROM documents \
                     WHERE collection = $1 \
                     ORDER BY created_at DESC, id DESC",
                )
                .bind(POSTS_COLLECTION)
                .fetch_all(self.db.pool())
                .await?
            }
            FeedQuery::Gallery { owner_id } => {
                sqlx::query(
                    "SELECT id, body, created_at \
                     FROM documents \
                     WHERE collection = $1 AND body->>'user_id' = $2 \
                     ORDER BY created_at DESC, id DESC",
                )
                .bind(POSTS_COLLECTION)
                .bind(owner_id.to_string())
                .fetch_all(self.db.pool())
                .await?
            }
        };

        rows.iter().map(raw_document).collect()
    }

    async fn watch(&self) -> Result<BoxStream<'static, Result<ChangeNotice>>> {
        let mut listener = PgListener::connect_with(self.db.pool()).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let notices = listener.into_stream().map(|notification| {
            let notification = notification?;
            let notice = serde_json::from_str::<ChangeNotice>(notification.payload())
                .with_context(|| format!("invalid change notice: {}", notification.payload()))?;
            Ok(notice)
        });

        Ok(notices.boxed())
    }
}
