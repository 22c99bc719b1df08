use async_trait::async_trait;
use futures_util::{TryStreamExt, stream};
use serde_json::Value;
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};

use crate::{
    BulkWrite, BulkWriteResult, Document, DocumentId, Filter, Result, StoreError,
    document::ID_FIELD,
    store::{DocumentStore, DocumentStream},
    write::validate_bulk,
};

/// Default number of rows fetched per page by `scan`.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 500;

/// PostgreSQL-backed document store implementation.
///
/// All collections share one `documents` table keyed by `(collection, id)`.
/// The identifier and the remaining fields are stored as JSONB.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    scan_page_size: usize,
}

impl PostgresDocumentStore {
    /// Creates a new PostgreSQL document store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }

    /// Sets how many rows `scan` fetches per round trip.
    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size.max(1);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_document(row: PgRow) -> Result<Document> {
        let id: Value = row.try_get("id")?;
        let body: Value = row.try_get("body")?;

        let id = DocumentId::from_value(&id)
            .ok_or_else(|| StoreError::InvalidDocument(format!("invalid stored id {id}")))?;
        let Value::Object(fields) = body else {
            return Err(StoreError::InvalidDocument(format!(
                "stored body for {id} is not an object"
            )));
        };

        Ok(Document { id, fields })
    }

    async fn fetch_page(
        pool: &PgPool,
        collection: &str,
        after: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let rows = match after {
            Some(last) => {
                sqlx::query(
                    r#"
                    SELECT id, body FROM documents
                    WHERE collection = $1 AND id > $2
                    ORDER BY id ASC
                    LIMIT $3
                    "#,
                )
                .bind(collection)
                .bind(last)
                .bind(limit as i64)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, body FROM documents
                    WHERE collection = $1
                    ORDER BY id ASC
                    LIMIT $2
                    "#,
                )
                .bind(collection)
                .bind(limit as i64)
                .fetch_all(pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_document).collect()
    }
}

/// A bind parameter collected while compiling a filter.
enum Param {
    Json(Value),
    Path(Vec<String>),
}

/// Compiles filters into a SQL condition over the `documents` table.
///
/// Parameter `$1` is always the collection name.
struct SqlFilter {
    sql: String,
    params: Vec<Param>,
}

impl SqlFilter {
    fn compile(filter: &Filter) -> Self {
        let mut compiled = Self {
            sql: String::new(),
            params: Vec::new(),
        };
        compiled.sql = compiled.condition(filter);
        compiled
    }

    fn placeholder(&mut self, param: Param) -> String {
        self.params.push(param);
        // $1 is reserved for the collection.
        format!("${}", self.params.len() + 1)
    }

    fn field(&mut self, field: &str) -> String {
        if field == ID_FIELD {
            return "id".to_string();
        }
        let path = self.placeholder(Param::Path(field.split('.').map(String::from).collect()));
        format!("(body #> {path}::text[])")
    }

    fn condition(&mut self, filter: &Filter) -> String {
        match filter {
            Filter::All => "TRUE".to_string(),
            Filter::Id(id) => {
                let value = self.placeholder(Param::Json(id.to_value()));
                format!("id = {value}::jsonb")
            }
            Filter::IdIn(ids) => {
                let ids = ids.iter().map(DocumentId::to_value).collect();
                let values = self.placeholder(Param::Json(Value::Array(ids)));
                format!("id IN (SELECT jsonb_array_elements({values}::jsonb))")
            }
            Filter::Eq { field, value } => {
                let field = self.field(field);
                let value = self.placeholder(Param::Json(value.clone()));
                format!(
                    "({field} = {value}::jsonb OR (jsonb_typeof({field}) = 'array' AND {field} @> jsonb_build_array({value}::jsonb)))"
                )
            }
            Filter::Contains { field, value } => {
                let field = self.field(field);
                let value = self.placeholder(Param::Json(value.clone()));
                format!(
                    "(jsonb_typeof({field}) = 'array' AND {field} @> jsonb_build_array({value}::jsonb))"
                )
            }
            Filter::AnyOf { field, values } => {
                let field = self.field(field);
                let values = self.placeholder(Param::Json(Value::Array(values.clone())));
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof({field}) = 'array' THEN {field} ELSE jsonb_build_array({field}) END) AS e(v) WHERE e.v IN (SELECT jsonb_array_elements({values}::jsonb)))"
                )
            }
            Filter::And(filters) if filters.is_empty() => "TRUE".to_string(),
            Filter::And(filters) => {
                let parts: Vec<String> = filters.iter().map(|f| self.condition(f)).collect();
                format!("({})", parts.join(" AND "))
            }
        }
    }

    fn bind<'q>(
        &'q self,
        collection: &'q str,
        mut query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        query = query.bind(collection);
        for param in &self.params {
            query = match param {
                Param::Json(value) => query.bind(value),
                Param::Path(path) => query.bind(path),
            };
        }
        query
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let compiled = SqlFilter::compile(filter);
        let sql = format!(
            "SELECT id, body FROM documents WHERE collection = $1 AND {} ORDER BY id ASC",
            compiled.sql
        );

        let rows = compiled
            .bind(collection, sqlx::query(&sql))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_document).collect()
    }

    async fn find_ids(&self, collection: &str, filter: &Filter) -> Result<Vec<DocumentId>> {
        let compiled = SqlFilter::compile(filter);
        let sql = format!(
            "SELECT id FROM documents WHERE collection = $1 AND {} ORDER BY id ASC",
            compiled.sql
        );

        let rows = compiled
            .bind(collection, sqlx::query(&sql))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: Value = row.try_get("id")?;
                DocumentId::from_value(&id)
                    .ok_or_else(|| StoreError::InvalidDocument(format!("invalid stored id {id}")))
            })
            .collect()
    }

    async fn scan(&self, collection: &str) -> Result<DocumentStream> {
        struct Cursor {
            pool: PgPool,
            collection: String,
            page_size: usize,
            last_id: Option<Value>,
            exhausted: bool,
        }

        let cursor = Cursor {
            pool: self.pool.clone(),
            collection: collection.to_string(),
            page_size: self.scan_page_size,
            last_id: None,
            exhausted: false,
        };

        // Keyset pagination: each page resumes after the last ID seen.
        let pages = stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.exhausted {
                return Ok::<_, StoreError>(None);
            }
            let page = Self::fetch_page(
                &cursor.pool,
                &cursor.collection,
                cursor.last_id.as_ref(),
                cursor.page_size,
            )
            .await?;
            if page.len() < cursor.page_size {
                cursor.exhausted = true;
            }
            if page.is_empty() {
                return Ok(None);
            }
            cursor.last_id = page.last().map(|doc| doc.id.to_value());
            Ok(Some((page, cursor)))
        });

        let documents = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten();

        Ok(Box::pin(documents))
    }

    async fn bulk_write(&self, collection: &str, bulk: BulkWrite) -> Result<BulkWriteResult> {
        validate_bulk(&bulk)?;

        let mut tx = self.pool.begin().await?;
        let mut result = BulkWriteResult::default();

        for (index, statement) in bulk.statements().iter().enumerate() {
            let compiled = SqlFilter::compile(&statement.filter);
            let limit = if statement.multi { "" } else { " LIMIT 1" };
            let sql = format!(
                "SELECT id, body FROM documents WHERE collection = $1 AND {} ORDER BY id ASC{limit} FOR UPDATE",
                compiled.sql
            );

            let rows = compiled
                .bind(collection, sqlx::query(&sql))
                .fetch_all(&mut *tx)
                .await?;

            for row in rows {
                let mut doc = Self::row_to_document(row)?;
                result.matched += 1;

                let modified = statement
                    .apply(&mut doc)
                    .map_err(|e| StoreError::BulkWrite {
                        index,
                        message: e.to_string(),
                    })?;
                if !modified {
                    continue;
                }

                sqlx::query("UPDATE documents SET body = $3 WHERE collection = $1 AND id = $2")
                    .bind(collection)
                    .bind(doc.id.to_value())
                    .bind(Value::Object(doc.fields))
                    .execute(&mut *tx)
                    .await?;
                result.modified += 1;
            }
        }

        tx.commit().await?;
        metrics::counter!("document_store_bulk_writes_total", "backend" => "postgres")
            .increment(1);
        tracing::debug!(
            collection,
            matched = result.matched,
            modified = result.modified,
            "bulk write committed"
        );

        Ok(result)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in documents {
            let id = doc.id.clone();
            sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
                .bind(collection)
                .bind(doc.id.to_value())
                .bind(Value::Object(doc.fields))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    // Primary key violation means the ID is taken.
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("documents_pkey")
                    {
                        return StoreError::DuplicateId {
                            collection: collection.to_string(),
                            id: id.clone(),
                        };
                    }
                    StoreError::Database(e)
                })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let compiled = SqlFilter::compile(filter);
        let sql = format!(
            "DELETE FROM documents WHERE collection = $1 AND {}",
            compiled.sql
        );

        let done = compiled
            .bind(collection, sqlx::query(&sql))
            .execute(&self.pool)
            .await?;

        Ok(done.rows_affected())
    }
}
