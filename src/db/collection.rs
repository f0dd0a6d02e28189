use super::query::{bind_all, column, Condition, ListParams, Page, Pagination, Query};
use super::registry::Database;
use crate::error::{Error, Result};
use crate::schema::{prepare, Entity, Schema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A stored record: the entity plus its id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<E> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub data: E,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl<E> Deref for Document<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.data
    }
}

/// Untyped handle on one table of one database.
///
/// The table and its unique indexes are created on first use, once per handle.
#[derive(Debug, Clone)]
pub struct Collection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    database: Database,
    schema: &'static Schema,
    name: String,
    ready: OnceCell<()>,
}

impl Collection {
    pub(crate) fn new(database: Database, schema: &'static Schema, name: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                database,
                schema,
                name,
                ready: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    pub fn schema(&self) -> &'static Schema {
        self.inner.schema
    }

    /// Whether both handles are the same registration.
    pub fn same_registration(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn table(&self) -> String {
        quote_ident(&self.inner.name)
    }

    async fn ensure_table(&self) -> Result<()> {
        self.inner
            .ready
            .get_or_try_init(|| async {
                let pool = self.inner.database.pool();
                let table = self.table();
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)"
                ))
                .execute(pool)
                .await?;
                for field in self.inner.schema.unique {
                    let index = quote_ident(&index_name(&self.inner.name, field));
                    sqlx::query(&format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} ({})",
                        column(field)?
                    ))
                    .execute(pool)
                    .await?;
                }
                debug!(
                    database = self.inner.database.name(),
                    collection = %self.inner.name,
                    "collection ready"
                );
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(collection = %self.inner.name))]
    pub async fn insert(&self, id: &str, doc: &Value) -> Result<()> {
        self.ensure_table().await?;
        let sql = format!("INSERT INTO {} (id, doc) VALUES (?, ?)", self.table());
        sqlx::query(&sql)
            .bind(id)
            .bind(doc.to_string())
            .execute(self.inner.database.pool())
            .await
            .map_err(|e| self.write_error(e))?;
        Ok(())
    }

    /// Inserts all documents or none of them.
    #[instrument(skip_all, fields(collection = %self.inner.name, count = docs.len()))]
    pub async fn insert_many(&self, docs: &[(String, Value)]) -> Result<()> {
        self.ensure_table().await?;
        let sql = format!("INSERT INTO {} (id, doc) VALUES (?, ?)", self.table());
        let mut tx = self.inner.database.pool().begin().await?;
        for (id, doc) in docs {
            sqlx::query(&sql)
                .bind(id.as_str())
                .bind(doc.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| self.write_error(e))?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Overwrites the stored document. `false` when the id does not exist.
    pub async fn update(&self, id: &str, doc: &Value) -> Result<bool> {
        self.ensure_table().await?;
        let sql = format!("UPDATE {} SET doc = ? WHERE id = ?", self.table());
        let done = sqlx::query(&sql)
            .bind(doc.to_string())
            .bind(id)
            .execute(self.inner.database.pool())
            .await
            .map_err(|e| self.write_error(e))?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn delete(&self, query: &Query) -> Result<u64> {
        self.ensure_table().await?;
        let (filter, binds) = query.where_clause()?;
        let sql = format!("DELETE FROM {}{filter}", self.table());
        let done = bind_all(sqlx::query(&sql), &binds)
            .execute(self.inner.database.pool())
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<Value>> {
        self.ensure_table().await?;
        let (filter, binds) = query.where_clause()?;
        let sql = format!("SELECT doc FROM {}{filter}{}", self.table(), query.tail()?);
        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(self.inner.database.pool())
            .await?;
        rows.iter()
            .map(|row| Ok(serde_json::from_str(&row.try_get::<String, _>(0)?)?))
            .collect()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        let query = Query::new().filter(Condition::IdIn(vec![id.to_string()]));
        Ok(self.find(&query).await?.into_iter().next())
    }

    pub async fn count(&self, query: &Query) -> Result<u64> {
        self.ensure_table().await?;
        let (filter, binds) = query.where_clause()?;
        let sql = format!("SELECT COUNT(*) FROM {}{filter}", self.table());
        let row = bind_all(sqlx::query(&sql), &binds)
            .fetch_one(self.inner.database.pool())
            .await?;
        Ok(row.try_get::<i64, _>(0)? as u64)
    }

    /// Distinct non-null values at `path` among matching documents.
    pub async fn distinct(&self, path: &str, query: &Query) -> Result<Vec<Value>> {
        self.ensure_table().await?;
        let col = column(path)?;
        let query = query.clone().filter(Condition::Exists(path.to_string()));
        let (filter, binds) = query.where_clause()?;
        let sql = format!(
            "SELECT DISTINCT json_quote({col}) FROM {}{filter} ORDER BY 1",
            self.table()
        );
        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(self.inner.database.pool())
            .await?;
        rows.iter()
            .map(|row| Ok(serde_json::from_str(&row.try_get::<String, _>(0)?)?))
            .collect()
    }

    /// Matching documents counted per value at `path`.
    pub async fn group_count(&self, path: &str, query: &Query) -> Result<Vec<(Value, u64)>> {
        self.ensure_table().await?;
        let col = column(path)?;
        let (filter, binds) = query.where_clause()?;
        let sql = format!(
            "SELECT json_quote({col}), COUNT(*) FROM {}{filter} GROUP BY 1 ORDER BY 2 DESC, 1",
            self.table()
        );
        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(self.inner.database.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let key: String = row.try_get(0)?;
                let n: i64 = row.try_get(1)?;
                Ok((serde_json::from_str(&key)?, n as u64))
            })
            .collect()
    }

    /// One row of aggregate expressions over matching documents.
    pub async fn aggregate(&self, select: &str, query: &Query) -> Result<SqliteRow> {
        self.ensure_table().await?;
        let (filter, binds) = query.where_clause()?;
        let sql = format!("SELECT {select} FROM {}{filter}", self.table());
        let row = bind_all(sqlx::query(&sql), &binds)
            .fetch_one(self.inner.database.pool())
            .await?;
        Ok(row)
    }

    fn write_error(&self, err: sqlx::Error) -> Error {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let message = db_err.message();
                let field = self
                    .inner
                    .schema
                    .unique
                    .iter()
                    .find(|f| message.contains(&index_name(&self.inner.name, f)))
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "_id".to_string());
                return Error::Duplicate {
                    model: self.inner.schema.model,
                    field,
                };
            }
        }
        Error::Database(err)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn index_name(collection: &str, field: &str) -> String {
    format!("{collection}_{}_unique", field.replace('.', "_"))
}

/// Typed handle for one entity on its bound collection.
#[derive(Debug)]
pub struct Model<E> {
    collection: Collection,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Model<E> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Model<E> {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            _entity: PhantomData,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    fn model_name() -> &'static str {
        E::schema().model
    }

    fn not_found(id: &str) -> Error {
        Error::NotFound {
            model: Self::model_name(),
            id: id.to_string(),
        }
    }

    fn active_field() -> Result<&'static str> {
        E::schema()
            .active_field
            .ok_or_else(|| Error::InvalidQuery(format!("{} has no active flag", Self::model_name())))
    }

    pub async fn find(&self, query: &Query) -> Result<Vec<Document<E>>> {
        self.collection
            .find(query)
            .await?
            .into_iter()
            .map(|v| Ok(serde_json::from_value(v)?))
            .collect()
    }

    pub async fn find_one(&self, query: &Query) -> Result<Option<Document<E>>> {
        let query = query.clone().limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document<E>>> {
        match self.collection.find_by_id(id).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Document<E>> {
        self.find_by_id(id).await?.ok_or_else(|| Self::not_found(id))
    }

    /// Active record with the given slug.
    pub async fn get_by_slug(&self, slug: &str) -> Result<Document<E>> {
        let schema = E::schema();
        let mut query = Query::new().eq(schema.slug_field.unwrap_or("slug"), slug);
        if let Some(active) = schema.active_field {
            query = query.eq(active, true);
        }
        self.find_one(&query).await?.ok_or_else(|| Self::not_found(slug))
    }

    pub async fn count(&self, query: &Query) -> Result<u64> {
        self.collection.count(query).await
    }

    pub async fn distinct(&self, path: &str, query: &Query) -> Result<Vec<Value>> {
        self.collection.distinct(path, query).await
    }

    pub async fn list(&self, params: &ListParams) -> Result<Page<Document<E>>> {
        self.list_with(params, Query::new()).await
    }

    /// `list` with extra conditions ANDed onto the parameter filters.
    #[instrument(skip_all, fields(model = Self::model_name()))]
    pub async fn list_with(&self, params: &ListParams, base: Query) -> Result<Page<Document<E>>> {
        let mut filter = params.to_query(E::schema())?;
        filter.conditions.extend(base.conditions);
        let total = self.count(&filter).await?;
        let (page, limit) = (params.page(), params.limit());
        let query = filter
            .sort(params.sort_order()?)
            .limit(limit)
            .offset((page - 1).saturating_mul(limit));
        let items = self.find(&query).await?;
        Ok(Page {
            items,
            pagination: Pagination::new(page, limit, total),
        })
    }

    pub async fn create(&self, data: E) -> Result<Document<E>> {
        self.create_with_id(Uuid::new_v4().to_string(), data).await
    }

    #[instrument(skip_all, fields(model = Self::model_name()))]
    pub async fn create_with_id(&self, id: impl Into<String>, mut data: E) -> Result<Document<E>> {
        let now = Utc::now();
        prepare(&mut data, now)?;
        let doc = Document {
            id: id.into(),
            data,
            created_at: now,
            updated_at: now,
        };
        self.collection.insert(&doc.id, &serde_json::to_value(&doc)?).await?;
        Ok(doc)
    }

    /// Validates every record first, then inserts them in one transaction.
    #[instrument(skip_all, fields(model = Self::model_name(), count = items.len()))]
    pub async fn bulk_create(&self, items: Vec<E>) -> Result<Vec<Document<E>>> {
        let now = Utc::now();
        let mut docs = Vec::with_capacity(items.len());
        for mut data in items {
            prepare(&mut data, now)?;
            docs.push(Document {
                id: Uuid::new_v4().to_string(),
                data,
                created_at: now,
                updated_at: now,
            });
        }
        let rows = docs
            .iter()
            .map(|d| Ok((d.id.clone(), serde_json::to_value(d)?)))
            .collect::<Result<Vec<_>>>()?;
        self.collection.insert_many(&rows).await?;
        Ok(docs)
    }

    /// Merges the top-level keys of `patch` into the stored record, then re-runs
    /// hooks and validation. `_id` and `createdAt` are immutable.
    #[instrument(skip_all, fields(model = Self::model_name()))]
    pub async fn update(&self, id: &str, patch: Value) -> Result<Document<E>> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidQuery("update patch must be a JSON object".into()));
        };
        let stored = self
            .collection
            .find_by_id(id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        let mut merged = match stored {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            if key != "_id" && key != "createdAt" {
                merged.insert(key, value);
            }
        }
        let doc: Document<E> = serde_json::from_value(Value::Object(merged))
            .map_err(|e| Error::validation(Self::model_name(), "document", e.to_string()))?;
        self.replace(doc).await
    }

    /// Re-saves a whole record under its id.
    pub async fn replace(&self, mut doc: Document<E>) -> Result<Document<E>> {
        let now = Utc::now();
        prepare(&mut doc.data, now)?;
        doc.updated_at = now;
        if !self.collection.update(&doc.id, &serde_json::to_value(&doc)?).await? {
            return Err(Self::not_found(&doc.id));
        }
        Ok(doc)
    }

    /// Hard delete. Returns the removed record.
    pub async fn delete(&self, id: &str) -> Result<Document<E>> {
        let doc = self.get(id).await?;
        self.collection
            .delete(&Query::new().filter(Condition::IdIn(vec![id.to_string()])))
            .await?;
        Ok(doc)
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<u64> {
        self.collection
            .delete(&Query::new().filter(Condition::IdIn(ids.to_vec())))
            .await
    }

    pub async fn delete_where(&self, query: &Query) -> Result<u64> {
        self.collection.delete(query).await
    }

    /// Soft delete through the active flag.
    pub async fn deactivate(&self, id: &str) -> Result<Document<E>> {
        let field = Self::active_field()?;
        self.update(id, json!({ field: false })).await
    }

    pub async fn toggle_active(&self, id: &str) -> Result<Document<E>> {
        let field = Self::active_field()?;
        let current = self.get(id).await?;
        let active = serde_json::to_value(&current.data)?
            .get(field)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.update(id, json!({ field: !active })).await
    }
}
