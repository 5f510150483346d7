//! Embedded store engine - named collections with primary keys and secondary
//! indices, persisted as SQLite tables holding JSON records.
pub mod migration;
pub mod schema;

pub use migration::{MigrationManager, Upgrade};
pub use schema::{CollectionSchema, IndexSchema};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Connection settings shared by every database the engine opens.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { pool_size: 4, busy_timeout_ms: 5000 }
    }
}

/// Row counts and on-disk size of one database.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub name: String,
    pub schema_version: u32,
    pub collections: BTreeMap<String, usize>,
    pub database_size_bytes: i64,
}

/// An open, migrated database. Cheap to share behind an `Arc`.
pub struct Database {
    name: String,
    version: u32,
    pool: Arc<Pool<SqliteConnectionManager>>,
    collections: HashMap<String, CollectionSchema>,
    closed: AtomicBool,
}

impl Database {
    /// Open (creating if needed) the database file at `path`. `migrate`
    /// runs only when the stored schema version is older than `version`.
    pub async fn open<F>(
        path: impl Into<PathBuf>,
        name: &str,
        version: u32,
        options: EngineOptions,
        migrate: F,
    ) -> StoreResult<Self>
    where
        F: FnOnce(&mut Upgrade<'_>) -> StoreResult<()> + Send + 'static,
    {
        let path = path.into();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path, name, version, options, migrate))
            .await
            .map_err(|e| StoreError::Backend(format!("open task failed: {}", e)))?
    }

    fn open_blocking<F>(
        path: &Path,
        name: String,
        version: u32,
        options: EngineOptions,
        migrate: F,
    ) -> StoreResult<Self>
    where
        F: FnOnce(&mut Upgrade<'_>) -> StoreResult<()>,
    {
        if version == 0 {
            return Err(StoreError::InvalidSchema("schema version must be at least 1".into()));
        }

        info!("Opening database {} at: {}", name, path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::StorageUnavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let busy_timeout = Duration::from_millis(options.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;",
                )
            });
        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .connection_timeout(busy_timeout.max(Duration::from_millis(250)))
            .build(manager)
            .map_err(|e| {
                StoreError::StorageUnavailable(format!("cannot open database {}: {}", name, e))
            })?;

        let collections = {
            let mut conn = pool.get().map_err(|e| {
                StoreError::StorageUnavailable(format!("cannot open database {}: {}", name, e))
            })?;
            let mut migrator = MigrationManager::new(&mut conn);
            migrator.upgrade(&name, version, migrate)?;
            migrator.load_catalog()?
        };

        info!("Database {} ready ({} collections)", name, collections.len());
        Ok(Self {
            name,
            version,
            pool: Arc::new(pool),
            collections: collections.into_iter().map(|c| (c.name.clone(), c)).collect(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// After closing, every operation fails with `StorageBlocked`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Closed database {}", self.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Insert or replace `record` under the key found at the collection's key path.
    pub async fn put<T: Serialize>(&self, collection: &str, record: &T) -> StoreResult<String> {
        let schema = self.schema(collection)?;
        let value = serde_json::to_value(record)?;
        let key = schema.primary_key(&value)?;

        let mut columns = vec!["pk".to_string(), "record".to_string()];
        columns.extend(schema.indices.iter().map(|idx| format!("\"{}\"", idx.column())));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO \"{}\" ({}) VALUES ({})",
            schema.name,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut values = vec![SqlValue::Text(key.clone()), SqlValue::Text(serde_json::to_string(&value)?)];
        values.extend(schema.index_values(&value));

        debug!("put {}/{} in {}", collection, key, self.name);
        self.run(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(values))?;
            Ok(())
        })
        .await?;
        Ok(key)
    }

    pub async fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> StoreResult<Option<T>> {
        let sql = format!("SELECT record FROM \"{}\" WHERE pk = ?1", self.schema(collection)?.name);
        let key = key.to_string();
        let raw: Option<String> = self
            .run(move |conn| Ok(conn.query_row(&sql, [key], |row| row.get(0)).optional()?))
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(StoreError::from)).transpose()
    }

    /// All records in primary key order.
    pub async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> StoreResult<Vec<T>> {
        let sql = format!("SELECT record FROM \"{}\" ORDER BY pk", self.schema(collection)?.name);
        let raw = self.run(move |conn| query_records(conn, &sql, Vec::new())).await?;
        decode_all(raw)
    }

    /// Records whose indexed field equals `value`, in primary key order.
    pub async fn get_all_by_index<T, V>(&self, collection: &str, index: &str, value: &V) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned,
        V: Serialize + ?Sized,
    {
        let (column, param) = self.index_filter(collection, index, value)?;
        let sql = format!("SELECT record FROM \"{}\" WHERE \"{}\" = ?1 ORDER BY pk", collection, column);
        let raw = self.run(move |conn| query_records(conn, &sql, vec![param])).await?;
        decode_all(raw)
    }

    pub async fn count_by_index<V>(&self, collection: &str, index: &str, value: &V) -> StoreResult<usize>
    where
        V: Serialize + ?Sized,
    {
        let (column, param) = self.index_filter(collection, index, value)?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" = ?1", collection, column);
        let count: i64 = self.run(move |conn| Ok(conn.query_row(&sql, [param], |row| row.get(0))?)).await?;
        Ok(count as usize)
    }

    pub async fn count(&self, collection: &str) -> StoreResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.schema(collection)?.name);
        let count: i64 = self.run(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?)).await?;
        Ok(count as usize)
    }

    /// Returns whether a record was removed.
    pub async fn delete(&self, collection: &str, key: &str) -> StoreResult<bool> {
        let sql = format!("DELETE FROM \"{}\" WHERE pk = ?1", self.schema(collection)?.name);
        let key = key.to_string();
        debug!("delete {}/{} in {}", collection, key, self.name);
        let deleted = self.run(move |conn| Ok(conn.execute(&sql, [key])?)).await?;
        Ok(deleted > 0)
    }

    pub async fn clear(&self, collection: &str) -> StoreResult<usize> {
        let sql = format!("DELETE FROM \"{}\"", self.schema(collection)?.name);
        let deleted = self.run(move |conn| Ok(conn.execute(&sql, [])?)).await?;
        info!("Cleared {} records from {}/{}", deleted, self.name, collection);
        Ok(deleted)
    }

    /// Single pass over the collection in primary key order, without
    /// materialising every record at once.
    pub async fn fold<T, A, F>(&self, collection: &str, init: A, mut f: F) -> StoreResult<A>
    where
        T: DeserializeOwned + 'static,
        A: Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        let sql = format!("SELECT record FROM \"{}\" ORDER BY pk", self.schema(collection)?.name);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut acc = init;
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                acc = f(acc, serde_json::from_str(&raw)?);
            }
            Ok(acc)
        })
        .await
    }

    pub async fn stats(&self) -> StoreResult<DatabaseStats> {
        let tables: Vec<String> = self.collection_names().into_iter().map(String::from).collect();
        let name = self.name.clone();
        let version = self.version;
        self.run(move |conn| {
            let mut collections = BTreeMap::new();
            for table in tables {
                let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))?;
                collections.insert(table, count as usize);
            }
            let database_size_bytes: i64 = conn
                .query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            Ok(DatabaseStats { name, schema_version: version, collections, database_size_bytes })
        })
        .await
    }

    fn schema(&self, collection: &str) -> StoreResult<&CollectionSchema> {
        self.collections
            .get(collection)
            .ok_or_else(|| StoreError::NotFound(format!("collection {} in database {}", collection, self.name)))
    }

    fn index_filter<V>(&self, collection: &str, index: &str, value: &V) -> StoreResult<(String, SqlValue)>
    where
        V: Serialize + ?Sized,
    {
        let index = self
            .schema(collection)?
            .find_index(index)
            .ok_or_else(|| StoreError::NotFound(format!("index {}.{} in database {}", collection, index, self.name)))?;
        let value = serde_json::to_value(value)?;
        Ok((index.column(), schema::to_sql_value(&value)))
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        if self.is_closed() {
            return Err(StoreError::StorageBlocked(format!("database {} is closed", self.name)));
        }
        let pool = Arc::clone(&self.pool);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| {
                StoreError::StorageBlocked(format!("no connection available for {}: {}", name, e))
            })?;
            op(&*conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("storage task failed: {}", e)))?
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(conn) = self.pool.try_get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

fn query_records(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

fn decode_all<T: DeserializeOwned>(raw: Vec<String>) -> StoreResult<Vec<T>> {
    raw.iter()
        .map(|r| serde_json::from_str(r).map_err(StoreError::from))
        .collect()
}

/// Signature of a database's migration routine.
pub type MigrateFn = fn(&mut Upgrade<'_>) -> StoreResult<()>;

/// A database handle opened on first use and reused afterwards. A failed
/// open is not remembered, so the next call tries again.
pub struct LazyDatabase {
    path: PathBuf,
    name: String,
    version: u32,
    options: EngineOptions,
    migrate: MigrateFn,
    cell: OnceCell<Arc<Database>>,
}

impl LazyDatabase {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        version: u32,
        options: EngineOptions,
        migrate: MigrateFn,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            version,
            options,
            migrate,
            cell: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> StoreResult<Arc<Database>> {
        let db = self
            .cell
            .get_or_try_init(|| async {
                Database::open(self.path.clone(), &self.name, self.version, self.options.clone(), self.migrate)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(db))
    }
}
