//! Schema versioning and idempotent collection migrations

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store_engine::schema::{json_path, CollectionSchema, IndexSchema};

const BOOKKEEPING_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS _catalog (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    key_path TEXT NOT NULL,
    PRIMARY KEY (collection, index_name)
);
";

/// Catalog row name used for a collection's primary key.
const PRIMARY: &str = "";

/// Manages schema versions for one database file
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the database to `target`, running `migrate` only when the
    /// stored version is older.
    pub fn upgrade<F>(&mut self, db_name: &str, target: u32, migrate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Upgrade<'_>) -> StoreResult<()>,
    {
        self.conn.execute_batch(BOOKKEEPING_SQL)?;

        let current = self.get_current_version()?;
        debug!("Database {} at schema version {}", db_name, current);

        if current > target {
            return Err(StoreError::StorageBlocked(format!(
                "database {} is at schema version {}, newer than requested {}",
                db_name, current, target
            )));
        }
        if current == target {
            return Ok(());
        }

        info!("Upgrading database {} from version {} to {}", db_name, current, target);

        let tx = match self.conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(tx) => tx,
            Err(e) => {
                let err = StoreError::from(e);
                if matches!(err, StoreError::StorageBlocked(_)) {
                    warn!("Upgrade of database {} blocked by another connection: {}", db_name, err);
                }
                return Err(err);
            }
        };

        // Another connection may have finished the same upgrade while we waited.
        let current: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current >= target {
            return Ok(());
        }

        {
            let mut upgrade = Upgrade { conn: &tx, old_version: current, new_version: target };
            if let Err(e) = migrate(&mut upgrade) {
                error!("Failed to upgrade database {} to version {}: {}", db_name, target, e);
                return Err(e);
            }
        }

        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [target])?;
        tx.commit()?;

        info!("Database {} upgraded to version {}", db_name, target);
        Ok(())
    }

    pub fn get_current_version(&self) -> StoreResult<u32> {
        let version = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    pub fn has_migration_applied(&self, version: u32) -> StoreResult<bool> {
        let applied = self
            .conn
            .query_row("SELECT 1 FROM schema_version WHERE version = ?1", [version], |_| Ok(()))
            .optional()?;
        Ok(applied.is_some())
    }

    /// Every collection declared so far, as recorded in the catalog.
    pub fn load_catalog(&self) -> StoreResult<Vec<CollectionSchema>> {
        load_catalog(self.conn)
    }
}

pub(crate) fn load_catalog(conn: &Connection) -> StoreResult<Vec<CollectionSchema>> {
    let mut stmt = conn.prepare(
        "SELECT collection, index_name, key_path FROM _catalog ORDER BY collection, index_name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut collections: Vec<CollectionSchema> = Vec::new();
    for (collection, index_name, key_path) in rows {
        // Primary rows sort first within a collection (empty index name).
        if index_name == PRIMARY {
            collections.push(CollectionSchema::new(collection, key_path));
        } else if let Some(schema) = collections.last_mut().filter(|c| c.name == collection) {
            schema.indices.push(IndexSchema::new(index_name, key_path));
        } else {
            warn!("Catalog index {}.{} has no collection entry", collection, index_name);
        }
    }
    Ok(collections)
}

/// Handle passed to a migration callback. Every method is idempotent so
/// a callback may simply declare the full schema on each upgrade.
pub struct Upgrade<'a> {
    conn: &'a Connection,
    old_version: u32,
    new_version: u32,
}

impl<'a> Upgrade<'a> {
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn has_collection(&self, name: &str) -> StoreResult<bool> {
        Ok(self.catalog_key_path(name, PRIMARY)?.is_some())
    }

    pub fn create_collection(&mut self, schema: &CollectionSchema) -> StoreResult<()> {
        schema.validate()?;

        match self.catalog_key_path(&schema.name, PRIMARY)? {
            Some(existing) if existing != schema.key_path => {
                return Err(StoreError::InvalidSchema(format!(
                    "collection {} already keyed by {}, cannot re-key by {}",
                    schema.name, existing, schema.key_path
                )));
            }
            Some(_) => {}
            None => {
                self.conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS \"{}\" (
                        pk TEXT PRIMARY KEY NOT NULL,
                        record TEXT NOT NULL
                    )",
                    schema.name
                ))?;
                self.conn.execute(
                    "INSERT INTO _catalog (collection, index_name, key_path) VALUES (?1, ?2, ?3)",
                    params![schema.name, PRIMARY, schema.key_path],
                )?;
                info!("Created collection {}", schema.name);
            }
        }

        for index in &schema.indices {
            self.create_index(&schema.name, index)?;
        }
        Ok(())
    }

    /// Adds an index, backfilling it from records already in the collection.
    pub fn create_index(&mut self, collection: &str, index: &IndexSchema) -> StoreResult<()> {
        if !self.has_collection(collection)? {
            return Err(StoreError::InvalidSchema(format!(
                "cannot index unknown collection {}",
                collection
            )));
        }
        CollectionSchema::new(collection, "pk").index(&index.name, &index.key_path).validate()?;

        match self.catalog_key_path(collection, &index.name)? {
            Some(existing) if existing != index.key_path => {
                return Err(StoreError::InvalidSchema(format!(
                    "index {}.{} already covers {}, not {}",
                    collection, index.name, existing, index.key_path
                )));
            }
            Some(_) => return Ok(()),
            None => {}
        }

        let column = index.column();
        if !self.has_column(collection, &column)? {
            self.conn.execute_batch(&format!(
                "ALTER TABLE \"{}\" ADD COLUMN \"{}\"",
                collection, column
            ))?;
        }
        let backfilled = self.conn.execute(
            &format!("UPDATE \"{}\" SET \"{}\" = json_extract(record, ?1)", collection, column),
            [json_path(&index.key_path)],
        )?;
        self.conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS \"{0}__{1}\" ON \"{0}\" (\"{2}\")",
            collection, index.name, column
        ))?;
        self.conn.execute(
            "INSERT INTO _catalog (collection, index_name, key_path) VALUES (?1, ?2, ?3)",
            params![collection, index.name, index.key_path],
        )?;

        info!("Created index {}.{} ({} rows backfilled)", collection, index.name, backfilled);
        Ok(())
    }

    pub fn delete_collection(&mut self, name: &str) -> StoreResult<()> {
        if !self.has_collection(name)? {
            return Ok(());
        }
        self.conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", name))?;
        self.conn.execute("DELETE FROM _catalog WHERE collection = ?1", [name])?;
        info!("Deleted collection {}", name);
        Ok(())
    }

    fn catalog_key_path(&self, collection: &str, index_name: &str) -> StoreResult<Option<String>> {
        let key_path = self
            .conn
            .query_row(
                "SELECT key_path FROM _catalog WHERE collection = ?1 AND index_name = ?2",
                params![collection, index_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key_path)
    }

    fn has_column(&self, table: &str, column: &str) -> StoreResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
