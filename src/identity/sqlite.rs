//! SQLite-backed identity store.
//!
//! Two tables, one per kind, each with the ID as primary key and the name
//! unique. `INSERT OR IGNORE` gives insert-if-absent against both
//! constraints, so concurrent writers sharing one database file can never
//! bind a name twice or reuse an ID.

use super::{IdentityKind, IdentityStore};
use crate::constants::{LOOKUP_CHUNK_SIZE, identity_tables};
use crate::error::{Result, StdfError};

use rusqlite::{Connection, params, params_from_iter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

fn table_for(kind: IdentityKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        IdentityKind::Device => (
            identity_tables::DEVICE_TABLE,
            identity_tables::DEVICE_ID_COLUMN,
            identity_tables::DEVICE_NAME_COLUMN,
        ),
        IdentityKind::Param => (
            identity_tables::PARAM_TABLE,
            identity_tables::PARAM_ID_COLUMN,
            identity_tables::PARAM_NAME_COLUMN,
        ),
    }
}

#[derive(Debug)]
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    /// Open or create the database at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!("Opening identity store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        for kind in [IdentityKind::Device, IdentityKind::Param] {
            let (table, id, name) = table_for(kind);
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    {id} INTEGER PRIMARY KEY,
                    {name} TEXT NOT NULL UNIQUE
                );"
            ))?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StdfError::Store {
            message: "identity database lock poisoned".to_string(),
        })
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn batch_lookup(&self, kind: IdentityKind, names: &[String]) -> Result<HashMap<String, u32>> {
        let (table, id, name) = table_for(kind);
        let conn = self.lock()?;
        let mut found = HashMap::with_capacity(names.len());

        for chunk in names.chunks(LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT {name}, {id} FROM {table} WHERE {name} IN ({placeholders})");
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (name, id) = row?;
                found.insert(name, id);
            }
        }
        Ok(found)
    }

    fn max_id(&self, kind: IdentityKind) -> Result<u32> {
        let (table, id, _) = table_for(kind);
        let conn = self.lock()?;
        let max: u32 = conn.query_row(
            &format!("SELECT COALESCE(MAX({id}), 0) FROM {table}"),
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn batch_insert(&self, kind: IdentityKind, assignments: &[(u32, String)]) -> Result<usize> {
        let (table, id, name) = table_for(kind);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {table} ({id}, {name}) VALUES (?1, ?2)"
            ))?;
            for (new_id, new_name) in assignments {
                inserted += stmt.execute(params![new_id, new_name])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Discovery;
    use tempfile::TempDir;

    #[test]
    fn test_ids_stable_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("identity.sqlite");

        {
            let store = SqliteIdentityStore::open(&db_path).unwrap();
            let mut discovery = Discovery::new();
            discovery.observe_device("DEV1");
            discovery.observe_device("DEV2");
            discovery.observe_param("TEMP");
            let outcome = discovery.commit(&store).unwrap();
            assert_eq!(outcome.new_devices, 2);
        }

        let store = SqliteIdentityStore::open(&db_path).unwrap();
        let mut discovery = Discovery::new();
        discovery.observe_device("DEV2");
        discovery.observe_device("DEV3");
        discovery.observe_param("TEMP");
        let outcome = discovery.commit(&store).unwrap();

        assert_eq!(outcome.identities.resolve_device("DEV2").unwrap(), 2);
        assert_eq!(outcome.identities.resolve_device("DEV3").unwrap(), 3);
        assert_eq!(outcome.identities.resolve_param("TEMP").unwrap(), 1);
        assert_eq!(outcome.new_devices, 1);
        assert_eq!(outcome.new_params, 0);
    }

    #[test]
    fn test_insert_or_ignore_on_both_constraints() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let kind = IdentityKind::Param;
        store
            .batch_insert(kind, &[(1, "A".to_string())])
            .unwrap();
        let inserted = store
            .batch_insert(
                kind,
                &[(1, "B".to_string()), (2, "A".to_string()), (2, "C".to_string())],
            )
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.max_id(kind).unwrap(), 2);
        assert_eq!(store.max_id(IdentityKind::Device).unwrap(), 0);
    }

    #[test]
    fn test_lookup_spans_chunks() {
        let store = SqliteIdentityStore::open_in_memory().unwrap();
        let names: Vec<String> = (0..(LOOKUP_CHUNK_SIZE * 2 + 7))
            .map(|i| format!("P{:05}", i))
            .collect();
        let assignments: Vec<(u32, String)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32 + 1, n.clone()))
            .collect();
        store.batch_insert(IdentityKind::Param, &assignments).unwrap();

        let found = store.batch_lookup(IdentityKind::Param, &names).unwrap();
        assert_eq!(found.len(), names.len());
        assert_eq!(found.get("P00000"), Some(&1));
        assert_eq!(found.get(&names[names.len() - 1]), Some(&(names.len() as u32)));
    }
}
