//! In-process identity store, for tests and one-shot runs.

use super::{IdentityKind, IdentityStore};
use crate::error::{Result, StdfError};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Table {
    by_name: HashMap<String, u32>,
    by_id: BTreeMap<u32, String>,
}

#[derive(Debug, Default)]
struct Tables {
    devices: Table,
    params: Table,
}

impl Tables {
    fn table(&mut self, kind: IdentityKind) -> &mut Table {
        match kind {
            IdentityKind::Device => &mut self.devices,
            IdentityKind::Param => &mut self.params,
        }
    }
}

/// Identity tables held in memory behind a mutex
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    tables: Mutex<Tables>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StdfError::Store {
            message: "in-memory identity store lock poisoned".to_string(),
        })
    }

    /// Number of stored names of `kind`
    pub fn len(&self, kind: IdentityKind) -> Result<usize> {
        Ok(self.lock()?.table(kind).by_name.len())
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn batch_lookup(&self, kind: IdentityKind, names: &[String]) -> Result<HashMap<String, u32>> {
        let mut tables = self.lock()?;
        let table = tables.table(kind);
        Ok(names
            .iter()
            .filter_map(|name| table.by_name.get(name).map(|id| (name.clone(), *id)))
            .collect())
    }

    fn max_id(&self, kind: IdentityKind) -> Result<u32> {
        let mut tables = self.lock()?;
        Ok(tables
            .table(kind)
            .by_id
            .last_key_value()
            .map_or(0, |(id, _)| *id))
    }

    fn batch_insert(&self, kind: IdentityKind, assignments: &[(u32, String)]) -> Result<usize> {
        let mut tables = self.lock()?;
        let table = tables.table(kind);
        let mut inserted = 0;
        for (id, name) in assignments {
            if table.by_id.contains_key(id) || table.by_name.contains_key(name) {
                continue;
            }
            table.by_id.insert(*id, name.clone());
            table.by_name.insert(name.clone(), *id);
            inserted += 1;
        }
        Ok(inserted)
    }
}
