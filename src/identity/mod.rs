//! Stable surrogate IDs for device and parameter names.
//!
//! IDs are minted in a serialized discovery step: every name a run will
//! emit is observed first, looked up in the shared store in one batch per
//! kind, and any unseen names are assigned `max + 1 ..` and written back
//! insert-if-absent. The result is an immutable [`IdentityMap`] that
//! parallel expansion workers only ever read.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIdentityStore;
pub use sqlite::SqliteIdentityStore;

use crate::constants::MAX_COMMIT_ATTEMPTS;
use crate::error::{Result, StdfError};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Which name space an identity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Device,
    Param,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Device => "device",
            IdentityKind::Param => "parameter",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent name-to-ID tables shared across runs and processes
pub trait IdentityStore: Send + Sync {
    /// IDs of the given names that are already assigned
    fn batch_lookup(&self, kind: IdentityKind, names: &[String]) -> Result<HashMap<String, u32>>;

    /// Largest assigned ID, 0 when none
    fn max_id(&self, kind: IdentityKind) -> Result<u32>;

    /// Insert `(id, name)` pairs, skipping any whose id or name already
    /// exists. Returns the number of rows inserted.
    fn batch_insert(&self, kind: IdentityKind, assignments: &[(u32, String)]) -> Result<usize>;
}

/// Distinct names one or more files will emit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedNames {
    pub devices: BTreeSet<String>,
    pub params: BTreeSet<String>,
}

impl ObservedNames {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.params.is_empty()
    }
}

/// Read-only snapshot of committed identities for one run
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    devices: HashMap<String, u32>,
    params: HashMap<String, u32>,
}

impl IdentityMap {
    pub fn resolve_device(&self, device_dmc: &str) -> Result<u32> {
        self.devices
            .get(device_dmc)
            .copied()
            .ok_or_else(|| StdfError::UnresolvedIdentity {
                kind: IdentityKind::Device.as_str(),
                name: device_dmc.to_string(),
            })
    }

    pub fn resolve_param(&self, param_name: &str) -> Result<u32> {
        self.params
            .get(param_name)
            .copied()
            .ok_or_else(|| StdfError::UnresolvedIdentity {
                kind: IdentityKind::Param.as_str(),
                name: param_name.to_string(),
            })
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// What a discovery commit produced
#[derive(Debug)]
pub struct CommitOutcome {
    pub identities: IdentityMap,
    /// Names this commit assigned; names adopted from a concurrent writer
    /// are not counted
    pub new_devices: usize,
    pub new_params: usize,
}

/// Collects names during the scan phase and commits them in one step
#[derive(Debug, Default)]
pub struct Discovery {
    names: ObservedNames,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_device(&mut self, device_dmc: &str) {
        if !self.names.devices.contains(device_dmc) {
            self.names.devices.insert(device_dmc.to_string());
        }
    }

    pub fn observe_param(&mut self, param_name: &str) {
        if !self.names.params.contains(param_name) {
            self.names.params.insert(param_name.to_string());
        }
    }

    /// Merge every name found in one file
    pub fn observe(&mut self, names: ObservedNames) {
        self.names.devices.extend(names.devices);
        self.names.params.extend(names.params);
    }

    pub fn observed(&self) -> &ObservedNames {
        &self.names
    }

    /// Resolve every observed name against `store`, minting IDs for
    /// unseen ones, and freeze the result.
    pub fn commit(self, store: &dyn IdentityStore) -> Result<CommitOutcome> {
        let (devices, new_devices) =
            commit_kind(store, IdentityKind::Device, &self.names.devices)?;
        let (params, new_params) = commit_kind(store, IdentityKind::Param, &self.names.params)?;

        info!(
            "Identity commit: {} devices ({} new), {} parameters ({} new)",
            devices.len(),
            new_devices,
            params.len(),
            new_params
        );

        Ok(CommitOutcome {
            identities: IdentityMap { devices, params },
            new_devices,
            new_params,
        })
    }
}

fn commit_kind(
    store: &dyn IdentityStore,
    kind: IdentityKind,
    names: &BTreeSet<String>,
) -> Result<(HashMap<String, u32>, usize)> {
    let all: Vec<String> = names.iter().cloned().collect();
    let mut resolved = store.batch_lookup(kind, &all)?;
    let mut assigned = 0;

    for attempt in 1..=MAX_COMMIT_ATTEMPTS {
        // BTreeSet order, so new IDs follow sorted name order
        let missing: Vec<String> = all
            .iter()
            .filter(|name| !resolved.contains_key(*name))
            .cloned()
            .collect();
        if missing.is_empty() {
            check_unique(kind, &resolved)?;
            return Ok((resolved, assigned));
        }

        let max = store.max_id(kind)?;
        let assignments = missing
            .iter()
            .enumerate()
            .map(|(i, name)| {
                u32::try_from(i + 1)
                    .ok()
                    .and_then(|offset| max.checked_add(offset))
                    .map(|id| (id, name.clone()))
                    .ok_or_else(|| StdfError::Store {
                        message: format!("{} id space exhausted above {}", kind, max),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let inserted = store.batch_insert(kind, &assignments)?;
        debug!(
            "Attempt {}: inserted {} of {} new {} identities above {}",
            attempt,
            inserted,
            assignments.len(),
            kind,
            max
        );

        let confirmed = store.batch_lookup(kind, &missing)?;
        for (id, name) in &assignments {
            match confirmed.get(name) {
                Some(stored) if stored == id => assigned += 1,
                Some(stored) => {
                    debug!(
                        "Adopting concurrent {} id {} for '{}' (proposed {})",
                        kind, stored, name, id
                    );
                }
                None => {}
            }
        }
        resolved.extend(confirmed);
    }

    let unresolved = all.iter().find(|name| !resolved.contains_key(*name));
    match unresolved {
        Some(name) => {
            warn!(
                "{} '{}' still unresolved after {} commit attempts",
                kind, name, MAX_COMMIT_ATTEMPTS
            );
            Err(StdfError::IdentityConflict {
                kind: kind.as_str(),
                name: name.clone(),
                details: format!("still unassigned after {} attempts", MAX_COMMIT_ATTEMPTS),
            })
        }
        None => {
            check_unique(kind, &resolved)?;
            Ok((resolved, assigned))
        }
    }
}

/// Two names mapping to one ID means the store lost its uniqueness
fn check_unique(kind: IdentityKind, resolved: &HashMap<String, u32>) -> Result<()> {
    let mut owners: HashMap<u32, &str> = HashMap::with_capacity(resolved.len());
    for (name, id) in resolved {
        if let Some(other) = owners.insert(*id, name) {
            return Err(StdfError::IdentityConflict {
                kind: kind.as_str(),
                name: name.clone(),
                details: format!("id {} is also assigned to '{}'", id, other),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn names(items: &[&str]) -> ObservedNames {
        ObservedNames {
            devices: items.iter().map(|s| s.to_string()).collect(),
            params: BTreeSet::new(),
        }
    }

    #[test]
    fn test_new_names_get_gapless_ids_in_sorted_order() {
        let store = MemoryIdentityStore::new();
        let mut discovery = Discovery::new();
        discovery.observe(names(&["DEV_B", "DEV_A", "DEV_C"]));

        let outcome = discovery.commit(&store).unwrap();
        let ids = &outcome.identities;
        assert_eq!(ids.resolve_device("DEV_A").unwrap(), 1);
        assert_eq!(ids.resolve_device("DEV_B").unwrap(), 2);
        assert_eq!(ids.resolve_device("DEV_C").unwrap(), 3);
        assert_eq!(outcome.new_devices, 3);
        assert_eq!(outcome.new_params, 0);
    }

    #[test]
    fn test_existing_ids_are_reused() {
        let store = MemoryIdentityStore::new();
        let mut first = Discovery::new();
        first.observe_device("DEV1");
        first.observe_param("TEMP");
        first.commit(&store).unwrap();

        let mut second = Discovery::new();
        second.observe_device("DEV2");
        second.observe_device("DEV1");
        second.observe_param("TEMP");
        let outcome = second.commit(&store).unwrap();

        assert_eq!(outcome.identities.resolve_device("DEV1").unwrap(), 1);
        assert_eq!(outcome.identities.resolve_device("DEV2").unwrap(), 2);
        assert_eq!(outcome.identities.resolve_param("TEMP").unwrap(), 1);
        assert_eq!(outcome.new_devices, 1);
        assert_eq!(outcome.new_params, 0);
    }

    #[test]
    fn test_unobserved_name_is_unresolved() {
        let store = MemoryIdentityStore::new();
        let mut discovery = Discovery::new();
        discovery.observe_param("VOLT");
        let ids = discovery.commit(&store).unwrap().identities;

        match ids.resolve_param("CURR") {
            Err(StdfError::UnresolvedIdentity { kind, name }) => {
                assert_eq!(kind, "parameter");
                assert_eq!(name, "CURR");
            }
            _ => panic!("Expected UnresolvedIdentity error"),
        }
        assert!(ids.resolve_device("VOLT").is_err());
    }

    #[test]
    fn test_empty_discovery_commits_nothing() {
        let store = MemoryIdentityStore::new();
        let outcome = Discovery::new().commit(&store).unwrap();
        assert_eq!(outcome.identities.device_count(), 0);
        assert_eq!(store.max_id(IdentityKind::Device).unwrap(), 0);
    }

    /// Lets another writer claim names between our lookup and insert
    struct RacingStore {
        inner: MemoryIdentityStore,
        rival: Mutex<Option<Vec<(u32, String)>>>,
    }

    impl IdentityStore for RacingStore {
        fn batch_lookup(
            &self,
            kind: IdentityKind,
            names: &[String],
        ) -> Result<HashMap<String, u32>> {
            self.inner.batch_lookup(kind, names)
        }

        fn max_id(&self, kind: IdentityKind) -> Result<u32> {
            let max = self.inner.max_id(kind)?;
            if let Some(rows) = self.rival.lock().unwrap().take() {
                self.inner.batch_insert(kind, &rows)?;
            }
            Ok(max)
        }

        fn batch_insert(&self, kind: IdentityKind, assignments: &[(u32, String)]) -> Result<usize> {
            self.inner.batch_insert(kind, assignments)
        }
    }

    #[test]
    fn test_concurrent_writer_wins_and_is_adopted() {
        // Rival takes id 1 for DEV_B and id 2 for DEV_X before we insert
        let store = RacingStore {
            inner: MemoryIdentityStore::new(),
            rival: Mutex::new(Some(vec![(1, "DEV_B".to_string()), (2, "DEV_X".to_string())])),
        };
        let mut discovery = Discovery::new();
        discovery.observe(names(&["DEV_A", "DEV_B"]));

        let outcome = discovery.commit(&store).unwrap();
        let ids = &outcome.identities;
        assert_eq!(ids.resolve_device("DEV_B").unwrap(), 1);
        assert_eq!(ids.resolve_device("DEV_A").unwrap(), 3);
        assert_eq!(outcome.new_devices, 1);
    }

    /// Never stores anything
    struct BlackHoleStore;

    impl IdentityStore for BlackHoleStore {
        fn batch_lookup(&self, _: IdentityKind, _: &[String]) -> Result<HashMap<String, u32>> {
            Ok(HashMap::new())
        }

        fn max_id(&self, _: IdentityKind) -> Result<u32> {
            Ok(0)
        }

        fn batch_insert(&self, _: IdentityKind, _: &[(u32, String)]) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_gives_up_after_repeated_conflicts() {
        let mut discovery = Discovery::new();
        discovery.observe_param("TEMP");
        match discovery.commit(&BlackHoleStore) {
            Err(StdfError::IdentityConflict { kind, name, .. }) => {
                assert_eq!(kind, "parameter");
                assert_eq!(name, "TEMP");
            }
            _ => panic!("Expected IdentityConflict error"),
        }
    }

    /// Hands the same id back for every name
    struct CollidingStore;

    impl IdentityStore for CollidingStore {
        fn batch_lookup(&self, _: IdentityKind, names: &[String]) -> Result<HashMap<String, u32>> {
            Ok(names.iter().map(|n| (n.clone(), 7)).collect())
        }

        fn max_id(&self, _: IdentityKind) -> Result<u32> {
            Ok(7)
        }

        fn batch_insert(&self, _: IdentityKind, _: &[(u32, String)]) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_duplicate_ids_fail_loudly() {
        let mut discovery = Discovery::new();
        discovery.observe_device("DEV1");
        discovery.observe_device("DEV2");
        assert!(matches!(
            discovery.commit(&CollidingStore),
            Err(StdfError::IdentityConflict { .. })
        ));
    }
}
