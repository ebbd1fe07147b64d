use super::{ManagedProcess, ProcessKind};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The set of running services, keyed by unique name.
///
/// Phases publish their launched processes in one batch under a single write
/// lock; exit hooks remove individual entries by name *and* instance id so a
/// late hook never evicts a newer process with the same name. The lock is
/// never held across an `.await`.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: RwLock<HashMap<String, ManagedProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single process, returning the one it replaced.
    pub fn insert(&self, process: ManagedProcess) -> Option<ManagedProcess> {
        self.processes
            .write()
            .insert(process.name().to_string(), process)
    }

    /// Publish a phase's processes in one mutation.
    ///
    /// Processes that already exited are skipped: their exit hook ran before
    /// they could be published. Terminal launchers are kept regardless, since
    /// the service outlives the launcher.
    pub fn publish(&self, batch: impl IntoIterator<Item = ManagedProcess>) -> usize {
        let mut processes = self.processes.write();
        let mut count = 0;
        // Checked under the lock: an exit hook that fires later blocks on it
        // and removes the entry after we insert.
        for process in batch {
            if process.kind() != ProcessKind::Terminal && process.handle().has_exited() {
                continue;
            }
            processes.insert(process.name().to_string(), process);
            count += 1;
        }
        count
    }

    pub fn get(&self, name: &str) -> Option<ManagedProcess> {
        self.processes.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<ManagedProcess> {
        self.processes.write().remove(name)
    }

    /// Remove `name` only if it is still the instance `id`.
    pub fn remove_instance(&self, name: &str, id: u64) -> bool {
        let mut processes = self.processes.write();
        if processes.get(name).is_some_and(|p| p.id() == id) {
            processes.remove(name);
            true
        } else {
            false
        }
    }

    /// Point-in-time copy for status displays.
    pub fn snapshot(&self) -> HashMap<String, ManagedProcess> {
        self.processes.read().clone()
    }

    /// Sorted names of the running services.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Take every process out of the registry, leaving it empty.
    pub fn drain(&self) -> Vec<ManagedProcess> {
        let taken = std::mem::take(&mut *self.processes.write());
        let mut processes: Vec<ManagedProcess> = taken.into_values().collect();
        processes.sort_by(|a, b| a.name().cmp(b.name()));
        processes
    }

    pub fn clear(&self) {
        self.processes.write().clear();
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }
}
