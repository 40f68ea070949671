//! A single container's identity, id-mappings, and per-resource emulated
//! value store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    PreRegistered,
    Registered,
    Updated,
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapEntry {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

/// One managed container. The emulated-value store has its own lock so a
/// read/write against one container's knobs never contends with another
/// container's, or with the directory-wide index lock.
pub struct ContainerRecord {
    pub id: String,
    pub state: ContainerState,
    pub init_pid: Option<i32>,
    pub ctime: DateTime<Utc>,
    pub uid_map: Vec<IdMapEntry>,
    pub gid_map: Vec<IdMapEntry>,
    pub pid_ns_inode: Option<u64>,
    pub user_ns_inode: Option<u64>,
    pub ro_paths: Vec<String>,
    pub masked_paths: Vec<String>,
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl ContainerRecord {
    pub fn pre_registered(id: String, ctime: DateTime<Utc>) -> Self {
        Self {
            id,
            state: ContainerState::PreRegistered,
            init_pid: None,
            ctime,
            uid_map: Vec::new(),
            gid_map: Vec::new(),
            pid_ns_inode: None,
            user_ns_inode: None,
            ro_paths: Vec::new(),
            masked_paths: Vec::new(),
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Promotes a pre-registered record to `Registered`, fixing its
    /// identity fields for the rest of its life. Carries over the
    /// existing value store, though a freshly-registered container will
    /// always have an empty one.
    #[allow(clippy::too_many_arguments)]
    pub fn registered(
        id: String,
        init_pid: i32,
        ctime: DateTime<Utc>,
        uid_map: Vec<IdMapEntry>,
        gid_map: Vec<IdMapEntry>,
        pid_ns_inode: u64,
        user_ns_inode: u64,
        ro_paths: Vec<String>,
        masked_paths: Vec<String>,
    ) -> Self {
        Self {
            id,
            state: ContainerState::Registered,
            init_pid: Some(init_pid),
            ctime,
            uid_map,
            gid_map,
            pid_ns_inode: Some(pid_ns_inode),
            user_ns_inode: Some(user_ns_inode),
            ro_paths,
            masked_paths,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Applies an `Update`: every field but identity (id, pid-ns/user-ns
    /// inode) and the value store may change.
    #[allow(clippy::too_many_arguments)]
    pub fn updated(
        existing: &ContainerRecord,
        ctime: DateTime<Utc>,
        uid_map: Vec<IdMapEntry>,
        gid_map: Vec<IdMapEntry>,
        ro_paths: Vec<String>,
        masked_paths: Vec<String>,
    ) -> Self {
        let carried_over = existing.with_store(|s| s.clone());
        Self {
            id: existing.id.clone(),
            state: ContainerState::Updated,
            init_pid: existing.init_pid,
            ctime,
            uid_map,
            gid_map,
            pid_ns_inode: existing.pid_ns_inode,
            user_ns_inode: existing.user_ns_inode,
            ro_paths,
            masked_paths,
            store: Mutex::new(carried_over),
        }
    }

    /// Grants a closure access to this container's value store without
    /// holding the directory-wide lock across the call.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> R) -> R {
        let mut guard = self.store.lock().unwrap();
        f(&mut guard)
    }
}

impl std::fmt::Debug for ContainerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("init_pid", &self.init_pid)
            .field("pid_ns_inode", &self.pid_ns_inode)
            .field("user_ns_inode", &self.user_ns_inode)
            .finish()
    }
}
