//! The container state directory: indexes containers by id, pid-namespace
//! inode, and user-namespace inode, and hosts each container's emulated
//! value store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::container::record::{ContainerRecord, ContainerState, IdMapEntry};
use crate::error::DirectoryError;
use crate::ionode::IoBackend;
use crate::process::ProcessInspector;

struct Indices {
    by_id: HashMap<String, Arc<ContainerRecord>>,
    by_pid_ns: HashMap<u64, String>,
    by_user_ns: HashMap<u64, String>,
}

/// Fields carried by `Register`/`Update`, named the way the RPC messages
/// carry them rather than as a bare tuple.
pub struct RegisterRequest {
    pub id: String,
    pub init_pid: i32,
    pub ctime: DateTime<Utc>,
    pub uid_map: Vec<IdMapEntry>,
    pub gid_map: Vec<IdMapEntry>,
    pub ro_paths: Vec<String>,
    pub masked_paths: Vec<String>,
}

pub struct Directory {
    indices: RwLock<Indices>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(Indices {
                by_id: HashMap::new(),
                by_pid_ns: HashMap::new(),
                by_user_ns: HashMap::new(),
            }),
        }
    }

    pub fn pre_register(&self, id: String, ctime: DateTime<Utc>) -> Result<(), DirectoryError> {
        let mut indices = self.indices.write().unwrap();
        if indices.by_id.contains_key(&id) {
            return Err(DirectoryError::AlreadyExists(id));
        }
        indices
            .by_id
            .insert(id.clone(), Arc::new(ContainerRecord::pre_registered(id, ctime)));
        Ok(())
    }

    /// Promotes a pre-registered record: computes pid-ns and user-ns
    /// inodes via the process inspector and verifies neither collides with
    /// another live container. On collision the record is removed
    /// entirely, matching "fails and leaves no partial state".
    pub fn register(
        &self,
        backend: &dyn IoBackend,
        req: RegisterRequest,
    ) -> Result<(), DirectoryError> {
        let inspector = ProcessInspector::new(backend);
        let ns_inodes = inspector
            .namespace_inodes(req.init_pid)
            .map_err(DirectoryError::Process)?;
        let pid_ns_inode = *ns_inodes.get("pid").unwrap();
        let user_ns_inode = *ns_inodes.get("user").unwrap();

        let mut indices = self.indices.write().unwrap();
        match indices.by_id.get(&req.id) {
            None => return Err(DirectoryError::NotFound(req.id)),
            Some(existing) if existing.state != ContainerState::PreRegistered => {
                return Err(DirectoryError::AlreadyExists(req.id));
            }
            Some(_) => {}
        }
        if indices.by_pid_ns.contains_key(&pid_ns_inode) {
            indices.by_id.remove(&req.id);
            return Err(DirectoryError::PidNsConflict(pid_ns_inode));
        }
        if indices.by_user_ns.contains_key(&user_ns_inode) {
            indices.by_id.remove(&req.id);
            return Err(DirectoryError::UserNsConflict(user_ns_inode));
        }

        let record = Arc::new(ContainerRecord::registered(
            req.id.clone(),
            req.init_pid,
            req.ctime,
            req.uid_map,
            req.gid_map,
            pid_ns_inode,
            user_ns_inode,
            req.ro_paths,
            req.masked_paths,
        ));
        indices.by_id.insert(req.id.clone(), record);
        indices.by_pid_ns.insert(pid_ns_inode, req.id.clone());
        indices.by_user_ns.insert(user_ns_inode, req.id);
        Ok(())
    }

    /// Applies the mutable subset of fields to an already-registered
    /// record; identity fields (id, pid-ns/user-ns inode) never change.
    pub fn update(
        &self,
        id: &str,
        ctime: DateTime<Utc>,
        uid_map: Vec<IdMapEntry>,
        gid_map: Vec<IdMapEntry>,
        ro_paths: Vec<String>,
        masked_paths: Vec<String>,
    ) -> Result<(), DirectoryError> {
        let mut indices = self.indices.write().unwrap();
        let existing = indices
            .by_id
            .get(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        if existing.state == ContainerState::PreRegistered {
            return Err(DirectoryError::NotRegistered(id.to_string()));
        }
        let updated = Arc::new(ContainerRecord::updated(
            existing,
            ctime,
            uid_map,
            gid_map,
            ro_paths,
            masked_paths,
        ));
        indices.by_id.insert(id.to_string(), updated);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Result<(), DirectoryError> {
        let mut indices = self.indices.write().unwrap();
        let record = indices
            .by_id
            .remove(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        if let Some(ino) = record.pid_ns_inode {
            indices.by_pid_ns.remove(&ino);
        }
        if let Some(ino) = record.user_ns_inode {
            indices.by_user_ns.remove(&ino);
        }
        Ok(())
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<Arc<ContainerRecord>> {
        self.indices.read().unwrap().by_id.get(id).cloned()
    }

    pub fn lookup_by_pid_ns_inode(&self, inode: u64) -> Option<Arc<ContainerRecord>> {
        let indices = self.indices.read().unwrap();
        let id = indices.by_pid_ns.get(&inode)?;
        indices.by_id.get(id).cloned()
    }

    pub fn lookup_by_user_ns_inode(&self, inode: u64) -> Option<Arc<ContainerRecord>> {
        let indices = self.indices.read().unwrap();
        let id = indices.by_user_ns.get(&inode)?;
        indices.by_id.get(id).cloned()
    }

    /// Translates a pid to its pid-ns inode and thence to a container; a
    /// pid whose pid-ns inode is the host's is "not a managed container".
    pub fn lookup_by_pid(
        &self,
        backend: &dyn IoBackend,
        pid: i32,
        host_pid_ns_inode: u64,
    ) -> Result<Option<Arc<ContainerRecord>>, DirectoryError> {
        let inspector = ProcessInspector::new(backend);
        let ns_inodes = inspector
            .namespace_inodes(pid)
            .map_err(DirectoryError::Process)?;
        let pid_ns_inode = *ns_inodes.get("pid").unwrap();
        if pid_ns_inode == host_pid_ns_inode {
            return Ok(None);
        }
        Ok(self.lookup_by_pid_ns_inode(pid_ns_inode))
    }

    pub fn enumerate(&self) -> Vec<Arc<ContainerRecord>> {
        self.indices.read().unwrap().by_id.values().cloned().collect()
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ionode::RealIoBackend;
    use std::fs;
    use std::os::unix::fs::symlink;

    fn fixture_with_pid(root: &std::path::Path, pid: i32) {
        let ns_dir = root.join(format!("proc/{pid}/ns"));
        fs::create_dir_all(&ns_dir).unwrap();
        for ns in ["pid", "net", "user", "uts", "ipc", "mnt", "cgroup"] {
            fs::write(ns_dir.join(ns), []).unwrap();
        }
        let _ = symlink("unused", ns_dir.join("placeholder"));
    }

    #[test]
    fn pre_register_then_register_populates_all_indices() {
        let dir = tempfile::tempdir().unwrap();
        fixture_with_pid(dir.path(), 1000);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let directory = Directory::new();

        directory.pre_register("A".into(), Utc::now()).unwrap();
        directory
            .register(
                &backend,
                RegisterRequest {
                    id: "A".into(),
                    init_pid: 1000,
                    ctime: Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap();

        assert!(directory.lookup_by_id("A").is_some());
        let record = directory.lookup_by_id("A").unwrap();
        let pid_ns = record.pid_ns_inode.unwrap();
        assert!(directory.lookup_by_pid_ns_inode(pid_ns).is_some());
    }

    #[test]
    fn duplicate_register_fails_already_exists_and_keeps_first_record() {
        let dir = tempfile::tempdir().unwrap();
        fixture_with_pid(dir.path(), 1000);
        fixture_with_pid(dir.path(), 2000);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let directory = Directory::new();

        directory.pre_register("X".into(), Utc::now()).unwrap();
        directory
            .register(
                &backend,
                RegisterRequest {
                    id: "X".into(),
                    init_pid: 1000,
                    ctime: Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap();

        let err = directory.pre_register("X".into(), Utc::now()).unwrap_err();
        assert!(matches!(err, DirectoryError::AlreadyExists(_)));
        assert!(directory.lookup_by_id("X").is_some());
    }

    #[test]
    fn second_register_on_same_id_fails_already_exists_and_keeps_first_record() {
        let dir = tempfile::tempdir().unwrap();
        fixture_with_pid(dir.path(), 1000);
        fixture_with_pid(dir.path(), 2000);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let directory = Directory::new();

        directory.pre_register("X".into(), Utc::now()).unwrap();
        directory
            .register(
                &backend,
                RegisterRequest {
                    id: "X".into(),
                    init_pid: 1000,
                    ctime: Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap();
        let first = directory.lookup_by_id("X").unwrap();
        let first_pid_ns = first.pid_ns_inode.unwrap();

        let err = directory
            .register(
                &backend,
                RegisterRequest {
                    id: "X".into(),
                    init_pid: 2000,
                    ctime: Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap_err();
        assert!(matches!(err, DirectoryError::AlreadyExists(_)));

        let still_first = directory.lookup_by_id("X").unwrap();
        assert_eq!(still_first.init_pid, Some(1000));
        assert_eq!(still_first.pid_ns_inode, first.pid_ns_inode);
        assert!(directory.lookup_by_pid_ns_inode(first_pid_ns).is_some());
    }

    #[test]
    fn unregister_releases_all_three_indices() {
        let dir = tempfile::tempdir().unwrap();
        fixture_with_pid(dir.path(), 3000);
        let backend = RealIoBackend::new(dir.path().to_path_buf());
        let directory = Directory::new();
        directory.pre_register("Y".into(), Utc::now()).unwrap();
        directory
            .register(
                &backend,
                RegisterRequest {
                    id: "Y".into(),
                    init_pid: 3000,
                    ctime: Utc::now(),
                    uid_map: vec![],
                    gid_map: vec![],
                    ro_paths: vec![],
                    masked_paths: vec![],
                },
            )
            .unwrap();
        let pid_ns = directory.lookup_by_id("Y").unwrap().pid_ns_inode.unwrap();

        directory.unregister("Y").unwrap();
        assert!(directory.lookup_by_id("Y").is_none());
        assert!(directory.lookup_by_pid_ns_inode(pid_ns).is_none());
    }
}
