//! Path-to-handler dispatch table, built once at daemon startup and
//! read-only for the rest of the process's life.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::RegistryError;

use super::Handler;

pub struct Registry {
    handlers: RwLock<HashMap<PathBuf, Arc<dyn Handler>>>,
    /// `dir -> [emulated child names]`, used so `readdir` on a directory
    /// can synthesize entries for the emulated resources registered under
    /// it, in addition to whatever the real kernel listing contains.
    dir_children: RwLock<HashMap<PathBuf, Vec<String>>>,
    generic_proc_sys: RwLock<Option<Arc<dyn Handler>>>,
    generic_proc: RwLock<Option<Arc<dyn Handler>>>,
    generic_sys: RwLock<Option<Arc<dyn Handler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            dir_children: RwLock::new(HashMap::new()),
            generic_proc_sys: RwLock::new(None),
            generic_proc: RwLock::new(None),
            generic_sys: RwLock::new(None),
        }
    }

    pub fn register(&self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let path = handler.canonical_path().to_path_buf();
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&path) {
            return Err(RegistryError::AlreadyRegistered(path));
        }
        if let Some(parent) = path.parent() {
            let mut dir_children = self.dir_children.write().unwrap();
            dir_children
                .entry(parent.to_path_buf())
                .or_default()
                .push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
        handlers.insert(path, handler);
        Ok(())
    }

    pub fn register_generic_proc_sys(&self, handler: Arc<dyn Handler>) {
        *self.generic_proc_sys.write().unwrap() = Some(handler);
    }

    pub fn register_generic_proc(&self, handler: Arc<dyn Handler>) {
        *self.generic_proc.write().unwrap() = Some(handler);
    }

    pub fn register_generic_sys(&self, handler: Arc<dyn Handler>) {
        *self.generic_sys.write().unwrap() = Some(handler);
    }

    /// Exact match first; otherwise the most specific generic catch-all
    /// whose prefix matches, in `/proc/sys` > `/proc` > `/sys` order.
    pub fn lookup(&self, path: &Path) -> Result<Arc<dyn Handler>, RegistryError> {
        if let Some(handler) = self.handlers.read().unwrap().get(path) {
            return Ok(handler.clone());
        }
        let as_str = path.to_string_lossy();
        if as_str.starts_with("/proc/sys/") {
            if let Some(h) = self.generic_proc_sys.read().unwrap().clone() {
                return Ok(h);
            }
        } else if as_str.starts_with("/proc/") {
            if let Some(h) = self.generic_proc.read().unwrap().clone() {
                return Ok(h);
            }
        } else if as_str.starts_with("/sys/") {
            if let Some(h) = self.generic_sys.read().unwrap().clone() {
                return Ok(h);
            }
        }
        Err(RegistryError::NoHandler(path.to_path_buf()))
    }

    pub fn children_of(&self, dir: &Path) -> Vec<String> {
        self.dir_children
            .read()
            .unwrap()
            .get(dir)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::substrate::SyntheticHandler;

    #[test]
    fn lookup_finds_exact_match_before_generic_fallback() {
        let registry = Registry::new();
        registry
            .register(Arc::new(SyntheticHandler::file(
                PathBuf::from("/proc/sys/kernel/panic"),
                b"0".to_vec(),
            )))
            .unwrap();
        registry.register_generic_proc_sys(Arc::new(SyntheticHandler::file(
            PathBuf::from("/proc/sys"),
            vec![],
        )));

        let handler = registry
            .lookup(Path::new("/proc/sys/kernel/panic"))
            .unwrap();
        assert_eq!(handler.canonical_path(), Path::new("/proc/sys/kernel/panic"));
    }

    #[test]
    fn lookup_falls_back_to_generic_proc_sys_handler() {
        let registry = Registry::new();
        registry.register_generic_proc_sys(Arc::new(SyntheticHandler::file(
            PathBuf::from("/proc/sys"),
            vec![],
        )));
        let handler = registry
            .lookup(Path::new("/proc/sys/kernel/unknown_knob"))
            .unwrap();
        assert_eq!(handler.canonical_path(), Path::new("/proc/sys"));
    }

    #[test]
    fn lookup_with_no_match_and_no_generic_is_not_found() {
        let registry = Registry::new();
        let err = registry.lookup(Path::new("/proc/sys/kernel/unknown")).err().unwrap();
        assert!(matches!(err, RegistryError::NoHandler(_)));
    }

    #[test]
    fn double_registration_of_same_path_fails() {
        let registry = Registry::new();
        registry
            .register(Arc::new(SyntheticHandler::file(
                PathBuf::from("/proc/swaps"),
                vec![],
            )))
            .unwrap();
        let err = registry
            .register(Arc::new(SyntheticHandler::file(
                PathBuf::from("/proc/swaps"),
                vec![],
            )))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }
}
