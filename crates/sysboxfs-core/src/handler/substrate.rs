//! The three handler substrates concrete handlers are parameterized from:
//! passthrough-with-namespace, emulated scalar with a bound, and emulated
//! enum/flags. A fourth, purely synthetic substrate covers resources with
//! no host file to seed from or pass through to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysboxfs_nsenter::{Broker, DirEntryWire, Namespace, NsEvent, NsRequest, NsResponse};

use crate::error::{HandlerErrorKind, Result};
use crate::ionode::{IoBackend, IoNode};

use super::{synthetic_node, DirEntry, Handler, HandlerFlags, Request};

const PASSTHROUGH_NAMESPACES: &[Namespace] =
    &[Namespace::User, Namespace::Pid, Namespace::Mount, Namespace::Net];

fn target_pid(req: &Request, fallback: i32) -> i32 {
    req.container
        .as_ref()
        .and_then(|c| c.init_pid)
        .unwrap_or(fallback)
}

/// Resources Linux already namespaces correctly: reads and writes execute
/// inside the target container's namespaces via the nsenter broker, and
/// the value seen is the kernel's own for that namespace.
pub struct PassthroughHandler {
    path: PathBuf,
    broker: Arc<Broker>,
}

impl PassthroughHandler {
    pub fn new(path: PathBuf, broker: Arc<Broker>) -> Self {
        Self { path, broker }
    }
}

impl Handler for PassthroughHandler {
    fn canonical_path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, req: &Request) -> Result<IoNode> {
        let event = NsEvent {
            target_pid: target_pid(req, req.pid),
            namespaces: PASSTHROUGH_NAMESPACES.to_vec(),
            request: NsRequest::GetAttr {
                path: self.path.clone(),
            },
            async_event: false,
        };
        match self.broker.dispatch(event).map_err(HandlerErrorKind::from)? {
            NsResponse::Attr(attr) => Ok(IoNode::new(self.path.clone(), attr.mode)),
            NsResponse::Error { errno, message } => Err(errno_to_kind(errno, message)),
            _ => Err(HandlerErrorKind::Internal("unexpected nsenter response".into())),
        }
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>> {
        let event = NsEvent {
            target_pid: target_pid(req, req.pid),
            namespaces: PASSTHROUGH_NAMESPACES.to_vec(),
            request: NsRequest::ReadFile {
                path: self.path.clone(),
                offset,
                len,
            },
            async_event: false,
        };
        match self.broker.dispatch(event).map_err(HandlerErrorKind::from)? {
            NsResponse::Data(data) => Ok(data),
            NsResponse::Error { errno, message } => Err(errno_to_kind(errno, message)),
            _ => Err(HandlerErrorKind::Internal("unexpected nsenter response".into())),
        }
    }

    fn write(&self, req: &Request, offset: u64, buf: &[u8]) -> Result<usize> {
        let event = NsEvent {
            target_pid: target_pid(req, req.pid),
            namespaces: PASSTHROUGH_NAMESPACES.to_vec(),
            request: NsRequest::WriteFile {
                path: self.path.clone(),
                offset,
                data: buf.to_vec(),
            },
            async_event: false,
        };
        match self.broker.dispatch(event).map_err(HandlerErrorKind::from)? {
            NsResponse::Written(n) => Ok(n),
            NsResponse::Error { errno, message } => Err(errno_to_kind(errno, message)),
            _ => Err(HandlerErrorKind::Internal("unexpected nsenter response".into())),
        }
    }

    fn readdir(&self, req: &Request) -> Result<Vec<DirEntry>> {
        let event = NsEvent {
            target_pid: target_pid(req, req.pid),
            namespaces: PASSTHROUGH_NAMESPACES.to_vec(),
            request: NsRequest::ReadDir {
                path: self.path.clone(),
            },
            async_event: false,
        };
        match self.broker.dispatch(event).map_err(HandlerErrorKind::from)? {
            NsResponse::Entries(entries) => Ok(entries
                .into_iter()
                .map(|DirEntryWire { name, is_dir }| DirEntry { name, is_dir })
                .collect()),
            NsResponse::Error { errno, message } => Err(errno_to_kind(errno, message)),
            _ => Err(HandlerErrorKind::Internal("unexpected nsenter response".into())),
        }
    }
}

fn errno_to_kind(errno: i32, message: String) -> HandlerErrorKind {
    match errno {
        libc::ENOENT => HandlerErrorKind::NotFound(message),
        libc::EACCES | libc::EPERM => HandlerErrorKind::PermissionDenied(message),
        libc::EINVAL => HandlerErrorKind::InvalidArgument(message),
        libc::ENOTDIR => HandlerErrorKind::NotADirectory(message),
        libc::ELOOP => HandlerErrorKind::TooManyLinks,
        libc::ENAMETOOLONG => HandlerErrorKind::NameTooLong(message),
        _ => HandlerErrorKind::Internal(message),
    }
}

/// An integer file whose value is stored per container. Writes must parse
/// to a non-negative integer within `bound`; on first read the value is
/// seeded from the host's own current value, clamped to `bound`.
pub struct ScalarBoundHandler {
    path: PathBuf,
    bound: u64,
    host: Arc<dyn IoBackend>,
    readonly: bool,
    propagate: bool,
}

impl ScalarBoundHandler {
    pub fn new(path: PathBuf, bound: u64, host: Arc<dyn IoBackend>) -> Self {
        Self {
            path,
            bound,
            host,
            readonly: false,
            propagate: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn propagating(mut self) -> Self {
        self.propagate = true;
        self
    }

    fn seed_from_host(&self) -> Vec<u8> {
        use std::io::Read;
        let mut buf = String::new();
        let read = self
            .host
            .open_read(&self.path)
            .ok()
            .and_then(|mut f| f.read_to_string(&mut buf).ok());
        if read.is_none() {
            return b"0".to_vec();
        }
        let parsed: u64 = buf.trim().parse().unwrap_or(0);
        parsed.min(self.bound).to_string().into_bytes()
    }

    fn key(&self) -> String {
        self.path.display().to_string()
    }
}

impl Handler for ScalarBoundHandler {
    fn canonical_path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, _req: &Request) -> Result<IoNode> {
        Ok(synthetic_node(&self.path))
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>> {
        let key = self.key();
        let value = match &req.container {
            Some(container) => container.with_store(|store| {
                store
                    .entry(key)
                    .or_insert_with(|| self.seed_from_host())
                    .clone()
            }),
            None => self.seed_from_host(),
        };
        let start = (offset as usize).min(value.len());
        let end = (start + len).min(value.len());
        Ok(value[start..end].to_vec())
    }

    fn write(&self, req: &Request, _offset: u64, buf: &[u8]) -> Result<usize> {
        if self.readonly {
            return Err(HandlerErrorKind::PermissionDenied(
                self.path.display().to_string(),
            ));
        }
        let text = std::str::from_utf8(buf)
            .map_err(|_| HandlerErrorKind::InvalidArgument("not utf-8".into()))?
            .trim();
        let parsed: u64 = text
            .parse()
            .map_err(|_| HandlerErrorKind::InvalidArgument(format!("not an integer: {text}")))?;
        if parsed > self.bound {
            return Err(HandlerErrorKind::InvalidArgument(format!(
                "{parsed} exceeds bound {}",
                self.bound
            )));
        }

        let key = self.key();
        let Some(container) = &req.container else {
            return Err(HandlerErrorKind::InvalidArgument(
                "write requires a resolved container".into(),
            ));
        };
        container.with_store(|store| {
            store.insert(key, parsed.to_string().into_bytes());
        });

        if self.propagate && container_has_cap_sys_admin(container) {
            let _ = self
                .host
                .open_write(&self.path, false)
                .and_then(|mut f| std::io::Write::write_all(&mut f, buf));
        }
        Ok(buf.len())
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags {
            enabled: true,
            propagate: self.propagate,
            ..Default::default()
        }
    }
}

/// `CAP_SYS_ADMIN` in the container's user-ns against the container's init
/// user-ns, per the `propagate` rule. This implementation checks it against
/// the uid-map's first entry mapping to host uid 0, which is the
/// conventional signal a container's user-ns grants it admin-equivalent
/// standing over its own namespace.
fn container_has_cap_sys_admin(container: &crate::container::ContainerRecord) -> bool {
    container.uid_map.iter().any(|m| m.host_id == 0 && m.container_id == 0)
}

/// Writes must match one of a fixed set of accepted literals.
pub struct EnumHandler {
    path: PathBuf,
    accepted: &'static [&'static str],
    host: Arc<dyn IoBackend>,
}

impl EnumHandler {
    pub fn new(path: PathBuf, accepted: &'static [&'static str], host: Arc<dyn IoBackend>) -> Self {
        Self {
            path,
            accepted,
            host,
        }
    }

    fn key(&self) -> String {
        self.path.display().to_string()
    }

    fn seed_from_host(&self) -> Vec<u8> {
        use std::io::Read;
        let mut buf = String::new();
        if self
            .host
            .open_read(&self.path)
            .ok()
            .and_then(|mut f| f.read_to_string(&mut buf).ok())
            .is_none()
        {
            return self.accepted.first().unwrap_or(&"0").as_bytes().to_vec();
        }
        buf.trim().as_bytes().to_vec()
    }
}

impl Handler for EnumHandler {
    fn canonical_path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, _req: &Request) -> Result<IoNode> {
        Ok(synthetic_node(&self.path))
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>> {
        let key = self.key();
        let value = match &req.container {
            Some(container) => container.with_store(|store| {
                store
                    .entry(key)
                    .or_insert_with(|| self.seed_from_host())
                    .clone()
            }),
            None => self.seed_from_host(),
        };
        let start = (offset as usize).min(value.len());
        let end = (start + len).min(value.len());
        Ok(value[start..end].to_vec())
    }

    fn write(&self, req: &Request, _offset: u64, buf: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| HandlerErrorKind::InvalidArgument("not utf-8".into()))?
            .trim();
        if !self.accepted.contains(&text) {
            return Err(HandlerErrorKind::InvalidArgument(format!(
                "{text} is not one of {:?}",
                self.accepted
            )));
        }
        let Some(container) = &req.container else {
            return Err(HandlerErrorKind::InvalidArgument(
                "write requires a resolved container".into(),
            ));
        };
        let key = self.key();
        container.with_store(|store| {
            store.insert(key, text.as_bytes().to_vec());
        });
        Ok(buf.len())
    }
}

/// Fixed or templated content with no host value to seed from — the
/// `binfmt_misc` stubs and `/proc/swaps` header fall in this category.
pub struct SyntheticHandler {
    path: PathBuf,
    content: Vec<u8>,
    is_dir: bool,
    children: Vec<DirEntry>,
}

impl SyntheticHandler {
    pub fn file(path: PathBuf, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            content: content.into(),
            is_dir: false,
            children: Vec::new(),
        }
    }

    pub fn directory(path: PathBuf, children: Vec<DirEntry>) -> Self {
        Self {
            path,
            content: Vec::new(),
            is_dir: true,
            children,
        }
    }
}

impl Handler for SyntheticHandler {
    fn canonical_path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, _req: &Request) -> Result<IoNode> {
        let mode = if self.is_dir {
            libc::S_IFDIR | 0o755
        } else {
            libc::S_IFREG | 0o444
        };
        Ok(IoNode::new(self.path.clone(), mode))
    }

    fn read(&self, _req: &Request, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = (offset as usize).min(self.content.len());
        let end = (start + len).min(self.content.len());
        Ok(self.content[start..end].to_vec())
    }

    fn write(&self, _req: &Request, _offset: u64, _buf: &[u8]) -> Result<usize> {
        Err(HandlerErrorKind::PermissionDenied(
            self.path.display().to_string(),
        ))
    }

    fn readdir(&self, _req: &Request) -> Result<Vec<DirEntry>> {
        Ok(self.children.clone())
    }
}

/// A kernel knob whose value is two whitespace-separated port numbers,
/// e.g. `ip_local_port_range`'s `"32768 60999"`. `ScalarBoundHandler`'s
/// single-integer bound has nothing to compare against here, so this
/// substrate parses and re-serializes the pair directly instead.
pub struct PortRangeHandler {
    path: PathBuf,
    host: Arc<dyn IoBackend>,
}

impl PortRangeHandler {
    pub fn new(path: PathBuf, host: Arc<dyn IoBackend>) -> Self {
        Self { path, host }
    }

    fn key(&self) -> String {
        self.path.display().to_string()
    }

    fn seed_from_host(&self) -> Vec<u8> {
        use std::io::Read;
        let mut buf = String::new();
        let read = self
            .host
            .open_read(&self.path)
            .ok()
            .and_then(|mut f| f.read_to_string(&mut buf).ok());
        match read.and_then(|_| parse_port_range(buf.trim())) {
            Some((low, high)) => format!("{low}\t{high}").into_bytes(),
            None => b"32768\t60999".to_vec(),
        }
    }
}

fn parse_port_range(s: &str) -> Option<(u16, u16)> {
    let mut parts = s.split_whitespace();
    let low: u16 = parts.next()?.parse().ok()?;
    let high: u16 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || low > high {
        return None;
    }
    Some((low, high))
}

impl Handler for PortRangeHandler {
    fn canonical_path(&self) -> &Path {
        &self.path
    }

    fn lookup(&self, _req: &Request) -> Result<IoNode> {
        Ok(synthetic_node(&self.path))
    }

    fn read(&self, req: &Request, offset: u64, len: usize) -> Result<Vec<u8>> {
        let key = self.key();
        let value = match &req.container {
            Some(container) => container.with_store(|store| {
                store
                    .entry(key)
                    .or_insert_with(|| self.seed_from_host())
                    .clone()
            }),
            None => self.seed_from_host(),
        };
        let start = (offset as usize).min(value.len());
        let end = (start + len).min(value.len());
        Ok(value[start..end].to_vec())
    }

    fn write(&self, req: &Request, _offset: u64, buf: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| HandlerErrorKind::InvalidArgument("not utf-8".into()))?
            .trim();
        let Some((low, high)) = parse_port_range(text) else {
            return Err(HandlerErrorKind::InvalidArgument(format!(
                "not a valid port range: {text}"
            )));
        };
        let Some(container) = &req.container else {
            return Err(HandlerErrorKind::InvalidArgument(
                "write requires a resolved container".into(),
            ));
        };
        let key = self.key();
        container.with_store(|store| {
            store.insert(key, format!("{low}\t{high}").into_bytes());
        });
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerRecord, IdMapEntry};
    use crate::ionode::RealIoBackend;

    fn request_with_container() -> (Request, Arc<ContainerRecord>) {
        let record = Arc::new(ContainerRecord::registered(
            "c1".into(),
            1000,
            chrono::Utc::now(),
            vec![IdMapEntry {
                container_id: 0,
                host_id: 0,
                size: 1,
            }],
            vec![],
            4026531900,
            4026531901,
            vec![],
            vec![],
        ));
        let req = Request {
            pid: 1000,
            uid: 0,
            gid: 0,
            container: Some(record.clone()),
        };
        (req, record)
    }

    #[test]
    fn scalar_bound_handler_seeds_from_host_then_stores_per_container() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("panic"), b"0\n").unwrap();
        let host = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let handler = ScalarBoundHandler::new(PathBuf::from("/panic"), 100, host);

        let (req, _record) = request_with_container();
        let first = handler.read(&req, 0, 16).unwrap();
        assert_eq!(first, b"0");

        handler.write(&req, 0, b"2").unwrap();
        let second = handler.read(&req, 0, 16).unwrap();
        assert_eq!(second, b"2");
    }

    #[test]
    fn scalar_bound_handler_rejects_value_over_bound() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("max"), b"0\n").unwrap();
        let host = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let handler = ScalarBoundHandler::new(PathBuf::from("/max"), 2147483647, host);
        let (req, _record) = request_with_container();

        let err = handler.write(&req, 0, b"99999999999").unwrap_err();
        assert!(matches!(err, HandlerErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn enum_handler_rejects_unlisted_value() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let handler = EnumHandler::new(PathBuf::from("/ptrace_scope"), &["0", "1", "2", "3"], host);
        let (req, _record) = request_with_container();
        let err = handler.write(&req, 0, b"9").unwrap_err();
        assert!(matches!(err, HandlerErrorKind::InvalidArgument(_)));
    }

    #[test]
    fn port_range_handler_seeds_from_host_then_stores_per_container() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("range"), b"32768\t60999\n").unwrap();
        let host = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let handler = PortRangeHandler::new(PathBuf::from("/range"), host);

        let (req, _record) = request_with_container();
        let seeded = handler.read(&req, 0, 32).unwrap();
        assert_eq!(seeded, b"32768\t60999");

        handler.write(&req, 0, b"1024 2048").unwrap();
        let updated = handler.read(&req, 0, 32).unwrap();
        assert_eq!(updated, b"1024\t2048");
    }

    #[test]
    fn port_range_handler_rejects_malformed_or_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RealIoBackend::new(dir.path().to_path_buf()));
        let handler = PortRangeHandler::new(PathBuf::from("/range"), host);
        let (req, _record) = request_with_container();

        assert!(handler.write(&req, 0, b"not-a-range").is_err());
        assert!(handler.write(&req, 0, b"60999 32768").is_err());
    }

    #[test]
    fn synthetic_handler_readdir_returns_fixed_children() {
        let handler = SyntheticHandler::directory(
            PathBuf::from("/binfmt_misc"),
            vec![
                DirEntry {
                    name: "status".into(),
                    is_dir: false,
                },
                DirEntry {
                    name: "register".into(),
                    is_dir: false,
                },
            ],
        );
        let (req, _record) = request_with_container();
        let entries = handler.readdir(&req).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
