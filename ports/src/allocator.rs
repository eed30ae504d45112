use crate::error::PortError;
use fs2::FileExt;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PORT_ALLOC_FILE: &str = "port-alloc.dat";
pub const PORT_LOCK_FILE: &str = "port-alloc.lck";
pub const MAX_RETRIES: usize = 10_000;

/// Hands out host ports recorded in a lock-guarded JSON set on disk.
///
/// The file is re-read under the lock on every call; nothing is cached
/// between calls, so independent processes sharing `data_dir` see each
/// other's reservations.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    data_dir: PathBuf,
}

/// Holds the cross-process lock until dropped.
struct ReservationLock {
    file: File,
}

impl Drop for ReservationLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release port reservation lock: {}", e);
        }
    }
}

impl PortAllocator {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn alloc_path(&self) -> PathBuf {
        self.data_dir.join(PORT_ALLOC_FILE)
    }

    fn lock(&self) -> Result<ReservationLock, PortError> {
        let path = self.data_dir.join(PORT_LOCK_FILE);
        let lock_err = |source| PortError::Lock {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(&self.data_dir).map_err(lock_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;

        Ok(ReservationLock { file })
    }

    /// Reserves a port that is bindable right now and not already reserved.
    pub fn allocate(&self) -> Result<u16, PortError> {
        let _lock = self.lock()?;
        let mut reserved = self.load();

        // Probe sockets stay open until we return so the kernel cannot
        // hand the same ephemeral port out twice in one call.
        let mut probes = Vec::new();
        for _ in 0..MAX_RETRIES {
            let (socket, port) = probe_ephemeral_port()?;
            probes.push(socket);

            if reserved.insert(port) {
                self.persist(&reserved)?;
                tracing::debug!(port, probes = probes.len(), "Allocated port");
                return Ok(port);
            }
        }

        Err(PortError::RetriesExceeded(MAX_RETRIES))
    }

    /// Removes `port` from the reservation set. Unknown ports are ignored.
    pub fn release(&self, port: u16) -> Result<(), PortError> {
        let _lock = self.lock()?;
        let mut reserved = self.load();

        if reserved.remove(&port) {
            self.persist(&reserved)?;
            tracing::debug!(port, "Released port");
        }
        Ok(())
    }

    pub fn reserved(&self) -> Result<Vec<u16>, PortError> {
        let _lock = self.lock()?;
        Ok(self.load().into_iter().collect())
    }

    fn load(&self) -> BTreeSet<u16> {
        let path = self.alloc_path();
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeSet::new(),
            Err(e) => {
                tracing::warn!("Port reservation file {:?} unreadable, resetting: {}", path, e);
                return BTreeSet::new();
            }
        };

        match serde_json::from_slice::<Vec<u16>>(&content) {
            Ok(ports) => ports.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Port reservation file {:?} corrupt, resetting: {}", path, e);
                BTreeSet::new()
            }
        }
    }

    fn persist(&self, reserved: &BTreeSet<u16>) -> Result<(), PortError> {
        let path = self.alloc_path();
        let persist_err = |source| PortError::Persist {
            path: path.display().to_string(),
            source,
        };

        let ports: Vec<u16> = reserved.iter().copied().collect();
        let content = serde_json::to_vec(&ports).map_err(|e| persist_err(e.into()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir).map_err(persist_err)?;
        tmp.write_all(&content).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&path).map_err(|e| persist_err(e.error))?;

        Ok(())
    }
}

fn probe_ephemeral_port() -> Result<(Socket, u16), PortError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_linger(Some(Duration::ZERO))?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(1)?;

    let port = socket
        .local_addr()?
        .as_socket()
        .map(|a| a.port())
        .ok_or_else(|| std::io::Error::other("probe socket has no inet address"))?;

    Ok((socket, port))
}

/// Whether `127.0.0.1:<port>` can be bound right now. Reserves nothing.
pub fn is_locally_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
