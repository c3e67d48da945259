//! Host port allocation for the communicator forward.
//!
//! A port is reserved by binding a loopback listener on it. The listener is
//! released as soon as the number is known so the hypervisor can bind the
//! port itself, while an advisory lock file keeps other builds on this host
//! from picking the same number.

use std::fs::{File, OpenOptions};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Finds a free TCP port in `[min, max]` on one address.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    addr: IpAddr,
    min: u16,
    max: u16,
    lock_dir: PathBuf,
}

impl PortAllocator {
    /// Allocator on 127.0.0.1 keeping lock files in the system temp dir.
    pub fn new(min: u16, max: u16) -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            min,
            max,
            lock_dir: std::env::temp_dir(),
        }
    }

    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = lock_dir.into();
        self
    }

    /// Try every port of the range in random order and lease the first
    /// one that is neither locked by another build nor bound.
    pub async fn allocate(&self, cancel: &CancellationToken) -> ForgeResult<PortLease> {
        if self.min == 0 {
            return Err(ForgeError::Config(
                "host port range must not include port 0".into(),
            ));
        }
        if self.min > self.max {
            return Err(ForgeError::Config(format!(
                "host_port_min ({}) must not be greater than host_port_max ({})",
                self.min, self.max
            )));
        }

        let mut candidates: Vec<u16> = (self.min..=self.max).collect();
        candidates.shuffle(&mut rand::rng());

        tracing::debug!(
            addr = %self.addr,
            min = self.min,
            max = self.max,
            "Looking for available port"
        );

        for port in candidates {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled("port allocation cancelled".into()));
            }

            let lock = match PortLock::try_acquire(&self.lock_dir, port) {
                Ok(Some(lock)) => lock,
                Ok(None) => {
                    tracing::trace!(port, "Port locked by another build");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(port, error = %e, "Cannot lock port");
                    continue;
                }
            };

            match TcpListener::bind(SocketAddr::new(self.addr, port)).await {
                Ok(listener) => {
                    tracing::info!(port, "Allocated host port");
                    return Ok(PortLease {
                        port,
                        listener: Some(listener),
                        lock: Some(lock),
                    });
                }
                Err(e) => {
                    tracing::trace!(port, error = %e, "Port in use");
                }
            }
        }

        Err(ForgeError::ResourceAcquisition(format!(
            "no free port available between {} and {}",
            self.min, self.max
        )))
    }
}

/// A reserved port number with the listener and lock used to find it.
///
/// Dropping the lease closes everything.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    listener: Option<TcpListener>,
    lock: Option<PortLock>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Close the listener but keep the number and the lock file.
    pub fn release(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!(port = self.port, "Released port listener");
        }
    }

    /// Close the listener and drop the lock. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.release();
        if self.lock.take().is_some() {
            tracing::debug!(port = self.port, "Closed port lease");
        }
    }
}

/// Advisory lock file `vmforge-port-<port>.lock`.
///
/// Released when dropped, or when the process exits.
#[derive(Debug)]
struct PortLock {
    file: File,
    path: PathBuf,
}

impl PortLock {
    /// `Ok(None)` when another holder has the lock.
    fn try_acquire(dir: &Path, port: u16) -> ForgeResult<Option<Self>> {
        let path = dir.join(format!("vmforge-port-{}.lock", port));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Ok(None);
                }
                return Err(ForgeError::Io(err));
            }
        }

        Ok(Some(Self { file, path }))
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        tracing::trace!(lock_path = %self.path.display(), "Released port lock");
    }
}
