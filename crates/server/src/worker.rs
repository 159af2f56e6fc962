//! First-worker election: when a service is replicated on one host, only
//! the process holding the advisory file lock runs singleton tasks.

use std::{fs::OpenOptions, io};

/// Holds (or observed) the `worker-<service>.lock` advisory write lock.
/// The lock is released when the process exits; the next starter takes
/// over. Replication across hosts needs an external lease instead.
pub struct FirstWorker {
    guard: Option<fd_lock::RwLockWriteGuard<'static, std::fs::File>>,
}

impl FirstWorker {
    /// Tries to acquire the lock for `service` without blocking.
    pub fn acquire(service: &str) -> io::Result<Self> {
        let path = format!("worker-{service}.lock");
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        // leaked so the guard can outlive this scope for the process lifetime
        let lock: &'static mut fd_lock::RwLock<std::fs::File> =
            Box::leak(Box::new(fd_lock::RwLock::new(file)));
        match lock.try_write() {
            Ok(guard) => Ok(Self { guard: Some(guard) }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Self { guard: None }),
            Err(err) => Err(err),
        }
    }

    /// Whether this process won the election.
    pub fn is_first(&self) -> bool {
        self.guard.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquirer_loses() {
        let service = format!("chainyard-test-{}", std::process::id());
        let first = FirstWorker::acquire(&service).unwrap();
        assert!(first.is_first());

        let second = FirstWorker::acquire(&service).unwrap();
        assert!(!second.is_first());

        drop(first);
        let _ = std::fs::remove_file(format!("worker-{service}.lock"));
    }
}
