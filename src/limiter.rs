use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of simultaneous requests per target host.
///
/// Each host gets its own semaphore of fixed capacity; there is no global cap
/// across hosts. `tokio`'s semaphore is FIFO-fair, so the longest-waiting
/// caller for a host is woken first. The permit releases its slot on drop,
/// which covers every exit path including panics and cancellation.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Suspends until the host has a free slot.
    pub async fn acquire(&self, host: &str) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap();
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                .clone()
        };

        // Never closed, so acquisition cannot fail.
        semaphore
            .acquire_owned()
            .await
            .expect("host semaphore closed")
    }
}
