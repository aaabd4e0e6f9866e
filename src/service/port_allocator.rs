/// Port lease table for session-facing backend services
use std::collections::HashMap;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::service::{ServiceError, ServiceResult};

/// How long the liveness probe waits for a connect before treating a port as free
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Hands out ports in `[start, end)` that are neither leased nor bound.
///
/// Scanning starts at a rotating cursor so a port released a moment ago is
/// not immediately handed out again. The probe runs under the lock, which
/// serialises acquisition.
pub struct PortAllocator {
    start: u16,
    end: u16,
    probe_timeout: Duration,
    table: Mutex<LeaseTable>,
}

struct LeaseTable {
    next: u16,
    leases: HashMap<u16, String>,
}

impl PortAllocator {
    /// Create an allocator for `[start, end)`
    pub fn new(start: u16, end: u16) -> ServiceResult<Self> {
        if end <= start {
            return Err(ServiceError::InvalidPortRange { start, end });
        }
        Ok(Self {
            start,
            end,
            probe_timeout: PROBE_TIMEOUT,
            table: Mutex::new(LeaseTable {
                next: start,
                leases: HashMap::new(),
            }),
        })
    }

    /// Lease a free port to `owner`
    pub async fn acquire(&self, owner: &str) -> ServiceResult<u16> {
        let mut table = self.table.lock().await;
        for _ in self.start..self.end {
            let candidate = table.next;
            table.next = if candidate + 1 >= self.end {
                self.start
            } else {
                candidate + 1
            };

            if table.leases.contains_key(&candidate) {
                continue;
            }
            if self.is_port_in_use(candidate).await {
                debug!(port = candidate, "Port is bound by another process, skipping");
                continue;
            }

            table.leases.insert(candidate, owner.to_string());
            info!(port = candidate, owner = %owner, "Leased port");
            return Ok(candidate);
        }

        warn!(
            start = self.start,
            end = self.end,
            owner = %owner,
            "Port range exhausted"
        );
        Err(ServiceError::NoPortsAvailable {
            start: self.start,
            end: self.end,
        })
    }

    /// Return a port to the pool. Releasing an unleased port does nothing.
    pub async fn release(&self, port: u16) {
        let mut table = self.table.lock().await;
        if let Some(owner) = table.leases.remove(&port) {
            info!(port, owner = %owner, "Released port");
        }
    }

    /// Current owner of a leased port
    #[cfg(test)]
    pub async fn owner_of(&self, port: u16) -> Option<String> {
        let table = self.table.lock().await;
        table.leases.get(&port).cloned()
    }

    /// Number of ports currently leased
    pub async fn leased_count(&self) -> usize {
        self.table.lock().await.leases.len()
    }

    async fn is_port_in_use(&self, port: u16) -> bool {
        matches!(
            timeout(self.probe_timeout, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }
}
