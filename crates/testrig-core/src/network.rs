//! Free localhost port allocation for hosted-service components.
//!
//! Nothing in this workspace hosts a service itself; components that start
//! one (an HTTP fake, a gRPC stub) call [`next_available_port`] during
//! initialization and publish the address under
//! [`keys::service_base_address`](crate::pipeline::keys::service_base_address).

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicU16, Ordering};

use testrig_common::constants::FIRST_SERVICE_PORT;
use testrig_common::error::{Result, TestRigError};

static SERVICE_PORTS: PortAllocator = PortAllocator::starting_at(FIRST_SERVICE_PORT);

/// Hands out localhost TCP ports that were free when probed.
///
/// Ports are never handed out twice by the same allocator, even if the
/// previous holder released them.
#[derive(Debug)]
pub struct PortAllocator {
    first: u16,
    next: AtomicU16,
}

impl PortAllocator {
    /// Creates an allocator whose first candidate is `first`.
    #[must_use]
    pub const fn starting_at(first: u16) -> Self {
        Self {
            first,
            next: AtomicU16::new(first),
        }
    }

    /// Returns the next port nobody is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error once every port above the starting point has been
    /// handed out or found busy.
    pub fn next_free(&self) -> Result<u16> {
        loop {
            let port = self.next.fetch_add(1, Ordering::Relaxed);
            if port < self.first || port == u16::MAX {
                return Err(TestRigError::component(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no free port left above {}", self.first),
                )));
            }
            if TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok() {
                tracing::debug!(port, "allocated service port");
                return Ok(port);
            }
            tracing::trace!(port, "port in use, skipping");
        }
    }
}

/// Returns a free localhost port from the process-wide allocator.
///
/// # Errors
///
/// Returns an error when the port range is exhausted.
pub fn next_available_port() -> Result<u16> {
    SERVICE_PORTS.next_free()
}
