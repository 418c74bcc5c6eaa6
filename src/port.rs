use crate::error::{Error, Result};
use std::net::TcpListener;
use std::time::Duration;

/// Hands out OS-assigned free ports on 127.0.0.1.
///
/// Listeners stay bound until [`PortAllocator::release_listeners`] (or drop)
/// so that allocating several ports for one service never returns the same
/// port twice. Release them right before the service binds.
pub struct PortAllocator {
    listeners: Vec<TcpListener>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Allocate a random available port.
    pub fn allocate_random_port(&mut self) -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| Error::PortAllocation(format!("Failed to bind to random port: {}", e)))?;

        let port = listener
            .local_addr()
            .map_err(|e| Error::PortAllocation(format!("Failed to get local address: {}", e)))?
            .port();

        self.listeners.push(listener);
        Ok(port)
    }

    pub fn release_listeners(&mut self) {
        self.listeners.clear();
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick one free port and release it immediately.
pub fn find_free_port() -> Result<u16> {
    let mut allocator = PortAllocator::new();
    allocator.allocate_random_port()
}

/// Whether something accepts TCP connections on `host:port` right now.
pub async fn is_listening(host: &str, port: u16) -> bool {
    let connect = tokio::net::TcpStream::connect((host, port));
    matches!(
        tokio::time::timeout(Duration::from_millis(500), connect).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_ports_are_distinct_while_held() {
        let mut allocator = PortAllocator::new();
        let a = allocator.allocate_random_port().unwrap();
        let b = allocator.allocate_random_port().unwrap();
        assert_ne!(a, b);
        assert!(TcpListener::bind(("127.0.0.1", a)).is_err());

        allocator.release_listeners();
        assert!(TcpListener::bind(("127.0.0.1", a)).is_ok());
    }

    #[tokio::test]
    async fn detects_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_listening("127.0.0.1", port).await);

        drop(listener);
        let free = find_free_port().unwrap();
        assert!(!is_listening("127.0.0.1", free).await);
    }
}
