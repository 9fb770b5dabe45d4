//! Local port allocation for capture processes

use std::net::{Ipv4Addr, TcpListener};

/// Ask the OS for a free localhost TCP port.
///
/// The port is released before returning, so another process could grab it
/// in between; capture processes bind it shortly after.
pub fn available_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_port_is_bindable() {
        let port = available_port().unwrap();
        assert_ne!(port, 0);
        assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok());
    }
}
