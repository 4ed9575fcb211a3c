//! # Network Address Utilities

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::constants::{CLUSTER_ID_BASE, LOCAL_IP_PROBE_ADDR};
use crate::error::{HarnessError, Result};

/// Cluster identifier for the redundancy group at `index`
///
/// Group 0 is `255.0.0.1`, group 1 is `255.0.0.2`, and so on. Offsets past
/// `255.255.255.255` are rejected instead of wrapping.
pub fn cluster_id(index: usize) -> Result<Ipv4Addr> {
    u32::try_from(index)
        .ok()
        .and_then(|offset| CLUSTER_ID_BASE.checked_add(offset))
        .map(Ipv4Addr::from)
        .ok_or(HarnessError::ClusterIdOverflow(index))
}

/// Outbound IPv4 address of this machine
///
/// Connecting a UDP socket sends no packets; it only asks the kernel which
/// local address would route to the probe address.
pub fn local_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(LOCAL_IP_PROBE_ADDR)?;
    Ok(socket.local_addr()?.ip())
}
