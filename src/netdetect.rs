use std::collections::HashSet;
use std::net::IpAddr;

use if_addrs::get_if_addrs;
use tracing::debug;

/// Addresses bound to local interfaces, loopback included.
pub fn local_addrs() -> HashSet<IpAddr> {
    match get_if_addrs() {
        Ok(ifaces) => ifaces.into_iter().map(|iface| iface.ip()).collect(),
        Err(e) => {
            debug!(error = %e, "interface enumeration failed");
            HashSet::new()
        }
    }
}

/// True for loopback, the unspecified address (dials land on this host), or an interface address.
pub fn is_local_addr(ip: IpAddr, local: &HashSet<IpAddr>) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    ip.is_loopback() || ip.is_unspecified() || local.contains(&ip)
}

/// Resolve `host` and report whether every address it maps to belongs to this machine.
///
/// A host that fails to resolve, or resolves to nothing, is not local.
pub async fn host_is_local(host: &str) -> bool {
    let addrs: Vec<IpAddr> = match tokio::net::lookup_host((host, 0)).await {
        Ok(it) => it.map(|sa| sa.ip()).collect(),
        Err(e) => {
            debug!(host, error = %e, "host resolution failed");
            return false;
        }
    };
    if addrs.is_empty() {
        return false;
    }
    let local = local_addrs();
    addrs.into_iter().all(|ip| is_local_addr(ip, &local))
}
