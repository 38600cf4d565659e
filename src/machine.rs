use std::net::IpAddr;

use itertools::Itertools;
use serde::Serialize;
use tracing::trace;

/// A description of the host the bridge runs on.
/// Shown in the status bar of the web app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Host name.
    pub hostname: String,

    /// The user running the bridge.
    pub user: String,

    /// Operating system.
    pub platform: String,

    /// CPU architecture.
    pub arch: String,

    /// The address most likely reachable from the local network.
    pub ip: String,

    /// IPv4 interface addresses, `ip` first. Loopback only if nothing else is up.
    pub ips: Vec<String>,
}

impl MachineStatus {
    /// Describe the current host.
    ///
    /// Walks the network interfaces, so this may block for a while.
    pub fn current() -> Self {
        let ips = addresses(primary_ip(), interface_ips());

        Self {
            hostname: hostname(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
            platform: format!("{} ({})", std::env::consts::OS, std::env::consts::FAMILY),
            arch: std::env::consts::ARCH.to_owned(),
            ip: ips.first().cloned().unwrap_or_default(),
            ips,
        }
    }
}

/// The primary address first, then the other interface addresses.
/// Loopback addresses are dropped unless nothing else is left.
fn addresses(primary: Option<IpAddr>, interfaces: Vec<IpAddr>) -> Vec<String> {
    let all = primary
        .into_iter()
        .chain(interfaces)
        .filter(IpAddr::is_ipv4)
        .unique()
        .collect::<Vec<_>>();

    let (loopback, reachable): (Vec<_>, Vec<_>) = all.into_iter().partition(IpAddr::is_loopback);
    let chosen = if reachable.is_empty() { loopback } else { reachable };

    chosen.iter().map(IpAddr::to_string).collect()
}

fn primary_ip() -> Option<IpAddr> {
    match local_ip_address::local_ip() {
        Ok(ip) => Some(ip),
        Err(e) => {
            trace!(?e, "No primary address");
            None
        }
    }
}

fn interface_ips() -> Vec<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces.into_iter().map(|(_, ip)| ip).collect(),
        Err(e) => {
            trace!(?e, "Could not list network interfaces");
            vec![]
        }
    }
}

#[cfg(unix)]
fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_default()
}
