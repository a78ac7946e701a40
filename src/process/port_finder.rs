// process/port_finder.rs - lsof-backed port/process attribution
//
// Maps in-use local ports to their owning process and back. Capture
// attribution consults this once per packet, so the port map is cached
// and rebuilt at most every REFRESH_INTERVAL.
use crate::config::SelectedProcesses;
use crate::network::types::{IpVersion, Transport};
use crate::process::PidLookup;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Command;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// One socket row as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub command: String,
    pub pid: i32,
    pub ip_version: IpVersion,
    pub transport: Transport,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub state: Option<String>,
}

/// Cached local-port → owning-process map.
pub struct PortFinder {
    ip_version: IpVersion,
    ports: HashMap<u16, (i32, String)>,
    last_refresh: Option<Instant>,
}

impl PortFinder {
    pub fn new(ip_version: IpVersion) -> Self {
        PortFinder {
            ip_version,
            ports: HashMap::new(),
            last_refresh: None,
        }
    }

    /// One-shot listing of current sockets for the given IP version.
    pub fn connections(ip_version: IpVersion) -> Result<Vec<ConnectionEntry>> {
        let output = Command::new("lsof")
            .args(lsof_args(ip_version))
            .output()
            .context("failed to execute lsof")?;
        if !output.status.success() {
            anyhow::bail!("lsof exited with {}", output.status);
        }
        Ok(parse_lsof_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Rebuild the port map now.
    pub fn refresh(&mut self) -> Result<()> {
        let entries = Self::connections(self.ip_version)?;
        self.ports.clear();
        for entry in entries {
            // First owner wins; lsof repeats shared sockets per fd.
            self.ports
                .entry(entry.local.port())
                .or_insert((entry.pid, entry.command));
        }
        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    fn ensure_fresh(&mut self) {
        let stale = match self.last_refresh {
            Some(at) => at.elapsed() >= REFRESH_INTERVAL,
            None => true,
        };
        if stale {
            if let Err(err) = self.refresh() {
                log::debug!("port map refresh failed: {}", err);
            }
        }
    }

    /// Owning pid of a local port, if any process holds it.
    pub fn pid_for_port(&mut self, port: u16) -> Option<i32> {
        self.ensure_fresh();
        self.ports.get(&port).map(|(pid, _)| *pid)
    }

    /// Executable path of the process holding a local port; falls back
    /// to the reported command name when the path lookup is denied.
    pub fn path_for_port(&mut self, port: u16, lookup: &dyn PidLookup) -> Option<String> {
        self.ensure_fresh();
        let (pid, command) = self.ports.get(&port)?;
        let path = lookup.path_of(*pid);
        if path.is_empty() {
            Some(command.clone())
        } else {
            Some(path)
        }
    }

    /// Local ports held by processes matching the selection.
    pub fn ports_matching(
        &mut self,
        selection: &SelectedProcesses,
        lookup: &dyn PidLookup,
    ) -> HashSet<u16> {
        self.ensure_fresh();
        self.ports
            .iter()
            .filter(|(_, (pid, command))| {
                selection_matches(selection, *pid, command, &lookup.path_of(*pid))
            })
            .map(|(port, _)| *port)
            .collect()
    }

    #[cfg(test)]
    fn with_ports(ip_version: IpVersion, ports: HashMap<u16, (i32, String)>) -> Self {
        PortFinder {
            ip_version,
            ports,
            last_refresh: Some(Instant::now()),
        }
    }
}

/// Whether a process (pid, reported command, resolved path) matches a
/// pid-or-name-substring selection.
pub(crate) fn selection_matches(
    selection: &SelectedProcesses,
    pid: i32,
    command: &str,
    path: &str,
) -> bool {
    if selection.pids().contains(&pid) {
        return true;
    }
    selection
        .names()
        .iter()
        .any(|name| command.contains(name.as_str()) || path.contains(name.as_str()))
}

fn lsof_args(ip_version: IpVersion) -> [&'static str; 3] {
    match ip_version {
        IpVersion::V4 => ["-i4", "-n", "-P"],
        IpVersion::V6 => ["-i6", "-n", "-P"],
        IpVersion::Both => ["-i", "-n", "-P"],
    }
}

/// Parse `lsof -i -n -P` output rows. Rows that are not TCP/UDP or
/// whose addresses do not parse are dropped.
pub(crate) fn parse_lsof_output(text: &str) -> Vec<ConnectionEntry> {
    let mut entries = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }

        let command = fields[0].to_string();
        let pid = match fields[1].parse::<i32>() {
            Ok(pid) => pid,
            Err(_) => continue,
        };
        let ip_version = match fields[4] {
            "IPv4" => IpVersion::V4,
            "IPv6" => IpVersion::V6,
            _ => continue,
        };
        let transport = match fields[7] {
            "TCP" => Transport::Tcp,
            "UDP" => Transport::Udp,
            _ => continue,
        };

        let name = fields[8];
        let (local, remote) = match name.split_once("->") {
            Some((local, remote)) => {
                let local = match parse_addr(local) {
                    Some(addr) => addr,
                    None => continue,
                };
                (local, parse_addr(remote))
            }
            None => match parse_addr(name) {
                Some(addr) => (addr, None),
                None => continue,
            },
        };

        let state = fields
            .get(9)
            .map(|s| s.trim_matches(|c| c == '(' || c == ')').to_string());

        entries.push(ConnectionEntry {
            command,
            pid,
            ip_version,
            transport,
            local,
            remote,
            state,
        });
    }
    entries
}

/// Parse an lsof address: `ip:port`, `*:port`, or `[ipv6]:port`.
/// Wildcard hosts become the unspecified address; wildcard ports do
/// not identify a socket and yield None.
pub(crate) fn parse_addr(addr: &str) -> Option<SocketAddr> {
    if let Some(port) = addr.strip_prefix("*:") {
        let port = port.parse::<u16>().ok()?;
        return Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let (ip, port) = rest.split_once("]:")?;
        let ip: Ipv6Addr = ip.parse().ok()?;
        let port = port.parse::<u16>().ok()?;
        return Some(SocketAddr::new(IpAddr::V6(ip), port));
    }

    let (ip, port) = addr.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let ip: IpAddr = if ip.contains(':') {
        IpAddr::V6(ip.parse().ok()?)
    } else {
        IpAddr::V4(ip.parse().ok()?)
    };
    Some(SocketAddr::new(ip, port))
}
