//! Socket ownership correlator (/proc/net/{tcp,udp}[6] joined with /proc/<pid>/fd)

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressFamily {
    #[serde(rename = "AF_INET")]
    Inet,
    #[serde(rename = "AF_INET6")]
    Inet6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Established,
    SynSent,
    SynRecv,
    #[serde(rename = "FIN_WAIT1")]
    FinWait1,
    #[serde(rename = "FIN_WAIT2")]
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    NewSynRecv,
    /// Connectionless sockets and unknown state codes.
    None,
}

impl ConnectionState {
    fn from_tcp_code(code: u8) -> Self {
        match code {
            0x01 => ConnectionState::Established,
            0x02 => ConnectionState::SynSent,
            0x03 => ConnectionState::SynRecv,
            0x04 => ConnectionState::FinWait1,
            0x05 => ConnectionState::FinWait2,
            0x06 => ConnectionState::TimeWait,
            0x07 => ConnectionState::Close,
            0x08 => ConnectionState::CloseWait,
            0x09 => ConnectionState::LastAck,
            0x0A => ConnectionState::Listen,
            0x0B => ConnectionState::Closing,
            0x0C => ConnectionState::NewSynRecv,
            _ => ConnectionState::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketBinding {
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub connection_state: ConnectionState,
    pub address_family: AddressFamily,
    pub protocol: Protocol,
}

/// One row of a /proc/net socket table before ownership is known.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SocketEntry {
    pub inode: u64,
    pub binding: SocketBinding,
}

pub trait SocketCorrelator: Send + Sync {
    /// Map each owning pid to its inet sockets in table order.
    fn correlate(&self) -> HashMap<u32, Vec<SocketBinding>>;
}

const TABLES: [(&str, AddressFamily, Protocol); 4] = [
    ("tcp", AddressFamily::Inet, Protocol::Tcp),
    ("tcp6", AddressFamily::Inet6, Protocol::Tcp),
    ("udp", AddressFamily::Inet, Protocol::Udp),
    ("udp6", AddressFamily::Inet6, Protocol::Udp),
];

/// Decode an `ADDR:PORT` pair as printed by the kernel. Address words are
/// in host byte order.
pub(crate) fn parse_endpoint(field: &str, family: AddressFamily) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let ip = match family {
        AddressFamily::Inet => {
            if addr_hex.len() != 8 {
                return None;
            }
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        AddressFamily::Inet6 => {
            if addr_hex.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(addr_hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };
    Some((ip, port))
}

/// Parse the body of one /proc/net table. Malformed rows are skipped.
pub(crate) fn parse_table(content: &str, family: AddressFamily, protocol: Protocol) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            let (local_ip, local_port) = parse_endpoint(parts[1], family)?;
            let (remote_ip, remote_port) = parse_endpoint(parts[2], family)?;
            let state = match protocol {
                Protocol::Tcp => ConnectionState::from_tcp_code(u8::from_str_radix(parts[3], 16).ok()?),
                Protocol::Udp => ConnectionState::None,
            };
            let inode = parts[9].parse().ok()?;

            let remote_address = if remote_ip.is_unspecified() && remote_port == 0 {
                None
            } else {
                Some(format!("{}:{}", remote_ip, remote_port))
            };

            Some(SocketEntry {
                inode,
                binding: SocketBinding {
                    local_address: Some(format!("{}:{}", local_ip, local_port)),
                    remote_address,
                    connection_state: state,
                    address_family: family,
                    protocol,
                },
            })
        })
        .collect()
}

/// Extract the inode from a `socket:[12345]` fd link target.
pub(crate) fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

pub struct ProcNetCorrelator {
    proc_root: PathBuf,
}

impl ProcNetCorrelator {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn read_tables(&self) -> Vec<SocketEntry> {
        let net = self.proc_root.join("net");
        let mut entries = Vec::new();
        for (file, family, protocol) in TABLES {
            match fs::read_to_string(net.join(file)) {
                Ok(content) => entries.extend(parse_table(&content, family, protocol)),
                Err(e) => debug!("Skipping /proc/net/{}: {}", file, e),
            }
        }
        entries
    }

    /// Socket inode to owning pids. Descriptor directories we cannot read
    /// (other users, exited processes) contribute nothing.
    fn inode_owners(&self) -> HashMap<u64, Vec<u32>> {
        let mut owners: HashMap<u64, Vec<u32>> = HashMap::new();
        let Ok(entries) = fs::read_dir(&self.proc_root) else {
            return owners;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(target) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = target.to_str().and_then(socket_inode) {
                    let pids = owners.entry(inode).or_default();
                    if !pids.contains(&pid) {
                        pids.push(pid);
                    }
                }
            }
        }
        owners
    }
}

impl Default for ProcNetCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketCorrelator for ProcNetCorrelator {
    fn correlate(&self) -> HashMap<u32, Vec<SocketBinding>> {
        let owners = self.inode_owners();
        let mut by_pid: HashMap<u32, Vec<SocketBinding>> = HashMap::new();
        for entry in self.read_tables() {
            // inode 0 means the socket has no owning descriptor (TIME_WAIT etc.)
            if entry.inode == 0 {
                continue;
            }
            let Some(pids) = owners.get(&entry.inode) else {
                continue;
            };
            for &pid in pids {
                by_pid.entry(pid).or_default().push(entry.binding.clone());
            }
        }
        by_pid
    }
}
