//! Process snapshot collector (reads /proc on Linux)

pub mod linux;

pub use linux::LinuxProcessCollector;

use crate::sockets::SocketBinding;
use serde::Serialize;

/// Scheduler state as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    TracingStop,
    Zombie,
    Dead,
    Idle,
    Waking,
    WakeKill,
    Parked,
    Unknown,
}

impl ProcessStatus {
    pub fn from_state_char(c: char) -> Self {
        match c {
            'R' => ProcessStatus::Running,
            'S' => ProcessStatus::Sleeping,
            'D' => ProcessStatus::DiskSleep,
            'T' => ProcessStatus::Stopped,
            't' => ProcessStatus::TracingStop,
            'Z' => ProcessStatus::Zombie,
            'X' | 'x' => ProcessStatus::Dead,
            'I' => ProcessStatus::Idle,
            'W' => ProcessStatus::Waking,
            'K' => ProcessStatus::WakeKill,
            'P' => ProcessStatus::Parked,
            _ => ProcessStatus::Unknown,
        }
    }

    /// True once the process can no longer run (exited but not yet reaped).
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Zombie | ProcessStatus::Dead)
    }
}

/// A pid together with the kernel start time of the incarnation that holds it.
///
/// Pids are recycled; two identities only name the same process when both
/// fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub start_ticks: u64,
}

/// One process as observed during a single enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub executable_path: String,
    pub owner: String,
    pub status: ProcessStatus,
    pub created_at: f64,
    pub created_at_iso: String,
    pub cpu_percent: f64,
    pub resident_memory_bytes: u64,
    pub priority: i32,
    pub command_line: Vec<String>,
    pub open_file_count: usize,
    pub sockets: Vec<SocketBinding>,
    #[serde(skip)]
    pub start_ticks: u64,
}

impl ProcessRecord {
    pub fn identity(&self) -> ProcessIdentity {
        ProcessIdentity {
            pid: self.pid,
            start_ticks: self.start_ticks,
        }
    }
}

/// What a restart needs to launch a process again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo {
    pub identity: ProcessIdentity,
    pub command_line: Vec<String>,
    pub executable_path: String,
}

pub trait ProcessCollector: Send + Sync {
    /// Walk the process table once. Processes that vanish or refuse access
    /// while being read are left out.
    fn enumerate(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_>;

    fn get_process(&self, pid: u32) -> Option<ProcessRecord>;

    /// Identity and launch command of `pid`, without touching CPU samples.
    fn launch_info(&self, pid: u32) -> Option<LaunchInfo> {
        self.get_process(pid).map(|record| LaunchInfo {
            identity: record.identity(),
            command_line: record.command_line,
            executable_path: record.executable_path,
        })
    }

    /// Cheap existence check returning the current incarnation of `pid`.
    fn resolve(&self, pid: u32) -> Option<ProcessIdentity>;

    /// Whether this exact incarnation still exists and has not exited.
    fn is_running(&self, identity: ProcessIdentity) -> bool;
}

impl<T: ProcessCollector + ?Sized> ProcessCollector for std::sync::Arc<T> {
    fn enumerate(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_> {
        (**self).enumerate()
    }

    fn get_process(&self, pid: u32) -> Option<ProcessRecord> {
        (**self).get_process(pid)
    }

    fn launch_info(&self, pid: u32) -> Option<LaunchInfo> {
        (**self).launch_info(pid)
    }

    fn resolve(&self, pid: u32) -> Option<ProcessIdentity> {
        (**self).resolve(pid)
    }

    fn is_running(&self, identity: ProcessIdentity) -> bool {
        (**self).is_running(identity)
    }
}
