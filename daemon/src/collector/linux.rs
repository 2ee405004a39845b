use super::{LaunchInfo, ProcessCollector, ProcessIdentity, ProcessRecord, ProcessStatus};
use chrono::{Local, TimeZone};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Kernel comm values are truncated to this many bytes.
const COMM_LEN: usize = 15;

#[derive(Clone)]
struct CpuSample {
    start_ticks: u64,
    total_ticks: u64, // utime + stime
    timestamp: Instant,
}

/// Fields of /proc/<pid>/stat used by the collector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StatFields {
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub nice: i32,
    pub start_ticks: u64,
    pub rss_pages: u64,
}

/// Parse a stat line. The comm field may itself contain spaces and
/// parentheses, so everything after the last ')' is split separately.
pub(crate) fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content.get(open + 1..close)?.to_string();
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    if rest.len() < 22 {
        return None;
    }

    Some(StatFields {
        comm,
        state: rest[0].chars().next().unwrap_or('?'),
        ppid: rest[1].parse().unwrap_or(0),
        utime: rest[11].parse().unwrap_or(0),
        stime: rest[12].parse().unwrap_or(0),
        nice: rest[16].parse().unwrap_or(0),
        start_ticks: rest[19].parse().ok()?,
        rss_pages: rest[21].parse().unwrap_or(0),
    })
}

/// Split a raw cmdline buffer into arguments.
///
/// Some programs overwrite their argv with a single space-separated string
/// and no NUL separators; those are split on spaces instead.
pub(crate) fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches('\0');
    if text.is_empty() {
        return Vec::new();
    }
    if text.contains('\0') {
        text.split('\0').map(str::to_string).collect()
    } else {
        text.split(' ')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Extend a truncated comm value using the basename of argv[0].
pub(crate) fn full_name(comm: &str, cmdline: &[String]) -> String {
    if comm.len() >= COMM_LEN {
        if let Some(first) = cmdline.first() {
            let base = Path::new(first)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if base.starts_with(comm) {
                return base;
            }
        }
    }
    comm.to_string()
}

fn parse_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

pub struct LinuxProcessCollector {
    proc_root: PathBuf,
    page_size: u64,
    clock_ticks: u64,
    boot_time: u64,
    cpu_samples: Mutex<HashMap<u32, CpuSample>>,
}

impl LinuxProcessCollector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Collector reading from an alternative procfs mount.
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        let proc_root = proc_root.into();
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 };
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) as u64 }.max(1);
        let boot_time = Self::get_boot_time(&proc_root);
        Self {
            proc_root,
            page_size,
            clock_ticks,
            boot_time,
            cpu_samples: Mutex::new(HashMap::new()),
        }
    }

    fn get_boot_time(proc_root: &Path) -> u64 {
        let stat = fs::read_to_string(proc_root.join("stat")).unwrap_or_default();
        stat.lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn list_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
                .collect(),
            Err(e) => {
                debug!("Cannot read {:?}: {}", self.proc_root, e);
                Vec::new()
            }
        };
        pids.sort_unstable();
        pids
    }

    fn read_stat(&self, pid: u32) -> Option<StatFields> {
        let content = fs::read_to_string(self.proc_root.join(pid.to_string()).join("stat")).ok()?;
        parse_stat(&content)
    }

    /// CPU percent since the previous sample of the same incarnation.
    /// The first observation is 0.0.
    fn sample_cpu(&self, pid: u32, start_ticks: u64, total_ticks: u64) -> f64 {
        let now = Instant::now();
        let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
        let percent = match samples.get(&pid) {
            Some(prev) if prev.start_ticks == start_ticks => {
                let tick_delta = total_ticks.saturating_sub(prev.total_ticks);
                let time_delta = now.duration_since(prev.timestamp).as_secs_f64();
                if time_delta > 0.0 {
                    let cpu_seconds = tick_delta as f64 / self.clock_ticks as f64;
                    (cpu_seconds / time_delta) * 100.0
                } else {
                    0.0
                }
            }
            // Unknown pid, or the pid was recycled since the last sample.
            _ => 0.0,
        };
        samples.insert(
            pid,
            CpuSample {
                start_ticks,
                total_ticks,
                timestamp: now,
            },
        );
        percent
    }

    /// Remove CPU samples for processes that no longer exist
    fn prune_samples(&self, active_pids: &[u32]) {
        let active: HashSet<u32> = active_pids.iter().copied().collect();
        let mut samples = self.cpu_samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.retain(|pid, _| active.contains(pid));
    }

    fn read_owner(&self, proc_dir: &Path) -> String {
        let uid = fs::read_to_string(proc_dir.join("status"))
            .ok()
            .and_then(|status| parse_uid(&status));
        match uid {
            Some(uid) => uzers::get_user_by_uid(uid)
                .map(|user| user.name().to_string_lossy().into_owned())
                .unwrap_or_else(|| uid.to_string()),
            None => String::new(),
        }
    }

    fn read_exe(proc_dir: &Path) -> String {
        match fs::read_link(proc_dir.join("exe")) {
            Ok(path) => {
                let mut path = path.to_string_lossy().into_owned();
                if let Some(len) = path.strip_suffix(" (deleted)").map(str::len) {
                    path.truncate(len);
                }
                path
            }
            Err(e) => {
                debug!("exe unreadable for {:?}: {}", proc_dir, e);
                String::new()
            }
        }
    }

    /// Number of descriptors pointing at filesystem paths (sockets, pipes
    /// and anonymous inodes are not counted).
    fn count_open_files(proc_dir: &Path) -> usize {
        match fs::read_dir(proc_dir.join("fd")) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|entry| fs::read_link(entry.path()).ok())
                .filter(|target| target.is_absolute())
                .count(),
            Err(_) => 0,
        }
    }

    fn created_at(&self, start_ticks: u64) -> (f64, String) {
        let created = self.boot_time as f64 + start_ticks as f64 / self.clock_ticks as f64;
        let secs = created.trunc() as i64;
        let nanos = (created.fract() * 1e9) as u32;
        let iso = Local
            .timestamp_opt(secs, nanos)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        (created, iso)
    }

    fn read_cmdline(proc_dir: &Path) -> Vec<String> {
        fs::read(proc_dir.join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default()
    }

    fn parse_process(&self, pid: u32) -> Option<ProcessRecord> {
        let proc_dir = self.proc_root.join(pid.to_string());
        // Without a readable stat the process is treated as gone.
        let stat = self.read_stat(pid)?;

        let command_line = Self::read_cmdline(&proc_dir);
        let name = full_name(&stat.comm, &command_line);
        let cpu_percent = self.sample_cpu(pid, stat.start_ticks, stat.utime + stat.stime);
        let (created_at, created_at_iso) = self.created_at(stat.start_ticks);

        Some(ProcessRecord {
            pid,
            ppid: stat.ppid,
            name,
            executable_path: Self::read_exe(&proc_dir),
            owner: self.read_owner(&proc_dir),
            status: ProcessStatus::from_state_char(stat.state),
            created_at,
            created_at_iso,
            cpu_percent,
            resident_memory_bytes: stat.rss_pages * self.page_size,
            priority: stat.nice,
            command_line,
            open_file_count: Self::count_open_files(&proc_dir),
            sockets: Vec::new(),
            start_ticks: stat.start_ticks,
        })
    }
}

impl Default for LinuxProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector for LinuxProcessCollector {
    fn enumerate(&self) -> Box<dyn Iterator<Item = ProcessRecord> + '_> {
        let pids = self.list_pids();
        self.prune_samples(&pids);
        Box::new(pids.into_iter().filter_map(move |pid| self.parse_process(pid)))
    }

    fn get_process(&self, pid: u32) -> Option<ProcessRecord> {
        self.parse_process(pid)
    }

    fn launch_info(&self, pid: u32) -> Option<LaunchInfo> {
        let proc_dir = self.proc_root.join(pid.to_string());
        let stat = self.read_stat(pid)?;
        Some(LaunchInfo {
            identity: ProcessIdentity {
                pid,
                start_ticks: stat.start_ticks,
            },
            command_line: Self::read_cmdline(&proc_dir),
            executable_path: Self::read_exe(&proc_dir),
        })
    }

    fn resolve(&self, pid: u32) -> Option<ProcessIdentity> {
        self.read_stat(pid).map(|stat| ProcessIdentity {
            pid,
            start_ticks: stat.start_ticks,
        })
    }

    fn is_running(&self, identity: ProcessIdentity) -> bool {
        match self.read_stat(identity.pid) {
            Some(stat) => {
                stat.start_ticks == identity.start_ticks
                    && !ProcessStatus::from_state_char(stat.state).is_terminal()
            }
            None => false,
        }
    }
}
