//! Process action executor (signal, renice, restart)

use crate::collector::{ProcessCollector, ProcessIdentity};
use crate::error::{ControlError, Result};
use std::io;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const SIGNAL_DENIED: &str =
    "Access denied. Try running the server with sudo for root-owned processes.";
const DENIED: &str = "Access denied.";

pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Int,
    Hup,
    Stop,
    Cont,
}

impl Signal {
    /// Accepts the bare names (TERM, KILL, ...) in any case.
    pub fn parse(name: &str) -> Result<Self> {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "TERM" => Ok(Signal::Term),
            "KILL" => Ok(Signal::Kill),
            "INT" => Ok(Signal::Int),
            "HUP" => Ok(Signal::Hup),
            "STOP" => Ok(Signal::Stop),
            "CONT" => Ok(Signal::Cont),
            _ => Err(ControlError::InvalidArgument(format!("Unsupported signal {}", upper))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
            Signal::Int => "INT",
            Signal::Hup => "HUP",
            Signal::Stop => "STOP",
            Signal::Cont => "CONT",
        }
    }

    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Int => libc::SIGINT,
            Signal::Hup => libc::SIGHUP,
            Signal::Stop => libc::SIGSTOP,
            Signal::Cont => libc::SIGCONT,
        }
    }
}

/// kill(2) with pid 0 or values beyond pid_t would address process groups,
/// so they are rejected as nonexistent.
fn to_pid_t(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(io::Error::from_raw_os_error(libc::ESRCH)),
    }
}

pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = to_pid_t(pid)?;
    if unsafe { libc::kill(pid, signal.as_raw()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn renice(pid: u32, priority: i32) -> io::Result<()> {
    let pid = to_pid_t(pid)?;
    if unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, priority) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Progress of a restart. A failure after `Terminating` leaves the original
/// process stopped with nothing relaunched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStage {
    Captured,
    Terminating,
    Relaunching,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    pub old_pid: u32,
    pub new_pid: u32,
    /// Whether the original process was seen to exit before relaunch.
    pub exit_confirmed: bool,
}

struct RestartRun {
    target: ProcessIdentity,
    argv: Vec<String>,
    stage: RestartStage,
}

impl RestartRun {
    fn advance(&mut self, next: RestartStage) {
        debug!("restart {}: {:?} -> {:?}", self.target.pid, self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, err: ControlError) -> ControlError {
        error!(
            "restart of {} failed during {:?}: {}",
            self.target.pid, self.stage, err
        );
        self.stage = RestartStage::Failed;
        err
    }
}

pub struct ProcessController<C> {
    collector: C,
    terminate_timeout: Duration,
    poll_interval: Duration,
}

impl<C: ProcessCollector> ProcessController<C> {
    pub fn new(collector: C) -> Self {
        Self {
            collector,
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeouts(mut self, terminate_timeout: Duration, poll_interval: Duration) -> Self {
        self.terminate_timeout = terminate_timeout;
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    fn lookup(&self, pid: u32) -> Result<ProcessIdentity> {
        self.collector.resolve(pid).ok_or(ControlError::NotFound)
    }

    pub fn dispatch_signal(&self, pid: u32, signal_name: &str) -> Result<Signal> {
        let signal = Signal::parse(signal_name)?;
        self.lookup(pid)?;
        send_signal(pid, signal).map_err(|e| ControlError::from_os(e, SIGNAL_DENIED))?;
        info!("Sent SIG{} to {}", signal.name(), pid);
        Ok(signal)
    }

    pub fn set_priority(&self, pid: u32, nice: i32) -> Result<()> {
        self.lookup(pid)?;
        renice(pid, nice).map_err(|e| ControlError::from_os(e, DENIED))?;
        info!("Set nice {} on {}", nice, pid);
        Ok(())
    }

    /// Terminate `pid` and launch it again from its captured command line.
    ///
    /// Not atomic: if the relaunch fails the original stays terminated.
    pub async fn restart(&self, pid: u32) -> Result<RestartOutcome> {
        let mut run = self.capture(pid)?;

        run.advance(RestartStage::Terminating);
        let exit_confirmed = match self.terminate(run.target).await {
            Ok(confirmed) => confirmed,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(RestartStage::Relaunching);
        let new_pid = match self.relaunch(&run.argv) {
            Ok(new_pid) => new_pid,
            Err(e) => return Err(run.fail(e)),
        };

        run.advance(RestartStage::Done);
        info!("Restarted {} as {} ({:?})", pid, new_pid, run.argv);
        Ok(RestartOutcome {
            old_pid: pid,
            new_pid,
            exit_confirmed,
        })
    }

    fn capture(&self, pid: u32) -> Result<RestartRun> {
        let info = self.collector.launch_info(pid).ok_or(ControlError::NotFound)?;
        let argv = if !info.command_line.is_empty() {
            info.command_line
        } else if !info.executable_path.is_empty() {
            vec![info.executable_path]
        } else {
            return Err(ControlError::InvalidArgument(
                "Unable to determine command line to restart.".to_string(),
            ));
        };
        Ok(RestartRun {
            target: info.identity,
            argv,
            stage: RestartStage::Captured,
        })
    }

    /// SIGTERM then wait for the incarnation to go away. Returns whether the
    /// exit was observed within the timeout.
    async fn terminate(&self, target: ProcessIdentity) -> Result<bool> {
        // Gone already, or the pid now belongs to someone else.
        if !self.collector.is_running(target) {
            return Ok(true);
        }
        match send_signal(target.pid, Signal::Term) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Ok(true),
            Err(e) => return Err(ControlError::from_os(e, DENIED)),
        }

        let deadline = Instant::now() + self.terminate_timeout;
        loop {
            if !self.collector.is_running(target) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} still running {:?} after SIGTERM, relaunching anyway",
                    target.pid, self.terminate_timeout
                );
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn relaunch(&self, argv: &[String]) -> Result<u32> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            ControlError::InvalidArgument("Unable to determine command line to restart.".to_string())
        })?;
        let mut child = match Command::new(program).args(args).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ControlError::InvalidArgument("Executable not found.".to_string()))
            }
            Err(e) => {
                return Err(ControlError::Internal(format!(
                    "Process was terminated but relaunch failed: {}",
                    e
                )))
            }
        };
        let new_pid = child.id().ok_or_else(|| {
            ControlError::Internal("Relaunched process exited immediately".to_string())
        })?;

        // The relaunched process is our child; reap it when it exits.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("relaunched process {} exited: {}", new_pid, status),
                Err(e) => warn!("failed to wait for relaunched process {}: {}", new_pid, e),
            }
        });
        Ok(new_pid)
    }
}
