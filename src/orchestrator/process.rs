//! Child processes owned by the supervisor.
//!
//! The supervisor keeps one [`ProcessHandle`] per child in a
//! [`ProcessTable`] and hands that table to teardown explicitly; nothing
//! else holds a reference to the children.
//!
//! The tool runs in its own process group so that signals sent on teardown
//! also reach whatever the package manager spawned (install scripts,
//! `node-gyp`, nested package managers).

use std::ffi::OsString;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// Which child a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The interception gateway.
    Gateway,
    /// The package manager.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Gateway => write!(f, "gateway"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Everything needed to start a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable.
    pub program: OsString,
    /// Arguments.
    pub args: Vec<OsString>,
    /// Variables to set.
    pub env: Vec<(String, String)>,
    /// Variables to remove from the inherited environment.
    pub env_remove: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Spec for `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value this spec sets for `key`, if any (last one wins).
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for key in &self.env_remove {
            command.env_remove(key);
        }
        command.envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

/// A supervised child and what is known about it.
#[derive(Debug)]
pub struct ProcessHandle {
    /// Which child this is.
    pub role: Role,
    /// Process ID.
    pub pid: u32,
    /// Exit code once the child has exited.
    pub exit_code: Option<i32>,
    /// Whether the child was still running at the last poll.
    pub alive: bool,
    child: Child,
    own_group: bool,
}

impl ProcessHandle {
    /// Start a child.
    ///
    /// The tool gets its own process group and inherits stdio. The gateway
    /// shares the supervisor's stderr for diagnostics and gets no stdout.
    pub fn spawn(role: Role, spec: &CommandSpec) -> std::io::Result<Self> {
        let mut command = spec.to_command();
        let own_group = role == Role::Tool;
        match role {
            Role::Tool => {
                command.process_group(0);
            }
            Role::Gateway => {
                command.stdin(Stdio::null()).stdout(Stdio::null());
            }
        }

        let child = command.spawn()?;
        let pid = child.id();
        info!("Started {} (pid {}): {:?}", role, pid, spec.program);

        Ok(Self {
            role,
            pid,
            exit_code: None,
            alive: true,
            child,
            own_group,
        })
    }

    /// Refresh `alive` and `exit_code` without blocking. Returns `alive`.
    pub fn poll(&mut self) -> bool {
        if !self.alive {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => self.record_exit(status),
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to poll {} (pid {}): {}", self.role, self.pid, e);
            }
        }
        self.alive
    }

    fn record_exit(&mut self, status: ExitStatus) {
        self.alive = false;
        self.exit_code = exit_code_of(status);
        debug!(
            "{} (pid {}) exited: {:?}",
            self.role, self.pid, self.exit_code
        );
    }

    /// Send a signal to the child (its whole group for the tool).
    ///
    /// A child that is already gone is not an error.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        let pid = Pid::from_raw(self.pid as i32);
        let result = if self.own_group {
            killpg(pid, signal)
        } else {
            kill(pid, signal)
        };
        match result {
            Err(Errno::ESRCH) => Ok(()),
            other => other,
        }
    }

    /// Whether any member of the child's own process group still exists.
    ///
    /// Always `false` for children that share the supervisor's group.
    fn group_alive(&self) -> bool {
        self.own_group && killpg(Pid::from_raw(self.pid as i32), None::<Signal>).is_ok()
    }

    /// Whether the child, or anything left in its process group, is running.
    fn running(&mut self) -> bool {
        let alive = self.poll();
        alive || self.group_alive()
    }

    /// Forcefully kill the child (and its group) and reap it.
    fn force_kill(&mut self) {
        if let Err(e) = self.signal(Signal::SIGKILL) {
            warn!("Failed to SIGKILL {} (pid {}): {}", self.role, self.pid, e);
        }
        if !self.alive {
            return;
        }
        match self.child.wait() {
            Ok(status) => self.record_exit(status),
            Err(e) => {
                warn!("Failed to reap {} (pid {}): {}", self.role, self.pid, e);
                self.alive = false;
            }
        }
    }
}

/// Exit code of a finished process, `128 + signal` for signal deaths.
pub fn exit_code_of(status: ExitStatus) -> Option<i32> {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
}

/// The supervisor's children.
#[derive(Debug, Default)]
pub struct ProcessTable {
    /// Gateway handle, once spawned.
    pub gateway: Option<ProcessHandle>,
    /// Tool handle, once spawned.
    pub tool: Option<ProcessHandle>,
}

impl ProcessTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn handles_mut(&mut self) -> impl Iterator<Item = &mut ProcessHandle> {
        self.tool.iter_mut().chain(self.gateway.iter_mut())
    }

    /// Stop every child that is still running.
    ///
    /// SIGTERM to all, then up to `grace` for them to exit, then SIGKILL to
    /// whatever is left. The tool's process group is signalled even when
    /// the tool itself has already exited, so nothing it spawned outlives
    /// the run. Safe to call any number of times.
    pub async fn teardown(&mut self, grace: Duration, poll_interval: Duration) {
        let mut any_running = false;
        for handle in self.handles_mut() {
            if handle.running() {
                any_running = true;
                debug!("Sending SIGTERM to {} (pid {})", handle.role, handle.pid);
                if let Err(e) = handle.signal(Signal::SIGTERM) {
                    warn!("Failed to SIGTERM {} (pid {}): {}", handle.role, handle.pid, e);
                }
            }
        }
        if !any_running {
            return;
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            let mut still_running = false;
            for handle in self.handles_mut() {
                still_running |= handle.running();
            }
            if !still_running {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }

        for handle in self.handles_mut() {
            if handle.running() {
                warn!(
                    "{} (pid {}) did not exit within {:?}, killing",
                    handle.role, handle.pid, grace
                );
                handle.force_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    async fn wait_exit(handle: &mut ProcessHandle) {
        for _ in 0..100 {
            if !handle.poll() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process did not exit");
    }

    #[tokio::test]
    async fn test_exit_code_recorded() {
        let mut handle = ProcessHandle::spawn(Role::Tool, &sh("exit 3")).unwrap();
        wait_exit(&mut handle).await;

        assert!(!handle.alive);
        assert_eq!(handle.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_env_is_applied() {
        // SAFETY: test-only; no other test reads this variable.
        unsafe { std::env::set_var("FRESHGATE_GONE", "present") };
        let mut spec = sh("test \"$FRESHGATE_TEST\" = yes && test -z \"$FRESHGATE_GONE\"")
            .env("FRESHGATE_TEST", "yes");
        spec.env_remove.push("FRESHGATE_GONE".into());

        let mut handle = ProcessHandle::spawn(Role::Tool, &spec).unwrap();
        wait_exit(&mut handle).await;

        assert_eq!(handle.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_teardown_terminates_and_is_idempotent() {
        let mut table = ProcessTable::new();
        table.tool = Some(ProcessHandle::spawn(Role::Tool, &sh("sleep 30")).unwrap());
        table.gateway = Some(ProcessHandle::spawn(Role::Gateway, &sh("sleep 30")).unwrap());

        table
            .teardown(Duration::from_secs(5), Duration::from_millis(20))
            .await;

        let tool = table.tool.as_ref().unwrap();
        assert!(!tool.alive);
        assert_eq!(tool.exit_code, Some(128 + 15));
        assert!(!table.gateway.as_ref().unwrap().alive);

        // Second teardown is a no-op
        table
            .teardown(Duration::from_secs(5), Duration::from_millis(20))
            .await;
    }

    #[tokio::test]
    async fn test_teardown_escalates_to_sigkill() {
        let mut table = ProcessTable::new();
        // The ignored disposition is inherited by `sleep` as well
        table.tool = Some(
            ProcessHandle::spawn(Role::Tool, &sh("trap '' TERM; sleep 30")).unwrap(),
        );
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        table
            .teardown(Duration::from_millis(300), Duration::from_millis(20))
            .await;

        let tool = table.tool.as_ref().unwrap();
        assert!(!tool.alive);
        assert_eq!(tool.exit_code, Some(128 + 9));
    }

    /// Whether `pid` exists and is not a zombie.
    fn pid_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_teardown_reaches_group_after_leader_exit() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("bg.pid");
        let script = format!("sleep 60 & echo $! > '{}'; exit 1", pidfile.display());

        let mut table = ProcessTable::new();
        table.tool = Some(ProcessHandle::spawn(Role::Tool, &sh(&script)).unwrap());
        wait_exit(table.tool.as_mut().unwrap()).await;

        let background: i32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(pid_running(background));

        table
            .teardown(Duration::from_secs(2), Duration::from_millis(20))
            .await;

        for _ in 0..100 {
            if !pid_running(background) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!pid_running(background));
        assert_eq!(table.tool.as_ref().unwrap().exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_signal_to_exited_process_is_noop() {
        let mut handle = ProcessHandle::spawn(Role::Gateway, &sh("exit 0")).unwrap();
        wait_exit(&mut handle).await;

        assert!(handle.signal(Signal::SIGTERM).is_ok());
    }
}
