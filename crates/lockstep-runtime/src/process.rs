use crate::RuntimeError;
use lockstep_schema::Platform;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn never_cancelled() -> bool {
    false
}

static NEVER: fn() -> bool = never_cancelled;

/// Timeout and cancellation applied to every solver process.
#[derive(Clone, Copy)]
pub struct SolveControl<'a> {
    pub timeout: Option<Duration>,
    cancelled: &'a (dyn Fn() -> bool + Sync),
}

impl<'a> SolveControl<'a> {
    pub fn new(timeout: Option<Duration>, cancelled: &'a (dyn Fn() -> bool + Sync)) -> Self {
        Self { timeout, cancelled }
    }

    pub fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }
}

impl SolveControl<'static> {
    /// No timeout, never cancelled.
    pub fn unbounded() -> Self {
        Self {
            timeout: None,
            cancelled: &NEVER,
        }
    }
}

impl std::fmt::Debug for SolveControl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolveControl")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn spawn_error(cmd: &Command, e: std::io::Error) -> RuntimeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::ToolNotFound(program_name(cmd))
    } else {
        RuntimeError::Io(e)
    }
}

fn drain(mut reader: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to kill solver process {}: {e}", child.id());
    }
    let _ = child.wait();
}

/// The parts of a running process the poll loop drives.
trait Polled {
    fn poll(&mut self) -> std::io::Result<Option<ExitStatus>>;
    fn terminate(&mut self);
}

impl Polled for Child {
    fn poll(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.try_wait()
    }

    fn terminate(&mut self) {
        kill(self);
    }
}

/// Poll until exit. Every early return kills and reaps the process first.
fn wait_polled(
    child: &mut impl Polled,
    platform: &Platform,
    control: &SolveControl<'_>,
) -> Result<ExitStatus, RuntimeError> {
    let started = Instant::now();
    loop {
        match child.poll() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                child.terminate();
                return Err(RuntimeError::Io(e));
            }
        }
        if control.is_cancelled() {
            child.terminate();
            return Err(RuntimeError::Cancelled(platform.clone()));
        }
        if let Some(limit) = control.timeout {
            if started.elapsed() >= limit {
                child.terminate();
                return Err(RuntimeError::SolverTimedOut {
                    platform: platform.clone(),
                    secs: limit.as_secs(),
                });
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run one platform's solver process to completion under `control`.
///
/// The child is polled so it can be killed on timeout or cancellation. Output is
/// drained on helper threads to keep the pipes from filling.
pub fn supervise(
    mut cmd: Command,
    platform: &Platform,
    control: &SolveControl<'_>,
) -> Result<(), RuntimeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("[{platform}] spawning {:?}", cmd);
    let mut child = cmd.spawn().map_err(|e| spawn_error(&cmd, e))?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = wait_polled(&mut child, platform, control)?;

    let out = collect(stdout);
    let err = collect(stderr);
    debug!(
        "[{platform}] solver exited with {status} after {:.1}s",
        started.elapsed().as_secs_f64()
    );
    if !out.trim().is_empty() {
        debug!("[{platform}] solver output:\n{}", out.trim_end());
    }

    if status.success() {
        Ok(())
    } else {
        Err(RuntimeError::SolverInvocationFailed {
            platform: platform.clone(),
            code: status.code(),
            stderr: err.trim().to_owned(),
        })
    }
}

/// Run a command with inherited stdio and return its exit status as is.
pub fn run_status(mut cmd: Command) -> Result<ExitStatus, RuntimeError> {
    debug!("running {:?}", cmd);
    cmd.status().map_err(|e| spawn_error(&cmd, e))
}

/// Run an external tool with inherited stdio; non-zero exit is an error.
pub fn run_tool(cmd: Command) -> Result<(), RuntimeError> {
    let tool = program_name(&cmd);
    let status = run_status(cmd)?;
    if status.success() {
        Ok(())
    } else {
        Err(RuntimeError::ToolFailed {
            tool,
            code: status.code(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn success_is_ok() {
        let p = Platform::new("linux-64");
        supervise(sh("echo solved"), &p, &SolveControl::unbounded()).unwrap();
    }

    #[test]
    fn failure_carries_code_and_stderr() {
        let p = Platform::new("osx-64");
        let err = supervise(sh("echo boom >&2; exit 3"), &p, &SolveControl::unbounded())
            .unwrap_err();
        match err {
            RuntimeError::SolverInvocationFailed {
                platform,
                code,
                stderr,
            } => {
                assert_eq!(platform, "osx-64");
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_kills_the_process() {
        let p = Platform::new("win-64");
        let started = Instant::now();
        let err = supervise(
            sh("sleep 30"),
            &p,
            &SolveControl {
                timeout: Some(Duration::from_millis(200)),
                cancelled: &NEVER,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::SolverTimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellation_kills_the_process() {
        static FLAG: AtomicBool = AtomicBool::new(true);
        let cancelled = || FLAG.load(Ordering::SeqCst);
        let control = SolveControl::new(None, &cancelled);
        let err = supervise(sh("sleep 30"), &Platform::new("linux-64"), &control).unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled(_)));
    }

    #[test]
    fn poll_error_terminates_the_process() {
        struct Unpollable {
            terminated: bool,
        }
        impl Polled for Unpollable {
            fn poll(&mut self) -> std::io::Result<Option<ExitStatus>> {
                Err(std::io::Error::other("wait failed"))
            }
            fn terminate(&mut self) {
                self.terminated = true;
            }
        }

        let mut child = Unpollable { terminated: false };
        let err = wait_polled(&mut child, &Platform::new("linux-64"), &SolveControl::unbounded())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
        assert!(child.terminated);
    }

    #[test]
    fn missing_program_is_tool_not_found() {
        let err = run_tool(Command::new("lockstep-definitely-missing-binary")).unwrap_err();
        assert!(matches!(err, RuntimeError::ToolNotFound(_)));
    }

    #[test]
    fn run_status_passes_the_exit_code_through() {
        assert_eq!(run_status(sh("exit 7")).unwrap().code(), Some(7));
        assert!(run_status(sh("true")).unwrap().success());
    }

    #[test]
    fn tool_failure_reports_code() {
        let err = run_tool(sh("exit 4")).unwrap_err();
        assert!(matches!(err, RuntimeError::ToolFailed { code: Some(4), .. }));
    }
}
