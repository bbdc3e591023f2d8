/// External command action
///
/// Handles spawning the process, capturing output, monitoring timeout, and handling exit codes.
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{Action, ActionContext, ActionOutput};
use crate::error::ActionError;

/// How long a timed-out process gets between SIGTERM and SIGKILL
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs a program with arguments
#[derive(Debug, Clone)]
pub struct CommandAction {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandAction {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run a script through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()])
    }

    /// Resolve the program against the action's PATH
    ///
    /// Provisioned tools are on the context PATH, not necessarily on ours.
    fn resolve_program(&self, ctx: &ActionContext) -> PathBuf {
        if self.program.contains(std::path::MAIN_SEPARATOR) {
            return ctx.resolve(std::path::Path::new(&self.program));
        }

        if let Some(path) = ctx.tools.get(&self.program) {
            return path.clone();
        }

        let search_path = ctx.env.get("PATH").cloned().unwrap_or_default();
        which::which_in(&self.program, Some(search_path), &ctx.working_dir).unwrap_or_else(|e| {
            tracing::debug!(
                program = %self.program,
                error = %e,
                "could not resolve program on PATH, trying as-is"
            );
            PathBuf::from(&self.program)
        })
    }
}

impl Action for CommandAction {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn execute(&self, ctx: &ActionContext) -> Result<ActionOutput, ActionError> {
        let start = Instant::now();
        let program = self.resolve_program(ctx);

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .current_dir(&ctx.working_dir)
            .env_clear()
            .envs(&ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a timeout reaches grandchildren too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        tracing::debug!(command = ?cmd, "spawning");

        let mut child = cmd.spawn().map_err(|source| ActionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Both pipes drain into one buffer so large outputs can't block the child
        let captured = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            child.stdout.take().map(|s| drain(s, Arc::clone(&captured))),
            child.stderr.take().map(|s| drain(s, Arc::clone(&captured))),
        ];

        let (status, timed_out) = match ctx.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout),
            None => child.wait().map(|status| (status, false)),
        }
        .map_err(|source| ActionError::Io {
            context: format!("Failed to wait for '{}'", self.program),
            source,
        })?;

        for reader in readers.into_iter().flatten() {
            let _ = reader.join();
        }

        let output = captured
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        let duration = start.elapsed();

        if timed_out {
            return Err(ActionError::Timeout {
                after: ctx.timeout.unwrap_or(duration),
                output: String::from_utf8_lossy(&output).into_owned(),
            });
        }

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(ActionError::NonZeroExit {
                code: exit_code,
                output: String::from_utf8_lossy(&output).into_owned(),
            });
        }

        Ok(ActionOutput {
            exit_code,
            duration,
            output,
        })
    }
}

fn drain<R: Read + Send + 'static>(
    mut reader: R,
    sink: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

/// Wait for child process with timeout
///
/// Returns the exit status and whether the process had to be terminated.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<(ExitStatus, bool)> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }

        if start.elapsed() >= timeout {
            let status = terminate(child)?;
            return Ok((status, true));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Ask the process to stop, then kill it if it ignores us
#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if killpg(group, Signal::SIGTERM).is_ok() {
        let start = Instant::now();
        while start.elapsed() < TERMINATE_GRACE {
            if let Some(status) = child.try_wait()? {
                let _ = killpg(group, Signal::SIGKILL);
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    let _ = killpg(group, Signal::SIGKILL);
    let _ = child.kill();
    child.wait()
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    let _ = TERMINATE_GRACE;
    child.kill()?;
    child.wait()
}
