//! External process runner.
//!
//! Every encoder/prober invocation goes through [`ProcessRunner`], so tests can
//! swap in a scripted runner and production can prefix commands (for example
//! `docker exec ffmpeg`) without the callers knowing.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to stdin before it is closed
    pub stdin: Option<Vec<u8>>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Render for logs.
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Collected result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Handle used to stop a running process.
///
/// Both methods are idempotent: signalling a process that already exited is a
/// no-op.
pub trait Terminate: Send + Sync {
    /// Graceful stop (SIGINT), letting the encoder finalize.
    fn interrupt(&self) -> MediaResult<()>;

    /// Forced stop (SIGKILL).
    fn kill(&self) -> MediaResult<()>;
}

/// A spawned process: a terminator plus a future resolving to its output.
pub struct SpawnedProcess {
    pub terminator: Arc<dyn Terminate>,
    pub completion: BoxFuture<'static, MediaResult<ProcessOutput>>,
}

/// Spawns external processes.
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, spec: ProcessSpec) -> MediaResult<SpawnedProcess>;
}

/// Program plus fixed leading arguments, e.g. `docker exec ffmpeg ffprobe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl ToolInvocation {
    /// Run `program` directly from PATH.
    pub fn local(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Parse a whitespace separated command prefix such as
    /// `"docker exec ffmpeg ffprobe"`. Falls back to `default` when empty.
    pub fn parse(command: &str, default: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        match parts.next() {
            Some(program) => Self {
                program,
                prefix_args: parts.collect(),
            },
            None => Self::local(default),
        }
    }

    /// Build a spec for this tool with `args` appended to the prefix.
    pub fn spec<I, S>(&self, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProcessSpec::new(self.program.clone())
            .args(self.prefix_args.iter().cloned())
            .args(args)
    }

    /// Whether the tool runs behind a prefix such as `docker exec`.
    pub fn is_prefixed(&self) -> bool {
        !self.prefix_args.is_empty()
    }

    /// Another program in the same context: `docker exec ffmpeg ffmpeg`
    /// becomes `docker exec ffmpeg pkill`.
    pub fn sibling(&self, program: &str) -> Self {
        match self.prefix_args.split_last() {
            Some((_, context)) => Self {
                program: self.program.clone(),
                prefix_args: context
                    .iter()
                    .cloned()
                    .chain(std::iter::once(program.to_string()))
                    .collect(),
            },
            None => Self::local(program),
        }
    }

    /// Check the program can be found.
    pub fn check(&self) -> MediaResult<()> {
        which::which(&self.program)
            .map(|_| ())
            .map_err(|_| MediaError::ToolNotFound(self.program.clone()))
    }
}

/// Production runner built on `tokio::process`.
///
/// Each child is placed in its own process group so signals reach the whole
/// tree (ffmpeg under `docker exec`, shells, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn spawn(&self, spec: ProcessSpec) -> MediaResult<SpawnedProcess> {
        debug!("Spawning: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| MediaError::spawn(&spec.program, e))?;

        let pgid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| MediaError::internal("spawned process has no pid"))?;
        let terminator = Arc::new(ProcessGroupTerminator::new(pgid));

        // Drain both pipes concurrently so neither can fill up and block the child.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        if let (Some(mut writer), Some(input)) = (child.stdin.take(), spec.stdin) {
            tokio::spawn(async move {
                if let Err(e) = writer.write_all(&input).await {
                    warn!("Failed to write process stdin: {}", e);
                }
            });
        }

        let exited = Arc::clone(&terminator);
        let completion = async move {
            let status = child.wait().await;
            exited.mark_exited();
            let status = status?;

            let stdout = join_reader(stdout_task).await?;
            let stderr = join_reader(stderr_task).await?;

            Ok(ProcessOutput {
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
        .boxed();

        Ok(SpawnedProcess {
            terminator,
            completion,
        })
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn join_reader(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> MediaResult<Vec<u8>> {
    task.await
        .map_err(|e| MediaError::internal(format!("pipe reader panicked: {}", e)))?
        .map_err(MediaError::from)
}

/// Signals a process group; no-op after the leader has been reaped.
#[derive(Debug)]
pub struct ProcessGroupTerminator {
    pgid: i32,
    exited: AtomicBool,
}

impl ProcessGroupTerminator {
    pub fn new(pgid: i32) -> Self {
        Self {
            pgid,
            exited: AtomicBool::new(false),
        }
    }

    fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    fn signal(&self, signal: Signal) -> MediaResult<()> {
        // The pgid may be reused once the leader is reaped.
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        match killpg(Pid::from_raw(self.pgid), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(MediaError::Signal {
                pgid: self.pgid,
                message: e.to_string(),
            }),
        }
    }
}

impl Terminate for ProcessGroupTerminator {
    fn interrupt(&self) -> MediaResult<()> {
        self.signal(Signal::SIGINT)
    }

    fn kill(&self) -> MediaResult<()> {
        self.signal(Signal::SIGKILL)
    }
}

/// Stops a process that runs behind a command prefix.
///
/// Signalling the local client of `docker exec` does not reach the encoder in
/// the container, so the signal is sent through the same prefix as
/// `pkill -f <pattern>`. A forced stop also kills the local client.
pub struct PatternTerminator {
    runner: Arc<dyn ProcessRunner>,
    pkill: ToolInvocation,
    pattern: String,
    local: Arc<dyn Terminate>,
}

impl PatternTerminator {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        tool: &ToolInvocation,
        pattern: impl Into<String>,
        local: Arc<dyn Terminate>,
    ) -> Self {
        Self {
            runner,
            pkill: tool.sibling("pkill"),
            pattern: pattern.into(),
            local,
        }
    }

    fn send(&self, flag: &str) -> MediaResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MediaError::internal(format!("no runtime to run pkill: {}", e)))?;
        let spec = self.pkill.spec([flag, "-f", self.pattern.as_str()]);
        debug!("Signalling through prefix: {}", spec.display());
        let process = self.runner.spawn(spec)?;

        let pattern = self.pattern.clone();
        runtime.spawn(async move {
            match process.completion.await {
                // 1 means nothing matched: the process is already gone.
                Ok(output) if matches!(output.exit_code, Some(code) if code > 1) => {
                    warn!(pattern = %pattern, "pkill failed: {}", output.stderr_lossy());
                }
                Ok(_) => {}
                Err(e) => warn!(pattern = %pattern, "pkill did not run: {}", e),
            }
        });
        Ok(())
    }
}

impl Terminate for PatternTerminator {
    fn interrupt(&self) -> MediaResult<()> {
        self.send("-INT")
    }

    fn kill(&self) -> MediaResult<()> {
        let remote = self.send("-KILL");
        self.local.kill()?;
        remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedOutcome, ScriptedRunner};
    use std::time::Duration;

    #[test]
    fn test_tool_invocation_parse() {
        let tool = ToolInvocation::parse("docker exec ffmpeg ffprobe", "ffprobe");
        assert_eq!(tool.program, "docker");
        assert_eq!(tool.prefix_args, vec!["exec", "ffmpeg", "ffprobe"]);

        let spec = tool.spec(["-v", "error"]);
        assert_eq!(spec.args, vec!["exec", "ffmpeg", "ffprobe", "-v", "error"]);

        assert_eq!(ToolInvocation::parse("  ", "ffmpeg"), ToolInvocation::local("ffmpeg"));
    }

    #[test]
    fn test_sibling_keeps_the_prefix_context() {
        let tool = ToolInvocation::parse("docker exec ffmpeg ffmpeg", "ffmpeg");
        assert!(tool.is_prefixed());
        assert_eq!(
            tool.sibling("pkill").spec(["-INT"]).display(),
            "docker exec ffmpeg pkill -INT"
        );

        let local = ToolInvocation::local("ffmpeg");
        assert!(!local.is_prefixed());
        assert_eq!(local.sibling("pkill"), ToolInvocation::local("pkill"));
    }

    #[tokio::test]
    async fn test_pattern_terminator_signals_through_prefix() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(ScriptedOutcome::hang());
        let encoder = runner.spawn(ProcessSpec::new("docker")).unwrap();

        let tool = ToolInvocation::parse("docker exec ffmpeg ffmpeg", "ffmpeg");
        let terminator = PatternTerminator::new(runner.clone(), &tool, "job_id=abc", encoder.terminator);

        terminator.interrupt().unwrap();
        let spawned = runner.spawned();
        assert_eq!(spawned[1].display(), "docker exec ffmpeg pkill -INT -f job_id=abc");
        // The local client is left to exit with the encoder.
        assert_eq!(runner.interrupts(), 0);

        terminator.kill().unwrap();
        assert_eq!(
            runner.spawned()[2].display(),
            "docker exec ffmpeg pkill -KILL -f job_id=abc"
        );
        assert_eq!(runner.kills(), 1);
        assert_eq!(encoder.completion.await.unwrap().exit_code, None);
    }

    #[tokio::test]
    async fn test_runner_captures_output_and_exit_code() {
        let spec = ProcessSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let process = TokioProcessRunner.spawn(spec).unwrap();
        let output = process.completion.await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(output.stderr_lossy(), "err");
    }

    #[tokio::test]
    async fn test_runner_feeds_stdin() {
        let mut spec = ProcessSpec::new("cat");
        spec.stdin = Some(b"hello".to_vec());
        let output = TokioProcessRunner.spawn(spec).unwrap().completion.await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[tokio::test]
    async fn test_interrupt_stops_process_and_is_idempotent() {
        let spec = ProcessSpec::new("sleep").args(["30"]);
        let process = TokioProcessRunner.spawn(spec).unwrap();

        process.terminator.interrupt().unwrap();
        let output = tokio::time::timeout(Duration::from_secs(5), process.completion)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.exit_code, None);

        // Already reaped: both signals are no-ops.
        process.terminator.interrupt().unwrap();
        process.terminator.kill().unwrap();
    }

    #[test]
    fn test_spawn_missing_program() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let result = TokioProcessRunner.spawn(ProcessSpec::new("definitely-not-a-real-tool"));
            assert!(matches!(result, Err(MediaError::Spawn { .. })));
        });
    }
}
