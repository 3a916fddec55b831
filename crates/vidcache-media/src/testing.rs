//! Scripted [`ProcessRunner`] for tests.
//!
//! Each spawn pops the next [`ScriptedOutcome`]; when the script is empty the
//! process exits 0 with no output. Spawned specs and signals are recorded so
//! tests can assert on them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;

use crate::error::{MediaError, MediaResult};
use crate::process::{ProcessOutput, ProcessRunner, ProcessSpec, SpawnedProcess, Terminate};

type Effect = Arc<dyn Fn(&ProcessSpec) + Send + Sync>;

#[derive(Clone)]
enum Behavior {
    Exit,
    Delay(Duration),
    Gate(Arc<Notify>),
    Hang,
    SpawnError,
}

/// What one scripted process does.
#[derive(Clone)]
pub struct ScriptedOutcome {
    behavior: Behavior,
    exit_code: Option<i32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    effect: Option<Effect>,
}

impl ScriptedOutcome {
    /// Exit immediately with `code`.
    pub fn exit(code: i32) -> Self {
        Self {
            behavior: Behavior::Exit,
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
            effect: None,
        }
    }

    /// Never exit on its own; only a signal ends it.
    pub fn hang() -> Self {
        Self {
            behavior: Behavior::Hang,
            ..Self::exit(0)
        }
    }

    /// Fail to spawn.
    pub fn spawn_error() -> Self {
        Self {
            behavior: Behavior::SpawnError,
            ..Self::exit(0)
        }
    }

    /// Exit with `code` once `gate` is notified.
    pub fn gated(code: i32, gate: Arc<Notify>) -> Self {
        Self {
            behavior: Behavior::Gate(gate),
            ..Self::exit(code)
        }
    }

    /// Exit with `code` after `delay`.
    pub fn delayed(code: i32, delay: Duration) -> Self {
        Self {
            behavior: Behavior::Delay(delay),
            ..Self::exit(code)
        }
    }

    pub fn with_stdout(mut self, stdout: impl AsRef<[u8]>) -> Self {
        self.stdout = stdout.as_ref().to_vec();
        self
    }

    pub fn with_stderr(mut self, stderr: impl AsRef<[u8]>) -> Self {
        self.stderr = stderr.as_ref().to_vec();
        self
    }

    /// Run `effect` with the spawned spec when the process exits on its own,
    /// e.g. to write the output files a real encoder would produce.
    pub fn with_effect(mut self, effect: impl Fn(&ProcessSpec) + Send + Sync + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }
}

/// Records interrupts/kills and wakes a waiting scripted process.
struct ScriptedTerminator {
    stop: Arc<Notify>,
    exited: Arc<AtomicBool>,
    interrupts: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedTerminator {
    fn signal(&self) {
        if !self.exited.load(Ordering::SeqCst) {
            self.stop.notify_one();
        }
    }
}

impl Terminate for ScriptedTerminator {
    fn interrupt(&self) -> MediaResult<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.signal();
        Ok(())
    }

    fn kill(&self) -> MediaResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.signal();
        Ok(())
    }
}

/// Fake runner driven by a queue of outcomes.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    spawned: Mutex<Vec<ProcessSpec>>,
    interrupts: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Specs of every spawn attempt, in order.
    pub fn spawned(&self) -> Vec<ProcessSpec> {
        lock(&self.spawned).clone()
    }

    pub fn spawn_count(&self) -> usize {
        lock(&self.spawned).len()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for ScriptedRunner {
    fn spawn(&self, spec: ProcessSpec) -> MediaResult<SpawnedProcess> {
        lock(&self.spawned).push(spec.clone());
        let outcome = lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| ScriptedOutcome::exit(0));

        if matches!(outcome.behavior, Behavior::SpawnError) {
            return Err(MediaError::spawn(
                spec.program.clone(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            ));
        }

        let stop = Arc::new(Notify::new());
        let exited = Arc::new(AtomicBool::new(false));
        let terminator = Arc::new(ScriptedTerminator {
            stop: Arc::clone(&stop),
            exited: Arc::clone(&exited),
            interrupts: Arc::clone(&self.interrupts),
            kills: Arc::clone(&self.kills),
        });

        let completion = async move {
            let ran_to_end = match outcome.behavior {
                Behavior::Exit | Behavior::SpawnError => true,
                Behavior::Delay(delay) => tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = stop.notified() => false,
                },
                Behavior::Gate(gate) => tokio::select! {
                    _ = gate.notified() => true,
                    _ = stop.notified() => false,
                },
                Behavior::Hang => {
                    stop.notified().await;
                    false
                }
            };
            exited.store(true, Ordering::SeqCst);

            if !ran_to_end {
                return Ok(ProcessOutput {
                    exit_code: None,
                    stdout: Vec::new(),
                    stderr: outcome.stderr,
                });
            }
            if let Some(effect) = &outcome.effect {
                effect(&spec);
            }
            Ok(ProcessOutput {
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            })
        }
        .boxed();

        Ok(SpawnedProcess {
            terminator,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_exit_runs_effect() {
        let runner = ScriptedRunner::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        runner.push(ScriptedOutcome::exit(0).with_effect(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let output = runner
            .spawn(ProcessSpec::new("ffmpeg"))
            .unwrap()
            .completion
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hang_ends_on_interrupt() {
        let runner = ScriptedRunner::new();
        runner.push(ScriptedOutcome::hang());
        let process = runner.spawn(ProcessSpec::new("ffmpeg")).unwrap();

        process.terminator.interrupt().unwrap();
        let output = process.completion.await.unwrap();
        assert_eq!(output.exit_code, None);
        assert_eq!(runner.interrupts(), 1);
    }
}
