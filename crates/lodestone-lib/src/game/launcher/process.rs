/// Child-process spawning, stream capture and lifecycle monitoring
use crate::error::LaunchError;
use crate::game::launcher::plan::LaunchPlan;
use crate::utils::process::CommandExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Receives captured child output line by line. Implementations must be
/// safe for concurrent callers; both streams forward in parallel.
pub trait LogSink: Send + Sync {
    fn on_line(&self, stream: LogStream, line: &str);
}

/// Observable lifecycle of one launched child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Spawning,
    Running,
    Exited(i32),
    Failed(String),
    Terminated,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Spawning | ProcessState::Running)
    }
}

/// A spawned game process. Owns the monitoring tasks; the child itself is
/// consumed by the monitor so `wait` and `terminate` work from any clone
/// of the state channel.
#[derive(Debug)]
pub struct ProcessHost {
    pid: u32,
    state_rx: watch::Receiver<ProcessState>,
    terminating: Arc<AtomicBool>,
}

impl ProcessHost {
    /// Spawn `argv = [java] ++ jvm_args ++ [main_class] ++ game_args` with
    /// the plan's working directory and environment overrides, capturing
    /// both output streams.
    pub async fn spawn(plan: &LaunchPlan, sink: Arc<dyn LogSink>) -> Result<Self, LaunchError> {
        if !plan.working_dir.exists() {
            tokio::fs::create_dir_all(&plan.working_dir).await?;
        }

        let mut command = tokio::process::Command::new(&plan.java_binary);
        command
            .args(&plan.jvm_args)
            .arg(&plan.main_class)
            .args(&plan.game_args)
            .current_dir(&plan.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &plan.env_overrides {
            command.env(key, value);
        }
        command.suppress_console();

        log::info!(
            "Spawning {} with {} jvm args, {} game args in {}",
            plan.java_binary.display(),
            plan.jvm_args.len(),
            plan.game_args.len(),
            plan.working_dir.display()
        );
        log::debug!("Full argv: {:?}", plan.argv());

        let (state_tx, state_rx) = watch::channel(ProcessState::Spawning);

        let mut child = command.spawn().map_err(LaunchError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| LaunchError::Spawn(std::io::Error::other("child has no pid")))?;

        let _ = state_tx.send(ProcessState::Running);
        log::info!("Game process started with PID {}", pid);

        if let Some(stdout) = child.stdout.take() {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.on_line(LogStream::Stdout, &line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.on_line(LogStream::Stderr, &line);
                }
            });
        }

        let terminating = Arc::new(AtomicBool::new(false));
        let monitor_flag = terminating.clone();
        tokio::spawn(async move {
            let next = match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    if monitor_flag.load(Ordering::SeqCst) {
                        log::info!("Game process {} terminated on request", pid);
                        ProcessState::Terminated
                    } else if status.success() {
                        log::info!("Game process {} exited cleanly", pid);
                        ProcessState::Exited(code)
                    } else {
                        log::warn!("Game process {} exited with {}", pid, status);
                        ProcessState::Exited(code)
                    }
                }
                Err(e) => {
                    log::error!("Failed to wait for game process {}: {}", pid, e);
                    ProcessState::Failed(e.to_string())
                }
            };
            let _ = state_tx.send(next);
        });

        Ok(Self {
            pid,
            state_rx,
            terminating,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    /// Block until the child reaches a terminal state and return it.
    pub async fn wait(&self) -> ProcessState {
        let mut rx = self.state_rx.clone();
        loop {
            let current = rx.borrow().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Ask the child to exit, escalating to a forceful kill after `grace`.
    pub async fn terminate(&self, grace: Duration) -> Result<ProcessState, LaunchError> {
        if self.state().is_terminal() {
            return Ok(self.state());
        }

        self.terminating.store(true, Ordering::SeqCst);
        log::info!("Terminating game process {} (grace {:?})", self.pid, grace);
        polite_kill(self.pid)?;

        if let Ok(state) = tokio::time::timeout(grace, self.wait()).await {
            return Ok(state);
        }

        log::warn!(
            "Game process {} ignored the polite signal, killing forcefully",
            self.pid
        );
        force_kill(self.pid)?;
        Ok(self.wait().await)
    }
}

#[cfg(unix)]
fn polite_kill(pid: u32) -> Result<(), LaunchError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| LaunchError::Io(std::io::Error::other(e)))
}

#[cfg(unix)]
fn force_kill(pid: u32) -> Result<(), LaunchError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| LaunchError::Io(std::io::Error::other(e)))
}

#[cfg(windows)]
fn polite_kill(pid: u32) -> Result<(), LaunchError> {
    taskkill(pid, false)
}

#[cfg(windows)]
fn force_kill(pid: u32) -> Result<(), LaunchError> {
    taskkill(pid, true)
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<(), LaunchError> {
    let mut command = std::process::Command::new("taskkill");
    command.args(["/PID", &pid.to_string(), "/T"]);
    if force {
        command.arg("/F");
    }
    command.suppress_console();
    let output = command.output().map_err(LaunchError::Io)?;
    if !output.status.success() {
        return Err(LaunchError::Io(std::io::Error::other(format!(
            "taskkill failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct CollectingSink {
        lines: Mutex<Vec<(LogStream, String)>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
            }
        }
    }

    impl LogSink for CollectingSink {
        fn on_line(&self, stream: LogStream, line: &str) {
            self.lines.lock().unwrap().push((stream, line.to_string()));
        }
    }

    #[cfg(unix)]
    fn shell_plan(dir: &std::path::Path, script: &str) -> LaunchPlan {
        LaunchPlan {
            java_binary: PathBuf::from("/bin/sh"),
            jvm_args: vec!["-c".to_string(), script.to_string()],
            // sh consumes this as $0; stands in for the JVM main class slot.
            main_class: "game".to_string(),
            game_args: vec![],
            working_dir: dir.to_path_buf(),
            env_overrides: HashMap::new(),
            natives_dir: dir.join("natives"),
            warnings: vec![],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let plan = shell_plan(dir.path(), "echo out-line; echo err-line 1>&2; exit 3");
        let sink = Arc::new(CollectingSink::new());

        let host = ProcessHost::spawn(&plan, sink.clone()).await.unwrap();
        assert!(host.pid() > 0);

        let state = host.wait().await;
        assert_eq!(state, ProcessState::Exited(3));

        // Reader tasks may land a beat after the exit notification.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let lines = sink.lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(s, l)| *s == LogStream::Stdout && l == "out-line"));
        assert!(lines
            .iter()
            .any(|(s, l)| *s == LogStream::Stderr && l == "err-line"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let plan = shell_plan(dir.path(), "exit 0");
        let host = ProcessHost::spawn(&plan, Arc::new(CollectingSink::new()))
            .await
            .unwrap();
        assert_eq!(host.wait().await, ProcessState::Exited(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_moves_to_terminated_state() {
        let dir = tempfile::tempdir().unwrap();
        let plan = shell_plan(dir.path(), "sleep 30");
        let host = ProcessHost::spawn(&plan, Arc::new(CollectingSink::new()))
            .await
            .unwrap();

        let state = host.terminate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(state, ProcessState::Terminated);
        assert_eq!(host.state(), ProcessState::Terminated);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let plan = LaunchPlan {
            java_binary: dir.path().join("no-such-java"),
            jvm_args: vec![],
            main_class: "Main".to_string(),
            game_args: vec![],
            working_dir: dir.path().to_path_buf(),
            env_overrides: HashMap::new(),
            natives_dir: dir.path().join("natives"),
            warnings: vec![],
        };

        let err = ProcessHost::spawn(&plan, Arc::new(CollectingSink::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }
}
