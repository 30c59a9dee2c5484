pub mod lookup;
pub mod signal;

pub use lookup::{ProcessLookup, SystemProcessLookup};
pub use signal::{Signal, SignalSender, UnixSignals};

use crate::error::{BenchError, Result};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// One externally launched OS process.
///
/// The handle owns the child, so the pid cannot be recycled by the kernel
/// until we reap it.
pub struct ProcessHandle {
    pid: u32,
    command: String,
    child: Child,
    signals: Arc<dyn SignalSender>,
    terminated: bool,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl ProcessHandle {
    /// Starts `program` with all stdio detached.
    pub fn launch(
        stage: &str,
        program: &str,
        args: &[String],
        signals: Arc<dyn SignalSender>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        Self::spawn(stage, cmd, describe(program, args), signals).map_err(|source| {
            BenchError::Spawn {
                stage: stage.to_string(),
                command: describe(program, args),
                source,
            }
        })
    }

    /// Spawns a pre-configured command. Callers map the IO error onto the
    /// failure class that fits their stage.
    pub(crate) fn spawn(
        stage: &str,
        mut cmd: Command,
        command: String,
        signals: Arc<dyn SignalSender>,
    ) -> std::io::Result<Self> {
        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                "process exited before its pid was captured",
            )
        })?;

        info!("Started {} with PID {}: {}", stage, pid, command);

        Ok(Self {
            pid,
            command,
            child,
            signals,
            terminated: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Exit status if the process has already finished.
    pub fn try_exited(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Sends SIGTERM once. Repeated calls and calls on a process that
    /// already exited succeed without signalling anything.
    pub fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            debug!("PID {} already terminated", self.pid);
            return Ok(());
        }
        self.terminated = true;

        if let Some(status) = self.try_exited() {
            debug!("PID {} already exited with {}", self.pid, status);
            return Ok(());
        }

        match self.signals.send(self.pid, Signal::Terminate) {
            Ok(true) => {
                debug!("Sent SIGTERM to PID {}", self.pid);
                Ok(())
            }
            Ok(false) => {
                debug!("PID {} was gone before SIGTERM", self.pid);
                Ok(())
            }
            Err(source) => Err(BenchError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }

    fn kill(&mut self) -> Result<()> {
        match self.signals.send(self.pid, Signal::Kill) {
            Ok(true) => {
                debug!("Sent SIGKILL to PID {}", self.pid);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(source) => Err(BenchError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }

    /// Terminates, waits up to `grace` for exit and escalates to SIGKILL.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        self.terminate()?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("PID {} exited with {}", self.pid, status);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(
                    "PID {} ({}) ignored SIGTERM for {:?}, killing",
                    self.pid, self.command, grace
                );
                self.kill()?;
                let status = self.child.wait().await?;
                debug!("PID {} exited with {}", self.pid, status);
                Ok(())
            }
        }
    }
}

pub(crate) fn describe(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSignals {
        sent: AtomicUsize,
    }

    impl SignalSender for CountingSignals {
        fn send(&self, pid: u32, signal: Signal) -> io::Result<bool> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            UnixSignals.send(pid, signal)
        }
    }

    struct FailingSignals;

    impl SignalSender for FailingSignals {
        fn send(&self, _pid: u32, _signal: Signal) -> io::Result<bool> {
            Err(io::Error::from_raw_os_error(libc::EPERM))
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_launch_records_pid_and_command() {
        let mut handle =
            ProcessHandle::launch("test", "sleep", &args(&["5"]), Arc::new(UnixSignals)).unwrap();

        assert!(handle.pid() > 0);
        assert_eq!(handle.command(), "sleep 5");

        handle.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_executable() {
        let err = ProcessHandle::launch(
            "producer",
            "/nonexistent/logbench-producer",
            &[],
            Arc::new(UnixSignals),
        )
        .unwrap_err();

        match err {
            BenchError::Spawn { stage, command, .. } => {
                assert_eq!(stage, "producer");
                assert_eq!(command, "/nonexistent/logbench-producer");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminate_twice_on_exited_process() {
        let signals = Arc::new(CountingSignals::default());
        let mut handle = ProcessHandle::launch("test", "true", &[], signals.clone()).unwrap();
        handle.wait().await.unwrap();

        assert!(handle.terminate().is_ok());
        assert!(handle.terminate().is_ok());
        assert_eq!(signals.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminate_signals_running_process_once() {
        let signals = Arc::new(CountingSignals::default());
        let mut handle =
            ProcessHandle::launch("test", "sleep", &args(&["30"]), signals.clone()).unwrap();

        handle.terminate().unwrap();
        handle.terminate().unwrap();
        assert_eq!(signals.sent.load(Ordering::SeqCst), 1);

        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_reports_signal_failure() {
        let mut handle =
            ProcessHandle::launch("test", "sleep", &args(&["30"]), Arc::new(FailingSignals))
                .unwrap();

        let err = handle.terminate().unwrap_err();
        assert!(matches!(err, BenchError::Signal { .. }));

        handle.child.kill().await.unwrap();
    }

    #[derive(Default)]
    struct RecordingSignals {
        sent: std::sync::Mutex<Vec<Signal>>,
    }

    impl SignalSender for RecordingSignals {
        fn send(&self, pid: u32, signal: Signal) -> io::Result<bool> {
            self.sent.lock().unwrap().push(signal);
            UnixSignals.send(pid, signal)
        }
    }

    #[tokio::test]
    async fn test_shutdown_escalates_when_term_is_ignored() {
        let signals = Arc::new(RecordingSignals::default());
        let mut handle = ProcessHandle::launch(
            "test",
            "sh",
            &args(&["-c", "trap '' TERM; exec sleep 30"]),
            signals.clone(),
        )
        .unwrap();

        // give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(
            Duration::from_secs(5),
            handle.shutdown(Duration::from_millis(200)),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(handle.try_exited().is_some());
        assert_eq!(
            *signals.sent.lock().unwrap(),
            vec![Signal::Terminate, Signal::Kill]
        );
    }

    #[tokio::test]
    async fn test_failed_escalation_is_a_signal_error() {
        let mut handle = ProcessHandle::launch(
            "test",
            "sh",
            &args(&["-c", "trap '' TERM; exec sleep 30"]),
            Arc::new(UnixSignals),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.terminate().unwrap();

        // swap in a sender that cannot deliver SIGKILL
        handle.signals = Arc::new(FailingSignals);
        let err = handle
            .shutdown(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Signal { .. }));

        handle.child.kill().await.unwrap();
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe("pidstat", &[]), "pidstat");
        assert_eq!(
            describe("pidstat", &args(&["-p", "42"])),
            "pidstat -p 42"
        );
    }
}
