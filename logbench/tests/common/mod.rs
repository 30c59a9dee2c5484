// Copyright (c) Abstract Machines
// Shell-script stand-ins for the external programs a run drives

#![allow(dead_code)]

use async_trait::async_trait;
use logbench::process::{ProcessLookup, Signal, SignalSender, UnixSignals};
use logbench::receiver::ReceiverControl;
use logbench::{BenchError, Broadcaster, LogbenchConfig, RunContext};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Writes one line per message, `$2` seconds apart.
const PRODUCER: &str = r##"#!/bin/sh
while :; do
  printf 'logbench test message of length %s\n' "$1"
  sleep "$2"
done
"##;

/// Refuses to run without a readable `-config` file, then drains stdin.
const AGENT: &str = r##"#!/bin/sh
[ "$1" = "-config" ] && [ -r "$2" ] || exit 3
cat > /dev/null
"##;

/// Mimics `pidstat -p <pid> -h -r -u -w <secs>` at a faster cadence.
const SAMPLER: &str = r##"#!/bin/sh
echo "Linux 6.1.0 (bench) 	01/01/2025 	_x86_64_	(4 CPU)"
echo ""
while :; do
  echo "#      Time   PID    %usr %system  %guest    %CPU   CPU  minflt/s  majflt/s     VSZ    RSS   %MEM   cswch/s nvcswch/s  Command"
  echo " $(date +%s)  $2    1.00    0.50    0.00    1.50     0     10.00      0.00   10240   2048   0.10      5.00      0.00  stub"
  echo ""
  sleep 0.2
done
"##;

pub struct Fixture {
    pub dir: TempDir,
    pub config_dir: PathBuf,
    pub settings: LogbenchConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("conf");
        std::fs::create_dir(&config_dir).unwrap();

        let settings = LogbenchConfig {
            producer_path: write_script(dir.path(), "producer", PRODUCER),
            agent_path: write_script(dir.path(), "logshifter", AGENT),
            sampler_path: write_script(dir.path(), "pidstat", SAMPLER),
            config_dir: config_dir.clone(),
            stop_grace_ms: 1000,
            ..Default::default()
        };

        Self {
            dir,
            config_dir,
            settings,
        }
    }

    /// Number of agent config files currently on disk.
    pub fn config_files(&self) -> usize {
        std::fs::read_dir(&self.config_dir).unwrap().count()
    }

    pub fn context(
        &self,
        broadcaster: Arc<Broadcaster>,
        lookup: Arc<dyn ProcessLookup>,
    ) -> RunContext {
        self.context_with_signals(broadcaster, lookup, Arc::new(UnixSignals))
    }

    pub fn context_with_signals(
        &self,
        broadcaster: Arc<Broadcaster>,
        lookup: Arc<dyn ProcessLookup>,
        signals: Arc<dyn SignalSender>,
    ) -> RunContext {
        RunContext {
            settings: Arc::new(self.settings.clone()),
            broadcaster,
            receiver: Arc::new(StubReceiver::default()),
            lookup,
            signals,
        }
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[derive(Default)]
pub struct StubReceiver {
    pub resets: AtomicUsize,
}

#[async_trait]
impl ReceiverControl for StubReceiver {
    async fn reset(&self) -> Result<(), BenchError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process_name(&self) -> &str {
        "rsyslogd"
    }
}

/// Resolves every name to a fixed pid.
pub struct FixedLookup {
    pub pid: Option<u32>,
    pub alive: bool,
}

impl FixedLookup {
    /// Stands the test process itself in for the receiver.
    pub fn this_process() -> Self {
        Self {
            pid: Some(std::process::id()),
            alive: true,
        }
    }
}

#[async_trait]
impl ProcessLookup for FixedLookup {
    async fn find_by_name(&self, _name: &str) -> Option<u32> {
        self.pid
    }

    async fn is_alive(&self, _pid: u32) -> bool {
        self.alive
    }
}

/// Delivers signals for real and remembers, in order, which stand-in each
/// SIGTERM went to. A sampler is labelled `pidstat -> <target>`.
#[derive(Default)]
pub struct RecordingSignals {
    terminated: Mutex<Vec<String>>,
}

impl RecordingSignals {
    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

impl SignalSender for RecordingSignals {
    fn send(&self, pid: u32, signal: Signal) -> std::io::Result<bool> {
        if signal == Signal::Terminate {
            self.terminated.lock().unwrap().push(describe_pid(pid));
        }
        UnixSignals.send(pid, signal)
    }
}

const STAND_INS: [&str; 3] = ["producer", "logshifter", "pidstat"];

fn describe_pid(pid: u32) -> String {
    if pid == std::process::id() {
        return "self".to_string();
    }

    let args = cmdline(pid);
    let Some(name) = args.iter().find_map(|arg| {
        let base = Path::new(arg).file_name()?.to_str()?;
        STAND_INS.contains(&base).then(|| base.to_string())
    }) else {
        return format!("pid {pid}");
    };

    if name != "pidstat" {
        return name;
    }

    let target = args
        .iter()
        .skip_while(|arg| arg.as_str() != "-p")
        .nth(1)
        .and_then(|p| p.parse::<u32>().ok());
    match target {
        Some(target) => format!("pidstat -> {}", describe_pid(target)),
        None => name,
    }
}

fn cmdline(pid: u32) -> Vec<String> {
    std::fs::read(format!("/proc/{pid}/cmdline"))
        .map(|raw| {
            raw.split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect()
        })
        .unwrap_or_default()
}
