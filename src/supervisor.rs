//! Engine process supervision.
//!
//! Launches the speech engine with stdout and stderr folded into the job's
//! `.log` artifact, polls children without blocking, kills by pid, and
//! recovers the set of running engine processes from the OS process table.
//!
//! The process-table scan is a contract shared with [`engine_args`]: the
//! audio path is the token following `-f`, and command lines shorter than
//! [`MIN_CMD_TOKENS`] are ignored as startup transients or unrelated
//! processes.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use anyhow::{Context, Result};
use sysinfo::System;
use tracing::warn;

use crate::config::Config;
use crate::job::{Lang, Tier};
use crate::layout;

/// Minimum argv length for a process-table entry to be considered a
/// fully-started engine run (program + 14 arguments).
const MIN_CMD_TOKENS: usize = 15;

/// A launched engine process, keyed by the audio path it was given.
pub struct EngineChild {
    pub audio: PathBuf,
    child: Child,
}

impl EngineChild {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking poll: None while running, exit status once finished.
    pub fn poll(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("poll engine child")
    }
}

/// Argument vector for one engine run, matching the process-table contract.
pub fn engine_args(config: &Config, lang: Lang, tier: Tier, audio: &Path) -> Vec<String> {
    vec![
        "-p".to_string(),
        config.n_proc.to_string(),
        "-t".to_string(),
        config.n_thread.to_string(),
        "-ng".to_string(),
        config.json_flag().to_string(),
        "-l".to_string(),
        lang.to_string(),
        "-f".to_string(),
        audio.display().to_string(),
        "-m".to_string(),
        config.model_path(tier).display().to_string(),
        "-of".to_string(),
        layout::output_stem(audio).display().to_string(),
    ]
}

/// Launch the engine for one job. Both output streams land in the job's
/// `.log` sibling so failures keep their diagnostics next to the audio.
pub fn spawn_engine(
    config: &Config,
    lang: Lang,
    tier: Tier,
    audio: &Path,
) -> Result<EngineChild> {
    let mut cmd = Command::new(&config.whisper);
    cmd.args(engine_args(config, lang, tier, audio));
    let child = spawn_logged(cmd, &layout::sibling(audio, "log"))?;
    Ok(EngineChild { audio: audio.to_path_buf(), child })
}

/// Spawn a command with stdout and stderr redirected into `log_path`.
pub fn spawn_logged(mut cmd: Command, log_path: &Path) -> Result<Child> {
    let log = File::create(log_path)
        .with_context(|| format!("create log {}", log_path.display()))?;
    let err = log.try_clone().context("clone log handle")?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err))
        .spawn()
        .with_context(|| format!("spawn {:?}", cmd.get_program()))
}

/// SIGKILL a pid. A process that is already gone (ESRCH) is success; any
/// other failure is logged and swallowed, since the next reap pass will
/// observe the true state.
pub fn kill(pid: u32) {
    // SAFETY: kill(2) accepts any pid with a valid signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(vid = "task", pid, "kill failed: {err}");
        }
    }
}

/// Scan the OS process table for running engine instances, returning
/// `audio path -> pid`.
pub fn running_engines(engine: &Path) -> HashMap<PathBuf, u32> {
    let engine_name = engine.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let mut sys = System::new();
    sys.refresh_processes();

    let mut map = HashMap::new();
    for (pid, process) in sys.processes() {
        if process.name() != engine_name {
            continue;
        }
        if let Some(audio) = audio_from_cmdline(process.cmd()) {
            map.insert(PathBuf::from(audio), pid.as_u32());
        }
    }
    map
}

/// Extract the `-f` argument from an engine command line.
fn audio_from_cmdline(tokens: &[String]) -> Option<&str> {
    if tokens.len() < MIN_CMD_TOKENS {
        return None;
    }
    tokens
        .windows(2)
        .find(|pair| pair[0] == "-f")
        .map(|pair| pair[1].as_str())
}
