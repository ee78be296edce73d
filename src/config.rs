//! Service configuration.
//!
//! Loaded from a JSON file. Resolution order for the file path:
//!   1. `--config` CLI flag
//!   2. `ASR_CONFIG` environment variable
//!   3. `~/.config/asr/conf.json`
//!
//! Paths in the file may start with `~/`, which expands against the home
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;

use crate::job::{Lang, Tier};

fn default_ttl_coef() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    // Database connection and target table.
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub table: String,

    /// Root of the date-partitioned artifact layout.
    pub data_dir: PathBuf,
    /// Directory of per-language sample wavs (seeder only).
    pub sample_dir: PathBuf,
    /// Directory of model binaries, one per tier (`lev2.bin`, ...).
    pub model_dir: PathBuf,
    /// Path to the engine executable.
    pub whisper: PathBuf,

    // Engine parallelism knobs. `n_thread` also indexes the budget table.
    pub n_proc: u32,
    pub n_thread: u8,

    /// Upper bound on concurrent in-flight engine processes.
    pub max_cpu: usize,

    /// Multiplier on the processing budget to obtain the reap deadline.
    #[serde(default = "default_ttl_coef")]
    pub ttl_coef: f64,

    /// Audio files smaller than this are skipped by admission.
    #[serde(default)]
    pub wav_min_size: u64,

    /// Selects the engine's `-ojf` (full) JSON output instead of `-oj`.
    #[serde(default)]
    pub output_json_full: bool,

    /// Ensure the job table exists on scheduler startup.
    #[serde(default)]
    pub create_table: bool,
}

impl Config {
    /// Model binary for a tier: `model_dir/<tier>.bin`.
    pub fn model_path(&self, tier: Tier) -> PathBuf {
        self.model_dir.join(format!("{tier}.bin"))
    }

    /// Sample wav for a language: `sample_dir/sample_<lang>.wav`.
    pub fn sample_wav(&self, lang: Lang) -> PathBuf {
        self.sample_dir.join(format!("sample_{lang}.wav"))
    }

    /// The engine's JSON output flag.
    pub fn json_flag(&self) -> &'static str {
        if self.output_json_full { "-ojf" } else { "-oj" }
    }
}

/// Resolve the config file path following the priority chain.
pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(p) = cli_path {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("ASR_CONFIG") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    if let Some(base) = BaseDirs::new() {
        return base.home_dir().join(".config").join("asr").join("conf.json");
    }
    PathBuf::from("conf.json")
}

/// Load and validate the configuration.
pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let mut config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("parse config {}", path.display()))?;

    if !matches!(config.n_thread, 1 | 2) {
        anyhow::bail!("n_thread must be 1 or 2, got {}", config.n_thread);
    }
    if config.max_cpu == 0 {
        anyhow::bail!("max_cpu must be at least 1");
    }
    if config.ttl_coef <= 0.0 {
        anyhow::bail!("ttl_coef must be positive, got {}", config.ttl_coef);
    }
    // The table name is interpolated into SQL as an identifier, so restrict
    // it to identifier characters.
    if config.table.is_empty()
        || !config.table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        anyhow::bail!("table must be a plain SQL identifier, got {:?}", config.table);
    }

    for dir in [
        &mut config.data_dir,
        &mut config.sample_dir,
        &mut config.model_dir,
        &mut config.whisper,
    ] {
        *dir = expand_home(dir);
    }

    Ok(config)
}

/// Expand a leading `~/` against the home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
