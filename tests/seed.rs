//! Integration tests for seeder file placement: sample wavs must land at
//! the canonical layout path inside a real (temp) data root.

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use asr_jobs::config::Config;
use asr_jobs::job::{Lang, Tier};
use asr_jobs::layout;
use asr_jobs::seed;

/// Harness owning a temp directory with a populated sample dir and an
/// empty data root, plus a Config pointing at both.
struct TestHarness {
    _tmp: tempfile::TempDir,
    config: Config,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let samples = tmp.path().join("samples");
        std::fs::create_dir_all(&samples).expect("create sample dir");
        std::fs::write(samples.join("sample_en.wav"), b"RIFF-en").expect("write en sample");
        std::fs::write(samples.join("sample_ru.wav"), b"RIFF-ru").expect("write ru sample");

        let config: Config = serde_json::from_value(serde_json::json!({
            "database": "asr", "user": "asr", "password": "x",
            "host": "localhost", "port": 5432, "table": "jobs",
            "data_dir": tmp.path().join("data"),
            "sample_dir": samples,
            "model_dir": tmp.path().join("models"),
            "whisper": "/usr/local/bin/whisper",
            "n_proc": 1, "n_thread": 2, "max_cpu": 2
        }))
        .expect("build config");

        Self { _tmp: tmp, config }
    }
}

fn loaded() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 7)
        .expect("valid date")
        .and_hms_opt(12, 30, 0)
        .expect("valid time")
}

#[test]
fn sample_lands_at_canonical_audio_path() {
    let h = TestHarness::new();
    let auid = Uuid::new_v4();

    let audio = seed::place_sample(&h.config, auid, Lang::En, Tier::Lev2, loaded())
        .expect("place sample");

    let expected =
        layout::audio_path(&h.config.data_dir, auid, Lang::En, Tier::Lev2, loaded());
    assert_eq!(audio, expected);
    assert_eq!(std::fs::read(&audio).expect("read placed wav"), b"RIFF-en");
    // Day directory carries the loaded date, and the basename parses back
    // to the job's identity.
    assert!(audio.parent().unwrap().ends_with("250307"));
    let parsed = layout::parse_name(&audio).expect("parseable basename");
    assert_eq!(parsed.auid, auid);
}

#[test]
fn placement_reuses_an_existing_day_dir() {
    let h = TestHarness::new();
    let first = seed::place_sample(&h.config, Uuid::new_v4(), Lang::Ru, Tier::Lev0, loaded())
        .expect("first placement");
    let second = seed::place_sample(&h.config, Uuid::new_v4(), Lang::En, Tier::Lev4, loaded())
        .expect("second placement");

    assert_eq!(first.parent(), second.parent());
    assert!(first.exists() && second.exists());
    assert_eq!(std::fs::read(&second).expect("read second wav"), b"RIFF-en");
}

#[test]
fn missing_sample_surfaces_as_error() {
    let h = TestHarness::new();
    std::fs::remove_file(h.config.sample_wav(Lang::Ru)).expect("drop ru sample");

    let err = seed::place_sample(&h.config, Uuid::new_v4(), Lang::Ru, Tier::Lev1, loaded())
        .expect_err("placement without a sample must fail");
    assert!(err.to_string().contains("sample_ru.wav"), "unexpected error: {err:#}");
}
