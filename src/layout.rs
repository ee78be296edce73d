//! On-disk artifact layout.
//!
//! A job's artifacts live under `DATA_ROOT/YYMMDD/<auid>_<lang>_<model>.<ext>`
//! where the day prefix comes from the job's `loaded` timestamp and ext is
//! `wav` (audio), `json` (engine transcript), or `log` (engine output).
//!
//! The layout is parseable in both directions: the basename encodes enough
//! to recover job identity, which is how process-table entries (whose `-f`
//! argument is an audio path) are matched back to store rows.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::job::{Lang, Tier};

/// Day directory for a given date: `root/YYMMDD`.
pub fn day_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%y%m%d").to_string())
}

/// Canonical audio path for a job.
pub fn audio_path(
    root: &Path,
    auid: Uuid,
    lang: Lang,
    tier: Tier,
    loaded: NaiveDateTime,
) -> PathBuf {
    day_dir(root, loaded.date()).join(format!("{auid}_{lang}_{tier}.wav"))
}

/// Audio file basename without a directory, as the ingress creates it
/// before the file is moved into its day directory.
pub fn audio_name(auid: Uuid, lang: Lang, tier: Tier) -> String {
    format!("{auid}_{lang}_{tier}.wav")
}

/// Sibling artifact of an audio path: same stem, different extension.
pub fn sibling(audio: &Path, ext: &str) -> PathBuf {
    audio.with_extension(ext)
}

/// The `-of` argument the engine expects: the audio path minus `.wav`.
pub fn output_stem(audio: &Path) -> PathBuf {
    audio.with_extension("")
}

/// Identity recovered from an artifact basename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedName {
    pub auid: Uuid,
    pub lang: Lang,
    pub tier: Tier,
}

/// Parse `<auid>_<lang>_<model>.<ext>` back into job identity.
///
/// Returns None for anything that does not tokenize cleanly; callers treat
/// such paths as orphans and ignore them.
pub fn parse_name(path: &Path) -> Option<ParsedName> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.rsplitn(3, '_');
    let tier = Tier::parse(parts.next()?)?;
    let lang = Lang::parse(parts.next()?)?;
    let auid = Uuid::parse_str(parts.next()?).ok()?;
    Some(ParsedName { auid, lang, tier })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn loaded() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    #[test]
    fn audio_path_uses_day_prefix() {
        let auid = Uuid::nil();
        let p = audio_path(Path::new("/data"), auid, Lang::En, Tier::Lev2, loaded());
        assert_eq!(
            p,
            PathBuf::from(format!("/data/250307/{auid}_en_lev2.wav"))
        );
    }

    #[test]
    fn siblings_swap_extension_only() {
        let auid = Uuid::nil();
        let wav = audio_path(Path::new("/data"), auid, Lang::Ru, Tier::Lev0, loaded());
        assert_eq!(sibling(&wav, "json").extension().unwrap(), "json");
        assert_eq!(sibling(&wav, "log").extension().unwrap(), "log");
        assert_eq!(sibling(&wav, "json").file_stem(), wav.file_stem());
        assert_eq!(output_stem(&wav).extension(), None);
    }

    #[test]
    fn parse_recovers_identity() {
        let auid = Uuid::new_v4();
        let wav = audio_path(Path::new("/data"), auid, Lang::Ru, Tier::Lev4, loaded());
        let parsed = parse_name(&wav).unwrap();
        assert_eq!(parsed.auid, auid);
        assert_eq!(parsed.lang, Lang::Ru);
        assert_eq!(parsed.tier, Tier::Lev4);
        // json/log siblings parse to the same identity
        assert_eq!(parse_name(&sibling(&wav, "json")), Some(parsed));
    }

    #[test]
    fn parse_rejects_foreign_files() {
        assert_eq!(parse_name(Path::new("/data/250307/notes.txt")), None);
        assert_eq!(parse_name(Path::new("/data/250307/x_en_lev0.wav")), None);
        assert_eq!(
            parse_name(Path::new(&format!("/data/250307/{}_de_lev0.wav", Uuid::nil()))),
            None
        );
        assert_eq!(
            parse_name(Path::new(&format!("/data/250307/{}_en_lev9.wav", Uuid::nil()))),
            None
        );
    }
}
