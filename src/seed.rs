//! Dev-only seeder: synthesize N jobs with sample audio.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::job::{Lang, Tier};
use crate::layout;
use crate::store::JobStore;

/// Create `n` jobs with random language and tier, copying the configured
/// sample wav into today's layout for each.
pub async fn run(config: &Config, store: &JobStore, n: u32) -> Result<()> {
    for _ in 0..n {
        let auid = Uuid::new_v4();
        let (lang, tier) = pick(auid);
        let loaded = store.create(auid, lang, tier).await?;
        place_sample(config, auid, lang, tier, loaded)?;
        info!(vid = %auid, "seeded {lang} {tier}");
    }
    Ok(())
}

/// Copy the language's sample wav into the canonical layout for one job,
/// creating the day directory as needed. Returns the audio path.
pub fn place_sample(
    config: &Config,
    auid: Uuid,
    lang: Lang,
    tier: Tier,
    loaded: NaiveDateTime,
) -> Result<PathBuf> {
    let dir = layout::day_dir(&config.data_dir, loaded.date());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create day dir {}", dir.display()))?;
    let sample = config.sample_wav(lang);
    let audio = layout::audio_path(&config.data_dir, auid, lang, tier, loaded);
    std::fs::copy(&sample, &audio)
        .with_context(|| format!("copy {} -> {}", sample.display(), audio.display()))?;
    Ok(audio)
}

/// Derive a pseudo-random language and tier from the freshly minted v4
/// id's random bytes.
fn pick(auid: Uuid) -> (Lang, Tier) {
    let bytes = auid.as_bytes();
    let lang = Lang::ALL[usize::from(bytes[0]) % Lang::ALL.len()];
    let tier = Tier::ALL[usize::from(bytes[1]) % Tier::ALL.len()];
    (lang, tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_is_deterministic_per_id() {
        let auid = Uuid::new_v4();
        assert_eq!(pick(auid), pick(auid));
    }

    #[test]
    fn pick_covers_all_tiers() {
        let mut seen = [false; 5];
        for _ in 0..256 {
            let (_, tier) = pick(Uuid::new_v4());
            seen[tier.index()] = true;
        }
        assert!(seen.iter().all(|&s| s), "tiers hit: {seen:?}");
    }
}
