//! Job domain types: sample languages, quality tiers, row projections, and
//! the status classification shared by the query handlers and the scheduler.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sample language of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Ru,
}

impl Lang {
    pub const ALL: [Lang; 2] = [Lang::En, Lang::Ru];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ru => "ru",
        }
    }

    /// Parse the two-letter code stored in the `lang` column.
    pub fn parse(s: &str) -> Option<Lang> {
        match s {
            "en" => Some(Lang::En),
            "ru" => Some(Lang::Ru),
            _ => None,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality tier of the speech model. Higher tiers are slower and more
/// accurate; the tier also selects the model binary (`<tier>.bin`) and the
/// per-byte cost coefficient used for budget estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Lev0,
    Lev1,
    Lev2,
    Lev3,
    Lev4,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Lev0, Tier::Lev1, Tier::Lev2, Tier::Lev3, Tier::Lev4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Lev0 => "lev0",
            Tier::Lev1 => "lev1",
            Tier::Lev2 => "lev2",
            Tier::Lev3 => "lev3",
            Tier::Lev4 => "lev4",
        }
    }

    /// Parse the four-character code stored in the `model` column.
    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "lev0" => Some(Tier::Lev0),
            "lev1" => Some(Tier::Lev1),
            "lev2" => Some(Tier::Lev2),
            "lev3" => Some(Tier::Lev3),
            "lev4" => Some(Tier::Lev4),
            _ => None,
        }
    }

    /// Index into the coefficient table.
    pub fn index(&self) -> usize {
        match self {
            Tier::Lev0 => 0,
            Tier::Lev1 => 1,
            Tier::Lev2 => 2,
            Tier::Lev3 => 3,
            Tier::Lev4 => 4,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row awaiting dispatch (`processing IS NULL`), ordered by `loaded`.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub auid: Uuid,
    pub lang: Lang,
    pub tier: Tier,
    pub loaded: NaiveDateTime,
}

/// Row with `processing` set and no terminal timestamp.
#[derive(Debug, Clone)]
pub struct InFlightJob {
    pub auid: Uuid,
    pub lang: Lang,
    pub tier: Tier,
    pub loaded: NaiveDateTime,
    pub processing: NaiveDateTime,
    pub attempt: i16,
}

/// Single-row projection served by `GET /<auid>`.
#[derive(Debug, Clone)]
pub struct JobDetail {
    pub loaded: NaiveDateTime,
    pub processing: Option<NaiveDateTime>,
    pub failed: Option<NaiveDateTime>,
    pub log: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Row projection for the recent-jobs listing.
#[derive(Debug, Clone)]
pub struct RecentJob {
    pub auid: Uuid,
    pub loaded: NaiveDateTime,
    pub processing: Option<NaiveDateTime>,
    pub failed: Option<NaiveDateTime>,
    pub success: Option<NaiveDateTime>,
}

impl RecentJob {
    pub fn status(&self) -> Status {
        Status::classify(self.processing, self.failed, self.success)
    }
}

/// Lifecycle state derived from the nullable timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loaded,
    Processing,
    Failed,
    Success,
}

impl Status {
    /// Classify by timestamp priority: success > failed > processing > loaded.
    pub fn classify(
        processing: Option<NaiveDateTime>,
        failed: Option<NaiveDateTime>,
        success: Option<NaiveDateTime>,
    ) -> Status {
        if success.is_some() {
            Status::Success
        } else if failed.is_some() {
            Status::Failed
        } else if processing.is_some() {
            Status::Processing
        } else {
            Status::Loaded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Loaded => "loaded",
            Status::Processing => "processing",
            Status::Failed => "failed",
            Status::Success => "success",
        }
    }
}
