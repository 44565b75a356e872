use serde::{Deserialize, Serialize};

// One poll item as read off the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEntry {
    pub name: String,
    pub vote_count: u64,
}

impl PollEntry {
    pub fn new(name: impl Into<String>, vote_count: u64) -> Self {
        Self {
            name: name.into(),
            vote_count,
        }
    }
}

// A poll entry after ranking against the previous run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub vote_count: u64,
    pub previous_rank: Option<u32>,
    pub current_rank: u32,
    /// `previous_rank - current_rank`; positive means the entry climbed.
    pub rank_delta: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success(Vec<RankedEntry>),
    Failure(String),
    // Another run still held the lock; nothing was attempted
    Skipped,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success(_) => "success",
            RunOutcome::Failure(_) => "failure",
            RunOutcome::Skipped => "skipped",
        }
    }
}
