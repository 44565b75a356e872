use std::time::Duration;
use thiserror::Error;

// Fatal: the page had nothing usable on it
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("fetch Error: no poll items found on the page")]
    NoItems,
    #[error("poll item {index} has no {part} element")]
    MissingPart { index: usize, part: &'static str },
    #[error("poll item {index} has an empty label")]
    EmptyName { index: usize },
    #[error("vote count {text:?} for {name:?} is not a number")]
    BadCount { name: String, text: String },
}

// Fatal: spreadsheet read or write failed
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("spreadsheet auth failed: {0}")]
    Auth(String),
    #[error("spreadsheet request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("spreadsheet API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("sheet index {0} does not exist in the document")]
    NoSuchSheet(usize),
    #[error("spreadsheet API returned a malformed {0}")]
    Malformed(String),
}

// Fatal: browser session could not be created or driven
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("webdriver request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webdriver error {kind}: {message}")]
    WebDriver { kind: String, message: String },
    #[error("webdriver response missing {0}")]
    Malformed(&'static str),
    #[error("session start aborted: {0}")]
    Aborted(String),
}

// Logged only, never escalated
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("bot request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bot API rejected message: {0}")]
    Rejected(String),
}

// Logged only, never escalated
#[derive(Debug, Error)]
#[error("session teardown failed: {0}")]
pub struct TeardownError(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Error)]
#[error("run journal error: {0}")]
pub struct JournalError(#[from] pub sqlx::Error);

/// Anything that aborts a run and routes it to the failure notification.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("run exceeded its {0:?} deadline")]
    Deadline(Duration),
}
