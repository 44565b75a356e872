use crate::errors::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TARGET_URL: &str =
    "https://m.cafe.naver.com/ca-fe/web/cafes/ronaronakr/articles/2476?useCafeId=false";

#[derive(Debug, Clone)]
pub struct Config {
    pub sheet_id: String,
    pub sheet_index: usize,
    pub sheet_title_prefix: String,
    pub client_email: String,
    pub private_key: String,
    pub telegram_token: String,
    pub chat_id: String,
    pub user_data_dir: PathBuf,
    pub webdriver_url: String,
    pub target_url: String,
    pub run_tag: String,
    pub render_wait: Duration,
    pub run_deadline: Duration,
    pub database_url: String,
    pub run_on_start: bool,
}

impl Config {
    // Read everything from the process environment (call dotenvy first)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        // USRE_DATA_DIR is the misspelt name older deployments still set
        let user_data_dir = get("USER_DATA_DIR")
            .or_else(|| get("USRE_DATA_DIR"))
            .ok_or(ConfigError::Missing("USER_DATA_DIR"))?;

        Ok(Self {
            sheet_id: required("SHEET_ID")?,
            sheet_index: parse_or(get("SHEET_INDEX"), "SHEET_INDEX", 1)?,
            sheet_title_prefix: get("SHEET_TITLE_PREFIX")
                .unwrap_or_else(|| "로나 유니버스 득표 결과".to_string()),
            client_email: required("CLIENT_EMAIL")?,
            private_key: unescape_key(&required("PRIVATE_KEY")?),
            telegram_token: required("TELEGRAM_BOT_TOKEN")?,
            chat_id: required("CHAT_ID")?,
            user_data_dir: PathBuf::from(user_data_dir),
            webdriver_url: get("WEBDRIVER_URL").unwrap_or_else(|| "http://localhost:9515".to_string()),
            target_url: get("TARGET_URL").unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
            run_tag: get("RUN_TAG").unwrap_or_else(|| "[lona crawler]".to_string()),
            render_wait: Duration::from_millis(parse_or(get("RENDER_WAIT_MS"), "RENDER_WAIT_MS", 3000)?),
            run_deadline: Duration::from_secs(parse_or(get("RUN_DEADLINE_SECS"), "RUN_DEADLINE_SECS", 600)?),
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:poll_tally.db".to_string()),
            run_on_start: parse_or(get("RUN_ON_START"), "RUN_ON_START", false)?,
        })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

// Keys pasted into .env files usually carry literal "\n" instead of newlines
fn unescape_key(key: &str) -> String {
    key.replace("\\n", "\n")
}
