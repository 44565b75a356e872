use crate::errors::{SessionError, TeardownError};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::path::PathBuf;

// Hands out browser sessions; one per run
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn start(&self) -> Result<Box<dyn BrowserSession>, SessionError>;
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;
    async fn page_source(&mut self) -> Result<String, SessionError>;
    async fn quit(&mut self) -> Result<(), TeardownError>;
}

/// Chrome driven through a chromedriver W3C WebDriver endpoint.
pub struct WebDriverProvider {
    http: Client,
    endpoint: String,
    user_data_dir: PathBuf,
}

impl WebDriverProvider {
    pub fn new(endpoint: impl Into<String>, user_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            user_data_dir: user_data_dir.into(),
        }
    }

    // Headless chrome with a persistent profile so the forum login survives between runs
    fn capabilities(&self) -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless",
                            format!("user-data-dir={}", self.user_data_dir.display()),
                        ]
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SessionProvider for WebDriverProvider {
    async fn start(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
        let value = send(
            self.http
                .post(format!("{}/session", self.endpoint))
                .json(&self.capabilities()),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or(SessionError::Malformed("sessionId"))?
            .to_string();
        info!("Started browser session {}", session_id);

        Ok(Box::new(WebDriverSession {
            http: self.http.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
            session_id,
        }))
    }
}

pub struct WebDriverSession {
    http: Client,
    base: String,
    session_id: String,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        debug!("Session {} navigating to {}", self.session_id, url);
        send(self.http.post(format!("{}/url", self.base)).json(&json!({ "url": url }))).await?;
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, SessionError> {
        let value = send(self.http.get(format!("{}/source", self.base))).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or(SessionError::Malformed("page source"))
    }

    async fn quit(&mut self) -> Result<(), TeardownError> {
        send(self.http.delete(&self.base))
            .await
            .map_err(|e| TeardownError(e.to_string()))?;
        info!("Closed browser session {}", self.session_id);
        Ok(())
    }
}

// Every WebDriver reply wraps its payload in `value`; errors carry `error` and `message` there.
async fn send(request: RequestBuilder) -> Result<Value, SessionError> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(SessionError::WebDriver {
            kind: value["error"].as_str().unwrap_or("unknown error").to_string(),
            message: value["message"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(value)
}
