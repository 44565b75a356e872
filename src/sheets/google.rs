use super::{SpreadsheetClient, ValueRange};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

/// Sheets REST v4 client authenticated as a service account.
/// The document must be shared with the account's email.
pub struct GoogleSheetsClient {
    http: Client,
    auth: DefaultAuthenticator,
    spreadsheet_id: String,
}

impl GoogleSheetsClient {
    pub async fn new(
        client_email: &str,
        private_key: &str,
        spreadsheet_id: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let key: ServiceAccountKey = serde_json::from_value(json!({
            "type": "service_account",
            "client_email": client_email,
            "private_key": private_key,
            "token_uri": TOKEN_URI,
        }))
        .map_err(|e| PersistenceError::Auth(format!("invalid service account key: {}", e)))?;

        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| PersistenceError::Auth(e.to_string()))?;

        Ok(Self {
            http: Client::new(),
            auth,
            spreadsheet_id: spreadsheet_id.into(),
        })
    }

    async fn bearer(&self) -> Result<String, PersistenceError> {
        let token = self
            .auth
            .token(SCOPES)
            .await
            .map_err(|e| PersistenceError::Auth(e.to_string()))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| PersistenceError::Auth("empty access token".to_string()))
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{}", API_BASE, self.spreadsheet_id, suffix)
    }
}

#[async_trait]
impl SpreadsheetClient for GoogleSheetsClient {
    async fn sheet_title(&self, index: usize) -> Result<String, PersistenceError> {
        let response = self
            .http
            .get(self.url(""))
            .query(&[("fields", "sheets.properties.title")])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let body = check(response).await?;

        body["sheets"]
            .get(index)
            .and_then(|sheet| sheet["properties"]["title"].as_str())
            .map(str::to_string)
            .ok_or(PersistenceError::NoSuchSheet(index))
    }

    async fn read_range(&self, range: &str) -> Result<Vec<Vec<Value>>, PersistenceError> {
        debug!("Reading range {}", range);
        let response = self
            .http
            .get(self.url("/values:batchGet"))
            .query(&[
                ("ranges", range),
                ("majorDimension", "ROWS"),
                ("valueRenderOption", "UNFORMATTED_VALUE"),
            ])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        rows_from_batch_get(check(response).await?)
    }

    async fn set_document_title(&self, title: &str) -> Result<(), PersistenceError> {
        let response = self
            .http
            .post(self.url(":batchUpdate"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({
                "requests": [{
                    "updateSpreadsheetProperties": {
                        "properties": { "title": title },
                        "fields": "title",
                    }
                }]
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn batch_write(&self, ranges: Vec<ValueRange>) -> Result<(), PersistenceError> {
        debug!("Flushing {} ranges", ranges.len());
        let response = self
            .http
            .post(self.url("/values:batchUpdate"))
            .bearer_auth(self.bearer().await?)
            .json(&json!({
                "valueInputOption": "RAW",
                "data": ranges,
            }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

// An empty range comes back without a `values` key at all; anything else
// that is not a grid is a broken reply, not an empty sheet.
fn rows_from_batch_get(mut body: Value) -> Result<Vec<Vec<Value>>, PersistenceError> {
    match body.pointer_mut("/valueRanges/0/values").map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(rows) => serde_json::from_value(rows)
            .map_err(|e| PersistenceError::Malformed(format!("values grid: {}", e))),
    }
}

async fn check(response: Response) -> Result<Value, PersistenceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PersistenceError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}
