//! Row sources: where spreadsheet rows come from.
//!
//! Every source yields [`RawRow`]s built the same way: the first row holds
//! the headers, later rows are matched to them by position, and short rows
//! are padded with empty cells.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::SheetConfig;
use crate::record::RawRow;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

/// A source of spreadsheet rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;
    /// Fetch all data rows, keyed by header.
    async fn fetch_rows(&self) -> Result<Vec<RawRow>>;
}

/// Turn a header row plus data rows into header-keyed maps.
///
/// Cells beyond the header row's width are dropped; columns with a blank
/// header are ignored.
pub fn rows_from_values(values: Vec<Vec<String>>) -> Vec<RawRow> {
    let mut rows = values.into_iter();
    let Some(headers) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

    rows.map(|row| {
        headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect()
    })
    .collect()
}

/// `values.get` response body.
#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Accepted shapes of a local rows file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowsFile {
    Values(ValuesResponse),
    Bare(Vec<Vec<serde_json::Value>>),
}

fn cell_text(cell: serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn stringify(values: Vec<Vec<serde_json::Value>>) -> Vec<Vec<String>> {
    values
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect()
}

/// Rows exported to a JSON file, either as a Sheets `values` response
/// (`{"values": [[...], ...]}`) or as a bare array of rows.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RowSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read rows file {}", self.path.display()))?;
        let parsed: RowsFile = serde_json::from_str(&contents).context("Failed to parse rows file")?;
        let values = match parsed {
            RowsFile::Values(resp) => resp.values,
            RowsFile::Bare(values) => values,
        };
        Ok(rows_from_values(stringify(values)))
    }
}

/// Google Sheets `values.get` with an API key.
pub struct GoogleSheetSource {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    api_key: String,
}

impl GoogleSheetSource {
    pub fn new(config: &SheetConfig, timeout: Duration) -> Result<Self> {
        if config.spreadsheet_id.trim().is_empty() {
            bail!("No spreadsheet configured (set sheet.spreadsheet_id or SPREADSHEET_ID)");
        }
        if config.api_key.trim().is_empty() {
            bail!("No Google Sheets API key configured (set sheet.api_key or GOOGLE_SHEETS_API_KEY)");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: config.spreadsheet_id.trim().to_string(),
            range: config.range.clone(),
            api_key: config.api_key.trim().to_string(),
        })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            urlencoding::encode(&self.spreadsheet_id),
            urlencoding::encode(&self.range)
        )
    }
}

#[async_trait]
impl RowSource for GoogleSheetSource {
    fn describe(&self) -> String {
        format!("spreadsheet {} ({})", self.spreadsheet_id, self.range)
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>> {
        let resp = self
            .http
            .get(self.values_url())
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .context("Failed to reach Google Sheets")?;
        let resp = ensure_success(resp).await?;
        let body = resp
            .json::<ValuesResponse>()
            .await
            .context("Failed to parse Google Sheets response")?;
        Ok(rows_from_values(stringify(body.values)))
    }
}

/// Convert non-2xx responses into a structured error.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!("HTTP status {status} error: {body}"))
}
