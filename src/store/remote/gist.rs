use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::ObjectTransport;
use crate::errors::BackendError;

const USER_AGENT: &str = concat!("tokenstore/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";

/// One named file inside a gist-style document.
pub struct GistTransport {
    client: reqwest::Client,
    url: String,
    token: String,
    gist_id: String,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct GistDocument {
    #[serde(default)]
    files: HashMap<String, Option<GistFile>>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

impl GistTransport {
    pub fn new(
        api_base: &str,
        token: &str,
        gist_id: &str,
        file_name: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/gists/{}", api_base.trim_end_matches('/'), gist_id),
            token: token.to_string(),
            gist_id: gist_id.to_string(),
            file_name: file_name.to_string(),
        })
    }

    /// Whether `raw_url` is served by the same origin as the API, and so may
    /// receive the API token.
    fn same_origin(&self, raw_url: &str) -> bool {
        match (Url::parse(&self.url), Url::parse(raw_url)) {
            (Ok(api), Ok(raw)) => api.origin() == raw.origin(),
            _ => false,
        }
    }

    async fn fetch_raw(&self, raw_url: &str) -> Result<String, BackendError> {
        let mut req = self.client.get(raw_url);
        if self.same_origin(raw_url) {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        } else {
            tracing::debug!(gist = %self.gist_id, "fetching raw gist content without credentials");
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::status(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl ObjectTransport for GistTransport {
    fn describe(&self) -> String {
        format!("gist:{}/{}", self.gist_id, self.file_name)
    }

    async fn fetch(&self) -> Result<Option<String>, BackendError> {
        let resp = self
            .client
            .get(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(gist = %self.gist_id, "gist not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::status(status.as_u16(), &body));
        }

        let doc: GistDocument = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(format!("gist response: {}", e)))?;

        let Some(file) = doc.files.get(&self.file_name).and_then(Option::as_ref) else {
            return Ok(None);
        };

        // Large files are cut off in the API response and must be fetched raw.
        if file.truncated {
            let raw_url = file.raw_url.as_deref().ok_or_else(|| {
                BackendError::Malformed("truncated gist file without raw_url".into())
            })?;
            return self.fetch_raw(raw_url).await.map(Some);
        }

        Ok(file.content.clone())
    }

    async fn put(&self, contents: String) -> Result<(), BackendError> {
        let mut files = serde_json::Map::new();
        files.insert(
            self.file_name.clone(),
            serde_json::json!({ "content": contents }),
        );
        let body = serde_json::json!({ "files": files });

        let resp = self
            .client
            .patch(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::status(status.as_u16(), &body));
        }
        Ok(())
    }
}
