//! Atomic report storage + HTTP fetch utilities for sift.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sift-storage";

#[derive(Debug, Clone)]
pub struct StoredReport {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    /// The file already held identical bytes and was left untouched.
    pub unchanged: bool,
}

/// Output directory for generated reports. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Write `bytes` to `relative_path` under the root, replacing any previous content.
    pub async fn write_atomic(
        &self,
        relative_path: impl AsRef<Path>,
        bytes: &[u8],
    ) -> anyhow::Result<StoredReport> {
        let relative_path = relative_path.as_ref().to_path_buf();
        if relative_path.as_os_str().is_empty()
            || !relative_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("report path {} must be a plain relative path", relative_path.display());
        }

        let content_hash = Self::sha256_hex(bytes);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating report directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking report path {}", absolute_path.display()))?
        {
            let existing = fs::read(&absolute_path)
                .await
                .with_context(|| format!("reading existing report {}", absolute_path.display()))?;
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(StoredReport {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    unchanged: true,
                });
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp report file {}", temp_path.display()))?;
        fill_temp_file(file, &temp_path, bytes).await?;

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp report {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredReport {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            unchanged: false,
        })
    }

    /// Names of regular files directly under the root matching `prefix*.extension`.
    pub async fn list_files(&self, prefix: &str, extension: &str) -> anyhow::Result<Vec<String>> {
        if !fs::try_exists(&self.root)
            .await
            .with_context(|| format!("checking {}", self.root.display()))?
        {
            return Ok(Vec::new());
        }
        let suffix = format!(".{}", extension.trim_start_matches('.'));
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let is_file = entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            if is_file && name.starts_with(prefix) && name.ends_with(&suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Writes `bytes` through `writer`; a failed write removes the partial temp file.
async fn fill_temp_file<W: AsyncWrite + Unpin>(
    mut writer: W,
    temp_path: &Path,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    drop(writer);
    if let Err(err) = written {
        let _ = fs::remove_file(temp_path).await;
        return Err(err).with_context(|| format!("writing temp report file {}", temp_path.display()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote refused the credential (HTTP 403).
    Forbidden,
    Transport,
}

pub fn classify_status(status: StatusCode) -> FailureKind {
    if status == StatusCode::FORBIDDEN {
        FailureKind::Forbidden
    } else {
        FailureKind::Transport
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid request header `{0}`")]
    InvalidHeader(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(FailureKind::Transport),
            FetchError::Request { .. } | FetchError::InvalidHeader(_) => FailureKind::Transport,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.kind() == FailureKind::Forbidden
    }
}

/// Single-shot HTTP client. No retries: a failed call is reported to the caller as is.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let request = self.client.get(url);
        Self::execute(request, url)
            .instrument(info_span!("http_fetch", method = "GET", url))
            .await
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<FetchedResponse, FetchError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader((*name).to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader(name.as_str().to_string()))?;
            header_map.insert(name, value);
        }
        let request = self.client.post(url).headers(header_map).json(body);
        Self::execute(request, url)
            .instrument(info_span!("http_fetch", method = "POST", url))
            .await
    }

    async fn execute(
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let resp = request.send().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: final_url.clone(),
                source,
            })?
            .to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
