//! Byte transfer for a single leaf.
//!
//! A transfer streams one source into one destination file and checks the
//! cancellation token at every chunk boundary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("offline-sync/", env!("CARGO_PKG_VERSION"));

/// One file to fetch.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub block_id: String,
    pub source_url: String,
    pub dest: PathBuf,
}

/// Fetches bytes for one leaf.
///
/// `progress` receives the running byte count after each chunk.
/// Implementations must return [`Error::CancelledByUser`] once `cancel` fires,
/// checking it between chunks and not only before the first one.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64>;
}

/// Streams `http(s)` sources with `reqwest` and copies `file://` sources from disk.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    chunk_size: usize,
}

impl HttpTransfer {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size,
        })
    }

    async fn fetch_http(
        &self,
        request: &TransferRequest,
        file: &mut File,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        let response = self
            .client
            .get(&request.source_url)
            .header(header::ACCEPT, "*/*")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::transfer(
                &request.block_id,
                format!("HTTP {}", response.status()),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::CancelledByUser),
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk
                .map_err(|e| Error::transfer(&request.block_id, format!("Stream error: {}", e)))?;

            if cancel.is_cancelled() {
                return Err(Error::CancelledByUser);
            }

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded);
        }

        Ok(downloaded)
    }

    async fn fetch_local(
        &self,
        source: &Path,
        file: &mut File,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        let mut input = File::open(source).await?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut copied: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::CancelledByUser);
            }

            let read = input.read(&mut buffer).await?;
            if read == 0 {
                break;
            }

            file.write_all(&buffer[..read]).await?;
            copied += read as u64;
            progress(copied);
        }

        Ok(copied)
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64> {
        let url = url::Url::parse(&request.source_url)?;

        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&request.dest).await?;

        let written = match url.scheme() {
            "http" | "https" => self.fetch_http(request, &mut file, cancel, progress).await?,
            "file" => {
                let source = url.to_file_path().map_err(|_| {
                    Error::transfer(&request.block_id, "file URL has no local path")
                })?;
                self.fetch_local(&source, &mut file, cancel, progress).await?
            }
            other => {
                return Err(Error::transfer(
                    &request.block_id,
                    format!("unsupported URL scheme '{}'", other),
                ))
            }
        };

        file.flush().await?;
        Ok(written)
    }
}
