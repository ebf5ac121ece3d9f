//! Boot asset cache.
//!
//! Assets given as URLs are downloaded once into `~/.talos/cache`, keyed by
//! the URL with `/` and `:` replaced by `-`. Local paths pass through.

use std::fmt;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use provision::BootAssets;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{CreateError, Result};
use crate::options::talos_dir;
use crate::retry::{with_retry_async, RetryConfig, Retryable};

/// Kind of boot asset. Initramfs archives are fetched as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Kernel,
    Initramfs,
    Iso,
    Usb,
    Uki,
    DiskImage,
    IpxeScript,
}

impl AssetKind {
    fn disables_archive(self) -> bool {
        self == Self::Initramfs
    }
}

/// Boot asset locations as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct AssetPaths {
    pub kernel: Option<String>,
    pub initramfs: Option<String>,
    pub iso: Option<String>,
    pub usb: Option<String>,
    pub uki: Option<String>,
    pub disk_image: Option<String>,
    pub ipxe_script: Option<String>,
}

/// Downloads and remembers remote boot assets.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
    client: reqwest::Client,
    retry: RetryConfig,
    show_progress: bool,
}

impl AssetCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            client: reqwest::Client::new(),
            retry: RetryConfig::default(),
            show_progress: true,
        }
    }

    /// `~/.talos/cache`.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        talos_dir().join("cache")
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve every set asset to a local path.
    ///
    /// # Errors
    /// Returns the first download failure.
    pub async fn resolve_all(&self, paths: &AssetPaths) -> Result<BootAssets> {
        let resolve = |path: &Option<String>, kind| {
            let path = path.clone();
            async move {
                match path.filter(|p| !p.is_empty()) {
                    Some(path) => self.resolve(&path, kind).await.map(Some),
                    None => Ok(None),
                }
            }
        };

        Ok(BootAssets {
            kernel: resolve(&paths.kernel, AssetKind::Kernel).await?,
            initramfs: resolve(&paths.initramfs, AssetKind::Initramfs).await?,
            iso: resolve(&paths.iso, AssetKind::Iso).await?,
            usb: resolve(&paths.usb, AssetKind::Usb).await?,
            uki: resolve(&paths.uki, AssetKind::Uki).await?,
            disk_image: resolve(&paths.disk_image, AssetKind::DiskImage).await?,
            ipxe_script: resolve(&paths.ipxe_script, AssetKind::IpxeScript).await?,
        })
    }

    /// Local path of `location`, downloading it first if it is an uncached URL.
    ///
    /// # Errors
    /// Returns [`CreateError::AssetDownload`] when the download fails for good.
    pub async fn resolve(&self, location: &str, kind: AssetKind) -> Result<PathBuf> {
        let Some(url) = parse_remote(location) else {
            return Ok(PathBuf::from(location));
        };

        let dest = self.dir.join(cache_key(location));
        if dest.exists() {
            debug!(path = %dest.display(), "Using cached asset");
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let mut url = url;
        if kind.disables_archive() {
            url.query_pairs_mut().append_pair("archive", "false");
        }

        info!(url = %url, "Downloading boot asset");

        let tmp = partial_path(&dest);
        let result = with_retry_async(&self.retry, "download", || self.download(&url, &tmp)).await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CreateError::AssetDownload {
                url: location.to_string(),
                message: e.to_string(),
            });
        }

        tokio::fs::rename(&tmp, &dest).await?;
        info!(path = %dest.display(), "Boot asset cached");

        Ok(dest)
    }

    async fn download(&self, url: &Url, path: &Path) -> std::result::Result<(), DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                DownloadError::Transient(message)
            } else {
                DownloadError::Permanent(message)
            });
        }

        let pb = self.progress_bar(response.content_length().unwrap_or(0));

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DownloadError::Permanent(format!("{}: {e}", path.display())))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Transient(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::Permanent(e.to_string()))?;
            pb.inc(chunk.len() as u64);
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::Permanent(e.to_string()))?;
        pb.finish_and_clear();

        Ok(())
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
            return pb;
        }
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Download target next to `dest`; the full file name is kept since cache
/// keys carry dots from host names.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Cache file name of a URL.
#[must_use]
pub fn cache_key(url: &str) -> String {
    url.replace(['/', ':'], "-")
}

fn parse_remote(location: &str) -> Option<Url> {
    Url::parse(location)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

#[derive(Debug)]
enum DownloadError {
    Transient(String),
    Permanent(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(message) | Self::Permanent(message) => f.write_str(message),
        }
    }
}

impl Retryable for DownloadError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
