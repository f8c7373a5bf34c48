//! Install media resolution: local path, `file://` or `http(s)://` download,
//! with optional SHA-256 verification.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use url::Url;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::paths::BuilderPaths;
use crate::pipeline::{Step, StepAction};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Checksum {
    None,
    Sha256(String),
}

impl Checksum {
    fn parse(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "none" {
            return Ok(Self::None);
        }
        match s.split_once(':') {
            Some(("sha256", hex)) => Ok(Self::Sha256(hex.to_ascii_lowercase())),
            _ => bail!("unsupported checksum '{s}'"),
        }
    }

    fn verify(&self, actual: &str, path: &Path) -> anyhow::Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Sha256(expected) if expected == actual => Ok(()),
            Self::Sha256(expected) => bail!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            ),
        }
    }
}

pub struct DownloadIso {
    paths: Option<BuilderPaths>,
}

impl DownloadIso {
    pub fn new(paths: Option<BuilderPaths>) -> Self {
        Self { paths }
    }

    async fn resolve(&self, ctx: &BuildContext) -> anyhow::Result<PathBuf> {
        let iso = &ctx.config.iso;
        let checksum = Checksum::parse(&iso.checksum)?;

        let url = match Url::parse(&iso.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => url,
            // Anything else is a plain local path.
            _ => {
                let path = PathBuf::from(&iso.url);
                verify_local(&path, &checksum).await?;
                return Ok(path);
            }
        };

        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("invalid file URL {url}"))?;
            verify_local(&path, &checksum).await?;
            return Ok(path);
        }

        let target = match (&iso.target_path, &self.paths) {
            (Some(p), _) => p.clone(),
            (None, Some(paths)) => paths.iso_cache_file(&url),
            (None, None) => bail!("no iso.target_path set and no cache directory available"),
        };

        if target.is_file() && checksum != Checksum::None {
            if let Ok(actual) = sha256_file(&target).await {
                if checksum.verify(&actual, &target).is_ok() {
                    info!(path = %target.display(), "using cached install media");
                    return Ok(target);
                }
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(%url, path = %target.display(), "downloading install media");

        let part = target.with_extension("part");
        let result = tokio::select! {
            r = download(&url, &part) => r,
            _ = ctx.cancel.cancelled() => Err(BuildError::Cancelled.into()),
        };
        let actual = match result {
            Ok(actual) => actual,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };
        if let Err(e) = checksum.verify(&actual, &target) {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, &target).await?;
        Ok(target)
    }
}

async fn verify_local(path: &Path, checksum: &Checksum) -> anyhow::Result<()> {
    if !path.is_file() {
        bail!("install media {} does not exist", path.display());
    }
    if *checksum != Checksum::None {
        let actual = sha256_file(path).await?;
        checksum.verify(&actual, path)?;
    }
    Ok(())
}

async fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stream `url` into `dest`, returning the SHA-256 of what was written.
async fn download(url: &Url, dest: &Path) -> anyhow::Result<String> {
    let resp = reqwest::get(url.clone())
        .await
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("reading {url}"))?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl Step for DownloadIso {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        match self.resolve(ctx).await {
            Ok(path) => {
                info!(path = %path.display(), "install media ready");
                ctx.iso_path = Some(path);
                StepAction::Continue
            }
            Err(e) => ctx.fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_parsing() {
        assert_eq!(Checksum::parse("none").unwrap(), Checksum::None);
        assert_eq!(
            Checksum::parse("sha256:ABCD").unwrap(),
            Checksum::Sha256("abcd".to_string())
        );
        assert!(Checksum::parse("md5:abcd").is_err());
    }

    #[tokio::test]
    async fn local_file_hash_is_verified() {
        let tmp = tempfile::tempdir().unwrap();
        let iso = tmp.path().join("install.iso");
        std::fs::write(&iso, b"abc").unwrap();

        // SHA-256("abc")
        let good = Checksum::Sha256(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string(),
        );
        verify_local(&iso, &good).await.expect("matching checksum");

        let bad = Checksum::Sha256("00".repeat(32));
        let err = verify_local(&iso, &bad).await.unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_local_media_is_an_error() {
        let err = verify_local(Path::new("/nonexistent/install.iso"), &Checksum::None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
