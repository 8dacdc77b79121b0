//! Remote package fetchers.
//!
//! A fetcher downloads a whole package (repository root or bucket prefix)
//! into a destination directory. Subdirectory selection happens afterwards,
//! so one download serves every module that lives in the same package.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{FetchError, Result};

/// Downloads remote packages.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Returns true if this fetcher understands the package address.
    fn handles(&self, package: &str) -> bool;

    /// Downloads the package into `dest`, which must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    async fn fetch(&self, package: &str, dest: &Path) -> Result<()>;

    /// Returns the fetcher name for logging.
    fn name(&self) -> &'static str;
}

/// Fetches git repositories with a shallow `git clone`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitFetcher;

/// Fetches every object below an `s3://bucket/prefix` address.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3Fetcher;

/// Ordered set of fetchers; the first that handles an address wins.
#[derive(Clone)]
pub struct FetcherRegistry {
    fetchers: Vec<Arc<dyn SourceFetcher>>,
}

/// A git address split into clone URL and optional ref.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GitAddress {
    url: String,
    reference: Option<String>,
}

fn parse_git_address(package: &str) -> GitAddress {
    let (base, query) = package.split_once('?').unwrap_or((package, ""));
    let reference = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("ref="))
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let base = base.strip_prefix("git::").unwrap_or(base);
    let url = if let Some(rest) = base.strip_prefix("github.com/") {
        format!("https://github.com/{rest}")
    } else if let Some(rest) = base.strip_prefix("gitlab.com/") {
        format!("https://gitlab.com/{rest}")
    } else {
        base.to_string()
    };

    GitAddress { url, reference }
}

/// Bucket and key prefix of an S3 package.
#[derive(Debug, Clone, PartialEq, Eq)]
struct S3Address {
    bucket: String,
    prefix: String,
}

/// Accepts `s3://bucket/prefix`, `s3::bucket/prefix` and the forced
/// `s3::https://` forms, both path-style (`s3.amazonaws.com/bucket/...`,
/// `s3-<region>.amazonaws.com/bucket/...`) and virtual-hosted
/// (`bucket.s3.<region>.amazonaws.com/...`).
fn parse_s3_address(package: &str) -> std::result::Result<S3Address, FetchError> {
    let unsupported = || FetchError::UnsupportedSource {
        address: package.to_string(),
    };
    let address = package.split('?').next().unwrap_or_default();
    let address = address.strip_prefix("s3::").unwrap_or(address);

    let (bucket, prefix) = if let Some(rest) = address.strip_prefix("s3://") {
        rest.split_once('/').unwrap_or((rest, ""))
    } else if let Some(rest) = address
        .strip_prefix("https://")
        .or_else(|| address.strip_prefix("http://"))
    {
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if !host.ends_with(".amazonaws.com") {
            return Err(unsupported());
        }
        if host.starts_with("s3.") || host.starts_with("s3-") {
            path.split_once('/').unwrap_or((path, ""))
        } else {
            let bucket = host.find(".s3").map(|i| &host[..i]).ok_or_else(unsupported)?;
            (bucket, path)
        }
    } else {
        address.split_once('/').unwrap_or((address, ""))
    };

    if bucket.is_empty() || bucket.contains(':') {
        return Err(unsupported());
    }
    let prefix = if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    };
    Ok(S3Address {
        bucket: bucket.to_string(),
        prefix,
    })
}

/// Abbreviated or full hexadecimal commit ids.
fn looks_like_commit(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

async fn run_git<const N: usize>(args: [&OsStr; N]) -> Result<()> {
    let rendered = format!(
        "git {}",
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| FetchError::io(format!("failed to run `{rendered}`"), e))?;

    if !output.status.success() {
        return Err(FetchError::CommandFailed {
            command: rendered,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    fn handles(&self, package: &str) -> bool {
        package.starts_with("git::")
            || package.starts_with("git@")
            || package.starts_with("github.com/")
            || package.starts_with("gitlab.com/")
    }

    async fn fetch(&self, package: &str, dest: &Path) -> Result<()> {
        let address = parse_git_address(package);
        info!("Cloning {}", address.url);

        match &address.reference {
            // A commit cannot be passed to `--branch`, so clone the history
            // and check the commit out.
            Some(reference) if looks_like_commit(reference) => {
                debug!("Ref {reference} looks like a commit, cloning full history");
                run_git([OsStr::new("clone"), OsStr::new("--quiet"), OsStr::new(&address.url), dest.as_os_str()])
                    .await?;
                run_git([
                    OsStr::new("-C"),
                    dest.as_os_str(),
                    OsStr::new("checkout"),
                    OsStr::new("--quiet"),
                    OsStr::new(reference),
                ])
                .await
            }
            Some(reference) => {
                run_git([
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    OsStr::new("--depth"),
                    OsStr::new("1"),
                    OsStr::new("--branch"),
                    OsStr::new(reference),
                    OsStr::new(&address.url),
                    dest.as_os_str(),
                ])
                .await
            }
            None => {
                run_git([
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    OsStr::new("--depth"),
                    OsStr::new("1"),
                    OsStr::new(&address.url),
                    dest.as_os_str(),
                ])
                .await
            }
        }
    }

    fn name(&self) -> &'static str {
        "git"
    }
}

#[async_trait]
impl SourceFetcher for S3Fetcher {
    fn handles(&self, package: &str) -> bool {
        package.starts_with("s3://") || package.starts_with("s3::")
    }

    async fn fetch(&self, package: &str, dest: &Path) -> Result<()> {
        let S3Address { bucket, prefix } = parse_s3_address(package)?;
        let bucket = bucket.as_str();

        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);

        let mut continuation: Option<String> = None;
        let mut count = 0usize;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| FetchError::s3(format!("Failed to list s3://{bucket}/{prefix}: {e}")))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let relative = key.strip_prefix(prefix.as_str()).unwrap_or(key);
                if relative.is_empty() || relative.ends_with('/') {
                    continue;
                }
                download_object(&client, bucket, key, &dest.join(relative)).await?;
                count += 1;
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        if count == 0 {
            return Err(FetchError::s3(format!("no objects found under s3://{bucket}/{prefix}")).into());
        }
        debug!("Downloaded {count} objects from s3://{bucket}/{prefix}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

async fn download_object(client: &Client, bucket: &str, key: &str, target: &Path) -> Result<()> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| FetchError::s3(format!("Failed to get s3://{bucket}/{key}: {e}")))?;

    let bytes = response
        .body
        .collect()
        .await
        .map_err(|e| FetchError::s3(format!("Failed to read S3 object {key}: {e}")))?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::io(format!("failed to create {}", parent.display()), e))?;
    }
    tokio::fs::write(target, bytes.into_bytes())
        .await
        .map_err(|e| FetchError::io(format!("failed to write {}", target.display()), e))?;
    Ok(())
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new(vec![Arc::new(GitFetcher), Arc::new(S3Fetcher)])
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.fetchers.iter().map(|f| f.name()).collect();
        f.debug_struct("FetcherRegistry").field("fetchers", &names).finish()
    }
}

impl FetcherRegistry {
    /// Creates a registry from an ordered list of fetchers.
    #[must_use]
    pub fn new(fetchers: Vec<Arc<dyn SourceFetcher>>) -> Self {
        Self { fetchers }
    }

    /// Downloads a package with the first fetcher that handles it.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::UnsupportedSource`] if no fetcher matches, or the
    /// fetcher's own error.
    pub async fn fetch(&self, package: &str, dest: &Path) -> Result<()> {
        let fetcher = self
            .fetchers
            .iter()
            .find(|f| f.handles(package))
            .ok_or_else(|| FetchError::UnsupportedSource {
                address: package.to_string(),
            })?;
        debug!("Fetching {package} with the {} fetcher", fetcher.name());
        fetcher.fetch(package, dest).await
    }
}
