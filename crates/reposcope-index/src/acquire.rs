//! Materialising a repository working tree: shallow git clone or an existing
//! local directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tempfile::TempDir;

use crate::error::{IndexError, Result};
use crate::repository::{display_name_from_url, normalize_source_url};
use crate::vector_index::BoxFuture;

const ALLOWED_SCHEMES: &[&str] = &["https", "http", "file"];
const REDACTED: &str = "[REDACTED]";

/// A working tree on disk. A temporary clone is removed when dropped.
#[derive(Debug)]
pub struct Checkout {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl Checkout {
    fn temporary(temp: TempDir, keep: bool) -> Self {
        if keep {
            Self {
                path: temp.keep(),
                temp: None,
            }
        } else {
            Self {
                path: temp.path().to_path_buf(),
                temp: Some(temp),
            }
        }
    }

    fn existing(path: PathBuf) -> Self {
        Self { path, temp: None }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the tree is deleted on drop.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// The tree's path if it outlives this run.
    #[must_use]
    pub fn lasting_path(&self) -> Option<&Path> {
        if self.is_temporary() {
            None
        } else {
            Some(&self.path)
        }
    }
}

/// Result of a successful acquisition.
#[derive(Debug)]
pub struct AcquiredSource {
    /// Normalised source URL used as repository identity.
    pub source_url: String,
    pub display_name: String,
    pub checkout: Checkout,
}

pub trait Acquire: Send + Sync {
    /// Materialise `url` locally. Nothing is persisted on failure.
    fn acquire(&self, url: &str, token: Option<&str>) -> BoxFuture<'_, Result<AcquiredSource>>;
}

/// Check that `url` parses and uses a supported scheme.
///
/// # Errors
///
/// Returns [`IndexError::Acquisition`] otherwise.
pub fn validate_source_url(url: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url.trim())
        .map_err(|e| IndexError::Acquisition(format!("invalid repository URL {url}: {e}")))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(IndexError::Acquisition(format!(
            "unsupported URL scheme {}: expected one of {}",
            parsed.scheme(),
            ALLOWED_SCHEMES.join(", ")
        )));
    }
    Ok(parsed)
}

/// Git clone settings.
#[derive(Debug, Clone)]
pub struct GitConfig {
    pub git_binary: String,
    /// Parent directory for per-run clone directories.
    pub work_dir: PathBuf,
    pub clone_depth: u32,
    pub keep_checkout: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            git_binary: "git".into(),
            work_dir: std::env::temp_dir().join("reposcope-repos"),
            clone_depth: 1,
            keep_checkout: false,
        }
    }
}

/// Shallow `git clone` into a fresh temporary directory per acquisition.
#[derive(Debug, Clone, Default)]
pub struct GitAcquirer {
    config: GitConfig,
}

impl GitAcquirer {
    #[must_use]
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    async fn clone_repo(&self, url: String, token: Option<String>) -> Result<AcquiredSource> {
        validate_source_url(&url)?;

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| {
                IndexError::Acquisition(format!(
                    "cannot create work dir {}: {e}",
                    self.config.work_dir.display()
                ))
            })?;
        let temp = tempfile::Builder::new()
            .prefix("reposcope-")
            .tempdir_in(&self.config.work_dir)
            .map_err(|e| IndexError::Acquisition(format!("cannot create clone dir: {e}")))?;

        let mut cmd = tokio::process::Command::new(&self.config.git_binary);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = token.as_deref() {
            cmd.arg("-c").arg(auth_header_config(token));
        }
        cmd.arg("clone")
            .arg("--depth")
            .arg(self.config.clone_depth.max(1).to_string())
            .arg("--single-branch")
            .arg("--no-tags")
            .arg("--quiet")
            .arg("--")
            .arg(url.trim())
            .arg(temp.path());

        tracing::info!(url = %url.trim(), depth = self.config.clone_depth, "cloning repository");
        let output = cmd.output().await.map_err(|e| {
            IndexError::Acquisition(format!("failed to run {}: {e}", self.config.git_binary))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = redact(stderr.trim(), token.as_deref());
            return Err(IndexError::Acquisition(format!(
                "git clone exited with {}: {stderr}",
                output.status
            )));
        }

        Ok(AcquiredSource {
            source_url: normalize_source_url(&url),
            display_name: display_name_from_url(&url),
            checkout: Checkout::temporary(temp, self.config.keep_checkout),
        })
    }
}

impl Acquire for GitAcquirer {
    fn acquire(&self, url: &str, token: Option<&str>) -> BoxFuture<'_, Result<AcquiredSource>> {
        let url = url.to_owned();
        let token = token.filter(|t| !t.is_empty()).map(str::to_owned);
        Box::pin(self.clone_repo(url, token))
    }
}

/// `git -c` value passing the token as an HTTP header instead of in the URL.
fn auth_header_config(token: &str) -> String {
    let basic = BASE64.encode(format!("x-access-token:{token}"));
    format!("http.extraHeader=Authorization: Basic {basic}")
}

fn redact(text: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return text.to_string();
    };
    let basic = BASE64.encode(format!("x-access-token:{token}"));
    text.replace(&basic, REDACTED).replace(token, REDACTED)
}

/// Index a directory already on disk in place. Nothing is cleaned up.
#[derive(Debug, Clone)]
pub struct LocalAcquirer {
    root: PathBuf,
}

impl LocalAcquirer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Acquire for LocalAcquirer {
    fn acquire(&self, url: &str, _token: Option<&str>) -> BoxFuture<'_, Result<AcquiredSource>> {
        let url = url.to_owned();
        Box::pin(async move {
            validate_source_url(&url)?;
            let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
                IndexError::Acquisition(format!("cannot open {}: {e}", self.root.display()))
            })?;
            if !root.is_dir() {
                return Err(IndexError::Acquisition(format!(
                    "{} is not a directory",
                    root.display()
                )));
            }
            Ok(AcquiredSource {
                source_url: normalize_source_url(&url),
                display_name: display_name_from_url(&url),
                checkout: Checkout::existing(root),
            })
        })
    }
}
