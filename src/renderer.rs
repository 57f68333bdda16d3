//! HTML rasterization through a headless browser.
//!
//! [`ChromeRenderer`] writes the document into a private temporary
//! directory, runs the first available browser from its candidate list with
//! `--headless --screenshot`, and decodes the PNG it leaves behind. The
//! temporary directory is a [`tempfile::TempDir`], so the HTML, the
//! screenshot and the browser's stderr log are removed however the call
//! ends.
//!
//! ## Candidates
//!
//! Each candidate is a shell-style command line: a program plus leading
//! arguments (`"chromium --user-data-dir=/tmp/ink"`). A program containing
//! a path separator must exist as a file; a bare name is looked up on
//! `PATH`. The first one found wins. When none is found the render fails
//! with [`RenderError::Unavailable`] listing what was tried.
//!
//! ## Timeouts
//!
//! The browser runs in its own process group. If it has not exited when the
//! budget runs out, the whole group is killed (Chromium forks helper
//! processes) and [`RenderError::Timeout`] is returned. Renders are never
//! retried.

use crate::config::RendererConfig;
use crate::types::HtmlDocument;
use image::DynamicImage;
use image::imageops::FilterType;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use wait_timeout::ChildExt;

const PAGE_FILE: &str = "page.html";
const SCREENSHOT_FILE: &str = "screenshot.png";
const STDERR_FILE: &str = "browser.log";
/// Trailing bytes of browser stderr kept in [`RenderError::Failed`].
const STDERR_TAIL: usize = 2000;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("No headless browser found (tried: {})", tried.join(", "))]
    Unavailable { tried: Vec<String> },
    #[error("Browser did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Browser exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("Browser produced no screenshot")]
    EmptyOutput,
    #[error("Invalid render size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Screenshot decode error: {0}")]
    Decode(#[from] image::ImageError),
}

/// Turns an HTML document into a bitmap of exactly `width × height`.
pub trait HtmlRenderer: Send + Sync {
    fn render(
        &self,
        doc: &HtmlDocument,
        width: u32,
        height: u32,
        timeout: Duration,
    ) -> Result<DynamicImage, RenderError>;
}

/// A discovered browser command: resolved program plus leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", shell_words::quote(arg))?;
        }
        Ok(())
    }
}

/// Headless Chromium/Chrome screenshot renderer.
#[derive(Debug, Clone)]
pub struct ChromeRenderer {
    candidates: Vec<String>,
    work_dir: Option<PathBuf>,
}

impl ChromeRenderer {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            work_dir: None,
        }
    }

    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            candidates: config.candidates.clone(),
            work_dir: config.work_dir.clone(),
        }
    }

    /// Create transient files under `dir` instead of the system temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// First candidate whose program can be found.
    pub fn discover(&self) -> Result<Invocation, RenderError> {
        let mut tried = Vec::with_capacity(self.candidates.len());
        for candidate in &self.candidates {
            let words = match shell_words::split(candidate) {
                Ok(words) => words,
                Err(e) => {
                    log::warn!("skipping renderer candidate {candidate:?}: {e}");
                    tried.push(candidate.clone());
                    continue;
                }
            };
            let Some((program, args)) = words.split_first() else {
                continue;
            };
            if let Some(resolved) = resolve_program(program) {
                log::debug!("using renderer {}", resolved.display());
                return Ok(Invocation {
                    program: resolved,
                    args: args.to_vec(),
                });
            }
            tried.push(program.clone());
        }
        Err(RenderError::Unavailable { tried })
    }

    fn temp_dir(&self) -> io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("inkrefresh-render-");
        match &self.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }
}

impl HtmlRenderer for ChromeRenderer {
    fn render(
        &self,
        doc: &HtmlDocument,
        width: u32,
        height: u32,
        timeout: Duration,
    ) -> Result<DynamicImage, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidSize(width, height));
        }
        let invocation = self.discover()?;

        let tmp = self.temp_dir()?;
        let page = tmp.path().join(PAGE_FILE);
        let screenshot = tmp.path().join(SCREENSHOT_FILE);
        let stderr_log = tmp.path().join(STDERR_FILE);
        std::fs::write(&page, with_base_href(doc)?)?;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .arg(file_url(&page)?.as_str())
            .args(screenshot_args(&screenshot, width, height, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_log)?);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        log::debug!("rendering {width}x{height} with {invocation}");
        let mut child = cmd.spawn().map_err(|source| RenderError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;

        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                kill_tree(&mut child);
                log::warn!("renderer timed out after {timeout:?}, killed");
                return Err(RenderError::Timeout(timeout));
            }
        };
        if !status.success() {
            return Err(RenderError::Failed {
                status: describe_status(status),
                stderr: stderr_tail(&stderr_log),
            });
        }

        match std::fs::metadata(&screenshot) {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(RenderError::EmptyOutput),
        }
        let img = image::open(&screenshot)?;
        if img.width() == width && img.height() == height {
            Ok(img)
        } else {
            log::debug!(
                "browser produced {}x{}, resizing to {width}x{height}",
                img.width(),
                img.height()
            );
            Ok(img.resize_exact(width, height, FilterType::Lanczos3))
        }
    }
}

/// Browser flags following the page URL.
fn screenshot_args(out: &Path, width: u32, height: u32, timeout: Duration) -> Vec<String> {
    vec![
        "--headless".to_string(),
        format!("--screenshot={}", out.display()),
        format!("--window-size={width},{height}"),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-software-rasterizer".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--hide-scrollbars".to_string(),
        "--force-device-scale-factor=1".to_string(),
        format!("--timeout={}", timeout.as_millis()),
    ]
}

/// Resolve a candidate program to an executable path.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(path).then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Kill the browser and everything it forked, then reap it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: signalling our own child's process group; no memory is touched.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => status.to_string(),
    }
}

fn stderr_tail(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap_or_default();
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

/// `file://` URL for `path`, made absolute against the working directory.
pub fn file_url(path: &Path) -> io::Result<Url> {
    let path = std::path::absolute(path)?;
    Url::from_file_path(&path).map_err(|()| not_a_file_url(&path))
}

/// Like [`file_url`], with the trailing slash a base URL needs.
fn dir_url(path: &Path) -> io::Result<Url> {
    let path = std::path::absolute(path)?;
    Url::from_directory_path(&path).map_err(|()| not_a_file_url(&path))
}

fn not_a_file_url(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} cannot be expressed as a file URL", path.display()),
    )
}

/// The document markup with a `<base href>` for its asset directory.
///
/// The tag goes right after `<head>`; without one, after `<html>`; without
/// that, after the doctype, so the document never gains content before its
/// doctype.
fn with_base_href(doc: &HtmlDocument) -> io::Result<String> {
    let Some(dir) = &doc.base_dir else {
        return Ok(doc.markup.clone());
    };
    let base = format!("<base href=\"{}\">", dir_url(dir)?);

    let lower = doc.markup.to_ascii_lowercase();
    let at = ["head", "html", "!doctype"]
        .iter()
        .find_map(|name| end_of_start_tag(&lower, name))
        .unwrap_or(0);
    Ok(format!("{}{base}{}", &doc.markup[..at], &doc.markup[at..]))
}

/// Byte offset just past the first `<name …>` tag in lowercased markup.
/// `<head` does not match `<header>`.
fn end_of_start_tag(lower: &str, name: &str) -> Option<usize> {
    let open = format!("<{name}");
    let mut from = 0;
    while let Some(found) = lower[from..].find(&open) {
        let after = from + found + open.len();
        match lower[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_ascii_whitespace() => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}
