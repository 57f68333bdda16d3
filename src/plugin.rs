//! Content plugins.
//!
//! A plugin turns its settings into a [`RawArtifact`]: either a finished
//! image, or an HTML document that the renderer rasterizes. Plugins know the
//! device they draw for ([`DeviceProfile`]) so they can lay content out at
//! the right size, but they never orient or crop; that is the transform
//! pipeline's job.
//!
//! ## Built-in plugins
//!
//! | id | settings | output |
//! |---|---|---|
//! | `image` | `path`: file or directory | the image; directories rotate through their images in sorted order |
//! | `markdown` | `text` or `file`, optional `title` | HTML page sized to the device |
//! | `html` | `file` | the document, assets resolved next to it |

use crate::types::{DeviceProfile, HtmlDocument, RawArtifact, Settings};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Options, Parser, html as md_html};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Missing or invalid settings. Retrying will not help.
    #[error("{0}")]
    Configuration(String),
    /// A dependency (file, network resource, decoder) failed.
    #[error("{0}")]
    Upstream(String),
}

/// Content producer registered under a unique id.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn generate(&self, settings: &Settings, device: &DeviceProfile)
    -> Result<RawArtifact, PluginError>;
}

/// Plugins by id.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `image`, `markdown` and `html` plugins.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ImagePlugin::default()));
        registry.register(Arc::new(MarkdownPlugin));
        registry.register(Arc::new(HtmlPlugin));
        registry
    }

    /// Add a plugin, replacing any previous one with the same id.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.id().to_string(), plugin);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.plugins.keys()).finish()
    }
}

// ============================================================================
// Settings helpers
// ============================================================================

/// A string setting, or `None` when absent. Non-string values are an error.
pub fn optional_str<'a>(settings: &'a Settings, key: &str) -> Result<Option<&'a str>, PluginError> {
    match settings.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(PluginError::Configuration(format!(
            "setting '{key}' must be a string, got {other}"
        ))),
    }
}

pub fn required_str<'a>(settings: &'a Settings, key: &str) -> Result<&'a str, PluginError> {
    optional_str(settings, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| PluginError::Configuration(format!("missing setting '{key}'")))
}

fn read_text(path: &Path) -> Result<String, PluginError> {
    std::fs::read_to_string(path)
        .map_err(|e| PluginError::Upstream(format!("cannot read {}: {e}", path.display())))
}

/// Absolute directory containing `file`, for resolving relative assets.
fn asset_dir(file: &Path) -> Result<PathBuf, PluginError> {
    let absolute = std::fs::canonicalize(file)
        .map_err(|e| PluginError::Upstream(format!("cannot resolve {}: {e}", file.display())))?;
    Ok(absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/")))
}

// ============================================================================
// image
// ============================================================================

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp"];

/// Shows an image file, or rotates through the images in a directory.
#[derive(Default)]
pub struct ImagePlugin {
    /// Next index per directory.
    cursors: Mutex<HashMap<PathBuf, usize>>,
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Supported images under `dir`, recursively, in path order.
pub fn collect_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_supported_image(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

impl ImagePlugin {
    fn next_in(&self, dir: &Path) -> Result<PathBuf, PluginError> {
        let images = collect_images(dir);
        if images.is_empty() {
            return Err(PluginError::Configuration(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| PluginError::Upstream("image rotation state poisoned".into()))?;
        let cursor = cursors.entry(dir.to_path_buf()).or_insert(0);
        let chosen = images[*cursor % images.len()].clone();
        *cursor = (*cursor + 1) % images.len();
        Ok(chosen)
    }
}

impl Plugin for ImagePlugin {
    fn id(&self) -> &str {
        "image"
    }

    fn generate(
        &self,
        settings: &Settings,
        _device: &DeviceProfile,
    ) -> Result<RawArtifact, PluginError> {
        let path = PathBuf::from(required_str(settings, "path")?);
        let file = if path.is_dir() {
            self.next_in(&path)?
        } else if path.is_file() {
            path
        } else {
            return Err(PluginError::Configuration(format!(
                "image path {} does not exist",
                path.display()
            )));
        };

        log::debug!("image plugin: loading {}", file.display());
        let img = image::open(&file)
            .map_err(|e| PluginError::Upstream(format!("cannot decode {}: {e}", file.display())))?;
        Ok(RawArtifact::Image(img))
    }
}

// ============================================================================
// markdown
// ============================================================================

/// Renders Markdown to an HTML page laid out at the device's content size.
pub struct MarkdownPlugin;

const MARKDOWN_CSS: &str = "\
* { box-sizing: border-box; }
html, body { margin: 0; background: #fff; color: #000; }
body { padding: 24px 32px; overflow: hidden; font-family: 'DejaVu Sans', 'Helvetica', sans-serif; font-size: 22px; line-height: 1.35; }
h1.title { margin: 0 0 12px; font-size: 34px; border-bottom: 3px solid #000; padding-bottom: 6px; }
h1, h2, h3 { margin: 12px 0 6px; }
ul, ol { padding-left: 1.2em; }
code { font-family: 'DejaVu Sans Mono', monospace; }
table { border-collapse: collapse; }
td, th { border: 1px solid #000; padding: 2px 8px; }
";

/// Full page for a Markdown body.
pub fn markdown_page(title: Option<&str>, markdown: &str, device: &DeviceProfile) -> Markup {
    let mut body_html = String::new();
    md_html::push_html(&mut body_html, Parser::new_ext(markdown, Options::all()));

    let size = device.content_dimensions();
    let viewport = format!(
        "html, body {{ width: {}px; height: {}px; }}",
        size.width, size.height
    );
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                @if let Some(title) = title {
                    title { (title) }
                }
                style { (PreEscaped(MARKDOWN_CSS)) (PreEscaped(viewport)) }
            }
            body {
                @if let Some(title) = title {
                    h1.title { (title) }
                }
                main { (PreEscaped(body_html)) }
            }
        }
    }
}

impl Plugin for MarkdownPlugin {
    fn id(&self) -> &str {
        "markdown"
    }

    fn generate(
        &self,
        settings: &Settings,
        device: &DeviceProfile,
    ) -> Result<RawArtifact, PluginError> {
        let title = optional_str(settings, "title")?;
        let (markdown, base_dir) = match (optional_str(settings, "text")?, optional_str(settings, "file")?) {
            (Some(text), None) => (text.to_string(), None),
            (None, Some(file)) => {
                let path = Path::new(file);
                (read_text(path)?, Some(asset_dir(path)?))
            }
            (Some(_), Some(_)) => {
                return Err(PluginError::Configuration(
                    "set either 'text' or 'file', not both".into(),
                ));
            }
            (None, None) => {
                return Err(PluginError::Configuration(
                    "missing setting 'text' or 'file'".into(),
                ));
            }
        };

        let page = markdown_page(title, &markdown, device).into_string();
        let doc = match base_dir {
            Some(dir) => HtmlDocument::new(page).with_base_dir(dir),
            None => HtmlDocument::new(page),
        };
        Ok(RawArtifact::Html(doc))
    }
}

// ============================================================================
// html
// ============================================================================

/// Passes an HTML file through to the renderer.
pub struct HtmlPlugin;

impl Plugin for HtmlPlugin {
    fn id(&self) -> &str {
        "html"
    }

    fn generate(
        &self,
        settings: &Settings,
        _device: &DeviceProfile,
    ) -> Result<RawArtifact, PluginError> {
        let path = Path::new(required_str(settings, "file")?);
        let markup = read_text(path)?;
        Ok(RawArtifact::Html(
            HtmlDocument::new(markup).with_base_dir(asset_dir(path)?),
        ))
    }
}
