//! Persistent template sources.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use super::{TemplateCurve, TemplateError, Timestamp};

/// Errors from a [`TemplateStore`].
#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    Template {
        path: PathBuf,
        source: TemplateError,
    },
    /// The backing store cannot be reached.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Json { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Template { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Unavailable(reason) => write!(f, "template store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Template { source, .. } => Some(source),
            Self::Unavailable(_) => None,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Raw frames fetched for template bootstrapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrames {
    /// Frame samples, newest first.
    pub frames: Vec<Vec<u16>>,
    /// Timestamp of the newest frame, if any.
    pub timestamp: Option<Timestamp>,
}

/// Source and sink of templates and the raw frames they are built from.
pub trait TemplateStore {
    /// Newest template, or `None` when the store holds none.
    fn load_most_recent_template(
        &mut self,
    ) -> Result<Option<(TemplateCurve, Timestamp)>, StoreError>;

    /// Persist a template revision.
    fn save_template(&mut self, curve: &TemplateCurve, timestamp: Timestamp)
        -> Result<(), StoreError>;

    /// Up to `limit` most recent raw frames.
    fn load_raw_frames(&mut self, limit: usize) -> Result<RawFrames, StoreError>;
}

/// Store that never holds a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTemplateStore;

impl TemplateStore for NoTemplateStore {
    fn load_most_recent_template(
        &mut self,
    ) -> Result<Option<(TemplateCurve, Timestamp)>, StoreError> {
        Ok(None)
    }

    fn save_template(&mut self, _: &TemplateCurve, _: Timestamp) -> Result<(), StoreError> {
        tracing::debug!("no template store configured, template not saved");
        Ok(())
    }

    fn load_raw_frames(&mut self, _: usize) -> Result<RawFrames, StoreError> {
        Ok(RawFrames::default())
    }
}

/// A single tabulated template file.
///
/// The timestamp is the file's modification time, so replacing the file
/// on disk publishes a new revision.
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    path: PathBuf,
}

impl FileTemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemplateStore for FileTemplateStore {
    fn load_most_recent_template(
        &mut self,
    ) -> Result<Option<(TemplateCurve, Timestamp)>, StoreError> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&self.path)(e)),
        };
        let modified = meta.modified().map_err(io_err(&self.path))?;
        let timestamp = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0);
        let text = std::fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        let curve = TemplateCurve::from_table(&text).map_err(|source| StoreError::Template {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some((curve, timestamp)))
    }

    fn save_template(&mut self, curve: &TemplateCurve, _: Timestamp) -> Result<(), StoreError> {
        write_replace(&self.path, curve.to_table().as_bytes())
    }

    fn load_raw_frames(&mut self, _: usize) -> Result<RawFrames, StoreError> {
        Ok(RawFrames::default())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TemplateDocument {
    timestamp: Timestamp,
    /// `[phase, value]` rows.
    template: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDocument {
    timestamp: Timestamp,
    raw: Vec<u16>,
}

/// Document store on a directory tree.
///
/// ```text
/// <root>/templates/<timestamp>.json   {"timestamp": .., "template": [[s, v], ..]}
/// <root>/raw/<timestamp>.json         {"timestamp": .., "raw": [..]}
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Append one raw frame.
    pub fn save_raw_frame(
        &mut self,
        samples: &[u16],
        timestamp: Timestamp,
    ) -> Result<(), StoreError> {
        let doc = RawDocument {
            timestamp,
            raw: samples.to_vec(),
        };
        let path = self.raw_dir().join(format!("{}.json", timestamp));
        write_json(&path, &doc)
    }
}

impl TemplateStore for DirectoryStore {
    fn load_most_recent_template(
        &mut self,
    ) -> Result<Option<(TemplateCurve, Timestamp)>, StoreError> {
        let mut docs: Vec<TemplateDocument> = read_documents(&self.templates_dir())?;
        docs.sort_by_key(|d| d.timestamp);
        Ok(docs.pop().map(|doc| {
            let (phase, value) = doc.template.iter().map(|r| (r[0], r[1])).unzip();
            (TemplateCurve { phase, value }, doc.timestamp)
        }))
    }

    fn save_template(
        &mut self,
        curve: &TemplateCurve,
        timestamp: Timestamp,
    ) -> Result<(), StoreError> {
        let doc = TemplateDocument {
            timestamp,
            template: curve
                .phase
                .iter()
                .zip(&curve.value)
                .map(|(&p, &v)| [p, v])
                .collect(),
        };
        let path = self.templates_dir().join(format!("{}.json", timestamp));
        write_json(&path, &doc)?;
        tracing::info!("saved template revision {} to {}", timestamp, path.display());
        Ok(())
    }

    fn load_raw_frames(&mut self, limit: usize) -> Result<RawFrames, StoreError> {
        let mut docs: Vec<RawDocument> = read_documents(&self.raw_dir())?;
        docs.sort_by_key(|d| std::cmp::Reverse(d.timestamp));
        docs.truncate(limit);
        Ok(RawFrames {
            timestamp: docs.first().map(|d| d.timestamp),
            frames: docs.into_iter().map(|d| d.raw).collect(),
        })
    }
}

fn read_documents<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };
    let mut docs = Vec::new();
    for entry in entries {
        let path = entry.map_err(io_err(dir))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(io_err(&path))?;
        let doc = serde_json::from_str(&text).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        docs.push(doc);
    }
    Ok(docs)
}

fn write_json<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string(doc).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_replace(path, json.as_bytes())
}

/// Write to a sibling temp file, then rename over `path`.
fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_err(path))
}
