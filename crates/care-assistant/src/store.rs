/// On-disk knowledge corpus: one JSON record per file in a single directory.
///
/// Loading never fails. Unreadable files are logged and skipped, and a missing
/// directory is created empty. Writes go to a fresh `<slug>.json` file; when
/// the slug is already taken a numeric suffix is appended, so two titles that
/// slugify alike both survive a reload.
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::model::Document;

const RECORD_EXTENSION: &str = "json";
const EMPTY_SLUG: &str = "document";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("title and content are required")]
    MissingFields,

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Record as found on disk; any field may be missing.
#[derive(Debug, Deserialize)]
struct RawRecord {
    title: Option<String>,
    content: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub struct DocumentStore {
    root: PathBuf,
    documents: Vec<Document>,
    /// File stems claimed by this store, including ones it wrote itself.
    taken: HashSet<String>,
}

impl DocumentStore {
    /// An empty store rooted at `root`, without touching the filesystem.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            documents: Vec::new(),
            taken: HashSet::new(),
        }
    }

    /// Load every `*.json` record under `root`, in filename order.
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let mut store = Self::empty(root);

        if !store.root.exists() {
            match fs::create_dir_all(&store.root) {
                Ok(()) => warn!(path = %store.root.display(), "created empty knowledge directory"),
                Err(e) => {
                    warn!(error = %e, path = %store.root.display(), "failed to create knowledge directory")
                }
            }
            return store;
        }

        let entries = match fs::read_dir(&store.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, path = %store.root.display(), "failed to list knowledge directory");
                return store;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_record_file(p))
            .collect();
        paths.sort();

        for path in paths {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                store.taken.insert(stem.to_lowercase());
            }
            match read_record(&path) {
                Ok(Some(doc)) => store.documents.push(doc),
                Ok(None) => debug!(path = %path.display(), "skipping record without title or content"),
                Err(e) => warn!(error = %e, path = %path.display(), "skipping unreadable record"),
            }
        }

        info!(
            documents = store.documents.len(),
            path = %store.root.display(),
            "loaded knowledge base"
        );
        store
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Persist a new record and append it to the in-memory set.
    ///
    /// Memory is only updated once the file has been written, so a failed
    /// write leaves the store exactly as it was. The write itself runs on the
    /// blocking pool. Returns the written path.
    pub async fn add(
        &mut self,
        title: &str,
        content: &str,
        category: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        let doc = Document {
            title: title.to_string(),
            content: content.to_string(),
            category: category
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        };
        if !doc.is_complete() {
            return Err(StoreError::MissingFields);
        }

        let stem = self.free_stem(&slugify(&doc.title));
        let path = self.root.join(format!("{stem}.{RECORD_EXTENSION}"));
        let json = serde_json::to_string_pretty(&doc)?;

        let root = self.root.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&root).and_then(|()| write_new(&target, json.as_bytes()))
        })
        .await
        .unwrap_or_else(|join_err| Err(io::Error::other(join_err)))
        .map_err(|source| {
            warn!(error = %source, path = %path.display(), "failed to save document");
            StoreError::Persist {
                path: path.clone(),
                source,
            }
        })?;

        info!(title = %doc.title, path = %path.display(), "added document");
        self.taken.insert(stem);
        self.documents.push(doc);
        Ok(path)
    }

    /// First of `base`, `base_2`, `base_3`, ... not claimed in memory or on disk.
    fn free_stem(&self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 1u32;
        while self.taken.contains(&candidate)
            || self
                .root
                .join(format!("{candidate}.{RECORD_EXTENSION}"))
                .exists()
        {
            n += 1;
            candidate = format!("{base}_{n}");
        }
        candidate
    }
}

/// Filesystem-safe key for a title: alphanumerics, spaces and underscores
/// only, trimmed, spaces turned into underscores, lowercased.
pub fn slugify(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let slug = kept.trim().replace(' ', "_").to_lowercase();
    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

fn is_record_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(RECORD_EXTENSION))
}

fn read_record(path: &Path) -> Result<Option<Document>, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path)?;
    let record: RawRecord = serde_json::from_str(&raw)?;
    let (Some(title), Some(content)) = (record.title, record.content) else {
        return Ok(None);
    };
    let doc = Document {
        title,
        content,
        category: record.category,
    };
    Ok(doc.is_complete().then_some(doc))
}

/// Create `path` exclusively so a concurrent writer can never be overwritten.
fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
