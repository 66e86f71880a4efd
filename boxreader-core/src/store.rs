//! Per-document and per-path persistence.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{DocumentId, DocumentInfo};

/// Writes through a sibling temp file and renames it into place.
pub fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {:?}", parent))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to open temp file {:?}", tmp))?;
    file.write_all(payload)?;
    file.flush()?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {:?}", path))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let value =
        serde_json::from_str(&raw).with_context(|| format!("failed to decode {:?}", path))?;
    Ok(Some(value))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    write_atomic(path, payload.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentState {
    pub last_page: u32,
}

impl Default for DocumentState {
    fn default() -> Self {
        Self { last_page: 1 }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<DocumentState>>;
    fn save(&self, doc: &DocumentInfo, state: &DocumentState) -> Result<()>;
}

/// One `<id>.json` file per document under `root`.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, doc: &DocumentInfo) -> PathBuf {
        self.root.join(format!("{}.json", doc.id))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<DocumentState>> {
        read_json(&self.state_path(doc))
    }

    fn save(&self, doc: &DocumentInfo, state: &DocumentState) -> Result<()> {
        write_json(&self.state_path(doc), state)
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, DocumentState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<DocumentState>> {
        Ok(self.inner.lock().get(&doc.id).cloned())
    }

    fn save(&self, doc: &DocumentInfo, state: &DocumentState) -> Result<()> {
        self.inner.lock().insert(doc.id, state.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReadingState {
    #[serde(default)]
    pages: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LastOpenedRecord {
    #[serde(default)]
    path: Option<String>,
}

/// Reading position per document path plus the most recently opened path.
pub trait ReadingStore: Send + Sync {
    fn page_for(&self, path: &str) -> Result<Option<u32>>;
    fn set_page(&self, path: &str, page: u32) -> Result<()>;
    fn last_opened(&self) -> Result<Option<String>>;
    fn set_last_opened(&self, path: &str) -> Result<()>;
}

/// `reading_state.json` and `last_opened.json` inside one directory.
pub struct FileReadingStore {
    reading_path: PathBuf,
    last_opened_path: PathBuf,
}

impl FileReadingStore {
    pub fn new(root: &Path) -> Self {
        Self {
            reading_path: root.join("reading_state.json"),
            last_opened_path: root.join("last_opened.json"),
        }
    }
}

impl ReadingStore for FileReadingStore {
    fn page_for(&self, path: &str) -> Result<Option<u32>> {
        let state: Option<ReadingState> = read_json(&self.reading_path)?;
        Ok(state.and_then(|state| state.pages.get(path).copied()))
    }

    fn set_page(&self, path: &str, page: u32) -> Result<()> {
        if path.trim().is_empty() {
            return Ok(());
        }
        let mut state: ReadingState = read_json(&self.reading_path)?.unwrap_or_default();
        state.pages.insert(path.to_string(), page.max(1));
        write_json(&self.reading_path, &state)
    }

    fn last_opened(&self) -> Result<Option<String>> {
        let record: Option<LastOpenedRecord> = read_json(&self.last_opened_path)?;
        Ok(record
            .and_then(|record| record.path)
            .filter(|path| !path.trim().is_empty()))
    }

    fn set_last_opened(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Ok(());
        }
        let record = LastOpenedRecord {
            path: Some(path.to_string()),
        };
        write_json(&self.last_opened_path, &record)
    }
}

#[derive(Default)]
pub struct MemoryReadingStore {
    pages: Mutex<HashMap<String, u32>>,
    last: Mutex<Option<String>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadingStore for MemoryReadingStore {
    fn page_for(&self, path: &str) -> Result<Option<u32>> {
        Ok(self.pages.lock().get(path).copied())
    }

    fn set_page(&self, path: &str, page: u32) -> Result<()> {
        if !path.trim().is_empty() {
            self.pages.lock().insert(path.to_string(), page.max(1));
        }
        Ok(())
    }

    fn last_opened(&self) -> Result<Option<String>> {
        Ok(self.last.lock().clone())
    }

    fn set_last_opened(&self, path: &str) -> Result<()> {
        if !path.trim().is_empty() {
            *self.last.lock() = Some(path.to_string());
        }
        Ok(())
    }
}
