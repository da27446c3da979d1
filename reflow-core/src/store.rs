//! Storage collaborators: book content with its saved position, and the
//! key-value settings store that holds reader preferences.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::flow::{FlowKind, Theme, FONT_SIZE_DEFAULT, FONT_SIZE_MAX, FONT_SIZE_MIN};
use crate::{book_id_for_path, BookId};

#[derive(Debug, Clone)]
pub struct StoredBook {
    pub content: Vec<u8>,
    pub last_location: Option<String>,
    pub last_chapter: Option<String>,
}

#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get(&self, id: BookId) -> Result<Option<StoredBook>>;
    async fn save_progress(&self, id: BookId, location: &str, chapter: Option<&str>) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProgressRecord {
    last_location: Option<String>,
    last_chapter: Option<String>,
}

/// One `<id>.book` content file and one `<id>.json` progress file per book.
pub struct FileBookStore {
    root: PathBuf,
}

impl FileBookStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create library directory at {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn content_path(&self, id: BookId) -> PathBuf {
        self.root.join(format!("{id}.book"))
    }

    fn progress_path(&self, id: BookId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Copies a book into the library, keeping any progress already recorded for it.
    pub fn import(&self, path: &Path) -> Result<BookId> {
        let id = book_id_for_path(path);
        let bytes = fs::read(path).with_context(|| format!("failed to read book {:?}", path))?;
        write_atomic(&self.content_path(id), &bytes)?;
        Ok(id)
    }
}

/// File I/O runs on the blocking pool so large books never stall the reactor.
#[async_trait]
impl BookStore for FileBookStore {
    async fn get(&self, id: BookId) -> Result<Option<StoredBook>> {
        let content_path = self.content_path(id);
        let progress_path = self.progress_path(id);
        tokio::task::spawn_blocking(move || read_stored(&content_path, &progress_path))
            .await
            .context("book read task failed")?
    }

    async fn save_progress(&self, id: BookId, location: &str, chapter: Option<&str>) -> Result<()> {
        let record = ProgressRecord {
            last_location: Some(location.to_string()),
            last_chapter: chapter.map(str::to_string),
        };
        let payload = serde_json::to_string_pretty(&record)?;
        let path = self.progress_path(id);
        tokio::task::spawn_blocking(move || write_atomic(&path, payload.as_bytes()))
            .await
            .context("progress write task failed")?
    }
}

fn read_stored(content_path: &Path, progress_path: &Path) -> Result<Option<StoredBook>> {
    if !content_path.exists() {
        return Ok(None);
    }
    let content = fs::read(content_path)
        .with_context(|| format!("failed to read book content {:?}", content_path))?;
    let progress = load_progress(progress_path)?;
    Ok(Some(StoredBook {
        content,
        last_location: progress.last_location,
        last_chapter: progress.last_chapter,
    }))
}

fn load_progress(path: &Path) -> Result<ProgressRecord> {
    if !path.exists() {
        return Ok(ProgressRecord::default());
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open progress file {:?}", path))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    match serde_json::from_str(&buf) {
        Ok(record) => Ok(record),
        Err(err) => {
            warn!(?err, path = %path.display(), "discarding corrupt progress record");
            Ok(ProgressRecord::default())
        }
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
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

#[derive(Default)]
pub struct MemoryBookStore {
    inner: Mutex<HashMap<BookId, StoredBook>>,
}

impl MemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: BookId, content: Vec<u8>) {
        self.inner.lock().insert(
            id,
            StoredBook {
                content,
                last_location: None,
                last_chapter: None,
            },
        );
    }

    pub fn insert_with_progress(
        &self,
        id: BookId,
        content: Vec<u8>,
        location: &str,
        chapter: Option<&str>,
    ) {
        self.inner.lock().insert(
            id,
            StoredBook {
                content,
                last_location: Some(location.to_string()),
                last_chapter: chapter.map(str::to_string),
            },
        );
    }

    pub fn progress(&self, id: BookId) -> Option<(Option<String>, Option<String>)> {
        self.inner
            .lock()
            .get(&id)
            .map(|book| (book.last_location.clone(), book.last_chapter.clone()))
    }
}

#[async_trait]
impl BookStore for MemoryBookStore {
    async fn get(&self, id: BookId) -> Result<Option<StoredBook>> {
        Ok(self.inner.lock().get(&id).cloned())
    }

    async fn save_progress(&self, id: BookId, location: &str, chapter: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock();
        let book = inner
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("book {id} is not in the library"))?;
        book.last_location = Some(location.to_string());
        book.last_chapter = chapter.map(str::to_string);
        Ok(())
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().remove(key);
        Ok(())
    }
}

/// Settings kept as a flat TOML table, rewritten in full on every change.
pub struct FileSettingsStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, String>>,
}

impl FileSettingsStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create settings directory {:?}", parent))?;
        }
        let cache = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings {:?}", path))?;
            match toml::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    warn!(?err, path = %path.display(), "ignoring unreadable settings file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let payload = toml::to_string(values)?;
        write_atomic(&self.path, payload.as_bytes())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), value.to_string());
        self.flush(&cache)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock();
        if cache.remove(key).is_some() {
            self.flush(&cache)?;
        }
        Ok(())
    }
}

const FLOW_KEY: &str = "reader.flow";
const FONT_SIZE_KEY: &str = "reader.font_size";
const THEME_KEY: &str = "reader.theme";

/// Typed view over the settings store. Unreadable values fall back to the
/// configured defaults.
#[derive(Clone)]
pub struct Preferences {
    store: std::sync::Arc<dyn SettingsStore>,
    defaults: PreferenceDefaults,
}

#[derive(Debug, Clone, Copy)]
struct PreferenceDefaults {
    flow: FlowKind,
    font_size: u16,
    theme: Theme,
}

impl Preferences {
    pub fn new(store: std::sync::Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            defaults: PreferenceDefaults {
                flow: FlowKind::default(),
                font_size: FONT_SIZE_DEFAULT,
                theme: Theme::default(),
            },
        }
    }

    pub fn with_defaults(mut self, flow: FlowKind, font_size: u16, theme: Theme) -> Self {
        self.defaults = PreferenceDefaults {
            flow,
            font_size: font_size.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX),
            theme,
        };
        self
    }

    fn read<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        match self.store.get(key) {
            Ok(Some(raw)) => match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unreadable preference");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(?err, key, "failed to read preference");
                None
            }
        }
    }

    pub fn flow(&self) -> FlowKind {
        self.read(FLOW_KEY).unwrap_or(self.defaults.flow)
    }

    pub fn set_flow(&self, flow: FlowKind) -> Result<()> {
        self.store.put(FLOW_KEY, flow.as_str())
    }

    pub fn font_size(&self) -> u16 {
        self.read::<u16>(FONT_SIZE_KEY)
            .map(|size| size.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX))
            .unwrap_or(self.defaults.font_size)
    }

    pub fn set_font_size(&self, size: u16) -> Result<()> {
        self.store.put(FONT_SIZE_KEY, &size.to_string())
    }

    pub fn theme(&self) -> Theme {
        self.read(THEME_KEY).unwrap_or(self.defaults.theme)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<()> {
        self.store.put(THEME_KEY, theme.as_str())
    }

    pub fn reset(&self) -> Result<()> {
        for key in [FLOW_KEY, FONT_SIZE_KEY, THEME_KEY] {
            self.store.delete(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::tempdir;

    #[tokio::test]
    async fn file_book_store_round_trips_progress() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("moby.json");
        std::fs::write(&source, b"{\"spine\":[]}").unwrap();

        let store = FileBookStore::new(dir.path().join("library")).unwrap();
        let id = store.import(&source).unwrap();

        let fresh = store.get(id).await.unwrap().unwrap();
        assert_eq!(fresh.content, b"{\"spine\":[]}");
        assert!(fresh.last_location.is_none());

        store
            .save_progress(id, "epubcfi(/6/4!/4/1:10)", Some("Chapter 1"))
            .await
            .unwrap();
        let restored = store.get(id).await.unwrap().unwrap();
        assert_eq!(restored.last_location.as_deref(), Some("epubcfi(/6/4!/4/1:10)"));
        assert_eq!(restored.last_chapter.as_deref(), Some("Chapter 1"));

        // Re-importing the same file keeps the recorded position.
        assert_eq!(store.import(&source).unwrap(), id);
        let again = store.get(id).await.unwrap().unwrap();
        assert_eq!(again.last_chapter.as_deref(), Some("Chapter 1"));
    }

    #[tokio::test]
    async fn file_book_store_tolerates_corrupt_progress() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("book.json");
        std::fs::write(&source, b"{}").unwrap();
        let store = FileBookStore::new(dir.path().join("library")).unwrap();
        let id = store.import(&source).unwrap();
        std::fs::write(store.progress_path(id), b"not json").unwrap();

        let book = store.get(id).await.unwrap().unwrap();
        assert!(book.last_location.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_book_store_serves_concurrent_tasks() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileBookStore::new(dir.path().join("library")).unwrap());
        let mut ids = Vec::new();
        for n in 0..4 {
            let source = dir.path().join(format!("book{n}.json"));
            std::fs::write(&source, format!("{{\"n\":{n}}}")).unwrap();
            ids.push(store.import(&source).unwrap());
        }

        let tasks: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(n, id)| {
                let store = Arc::clone(&store);
                let id = *id;
                tokio::spawn(async move {
                    store
                        .save_progress(id, &format!("c{n}.xhtml@0"), None)
                        .await?;
                    store.get(id).await
                })
            })
            .collect();

        for (n, task) in tasks.into_iter().enumerate() {
            let book = task.await.unwrap().unwrap().unwrap();
            assert_eq!(book.content, format!("{{\"n\":{n}}}").into_bytes());
            let expected = format!("c{n}.xhtml@0");
            assert_eq!(book.last_location.as_deref(), Some(expected.as_str()));
        }
        assert!(store.get(BookId::from_u128(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_book_is_none() {
        let store = MemoryBookStore::new();
        assert!(store.get(BookId::from_u128(1)).await.unwrap().is_none());
        assert!(store
            .save_progress(BookId::from_u128(1), "x", None)
            .await
            .is_err());
    }

    #[test]
    fn file_settings_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        {
            let store = FileSettingsStore::open(path.clone()).unwrap();
            store.put("reader.flow", "continuous").unwrap();
            store.put("reader.font_size", "120").unwrap();
            store.delete("reader.font_size").unwrap();
        }
        let store = FileSettingsStore::open(path).unwrap();
        assert_eq!(store.get("reader.flow").unwrap().as_deref(), Some("continuous"));
        assert_eq!(store.get("reader.font_size").unwrap(), None);
    }

    #[test]
    fn preferences_fall_back_on_unreadable_values() {
        let settings = Arc::new(MemorySettingsStore::new());
        settings.put(FLOW_KEY, "diagonal").unwrap();
        settings.put(FONT_SIZE_KEY, "900").unwrap();
        let prefs = Preferences::new(settings).with_defaults(FlowKind::Continuous, 110, Theme::Sepia);

        assert_eq!(prefs.flow(), FlowKind::Continuous);
        assert_eq!(prefs.font_size(), FONT_SIZE_MAX);
        assert_eq!(prefs.theme(), Theme::Sepia);

        prefs.set_flow(FlowKind::Paginated).unwrap();
        prefs.set_theme(Theme::Dark).unwrap();
        assert_eq!(prefs.flow(), FlowKind::Paginated);
        assert_eq!(prefs.theme(), Theme::Dark);

        prefs.reset().unwrap();
        assert_eq!(prefs.font_size(), 110);
    }
}
