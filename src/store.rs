// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Interaction store: cassettes persisted as JSONL files, one per name.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cassette::{Cassette, Interaction};
use crate::error::{Result, VcrError};
use crate::fingerprint::Fingerprint;

const EXTENSION: &str = "jsonl";

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence for cassettes, addressed purely by name.
pub trait InteractionStore: Send + Sync {
    /// Whether a cassette with this name has been persisted.
    fn exists<'a>(&'a self, cassette: &'a str) -> StoreFuture<'a, bool>;

    /// Load every readable interaction; `None` if the cassette does not exist.
    fn load<'a>(&'a self, cassette: &'a str) -> StoreFuture<'a, Option<Cassette>>;

    /// Append one interaction, creating the cassette if needed.
    fn append<'a>(&'a self, cassette: &'a str, interaction: &'a Interaction)
        -> StoreFuture<'a, ()>;

    /// See [`Cassette::find_by_fingerprint`].
    fn find_by_fingerprint<'a>(
        &'a self,
        cassette: &'a str,
        fingerprint: &'a Fingerprint,
        occurrence: usize,
    ) -> StoreFuture<'a, Option<Interaction>> {
        Box::pin(async move {
            Ok(self
                .load(cassette)
                .await?
                .and_then(|c| c.find_by_fingerprint(fingerprint, occurrence).cloned()))
        })
    }
}

/// Validate a cassette name for use as a relative file path.
///
/// `/` separates sub-directories; everything that could escape the
/// cassette directory is rejected.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |why| Err(VcrError::InvalidCassetteName(name.to_string(), why));
    if name.is_empty() {
        return invalid("empty name");
    }
    if name.starts_with('/') {
        return invalid("absolute path");
    }
    if name.contains('\\') || name.contains('\0') {
        return invalid("backslash or NUL character");
    }
    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return invalid("empty, '.' or '..' path segment");
    }
    Ok(())
}

/// JSONL-backed store rooted at a cassette directory.
pub struct FileStore {
    root: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `name`: `<root>/<name>.jsonl`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}.{EXTENSION}")))
    }

    /// Names of all cassettes under the root, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(VcrError::store(&dir.display().to_string(), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| VcrError::store(&dir.display().to_string(), e))?
            {
                let path = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == EXTENSION) {
                    if let Some(name) = self.name_of(&path) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn name_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("cassette lock table poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.lock_table().entry(name.to_string()).or_default().clone()
    }

    /// Forget the lock for `name` unless another append holds or awaits it.
    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.lock_table();
        // one count for the table, one for `lock`
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    async fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await?;

        // A crash mid-append can leave a line without its terminator; start
        // on a fresh line so the torn record stays isolated.
        let len = file.metadata().await?.len();
        let mut record = String::with_capacity(line.len() + 2);
        if len > 0 {
            file.seek(std::io::SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                record.push('\n');
            }
        }
        record.push_str(line);
        record.push('\n');

        file.write_all(record.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_cassette(name: &str, path: &Path) -> Result<Option<Cassette>> {
        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VcrError::store(name, e)),
        };

        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut cassette = Cassette::new(name);
        let mut line_num = 0;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| VcrError::store(name, e))?
        {
            line_num += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Interaction>(&line) {
                Ok(interaction) => cassette.push(interaction),
                Err(e) => {
                    warn!(cassette = %name, line = line_num, error = %e, "failed to parse interaction, skipping");
                }
            }
        }
        Ok(Some(cassette))
    }
}

impl InteractionStore for FileStore {
    fn exists<'a>(&'a self, cassette: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.path_for(cassette)?;
            tokio::fs::try_exists(&path)
                .await
                .map_err(|e| VcrError::store(cassette, e))
        })
    }

    fn load<'a>(&'a self, cassette: &'a str) -> StoreFuture<'a, Option<Cassette>> {
        Box::pin(async move {
            let path = self.path_for(cassette)?;
            Self::read_cassette(cassette, &path).await
        })
    }

    fn append<'a>(
        &'a self,
        cassette: &'a str,
        interaction: &'a Interaction,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.path_for(cassette)?;
            let line = serde_json::to_string(interaction).map_err(|e| VcrError::store(cassette, e))?;

            let lock = self.lock_for(cassette);
            let written = {
                let _guard = lock.lock().await;
                Self::write_line(&path, &line).await
            };
            self.release_lock(cassette, lock);
            written.map_err(|e| VcrError::store(cassette, e))?;
            debug!(cassette = %cassette, fingerprint = %interaction.fingerprint(), path = %path.display(), "appended interaction");
            Ok(())
        })
    }
}
