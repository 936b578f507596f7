//! Linked schemas shared across threads, keyed by canonical layout path.
//!
//! A layout file is compiled at most once per cache: concurrent first requests for the
//! same path wait for one compilation and all get the same `Arc`. Failures are not
//! cached.

use crate::error::FormatError;
use crate::linker::Linker;
use crate::parser::parse_file;
use crate::schema::LinkedSchema;
use once_cell::sync::{Lazy, OnceCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

type Slot = Arc<OnceCell<Arc<LinkedSchema>>>;

#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<PathBuf, Slot>>,
}

static GLOBAL: Lazy<SchemaCache> = Lazy::new(SchemaCache::new);

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static SchemaCache {
        &GLOBAL
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, Slot>>, FormatError> {
        self.entries
            .lock()
            .map_err(|_| FormatError::State("schema cache lock poisoned".into()))
    }

    /// Compiled schema for `path`, compiling it with `linker` on first use.
    pub fn get_or_link(&self, path: impl AsRef<Path>, linker: &Linker) -> Result<Arc<LinkedSchema>, FormatError> {
        let path = path.as_ref();
        let key = std::fs::canonicalize(path)
            .map_err(|e| FormatError::io(Some(&path.display().to_string()), e))?;
        let slot = self.lock()?.entry(key.clone()).or_default().clone();
        let schema = slot.get_or_try_init(|| {
            info!("compiling layout {}", key.display());
            let parsed = parse_file(&key)?;
            Ok::<_, FormatError>(Arc::new(linker.link(&parsed)?))
        })?;
        Ok(Arc::clone(schema))
    }

    /// Drop the entry for `path`; the next request recompiles it.
    pub fn invalidate(&self, path: impl AsRef<Path>) -> Result<bool, FormatError> {
        let key = std::fs::canonicalize(path.as_ref()).unwrap_or_else(|_| path.as_ref().to_path_buf());
        Ok(self.lock()?.remove(&key).is_some())
    }

    pub fn clear(&self) -> Result<(), FormatError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Layouts compiled successfully so far.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|m| m.values().filter(|slot| slot.get().is_some()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    const LAYOUT: &str = "file-type: Fixed\ntext-encoding: \"US-ASCII\"\nrecord-length: 3\n[R]\n1 a X(3)\n";

    fn layout_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn concurrent_requests_share_one_schema() {
        let file = layout_file(LAYOUT);
        let cache = Arc::new(SchemaCache::new());
        let linker = Arc::new(Linker::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let linker = Arc::clone(&linker);
                let path = file.path().to_path_buf();
                thread::spawn(move || cache.get_or_link(&path, &linker).unwrap())
            })
            .collect();
        let schemas: Vec<Arc<LinkedSchema>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(schemas.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let file = layout_file("file-type: Fixed\n[R]\n1 a X(3)\n");
        let cache = SchemaCache::new();
        let linker = Linker::default();
        assert!(cache.get_or_link(file.path(), &linker).is_err());
        assert!(cache.is_empty());
        std::fs::write(file.path(), LAYOUT).unwrap();
        assert!(cache.get_or_link(file.path(), &linker).is_ok());
        assert!(cache.invalidate(file.path()).unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SchemaCache::new()
            .get_or_link("/definitely/not/here.fmt", &Linker::default())
            .unwrap_err();
        assert!(matches!(err, FormatError::Io { .. }));
    }
}
