use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

/// Supplies raw bytes of named shader and fragment sources.
pub trait SourceLoader: Send {
    fn read_bytes(&mut self, name: &str) -> io::Result<Vec<u8>>;
}

/// Reads sources relative to a root directory.
#[derive(Debug, Clone)]
pub struct FileSourceLoader {
    root_path: PathBuf,
}

impl FileSourceLoader {
    /// A file path uses its parent directory as root.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let root_path = if path.is_file() {
            path.parent().unwrap_or(Path::new(".")).to_path_buf()
        } else {
            path.to_path_buf()
        };
        Self { root_path }
    }

    #[inline]
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

impl SourceLoader for FileSourceLoader {
    fn read_bytes(&mut self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.root_path.join(name))
    }
}

/// In-memory sources, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceLoader {
    sources: FxHashMap<String, Vec<u8>>,
    reads: usize,
}

impl MemorySourceLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, source: impl Into<Vec<u8>>) -> Self {
        self.insert(name, source);
        self
    }

    /// Adds or replaces a source.
    pub fn insert(&mut self, name: &str, source: impl Into<Vec<u8>>) {
        self.sources.insert(name.to_string(), source.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.sources.remove(name).is_some()
    }

    /// Number of successful reads so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl SourceLoader for MemorySourceLoader {
    fn read_bytes(&mut self, name: &str) -> io::Result<Vec<u8>> {
        let bytes = self.sources.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no source named '{name}'"))
        })?;
        self.reads += 1;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_loader() {
        let mut loader = MemorySourceLoader::new().with("a.glsl", "void a();");
        assert_eq!(loader.read_bytes("a.glsl").unwrap(), b"void a();");
        assert_eq!(
            loader.read_bytes("missing").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(loader.reads(), 1);

        loader.insert("a.glsl", "void b();");
        assert_eq!(loader.read_bytes("a.glsl").unwrap(), b"void b();");
    }

    #[test]
    fn test_file_loader_reads_relative_to_root() {
        let dir = std::env::temp_dir().join(format!("prism_loader_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("lib")).unwrap();
        std::fs::write(dir.join("lib/common.glsl"), "float saturate(float x);").unwrap();

        let mut loader = FileSourceLoader::new(&dir);
        assert_eq!(loader.root_path(), dir.as_path());
        assert_eq!(
            loader.read_bytes("lib/common.glsl").unwrap(),
            b"float saturate(float x);"
        );
        assert!(loader.read_bytes("lib/none.glsl").is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
