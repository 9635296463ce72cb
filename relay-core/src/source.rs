//! 清单来源
//!
//! Where Load finds manifest text. Built-in libraries live in memory under
//! `builtin://<assembly>`; everything else is read from disk below a
//! configured root.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Error type for source operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("manifest not found: {location}")]
    NotFound { location: String },

    #[error("invalid manifest location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io {
            message: err.to_string(),
        }
    }
}

/// Resolves a manifest location to its JSON text
pub trait ManifestSource {
    fn fetch(&self, location: &str) -> SourceResult<String>;
}

/// In-memory manifests keyed by location
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    manifests: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, text: impl Into<String>) {
        self.manifests.insert(location.into(), text.into());
    }
}

impl ManifestSource for MemorySource {
    fn fetch(&self, location: &str) -> SourceResult<String> {
        self.manifests
            .get(location)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                location: location.to_string(),
            })
    }
}

/// Manifests on disk, addressed relative to `root`
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locations may not escape the root
    fn resolve(&self, location: &str) -> SourceResult<PathBuf> {
        let relative = Path::new(location);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(SourceError::InvalidLocation {
                        location: location.to_string(),
                        reason: "must be a relative path inside the manifest root".into(),
                    })
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl ManifestSource for FileSource {
    fn fetch(&self, location: &str) -> SourceResult<String> {
        let path = self.resolve(location)?;
        std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound {
                    location: location.to_string(),
                }
            } else {
                e.into()
            }
        })
    }
}

/// Tries each source in order; the first that has the location wins
///
/// Layers are borrowed, so a lookup can stack sources owned elsewhere.
#[derive(Default)]
pub struct LayeredSource<'a> {
    layers: Vec<&'a dyn ManifestSource>,
}

impl<'a> LayeredSource<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, source: &'a dyn ManifestSource) -> Self {
        self.layers.push(source);
        self
    }
}

impl ManifestSource for LayeredSource<'_> {
    fn fetch(&self, location: &str) -> SourceResult<String> {
        for layer in &self.layers {
            match layer.fetch(location) {
                Err(SourceError::NotFound { .. }) => continue,
                other => return other,
            }
        }
        Err(SourceError::NotFound {
            location: location.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::new();
        source.insert("builtin://calc", "{}");
        assert_eq!(source.fetch("builtin://calc").unwrap(), "{}");
        assert!(matches!(
            source.fetch("builtin://nope"),
            Err(SourceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_file_source_reads_below_root() {
        let root = std::env::temp_dir().join(format!("relay-source-{}", std::process::id()));
        std::fs::create_dir_all(root.join("libs")).unwrap();
        std::fs::write(root.join("libs/demo.json"), r#"{"name":"demo"}"#).unwrap();

        let source = FileSource::new(&root);
        assert_eq!(source.fetch("libs/demo.json").unwrap(), r#"{"name":"demo"}"#);
        assert!(matches!(
            source.fetch("libs/missing.json"),
            Err(SourceError::NotFound { .. })
        ));
        assert!(matches!(
            source.fetch("../etc/passwd"),
            Err(SourceError::InvalidLocation { .. })
        ));
        assert!(matches!(
            source.fetch("/etc/passwd"),
            Err(SourceError::InvalidLocation { .. })
        ));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_layered_source_order() {
        let mut first = MemorySource::new();
        first.insert("a.json", "first");
        let mut second = MemorySource::new();
        second.insert("a.json", "second");
        second.insert("b.json", "only");
        let layered = LayeredSource::new().layer(&first).layer(&second);

        assert_eq!(layered.fetch("a.json").unwrap(), "first");
        assert_eq!(layered.fetch("b.json").unwrap(), "only");
        assert!(layered.fetch("c.json").is_err());
    }
}
