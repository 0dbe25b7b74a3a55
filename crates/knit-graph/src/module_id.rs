use std::borrow::Cow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Tag carried by the placeholder node of a foreign-compiled unit.
pub const FOREIGN_TAG: &str = "foreign";

/// Tag carried by nodes synthesized from a compiled artifact.
pub const COMPILED_TAG: &str = "compiled";

/// Canonical identifier for a module in the knit graph.
///
/// The identifier is an absolute, lexically cleaned path plus an optional tag.
/// Two specifiers that point at the same file from different importers
/// (`./a.js` vs `../src/a.js`) produce equal identifiers, while the tag keeps
/// synthesized modules (`pkg/app.js?compiled`) apart from files that happen to
/// share their path.
///
/// Cleaning is purely lexical: the filesystem is only ever reached through a
/// [`Runtime`](crate::runtime::Runtime) snapshot, so symlinks are not followed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    path: PathBuf,
    tag: Option<String>,
}

impl ModuleId {
    /// Create a new module identifier from an absolute filesystem path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ModuleIdError> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(ModuleIdError::EmptyPath);
        }

        if !path.is_absolute() {
            return Err(ModuleIdError::NotAbsolute(path.to_path_buf()));
        }

        Ok(Self {
            path: path.clean(),
            tag: None,
        })
    }

    /// Return a copy of this identifier carrying `tag`.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            path: self.path.clone(),
            tag: (!tag.is_empty()).then_some(tag),
        }
    }

    /// Returns the underlying path representation.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Returns the tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns `true` if the identifier was synthesized rather than read from disk.
    pub fn is_synthetic(&self) -> bool {
        self.tag.is_some()
    }

    /// File name without its final extension (`app_bg` for `pkg/app_bg.wasm`).
    pub fn file_stem(&self) -> Cow<'_, str> {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or(Cow::Borrowed("module"))
    }

    /// Extension without the dot, lowercased. Empty when the path has none.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Stable key relative to `root`, `/`-separated, with `?tag` appended.
    ///
    /// This is the spelling used in emitted output, so it must not depend on
    /// where the project happens to live on disk.
    pub fn key(&self, root: &Path) -> String {
        let relative = self.path.strip_prefix(root).unwrap_or(&self.path);

        let mut key = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    if !key.is_empty() {
                        key.push('/');
                    }
                    key.push_str(&part.to_string_lossy());
                }
                Component::ParentDir => {
                    if !key.is_empty() {
                        key.push('/');
                    }
                    key.push_str("..");
                }
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            }
        }

        if let Some(tag) = &self.tag {
            key.push('?');
            key.push_str(tag);
        }
        key
    }

    /// Borrow the identifier as a string for logging.
    pub fn path_string(&self) -> Cow<'_, str> {
        self.path.to_string_lossy()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}?{}", self.path_string(), tag),
            None => write!(f, "{}", self.path_string()),
        }
    }
}

impl Serialize for ModuleId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Error type for `ModuleId` construction failures.
#[derive(Debug, Error)]
pub enum ModuleIdError {
    /// The provided path was empty.
    #[error("module id path is empty")]
    EmptyPath,

    /// Module ids are always absolute; relative paths must be joined first.
    #[error("module id path must be absolute: '{}'", .0.display())]
    NotAbsolute(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_dot_components() {
        let a = ModuleId::new("/proj/src/../src/./a.js").unwrap();
        let b = ModuleId::new("/proj/src/a.js").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_and_relative() {
        assert!(matches!(ModuleId::new(""), Err(ModuleIdError::EmptyPath)));
        assert!(matches!(
            ModuleId::new("src/a.js"),
            Err(ModuleIdError::NotAbsolute(_))
        ));
    }

    #[test]
    fn tag_distinguishes_ids() {
        let plain = ModuleId::new("/proj/pkg/app.js").unwrap();
        let tagged = plain.with_tag(COMPILED_TAG);
        assert_ne!(plain, tagged);
        assert_eq!(tagged.tag(), Some("compiled"));
        assert!(tagged.is_synthetic());
        assert_eq!(tagged.to_string(), "/proj/pkg/app.js?compiled");
    }

    #[test]
    fn key_is_root_relative() {
        let root = Path::new("/proj");
        let id = ModuleId::new("/proj/src/components/button.js").unwrap();
        assert_eq!(id.key(root), "src/components/button.js");

        let unit = ModuleId::new("/proj/crate").unwrap().with_tag(FOREIGN_TAG);
        assert_eq!(unit.key(root), "crate?foreign");
    }

    #[test]
    fn key_outside_root_keeps_full_path() {
        let id = ModuleId::new("/elsewhere/lib.js").unwrap();
        assert_eq!(id.key(Path::new("/proj")), "elsewhere/lib.js");
    }

    #[test]
    fn stem_and_extension() {
        let id = ModuleId::new("/proj/pkg/App_bg.WASM").unwrap();
        assert_eq!(id.file_stem(), "App_bg");
        assert_eq!(id.extension(), "wasm");
    }

    #[test]
    fn serializes_as_string() {
        let id = ModuleId::new("/proj/a.js").unwrap().with_tag("x");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"/proj/a.js?x\"");
    }
}
