use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two parallel collections mirrored from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Plugins,
    Themes,
}

impl CatalogKind {
    /// Directory and URL name, e.g. `plugins`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plugins => "plugins",
            Self::Themes => "themes",
        }
    }

    /// Singular form used by the downloads host, e.g. `plugin`.
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Plugins => "plugin",
            Self::Themes => "theme",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque slug identifying one package in a catalog.
/// Equality is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogItem(String);

impl CatalogItem {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the slug can be used as a single path component.
    pub fn is_path_safe(&self) -> bool {
        let slug = self.0.as_str();
        !slug.is_empty()
            && slug != "."
            && slug != ".."
            && !slug.contains(['/', '\\', '\0'])
    }
}

impl fmt::Display for CatalogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CatalogItem {
    fn from(slug: &str) -> Self {
        Self::new(slug)
    }
}

/// Which files of each item get downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// The full distributable archive.
    #[default]
    All,
    /// Only the readme.
    Readme,
}

impl FileType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(Self::All),
            "readme" => Some(Self::Readme),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Readme => write!(f, "readme"),
        }
    }
}

/// Drop repeated items, keeping the first occurrence of each.
pub fn dedup_items<I>(items: I) -> Vec<CatalogItem>
where
    I: IntoIterator<Item = CatalogItem>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
