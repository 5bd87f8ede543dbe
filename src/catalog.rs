//! Declarative catalog of well-known downloads, selectable by name.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Category;
use crate::error::FetchError;
use crate::utils::get_filename_from_url;

const BUILTIN: &str = include_str!("../data/catalog.json");

#[derive(Debug, Deserialize)]
struct RawEntry {
    url: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Display name of the group the entry belongs to.
    pub name: String,
    pub url: String,
    pub filename: String,
}

impl CatalogEntry {
    pub fn to_token(&self, category: Category) -> String {
        format!("{}:{}[{}]", category, self.url, self.filename)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    groups: BTreeMap<Category, BTreeMap<String, Vec<CatalogEntry>>>,
}

impl Catalog {
    pub fn builtin() -> Result<Self, FetchError> {
        Self::parse(BUILTIN)
    }

    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("cannot read catalog {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, FetchError> {
        let raw: BTreeMap<String, BTreeMap<String, Vec<RawEntry>>> = serde_json::from_str(content)
            .map_err(|e| FetchError::Config(format!("invalid catalog: {}", e)))?;

        let mut groups = BTreeMap::new();
        for (key, entries) in raw {
            let category = Category::parse(&key)
                .ok_or_else(|| FetchError::Config(format!("unknown catalog category '{}'", key)))?;
            let mut named = BTreeMap::new();
            for (name, files) in entries {
                let files = files
                    .into_iter()
                    .map(|f| {
                        let filename = f
                            .name
                            .or_else(|| get_filename_from_url(&f.url))
                            .ok_or_else(|| FetchError::Config(format!("no filename for {}", f.url)))?;
                        Ok(CatalogEntry {
                            name: name.clone(),
                            url: f.url,
                            filename,
                        })
                    })
                    .collect::<Result<Vec<_>, FetchError>>()?;
                named.insert(name, files);
            }
            groups.insert(category, named);
        }
        Ok(Self { groups })
    }

    pub fn names(&self, category: Category) -> Vec<&str> {
        self.groups
            .get(&category)
            .map(|g| g.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn entries(&self, category: Category, name: &str) -> Option<&[CatalogEntry]> {
        self.groups
            .get(&category)?
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, files)| files.as_slice())
    }

    /// Expands `category:name` picks into batch tokens. `category:*` selects
    /// every group of the category.
    pub fn tokens_for(&self, picks: &[String]) -> Result<Vec<String>, FetchError> {
        let mut tokens = Vec::new();
        for pick in picks {
            let (key, name) = pick
                .split_once(':')
                .ok_or_else(|| FetchError::Config(format!("catalog pick '{}' is not category:name", pick)))?;
            let category = Category::parse(key)
                .ok_or_else(|| FetchError::Config(format!("unknown catalog category '{}'", key)))?;
            let name = name.trim();

            if name == "*" {
                for files in self.groups.get(&category).into_iter().flat_map(|g| g.values()) {
                    tokens.extend(files.iter().map(|e| e.to_token(category)));
                }
                continue;
            }
            let files = self
                .entries(category, name)
                .ok_or_else(|| FetchError::Config(format!("no catalog entry '{}' in {}", name, category)))?;
            tokens.extend(files.iter().map(|e| e.to_token(category)));
        }
        Ok(tokens)
    }
}
