use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::extract::ExtractionRule;
use crate::naming;

pub mod defaults;

/// The full set of products to retrieve in one run.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Catalog {
    pub products: Vec<ProductSpec>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProductSpec {
    pub id: String,
    /// Stem of every local file name produced for this product.
    pub stem: String,
    pub format: OutputFormat,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub strategy: Strategy,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Png,
    Gif,
    Jpeg,
    Text,
    /// Text of the first `<pre>` element of an HTML page.
    PreText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Binary,
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Text | OutputFormat::PreText => "txt",
        }
    }

    pub fn mode(self) -> TransferMode {
        match self {
            OutputFormat::Png | OutputFormat::Gif | OutputFormat::Jpeg => TransferMode::Binary,
            OutputFormat::Text | OutputFormat::PreText => TransferMode::Text,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubIndex {
    Day(u32),
    Hour(u32),
    Name(String),
}

impl SubIndex {
    /// Number substituted for `{n}` in templates and rules.
    pub fn number(&self) -> Option<u32> {
        match self {
            SubIndex::Day(n) | SubIndex::Hour(n) => Some(*n),
            SubIndex::Name(_) => None,
        }
    }
}

impl fmt::Display for SubIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubIndex::Day(n) => write!(f, "d{}", n),
            SubIndex::Hour(n) => write!(f, "{}", n),
            SubIndex::Name(name) => write!(f, "{}", name.to_lowercase()),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexUnit {
    Day,
    Hour,
}

impl IndexUnit {
    pub fn sub_index(self, n: u32) -> SubIndex {
        match self {
            IndexUnit::Day => SubIndex::Day(n),
            IndexUnit::Hour => SubIndex::Hour(n),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Http { url: String },
    Ftp {
        host: String,
        directory: String,
        file: String,
    },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Http { url } => write!(f, "{}", url),
            Locator::Ftp {
                host,
                directory,
                file,
            } => write!(
                f,
                "ftp://{}/{}/{}",
                host,
                directory.trim_matches('/'),
                file
            ),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Strategy {
    /// Locators are already final.
    Direct { items: Vec<DirectItem> },
    /// `{n}` in `template` is replaced with every value of `range`.
    Templated {
        template: String,
        unit: IndexUnit,
        range: Vec<u32>,
    },
    /// Index pages are fetched and the real locator is derived from their content.
    Scraped {
        pages: Vec<IndexPage>,
        rule: ExtractionRule,
        build: LocatorBuild,
        #[serde(default)]
        fanout: Fanout,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DirectItem {
    #[serde(default)]
    pub sub: Option<SubIndex>,
    pub locator: Locator,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IndexPage {
    pub url: String,
    #[serde(default)]
    pub sub: Option<SubIndex>,
}

/// Turns an extracted token into the final URL.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LocatorBuild {
    /// Strip `strip` from the end of the index page URL and append `suffix`.
    Suffix { strip: String, suffix: String },
    /// Resolve `path` against `base`, or against the index page URL when absent.
    Join {
        #[serde(default)]
        base: Option<String>,
        path: String,
    },
}

/// How extracted tokens map onto sub-items.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Fanout {
    /// One token per index page, named after the page's sub-index.
    #[default]
    PerPage,
    /// The i-th candidate of a single page becomes `items[i]`.
    FirstN { items: Vec<SubIndex> },
    /// The first token of a single page is rewritten once per item.
    Replace {
        from: String,
        items: Vec<ReplaceItem>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReplaceItem {
    pub sub: SubIndex,
    pub to: String,
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("could not read catalog {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse catalog {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid product {id}: {reason}")]
    Invalid { id: String, reason: String },
    #[error("products {first} and {second} both write {key}")]
    Collision {
        first: String,
        second: String,
        key: String,
    },
}

impl Catalog {
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: display.clone(),
            source,
        })?;
        let catalog: Catalog = serde_json::from_str(&raw).map_err(|source| {
            CatalogError::Parse {
                path: display,
                source,
            }
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Checks structural constraints and that no two sub-items share a local name.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut ids = HashSet::new();
        let mut owners: BTreeMap<String, String> = BTreeMap::new();

        for product in &self.products {
            if !ids.insert(product.id.as_str()) {
                return Err(invalid(product, "duplicate product id"));
            }
            if product.stem.is_empty() {
                return Err(invalid(product, "empty stem"));
            }

            let subs = product.sub_indices();
            if subs.is_empty() {
                return Err(invalid(product, "produces no sub-items"));
            }
            if let Strategy::Templated { template, .. } = &product.strategy {
                if !template.contains("{n}") {
                    return Err(invalid(product, "template has no {n} placeholder"));
                }
            }

            for sub in subs {
                let key = naming::product_key(&product.stem, sub.as_ref());
                if let Some(first) = owners.get(&key) {
                    return Err(CatalogError::Collision {
                        first: first.clone(),
                        second: product.id.clone(),
                        key,
                    });
                }
                owners.insert(key, product.id.clone());
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ProductSpec> {
        self.products.iter().find(|p| p.id == id)
    }
}

impl ProductSpec {
    /// Every sub-item this product can produce, in catalog order.
    pub fn sub_indices(&self) -> Vec<Option<SubIndex>> {
        match &self.strategy {
            Strategy::Direct { items } => items.iter().map(|i| i.sub.clone()).collect(),
            Strategy::Templated { unit, range, .. } => {
                range.iter().map(|n| Some(unit.sub_index(*n))).collect()
            }
            Strategy::Scraped { pages, fanout, .. } => match fanout {
                Fanout::PerPage => pages.iter().map(|p| p.sub.clone()).collect(),
                Fanout::FirstN { items } => items.iter().cloned().map(Some).collect(),
                Fanout::Replace { items, .. } => {
                    items.iter().map(|i| Some(i.sub.clone())).collect()
                }
            },
        }
    }
}

fn invalid(product: &ProductSpec, reason: &str) -> CatalogError {
    CatalogError::Invalid {
        id: product.id.clone(),
        reason: reason.to_string(),
    }
}
