//! Hand-off to the briefing renderer: the fetch result plus a title and
//! generation time, written next to the product files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::orchestrator::FetchResult;

pub const MANIFEST_NAME: &str = "briefing.json";

#[derive(Serialize, Debug)]
pub struct Briefing<'a> {
    pub title: String,
    pub generated: String,
    /// Products missing from this map were unavailable this cycle.
    pub products: &'a FetchResult,
}

/// e.g. `07 Apr 2020 1315z`
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%d %b %Y %H%Mz").to_string()
}

impl<'a> Briefing<'a> {
    pub fn new(products: &'a FetchResult, now: DateTime<Utc>) -> Self {
        let generated = timestamp(now);
        Self {
            title: format!("Weather Brief - {}", generated),
            generated,
            products,
        }
    }

    pub async fn write(&self, out_dir: &Path) -> std::io::Result<PathBuf> {
        let path = out_dir.join(MANIFEST_NAME);
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::create_dir_all(out_dir).await?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}
