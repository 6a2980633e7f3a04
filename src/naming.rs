//! Local file names for retrieved products.
//!
//! The same functions are used when writing files and when the briefing
//! manifest is assembled, so both sides always agree on where a product lives.

use std::path::{Path, PathBuf};

use crate::catalog::{OutputFormat, SubIndex};

/// Key under which a product (or one of its sub-items) appears in the fetch result.
pub fn product_key(stem: &str, sub: Option<&SubIndex>) -> String {
    match sub {
        Some(sub) => format!("{}_{}", stem, sub),
        None => stem.to_string(),
    }
}

pub fn local_path(
    dir: &Path,
    stem: &str,
    sub: Option<&SubIndex>,
    format: OutputFormat,
) -> PathBuf {
    dir.join(format!(
        "{}.{}",
        product_key(stem, sub),
        format.extension()
    ))
}
