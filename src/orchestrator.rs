use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use serde::Serialize;
use slog::{error, info, o, warn, Logger};
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, OutputFormat, ProductSpec, TransferMode};
use crate::extract::{self, ExtractionFailure};
use crate::resolver::{self, FetchTarget};
use crate::transport::{self, Transport, TransportError};

/// Product key to the freshly written local file. A missing key means the
/// product is unavailable this cycle.
pub type FetchResult = BTreeMap<String, PathBuf>;

#[derive(Serialize, Debug, Default)]
pub struct RunReport {
    pub entries: Vec<ReportEntry>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub product: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Fetched { path: PathBuf },
    Skipped,
    Failed { reason: String },
}

impl RunReport {
    fn push(&mut self, product: &str, key: Option<String>, outcome: Outcome) {
        self.entries.push(ReportEntry {
            product: product.to_string(),
            key,
            outcome,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
    }

    pub fn fetched(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Fetched { .. }))
            .count()
    }
}

/// Which products the caller wants this run.
#[derive(Debug, Default, Clone)]
pub struct Selection {
    pub only: Vec<String>,
    pub skip: Vec<String>,
}

impl Selection {
    /// Products disabled in the catalog only run when named in `only`.
    pub fn allows(&self, product: &ProductSpec) -> bool {
        let named = self.only.iter().any(|id| *id == product.id);
        if self.skip.iter().any(|id| *id == product.id) {
            return false;
        }
        if self.only.is_empty() {
            product.enabled
        } else {
            named
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("payload for {key} is not a valid {format:?} image: {reason}")]
    Image {
        key: String,
        format: OutputFormat,
        reason: String,
    },
    #[error("payload for {key} has no text block: {source}")]
    Text {
        key: String,
        #[source]
        source: ExtractionFailure,
    },
    #[error("could not write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
enum RetrieveError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Retrieves every selected product in catalog order. Failures are recorded
/// per product (or sub-item) and never stop the run.
pub async fn run<T: Transport>(
    catalog: &Catalog,
    transport: &T,
    out_dir: &Path,
    selection: &Selection,
    token: &CancellationToken,
    log: &Logger,
) -> (FetchResult, RunReport) {
    let mut result = FetchResult::new();
    let mut report = RunReport::default();

    for product in &catalog.products {
        let log = log.new(o!("product" => product.id.clone()));

        if !selection.allows(product) {
            info!(log, "Skipping disabled product");
            report.push(&product.id, None, Outcome::Skipped);
            continue;
        }
        if token.is_cancelled() {
            report.push(
                &product.id,
                None,
                Outcome::Failed {
                    reason: "run cancelled".to_string(),
                },
            );
            continue;
        }

        info!(log, "Fetching {}...", product.id);
        let resolution = match resolver::resolve(product, transport, out_dir, &log).await {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(log, "Resolution failed"; "cause" => %e);
                report.push(
                    &product.id,
                    None,
                    Outcome::Failed {
                        reason: e.to_string(),
                    },
                );
                continue;
            }
        };

        for failure in resolution.failures {
            report.push(
                &product.id,
                Some(failure.key),
                Outcome::Failed {
                    reason: failure.reason,
                },
            );
        }

        for target in resolution.targets {
            match retrieve(transport, &target).await {
                Ok(()) => {
                    info!(log, "Saved {}", target.dest.display(); "key" => &target.key);
                    report.push(
                        &product.id,
                        Some(target.key.clone()),
                        Outcome::Fetched {
                            path: target.dest.clone(),
                        },
                    );
                    result.insert(target.key, target.dest);
                }
                Err(e) => {
                    error!(log, "Retrieval failed";
                        "key" => &target.key, "locator" => %target.locator, "cause" => %e);
                    report.push(
                        &product.id,
                        Some(target.key),
                        Outcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        warn!(log, "{} item(s) failed this run", failed);
    }
    (result, report)
}

async fn retrieve<T: Transport>(transport: &T, target: &FetchTarget) -> Result<(), RetrieveError> {
    let payload = transport::fetch(transport, &target.locator).await?;
    let data = convert(target, payload)?;
    write_atomic(&target.dest, &data).await?;
    Ok(())
}

/// Validates the payload against the declared format, re-encoding images
/// that arrive in a different one.
fn convert(target: &FetchTarget, payload: Vec<u8>) -> Result<Vec<u8>, PersistError> {
    match target.mode() {
        TransferMode::Text => text_payload(target, payload),
        TransferMode::Binary => image_payload(target, payload),
    }
}

fn text_payload(target: &FetchTarget, payload: Vec<u8>) -> Result<Vec<u8>, PersistError> {
    let text = String::from_utf8_lossy(&payload);
    if target.format != OutputFormat::PreText {
        return Ok(text.into_owned().into_bytes());
    }
    let mut block = extract::pre_text(&text).map_err(|source| PersistError::Text {
        key: target.key.clone(),
        source,
    })?;
    block.push('\n');
    Ok(block.into_bytes())
}

fn image_payload(target: &FetchTarget, payload: Vec<u8>) -> Result<Vec<u8>, PersistError> {
    let image_error = |reason: String| PersistError::Image {
        key: target.key.clone(),
        format: target.format,
        reason,
    };

    let wanted = match target.format {
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Gif => ImageFormat::Gif,
        _ => ImageFormat::Jpeg,
    };

    let found = image::guess_format(&payload).map_err(|e| image_error(e.to_string()))?;
    if found == wanted {
        image::load_from_memory_with_format(&payload, wanted)
            .map_err(|e| image_error(e.to_string()))?;
        return Ok(payload);
    }

    let decoded = image::load_from_memory_with_format(&payload, found)
        .map_err(|e| image_error(e.to_string()))?;
    let decoded = match wanted {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(decoded.to_rgb8()),
        _ => decoded,
    };
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, wanted)
        .map_err(|e| image_error(e.to_string()))?;
    Ok(out.into_inner())
}

/// Writes to a sibling `.part` file and renames it over `dest`.
async fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), PersistError> {
    let io_error = |source: std::io::Error| PersistError::Io {
        path: dest.display().to_string(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    if let Err(e) = tokio::fs::write(&part, data).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(io_error(e));
    }
    if let Err(e) = tokio::fs::rename(&part, dest).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(io_error(e));
    }
    Ok(())
}
