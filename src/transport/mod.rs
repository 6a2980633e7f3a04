use reqwest::Url;

use crate::catalog::Locator;

pub mod ftp;
pub mod http;

/// Network access used by resolvers and the orchestrator. Implementations
/// never write to disk.
pub trait Transport {
    /// Body of a successful (2xx) response.
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError>;

    async fn get_text(&self, url: &Url) -> Result<String, TransportError>;

    /// Binary-mode retrieval of `directory/file` from `host`.
    async fn retrieve_ftp(
        &self,
        host: &str,
        directory: &str,
        file: &str,
    ) -> Result<Vec<u8>, TransportError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid locator {locator}: {reason}")]
    Invalid { locator: String, reason: String },
    #[error("{locator} returned status {status}")]
    Status { locator: String, status: u16 },
    #[error("request to {locator} failed: {reason}")]
    Request { locator: String, reason: String },
    #[error("ftp transfer of {locator} failed: {reason}")]
    Ftp { locator: String, reason: String },
}

/// Fetches the bytes behind a resolved locator.
pub async fn fetch<T: Transport>(transport: &T, locator: &Locator) -> Result<Vec<u8>, TransportError> {
    match locator {
        Locator::Http { url } => {
            let url = Url::parse(url).map_err(|e| TransportError::Invalid {
                locator: url.clone(),
                reason: e.to_string(),
            })?;
            transport.get(&url).await
        }
        Locator::Ftp {
            host,
            directory,
            file,
        } => transport.retrieve_ftp(host, directory, file).await,
    }
}
