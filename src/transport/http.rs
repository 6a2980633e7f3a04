use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, Url,
};
use slog::{debug, Logger};

use super::{ftp::FtpSession, Transport, TransportError};
use crate::cli::Cli;

/// HTTP(S) through reqwest, FTP through a single [`FtpSession`] per run.
pub struct NetTransport {
    client: Client,
    ftp: FtpSession,
    log: Logger,
}

impl NetTransport {
    pub fn from_cli(cli: &Cli, log: Logger) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.append(
            "user-agent",
            HeaderValue::from_str(&cli.user_agent).map_err(|e| TransportError::Invalid {
                locator: "user-agent".to_string(),
                reason: e.to_string(),
            })?,
        );

        let timeout = Duration::from_secs(cli.timeout_secs);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(cli.connect_timeout_secs))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Invalid {
                locator: "http client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            ftp: FtpSession::new(timeout, log.clone()),
            log,
        })
    }

    /// Ends the FTP session, if one was opened.
    pub async fn close(&self) {
        self.ftp.close().await;
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, TransportError> {
        debug!(self.log, "GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Request {
                locator: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                locator: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl Transport for NetTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let bytes = self
            .send(url)
            .await?
            .bytes()
            .await
            .map_err(|e| TransportError::Request {
                locator: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(self.log, "Received {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn get_text(&self, url: &Url) -> Result<String, TransportError> {
        self.send(url)
            .await?
            .text()
            .await
            .map_err(|e| TransportError::Request {
                locator: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn retrieve_ftp(
        &self,
        host: &str,
        directory: &str,
        file: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.ftp.retrieve(host, directory, file).await
    }
}
