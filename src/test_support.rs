//! In-memory transport and helpers shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::Url;
use slog::{o, Discard, Logger};

use crate::transport::{Transport, TransportError};

pub fn discard_logger() -> Logger {
    Logger::root(Discard, o!())
}

enum Reply {
    Body(Vec<u8>),
    Status(u16),
}

/// Serves canned replies keyed by URL (or `ftp://host/dir/file`); anything
/// else is a 404.
#[derive(Default)]
pub struct FakeTransport {
    replies: HashMap<String, Reply>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.with_bytes(url, body.as_bytes().to_vec())
    }

    pub fn with_bytes(mut self, url: &str, body: Vec<u8>) -> Self {
        self.replies.insert(url.to_string(), Reply::Body(body));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.replies.insert(url.to_string(), Reply::Status(status));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply(&self, locator: &str) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.get(locator) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Status(status)) => Err(TransportError::Status {
                locator: locator.to_string(),
                status: *status,
            }),
            None => Err(TransportError::Status {
                locator: locator.to_string(),
                status: 404,
            }),
        }
    }
}

impl Transport for FakeTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        self.reply(url.as_str())
    }

    async fn get_text(&self, url: &Url) -> Result<String, TransportError> {
        let body = self.reply(url.as_str())?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn retrieve_ftp(
        &self,
        host: &str,
        directory: &str,
        file: &str,
    ) -> Result<Vec<u8>, TransportError> {
        self.reply(&format!(
            "ftp://{}/{}/{}",
            host,
            directory.trim_matches('/'),
            file
        ))
    }
}

/// Encodes a 2x2 image in `format`.
pub fn tiny_image(format: image::ImageFormat) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        2,
        2,
        image::Rgba([200, 30, 30, 255]),
    ));
    let img = match format {
        image::ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("can encode test image");
    out.into_inner()
}
