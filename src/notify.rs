//! Notification sinks.
//!
//! A sink accepts either an in-memory image buffer or an image URL, plus a
//! caption. The bot sink speaks a Telegram-style `sendPhoto` endpoint:
//! URL photos go out as a form post, in-memory crops as multipart uploads.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};
use log::info;

/// Photo payload for a notification.
pub enum Photo<'a> {
    Bytes(&'a [u8]),
    Location(&'a str),
}

pub trait NotificationSink {
    fn send_photo(&mut self, photo: Photo<'_>, caption: &str) -> Result<()>;
}

/// Encode a pixel buffer as JPEG for upload.
pub fn encode_jpeg(pixels: &RgbImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(pixels.clone())
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .context("encode jpeg for notification")?;
    Ok(cursor.into_inner())
}

/// HTTP bot sink.
pub struct BotSink {
    agent: ureq::Agent,
    endpoint: String,
    chat_id: String,
}

const MULTIPART_BOUNDARY: &str = "----spoilerd-photo-7f3a9c51d2e8b604";

impl BotSink {
    pub fn new(endpoint: impl Into<String>, chat_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .build(),
            endpoint: endpoint.into(),
            chat_id: chat_id.into(),
        }
    }

    fn send_url(&self, photo_url: &str, caption: &str) -> Result<()> {
        self.agent
            .post(&format!("{}/sendPhoto", self.endpoint))
            .send_form(&[
                ("chat_id", self.chat_id.as_str()),
                ("photo", photo_url),
                ("caption", caption),
                ("parse_mode", "HTML"),
            ])
            .context("send photo url to bot endpoint")?;
        Ok(())
    }

    fn send_bytes(&self, bytes: &[u8], caption: &str) -> Result<()> {
        let body = multipart_body(&self.chat_id, caption, bytes);
        self.agent
            .post(&format!("{}/sendPhoto", self.endpoint))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .send_bytes(&body)
            .context("upload photo to bot endpoint")?;
        Ok(())
    }
}

impl NotificationSink for BotSink {
    fn send_photo(&mut self, photo: Photo<'_>, caption: &str) -> Result<()> {
        match photo {
            Photo::Location(url) => self.send_url(url, caption),
            Photo::Bytes(bytes) => self.send_bytes(bytes, caption),
        }
    }
}

fn multipart_body(chat_id: &str, caption: &str, photo: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(photo.len() + 512);
    for (name, value) in [
        ("chat_id", chat_id),
        ("caption", caption),
        ("parse_mode", "HTML"),
    ] {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"card.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(photo);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Logs captions instead of delivering them. Used when no bot endpoint is
/// configured.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send_photo(&mut self, photo: Photo<'_>, caption: &str) -> Result<()> {
        let target = match photo {
            Photo::Bytes(bytes) => format!("{} byte photo", bytes.len()),
            Photo::Location(url) => url.to_string(),
        };
        info!("spoiler ready ({target}): {caption}");
        Ok(())
    }
}

/// Collects notifications for tests.
#[derive(Default)]
pub struct MemorySink {
    pub sent: Vec<(String, String)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for MemorySink {
    fn send_photo(&mut self, photo: Photo<'_>, caption: &str) -> Result<()> {
        let target = match photo {
            Photo::Bytes(bytes) => format!("bytes:{}", bytes.len()),
            Photo::Location(url) => format!("url:{url}"),
        };
        self.sent.push((target, caption.to_string()));
        Ok(())
    }
}
