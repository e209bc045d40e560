use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::constants::MARKER_ICON_SIZE;

/// Errors produced while turning a URL into a marker icon.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("decode task failed: {0}")]
    Join(String),
}

/// A decoded image ready to be used as a marker icon, stored as PNG bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerIcon {
    png: Arc<[u8]>,
    width: u32,
    height: u32,
}

impl MarkerIcon {
    /// Scales the image down to fit `max_size` (never up) and encodes it as PNG.
    pub fn from_image(img: DynamicImage, max_size: u32) -> Result<Self, FetchError> {
        let (width, height) = img.dimensions();
        let img = if width > max_size || height > max_size {
            // Triangle filter is plenty for icon-sized output
            img.resize(max_size, max_size, image::imageops::FilterType::Triangle)
        } else {
            img
        };

        let (width, height) = img.dimensions();
        let mut png = Vec::new();
        img.to_rgba8()
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        Ok(Self {
            png: png.into(),
            width,
            height,
        })
    }

    pub fn decode(bytes: &[u8], max_size: u32) -> Result<Self, FetchError> {
        let img = image::load_from_memory(bytes)?;
        Self::from_image(img, max_size)
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn png_shared(&self) -> Arc<[u8]> {
        Arc::clone(&self.png)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Resolves an image URL to a decoded marker icon.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<MarkerIcon, FetchError>> + Send;
}

/// Fetches images over HTTP and decodes them off the async workers.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
    icon_size: u32,
}

impl HttpImageFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            icon_size: MARKER_ICON_SIZE,
        })
    }

    pub fn with_icon_size(mut self, icon_size: u32) -> Self {
        self.icon_size = icon_size;
        self
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<MarkerIcon, FetchError>> + Send {
        let client = self.client.clone();
        let icon_size = self.icon_size;
        let url = url.to_string();

        async move {
            let response = client.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url,
                    status: status.as_u16(),
                });
            }

            let bytes = response.bytes().await?;
            debug!(%url, bytes = bytes.len(), "image downloaded");

            tokio::task::spawn_blocking(move || MarkerIcon::decode(&bytes, icon_size))
                .await
                .map_err(|e| FetchError::Join(e.to_string()))?
        }
    }
}
