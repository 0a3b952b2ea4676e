use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use thiserror::Error;

/// Binary-encoded raster ready to be sent to a model.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl EncodedImage {
    pub fn jpeg(image: &RgbImage, quality: u8) -> Result<Self, image::ImageError> {
        let mut bytes = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality.clamp(1, 100));
        image.write_with_encoder(encoder)?;
        Ok(Self {
            bytes,
            mime_type: "image/jpeg",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub include_thoughts: bool,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_id: String,
    pub image: EncodedImage,
    pub prompt: String,
    pub config: GenerationConfig,
}

/// Failure of a single model call, classified once at the engine boundary.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("rate limited ({status}): {message}")]
    RateLimited { status: u16, message: String },
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("unknown model error: {0}")]
    Unknown(String),
}

impl ModelError {
    /// Maps an HTTP status to the failure taxonomy. Non-error statuses are
    /// treated as unknown.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { status, message },
            500..=599 => Self::Server { status, message },
            400..=499 => Self::Client { status, message },
            _ => Self::Unknown(format!("unexpected status {status}: {message}")),
        }
    }
}

/// An external generative model that turns an image plus prompt into text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, credential: &str, request: &ModelRequest) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(ModelError::from_status(429, "slow down"), ModelError::RateLimited { .. }));
        assert!(matches!(ModelError::from_status(503, "busy"), ModelError::Server { status: 503, .. }));
        assert!(matches!(ModelError::from_status(400, "bad"), ModelError::Client { .. }));
        assert!(matches!(ModelError::from_status(404, "gone"), ModelError::Client { .. }));
        assert!(matches!(ModelError::from_status(302, "moved"), ModelError::Unknown(_)));
    }

    #[test]
    fn test_jpeg_encoding() {
        let img = RgbImage::from_pixel(16, 8, image::Rgb([10, 20, 30]));
        let encoded = EncodedImage::jpeg(&img, 90).unwrap();
        assert_eq!(encoded.mime_type, "image/jpeg");
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
    }

    struct Echo;

    #[async_trait]
    impl VisionModel for Echo {
        async fn generate(&self, credential: &str, request: &ModelRequest) -> Result<String, ModelError> {
            Ok(format!("{credential}:{}", request.prompt))
        }
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let model: Box<dyn VisionModel> = Box::new(Echo);
        let img = RgbImage::new(4, 4);
        let request = ModelRequest {
            model_id: "m".to_string(),
            image: EncodedImage::jpeg(&img, 80).unwrap(),
            prompt: "hi".to_string(),
            config: GenerationConfig::default(),
        };
        assert_eq!(model.generate("k1", &request).await.unwrap(), "k1:hi");
    }
}
