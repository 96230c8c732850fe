use std::io::Cursor;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use persona_contracts::characters::{portrait_prompt, ImagePayload, PORTRAIT_ASPECT_RATIO};
use persona_contracts::providers::NamedProvider;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::gemini::{candidate_parts, GeminiClient};

const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: String,
}

impl ImageRequest {
    /// Square portrait request for a profile's visual prompt, style
    /// qualifiers appended.
    pub fn portrait(model: &str, visual_prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: portrait_prompt(visual_prompt),
            aspect_ratio: PORTRAIT_ASPECT_RATIO.to_string(),
        }
    }
}

pub trait ImageProvider: NamedProvider + Send + Sync {
    fn generate_image(&self, request: &ImageRequest) -> Result<ImagePayload>;
}

pub struct GeminiImageProvider {
    client: Arc<GeminiClient>,
}

impl GeminiImageProvider {
    pub fn new(client: Arc<GeminiClient>) -> Self {
        Self { client }
    }

    fn build_payload(request: &ImageRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": request.aspect_ratio },
            },
        })
    }

    /// First part, across every candidate, that carries inline image data.
    fn extract_first_image(response_payload: &Value) -> Result<ImagePayload> {
        let parts = candidate_parts(response_payload);
        if parts.is_empty() {
            bail!("No content parts in image response");
        }
        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|value| value.starts_with("image/"))
                .unwrap_or(DEFAULT_IMAGE_MIME);
            return Ok(ImagePayload {
                mime_type: mime_type.to_string(),
                data_base64: data.to_string(),
            });
        }
        bail!("No image data found in response")
    }
}

impl NamedProvider for GeminiImageProvider {
    fn name(&self) -> &str {
        "gemini"
    }
}

impl ImageProvider for GeminiImageProvider {
    fn generate_image(&self, request: &ImageRequest) -> Result<ImagePayload> {
        let payload = Self::build_payload(request);
        let response_payload = self.client.generate_content(&request.model, &payload)?;
        Self::extract_first_image(&response_payload)
    }
}

const DRYRUN_SIDE_PX: u32 = 64;

/// Solid-color square PNG whose color is a hash of the prompt.
pub struct DryrunImageProvider;

impl NamedProvider for DryrunImageProvider {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl ImageProvider for DryrunImageProvider {
    fn generate_image(&self, request: &ImageRequest) -> Result<ImagePayload> {
        let (r, g, b) = color_from_prompt(&request.prompt);
        let image = RgbImage::from_pixel(DRYRUN_SIDE_PX, DRYRUN_SIDE_PX, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun portrait encode failed")?;
        Ok(ImagePayload {
            mime_type: DEFAULT_IMAGE_MIME.to_string(),
            data_base64: BASE64.encode(bytes),
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}
