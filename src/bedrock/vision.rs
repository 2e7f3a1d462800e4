//! Claude vision: text plus base64 images in one Messages request.
//!
//! Every image is decoded, scaled down so its longest side fits
//! `max_image_size`, and re-encoded as JPEG (quality 85, or 95 for `high`)
//! before it is sent. Data that does not decode is rejected up front.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::BedrockError;
use super::claude::{CompletionOptions, Content, ContentBlock, Message};
use super::llm::LlmProvider;
use crate::config::BedrockConfig;

const SUPPORTED_FORMATS: [&str; 5] = ["JPEG", "PNG", "GIF", "BMP", "WEBP"];

/// Media type of every prepared image.
pub const PREPARED_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

#[derive(Clone)]
pub struct VisionProvider {
    llm: LlmProvider,
    max_image_size: u32,
    jpeg_quality: u8,
}

impl VisionProvider {
    pub fn new(llm: LlmProvider, config: &BedrockConfig) -> Self {
        Self { llm, max_image_size: config.max_image_size, jpeg_quality: config.jpeg_quality() }
    }

    pub async fn analyze_image(
        &self,
        prompt: &str,
        image_base64: &str,
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        self.analyze_multiple_images(prompt, &[image_base64], system, opts).await
    }

    /// One text block followed by one image block per image.
    pub async fn analyze_multiple_images(
        &self,
        prompt: &str,
        images: &[&str],
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let mut blocks = vec![ContentBlock::text(prompt)];
        for img in images {
            blocks.push(self.image_block(img)?);
        }
        self.send(vec![Message::user(blocks)], system, opts, "analyze_image").await
    }

    /// Chat-style messages whose content is a string or a list of `text` and
    /// `image_url` items. A `system` message becomes the system prompt.
    pub async fn analyze_multimodal_messages(
        &self,
        messages: &[Value],
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let (system, messages) = self.convert_messages(messages)?;
        self.send(messages, system.as_deref(), opts, "analyze_multimodal").await
    }

    async fn send(
        &self,
        messages: Vec<Message>,
        system: Option<&str>,
        opts: &CompletionOptions,
        operation: &str,
    ) -> Result<String, BedrockError> {
        let model_id = opts.model_id.clone().unwrap_or_else(|| self.llm.default_model().to_string());
        let request = self.llm.request_for(messages, system, opts);
        self.llm
            .send(&model_id, &request, operation)
            .await
            .map_err(|e| image_validation_error(&model_id, e))
    }

    /// `true` when the data decodes, is a supported format, and its longest
    /// side is within twice the configured maximum.
    pub fn validate_image_data(&self, image_base64: &str) -> bool {
        let Some(info) = image_info(image_base64) else {
            error!("invalid image data");
            return false;
        };
        if info.width.max(info.height) > self.max_image_size.saturating_mul(2) {
            warn!(width = info.width, height = info.height, "image size exceeds recommended maximum");
            return false;
        }
        if !SUPPORTED_FORMATS.contains(&info.format) {
            warn!(format = info.format, "unsupported image format");
            return false;
        }
        true
    }

    /// [`prepare_image`] with this provider's size limit and quality.
    pub fn prepare(&self, image_base64: &str) -> Result<String, BedrockError> {
        prepare_image(image_base64, self.max_image_size, self.jpeg_quality)
    }

    fn image_block(&self, data: &str) -> Result<ContentBlock, BedrockError> {
        Ok(ContentBlock::image_base64(PREPARED_MEDIA_TYPE, self.prepare(data)?))
    }

    fn convert_messages(&self, messages: &[Value]) -> Result<(Option<String>, Vec<Message>), BedrockError> {
        let mut system = None;
        let mut out = Vec::new();
        for m in messages {
            let Some(obj) = m.as_object() else { continue };
            let role = obj.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = match obj.get("content") {
                Some(Value::String(s)) => Some(Content::Text(s.clone())),
                Some(Value::Array(items)) => {
                    let mut blocks = Vec::new();
                    for item in items {
                        if let Some(block) = self.convert_item(item)? {
                            blocks.push(block);
                        }
                    }
                    (!blocks.is_empty()).then_some(Content::Blocks(blocks))
                }
                _ => None,
            };
            let Some(content) = content else { continue };
            if role == "system" {
                if let Content::Text(s) = content {
                    system = Some(s);
                }
                continue;
            }
            out.push(Message { role: role.to_string(), content });
        }
        Ok((system, out))
    }

    /// Remote image URLs are skipped; only `data:image/...` URLs are sent.
    fn convert_item(&self, item: &Value) -> Result<Option<ContentBlock>, BedrockError> {
        let kind = item.get("type").and_then(Value::as_str);
        match kind {
            Some("text") => Ok(Some(ContentBlock::text(
                item.get("text").and_then(Value::as_str).unwrap_or_default(),
            ))),
            Some("image_url") => {
                let url = item.get("image_url").and_then(|u| u.get("url")).and_then(Value::as_str);
                let Some(url) = url.filter(|u| u.starts_with("data:image/")) else {
                    return Ok(None);
                };
                let data = url.split_once(',').map(|(_, d)| d).unwrap_or(url);
                self.image_block(data).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn image_validation_error(model_id: &str, err: BedrockError) -> BedrockError {
    match err {
        BedrockError::Model { message, code }
            if code.as_deref() == Some("ValidationException") && message.to_lowercase().contains("image") =>
        {
            BedrockError::Model {
                message: format!("Image validation error for model {model_id}: {message}"),
                code,
            }
        }
        other => other,
    }
}

fn invalid_image(reason: impl std::fmt::Display) -> BedrockError {
    BedrockError::Model {
        message: format!("Image validation error: {reason}"),
        code: Some("ValidationException".into()),
    }
}

/// Decode, convert to RGB, shrink so the longest side is at most `max_size`
/// (Lanczos, aspect ratio kept) and re-encode as JPEG at `quality`. Returns
/// base64.
pub fn prepare_image(image_base64: &str, max_size: u32, quality: u8) -> Result<String, BedrockError> {
    let bytes = STANDARD
        .decode(image_base64.trim())
        .map_err(|e| invalid_image(format!("image data is not valid base64: {e}")))?;
    let mut img = image::load_from_memory(&bytes).map_err(|e| invalid_image(format!("cannot decode image: {e}")))?;

    let (w, h) = (img.width(), img.height());
    let longest = w.max(h);
    if longest > max_size && max_size > 0 {
        let scale = |side: u32| ((u64::from(side) * u64::from(max_size) / u64::from(longest)) as u32).max(1);
        let (nw, nh) = (scale(w), scale(h));
        img = img.resize_exact(nw, nh, FilterType::Lanczos3);
        debug!(from_width = w, from_height = h, width = nw, height = nh, "resized image");
    }

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| invalid_image(format!("cannot encode image: {e}")))?;
    debug!(input_bytes = bytes.len(), output_bytes = out.len(), quality, "image optimised");
    Ok(STANDARD.encode(out))
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::Gif => "GIF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Tiff => "TIFF",
        _ => "OTHER",
    }
}

/// Format, dimensions and size; `None` when the data is not base64 or not an
/// image this build can read.
pub fn image_info(image_base64: &str) -> Option<ImageInfo> {
    let bytes = STANDARD.decode(image_base64.trim()).ok()?;
    let format = image::guess_format(&bytes).ok()?;
    let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format).into_dimensions().ok()?;
    Some(ImageInfo { format: format_name(format), width, height, bytes: bytes.len() })
}
