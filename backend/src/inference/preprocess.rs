use image::imageops::{self, FilterType};
use image::{ImageError, ImageFormat, ImageReader, Limits, RgbImage};
use std::io::Cursor;
use ndarray::Array4;
use serde::Deserialize;

use super::ModelLoadError;
use crate::error::ClassifyError;

const SUPPORTED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// Largest accepted width or height of a decoded upload, and the cap on any resize target.
pub const MAX_IMAGE_SIDE: u32 = 8192;
/// Largest single decoder allocation: one full-size RGBA frame.
pub const MAX_DECODE_ALLOC: u64 = MAX_IMAGE_SIDE as u64 * MAX_IMAGE_SIDE as u64 * 4;

/// Target size as written in `preprocessor_config.json`. Older exports use a bare integer.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SizeSpec {
    Exact { height: u32, width: u32 },
    ShortestEdge {
        shortest_edge: u32,
        #[serde(default)]
        longest_edge: Option<u32>,
    },
    Square(u32),
}

/// Mirror of the Hugging Face image processor config. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: SizeSpec,
    /// PIL resampling id: 0 nearest, 1 lanczos, 2 bilinear, 3 bicubic, 4 box, 5 hamming.
    pub resample: u32,
    pub do_center_crop: bool,
    pub crop_size: Option<SizeSpec>,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: Vec<f32>,
    pub image_std: Vec<f32>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: SizeSpec::Exact {
                height: 224,
                width: 224,
            },
            resample: 2,
            do_center_crop: false,
            crop_size: None,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: vec![0.5, 0.5, 0.5],
            image_std: vec![0.5, 0.5, 0.5],
        }
    }
}

/// Turns a decoded RGB image into the `[1, 3, H, W]` input the model expects.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PreprocessorConfig,
    mean: [f32; 3],
    std: [f32; 3],
}

fn per_channel(values: &[f32], name: &str) -> Result<[f32; 3], ModelLoadError> {
    match values {
        [v] => Ok([*v; 3]),
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(ModelLoadError::Preprocessor(format!(
            "{} must have 1 or 3 entries, got {}",
            name,
            values.len()
        ))),
    }
}

fn filter_for(resample: u32) -> FilterType {
    match resample {
        0 => FilterType::Nearest,
        1 => FilterType::Lanczos3,
        3 => FilterType::CatmullRom,
        _ => FilterType::Triangle,
    }
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessorConfig) -> Result<Self, ModelLoadError> {
        let mean = per_channel(&config.image_mean, "image_mean")?;
        let std = per_channel(&config.image_std, "image_std")?;
        if config.do_normalize && std.iter().any(|s| *s == 0.0) {
            return Err(ModelLoadError::Preprocessor("image_std contains zero".into()));
        }
        if config.do_center_crop && config.crop_size.is_none() {
            return Err(ModelLoadError::Preprocessor(
                "do_center_crop is set without crop_size".into(),
            ));
        }
        Ok(Self { config, mean, std })
    }

    /// Parses `preprocessor_config.json`.
    pub fn from_config_json(raw: &str) -> Result<Self, ModelLoadError> {
        let config: PreprocessorConfig = serde_json::from_str(raw)
            .map_err(|e| ModelLoadError::Preprocessor(format!("preprocessor_config.json: {}", e)))?;
        Self::new(config)
    }

    pub fn apply(&self, image: &RgbImage) -> Result<Array4<f32>, ClassifyError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifyError::Preprocess("image has no pixels".into()));
        }

        let mut image = if self.config.do_resize {
            self.resize(image)
        } else {
            image.clone()
        };

        if self.config.do_center_crop {
            if let Some(crop) = self.config.crop_size {
                image = center_crop(&image, crop);
            }
        }

        let (width, height) = image.dimensions();
        let scale = if self.config.do_rescale {
            self.config.rescale_factor
        } else {
            1.0
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                let mut value = pixel[c] as f32 * scale;
                if self.config.do_normalize {
                    value = (value - self.mean[c]) / self.std[c];
                }
                tensor[[0, c, y as usize, x as usize]] = value;
            }
        }
        Ok(tensor)
    }

    fn resize(&self, image: &RgbImage) -> RgbImage {
        let filter = filter_for(self.config.resample);
        let (width, height) = match self.config.size {
            SizeSpec::Exact { height, width } => (width, height),
            SizeSpec::Square(side) => (side, side),
            SizeSpec::ShortestEdge {
                shortest_edge,
                longest_edge,
            } => shortest_edge_dims(image.width(), image.height(), shortest_edge, longest_edge),
        };
        imageops::resize(image, width.max(1), height.max(1), filter)
    }
}

/// Scales the short side to `shortest_edge`. The long side is capped at `longest_edge`,
/// or `MAX_IMAGE_SIDE` when the config has none, shrinking the short side to keep the ratio.
fn shortest_edge_dims(
    width: u32,
    height: u32,
    shortest_edge: u32,
    longest_edge: Option<u32>,
) -> (u32, u32) {
    let (short, long) = if width <= height {
        (width as u64, height as u64)
    } else {
        (height as u64, width as u64)
    };
    let limit = longest_edge.unwrap_or(MAX_IMAGE_SIDE).clamp(1, MAX_IMAGE_SIDE) as u64;

    let mut new_short = shortest_edge as u64;
    let mut new_long = new_short * long / short.max(1);
    if new_long > limit {
        new_short = (new_short * limit / new_long).max(1);
        new_long = limit;
    }

    if width <= height {
        (new_short as u32, new_long as u32)
    } else {
        (new_long as u32, new_short as u32)
    }
}

/// Centered crop. An image smaller than the window is zero-padded around the middle.
fn center_crop(image: &RgbImage, crop: SizeSpec) -> RgbImage {
    let (crop_w, crop_h) = match crop {
        SizeSpec::Exact { height, width } => (width, height),
        SizeSpec::Square(side) | SizeSpec::ShortestEdge { shortest_edge: side, .. } => (side, side),
    };
    let (width, height) = image.dimensions();
    let x = width.saturating_sub(crop_w) / 2;
    let y = height.saturating_sub(crop_h) / 2;
    let cropped = imageops::crop_imm(image, x, y, crop_w.min(width), crop_h.min(height)).to_image();
    if cropped.dimensions() == (crop_w, crop_h) {
        return cropped;
    }

    let mut padded = RgbImage::new(crop_w, crop_h);
    let left = (crop_w - cropped.width()) / 2;
    let top = (crop_h - cropped.height()) / 2;
    imageops::overlay(&mut padded, &cropped, left as i64, top as i64);
    padded
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

/// Sniffs the format from magic bytes, then decodes to 8-bit RGB within `decode_limits`.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ClassifyError> {
    let format = image::guess_format(bytes)
        .map_err(|_| ClassifyError::UnsupportedFormat("unrecognised image data".into()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(ClassifyError::UnsupportedFormat(format!("{:?}", format)));
    }

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decode_limits());
    let image = reader.decode().map_err(|e| match e {
        ImageError::Limits(limit) => ClassifyError::ImageTooLarge(limit.to_string()),
        other => ClassifyError::Decode(other.to_string()),
    })?;
    Ok(image.into_rgb8())
}
