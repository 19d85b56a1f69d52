pub mod hub;
pub mod labels;
pub mod model;
pub mod postprocess;
pub mod preprocess;

use image::RgbImage;

use crate::config::ModelConfig;
use crate::error::ClassifyError;
use hub::ModelRepository;
use labels::LabelTable;
use model::TorchClassifier;
use postprocess::{top_prediction, Prediction};
use preprocess::decode_rgb;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL parsing failed: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model hub error: {0}")]
    Hub(String),
    #[error("Missing model artifact: {0}")]
    MissingArtifact(String),
    #[error("Invalid label table: {0}")]
    Labels(String),
    #[error("Invalid preprocessor config: {0}")]
    Preprocessor(String),
    #[error("TorchScript load failed: {0}")]
    Torch(#[from] tch::TchError),
}

/// An image classifier the route can be handed at construction time.
pub trait Classifier: Send + Sync {
    fn labels(&self) -> &LabelTable;

    /// Raw per-class scores for one decoded image, in label order.
    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>, ClassifyError>;
}

/// decode -> preprocess + forward -> softmax -> top-1
pub fn classify_bytes(
    classifier: &dyn Classifier,
    bytes: &[u8],
) -> Result<Prediction, ClassifyError> {
    let image = decode_rgb(bytes)?;
    let logits = classifier.logits(&image)?;
    top_prediction(&logits, classifier.labels())
}

/// Resolves the model artifacts and loads them. Called once before the server binds.
pub async fn load_classifier(config: &ModelConfig) -> Result<TorchClassifier, ModelLoadError> {
    let repository = ModelRepository::new(config.clone());
    let artifacts = repository.fetch_all().await?;
    TorchClassifier::load(&artifacts)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    /// Scores each class by the mean of one colour channel.
    pub struct ChannelClassifier {
        labels: LabelTable,
    }

    impl ChannelClassifier {
        pub fn new() -> Self {
            let labels = ["red_chutney", "green_chutney", "blue_lassi"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            Self {
                labels: LabelTable::new(labels).unwrap(),
            }
        }
    }

    impl Classifier for ChannelClassifier {
        fn labels(&self) -> &LabelTable {
            &self.labels
        }

        fn logits(&self, image: &RgbImage) -> Result<Vec<f32>, ClassifyError> {
            let count = (image.width() * image.height()) as f32;
            let mut sums = [0f32; 3];
            for pixel in image.pixels() {
                for c in 0..3 {
                    sums[c] += pixel[c] as f32;
                }
            }
            Ok(sums.iter().map(|s| s / count / 32.0).collect())
        }
    }

    pub struct BrokenClassifier {
        labels: LabelTable,
    }

    impl BrokenClassifier {
        pub fn new() -> Self {
            Self {
                labels: LabelTable::new(vec!["only".to_string()]).unwrap(),
            }
        }
    }

    impl Classifier for BrokenClassifier {
        fn labels(&self) -> &LabelTable {
            &self.labels
        }

        fn logits(&self, _image: &RgbImage) -> Result<Vec<f32>, ClassifyError> {
            Err(ClassifyError::Inference("forward pass exploded".into()))
        }
    }

    pub fn png_of(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }
}
