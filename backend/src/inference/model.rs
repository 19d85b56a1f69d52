use image::RgbImage;
use ndarray::Array4;
use std::sync::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::hub::ModelArtifacts;
use super::labels::LabelTable;
use super::preprocess::ImagePreprocessor;
use super::{Classifier, ModelLoadError};
use crate::error::ClassifyError;

/// TorchScript image classifier with its label table and preprocessor.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
    labels: LabelTable,
    preprocessor: ImagePreprocessor,
}

impl TorchClassifier {
    pub fn load(artifacts: &ModelArtifacts) -> Result<Self, ModelLoadError> {
        let labels = LabelTable::from_config_json(&std::fs::read_to_string(&artifacts.config)?)?;
        let preprocessor =
            ImagePreprocessor::from_config_json(&std::fs::read_to_string(&artifacts.preprocessor)?)?;

        let device = Device::cuda_if_available();
        let mut module = CModule::load_on_device(&artifacts.weights, device)?;
        module.set_eval();

        Ok(Self {
            module: Mutex::new(module),
            device,
            labels,
            preprocessor,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

// Traced Hugging Face models return `(logits,)` rather than a bare tensor.
fn first_tensor(value: IValue) -> Option<Tensor> {
    match value {
        IValue::Tensor(tensor) => Some(tensor),
        IValue::Tuple(items) | IValue::GenericList(items) => {
            items.into_iter().next().and_then(first_tensor)
        }
        _ => None,
    }
}

fn input_tensor(input: &Array4<f32>) -> Result<Tensor, ClassifyError> {
    let (batch, channels, height, width) = input.dim();
    let data = input
        .as_slice()
        .ok_or_else(|| ClassifyError::Preprocess("input tensor is not contiguous".into()))?;
    Ok(Tensor::from_slice(data).view([batch as i64, channels as i64, height as i64, width as i64]))
}

fn flatten_logits(logits: &Tensor) -> Result<Vec<f32>, ClassifyError> {
    let output_flat = logits
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .view([-1]);
    let num_elements = output_flat.size()[0] as usize;
    let mut output_vec = vec![0.0f32; num_elements];
    output_flat.f_copy_data(&mut output_vec, num_elements)?;
    Ok(output_vec)
}

impl Classifier for TorchClassifier {
    fn labels(&self) -> &LabelTable {
        &self.labels
    }

    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>, ClassifyError> {
        let input = self.preprocessor.apply(image)?;
        let tensor = input_tensor(&input)?.to_device(self.device);

        let module = self
            .module
            .lock()
            .map_err(|_| ClassifyError::Inference("model lock poisoned".into()))?;
        let output = tch::no_grad(|| module.forward_is(&[IValue::Tensor(tensor)]))?;
        drop(module);

        let logits = first_tensor(output)
            .ok_or_else(|| ClassifyError::Inference("model returned no tensor".into()))?;
        flatten_logits(&logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_tuple_and_list_outputs() {
        let tuple = IValue::Tuple(vec![IValue::Tensor(Tensor::from_slice(&[1f32, 2.0]))]);
        let logits = first_tensor(tuple).unwrap();
        assert_eq!(flatten_logits(&logits).unwrap(), vec![1.0, 2.0]);

        let nested = IValue::GenericList(vec![
            IValue::Tuple(vec![IValue::Tensor(Tensor::from_slice(&[3f32, 4.0, 5.0]))]),
            IValue::Tensor(Tensor::from_slice(&[9f32])),
        ]);
        let logits = first_tensor(nested).unwrap();
        assert_eq!(flatten_logits(&logits).unwrap(), vec![3.0, 4.0, 5.0]);

        let bare = IValue::Tensor(Tensor::from_slice(&[0.5f32]));
        assert!(first_tensor(bare).is_some());

        assert!(first_tensor(IValue::Tuple(vec![])).is_none());
        assert!(first_tensor(IValue::Int(7)).is_none());
    }

    #[test]
    fn batched_logits_are_flattened_as_floats() {
        let logits = Tensor::from_slice(&[1f64, -2.0, 3.5]).view([1, 3]);
        assert_eq!(flatten_logits(&logits).unwrap(), vec![1.0, -2.0, 3.5]);
    }

    #[test]
    fn input_array_keeps_nchw_layout() {
        let mut input = Array4::<f32>::zeros((1, 3, 2, 4));
        input[[0, 0, 1, 3]] = 9.0;
        input[[0, 2, 0, 1]] = -1.5;

        let tensor = input_tensor(&input).unwrap();
        assert_eq!(tensor.size(), vec![1, 3, 2, 4]);
        assert_eq!(tensor.double_value(&[0, 0, 1, 3]), 9.0);
        assert_eq!(tensor.double_value(&[0, 2, 0, 1]), -1.5);
        assert_eq!(tensor.double_value(&[0, 1, 1, 1]), 0.0);
    }

    #[test]
    fn non_contiguous_input_is_a_preprocess_error() {
        let strided = Array4::<f32>::zeros((1, 2, 3, 3)).permuted_axes([0, 3, 2, 1]);
        let err = input_tensor(&strided).unwrap_err();
        assert!(matches!(err, ClassifyError::Preprocess(_)));

        let relaid = strided.as_standard_layout().into_owned();
        let tensor = input_tensor(&relaid).unwrap();
        assert_eq!(tensor.size(), vec![1, 3, 3, 2]);
    }
}
