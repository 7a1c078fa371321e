use ndarray::Array4;
use std::path::Path;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::model::{Classifier, InferenceError, InputLayout};

/// TorchScript export of the chest X-ray CNN.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
    layout: InputLayout,
    name: String,
}

impl TorchClassifier {
    pub fn load(path: &Path, layout: InputLayout) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut module = CModule::load_on_device(path, device)
            .map_err(|e| InferenceError::Model(format!("{}: {}", path.display(), e)))?;
        module.set_eval();

        log::info!(
            "Loaded TorchScript model {} on {:?} ({:?} input)",
            path.display(),
            device,
            layout
        );

        Ok(Self {
            module: Mutex::new(module),
            device,
            layout,
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "torchscript".to_string()),
        })
    }

    fn to_tensor(&self, input: &Array4<f32>) -> Tensor {
        let shape: Vec<i64> = input.shape().iter().map(|&dim| dim as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data).view(shape.as_slice());
        let tensor = match self.layout {
            InputLayout::Nhwc => tensor,
            InputLayout::Nchw => tensor.permute([0, 3, 1, 2]).contiguous(),
        };
        tensor.to_device(self.device)
    }
}

impl Classifier for TorchClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<f32, InferenceError> {
        let tensor = self.to_tensor(input);
        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Model("model lock poisoned".to_string()))?;
        let output = tch::no_grad(|| module.forward_ts(&[tensor]))
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let output_flat = output.to_kind(Kind::Float).view([-1]);
        if output_flat.size()[0] == 0 {
            return Err(InferenceError::Model("model produced no output".to_string()));
        }
        Ok(output_flat.double_value(&[0]) as f32)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
