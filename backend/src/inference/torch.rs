use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tch::nn::{FuncT, ModuleT, VarStore};
use tch::{CModule, Device, Kind, Tensor};

use crate::config::DevicePreference;
use crate::error::{PredictError, StartupError};
use crate::inference::decision::NUM_CLASSES;
use crate::inference::model::LeafClassifier;
use crate::inference::preprocess::NormalizedTensor;

pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => Device::cuda_if_available(),
        DevicePreference::Cpu => Device::Cpu,
    }
}

fn to_input(input: &NormalizedTensor, device: Device) -> Tensor {
    let [n, c, h, w] = NormalizedTensor::SHAPE.map(|d| d as i64);
    Tensor::from_slice(&input.to_vec())
        .view([n, c, h, w])
        .to_device(device)
}

fn to_logits(output: &Tensor) -> Result<Vec<f32>, PredictError> {
    let flat = output
        .to_kind(Kind::Float)
        .to_device(Device::Cpu)
        .reshape([-1]);
    Ok(Vec::<f32>::try_from(&flat)?)
}

// Modules are read-only after load, so a panic mid-forward leaves nothing to repair.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        log::warn!("Model lock was poisoned by a failed inference, reusing it");
        mutex.clear_poison();
        poisoned.into_inner()
    })
}

/// A scripted model saved with `torch.jit.save`. Forward passes are serialized:
/// libtorch modules can move between threads but not be shared by them.
pub struct TorchScriptClassifier {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptClassifier {
    pub fn load(path: &Path, device: Device) -> Result<Self, StartupError> {
        let mut module = CModule::load_on_device(path, device)
            .map_err(|e| StartupError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        module.set_eval();
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }
}

impl LeafClassifier for TorchScriptClassifier {
    fn logits(&self, input: &NormalizedTensor) -> Result<Vec<f32>, PredictError> {
        let input = to_input(input, self.device);
        let output = {
            let module = lock(&self.module);
            tch::no_grad(|| module.forward_ts(&[input]))?
        };
        to_logits(&output)
    }

    fn describe(&self) -> String {
        format!("TorchScript module on {:?}", self.device)
    }
}

struct ResNetState {
    _vs: VarStore,
    net: FuncT<'static>,
}

/// Torchvision ResNet-18 with its final layer replaced by a 3-way head,
/// rebuilt in Rust and filled from a `.safetensors` or `.ot` weight file.
pub struct ResNet18Classifier {
    state: Mutex<ResNetState>,
    device: Device,
}

impl ResNet18Classifier {
    pub fn load(path: &Path, device: Device) -> Result<Self, StartupError> {
        let mut vs = VarStore::new(device);
        let net = tch::vision::resnet::resnet18(&vs.root(), NUM_CLASSES as i64);
        vs.load(path)
            .map_err(|e| StartupError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_var_store(vs, net))
    }

    pub fn from_var_store(mut vs: VarStore, net: FuncT<'static>) -> Self {
        vs.freeze();
        let device = vs.device();
        Self {
            state: Mutex::new(ResNetState { _vs: vs, net }),
            device,
        }
    }
}

impl LeafClassifier for ResNet18Classifier {
    fn logits(&self, input: &NormalizedTensor) -> Result<Vec<f32>, PredictError> {
        let input = to_input(input, self.device);
        let output = {
            let state = lock(&self.state);
            tch::no_grad(|| state.net.forward_t(&input, false))
        };
        to_logits(&output)
    }

    fn describe(&self) -> String {
        format!("ResNet-18 ({} classes) on {:?}", NUM_CLASSES, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelFormat};
    use crate::inference::model::load_classifier;
    use crate::inference::preprocess::{preprocess, tests::encode};
    use image::{ImageFormat, Rgb, RgbImage};

    fn leaf_tensor() -> NormalizedTensor {
        let image = RgbImage::from_pixel(96, 96, Rgb([40, 140, 50]));
        preprocess(&encode(image.into(), ImageFormat::Png)).unwrap()
    }

    fn random_resnet() -> (VarStore, FuncT<'static>) {
        tch::manual_seed(7);
        let vs = VarStore::new(Device::Cpu);
        let net = tch::vision::resnet::resnet18(&vs.root(), NUM_CLASSES as i64);
        (vs, net)
    }

    #[test]
    fn resnet_produces_three_finite_logits() {
        let (vs, net) = random_resnet();
        let classifier = ResNet18Classifier::from_var_store(vs, net);
        let logits = classifier.logits(&leaf_tensor()).unwrap();
        assert_eq!(logits.len(), NUM_CLASSES);
        assert!(logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn resnet_inference_is_repeatable() {
        let (vs, net) = random_resnet();
        let classifier = ResNet18Classifier::from_var_store(vs, net);
        let tensor = leaf_tensor();
        assert_eq!(
            classifier.logits(&tensor).unwrap(),
            classifier.logits(&tensor).unwrap()
        );
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let mutex = std::sync::Arc::new(Mutex::new(3_u8));
        let shared = mutex.clone();
        let joined = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("forward pass blew up");
        })
        .join();
        assert!(joined.is_err());
        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 3);
        assert!(!mutex.is_poisoned());
    }

    #[test]
    fn resnet_keeps_serving_after_a_panic_under_the_lock() {
        let (vs, net) = random_resnet();
        let classifier = std::sync::Arc::new(ResNet18Classifier::from_var_store(vs, net));
        let tensor = leaf_tensor();
        let expected = classifier.logits(&tensor).unwrap();

        let shared = classifier.clone();
        let joined = std::thread::spawn(move || {
            let _state = shared.state.lock().unwrap();
            panic!("forward pass blew up");
        })
        .join();
        assert!(joined.is_err());
        assert!(classifier.state.is_poisoned());

        assert_eq!(classifier.logits(&tensor).unwrap(), expected);
        assert!(!classifier.state.is_poisoned());
    }

    #[test]
    fn concurrent_resnet_calls_agree() {
        let (vs, net) = random_resnet();
        let classifier = ResNet18Classifier::from_var_store(vs, net);
        let tensor = leaf_tensor();
        let expected = classifier.logits(&tensor).unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| classifier.logits(&tensor).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn saved_weights_reload_through_config() {
        let (vs, net) = random_resnet();
        let path = std::env::temp_dir().join(format!("plantguard-{}.ot", uuid::Uuid::new_v4()));
        vs.save(&path).unwrap();
        let expected = ResNet18Classifier::from_var_store(vs, net)
            .logits(&leaf_tensor())
            .unwrap();

        let config = ModelConfig {
            path: path.clone(),
            format: ModelFormat::ResNet18,
            device: DevicePreference::Cpu,
        };
        let loaded = load_classifier(&config).ok().unwrap();
        let actual = loaded.logits(&leaf_tensor()).unwrap();
        std::fs::remove_file(&path).ok();

        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5);
        }
    }

    #[test]
    fn garbage_torchscript_file_is_a_load_error() {
        let path = std::env::temp_dir().join(format!("plantguard-{}.pt", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"not a torchscript archive").unwrap();
        let result = TorchScriptClassifier::load(&path, Device::Cpu);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(StartupError::ModelLoad(_))));
    }
}
