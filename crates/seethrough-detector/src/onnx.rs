//! ONNX Runtime backend
//!
//! Sessions are created with the first execution provider that accepts the
//! graph. Accelerated providers are registered with `error_on_failure` so a
//! provider that cannot initialize surfaces as an error here and the next
//! candidate is tried, ending with the CPU provider.

use crate::config::{DevicePreference, RuntimeSpec};
use crate::runtime::{
    InferenceRuntime, InferenceSession, InputTensor, NamedInput, OutputTensor, SessionOutputs,
};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use parking_lot::Mutex;
use seethrough_core::{Backend, Error, Result};
use std::borrow::Cow;
use std::sync::Once;
use tracing::{debug, info, warn};

pub const RUNTIME_NAME: &str = "ONNX Runtime";

static ORT_INIT: Once = Once::new();

/// [`InferenceRuntime`] backed by ONNX Runtime
#[derive(Debug, Clone)]
pub struct OrtRuntime {
    spec: RuntimeSpec,
}

impl OrtRuntime {
    pub fn new(spec: RuntimeSpec) -> Self {
        ORT_INIT.call_once(|| {
            let committed = ort::init().with_name("seethrough").commit();
            debug!(?committed, "ONNX Runtime environment initialized");
        });
        Self { spec }
    }

    /// Backends to try, in order. CPU is always last.
    fn candidates(&self) -> Vec<Backend> {
        let mut backends = match self.spec.device {
            DevicePreference::Cpu => Vec::new(),
            DevicePreference::Cuda => vec![Backend::Cuda],
            DevicePreference::CoreMl => vec![Backend::CoreMl],
            DevicePreference::DirectMl => vec![Backend::DirectMl],
            DevicePreference::Auto => compiled_accelerators(),
        };
        backends.push(Backend::Cpu);
        backends
    }

    fn build_session(&self, model: &[u8], backend: Backend) -> Result<Session> {
        let provider = execution_provider(backend)?;
        let map = |e: ort::Error| Error::model_load(format!("{} session: {}", backend, e));

        Session::builder()
            .map_err(map)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(map)?
            .with_intra_threads(self.spec.intra_threads.max(1))
            .map_err(map)?
            .with_execution_providers([provider])
            .map_err(map)?
            .commit_from_memory(model)
            .map_err(map)
    }
}

impl Default for OrtRuntime {
    fn default() -> Self {
        Self::new(RuntimeSpec::default())
    }
}

impl InferenceRuntime for OrtRuntime {
    fn name(&self) -> &str {
        RUNTIME_NAME
    }

    fn create_session(&self, model: &[u8]) -> Result<Box<dyn InferenceSession>> {
        let mut last_error = None;

        for backend in self.candidates() {
            match self.build_session(model, backend) {
                Ok(session) => {
                    let inputs: Vec<String> =
                        session.inputs.iter().map(|i| i.name.clone()).collect();
                    let outputs: Vec<String> =
                        session.outputs.iter().map(|o| o.name.clone()).collect();
                    info!(
                        "Created {} session (inputs: {:?}, outputs: {:?})",
                        backend, inputs, outputs
                    );
                    return Ok(Box::new(OrtSession {
                        session: Mutex::new(session),
                        inputs,
                        outputs,
                        backend,
                    }));
                }
                Err(e) if backend.is_accelerated() => {
                    warn!("{} unavailable, falling back: {}", backend, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::model_load("No execution backend available")))
    }
}

fn compiled_accelerators() -> Vec<Backend> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();
    #[cfg(feature = "cuda")]
    backends.push(Backend::Cuda);
    #[cfg(feature = "coreml")]
    backends.push(Backend::CoreMl);
    #[cfg(feature = "directml")]
    backends.push(Backend::DirectMl);
    backends
}

fn execution_provider(backend: Backend) -> Result<ExecutionProviderDispatch> {
    match backend {
        Backend::Cpu => Ok(CPUExecutionProvider::default().build()),
        #[cfg(feature = "cuda")]
        Backend::Cuda => Ok(ort::execution_providers::CUDAExecutionProvider::default()
            .build()
            .error_on_failure()),
        #[cfg(feature = "coreml")]
        Backend::CoreMl => Ok(ort::execution_providers::CoreMLExecutionProvider::default()
            .build()
            .error_on_failure()),
        #[cfg(feature = "directml")]
        Backend::DirectMl => Ok(ort::execution_providers::DirectMLExecutionProvider::default()
            .build()
            .error_on_failure()),
        #[allow(unreachable_patterns)]
        other => Err(Error::model_load(format!(
            "{} support was not compiled in",
            other
        ))),
    }
}

/// A live ONNX Runtime session
pub struct OrtSession {
    // `Session::run` needs exclusive access
    session: Mutex<Session>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    backend: Backend,
}

impl InferenceSession for OrtSession {
    fn input_names(&self) -> &[String] {
        &self.inputs
    }

    fn output_names(&self) -> &[String] {
        &self.outputs
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    fn run(&self, inputs: Vec<NamedInput>) -> Result<SessionOutputs> {
        let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());

        for input in inputs {
            let value: SessionInputValue<'_> = match input.tensor {
                InputTensor::F32 { shape, data } => {
                    Tensor::<f32>::from_array((shape, data.into_boxed_slice()))
                        .map_err(|e| {
                            Error::inference(format!("Invalid tensor '{}': {}", input.name, e))
                        })?
                        .into()
                }
                InputTensor::I64 { shape, data } => {
                    Tensor::<i64>::from_array((shape, data.into_boxed_slice()))
                        .map_err(|e| {
                            Error::inference(format!("Invalid tensor '{}': {}", input.name, e))
                        })?
                        .into()
                }
            };
            values.push((Cow::Owned(input.name), value));
        }

        let mut session = self.session.lock();
        let outputs = session
            .run(SessionInputs::<'_, '_, 0>::ValueMap(values))
            .map_err(|e| Error::inference(format!("Forward pass failed: {}", e)))?;

        let mut extracted = SessionOutputs::new();
        for name in &self.outputs {
            match outputs[name.as_str()].try_extract_tensor::<f32>() {
                Ok((shape, data)) => {
                    extracted.insert(
                        name.clone(),
                        OutputTensor {
                            shape: shape.iter().copied().collect(),
                            data: data.to_vec(),
                        },
                    );
                }
                Err(e) => debug!("Skipping non-f32 output '{}': {}", name, e),
            }
        }
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_is_always_the_last_candidate() {
        for device in [
            DevicePreference::Auto,
            DevicePreference::Cpu,
            DevicePreference::Cuda,
            DevicePreference::CoreMl,
            DevicePreference::DirectMl,
        ] {
            let runtime = OrtRuntime {
                spec: RuntimeSpec {
                    device,
                    intra_threads: 1,
                },
            };
            let candidates = runtime.candidates();
            assert_eq!(candidates.last(), Some(&Backend::Cpu));
            assert_eq!(candidates.iter().filter(|b| **b == Backend::Cpu).count(), 1);
        }
    }

    #[test]
    fn test_explicit_device_is_tried_first() {
        let runtime = OrtRuntime {
            spec: RuntimeSpec {
                device: DevicePreference::Cuda,
                intra_threads: 1,
            },
        };
        assert_eq!(runtime.candidates(), vec![Backend::Cuda, Backend::Cpu]);
    }
}
