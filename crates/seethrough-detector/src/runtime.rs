//! Inference runtime abstraction
//!
//! The loader and engine only talk to these traits; [`crate::onnx`] provides
//! the ONNX Runtime implementation and tests substitute in-process mocks.

use seethrough_core::{Backend, Result};
use std::collections::HashMap;

/// A named input tensor
#[derive(Debug, Clone, PartialEq)]
pub struct NamedInput {
    pub name: String,
    pub tensor: InputTensor,
}

impl NamedInput {
    pub fn new(name: impl Into<String>, tensor: InputTensor) -> Self {
        Self {
            name: name.into(),
            tensor,
        }
    }
}

/// Input tensor data, row-major
#[derive(Debug, Clone, PartialEq)]
pub enum InputTensor {
    F32 { shape: Vec<i64>, data: Vec<f32> },
    I64 { shape: Vec<i64>, data: Vec<i64> },
}

impl InputTensor {
    pub fn shape(&self) -> &[i64] {
        match self {
            Self::F32 { shape, .. } | Self::I64 { shape, .. } => shape,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F32 { data, .. } => data.len(),
            Self::I64 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A float output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Outputs of one forward pass keyed by output name
pub type SessionOutputs = HashMap<String, OutputTensor>;

/// An initialized model ready to run forward passes
///
/// `run` is blocking and CPU/GPU bound; async callers dispatch it onto the
/// blocking pool.
pub trait InferenceSession: Send + Sync {
    /// Input names the model graph declares
    fn input_names(&self) -> &[String];

    /// Output names the model graph declares
    fn output_names(&self) -> &[String];

    /// Execution backend the session was created on
    fn backend(&self) -> Backend;

    /// Run one forward pass
    fn run(&self, inputs: Vec<NamedInput>) -> Result<SessionOutputs>;
}

/// Creates sessions from serialized model bytes
pub trait InferenceRuntime: Send + Sync {
    /// Runtime name reported in model status
    fn name(&self) -> &str;

    /// Build a session from a serialized model, selecting an execution
    /// backend. Blocking.
    fn create_session(&self, model: &[u8]) -> Result<Box<dyn InferenceSession>>;
}
