//! SeeThrough Detector
//!
//! Decides whether an image is AI-generated or human-created with a
//! vision-language classifier exported to ONNX.
//!
//! The pipeline is organized around a few components:
//! - [`ModelLoader`]: downloads the model once, persists it in a [`ModelCache`]
//!   and builds a runtime session with hardware acceleration when available
//! - [`ImagePreprocessor`]: turns any decodable image into the fixed planar
//!   input tensor
//! - [`InferenceEngine`]: runs single and batch inferences and maps the model
//!   output onto a [`Verdict`](seethrough_core::Verdict) via [`classify`]
//!
//! Concurrent requests made while the model is loading share one load.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod loader;
pub mod onnx;
pub mod postprocess;
pub mod preprocess;
pub mod runtime;
pub mod source;

pub use cache::{CachedModelBlob, DiskModelCache, MemoryModelCache, ModelCache};
pub use classifier::{classify, score_from_probability};
pub use config::{
    AuxDtype, AuxInputSpec, CacheSpec, DetectorConfig, DevicePreference, InputSpec, ModelLocation,
    ModelSpec, OutputSpec, RuntimeSpec,
};
pub use engine::{BatchItem, BatchJob, InferenceEngine};
pub use fetch::{HttpModelFetcher, ModelFetcher, ProgressSink};
pub use loader::{LoadStatus, ModelHandle, ModelLoader, ModelLoaderBuilder};
pub use onnx::OrtRuntime;
pub use preprocess::{CropRegion, ImagePreprocessor, PreprocessedTensor};
pub use runtime::{
    InferenceRuntime, InferenceSession, InputTensor, NamedInput, OutputTensor, SessionOutputs,
};
pub use source::SourceLoader;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::DetectorConfig;
    pub use crate::engine::{BatchItem, InferenceEngine};
    pub use crate::fetch::ProgressSink;
    pub use crate::preprocess::CropRegion;
    pub use seethrough_core::prelude::*;
}
