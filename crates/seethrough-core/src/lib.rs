//! SeeThrough Core
//!
//! Core types and error handling shared across SeeThrough components.
//!
//! This crate provides:
//! - The image source, detection result and model status types exchanged
//!   between the detector and its shells
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Backend, Classification, DetectionResult, ImageSource, ModelInfo, Probabilities, Verdict,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{Classification, DetectionResult, ImageSource, Verdict};
}
