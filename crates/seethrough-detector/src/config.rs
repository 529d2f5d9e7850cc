//! Configuration for the detector: model location, input contract and runtime

use seethrough_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default model version tag written alongside cached binaries
pub const DEFAULT_MODEL_VERSION: &str = "1.0.0";

/// Default spatial resolution the classifier was trained on
pub const DEFAULT_INPUT_SIZE: u32 = 384;

/// Configuration for the whole detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Model identity and location
    #[serde(default)]
    pub model: ModelSpec,

    /// Image input contract
    #[serde(default)]
    pub input: InputSpec,

    /// Output contract
    #[serde(default)]
    pub output: OutputSpec,

    /// Fixed auxiliary inputs fed alongside the image tensor
    #[serde(default = "default_aux_inputs")]
    pub aux_inputs: Vec<AuxInputSpec>,

    /// Runtime settings
    #[serde(default)]
    pub runtime: RuntimeSpec,

    /// Model cache settings
    #[serde(default)]
    pub cache: CacheSpec,

    /// Timeout for HTTP requests (model and image downloads), in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::default(),
            input: InputSpec::default(),
            output: OutputSpec::default(),
            aux_inputs: default_aux_inputs(),
            runtime: RuntimeSpec::default(),
            cache: CacheSpec::default(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse detector config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.input.width == 0 || self.input.height == 0 {
            return Err(Error::config("input width and height must be non-zero"));
        }
        if self.output.classes.len() < 2 {
            return Err(Error::config("at least two output classes are required"));
        }
        if self.output.ai_class_index >= self.output.classes.len() {
            return Err(Error::config(format!(
                "ai_class_index {} out of range for {} classes",
                self.output.ai_class_index,
                self.output.classes.len()
            )));
        }
        for aux in &self.aux_inputs {
            if aux.shape.iter().any(|&d| d <= 0) {
                return Err(Error::config(format!(
                    "auxiliary input '{}' has a non-positive dimension",
                    aux.name
                )));
            }
        }
        Ok(())
    }

    /// Key the model binary is cached under
    pub fn cache_key(&self) -> String {
        self.model
            .cache_key
            .clone()
            .unwrap_or_else(|| self.model.location.canonical())
    }
}

/// Model identity and canonical location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Display name
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Version tag; cached binaries with another tag are treated as stale
    #[serde(default = "default_model_version")]
    pub version: String,

    /// Where the binary is fetched from on a cache miss
    #[serde(default)]
    pub location: ModelLocation,

    /// Override for the cache key (defaults to the canonical location)
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            version: default_model_version(),
            location: ModelLocation::default(),
            cache_key: None,
        }
    }
}

/// Canonical location of the model binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelLocation {
    /// Plain HTTP(S) URL
    Url { url: String },

    /// File on the local filesystem
    Local { path: PathBuf },

    /// File in a Hugging Face Hub repository
    HuggingFace {
        repo: String,
        #[serde(default = "default_revision")]
        revision: String,
        filename: String,
    },
}

impl Default for ModelLocation {
    fn default() -> Self {
        Self::HuggingFace {
            repo: "seethroughai/smolvlm-classifier-onnx".to_string(),
            revision: default_revision(),
            filename: "classifier.onnx".to_string(),
        }
    }
}

impl ModelLocation {
    /// Stable string identifying this location
    pub fn canonical(&self) -> String {
        match self {
            Self::Url { url } => url.clone(),
            Self::Local { path } => format!("file://{}", path.display()),
            Self::HuggingFace {
                repo,
                revision,
                filename,
            } => format!("hf://{}@{}/{}", repo, revision, filename),
        }
    }
}

/// Image input contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Name of the image input
    #[serde(default = "default_pixel_input")]
    pub name: String,

    #[serde(default = "default_input_size")]
    pub width: u32,

    #[serde(default = "default_input_size")]
    pub height: u32,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            name: default_pixel_input(),
            width: DEFAULT_INPUT_SIZE,
            height: DEFAULT_INPUT_SIZE,
        }
    }
}

/// Output contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output holding normalized class probabilities
    #[serde(default = "default_probs_output")]
    pub probabilities: String,

    /// Output holding raw logits, used when probabilities are not exported
    #[serde(default = "default_logits_output")]
    pub logits: String,

    /// Class names in output order
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,

    /// Index of the AI-generated class
    #[serde(default = "default_ai_class_index")]
    pub ai_class_index: usize,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            probabilities: default_probs_output(),
            logits: default_logits_output(),
            classes: default_classes(),
            ai_class_index: default_ai_class_index(),
        }
    }
}

impl OutputSpec {
    /// Index of the human-created class (the first class that is not the AI class)
    pub fn real_class_index(&self) -> usize {
        if self.ai_class_index == 0 {
            1
        } else {
            0
        }
    }
}

/// Element type of an auxiliary input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuxDtype {
    Int64,
    Float32,
}

/// A constant tensor fed to the model alongside the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxInputSpec {
    /// Input name in the model graph
    pub name: String,

    pub dtype: AuxDtype,

    pub shape: Vec<i64>,

    /// Value every element is filled with
    #[serde(default)]
    pub fill: f64,
}

impl AuxInputSpec {
    /// Number of elements described by the shape
    pub fn element_count(&self) -> usize {
        self.shape.iter().map(|&d| d.max(0) as usize).product()
    }
}

/// Requested execution device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Try every compiled-in accelerator, then fall back to CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    CoreMl,
    DirectMl,
}

/// Inference runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub device: DevicePreference,

    /// Intra-op thread count
    #[serde(default = "default_threads")]
    pub intra_threads: usize,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            device: DevicePreference::Auto,
            intra_threads: default_threads(),
        }
    }
}

/// Model cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Persist downloaded binaries
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

fn default_model_name() -> String {
    "SmolVLM AI Classifier".to_string()
}

fn default_model_version() -> String {
    DEFAULT_MODEL_VERSION.to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_pixel_input() -> String {
    "pixel_values".to_string()
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

fn default_probs_output() -> String {
    "probs".to_string()
}

fn default_logits_output() -> String {
    "logits".to_string()
}

fn default_classes() -> Vec<String> {
    vec!["real".to_string(), "ai".to_string()]
}

fn default_ai_class_index() -> usize {
    1
}

/// Placeholder text inputs the exported vision-language graph declares
fn default_aux_inputs() -> Vec<AuxInputSpec> {
    vec![
        AuxInputSpec {
            name: "input_ids".to_string(),
            dtype: AuxDtype::Int64,
            shape: vec![1, 512],
            fill: 0.0,
        },
        AuxInputSpec {
            name: "attention_mask".to_string(),
            dtype: AuxDtype::Int64,
            shape: vec![1, 512],
            fill: 1.0,
        },
    ]
}

fn default_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("seethrough/models")
}

fn default_http_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
