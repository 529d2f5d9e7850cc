//! Core types for SeeThrough

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where an image to analyze comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `http(s)://`, `data:` or `file://` URL
    Url(String),

    /// Local file path
    Path(PathBuf),

    /// Already-fetched encoded image bytes
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Interpret a user-supplied string as a URL when it has a scheme,
    /// otherwise as a filesystem path.
    pub fn parse(input: &str) -> Self {
        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("data:")
            || lower.starts_with("file://")
        {
            Self::Url(input.to_string())
        } else {
            Self::Path(PathBuf::from(input))
        }
    }

    /// Short description used in logs and batch reports.
    ///
    /// Data URLs are truncated since they embed the whole image.
    pub fn describe(&self) -> String {
        match self {
            Self::Url(url) if url.chars().count() > 64 => {
                format!("{}…", url.chars().take(64).collect::<String>())
            }
            Self::Url(url) => url.clone(),
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

/// Classification tier partitioning the AI-score range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// AI score in [0, 10]
    DefinitelyNot,
    /// AI score in (10, 45]
    LikelyNot,
    /// AI score in (45, 90]
    LikelyAi,
    /// AI score in (90, 100]
    DefinitelyAi,
}

impl Classification {
    /// Wire name of the tier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefinitelyNot => "definitely-not",
            Self::LikelyNot => "likely-not",
            Self::LikelyAi => "likely-ai",
            Self::DefinitelyAi => "definitely-ai",
        }
    }

    /// Whether this tier leans towards AI-generated
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::LikelyAi | Self::DefinitelyAi)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing interpretation of an AI score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Human-readable label, e.g. "LIKELY AI"
    pub label: String,

    /// Tier the score falls into
    pub classification: Classification,

    /// Confidence in the label, 0-100
    pub confidence: u8,

    /// Visual severity level
    pub level: String,

    /// Badge emoji
    pub emoji: String,

    /// Badge color as a hex string
    pub color: String,
}

/// Raw per-class probabilities produced by the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    /// Probability of the human-created class, 0-1
    pub real: f32,

    /// Probability of the AI-generated class, 0-1
    pub ai: f32,
}

/// Result of analyzing one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// AI probability as an integer percentage
    pub ai_score: u8,

    /// Human-created probability as an integer percentage
    pub real_score: u8,

    #[serde(flatten)]
    pub verdict: Verdict,

    pub probabilities: Probabilities,

    /// Wall-clock processing time in milliseconds
    pub processing_time: u64,

    /// Version of the model that produced this result
    pub model_version: String,
}

impl DetectionResult {
    /// Classification tier of this result
    pub fn classification(&self) -> Classification {
        self.verdict.classification
    }

    /// Short headline, e.g. "⚠️ LIKELY AI"
    pub fn headline(&self) -> String {
        format!("{} {}", self.verdict.emoji, self.verdict.label)
    }

    /// One-line summary, e.g. "AI score: 72% — likely-ai"
    pub fn summary(&self) -> String {
        format!("AI score: {}% — {}", self.ai_score, self.verdict.classification)
    }
}

/// Execution backend an inference session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// NVIDIA CUDA
    Cuda,
    /// Apple CoreML
    CoreMl,
    /// Windows DirectML
    DirectMl,
    /// Portable CPU path, always available
    Cpu,
}

impl Backend {
    /// Whether this backend uses hardware acceleration
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::CoreMl => "coreml",
            Self::DirectMl => "directml",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status snapshot of the detector for settings/status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    pub version: String,

    /// Whether a session is currently loaded
    pub loaded: bool,

    /// Runtime name, e.g. "ONNX Runtime"
    pub runtime: String,

    /// Backend of the loaded session, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Backend>,

    /// Model input resolution, e.g. "384x384"
    pub input_size: String,

    /// Class names in output order
    pub classes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> DetectionResult {
        DetectionResult {
            ai_score: 96,
            real_score: 4,
            verdict: Verdict {
                label: "DEFINITELY AI".to_string(),
                classification: Classification::DefinitelyAi,
                confidence: 96,
                level: "dangerous".to_string(),
                emoji: "🚫".to_string(),
                color: "#ef4444".to_string(),
            },
            probabilities: Probabilities { real: 0.045, ai: 0.955 },
            processing_time: 42,
            model_version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn test_detection_result_wire_shape() {
        let value = serde_json::to_value(sample_result()).unwrap();
        let obj = value.as_object().unwrap();

        for key in [
            "aiScore",
            "realScore",
            "label",
            "classification",
            "confidence",
            "level",
            "emoji",
            "color",
            "probabilities",
            "processingTime",
            "modelVersion",
        ] {
            assert!(obj.contains_key(key), "missing field {}", key);
        }
        assert_eq!(obj.len(), 11);
        assert_eq!(value["classification"], "definitely-ai");
        assert_eq!(value["probabilities"]["real"].as_f64().unwrap() as f32, 0.045);
    }

    #[test]
    fn test_detection_result_deserializes_back() {
        let json = serde_json::to_string(&sample_result()).unwrap();
        let parsed: DetectionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample_result());
    }

    #[test]
    fn test_image_source_parse() {
        assert!(matches!(ImageSource::parse("https://x/y.png"), ImageSource::Url(_)));
        assert!(matches!(ImageSource::parse("DATA:image/png;base64,AA=="), ImageSource::Url(_)));
        assert!(matches!(ImageSource::parse("file:///tmp/a.png"), ImageSource::Url(_)));
        assert!(matches!(ImageSource::parse("./a.png"), ImageSource::Path(_)));
    }

    #[test]
    fn test_describe_truncates_data_urls() {
        let url = format!("data:image/png;base64,{}", "A".repeat(500));
        let described = ImageSource::Url(url).describe();
        assert!(described.chars().count() <= 65);
        assert_eq!(ImageSource::Bytes(vec![0; 3]).describe(), "<3 bytes>");
    }

    #[test]
    fn test_result_text() {
        let result = sample_result();
        assert_eq!(result.headline(), "🚫 DEFINITELY AI");
        assert_eq!(result.summary(), "AI score: 96% — definitely-ai");
    }
}
