//! Score-to-verdict classification
//!
//! Maps an integer AI score (0-100) onto one of four fixed bands:
//! - [0, 10]   definitely not AI
//! - (10, 45]  likely not AI
//! - (45, 90]  likely AI
//! - (90, 100] definitely AI

use seethrough_core::{Classification, Verdict};

/// One threshold band with its presentation attributes
#[derive(Debug, Clone, Copy)]
struct Band {
    /// Inclusive upper bound of the band
    upper: u8,
    classification: Classification,
    label: &'static str,
    level: &'static str,
    emoji: &'static str,
    color: &'static str,
}

/// Bands ordered by upper bound; the lower bound of each is the previous
/// band's upper bound (exclusive).
const BANDS: [Band; 4] = [
    Band {
        upper: 10,
        classification: Classification::DefinitelyNot,
        label: "DEFINITELY NOT AI",
        level: "safe",
        emoji: "✅",
        color: "#10b981",
    },
    Band {
        upper: 45,
        classification: Classification::LikelyNot,
        label: "LIKELY NOT AI",
        level: "probably-safe",
        emoji: "👍",
        color: "#3b82f6",
    },
    Band {
        upper: 90,
        classification: Classification::LikelyAi,
        label: "LIKELY AI",
        level: "suspicious",
        emoji: "⚠️",
        color: "#f59e0b",
    },
    Band {
        upper: 100,
        classification: Classification::DefinitelyAi,
        label: "DEFINITELY AI",
        level: "dangerous",
        emoji: "🚫",
        color: "#ef4444",
    },
];

/// Classify an AI score.
///
/// Scores above 100 are outside the contract and saturate to 100.
pub fn classify(ai_score: u8) -> Verdict {
    let score = ai_score.min(100);
    let band = BANDS
        .iter()
        .find(|band| score <= band.upper)
        .unwrap_or(&BANDS[BANDS.len() - 1]);

    // Confidence is measured towards whichever side the band leans
    let confidence = if band.classification.is_ai() {
        score
    } else {
        100 - score
    };

    Verdict {
        label: band.label.to_string(),
        classification: band.classification,
        confidence,
        level: band.level.to_string(),
        emoji: band.emoji.to_string(),
        color: band.color.to_string(),
    }
}

/// Convert a probability into an integer percentage, rounding half up.
///
/// The multiplication stays in `f32` so a probability such as `0.955f32`
/// lands on 95.5 and rounds to 96. Values outside [0, 1] are clamped.
pub fn score_from_probability(probability: f32) -> u8 {
    if probability.is_nan() {
        return 0;
    }
    let clamped = probability.clamp(0.0, 1.0);
    (clamped * 100.0_f32).round() as u8
}
