//! Turning raw model outputs into class probabilities

use crate::config::OutputSpec;
use crate::runtime::SessionOutputs;
use candle_core::{Device, Tensor};
use seethrough_core::{Error, Probabilities, Result};

/// Extract the two-class probability vector for the first batch row.
///
/// The normalized probabilities output is preferred; when the model only
/// exports logits they are softmaxed here.
pub fn extract_probabilities(outputs: &SessionOutputs, spec: &OutputSpec) -> Result<Probabilities> {
    let classes = spec.classes.len();

    let row = if let Some(probs) = outputs.get(&spec.probabilities) {
        first_row(&probs.data, classes, &spec.probabilities)?.to_vec()
    } else if let Some(logits) = outputs.get(&spec.logits) {
        softmax(first_row(&logits.data, classes, &spec.logits)?)?
    } else {
        let mut available: Vec<&str> = outputs.keys().map(String::as_str).collect();
        available.sort_unstable();
        return Err(Error::inference(format!(
            "Model produced neither '{}' nor '{}' (outputs: {:?})",
            spec.probabilities, spec.logits, available
        )));
    };

    if row.iter().any(|p| !p.is_finite()) {
        return Err(Error::inference(format!("Non-finite class probabilities: {:?}", row)));
    }

    Ok(Probabilities {
        real: row[spec.real_class_index()],
        ai: row[spec.ai_class_index],
    })
}

fn first_row<'a>(data: &'a [f32], classes: usize, name: &str) -> Result<&'a [f32]> {
    data.get(..classes).ok_or_else(|| {
        Error::inference(format!(
            "Output '{}' has {} values, expected at least {}",
            name,
            data.len(),
            classes
        ))
    })
}

fn softmax(logits: &[f32]) -> Result<Vec<f32>> {
    let map = |e: candle_core::Error| Error::inference(format!("Softmax failed: {}", e));
    let tensor = Tensor::from_slice(logits, logits.len(), &Device::Cpu).map_err(map)?;
    candle_nn::ops::softmax_last_dim(&tensor)
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OutputTensor;

    fn outputs(name: &str, data: Vec<f32>) -> SessionOutputs {
        let mut outputs = SessionOutputs::new();
        outputs.insert(
            name.to_string(),
            OutputTensor {
                shape: vec![1, data.len() as i64],
                data,
            },
        );
        outputs
    }

    #[test]
    fn test_probs_output_is_used_directly() {
        let probs = extract_probabilities(&outputs("probs", vec![0.045, 0.955]), &OutputSpec::default())
            .unwrap();
        assert_eq!(probs.ai, 0.955);
        assert_eq!(probs.real, 0.045);
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let probs =
            extract_probabilities(&outputs("logits", vec![0.0, 0.0]), &OutputSpec::default()).unwrap();
        assert!((probs.ai - 0.5).abs() < 1e-6);
        assert!((probs.real - 0.5).abs() < 1e-6);

        let probs =
            extract_probabilities(&outputs("logits", vec![-2.0, 3.0]), &OutputSpec::default()).unwrap();
        assert!(probs.ai > 0.99);
        assert!((probs.ai + probs.real - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_class_index_is_respected() {
        let spec = OutputSpec {
            classes: vec!["ai".to_string(), "real".to_string()],
            ai_class_index: 0,
            ..OutputSpec::default()
        };
        let probs = extract_probabilities(&outputs("probs", vec![0.7, 0.3]), &spec).unwrap();
        assert_eq!(probs.ai, 0.7);
        assert_eq!(probs.real, 0.3);
    }

    #[test]
    fn test_missing_or_short_outputs_fail() {
        let err = extract_probabilities(&outputs("hidden", vec![0.1, 0.9]), &OutputSpec::default())
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let err =
            extract_probabilities(&outputs("probs", vec![0.9]), &OutputSpec::default()).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let err = extract_probabilities(&outputs("probs", vec![f32::NAN, 0.5]), &OutputSpec::default())
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }
}
