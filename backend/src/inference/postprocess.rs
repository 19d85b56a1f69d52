use super::labels::LabelTable;
use crate::error::ClassifyError;

/// Top-1 result of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub confidence: f64,
}

/// Numerically stable softmax. Empty input gives an empty distribution.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .map(|v| *v as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|v| (*v as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest probability. On ties the lowest index wins.
pub fn argmax(probs: &[f64]) -> Option<(usize, f64)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if p <= bp => best,
            _ if p.is_nan() => best,
            _ => Some((i, p)),
        })
}

pub fn round_confidence(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Softmax, top-1 and label lookup over raw logits.
pub fn top_prediction(logits: &[f32], labels: &LabelTable) -> Result<Prediction, ClassifyError> {
    if logits.len() != labels.len() {
        return Err(ClassifyError::Inference(format!(
            "model produced {} scores for {} labels",
            logits.len(),
            labels.len()
        )));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(ClassifyError::Inference("model produced non-finite scores".into()));
    }

    let probs = softmax(logits);
    let (index, confidence) = argmax(&probs)
        .ok_or_else(|| ClassifyError::Inference("empty probability distribution".into()))?;
    let label = labels
        .get(index)
        .ok_or_else(|| ClassifyError::Inference(format!("no label for class {}", index)))?;

    Ok(Prediction {
        index,
        label: label.to_string(),
        confidence: round_confidence(confidence).clamp(0.0, 1.0),
    })
}
