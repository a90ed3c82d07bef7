//! Text comparison metrics for OCR predictions against ground truth.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Anything that is neither a word character nor whitespace.
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));

/// Outcome of comparing one predicted field with its expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldComparison {
    pub field_name: String,
    pub ground_truth: String,
    pub prediction: String,
    pub exact_match: bool,
    pub normalized_match: bool,
    pub character_error_rate: f64,
    pub word_accuracy: f64,
}

/// Lowercase, collapse whitespace, strip punctuation.
pub fn normalize_text(text: &str) -> String {
    let collapsed = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    PUNCTUATION_RE
        .replace_all(&collapsed, "")
        .trim()
        .to_string()
}

/// Character-level edit distance.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return long.len();
    }

    let mut previous: Vec<usize> = (0..=short.len()).collect();
    for (i, lc) in long.iter().enumerate() {
        let mut current = Vec::with_capacity(short.len() + 1);
        current.push(i + 1);
        for (j, sc) in short.iter().enumerate() {
            let insertion = previous[j + 1] + 1;
            let deletion = current[j] + 1;
            let substitution = previous[j] + usize::from(lc != sc);
            current.push(insertion.min(deletion).min(substitution));
        }
        previous = current;
    }
    previous[short.len()]
}

/// Edit distance divided by the length of the expected text.
///
/// An empty expectation scores 0 for an empty prediction and 1 otherwise.
pub fn character_error_rate(prediction: &str, ground_truth: &str) -> f64 {
    let expected_len = ground_truth.chars().count();
    if expected_len == 0 {
        return if prediction.is_empty() { 0.0 } else { 1.0 };
    }
    levenshtein_distance(prediction, ground_truth) as f64 / expected_len as f64
}

/// Fraction of expected (normalized) words present in the prediction.
pub fn word_accuracy(prediction: &str, ground_truth: &str) -> f64 {
    let expected = normalize_text(ground_truth);
    let predicted = normalize_text(prediction);
    let expected: HashSet<&str> = expected.split_whitespace().collect();
    let predicted: HashSet<&str> = predicted.split_whitespace().collect();

    if expected.is_empty() {
        return if predicted.is_empty() { 1.0 } else { 0.0 };
    }
    expected.intersection(&predicted).count() as f64 / expected.len() as f64
}

pub fn compare_field(prediction: &str, ground_truth: &str, field_name: &str) -> FieldComparison {
    FieldComparison {
        field_name: field_name.to_string(),
        ground_truth: ground_truth.to_string(),
        prediction: prediction.to_string(),
        exact_match: prediction.trim() == ground_truth.trim(),
        normalized_match: normalize_text(prediction) == normalize_text(ground_truth),
        character_error_rate: character_error_rate(prediction, ground_truth),
        word_accuracy: word_accuracy(prediction, ground_truth),
    }
}
