//! Aggregate accuracy summary for a finished job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::FieldComparison;

/// Accuracy statistics for one detection field across a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub exact_match_rate: f64,
    pub normalized_match_rate: f64,
    pub average_cer: f64,
    pub sample_count: usize,
}

/// Job-level summary persisted after the last unit.
///
/// Overall rates are averaged over every field comparison in the job, so
/// fields with more samples weigh more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total_units: usize,
    pub failed_units: usize,
    pub compared_fields: usize,
    pub overall_exact_match_rate: f64,
    pub overall_normalized_match_rate: f64,
    pub overall_cer: f64,
    pub per_field_stats: BTreeMap<String, FieldStats>,
}

#[derive(Default)]
struct FieldTotals {
    exact: usize,
    normalized: usize,
    cer_sum: f64,
    count: usize,
}

impl FieldTotals {
    fn add(&mut self, cmp: &FieldComparison) {
        self.exact += usize::from(cmp.exact_match);
        self.normalized += usize::from(cmp.normalized_match);
        self.cer_sum += cmp.character_error_rate;
        self.count += 1;
    }

    fn stats(&self) -> FieldStats {
        FieldStats {
            exact_match_rate: ratio(self.exact as f64, self.count),
            normalized_match_rate: ratio(self.normalized as f64, self.count),
            average_cer: ratio(self.cer_sum, self.count),
            sample_count: self.count,
        }
    }
}

/// Folds per-unit comparisons into a [`JobSummary`].
#[derive(Default)]
pub struct SummaryBuilder {
    units: usize,
    failed_units: usize,
    overall: FieldTotals,
    per_field: BTreeMap<String, FieldTotals>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed unit and its field comparisons.
    pub fn add_unit(&mut self, comparisons: &[FieldComparison], failed: bool) {
        self.units += 1;
        self.failed_units += usize::from(failed);
        for cmp in comparisons {
            self.overall.add(cmp);
            self.per_field
                .entry(cmp.field_name.clone())
                .or_default()
                .add(cmp);
        }
    }

    pub fn finish(&self) -> JobSummary {
        JobSummary {
            total_units: self.units,
            failed_units: self.failed_units,
            compared_fields: self.overall.count,
            overall_exact_match_rate: ratio(self.overall.exact as f64, self.overall.count),
            overall_normalized_match_rate: ratio(
                self.overall.normalized as f64,
                self.overall.count,
            ),
            overall_cer: ratio(self.overall.cer_sum, self.overall.count),
            per_field_stats: self
                .per_field
                .iter()
                .map(|(name, totals)| (name.clone(), totals.stats()))
                .collect(),
        }
    }
}

fn ratio(numerator: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        numerator / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compare_field;

    #[test]
    fn empty_builder_yields_zero_summary() {
        let summary = SummaryBuilder::new().finish();
        assert_eq!(summary.total_units, 0);
        assert_eq!(summary.compared_fields, 0);
        assert_eq!(summary.overall_cer, 0.0);
        assert!(summary.per_field_stats.is_empty());
    }

    #[test]
    fn rates_are_averaged_over_all_comparisons() {
        let mut builder = SummaryBuilder::new();
        builder.add_unit(
            &[
                compare_field("123", "123", "Barcode"),
                compare_field("x", "Brazil", "Made In Label"),
            ],
            false,
        );
        builder.add_unit(&[compare_field("", "456", "Barcode")], true);

        let summary = builder.finish();
        assert_eq!(summary.total_units, 2);
        assert_eq!(summary.failed_units, 1);
        assert_eq!(summary.compared_fields, 3);
        assert!((summary.overall_exact_match_rate - 1.0 / 3.0).abs() < 1e-9);

        let barcode = &summary.per_field_stats["Barcode"];
        assert_eq!(barcode.sample_count, 2);
        assert!((barcode.exact_match_rate - 0.5).abs() < 1e-9);
        assert!((barcode.average_cer - 0.5).abs() < 1e-9);
    }
}
