//! Scoring a classifier against labeled data.

use serde::{Deserialize, Serialize};

use crate::variant::LabelSet;

/// Counts of (true class, predicted class) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    rows: Vec<Vec<u32>>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            rows: vec![vec![0; classes]; classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.rows.len()
    }

    /// Count one prediction. Pairs outside the matrix are skipped.
    pub fn record(&mut self, truth: usize, predicted: usize) {
        if let Some(cell) = self
            .rows
            .get_mut(truth)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell = cell.saturating_add(1);
        }
    }

    pub fn count(&self, truth: usize, predicted: usize) -> u32 {
        self.rows
            .get(truth)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().flatten().map(|&n| u64::from(n)).sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.classes()).map(|c| u64::from(self.count(c, c))).sum()
    }

    /// Fraction of recorded predictions on the diagonal; 0 when empty.
    pub fn accuracy(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f32 / total as f32,
        }
    }

    /// Precision, recall and support of one class.
    pub fn class_stats(&self, class: usize) -> ClassStats {
        let hits = u64::from(self.count(class, class));
        let support: u64 = self
            .rows
            .get(class)
            .map_or(0, |row| row.iter().map(|&n| u64::from(n)).sum());
        let predicted: u64 = self
            .rows
            .iter()
            .filter_map(|row| row.get(class))
            .map(|&n| u64::from(n))
            .sum();
        ClassStats {
            precision: ratio(hits, predicted),
            recall: ratio(hits, support),
            support: u32::try_from(support).unwrap_or(u32::MAX),
        }
    }

    /// Rows are true classes, columns predictions.
    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }
}

fn ratio(numerator: u64, denominator: u64) -> f32 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f32 / denominator as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub precision: f32,
    pub recall: f32,
    /// Number of samples whose true class this is.
    pub support: u32,
}

impl ClassStats {
    /// Harmonic mean of precision and recall.
    pub fn f1(&self) -> f32 {
        let sum = self.precision + self.recall;
        if sum == 0.0 {
            0.0
        } else {
            2.0 * self.precision * self.recall / sum
        }
    }
}

/// Serializable evaluation summary for display or export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub samples: u64,
    pub accuracy: f32,
    pub per_class: Vec<LabelScore>,
    pub confusion: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub support: u32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

impl EvaluationReport {
    /// Name each row of `matrix` after the matching vocabulary label.
    pub fn from_confusion(matrix: &ConfusionMatrix, labels: &LabelSet) -> Self {
        let per_class = (0..matrix.classes())
            .map(|class| {
                let stats = matrix.class_stats(class);
                LabelScore {
                    label: labels.label(class).unwrap_or_default().to_string(),
                    support: stats.support,
                    precision: stats.precision,
                    recall: stats.recall,
                    f1: stats.f1(),
                }
            })
            .collect();
        Self {
            samples: matrix.total(),
            accuracy: matrix.accuracy(),
            per_class,
            confusion: matrix.rows().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_follow_counts() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(0, 0);
        matrix.record(0, 0);
        matrix.record(0, 1);
        matrix.record(1, 1);
        matrix.record(5, 0);
        assert_eq!(matrix.total(), 4);
        assert!((matrix.accuracy() - 0.75).abs() < 1e-6);
        let dark = matrix.class_stats(0);
        assert!((dark.recall - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(dark.precision, 1.0);
        assert_eq!(dark.support, 3);
        assert!((matrix.class_stats(1).precision - 0.5).abs() < 1e-6);
    }

    #[test]
    fn report_names_classes() {
        let mut matrix = ConfusionMatrix::new(2);
        matrix.record(1, 1);
        let report = EvaluationReport::from_confusion(&matrix, &LabelSet::new(["dark", "bright"]));
        assert_eq!(report.per_class[1].label, "bright");
        assert_eq!(report.per_class[1].f1, 1.0);
        assert_eq!(report.per_class[0].f1, 0.0);
        assert_eq!(report.confusion, vec![vec![0, 0], vec![0, 1]]);
    }

    #[test]
    fn empty_matrix_scores_zero() {
        let matrix = ConfusionMatrix::new(3);
        assert_eq!(matrix.accuracy(), 0.0);
        assert_eq!(matrix.class_stats(2).f1(), 0.0);
    }
}
