use std::collections::HashMap;

use serde::Serialize;

use crate::exam::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    pub correct: usize,
    pub total: usize,
    pub percentage: i64,
}

/// An answer counts only when it is present and matches the question's
/// correct option. Unanswered questions score as wrong, never as absent
/// from the denominator.
pub fn score(questions: &[Question], answers: &HashMap<usize, usize>) -> ScoreSummary {
    let total = questions.len();
    let mut correct = 0usize;

    for (idx, q) in questions.iter().enumerate() {
        if answers.get(&idx) == Some(&q.correct_option) {
            correct += 1;
        }
    }

    let percentage = if total == 0 {
        0
    } else {
        (100.0 * correct as f64 / total as f64).round() as i64
    };

    ScoreSummary {
        correct,
        total,
        percentage,
    }
}
