use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    #[serde(default = "default_marks")]
    pub marks: f64,
}

fn default_marks() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub duration_minutes: i64,
    #[serde(default)]
    pub total_marks: f64,
    #[serde(default)]
    pub passing_marks: f64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ExamError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn at_question(index: usize, message: impl Into<String>) -> Self {
        Self {
            code: "bad_exam".to_string(),
            message: message.into(),
            details: Some(serde_json::json!({ "question": index })),
        }
    }
}

/// Definitions become read-only once a session runs against them, so every
/// invariant is checked at ingest time.
pub fn validate(exam: &ExamDefinition) -> Result<(), ExamError> {
    if exam.id.trim().is_empty() {
        return Err(ExamError::new("bad_exam", "exam id must not be empty"));
    }
    if exam.title.trim().is_empty() {
        return Err(ExamError::new("bad_exam", "exam title must not be empty"));
    }
    if exam.duration_minutes <= 0 {
        return Err(ExamError::new("bad_exam", "duration must be positive"));
    }
    if exam.end_ms <= exam.start_ms {
        return Err(ExamError::new(
            "bad_exam",
            "scheduled end must be after scheduled start",
        ));
    }
    if exam.questions.is_empty() {
        return Err(ExamError::new("bad_exam", "exam needs at least one question"));
    }

    for (i, q) in exam.questions.iter().enumerate() {
        if q.prompt.trim().is_empty() {
            return Err(ExamError::at_question(i, "question prompt must not be empty"));
        }
        if q.options.len() < 2 {
            return Err(ExamError::at_question(i, "question needs at least two options"));
        }
        // Core invariant: the answer key must point inside the option list.
        if q.correct_option >= q.options.len() {
            return Err(ExamError::at_question(
                i,
                format!(
                    "correct option {} out of bounds for {} options",
                    q.correct_option,
                    q.options.len()
                ),
            ));
        }
        if q.marks < 0.0 {
            return Err(ExamError::at_question(i, "marks must not be negative"));
        }
    }

    Ok(())
}
