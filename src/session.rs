use std::collections::HashMap;

use serde::Serialize;

use crate::exam::ExamDefinition;
use crate::monitor::{IntegrityMonitor, SignalKind, Violation};
use crate::scoring::{self, ScoreSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    AwaitingFullscreen,
    InProgress,
    Ended,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::AwaitingFullscreen => "awaiting_fullscreen",
            Phase::InProgress => "in_progress",
            Phase::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    BadPhase { op: &'static str, phase: Phase },
    AlreadyEnded,
    InvalidQuestion { index: usize, count: usize },
    InvalidOption { index: usize, count: usize },
    FullscreenDenied,
    ConfirmationRequired,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::BadPhase { .. } => "bad_phase",
            SessionError::AlreadyEnded => "already_ended",
            SessionError::InvalidQuestion { .. } => "invalid_question",
            SessionError::InvalidOption { .. } => "invalid_option",
            SessionError::FullscreenDenied => "fullscreen_denied",
            SessionError::ConfirmationRequired => "confirmation_required",
        }
    }

    pub fn message(&self) -> String {
        match self {
            SessionError::BadPhase { op, phase } => {
                format!("{} not allowed while {}", op, phase.as_str())
            }
            SessionError::AlreadyEnded => "session already ended".to_string(),
            SessionError::InvalidQuestion { index, count } => {
                format!("question {} out of range for {} questions", index, count)
            }
            SessionError::InvalidOption { index, count } => {
                format!("option {} out of range for {} options", index, count)
            }
            SessionError::FullscreenDenied => "fullscreen was not granted".to_string(),
            SessionError::ConfirmationRequired => {
                "manual submit requires confirmation".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

/// Everything the submitter needs, snapshotted at the moment the session
/// ended. Produced at most once per session.
#[derive(Debug, Clone)]
pub struct ResultDraft {
    pub exam_id: String,
    pub exam_title: String,
    pub user: UserIdentity,
    pub answers: HashMap<usize, usize>,
    pub violations: Vec<Violation>,
    pub score: ScoreSummary,
    pub started_ms: i64,
    pub ended_ms: i64,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SubmissionOutcome {
    pub fn submitted(result_id: String) -> Self {
        Self {
            status: "submitted".to_string(),
            result_id: Some(result_id),
            message: None,
        }
    }

    pub fn duplicate_attempt() -> Self {
        Self {
            status: "duplicate_attempt".to_string(),
            result_id: None,
            message: Some("a result already exists for this exam and user".to_string()),
        }
    }

    pub fn submission_failed(message: impl Into<String>) -> Self {
        Self {
            status: "submission_failed".to_string(),
            result_id: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Tick arrived outside InProgress; the countdown is not running.
    Ignored,
    Running { remaining_secs: i64 },
    /// Countdown hit zero: the session is now Ended and this draft must be
    /// handed to the submitter.
    Expired(ResultDraft),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub phase: String,
    pub exam_id: String,
    pub exam_title: String,
    pub question_count: usize,
    pub current_question: usize,
    pub answered: Vec<bool>,
    pub answered_count: usize,
    pub remaining_secs: i64,
    pub violation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionOutcome>,
}

/// One student's single timed attempt at one exam. Owns the answers, the
/// countdown, and the violation log; nothing else mutates them. Terminal
/// once Ended.
pub struct Session {
    exam: ExamDefinition,
    user: UserIdentity,
    phase: Phase,
    current_question: usize,
    answers: HashMap<usize, usize>,
    monitor: IntegrityMonitor,
    remaining_secs: i64,
    started_ms: Option<i64>,
    submission: Option<SubmissionOutcome>,
}

impl Session {
    pub fn new(exam: ExamDefinition, user: UserIdentity) -> Self {
        let remaining_secs = exam.duration_minutes * 60;
        Self {
            exam,
            user,
            phase: Phase::NotStarted,
            current_question: 0,
            answers: HashMap::new(),
            monitor: IntegrityMonitor::new(),
            remaining_secs,
            started_ms: None,
            submission: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn exam(&self) -> &ExamDefinition {
        &self.exam
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn submission(&self) -> Option<&SubmissionOutcome> {
        self.submission.as_ref()
    }

    /// The student has read the instructions; next stop is the fullscreen
    /// grant.
    pub fn acknowledge(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::NotStarted => {
                self.phase = Phase::AwaitingFullscreen;
                Ok(())
            }
            Phase::Ended => Err(SessionError::AlreadyEnded),
            phase => Err(SessionError::BadPhase {
                op: "acknowledge",
                phase,
            }),
        }
    }

    /// Outcome of the UI's fullscreen request. Denial leaves the session in
    /// AwaitingFullscreen so the grant can be retried; success starts the
    /// clock and arms the integrity monitor.
    pub fn fullscreen_result(&mut self, granted: bool, now_ms: i64) -> Result<(), SessionError> {
        match self.phase {
            Phase::AwaitingFullscreen => {
                if !granted {
                    return Err(SessionError::FullscreenDenied);
                }
                self.phase = Phase::InProgress;
                self.started_ms = Some(now_ms);
                self.remaining_secs = self.exam.duration_minutes * 60;
                Ok(())
            }
            Phase::Ended => Err(SessionError::AlreadyEnded),
            phase => Err(SessionError::BadPhase {
                op: "fullscreen result",
                phase,
            }),
        }
    }

    pub fn select_answer(&mut self, question: usize, option: usize) -> Result<(), SessionError> {
        self.require_in_progress("answer selection")?;
        let Some(q) = self.exam.questions.get(question) else {
            return Err(SessionError::InvalidQuestion {
                index: question,
                count: self.exam.questions.len(),
            });
        };
        if option >= q.options.len() {
            return Err(SessionError::InvalidOption {
                index: option,
                count: q.options.len(),
            });
        }
        self.answers.insert(question, option);
        Ok(())
    }

    pub fn navigate(&mut self, question: usize) -> Result<(), SessionError> {
        self.require_in_progress("navigation")?;
        if question >= self.exam.questions.len() {
            return Err(SessionError::InvalidQuestion {
                index: question,
                count: self.exam.questions.len(),
            });
        }
        self.current_question = question;
        Ok(())
    }

    /// Away-signals only matter while the attempt is live; anything earlier
    /// or later is dropped rather than rejected.
    pub fn observe_signal(&mut self, kind: SignalKind, at_ms: i64) -> Option<Violation> {
        if self.phase != Phase::InProgress {
            return None;
        }
        self.monitor.observe(kind, at_ms).cloned()
    }

    /// One-second countdown step, driven by the view layer's timer. Expiry is
    /// an immediate cutoff: the session ends with whatever answers exist.
    pub fn tick(&mut self, now_ms: i64) -> TickOutcome {
        if self.phase != Phase::InProgress {
            return TickOutcome::Ignored;
        }
        self.remaining_secs -= 1;
        if self.remaining_secs <= 0 {
            self.remaining_secs = 0;
            return TickOutcome::Expired(self.end(now_ms));
        }
        TickOutcome::Running {
            remaining_secs: self.remaining_secs,
        }
    }

    /// User-confirmed manual submit. Converges on the same end routine as
    /// countdown expiry; the phase guard makes the finalize at-most-once.
    pub fn submit(&mut self, confirmed: bool, now_ms: i64) -> Result<ResultDraft, SessionError> {
        self.require_in_progress("submit")?;
        if !confirmed {
            return Err(SessionError::ConfirmationRequired);
        }
        Ok(self.end(now_ms))
    }

    pub fn record_submission(&mut self, outcome: SubmissionOutcome) {
        self.submission = Some(outcome);
    }

    pub fn snapshot(&self) -> Snapshot {
        let answered: Vec<bool> = (0..self.exam.questions.len())
            .map(|i| self.answers.contains_key(&i))
            .collect();
        let answered_count = answered.iter().filter(|a| **a).count();
        Snapshot {
            phase: self.phase.as_str().to_string(),
            exam_id: self.exam.id.clone(),
            exam_title: self.exam.title.clone(),
            question_count: self.exam.questions.len(),
            current_question: self.current_question,
            answered,
            answered_count,
            remaining_secs: self.remaining_secs,
            violation_count: self.monitor.count(),
            submission: self.submission.clone(),
        }
    }

    fn require_in_progress(&self, op: &'static str) -> Result<(), SessionError> {
        match self.phase {
            Phase::InProgress => Ok(()),
            Phase::Ended => Err(SessionError::AlreadyEnded),
            phase => Err(SessionError::BadPhase { op, phase }),
        }
    }

    /// Sole InProgress -> Ended transition. Both expiry and manual submit
    /// arrive here, and the phase guard on their entry points means the draft
    /// is built exactly once.
    fn end(&mut self, now_ms: i64) -> ResultDraft {
        self.phase = Phase::Ended;
        let started_ms = self.started_ms.unwrap_or(now_ms);
        let score = scoring::score(&self.exam.questions, &self.answers);
        ResultDraft {
            exam_id: self.exam.id.clone(),
            exam_title: self.exam.title.clone(),
            user: self.user.clone(),
            answers: self.answers.clone(),
            violations: self.monitor.violations().to_vec(),
            score,
            started_ms,
            ended_ms: now_ms,
            duration_secs: ((now_ms - started_ms) / 1000).max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::Question;

    fn exam(questions: usize, duration_minutes: i64) -> ExamDefinition {
        ExamDefinition {
            id: "exam-1".to_string(),
            title: "Midterm".to_string(),
            description: String::new(),
            duration_minutes,
            total_marks: questions as f64,
            passing_marks: 0.0,
            start_ms: 0,
            end_ms: 10_000_000,
            questions: (0..questions)
                .map(|i| Question {
                    prompt: format!("q{}", i),
                    options: vec![
                        "a".to_string(),
                        "b".to_string(),
                        "c".to_string(),
                        "d".to_string(),
                    ],
                    correct_option: i % 4,
                    marks: 1.0,
                })
                .collect(),
        }
    }

    fn user() -> UserIdentity {
        UserIdentity {
            user_id: "user-1".to_string(),
            user_email: Some("student@example.com".to_string()),
            user_name: Some("Student".to_string()),
        }
    }

    fn started_session(questions: usize, duration_minutes: i64) -> Session {
        let mut s = Session::new(exam(questions, duration_minutes), user());
        s.acknowledge().expect("acknowledge");
        s.fullscreen_result(true, 1_000).expect("fullscreen");
        s
    }

    #[test]
    fn phases_advance_in_order() {
        let mut s = Session::new(exam(2, 30), user());
        assert_eq!(s.phase(), Phase::NotStarted);
        s.acknowledge().expect("acknowledge");
        assert_eq!(s.phase(), Phase::AwaitingFullscreen);
        s.fullscreen_result(true, 1_000).expect("fullscreen");
        assert_eq!(s.phase(), Phase::InProgress);
        assert_eq!(s.snapshot().remaining_secs, 30 * 60);
    }

    #[test]
    fn fullscreen_denial_is_retryable() {
        let mut s = Session::new(exam(2, 30), user());
        s.acknowledge().expect("acknowledge");
        let err = s.fullscreen_result(false, 1_000).expect_err("denied");
        assert_eq!(err.code(), "fullscreen_denied");
        assert_eq!(s.phase(), Phase::AwaitingFullscreen);
        s.fullscreen_result(true, 2_000).expect("retry succeeds");
        assert_eq!(s.phase(), Phase::InProgress);
    }

    #[test]
    fn answering_before_start_is_rejected() {
        let mut s = Session::new(exam(2, 30), user());
        let err = s.select_answer(0, 1).expect_err("not started");
        assert_eq!(err.code(), "bad_phase");
    }

    #[test]
    fn answers_overwrite_and_bounds_check() {
        let mut s = started_session(2, 30);
        s.select_answer(0, 1).expect("first pick");
        s.select_answer(0, 3).expect("overwrite");
        assert_eq!(
            s.select_answer(0, 4).expect_err("out of range").code(),
            "invalid_option"
        );
        assert_eq!(
            s.select_answer(5, 0).expect_err("bad question").code(),
            "invalid_question"
        );
        let snap = s.snapshot();
        assert_eq!(snap.answered, vec![true, false]);
        assert_eq!(snap.answered_count, 1);
    }

    #[test]
    fn navigation_bounds_checked() {
        let mut s = started_session(3, 30);
        s.navigate(2).expect("in range");
        assert_eq!(s.snapshot().current_question, 2);
        assert_eq!(s.navigate(3).expect_err("past end").code(), "invalid_question");
        assert_eq!(s.snapshot().current_question, 2);
    }

    #[test]
    fn signals_ignored_outside_in_progress() {
        let mut s = Session::new(exam(2, 30), user());
        assert!(s.observe_signal(SignalKind::WindowBlur, 500).is_none());
        s.acknowledge().expect("acknowledge");
        assert!(s.observe_signal(SignalKind::TabSwitch, 600).is_none());
        s.fullscreen_result(true, 1_000).expect("fullscreen");
        assert!(s.observe_signal(SignalKind::WindowBlur, 2_000).is_some());
        s.submit(true, 3_000).expect("submit");
        assert!(s.observe_signal(SignalKind::TabSwitch, 4_000).is_none());
        assert_eq!(s.snapshot().violation_count, 1);
    }

    #[test]
    fn countdown_expiry_ends_with_current_answers() {
        let mut s = started_session(2, 1);
        s.select_answer(0, 0).expect("answer");
        for i in 0..59 {
            match s.tick(1_000 + i) {
                TickOutcome::Running { .. } => {}
                other => panic!("unexpected outcome before expiry: {:?}", other),
            }
        }
        let draft = match s.tick(61_000) {
            TickOutcome::Expired(draft) => draft,
            other => panic!("expected expiry, got {:?}", other),
        };
        assert_eq!(s.phase(), Phase::Ended);
        assert_eq!(draft.answers.get(&0), Some(&0));
        assert_eq!(draft.score.total, 2);
        assert_eq!(draft.duration_secs, 60);
    }

    #[test]
    fn finalize_happens_at_most_once() {
        let mut s = started_session(1, 1);
        for _ in 0..60 {
            s.tick(2_000);
        }
        assert_eq!(s.phase(), Phase::Ended);
        // Late manual submit after expiry must not produce a second draft.
        assert_eq!(s.submit(true, 3_000).expect_err("ended").code(), "already_ended");
        // And the reverse order: manual submit first, expiry tick after.
        let mut s2 = started_session(1, 1);
        s2.submit(true, 2_000).expect("manual submit");
        assert!(matches!(s2.tick(3_000), TickOutcome::Ignored));
    }

    #[test]
    fn unconfirmed_submit_changes_nothing() {
        let mut s = started_session(1, 30);
        let err = s.submit(false, 2_000).expect_err("needs confirmation");
        assert_eq!(err.code(), "confirmation_required");
        assert_eq!(s.phase(), Phase::InProgress);
    }

    #[test]
    fn ended_session_rejects_all_mutation() {
        let mut s = started_session(2, 30);
        s.select_answer(0, 1).expect("answer");
        s.submit(true, 5_000).expect("submit");
        assert_eq!(s.select_answer(1, 0).expect_err("ended").code(), "already_ended");
        assert_eq!(s.navigate(1).expect_err("ended").code(), "already_ended");
        assert_eq!(s.snapshot().answered_count, 1);
    }

    #[test]
    fn draft_carries_score_and_violations() {
        let mut s = started_session(4, 30);
        s.select_answer(0, 0).expect("answer 0");
        s.select_answer(2, 2).expect("answer 2");
        s.observe_signal(SignalKind::WindowBlur, 2_000);
        s.observe_signal(SignalKind::TabSwitch, 4_000);
        let draft = s.submit(true, 121_000).expect("submit");
        assert_eq!(draft.score.correct, 2);
        assert_eq!(draft.score.percentage, 50);
        assert_eq!(draft.violations.len(), 2);
        assert_eq!(draft.started_ms, 1_000);
        assert_eq!(draft.duration_secs, 120);
    }

    #[test]
    fn submission_outcome_shows_in_snapshot() {
        let mut s = started_session(1, 30);
        s.submit(true, 2_000).expect("submit");
        s.record_submission(SubmissionOutcome::submitted("res-1".to_string()));
        let snap = s.snapshot();
        let sub = snap.submission.expect("submission recorded");
        assert_eq!(sub.status, "submitted");
        assert_eq!(sub.result_id.as_deref(), Some("res-1"));
    }
}
