use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::exam::{ExamDefinition, Question};
use crate::session::{ResultDraft, UserIdentity};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("proctor.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            duration_minutes INTEGER NOT NULL,
            total_marks REAL NOT NULL DEFAULT 0,
            passing_marks REAL NOT NULL DEFAULT 0,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            prompt TEXT NOT NULL,
            options TEXT NOT NULL,
            correct_option INTEGER NOT NULL,
            marks REAL NOT NULL DEFAULT 1,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(exam_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_exam ON questions(exam_id)",
        [],
    )?;

    // One row per (exam, user) ever. The unique constraint is the duplicate
    // guard; the pre-submit lookup is only a fast path.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_email TEXT,
            user_name TEXT,
            exam_title TEXT NOT NULL,
            answers TEXT NOT NULL,
            correct INTEGER NOT NULL,
            total INTEGER NOT NULL,
            percentage INTEGER NOT NULL,
            started_ms INTEGER NOT NULL,
            ended_ms INTEGER NOT NULL,
            duration_secs INTEGER NOT NULL,
            violation_count INTEGER NOT NULL,
            violations TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            score_approved INTEGER NOT NULL DEFAULT 0,
            answers_approved INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(exam_id, user_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_exam ON exam_results(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_user ON exam_results(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS violation_events(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_email TEXT,
            user_name TEXT,
            exam_title TEXT NOT NULL,
            kind TEXT NOT NULL,
            at_ms INTEGER NOT NULL,
            count INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_violation_events_exam ON violation_events(exam_id)",
        [],
    )?;

    Ok(conn)
}

pub fn put_exam(conn: &Connection, exam: &ExamDefinition, created_at: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO exams(id, title, description, duration_minutes, total_marks,
                           passing_marks, start_ms, end_ms, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           duration_minutes = excluded.duration_minutes,
           total_marks = excluded.total_marks,
           passing_marks = excluded.passing_marks,
           start_ms = excluded.start_ms,
           end_ms = excluded.end_ms",
        (
            &exam.id,
            &exam.title,
            &exam.description,
            exam.duration_minutes,
            exam.total_marks,
            exam.passing_marks,
            exam.start_ms,
            exam.end_ms,
            created_at,
        ),
    )?;

    conn.execute("DELETE FROM questions WHERE exam_id = ?", [&exam.id])?;
    for (idx, q) in exam.questions.iter().enumerate() {
        let qid = Uuid::new_v4().to_string();
        let options = serde_json::to_string(&q.options)?;
        conn.execute(
            "INSERT INTO questions(id, exam_id, idx, prompt, options, correct_option, marks)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &qid,
                &exam.id,
                idx as i64,
                &q.prompt,
                &options,
                q.correct_option as i64,
                q.marks,
            ),
        )?;
    }

    Ok(())
}

pub fn get_exam(conn: &Connection, exam_id: &str) -> anyhow::Result<Option<ExamDefinition>> {
    let row: Option<(String, String, i64, f64, f64, i64, i64)> = conn
        .query_row(
            "SELECT title, description, duration_minutes, total_marks, passing_marks,
                    start_ms, end_ms
             FROM exams WHERE id = ?",
            [exam_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()?;
    let Some((title, description, duration_minutes, total_marks, passing_marks, start_ms, end_ms)) =
        row
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT prompt, options, correct_option, marks
         FROM questions WHERE exam_id = ? ORDER BY idx",
    )?;
    let raw: Vec<(String, String, i64, f64)> = stmt
        .query_map([exam_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut questions = Vec::with_capacity(raw.len());
    for (prompt, options, correct_option, marks) in raw {
        let options: Vec<String> = serde_json::from_str(&options)?;
        questions.push(Question {
            prompt,
            options,
            correct_option: correct_option as usize,
            marks,
        });
    }

    Ok(Some(ExamDefinition {
        id: exam_id.to_string(),
        title,
        description,
        duration_minutes,
        total_marks,
        passing_marks,
        start_ms,
        end_ms,
        questions,
    }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamListRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: i64,
    pub total_marks: f64,
    pub passing_marks: f64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub question_count: i64,
}

pub fn list_exams(conn: &Connection) -> anyhow::Result<Vec<ExamListRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.title, e.description, e.duration_minutes, e.total_marks,
                e.passing_marks, e.start_ms, e.end_ms,
                (SELECT COUNT(*) FROM questions q WHERE q.exam_id = e.id)
         FROM exams e
         ORDER BY e.start_ms",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ExamListRow {
                id: r.get(0)?,
                title: r.get(1)?,
                description: r.get(2)?,
                duration_minutes: r.get(3)?,
                total_marks: r.get(4)?,
                passing_marks: r.get(5)?,
                start_ms: r.get(6)?,
                end_ms: r.get(7)?,
                question_count: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub exam_id: String,
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub exam_title: String,
    pub answers: HashMap<usize, usize>,
    pub correct: i64,
    pub total: i64,
    pub percentage: i64,
    pub started_ms: i64,
    pub ended_ms: i64,
    pub duration_secs: i64,
    pub violation_count: i64,
    pub violations: serde_json::Value,
    pub status: String,
    pub submitted_at: String,
    pub score_approved: bool,
    pub answers_approved: bool,
}

pub fn find_result(
    conn: &Connection,
    exam_id: &str,
    user_id: &str,
) -> anyhow::Result<Option<ResultRecord>> {
    let row = conn
        .query_row(
            "SELECT id, user_email, user_name, exam_title, answers, correct, total,
                    percentage, started_ms, ended_ms, duration_secs, violation_count,
                    violations, status, submitted_at, score_approved, answers_approved
             FROM exam_results WHERE exam_id = ? AND user_id = ?",
            (exam_id, user_id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                    r.get::<_, i64>(8)?,
                    r.get::<_, i64>(9)?,
                    r.get::<_, i64>(10)?,
                    r.get::<_, i64>(11)?,
                    r.get::<_, String>(12)?,
                    r.get::<_, String>(13)?,
                    r.get::<_, String>(14)?,
                    r.get::<_, i64>(15)?,
                    r.get::<_, i64>(16)?,
                ))
            },
        )
        .optional()?;

    let Some((
        id,
        user_email,
        user_name,
        exam_title,
        answers,
        correct,
        total,
        percentage,
        started_ms,
        ended_ms,
        duration_secs,
        violation_count,
        violations,
        status,
        submitted_at,
        score_approved,
        answers_approved,
    )) = row
    else {
        return Ok(None);
    };

    Ok(Some(ResultRecord {
        id,
        exam_id: exam_id.to_string(),
        user_id: user_id.to_string(),
        user_email,
        user_name,
        exam_title,
        answers: serde_json::from_str(&answers)?,
        correct,
        total,
        percentage,
        started_ms,
        ended_ms,
        duration_secs,
        violation_count,
        violations: serde_json::from_str(&violations)?,
        status,
        submitted_at,
        score_approved: score_approved != 0,
        answers_approved: answers_approved != 0,
    }))
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(String),
    /// The unique (exam, user) constraint absorbed the insert: some other
    /// writer got there first.
    Duplicate,
}

pub fn create_result(
    conn: &Connection,
    draft: &ResultDraft,
    submitted_at: &str,
) -> anyhow::Result<CreateOutcome> {
    let id = Uuid::new_v4().to_string();
    let answers = serde_json::to_string(&draft.answers)?;
    let violations = serde_json::to_string(&draft.violations)?;

    let changed = conn.execute(
        "INSERT INTO exam_results(
            id, exam_id, user_id, user_email, user_name, exam_title, answers,
            correct, total, percentage, started_ms, ended_ms, duration_secs,
            violation_count, violations, status, submitted_at,
            score_approved, answers_approved)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'completed', ?, 0, 0)
         ON CONFLICT(exam_id, user_id) DO NOTHING",
        rusqlite::params![
            &id,
            &draft.exam_id,
            &draft.user.user_id,
            &draft.user.user_email,
            &draft.user.user_name,
            &draft.exam_title,
            &answers,
            draft.score.correct as i64,
            draft.score.total as i64,
            draft.score.percentage,
            draft.started_ms,
            draft.ended_ms,
            draft.duration_secs,
            draft.violations.len() as i64,
            &violations,
            submitted_at,
        ],
    )?;

    if changed == 0 {
        return Ok(CreateOutcome::Duplicate);
    }
    Ok(CreateOutcome::Created(id))
}

#[derive(Debug, Clone, Copy)]
pub enum ApprovalTarget {
    Score,
    Answers,
}

impl ApprovalTarget {
    pub fn parse(s: &str) -> Option<ApprovalTarget> {
        match s {
            "score" => Some(ApprovalTarget::Score),
            "answers" => Some(ApprovalTarget::Answers),
            _ => None,
        }
    }
}

/// Bulk flip across every result of one exam; used by the approval workflow
/// for both approve and revoke. Returns the number of rows touched.
pub fn set_approval(
    conn: &Connection,
    exam_id: &str,
    target: ApprovalTarget,
    approved: bool,
) -> anyhow::Result<usize> {
    let sql = match target {
        ApprovalTarget::Score => "UPDATE exam_results SET score_approved = ? WHERE exam_id = ?",
        ApprovalTarget::Answers => {
            "UPDATE exam_results SET answers_approved = ? WHERE exam_id = ?"
        }
    };
    let changed = conn.execute(sql, (approved as i64, exam_id))?;
    Ok(changed)
}

/// Real-time relay of one counted violation. Callers treat this as
/// fire-and-forget; the session's own log stays authoritative.
pub fn log_violation(
    conn: &Connection,
    exam_id: &str,
    exam_title: &str,
    user: &UserIdentity,
    violation: &crate::monitor::Violation,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO violation_events(id, exam_id, user_id, user_email, user_name,
                                      exam_title, kind, at_ms, count)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            exam_id,
            &user.user_id,
            &user.user_email,
            &user.user_name,
            exam_title,
            &violation.kind,
            violation.at_ms,
            violation.count as i64,
        ],
    )?;
    Ok(())
}
