use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::exam::{self, ExamDefinition};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn now_ms(req: &Request) -> i64 {
    req.params
        .get("nowMs")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

/// Ingest surface for exam definitions. The authoring UI lives elsewhere;
/// this only validates and stores.
fn handle_exams_put(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(raw) = req.params.get("exam") else {
        return err(&req.id, "bad_params", "missing params.exam", None);
    };
    let exam: ExamDefinition = match serde_json::from_value(raw.clone()) {
        Ok(e) => e,
        Err(e) => return err(&req.id, "bad_params", format!("exam: {}", e), None),
    };
    if let Err(e) = exam::validate(&exam) {
        return err(&req.id, &e.code, e.message, e.details);
    }

    let created_at = Utc::now().to_rfc3339();
    match store::put_exam(conn, &exam, &created_at) {
        Ok(()) => ok(&req.id, json!({ "examId": exam.id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn question_view(q: &crate::exam::Question, include_answers: bool) -> serde_json::Value {
    let mut v = json!({
        "prompt": q.prompt,
        "options": q.options,
        "marks": q.marks,
    });
    if include_answers {
        v["correctOption"] = json!(q.correct_option);
    }
    v
}

/// Definition fetch; correct options are stripped unless the trusted shell
/// asks for them.
fn handle_exams_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let include_answers = req
        .params
        .get("includeAnswers")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let exam = match store::get_exam(conn, &exam_id) {
        Ok(Some(e)) => e,
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let questions: Vec<serde_json::Value> = exam
        .questions
        .iter()
        .map(|q| question_view(q, include_answers))
        .collect();

    ok(
        &req.id,
        json!({
            "id": exam.id,
            "title": exam.title,
            "description": exam.description,
            "durationMinutes": exam.duration_minutes,
            "totalMarks": exam.total_marks,
            "passingMarks": exam.passing_marks,
            "startMs": exam.start_ms,
            "endMs": exam.end_ms,
            "questions": questions,
        }),
    )
}

/// Schedule status per exam, optionally against one student's attempts:
/// completed beats the window states, then upcoming/ongoing/ended by time.
fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = req
        .params
        .get("userId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let now = now_ms(req);

    let rows = match store::list_exams(conn) {
        Ok(rows) => rows,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let attempted = if let Some(uid) = user_id.as_deref() {
            match store::find_result(conn, &row.id, uid) {
                Ok(found) => found.is_some(),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        } else {
            false
        };

        let status = if attempted {
            "completed"
        } else if now < row.start_ms {
            "upcoming"
        } else if now <= row.end_ms {
            "ongoing"
        } else {
            "ended"
        };

        out.push(json!({
            "id": row.id,
            "title": row.title,
            "description": row.description,
            "durationMinutes": row.duration_minutes,
            "totalMarks": row.total_marks,
            "passingMarks": row.passing_marks,
            "startMs": row.start_ms,
            "endMs": row.end_ms,
            "questionCount": row.question_count,
            "status": status,
        }));
    }

    ok(&req.id, json!({ "exams": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.put" => Some(handle_exams_put(state, req)),
        "exams.get" => Some(handle_exams_get(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        _ => None,
    }
}
