use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ApprovalTarget, ResultRecord};

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

fn full_view(record: &ResultRecord, correct_answers: Option<Vec<usize>>) -> serde_json::Value {
    let mut v = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Some(key) = correct_answers {
        v["correctAnswers"] = json!(key);
    }
    v
}

/// Approval-gated result view. The student sees nothing but the submission
/// stamp until the score is approved, and never the answer key before the
/// answers are; the admin view bypasses both gates.
fn handle_results_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let admin_view = req
        .params
        .get("adminView")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let record = match store::find_result(conn, &exam_id, &user_id) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "not_found", "no result for this exam and user", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if admin_view {
        let key = answer_key(conn, &exam_id);
        return ok(&req.id, json!({ "result": full_view(&record, key) }));
    }

    if !record.score_approved {
        return ok(
            &req.id,
            json!({
                "result": {
                    "examId": record.exam_id,
                    "pendingApproval": true,
                    "status": record.status,
                    "submittedAt": record.submitted_at,
                }
            }),
        );
    }

    let mut view = json!({
        "examId": record.exam_id,
        "examTitle": record.exam_title,
        "correct": record.correct,
        "total": record.total,
        "percentage": record.percentage,
        "durationSecs": record.duration_secs,
        "violationCount": record.violation_count,
        "answers": record.answers,
        "submittedAt": record.submitted_at,
        "scoreApproved": true,
        "answersApproved": record.answers_approved,
    });
    if record.answers_approved {
        if let Some(key) = answer_key(conn, &exam_id) {
            view["correctAnswers"] = json!(key);
        }
    }

    ok(&req.id, json!({ "result": view }))
}

fn answer_key(conn: &Connection, exam_id: &str) -> Option<Vec<usize>> {
    match store::get_exam(conn, exam_id) {
        Ok(Some(exam)) => Some(exam.questions.iter().map(|q| q.correct_option).collect()),
        _ => None,
    }
}

/// Bulk approve/revoke of one flag across every result of an exam; the
/// approval workflow owns these flags, the session core never writes them.
fn handle_results_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target_raw = match required_str(req, "target") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(target) = ApprovalTarget::parse(&target_raw) else {
        return err(
            &req.id,
            "bad_params",
            "target must be one of: score, answers",
            Some(json!({ "target": target_raw })),
        );
    };
    let approved = req
        .params
        .get("approved")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match store::set_approval(conn, &exam_id, target, approved) {
        Ok(updated) => ok(&req.id, json!({ "updated": updated })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.get" => Some(handle_results_get(state, req)),
        "results.approve" => Some(handle_results_approve(state, req)),
        _ => None,
    }
}
