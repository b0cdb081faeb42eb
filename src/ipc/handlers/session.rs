use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::monitor::SignalKind;
use crate::session::{
    Phase, ResultDraft, Session, SessionError, SubmissionOutcome, TickOutcome, UserIdentity,
};
use crate::store::{self, CreateOutcome};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required_index(req: &Request, key: &str) -> Result<usize, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a non-negative integer", key),
                None,
            )
        })
}

/// Timestamps come from the caller when it observed the event; the daemon's
/// clock is only the fallback.
fn param_ms(req: &Request, key: &str) -> i64 {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

fn session_err(req: &Request, e: SessionError) -> serde_json::Value {
    err(&req.id, e.code(), e.message(), None)
}

fn active_session<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut Session, serde_json::Value> {
    state
        .session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_session", "no session is open", None))
}

/// At-most-once result creation. The existence probe is a fast path; the
/// conditional insert is the real guard against a concurrent writer.
fn submit_draft(conn: &Connection, draft: &ResultDraft) -> SubmissionOutcome {
    match store::find_result(conn, &draft.exam_id, &draft.user.user_id) {
        Ok(Some(_)) => return SubmissionOutcome::duplicate_attempt(),
        Ok(None) => {}
        Err(e) => return SubmissionOutcome::submission_failed(e.to_string()),
    }

    let submitted_at = Utc::now().to_rfc3339();
    match store::create_result(conn, draft, &submitted_at) {
        Ok(CreateOutcome::Created(id)) => SubmissionOutcome::submitted(id),
        Ok(CreateOutcome::Duplicate) => SubmissionOutcome::duplicate_attempt(),
        Err(e) => SubmissionOutcome::submission_failed(e.to_string()),
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // A concluded session may be replaced; a live one may not be silently
    // dropped.
    if let Some(existing) = state.session.as_ref() {
        if existing.phase() != Phase::Ended {
            return err(
                &req.id,
                "session_active",
                "another session is already open",
                Some(json!({ "phase": existing.phase().as_str() })),
            );
        }
    }

    let exam = match store::get_exam(conn, &exam_id) {
        Ok(Some(e)) => e,
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = param_ms(req, "nowMs");
    if now < exam.start_ms {
        return err(
            &req.id,
            "not_yet_open",
            "exam has not opened yet",
            Some(json!({ "startMs": exam.start_ms })),
        );
    }
    if now > exam.end_ms {
        return err(
            &req.id,
            "window_closed",
            "exam window has closed",
            Some(json!({ "endMs": exam.end_ms })),
        );
    }

    match store::find_result(conn, &exam_id, &user_id) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "already_attempted",
                "only one attempt is allowed per exam",
                None,
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let user = UserIdentity {
        user_id,
        user_email: opt_str(req, "userEmail"),
        user_name: opt_str(req, "userName"),
    };
    let session = Session::new(exam, user);
    let snapshot = session.snapshot();
    state.session = Some(session);

    ok(&req.id, json!({ "session": snapshot }))
}

fn handle_acknowledge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match active_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.acknowledge() {
        Ok(()) => ok(&req.id, json!({ "phase": session.phase().as_str() })),
        Err(e) => session_err(req, e),
    }
}

fn handle_fullscreen(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(granted) = req.params.get("granted").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing granted", None);
    };
    let now = param_ms(req, "nowMs");

    let session = match active_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.fullscreen_result(granted, now) {
        Ok(()) => {
            let snap = session.snapshot();
            ok(
                &req.id,
                json!({ "phase": snap.phase, "remainingSecs": snap.remaining_secs }),
            )
        }
        Err(e) => session_err(req, e),
    }
}

fn handle_answer(state: &mut AppState, req: &Request) -> serde_json::Value {
    let question = match required_index(req, "question") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let option = match required_index(req, "option") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let session = match active_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.select_answer(question, option) {
        Ok(()) => {
            let snap = session.snapshot();
            ok(
                &req.id,
                json!({ "question": question, "option": option, "answeredCount": snap.answered_count }),
            )
        }
        Err(e) => session_err(req, e),
    }
}

fn handle_navigate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let question = match required_index(req, "question") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let session = match active_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match session.navigate(question) {
        Ok(()) => ok(&req.id, json!({ "currentQuestion": question })),
        Err(e) => session_err(req, e),
    }
}

/// Away-signal from the view layer (visibility change or window blur).
/// Violations count locally first; the relay to the store is best-effort and
/// must never block or fail the exam.
fn handle_signal(state: &mut AppState, req: &Request) -> serde_json::Value {
    let kind_raw = match required_str(req, "kind") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(kind) = SignalKind::parse(&kind_raw) else {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: tab_switch, window_blur",
            Some(json!({ "kind": kind_raw })),
        );
    };
    let at_ms = param_ms(req, "atMs");

    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "no session is open", None);
    };

    let recorded = session.observe_signal(kind, at_ms);
    if let (Some(violation), Some(conn)) = (recorded.as_ref(), state.db.as_ref()) {
        let exam = session.exam();
        let _ = store::log_violation(conn, &exam.id, &exam.title, session.user(), violation);
    }

    let snap = session.snapshot();
    ok(
        &req.id,
        json!({
            "counted": recorded.is_some(),
            "violationCount": snap.violation_count,
        }),
    )
}

fn handle_tick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = param_ms(req, "nowMs");

    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "no session is open", None);
    };

    match session.tick(now) {
        TickOutcome::Ignored => {
            let snap = session.snapshot();
            ok(
                &req.id,
                json!({
                    "phase": snap.phase,
                    "remainingSecs": snap.remaining_secs,
                    "ended": session.phase() == Phase::Ended,
                }),
            )
        }
        TickOutcome::Running { remaining_secs } => ok(
            &req.id,
            json!({
                "phase": Phase::InProgress.as_str(),
                "remainingSecs": remaining_secs,
                "ended": false,
            }),
        ),
        TickOutcome::Expired(draft) => {
            let outcome = match state.db.as_ref() {
                Some(conn) => submit_draft(conn, &draft),
                None => SubmissionOutcome::submission_failed("no workspace selected"),
            };
            session.record_submission(outcome.clone());
            ok(
                &req.id,
                json!({
                    "phase": Phase::Ended.as_str(),
                    "remainingSecs": 0,
                    "ended": true,
                    "submission": outcome,
                }),
            )
        }
    }
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let confirmed = req
        .params
        .get("confirmed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let now = param_ms(req, "nowMs");

    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "no session is open", None);
    };

    match session.submit(confirmed, now) {
        Ok(draft) => {
            let outcome = match state.db.as_ref() {
                Some(conn) => submit_draft(conn, &draft),
                None => SubmissionOutcome::submission_failed("no workspace selected"),
            };
            session.record_submission(outcome.clone());
            ok(&req.id, json!({ "submission": outcome }))
        }
        Err(e) => session_err(req, e),
    }
}

fn handle_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match active_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    ok(&req.id, json!({ "session": session.snapshot() }))
}

/// Walking away before the end persists nothing; there is no draft-save.
fn handle_abandon(state: &mut AppState, req: &Request) -> serde_json::Value {
    let had_session = state.session.take().is_some();
    ok(&req.id, json!({ "abandoned": had_session }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.open" => Some(handle_open(state, req)),
        "session.acknowledge" => Some(handle_acknowledge(state, req)),
        "session.fullscreen" => Some(handle_fullscreen(state, req)),
        "session.answer" => Some(handle_answer(state, req)),
        "session.navigate" => Some(handle_navigate(state, req)),
        "session.signal" => Some(handle_signal(state, req)),
        "session.tick" => Some(handle_tick(state, req)),
        "session.submit" => Some(handle_submit(state, req)),
        "session.snapshot" => Some(handle_snapshot(state, req)),
        "session.abandon" => Some(handle_abandon(state, req)),
        _ => None,
    }
}
