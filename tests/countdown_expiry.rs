use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_proctord");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn proctord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn one_minute_exam() -> serde_json::Value {
    json!({
        "id": "exam-sprint",
        "title": "Sprint Quiz",
        "durationMinutes": 1,
        "startMs": 1_000,
        "endMs": 4_000_000_000_000_i64,
        "questions": [
            { "prompt": "Q1", "options": ["a", "b"], "correctOption": 0 },
            { "prompt": "Q2", "options": ["a", "b"], "correctOption": 1 }
        ]
    })
}

#[test]
fn countdown_reaching_zero_auto_submits_current_answers() {
    let workspace = temp_dir("proctord-expiry");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "exams.put", json!({ "exam": one_minute_exam() }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "session.open",
        json!({ "examId": "exam-sprint", "userId": "stu-2", "nowMs": 1_000_000 }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "4", "session.acknowledge", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.fullscreen",
        json!({ "granted": true, "nowMs": 1_000_000 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.answer",
        json!({ "question": 0, "option": 0 }),
    );

    // 59 ticks keep the session running and count straight down.
    for i in 1..60 {
        let tick = request_ok(
            &mut stdin,
            &mut reader,
            &format!("tick-{}", i),
            "session.tick",
            json!({ "nowMs": 1_000_000 + i * 1_000 }),
        );
        assert_eq!(tick.get("ended").and_then(|v| v.as_bool()), Some(false), "tick {}", i);
        assert_eq!(
            tick.get("remainingSecs").and_then(|v| v.as_i64()),
            Some(60 - i),
            "tick {}",
            i
        );
    }

    // The sixtieth tick hits zero: immediate cutoff and auto-submit.
    let last = request_ok(
        &mut stdin,
        &mut reader,
        "tick-60",
        "session.tick",
        json!({ "nowMs": 1_060_000 }),
    );
    assert_eq!(last.get("ended").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(last.get("remainingSecs").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        last.pointer("/submission/status").and_then(|v| v.as_str()),
        Some("submitted")
    );

    // Terminal state: no further answers, no second finalize.
    assert_eq!(
        request_err_code(
            &mut stdin,
            &mut reader,
            "7",
            "session.answer",
            json!({ "question": 1, "option": 1 })
        ),
        "already_ended"
    );
    assert_eq!(
        request_err_code(
            &mut stdin,
            &mut reader,
            "8",
            "session.submit",
            json!({ "confirmed": true, "nowMs": 1_061_000 })
        ),
        "already_ended"
    );
    let late_tick = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "session.tick",
        json!({ "nowMs": 1_062_000 }),
    );
    assert_eq!(late_tick.get("ended").and_then(|v| v.as_bool()), Some(true));
    assert!(late_tick.get("submission").is_none());

    let admin = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "results.get",
        json!({ "examId": "exam-sprint", "userId": "stu-2", "adminView": true }),
    );
    assert_eq!(admin.pointer("/result/correct").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(admin.pointer("/result/total").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(admin.pointer("/result/percentage").and_then(|v| v.as_i64()), Some(50));
    assert_eq!(admin.pointer("/result/durationSecs").and_then(|v| v.as_i64()), Some(60));

    let snap = request_ok(&mut stdin, &mut reader, "11", "session.snapshot", json!({}));
    assert_eq!(snap.pointer("/session/phase").and_then(|v| v.as_str()), Some("ended"));
    assert_eq!(
        snap.pointer("/session/submission/status").and_then(|v| v.as_str()),
        Some("submitted")
    );
}
