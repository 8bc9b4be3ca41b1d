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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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
            .get("error")
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, "2", "subjects.list", json!({}));
    assert_eq!(error_code(&early), Some("no_workspace"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.upsert",
        json!({
            "name": "Math",
            "grade": "3",
            "course": "C",
            "subjectType": "normal",
            "adjustPoint": 40,
            "criteria": [
                { "name": "Quiz", "percent": 40, "mode": "scaled" },
                { "name": "Final", "percent": 60, "mode": "raw", "max": 50 }
            ]
        }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.import",
        json!({ "students": [
            { "studentId": "s1", "grade": "3", "courseClass": "C", "number": 1, "name": "Kim" }
        ] }),
    );

    let calls = [
        ("setup.get", json!({})),
        ("subjects.list", json!({})),
        ("criteria.get", json!({ "subjectId": subject_id })),
        ("criteria.setMode", json!({ "subjectId": subject_id, "index": 0, "mode": "scaled" })),
        ("criteria.setPercent", json!({ "subjectId": subject_id, "index": 0, "percent": 40 })),
        ("students.list", json!({})),
        ("roster.view", json!({ "subjectId": subject_id })),
        ("roster.sortBySkill", json!({ "subjectId": subject_id })),
        ("grid.get", json!({ "subjectId": subject_id })),
        ("grid.updateCell", json!({ "subjectId": subject_id, "row": 0, "col": 0, "value": "90" })),
        ("grid.evaluateAll", json!({ "subjectId": subject_id })),
        ("paste.apply", json!({ "subjectId": subject_id, "text": "80", "anchorColumn": 0 })),
        ("skills.set", json!({ "subjectId": subject_id, "studentId": "s1", "value": "A1" })),
        ("skills.get", json!({ "subjectId": subject_id })),
        ("skills.cancel", json!({ "subjectId": subject_id, "studentId": "s1" })),
        ("skills.flush", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let _ = request_ok(&mut stdin, &mut reader, &format!("c{}", i), method, params);
    }

    let unknown = request(&mut stdin, &mut reader, "6", "classes.create", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_line_gets_bad_json_and_daemon_keeps_serving() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(error_code(&value), Some("bad_json"));

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());

    drop(stdin);
    let _ = child.wait();
}
