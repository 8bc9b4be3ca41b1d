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

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-2",
        "subjects.upsert",
        json!({
            "id": "pe",
            "name": "PE",
            "grade": "1",
            "subjectType": "skill",
            "criteria": [{ "name": "Practical", "percent": 100, "mode": "scaled" }]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-3",
        "students.import",
        json!({ "students": [
            { "studentId": "s1", "grade": "1", "courseClass": "1", "number": 1, "name": "Han" },
            { "studentId": "s2", "grade": "1", "courseClass": "1", "number": 2, "name": "Jung" }
        ] }),
    );
    subject["subjectId"].as_str().expect("subjectId").to_string()
}

fn stored_levels(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject_id: &str,
) -> serde_json::Value {
    let result = request_ok(stdin, reader, id, "skills.get", json!({ "subjectId": subject_id }));
    result["levels"].clone()
}

#[test]
fn only_the_last_value_is_written_after_the_quiet_period() {
    let workspace = temp_dir("gradebook-skills-debounce");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let subject_id = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "grading", "patch": { "skillDebounceMs": 200 } }),
    );
    for (i, value) in ["a", "A", "A1"].iter().enumerate() {
        let scheduled = request_ok(
            &mut stdin,
            &mut reader,
            &format!("type-{}", i),
            "skills.set",
            json!({ "subjectId": subject_id, "studentId": "s1", "value": value }),
        );
        assert_eq!(scheduled["key"], json!("pe::s1"));
        assert_eq!(scheduled["dueInMs"], json!(200));
    }

    // Nothing is stored while the write is pending.
    assert_eq!(stored_levels(&mut stdin, &mut reader, "2", &subject_id), json!([]));

    std::thread::sleep(std::time::Duration::from_millis(600));
    let levels = stored_levels(&mut stdin, &mut reader, "3", &subject_id);
    assert_eq!(
        levels,
        json!([{ "studentId": "s1", "value": "A1", "level": "A1", "rank": 2 }])
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn pending_writes_survive_shutdown_and_cancel_drops_them() {
    let workspace = temp_dir("gradebook-skills-shutdown");
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let subject_id = seed(&mut stdin, &mut reader, &workspace);
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "skills.set",
            json!({ "subjectId": subject_id, "studentId": "s1", "value": "s" }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "skills.set",
            json!({ "subjectId": subject_id, "studentId": "s2", "value": "A3" }),
        );
        let cancelled = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "skills.cancel",
            json!({ "subjectId": subject_id, "studentId": "s2" }),
        );
        assert_eq!(cancelled["cancelled"], json!(true));

        // Closing stdin flushes what is still pending.
        drop(stdin);
        let _ = child.wait();
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let subject_id = seed(&mut stdin, &mut reader, &workspace);
    let levels = stored_levels(&mut stdin, &mut reader, "4", &subject_id);
    assert_eq!(
        levels,
        json!([{ "studentId": "s1", "value": "s", "level": "S", "rank": 1 }])
    );

    // A blank value clears the stored level.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "skills.set",
        json!({ "subjectId": subject_id, "studentId": "s1", "value": "" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "6", "skills.flush", json!({}));
    assert_eq!(stored_levels(&mut stdin, &mut reader, "7", &subject_id), json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_subject_is_rejected() {
    let workspace = temp_dir("gradebook-skills-unknown");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "skills.set",
        json!({ "subjectId": "nope", "studentId": "s1", "value": "S" }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
