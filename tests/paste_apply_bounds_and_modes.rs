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
            "name": "History",
            "grade": "2",
            "subjectType": "elective",
            "criteria": [
                { "name": "C0", "percent": 20, "mode": "scaled" },
                { "name": "C1", "percent": 20, "mode": "scaled" },
                { "name": "C2", "percent": 20, "mode": "raw", "max": 50 },
                { "name": "C3", "percent": 20, "mode": "scaled" },
                { "name": "C4", "percent": 20, "mode": "scaled" }
            ]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-3",
        "students.import",
        json!({ "students": [
            { "studentId": "s1", "grade": "2", "courseClass": "1", "number": 1, "name": "Ahn" },
            { "studentId": "s2", "grade": "2", "courseClass": "1", "number": 2, "name": "Baek" },
            { "studentId": "s3", "grade": "2", "courseClass": "2", "number": 1, "name": "Cho" }
        ] }),
    );
    subject["subjectId"].as_str().expect("subjectId").to_string()
}

fn all_cells_blank(grid: &serde_json::Value) -> bool {
    grid["cells"]
        .as_array()
        .expect("cells")
        .iter()
        .flat_map(|r| r.as_array().expect("row").iter())
        .all(|c| c.as_str() == Some(""))
}

#[test]
fn bounds_failures_leave_the_grid_untouched() {
    let workspace = temp_dir("gradebook-paste-bounds");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let subject_id = seed(&mut stdin, &mut reader, &workspace);

    let no_anchor = request(
        &mut stdin,
        &mut reader,
        "1",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": "1\t2" }),
    );
    assert_eq!(error_code(&no_anchor), Some("no_anchor"));

    let overflow = request(
        &mut stdin,
        &mut reader,
        "2",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": "1\t2\t3\n4\t5\t6", "anchorColumn": 3 }),
    );
    assert_eq!(error_code(&overflow), Some("column_overflow"));
    let details = &overflow["error"]["details"];
    assert_eq!(details["anchorColumn"], json!(3));
    assert_eq!(details["pasteColCount"], json!(3));
    assert_eq!(details["available"], json!(2));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grid.get",
        json!({ "subjectId": subject_id }),
    );
    assert!(all_cells_blank(&grid));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mixed_modes_ask_first_then_apply_selection() {
    let workspace = temp_dir("gradebook-paste-modes");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let subject_id = seed(&mut stdin, &mut reader, &workspace);
    let text = "10\t20\n30,40\n";

    let asked = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": text, "anchorColumn": 1 }),
    );
    assert_eq!(asked["status"], json!("needs_mode_selection"));
    let choices = asked["choices"].as_array().expect("choices");
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0]["criterionIndex"], json!(1));
    assert_eq!(choices[1]["current"], json!("raw"));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grid.get",
        json!({ "subjectId": subject_id }),
    );
    assert!(all_cells_blank(&grid));

    let cancelled = request(
        &mut stdin,
        &mut reader,
        "3",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": text, "anchorColumn": 1, "modes": null }),
    );
    assert_eq!(error_code(&cancelled), Some("cancelled"));

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "paste.apply",
        json!({
            "subjectId": subject_id,
            "text": text,
            "anchorColumn": 1,
            "modes": { "2": "scaled" }
        }),
    );
    assert_eq!(applied["status"], json!("applied"));
    let outcome = &applied["outcome"];
    assert_eq!(outcome["modesChanged"], json!([2]));
    assert_eq!(outcome["rowsWritten"], json!(2));
    assert_eq!(outcome["cellsWritten"], json!(4));
    // A mode change re-evaluates the whole roster.
    assert_eq!(outcome["rows"].as_array().map(|r| r.len()), Some(3));
    assert_eq!(outcome["rows"][0]["total"], json!(6));

    let criteria = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "criteria.get",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(criteria["criteria"][2]["mode"], json!("scaled"));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grid.get",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(grid["cells"][0], json!(["", "10", "20", "", ""]));
    assert_eq!(grid["cells"][1], json!(["", "30", "40", "", ""]));
    assert_eq!(grid["cells"][2], json!(["", "", "", "", ""]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn extra_rows_are_ignored_and_row_limit_applies() {
    let workspace = temp_dir("gradebook-paste-rows");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let subject_id = seed(&mut stdin, &mut reader, &workspace);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": "1\n2\n3\n4\n5", "anchorColumn": 0 }),
    );
    assert_eq!(applied["outcome"]["rowsWritten"], json!(3));
    assert_eq!(applied["outcome"]["ignoredRows"], json!(2));
    assert_eq!(applied["outcome"]["modesChanged"], json!([]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "paste", "patch": { "maxRows": 2 } }),
    );
    let too_many = request(
        &mut stdin,
        &mut reader,
        "3",
        "paste.apply",
        json!({ "subjectId": subject_id, "text": "1\n2\n3", "anchorColumn": 0 }),
    );
    assert_eq!(error_code(&too_many), Some("paste_too_large"));
    assert_eq!(too_many["error"]["details"]["maxRows"], json!(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
