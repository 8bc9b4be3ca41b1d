mod calc;
mod config;
mod db;
mod ipc;
mod logging;
mod model;
mod paste;
mod roster;
mod row;
mod skills;

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

fn write_line(stdout: &mut io::Stdout, resp: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn main() {
    if let Err(e) = logging::init_tracing() {
        eprintln!("gradebookd: logging disabled: {e:#}");
    }

    let mut state = ipc::AppState::new();

    // stdin is read on its own thread so pending skill writes can be flushed
    // on time while no request is arriving.
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut stdout = io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradebookd started");

    loop {
        let next = match state.next_skill_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(wait)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let line = match next {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                state.flush_due_skill_writes(Instant::now());
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparseable request line");
                write_line(
                    &mut stdout,
                    &serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                );
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        write_line(&mut stdout, &resp);
        state.flush_due_skill_writes(Instant::now());
    }

    let report = state.flush_all_skill_writes();
    tracing::info!(
        written = report.written,
        failed = report.failed,
        "stdin closed; exiting"
    );
}
