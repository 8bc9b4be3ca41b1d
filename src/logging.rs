use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "gradebookd=warn";

/// Structured logging goes to stderr; stdout carries the IPC protocol.
///
/// `GRADEBOOKD_LOG` takes an `EnvFilter` directive (a bare level such as
/// `debug` is scoped to this crate). `GRADEBOOKD_LOG_JSON=1` switches to
/// JSON lines.
pub fn init_tracing() -> anyhow::Result<()> {
    let directive = std::env::var("GRADEBOOKD_LOG").ok();
    let json = std::env::var("GRADEBOOKD_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    init_with(directive.as_deref(), json)
}

fn filter_for(directive: Option<&str>) -> EnvFilter {
    match directive.map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) if d.contains('=') || d.contains(',') => {
            EnvFilter::try_new(d).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
        }
        Some(level) => EnvFilter::try_new(format!("gradebookd={}", level))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        None => EnvFilter::new(DEFAULT_FILTER),
    }
}

fn init_with(directive: Option<&str>, json: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter_for(directive));

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}
