use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "content_sync=info,reqwest=warn,tungstenite=warn,tokio_tungstenite=warn";

/// Initializes a global tracing subscriber respecting the `RUST_LOG`
/// environment variable. Subsequent calls become no-ops so tests and the
/// binary can both invoke it.
///
/// `CONTENT_SYNC_LOG_SPANS=close` logs each per-group fetch span with its
/// elapsed time when it ends; `full` also logs when spans open.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let spans = span_events(std::env::var("CONTENT_SYNC_LOG_SPANS").ok().as_deref());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(spans)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn span_events(raw: Option<&str>) -> FmtSpan {
    match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("close") | Some("1") | Some("true") => FmtSpan::CLOSE,
        Some("full") => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}
