use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

fn env_filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => {
            EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Initialize structured logging. `RUST_LOG` applies unless `level` is given;
/// the default filter is `info`.
pub fn init_tracing(format: LogFormat, level: Option<&str>) -> Result<()> {
    let filter = env_filter(level)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = Registry::default().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt_layer.pretty().with_ansi(true)).try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(?format, "Gatehouse logging initialized");
    Ok(())
}

/// Span wrapping one pass through the gateway pipeline.
pub fn create_request_span(method: &str, path: &str) -> tracing::Span {
    tracing::info_span!("request", http.method = method, http.path = path)
}

/// Span wrapping one upstream exchange.
pub fn create_backend_span(backend_url: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "backend_request",
        backend.url = backend_url,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}
