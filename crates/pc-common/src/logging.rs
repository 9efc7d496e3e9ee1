//! Structured Logging Configuration
//!
//! - JSON output for production (LOG_FORMAT=json), one object per line
//!   carrying a top-level `service` field
//! - Human-readable output for development (default)
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Set to "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: Standard log level filter (default: info)
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=pc_relay=trace,tower_http=info`

use std::fmt::Write as _;

use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for the given service.
///
/// Reads LOG_FORMAT and RUST_LOG. In JSON mode every line is tagged with
/// `service_name` so the server and relay logs can share a sink.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter, service_name);
    } else {
        init_text_logging(env_filter);
    }

    tracing::debug!(service = %service_name, "Logging initialized");
}

fn init_json_logging(env_filter: EnvFilter, service_name: &str) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE)
                .map_event_format(|format| ServiceTagged::new(service_name, format)),
        )
        .init();
}

fn init_text_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true)
        )
        .init();
}

/// JSON event format that prepends `"service":"<name>"` to each object.
pub struct ServiceTagged<F> {
    service: String,
    inner: F,
}

impl<F> ServiceTagged<F> {
    pub fn new(service_name: &str, inner: F) -> Self {
        let service = serde_json::to_string(service_name)
            .unwrap_or_else(|_| String::from("\"unknown\""));
        Self { service, inner }
    }
}

impl<S, N, F> FormatEvent<S, N> for ServiceTagged<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut line = String::new();
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;

        match line.strip_prefix('{') {
            Some("}\n") | Some("}") => writeln!(writer, "{{\"service\":{}}}", self.service),
            Some(rest) => write!(writer, "{{\"service\":{},{}", self.service, rest),
            None => writer.write_str(&line),
        }
    }
}
