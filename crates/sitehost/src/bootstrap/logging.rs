//! `tracing-subscriber` init for host binaries embedding this crate. Two
//! sinks: human-readable console (ANSI, respects `RUST_LOG`) and optional
//! structured JSON to a writer the caller already owns (a file, a pipe);
//! the core never decides where logs go, only how they are formatted.
//! No file rotation or OTEL wiring — this crate's dependency set doesn't
//! carry them.

use std::io;

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Console-only subscriber: `RUST_LOG` if set, otherwise INFO. Safe to call
/// more than once; later calls are no-ops (`try_init` swallows the "already
/// set" error).
pub fn init_console() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = tracing_subscriber::registry().with(env_filter).with(console_layer).try_init();
}

/// Console plus a structured JSON layer over `json_writer` (e.g. a rotating
/// file the host already opened). `json_writer` is written with its own
/// `EnvFilter` instance so the two sinks can be leveled independently via
/// `RUST_LOG`.
pub fn init_console_and_json<W>(json_writer: W)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_filter);

    let json_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(json_writer)
        .with_filter(json_filter);

    let _ = tracing_subscriber::registry().with(console_layer).with(json_layer).try_init();
}

/// Stderr is the default console sink for host binaries (keeps stdout free
/// for a handler's own output buffer).
#[must_use]
pub fn stderr_writer() -> impl for<'a> fmt::MakeWriter<'a> + Clone {
    io::stderr
}
