//! Host-binary bootstrap helpers, feature-gated behind `bootstrap` since the
//! core itself never touches a logging sink or other transport/process
//! concerns. Limited to the subscriber layers this crate's dependency set
//! actually carries (`tracing-subscriber` with `env-filter`/`json`/`time`,
//! no file rotation or OTEL).

pub mod logging;
