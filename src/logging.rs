//! tracing setup for the report binary
//!
//! - `RUST_LOG` filter, default `colon_survival=info`
//! - json lines when `RUST_LOG_FORMAT=json`, human readable otherwise
//! - everything goes to stderr so `analyze` can print json on stdout

use tracing_subscriber::EnvFilter;

/// install the global subscriber - later calls are no-ops
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("colon_survival=info,colon_report=info"));

    let is_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
