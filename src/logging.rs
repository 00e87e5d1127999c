use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Installs the process-wide subscriber writing to stderr.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init(filter: &str, json: bool) {
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("dbfix=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
