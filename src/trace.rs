use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

/// Installs the global `tracing` subscriber.
///
/// `levels` is an env-filter directive string such as
/// `timeplus_sink=debug,info`. Records emitted through the `log` crate are
/// bridged into the same subscriber.
pub fn init(color: bool, json: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore errors when setting, since tests can initialize this
    // multiple times.
    let _ = if json {
        FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .finish()
            .try_init()
    } else {
        FmtSubscriber::builder()
            .with_ansi(color)
            .with_env_filter(filter)
            .finish()
            .try_init()
    };
}
