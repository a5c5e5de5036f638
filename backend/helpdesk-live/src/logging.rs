use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; `LIVE_LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once, later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn"));

    let json = std::env::var("LIVE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt().with_env_filter(env_filter).json().try_init()
    } else {
        fmt().with_env_filter(env_filter).with_target(false).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
