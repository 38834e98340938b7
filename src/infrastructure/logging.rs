use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
