use crate::config::AppConfig;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber from configuration.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// raise verbosity without touching config files. Safe to call once per
/// process; later calls are ignored.
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = fmt().with_env_filter(filter).with_target(true);

    let initialized = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if initialized.is_ok() {
        info!(
            environment = %config.environment,
            json = config.log_json,
            "tracing initialized"
        );
    }
}
