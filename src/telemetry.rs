use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::configuration::Environment;

/// Default filter when `RUST_LOG` is not set
pub fn default_filter(environment: Environment) -> &'static str {
    match environment {
        Environment::Local | Environment::Dev => "debug",
        Environment::Prod => "info",
    }
}

/// Initialise structured logging.
///
/// `local` gets a human-readable formatter, `dev` and `prod` emit JSON lines.
/// `RUST_LOG` overrides the per-environment default level.
pub fn init_telemetry(environment: Environment) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(environment)));

    let registry = tracing_subscriber::registry().with(env_filter);

    match environment {
        Environment::Local => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
            .init(),
        Environment::Dev | Environment::Prod => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .json(),
            )
            .init(),
    }
}
