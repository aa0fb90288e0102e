//! Log subscriber setup

use crate::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_directives(config: &Config) -> &'static str {
    if config.debug {
        "info,jimo_core=debug"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` takes precedence over the config-derived default. Calling this
/// more than once is harmless; later calls leave the first subscriber in
/// place.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(config.debug))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(env = %config.env, debug = config.debug, "logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        let mut config = Config::default();
        assert_eq!(default_directives(&config), "info,jimo_core=debug");

        config.debug = false;
        assert_eq!(default_directives(&config), "info");
    }

    #[test]
    fn test_init_twice() {
        let config = Config::default();
        init(&config);
        init(&config);
    }
}
