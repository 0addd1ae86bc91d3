//! Set up the tracing stack for the server.

use tracing_subscriber::{fmt, layer::SubscriberExt, registry, util::SubscriberInitExt, EnvFilter};

/// Set up logging.
///
/// The CLI override wins; otherwise the `RORG_LOG` environment variable
/// is consulted, and the default is `info`.
pub(crate) fn setup(cli: Option<&str>) {
    let env_filter = match cli {
        Some(directive) => filt_from_str_verbose(directive, "--log-level option"),
        None => EnvFilter::try_from_env("RORG_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    };
    registry().with(fmt::Layer::default()).with(env_filter).init();
}

/// As [`EnvFilter::new`], but print a message if any directive in the
/// filter is invalid.
fn filt_from_str_verbose(s: &str, source: &str) -> EnvFilter {
    EnvFilter::try_new(s).unwrap_or_else(|_| {
        eprintln!("Problem in {}:", source);
        EnvFilter::new(s)
    })
}
