// ABOUTME: Shared logging setup for the hive orchestrator and drone bootstrap
// ABOUTME: init() for the orchestrator, init_for() for drones that share stderr with the app

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
/// Used by the `hive` orchestrator, whose stdout carries the spawn outcome.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Crate-filtered logging to stderr. Default: INFO for named crate, WARN for everything else.
///
/// Drones write to the same stderr the orchestrator scrapes for crash
/// reports, so everything outside the bootstrap stays quiet and lines
/// carry no target or ANSI colors.
pub fn init_for(crate_name: &str) {
    drone_subscriber(filter_for(crate_name), std::io::stderr).init();
}

fn drone_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .finish()
}

fn filter_for(crate_name: &str) -> EnvFilter {
    let directive = format!("{crate_name}=info");
    EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
}
