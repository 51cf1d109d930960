use mediaflow_core::config::LogFormat;
use tracing_subscriber::{
    fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const DEFAULT_FILTER: &str = "mediaflow=debug,tower_http=debug";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. JSON output carries every
/// structured field; compact output is meant for a terminal.
pub fn init_telemetry(format: &LogFormat) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
                .try_init()?;
        }
        LogFormat::Compact => {
            let console_fmt = tracing_subscriber::fmt::layer().event_format(
                Format::default()
                    .compact()
                    .with_target(false)
                    .without_time(),
            );
            tracing_subscriber::registry()
                .with(filter)
                .with(console_fmt)
                .try_init()?;
        }
    }

    tracing::info!(format = ?format, "Tracing initialized");
    Ok(())
}
