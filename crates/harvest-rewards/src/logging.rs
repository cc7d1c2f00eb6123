use crate::settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the env filter: `RUST_LOG` wins, otherwise `harvest=<level>`
/// plus any per-module directives.
pub fn build_filter(settings: &LoggingSettings) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("harvest={}", settings.level)),
    );

    for (module, level) in &settings.module_filters {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }
    Ok(filter)
}

/// Install the global subscriber. Calling it twice is an error, as with
/// any `tracing` subscriber.
pub fn init_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = build_filter(settings)?;

    let file = match &settings.file_output {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
        None => None,
    };
    let file_layer = file.map(|f| {
        fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(f))
            .with_ansi(false)
    });
    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    match settings.format.as_str() {
        "json" => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_line_number(true)
                    .with_file(true),
            )
            .try_init()?,
        "compact" => subscriber
            .with(fmt::layer().compact().with_target(false))
            .try_init()?,
        _ => subscriber
            .with(fmt::layer().pretty().with_target(true))
            .try_init()?,
    }
    Ok(())
}
