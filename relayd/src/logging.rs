use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` is honoured when set, otherwise
/// everything at `info` and above is printed. Disabled logging installs a
/// filter which lets nothing through.
pub fn init(enabled: bool) {
    let env_filter = if enabled {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("off")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
