/// Voxie terminal client - main entry point
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxie_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; quiet by default so log lines don't interleave with the REPL
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn"))
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("Starting Voxie client");
    info!("   Data dir: {}", config.data_dir.display());
    if let Some(user) = config.current_user() {
        info!("   Signed in as: {}", user.author_display_name());
    }

    voxie_core::cli_app::run(config)
        .await
        .map_err(|e| anyhow::anyhow!("Client error: {}", e))?;

    Ok(())
}
