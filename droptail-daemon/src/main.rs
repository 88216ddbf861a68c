use anyhow::Result;
use clap::Parser;

use droptail_core::config::DroptailConfig;
use droptail_daemon::cli::DaemonCli;
use droptail_daemon::logging;
use droptail_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일(선택) -> 환경변수 -> CLI 플래그 순서로 덮어씀
    let mut config = match &cli.config {
        Some(path) => DroptailConfig::from_file(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?,
        None => DroptailConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration is valid");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "droptail-daemon starting");

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    orchestrator.run().await?;

    tracing::info!("droptail-daemon shut down");
    Ok(())
}
