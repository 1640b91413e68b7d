mod cli;
mod convert;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use soundconv_core::{
    converter::supports_profile, engine::ffmpeg::ElementKind, load_config, load_default_config,
    validate_config, Config, FfmpegEngine, SupportedCodecs,
};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "soundconv_core=debug,soundconv=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
        }
        None => load_default_config().context("Failed to load default configuration")?,
    };
    validate_config(&config).context("Configuration validation failed")?;

    let engine = FfmpegEngine::detect(&config.engine)
        .await
        .with_context(|| format!("Failed to run {:?}", config.engine.ffmpeg_path))?;
    info!(
        "Using ffmpeg at {:?} ({} encoders, {} demuxers)",
        config.engine.ffmpeg_path,
        engine.catalog().count(ElementKind::Encoder),
        engine.catalog().count(ElementKind::Demuxer)
    );

    let result = match cli.command {
        Commands::Convert {
            profile,
            output_dir,
            files,
        } => {
            let profile = config
                .profile(profile.as_deref())
                .cloned()
                .with_context(|| {
                    format!(
                        "Unknown profile {:?}",
                        profile.as_deref().unwrap_or(&config.default_profile)
                    )
                })?;
            convert::convert_files(
                Arc::new(engine),
                profile,
                config.controller,
                &files,
                output_dir.as_deref(),
            )
            .await
        }
        Commands::Profiles => {
            list_profiles(&engine, &config);
            Ok(())
        }
        Commands::Probe { pretty } => {
            let codecs = SupportedCodecs::detect(&engine);
            let json = if pretty {
                serde_json::to_string_pretty(&codecs)?
            } else {
                serde_json::to_string(&codecs)?
            };
            println!("{json}");
            Ok(())
        }
    };

    if cli.metrics {
        print!("{}", metrics::encode_metrics()?);
    }

    result
}

fn list_profiles(engine: &FfmpegEngine, config: &Config) {
    for profile in &config.profiles {
        let marker = if profile.id == config.default_profile {
            "*"
        } else {
            " "
        };
        let status = if supports_profile(engine, profile) {
            "available"
        } else {
            "unavailable"
        };
        println!(
            "{marker} {:<12} {:<24} .{:<6} {status}",
            profile.id, profile.name, profile.extension
        );
        if !profile.description.is_empty() {
            println!("  {:<12} {}", "", profile.description);
        }
    }
}
