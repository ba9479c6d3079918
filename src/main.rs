//! mediasvc - command line client for a cloud media service
//!
//! Uploads media files as assets, encodes them remotely, publishes streaming
//! URLs and cleans up remote resources.

use std::io::BufRead;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mediasvc::cli::{Args, Commands, Preset};
use mediasvc::client::MediaServiceClient;
use mediasvc::config::Config;
use mediasvc::error::MediaError;
use mediasvc::models::{overall_progress, Asset, JobProgress, StreamingUrls};
use mediasvc::progress;
use mediasvc::workflow::Workflow;

const DEFAULT_CONFIG_FILE: &str = "mediasvc.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let pause = args.pause;

    let outcome = run(args).await;
    if let Err(e) = &outcome {
        eprintln!("{}", error_message(e));
    }

    if pause {
        println!("Press Enter to exit...");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    setup_logging(args.verbose)?;

    if let Commands::InitConfig { output, force } = &args.command {
        return init_config(output, *force);
    }

    let mut config = load_config(args.config.as_deref())?;
    config.apply_env_overrides();
    if let Commands::Download { overwrite: Some(policy), .. } = &args.command {
        config.transfer.overwrite = *policy;
    }

    let client = MediaServiceClient::open(&config).await?;
    let result = execute(&client, &config, args.command).await;
    client.close();
    result
}

async fn execute(client: &MediaServiceClient, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Run { video, audio } => {
            let workflow = Workflow::new(client, config.encoding.clone());
            let report = workflow.run(&video, &audio).await?;

            println!("Start: {}", report.started);
            print_urls(&report.video.asset, &report.video.urls);
            print_urls(&report.audio.asset, &report.audio.urls);
            println!("Total file size: {}", progress::format_megabytes(report.total_bytes));
            println!("Finish: {}", report.finished);
        }
        Commands::Upload { input, options } => {
            let workflow = Workflow::new(client, config.encoding.clone());
            if input.is_dir() {
                let assets = workflow.upload_directory(&input).await?;
                for asset in &assets {
                    println!("{}\t{}", asset.id, asset.name);
                }
                println!("Uploaded {} assets", assets.len());
            } else {
                let pb = progress::upload_bar(0, &input.display().to_string());
                let asset = client
                    .upload(&input, options, |p| progress::update_upload(&pb, p))
                    .await;
                pb.finish_and_clear();
                let asset = asset?;
                println!("Asset {} created.", asset.id);
            }
        }
        Commands::Encode { asset_id, preset, output_name, processor, custom_preset, options } => {
            let asset = require_asset(client, &asset_id).await?;
            let output_name = output_name.unwrap_or_else(|| match preset {
                Preset::Video => config.encoding.video_output_name.clone(),
                Preset::Audio => config.encoding.audio_output_name.clone(),
            });

            println!("Submitting transcoding job...");
            let pb = progress::job_bar("Encoding");
            let on_progress = |p: &JobProgress| progress::update_job(&pb, "Encoding", p);
            let outcome = match (custom_preset, preset) {
                (Some(custom), _) => {
                    let processor = processor.unwrap_or_else(|| config.encoding.processor_name.clone());
                    client.encode(&asset, options, &output_name, &processor, &custom, on_progress).await
                }
                (None, Preset::Video) => {
                    client.encode_video_adaptive_bitrate(&asset, options, &output_name, on_progress).await
                }
                (None, Preset::Audio) => {
                    client.encode_audio_aac_stereo(&asset, options, &output_name, on_progress).await
                }
            };
            pb.finish_and_clear();
            let outcome = outcome?;

            println!("Transcoding job {} finished.", outcome.job.id);
            println!("Output asset: {} ({})", outcome.asset.id, outcome.asset.name);
        }
        Commands::Publish { asset_id } => {
            let asset = require_asset(client, &asset_id).await?;
            let urls = client.publish_for_streaming(&asset).await?;
            print_urls(&asset, &urls);
        }
        Commands::Asset { asset_id } => {
            let asset = require_asset(client, &asset_id).await?;
            println!("Id:       {}", asset.id);
            println!("Name:     {}", asset.name);
            println!("Options:  {:?}", asset.options);
            if let Some(created) = asset.created {
                println!("Created:  {}", created);
            }

            let files = client.asset_files(&asset).await?;
            println!("\n{:<50} {:>15} {:<8}", "File", "Bytes", "Primary");
            println!("{}", "-".repeat(75));
            for file in files {
                println!("{:<50} {:>15} {:<8}", file.name, file.content_file_size, file.is_primary);
            }
        }
        Commands::Job { job_id } => {
            let job = client
                .get_job(&job_id)
                .await?
                .ok_or_else(|| MediaError::not_found(format!("Job '{}'", job_id)))?;
            println!("Id:     {}", job.id);
            println!("Name:   {}", job.name);
            println!("State:  {}", job.state);

            let tasks = client.job_tasks(&job.id).await?;
            println!("Progress: {:.2}%", overall_progress(&tasks));
            for task in tasks {
                println!("  {} {:.2}%", task.name, task.progress);
                for detail in task.error_details {
                    println!("    {}: {}", detail.code, detail.message);
                }
            }
        }
        Commands::List => {
            let assets = client.list_assets().collect().await?;
            if assets.is_empty() {
                println!("No assets found.");
            } else {
                println!("{:<50} {:<40}", "Id", "Name");
                println!("{}", "-".repeat(90));
                for asset in &assets {
                    println!("{:<50} {:<40}", asset.id, asset.name);
                }
                println!("\n{} assets", assets.len());
            }
        }
        Commands::Size { asset_id } => {
            let bytes = match asset_id {
                Some(id) => {
                    let asset = require_asset(client, &id).await?;
                    client.total_file_size(&asset).await?
                }
                None => client.total_file_size_all().await?,
            };
            println!("Total file size: {}", progress::format_megabytes(bytes));
        }
        Commands::Download { asset_id, output_dir, .. } => {
            let asset = require_asset(client, &asset_id).await?;
            let pb = progress::download_bar();
            let written = client
                .download_asset(&asset, &output_dir, |p| progress::update_download(&pb, p))
                .await;
            pb.finish_and_clear();
            for path in written? {
                println!("{}", path.display());
            }
        }
        Commands::DeleteAsset { asset_id } => {
            let asset = require_asset(client, &asset_id).await?;
            client.delete_asset(&asset).await?;
            println!("Asset {} deleted.", asset.id);
        }
        Commands::DeleteJob { job_id } => {
            client.delete_job(&job_id).await?;
            println!("Job {} deleted.", job_id);
        }
        Commands::InitConfig { .. } => unreachable!("init-config runs before connecting"),
    }

    Ok(())
}

async fn require_asset(client: &MediaServiceClient, asset_id: &str) -> Result<Asset> {
    let asset = client
        .get_asset(asset_id)
        .await?
        .ok_or_else(|| MediaError::not_found(format!("Asset '{}'", asset_id)))?;
    Ok(asset)
}

fn print_urls(asset: &Asset, urls: &StreamingUrls) {
    println!("Use the following URLs for adaptive streaming of {}:", asset.name);
    println!("{}", urls.smooth_streaming);
    println!("{}", urls.hls);
    println!("{}", urls.mpeg_dash);
    println!();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(MediaError::FileExists(output.to_path_buf()).into());
    }
    Config::default().save_to_file(output)?;
    println!("Configuration template written to {}", output.display());
    Ok(())
}

/// Service payload message when available, otherwise the full error chain.
fn error_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<MediaError>() {
        Some(media_error) => media_error.user_message(),
        None => format!("{:#}", error),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".mediasvc").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "mediasvc.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("mediasvc.log").display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_config_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediasvc.toml");
        std::fs::write(&path, "# keep").unwrap();

        let err = init_config(&path, false).unwrap_err();
        assert!(matches!(err.downcast_ref::<MediaError>(), Some(MediaError::FileExists(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# keep");

        init_config(&path, true).unwrap();
        assert!(Config::from_file(&path).is_ok());
    }
}
