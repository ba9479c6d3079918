use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::OverwritePolicy;
use crate::models::AssetCreationOptions;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Wait for Enter before exiting
    #[arg(long)]
    pub pause: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload, encode and publish a video and an audio file, then clean up
    Run {
        /// Video file to encode with the adaptive bitrate preset
        #[arg(long)]
        video: PathBuf,

        /// Audio file to encode with the AAC stereo preset
        #[arg(long)]
        audio: PathBuf,
    },

    /// Upload a file, or every media file of a directory, as new assets
    Upload {
        /// File or directory to upload
        input: PathBuf,

        /// Encryption applied to the created asset
        #[arg(long, default_value = "none")]
        options: AssetCreationOptions,
    },

    /// Encode an existing asset and wait for the job to finish
    Encode {
        /// Input asset id
        asset_id: String,

        /// Encoding preset
        #[arg(long, value_enum, default_value_t = Preset::Video)]
        preset: Preset,

        /// Name of the output asset (defaults to the configured name)
        #[arg(short, long)]
        output_name: Option<String>,

        /// Custom processor name, used with --custom-preset
        #[arg(long)]
        processor: Option<String>,

        /// Custom preset name or configuration, overrides --preset
        #[arg(long)]
        custom_preset: Option<String>,

        /// Encryption applied to the output asset
        #[arg(long, default_value = "none")]
        options: AssetCreationOptions,
    },

    /// Publish an asset for streaming and print its URLs
    Publish {
        asset_id: String,
    },

    /// Show an asset and its files
    Asset {
        asset_id: String,
    },

    /// Show a job and its tasks
    Job {
        job_id: String,
    },

    /// List all assets of the account
    List,

    /// Show stored bytes for one asset, or for the whole account
    Size {
        /// Asset id; all assets when omitted
        asset_id: Option<String>,
    },

    /// Download every file of an asset
    Download {
        asset_id: String,

        /// Target directory
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// What to do with files that already exist
        #[arg(long, value_enum)]
        overwrite: Option<OverwritePolicy>,
    },

    /// Delete an asset
    DeleteAsset {
        asset_id: String,
    },

    /// Cancel a job if needed and delete it
    DeleteJob {
        job_id: String,
    },

    /// Write a configuration template
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "mediasvc.toml")]
        output: PathBuf,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Adaptive bitrate video
    Video,
    /// AAC stereo audio
    Audio,
}
