use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::client::MediaServiceClient;
use crate::config::EncodingConfig;
use crate::error::{MediaError, Result};
use crate::models::{Asset, AssetCreationOptions, StreamingUrls};
use crate::progress;

/// File extensions picked up when uploading a directory.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "avi", "wmv", "webm", "mp3", "m4a", "aac", "wav", "wma", "flac",
];

/// Encoded asset and the URLs it can be streamed from.
#[derive(Debug, Clone)]
pub struct PublishedAsset {
    pub asset: Asset,
    pub urls: StreamingUrls,
}

#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub video: PublishedAsset,
    pub audio: PublishedAsset,
    pub total_bytes: u64,
}

/// End-to-end runs over a connected client.
pub struct Workflow<'a> {
    client: &'a MediaServiceClient,
    encoding: EncodingConfig,
}

impl<'a> Workflow<'a> {
    pub fn new(client: &'a MediaServiceClient, encoding: EncodingConfig) -> Self {
        Self { client, encoding }
    }

    /// Upload a video and an audio file, encode and publish both, then remove
    /// the jobs and the source assets and report the account's storage.
    pub async fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, video: P, audio: Q) -> Result<WorkflowReport> {
        let started = Local::now();
        info!("Start: {}", started);

        let video_asset = self.upload_file(video.as_ref()).await?;
        let audio_asset = self.upload_file(audio.as_ref()).await?;

        info!("Submitting video transcoding job...");
        let pb = progress::job_bar("Video");
        let video_encoded = self
            .client
            .encode_video_adaptive_bitrate(
                &video_asset,
                AssetCreationOptions::None,
                &self.encoding.video_output_name,
                |p| progress::update_job(&pb, "Video", p),
            )
            .await?;
        pb.finish_and_clear();
        info!("Video transcoding job finished.");

        info!("Submitting audio transcoding job...");
        let pb = progress::job_bar("Audio");
        let audio_encoded = self
            .client
            .encode_audio_aac_stereo(
                &audio_asset,
                AssetCreationOptions::None,
                &self.encoding.audio_output_name,
                |p| progress::update_job(&pb, "Audio", p),
            )
            .await?;
        pb.finish_and_clear();
        info!("Audio transcoding job finished.");

        let video = self.publish(video_encoded.asset).await?;
        let audio = self.publish(audio_encoded.asset).await?;

        self.client.delete_job(&video_encoded.job.id).await?;
        self.client.delete_job(&audio_encoded.job.id).await?;

        self.client.delete_asset(&video_asset).await?;
        self.client.delete_asset(&audio_asset).await?;

        let total_bytes = self.client.total_file_size_all().await?;
        info!("Total file size: {}", progress::format_megabytes(total_bytes));

        let finished = Local::now();
        info!("Finish: {}", finished);

        Ok(WorkflowReport {
            started,
            finished,
            video,
            audio,
            total_bytes,
        })
    }

    /// Upload one file with a progress bar.
    pub async fn upload_file(&self, path: &Path) -> Result<Asset> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let pb = progress::upload_bar(0, &file_name);

        let asset = self
            .client
            .upload(path, AssetCreationOptions::None, |p| progress::update_upload(&pb, p))
            .await;
        pb.finish_and_clear();

        let asset = asset?;
        info!("Asset {} created.", asset.id);
        Ok(asset)
    }

    /// Upload every media file below `dir`. Failures are logged and skipped.
    pub async fn upload_directory(&self, dir: &Path) -> Result<Vec<Asset>> {
        if !dir.is_dir() {
            return Err(MediaError::Config(format!("{} is not a directory", dir.display())));
        }

        let files = media_files(dir);
        info!("Found {} media files to upload", files.len());

        let mut assets = Vec::new();
        for path in files {
            match self.upload_file(&path).await {
                Ok(asset) => assets.push(asset),
                Err(e) => warn!("Failed to upload {}: {}", path.display(), e),
            }
        }

        Ok(assets)
    }

    async fn publish(&self, asset: Asset) -> Result<PublishedAsset> {
        let urls = self.client.publish_for_streaming(&asset).await?;
        info!("Streaming URLs for {}: {}", asset.id, urls.smooth_streaming);
        Ok(PublishedAsset { asset, urls })
    }
}

/// Media files below `dir`, sorted by path.
pub fn media_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
