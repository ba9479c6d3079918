use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use futures::stream::{self, Stream, TryStreamExt};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{Config, OverwritePolicy, PollPolicy};
use crate::error::{MediaError, Result};
use crate::jobs;
use crate::models::{
    AccessPermissions, Asset, AssetCreationOptions, AssetFile, DownloadProgress, EncodeOutcome, Job,
    JobProgress, JobTask, Locator, LocatorType, StreamingUrls, UploadProgress,
};
use crate::service::{MediaServiceApi, MediaServiceFactory, NewAssetFile, NewJob, NewLocator};

/// Service-side page size limit for collection queries.
pub const ASSET_PAGE_SIZE: usize = 1000;

/// Lifetime of the SAS locators used for uploads and downloads.
const TRANSFER_POLICY_MINUTES: f64 = 24.0 * 60.0;

/// Origin locators start slightly in the past to tolerate clock skew.
const LOCATOR_START_SKEW_MINUTES: i64 = 5;

/// Settings the facade needs from the configuration.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub processor_name: String,
    pub video_preset: String,
    pub audio_preset: String,
    pub encode_poll: PollPolicy,
    pub delete_poll: PollPolicy,
    pub block_size: usize,
    pub locator_duration: Duration,
    pub overwrite: OverwritePolicy,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            processor_name: config.encoding.processor_name.clone(),
            video_preset: config.encoding.video_preset.clone(),
            audio_preset: config.encoding.audio_preset.clone(),
            encode_poll: config.polling.encode_policy(),
            delete_poll: config.polling.delete_policy(),
            block_size: config.transfer.block_size_bytes.max(1),
            locator_duration: Duration::from_secs(u64::from(config.transfer.locator_duration_days) * 24 * 60 * 60),
            overwrite: config.transfer.overwrite,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Single point of contact with the remote media service.
///
/// Owned by the caller; open it with [`MediaServiceClient::open`] and release
/// it with [`MediaServiceClient::close`]. Operations run one at a time and
/// keep no remote state locally.
pub struct MediaServiceClient {
    api: Box<dyn MediaServiceApi>,
    settings: ClientSettings,
}

impl MediaServiceClient {
    /// Authenticate against the configured account.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let api = MediaServiceFactory::connect(&config.service).await?;
        Ok(Self::with_api(api, ClientSettings::from_config(config)))
    }

    pub fn with_api(api: Box<dyn MediaServiceApi>, settings: ClientSettings) -> Self {
        Self { api, settings }
    }

    /// End the session.
    pub fn close(self) {
        info!("Closing media service session");
    }

    /// Upload a local file as a new asset.
    ///
    /// The file is sent in blocks of `block_size` bytes; `on_progress` fires
    /// after each block with a non-decreasing byte count.
    pub async fn upload<P, F>(&self, path: P, options: AssetCreationOptions, mut on_progress: F) -> Result<Asset>
    where
        P: AsRef<Path>,
        F: FnMut(&UploadProgress),
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.display().to_string()));
        }
        let metadata = fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(MediaError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| MediaError::FileNotFound(path.display().to_string()))?;

        info!("Uploading {} ({} bytes)", path.display(), metadata.len());
        let asset = self.api.create_asset(&file_name, options).await?;
        debug!("Created asset {} for {}", asset.id, file_name);

        let result = self
            .transfer_to_asset(&asset, path, &file_name, metadata.len(), &mut on_progress)
            .await;

        if let Err(e) = result {
            if let Err(cleanup) = self.api.delete_asset(&asset.id).await {
                warn!("Failed to remove incomplete asset {}: {}", asset.id, cleanup);
            }
            return Err(e);
        }

        info!("Asset {} created", asset.id);
        Ok(asset)
    }

    async fn transfer_to_asset(
        &self,
        asset: &Asset,
        path: &Path,
        file_name: &str,
        total_bytes: u64,
        on_progress: &mut dyn FnMut(&UploadProgress),
    ) -> Result<()> {
        let policy = self
            .api
            .create_access_policy("UploadPolicy", TRANSFER_POLICY_MINUTES, AccessPermissions::WRITE)
            .await?;
        let locator = match self
            .api
            .create_locator(&NewLocator {
                access_policy_id: policy.id.clone(),
                asset_id: asset.id.clone(),
                locator_type: LocatorType::Sas,
                start_time: None,
            })
            .await
        {
            Ok(locator) => locator,
            Err(e) => {
                self.release_policy(&policy.id).await;
                return Err(e);
            }
        };

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let uploaded = self
            .upload_blocks(&locator, path, file_name, total_bytes, &content_type, on_progress)
            .await;

        self.release_locator(&locator).await;
        uploaded?;

        self.api
            .create_asset_file(&NewAssetFile {
                name: file_name.to_string(),
                parent_asset_id: asset.id.clone(),
                content_file_size: total_bytes,
                is_primary: true,
                mime_type: Some(content_type),
            })
            .await?;

        Ok(())
    }

    async fn upload_blocks(
        &self,
        locator: &Locator,
        path: &Path,
        file_name: &str,
        total_bytes: u64,
        content_type: &str,
        on_progress: &mut dyn FnMut(&UploadProgress),
    ) -> Result<()> {
        let mut file = fs::File::open(path).await?;
        let mut buffer = vec![0u8; self.settings.block_size];
        let mut block_ids = Vec::new();
        let mut bytes_sent = 0u64;

        loop {
            let filled = read_block(&mut file, &mut buffer).await?;
            if filled == 0 {
                break;
            }

            let id = block_id(block_ids.len());
            self.api
                .put_block(locator, file_name, &id, buffer[..filled].to_vec())
                .await?;
            block_ids.push(id);

            bytes_sent += filled as u64;
            on_progress(&UploadProgress {
                file_name: file_name.to_string(),
                bytes_sent,
                total_bytes,
            });
        }

        self.api
            .put_block_list(locator, file_name, &block_ids, content_type)
            .await?;

        if block_ids.is_empty() {
            on_progress(&UploadProgress {
                file_name: file_name.to_string(),
                bytes_sent: 0,
                total_bytes: 0,
            });
        }

        debug!("Committed {} blocks for {}", block_ids.len(), file_name);
        Ok(())
    }

    /// Submit a single-task job and wait until it reaches a terminal state.
    pub async fn encode<F>(
        &self,
        asset: &Asset,
        options: AssetCreationOptions,
        output_name: &str,
        processor_name: &str,
        preset: &str,
        on_progress: F,
    ) -> Result<EncodeOutcome>
    where
        F: FnMut(&JobProgress),
    {
        let processor = self
            .api
            .media_processors(processor_name)
            .await?
            .into_iter()
            .max_by(|a, b| a.version_key().cmp(&b.version_key()))
            .ok_or_else(|| MediaError::not_found(format!("Media processor '{}'", processor_name)))?;

        let job = self
            .api
            .create_job(&NewJob {
                name: format!("Encoding {} to {}", asset.name, preset),
                input_asset_id: asset.id.clone(),
                output_asset_name: output_name.to_string(),
                output_options: options,
                processor_id: processor.id.clone(),
                configuration: preset.to_string(),
            })
            .await?;
        info!(
            "Submitted job {} ({} {} with '{}')",
            job.id, processor.name, processor.version, preset
        );

        let job = jobs::wait_for_job(self.api.as_ref(), &job.id, self.settings.encode_poll, on_progress).await?;

        let asset = self
            .api
            .job_output_assets(&job.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MediaError::Service {
                status: 404,
                code: None,
                message: format!("Job {} finished without an output asset", job.id),
            })?;

        info!("Job {} produced asset {}", job.id, asset.id);
        Ok(EncodeOutcome { asset, job })
    }

    /// Encode with the adaptive bitrate video preset.
    pub async fn encode_video_adaptive_bitrate<F>(
        &self,
        asset: &Asset,
        options: AssetCreationOptions,
        output_name: &str,
        on_progress: F,
    ) -> Result<EncodeOutcome>
    where
        F: FnMut(&JobProgress),
    {
        let settings = &self.settings;
        self.encode(asset, options, output_name, &settings.processor_name, &settings.video_preset, on_progress)
            .await
    }

    /// Encode with the stereo AAC audio preset.
    pub async fn encode_audio_aac_stereo<F>(
        &self,
        asset: &Asset,
        options: AssetCreationOptions,
        output_name: &str,
        on_progress: F,
    ) -> Result<EncodeOutcome>
    where
        F: FnMut(&JobProgress),
    {
        let settings = &self.settings;
        self.encode(asset, options, output_name, &settings.processor_name, &settings.audio_preset, on_progress)
            .await
    }

    /// Create a read-only origin locator and derive the streaming URLs.
    pub async fn publish_for_streaming(&self, asset: &Asset) -> Result<StreamingUrls> {
        let files = self.api.asset_files(&asset.id).await?;
        let manifest = files
            .iter()
            .find(|file| file.name.to_lowercase().ends_with(".ism"))
            .ok_or_else(|| MediaError::Service {
                status: 400,
                code: None,
                message: format!("Asset {} has no streaming manifest (.ism)", asset.id),
            })?;

        let minutes = self.settings.locator_duration.as_secs_f64() / 60.0;
        let policy = self
            .api
            .create_access_policy("StreamingPolicy", minutes, AccessPermissions::READ)
            .await?;
        let locator = match self
            .api
            .create_locator(&NewLocator {
                access_policy_id: policy.id.clone(),
                asset_id: asset.id.clone(),
                locator_type: LocatorType::OnDemandOrigin,
                start_time: Some(Utc::now() - chrono::Duration::minutes(LOCATOR_START_SKEW_MINUTES)),
            })
            .await
        {
            Ok(locator) => locator,
            Err(e) => {
                self.release_policy(&policy.id).await;
                return Err(e);
            }
        };

        info!("Published asset {} via locator {}", asset.id, locator.id);
        Ok(streaming_urls(&locator.path, &manifest.name))
    }

    /// Look up an asset; `None` when it does not exist.
    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        self.api.get_asset(asset_id).await
    }

    /// Look up a job; `None` when it does not exist.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.api.get_job(job_id).await
    }

    /// Tasks of a job with their progress and error details.
    pub async fn job_tasks(&self, job_id: &str) -> Result<Vec<JobTask>> {
        self.api.job_tasks(job_id).await
    }

    pub async fn delete_asset(&self, asset: &Asset) -> Result<()> {
        self.api.delete_asset(&asset.id).await?;
        info!("Asset {} deleted", asset.id);
        Ok(())
    }

    /// Delete a job in any state, canceling it first when it is still active.
    pub async fn delete_job(&self, job_id: &str) -> Result<()> {
        jobs::delete_job(self.api.as_ref(), job_id, self.settings.delete_poll).await
    }

    /// Live query over every asset of the account.
    pub fn list_assets(&self) -> AssetQuery<'_> {
        AssetQuery {
            api: self.api.as_ref(),
            page_size: ASSET_PAGE_SIZE,
        }
    }

    pub async fn asset_files(&self, asset: &Asset) -> Result<Vec<AssetFile>> {
        self.api.asset_files(&asset.id).await
    }

    /// Bytes stored for one asset.
    pub async fn total_file_size(&self, asset: &Asset) -> Result<u64> {
        let files = self.api.asset_files(&asset.id).await?;
        Ok(files.iter().map(|file| file.content_file_size).sum())
    }

    /// Bytes stored across all assets of the account.
    pub async fn total_file_size_all(&self) -> Result<u64> {
        let mut assets = std::pin::pin!(self.list_assets().stream());
        let mut total = 0u64;
        while let Some(asset) = assets.try_next().await? {
            total += self.total_file_size(&asset).await?;
        }
        Ok(total)
    }

    /// Download every file of an asset into `output_dir`, one at a time.
    ///
    /// Remote names are validated before anything is written. Existing files
    /// are handled according to the configured overwrite policy; under
    /// `Fail` every target is checked before the first transfer. Returns the
    /// paths written.
    pub async fn download_asset<P, F>(&self, asset: &Asset, output_dir: P, mut on_progress: F) -> Result<Vec<PathBuf>>
    where
        P: AsRef<Path>,
        F: FnMut(&DownloadProgress),
    {
        let output_dir = output_dir.as_ref();
        let files = self.api.asset_files(&asset.id).await?;
        for file in &files {
            validate_file_name(&file.name)?;
        }
        if self.settings.overwrite == OverwritePolicy::Fail {
            if let Some(existing) = files
                .iter()
                .map(|file| output_dir.join(&file.name))
                .find(|target| target.exists())
            {
                return Err(MediaError::FileExists(existing));
            }
        }

        fs::create_dir_all(output_dir).await?;
        info!("Downloading {} files of asset {} to {}", files.len(), asset.id, output_dir.display());

        if files.is_empty() {
            return Ok(Vec::new());
        }

        let policy = self
            .api
            .create_access_policy("DownloadPolicy", TRANSFER_POLICY_MINUTES, AccessPermissions::READ)
            .await?;
        let locator = match self
            .api
            .create_locator(&NewLocator {
                access_policy_id: policy.id.clone(),
                asset_id: asset.id.clone(),
                locator_type: LocatorType::Sas,
                start_time: None,
            })
            .await
        {
            Ok(locator) => locator,
            Err(e) => {
                self.release_policy(&policy.id).await;
                return Err(e);
            }
        };

        let result = self
            .download_files(&locator, &files, output_dir, &mut on_progress)
            .await;
        self.release_locator(&locator).await;
        result
    }

    async fn download_files(
        &self,
        locator: &Locator,
        files: &[AssetFile],
        output_dir: &Path,
        on_progress: &mut dyn FnMut(&DownloadProgress),
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        for (index, file) in files.iter().enumerate() {
            let target = output_dir.join(&file.name);
            if target.exists() {
                match self.settings.overwrite {
                    OverwritePolicy::Fail => return Err(MediaError::FileExists(target)),
                    OverwritePolicy::Skip => {
                        info!("Skipping existing file {}", target.display());
                        continue;
                    }
                    OverwritePolicy::Overwrite => {
                        debug!("Overwriting {}", target.display());
                    }
                }
            }

            let temp = tempfile::Builder::new()
                .prefix(".mediasvc-")
                .tempfile_in(output_dir)?;
            let (std_file, temp_path) = temp.into_parts();
            let mut out = fs::File::from_std(std_file);

            let mut reader = self.api.open_blob(locator, &file.name).await?;
            let mut bytes_written = 0u64;
            while let Some(chunk) = reader.next_chunk().await? {
                out.write_all(&chunk).await?;
                bytes_written += chunk.len() as u64;
                on_progress(&DownloadProgress {
                    file_name: file.name.clone(),
                    file_index: index,
                    file_count: files.len(),
                    bytes_written,
                });
            }
            out.flush().await?;
            drop(out);

            match self.settings.overwrite {
                OverwritePolicy::Overwrite => temp_path.persist(&target).map_err(|e| MediaError::Io(e.error))?,
                OverwritePolicy::Fail | OverwritePolicy::Skip => {
                    temp_path.persist_noclobber(&target).map_err(|e| {
                        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                            MediaError::FileExists(target.clone())
                        } else {
                            MediaError::Io(e.error)
                        }
                    })?
                }
            }

            info!("Downloaded {} ({} bytes)", target.display(), bytes_written);
            written.push(target);
        }

        Ok(written)
    }

    async fn release_locator(&self, locator: &Locator) {
        if let Err(e) = self.api.delete_locator(&locator.id).await {
            warn!("Failed to delete locator {}: {}", locator.id, e);
        }
        self.release_policy(&locator.access_policy_id).await;
    }

    async fn release_policy(&self, policy_id: &str) {
        if policy_id.is_empty() {
            return;
        }
        if let Err(e) = self.api.delete_access_policy(policy_id).await {
            warn!("Failed to delete access policy {}: {}", policy_id, e);
        }
    }
}

/// Lazy query over the asset collection.
///
/// Nothing is fetched until the query is traversed, and every traversal
/// queries the service again.
#[derive(Clone, Copy)]
pub struct AssetQuery<'a> {
    api: &'a dyn MediaServiceApi,
    page_size: usize,
}

impl<'a> AssetQuery<'a> {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stream assets page by page.
    pub fn stream(self) -> impl Stream<Item = Result<Asset>> + 'a {
        let api = self.api;
        let page_size = self.page_size;

        stream::try_unfold(Some(0usize), move |skip| async move {
            let Some(skip) = skip else {
                return Ok(None);
            };
            let page = api.list_assets_page(skip, page_size).await?;
            debug!("Fetched {} assets at offset {}", page.len(), skip);
            let next = if page.len() < page_size { None } else { Some(skip + page.len()) };
            Ok::<_, MediaError>(Some((page, next)))
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Asset, MediaError>)))
        .try_flatten()
    }

    pub async fn collect(self) -> Result<Vec<Asset>> {
        self.stream().try_collect().await
    }

    pub async fn count(self) -> Result<usize> {
        self.stream().try_fold(0usize, |n, _| async move { Ok(n + 1) }).await
    }
}

async fn read_block(file: &mut fs::File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Block ids must share one length within a blob.
fn block_id(index: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("block-{:08}", index))
}

/// Smooth Streaming, HLS and DASH URLs of an origin locator.
pub fn streaming_urls(locator_path: &str, manifest_name: &str) -> StreamingUrls {
    let mut base = locator_path.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let smooth_streaming = format!("{}{}/manifest", base, urlencoding::encode(manifest_name));

    StreamingUrls {
        hls: format!("{}(format=m3u8-aapl)", smooth_streaming),
        mpeg_dash: format!("{}(format=mpd-time-csf)", smooth_streaming),
        smooth_streaming,
    }
}

/// Reject remote file names that would escape the target directory.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let invalid = || MediaError::InvalidFileName(name.to_string());

    if name.trim().is_empty() || name.contains(['/', '\\', ':', '\0']) {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(invalid()),
    }
}
