// Remote media service access
//
// This module hides the wire protocol of the media service behind a trait:
// - MediaServiceApi: one method per remote resource operation
// - rest: OData/REST implementation over reqwest
// - auth: client-credentials token exchange used by the REST implementation

pub mod auth;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::models::{
    AccessPermissions, AccessPolicy, Asset, AssetCreationOptions, AssetFile, Job, JobTask, Locator,
    LocatorType, MediaProcessor,
};

pub use auth::TokenProvider;
pub use rest::RestMediaService;

/// File metadata registered on an asset after its blob has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAssetFile {
    pub name: String,
    pub parent_asset_id: String,
    pub content_file_size: u64,
    pub is_primary: bool,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLocator {
    pub access_policy_id: String,
    pub asset_id: String,
    pub locator_type: LocatorType,
    pub start_time: Option<DateTime<Utc>>,
}

/// A single-task job: one input asset, one output asset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub input_asset_id: String,
    pub output_asset_name: String,
    pub output_options: AssetCreationOptions,
    pub processor_id: String,
    pub configuration: String,
}

/// Sequential reader over a downloaded blob.
#[async_trait]
pub trait BlobReader: Send {
    /// Next chunk of the blob, `None` at the end.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Total size if the server announced it.
    fn content_length(&self) -> Option<u64>;
}

/// Remote resource operations of the media service.
///
/// Lookups return `Ok(None)` for missing resources; mutations fail with a
/// service error instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaServiceApi: Send + Sync {
    async fn create_asset(&self, name: &str, options: AssetCreationOptions) -> Result<Asset>;

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>>;

    /// One page of the asset collection, ordered by the service.
    async fn list_assets_page(&self, skip: usize, top: usize) -> Result<Vec<Asset>>;

    async fn delete_asset(&self, asset_id: &str) -> Result<()>;

    async fn asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>>;

    async fn create_asset_file(&self, file: &NewAssetFile) -> Result<AssetFile>;

    async fn create_access_policy(
        &self,
        name: &str,
        duration_minutes: f64,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy>;

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()>;

    async fn create_locator(&self, locator: &NewLocator) -> Result<Locator>;

    async fn delete_locator(&self, locator_id: &str) -> Result<()>;

    async fn media_processors(&self, name: &str) -> Result<Vec<MediaProcessor>>;

    async fn create_job(&self, job: &NewJob) -> Result<Job>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    async fn job_tasks(&self, job_id: &str) -> Result<Vec<JobTask>>;

    async fn job_output_assets(&self, job_id: &str) -> Result<Vec<Asset>>;

    async fn cancel_job(&self, job_id: &str) -> Result<()>;

    async fn delete_job(&self, job_id: &str) -> Result<()>;

    /// Stage one block of a blob through a write SAS locator.
    async fn put_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()>;

    /// Commit staged blocks, in order, as the blob content.
    async fn put_block_list(
        &self,
        locator: &Locator,
        file_name: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<()>;

    /// Open a blob for reading through a read SAS locator.
    async fn open_blob(&self, locator: &Locator, file_name: &str) -> Result<Box<dyn BlobReader>>;
}

/// Factory for media service connections
pub struct MediaServiceFactory;

impl MediaServiceFactory {
    /// Authenticate against the configured account and return the REST
    /// implementation.
    pub async fn connect(config: &ServiceConfig) -> Result<Box<dyn MediaServiceApi>> {
        let service = RestMediaService::connect(config).await?;
        Ok(Box::new(service))
    }
}
