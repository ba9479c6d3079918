//! In-memory media service used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use mediasvc::error::{MediaError, Result};
use mediasvc::models::{
    AccessPermissions, AccessPolicy, Asset, AssetCreationOptions, AssetFile, Job, JobState, JobTask, Locator,
    MediaProcessor,
};
use mediasvc::service::{BlobReader, MediaServiceApi, NewAssetFile, NewJob, NewLocator};
use mediasvc::{ClientSettings, MediaServiceClient};

pub const PROCESSOR_NAME: &str = "Media Encoder Standard";

#[derive(Default)]
struct State {
    next_id: u32,
    assets: BTreeMap<String, Asset>,
    files: Vec<AssetFile>,
    // (asset id, file name) -> staged blocks and committed content
    staged: HashMap<(String, String), HashMap<String, Vec<u8>>>,
    blobs: HashMap<(String, String), Vec<u8>>,
    policies: HashMap<String, AccessPolicy>,
    locators: HashMap<String, Locator>,
    jobs: BTreeMap<String, Job>,
    job_outputs: HashMap<String, String>,
    job_fetches: HashMap<String, u32>,
    deleted_jobs: Vec<String>,
    canceled_jobs: Vec<String>,
    file_queries: u32,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("nb:{}:UUID:{:08}", prefix, self.next_id)
    }
}

/// Shared handle; clones see the same state.
#[derive(Clone, Default)]
pub struct FakeMediaService {
    state: Arc<Mutex<State>>,
}

impl FakeMediaService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> MediaServiceClient {
        self.client_with(ClientSettings {
            block_size: 4,
            ..ClientSettings::default()
        })
    }

    pub fn client_with(&self, settings: ClientSettings) -> MediaServiceClient {
        MediaServiceClient::with_api(Box::new(self.clone()), settings)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add an asset whose files already hold `files` as content.
    pub fn seed_asset(&self, name: &str, files: &[(&str, &str)]) -> Asset {
        let mut state = self.lock();
        let id = state.id("cid");
        let asset = asset(&id, name);
        state.assets.insert(id.clone(), asset.clone());
        for (file_name, content) in files {
            let file_id = state.id("cid");
            state.files.push(AssetFile {
                id: file_id,
                name: file_name.to_string(),
                parent_asset_id: id.clone(),
                content_file_size: content.len() as u64,
                is_primary: false,
                mime_type: None,
            });
            state
                .blobs
                .insert((id.clone(), file_name.to_string()), content.as_bytes().to_vec());
        }
        asset
    }

    pub fn seed_job(&self, state: JobState) -> Job {
        let mut guard = self.lock();
        let id = guard.id("jid");
        let job = job(&id, state);
        guard.jobs.insert(id, job.clone());
        job
    }

    pub fn blob(&self, asset_id: &str, file_name: &str) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .get(&(asset_id.to_string(), file_name.to_string()))
            .cloned()
    }

    pub fn live_locators(&self) -> usize {
        self.lock().locators.len()
    }

    pub fn live_policies(&self) -> usize {
        self.lock().policies.len()
    }

    pub fn asset_count(&self) -> usize {
        self.lock().assets.len()
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.lock().jobs.contains_key(job_id)
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.lock().deleted_jobs.clone()
    }

    pub fn canceled_jobs(&self) -> Vec<String> {
        self.lock().canceled_jobs.clone()
    }

    pub fn file_queries(&self) -> u32 {
        self.lock().file_queries
    }
}

fn asset(id: &str, name: &str) -> Asset {
    Asset {
        id: id.to_string(),
        name: name.to_string(),
        state: 0,
        options: AssetCreationOptions::None,
        uri: None,
        created: None,
        last_modified: None,
    }
}

fn job(id: &str, state: JobState) -> Job {
    Job {
        id: id.to_string(),
        name: "job".to_string(),
        state,
        created: None,
        start_time: None,
        end_time: None,
        running_duration: 0.0,
    }
}

fn not_found(what: &str) -> MediaError {
    MediaError::not_found(what.to_string())
}

struct MemoryBlob {
    content: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl BlobReader for MemoryBlob {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.content.len() {
            return Ok(None);
        }
        let end = (self.offset + 3).min(self.content.len());
        let chunk = self.content[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.content.len() as u64)
    }
}

#[async_trait]
impl MediaServiceApi for FakeMediaService {
    async fn create_asset(&self, name: &str, options: AssetCreationOptions) -> Result<Asset> {
        let mut state = self.lock();
        let id = state.id("cid");
        let mut created = asset(&id, name);
        created.options = options;
        state.assets.insert(id, created.clone());
        Ok(created)
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        Ok(self.lock().assets.get(asset_id).cloned())
    }

    async fn list_assets_page(&self, skip: usize, top: usize) -> Result<Vec<Asset>> {
        Ok(self.lock().assets.values().skip(skip).take(top).cloned().collect())
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.assets.remove(asset_id).ok_or_else(|| not_found("Asset"))?;
        state.files.retain(|file| file.parent_asset_id != asset_id);
        state.blobs.retain(|(owner, _), _| owner != asset_id);
        Ok(())
    }

    async fn asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>> {
        let mut state = self.lock();
        state.file_queries += 1;
        Ok(state
            .files
            .iter()
            .filter(|file| file.parent_asset_id == asset_id)
            .cloned()
            .collect())
    }

    async fn create_asset_file(&self, file: &NewAssetFile) -> Result<AssetFile> {
        let mut state = self.lock();
        if !state.assets.contains_key(&file.parent_asset_id) {
            return Err(not_found("Asset"));
        }
        let id = state.id("cid");
        let created = AssetFile {
            id,
            name: file.name.clone(),
            parent_asset_id: file.parent_asset_id.clone(),
            content_file_size: file.content_file_size,
            is_primary: file.is_primary,
            mime_type: file.mime_type.clone(),
        };
        state.files.push(created.clone());
        Ok(created)
    }

    async fn create_access_policy(
        &self,
        name: &str,
        duration_minutes: f64,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy> {
        let mut state = self.lock();
        let id = state.id("pid");
        let policy = AccessPolicy {
            id: id.clone(),
            name: name.to_string(),
            duration_in_minutes: duration_minutes,
            permissions: permissions.0,
        };
        state.policies.insert(id, policy.clone());
        Ok(policy)
    }

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()> {
        self.lock()
            .policies
            .remove(policy_id)
            .map(|_| ())
            .ok_or_else(|| not_found("AccessPolicy"))
    }

    async fn create_locator(&self, locator: &NewLocator) -> Result<Locator> {
        let mut state = self.lock();
        if !state.policies.contains_key(&locator.access_policy_id) {
            return Err(not_found("AccessPolicy"));
        }
        let id = state.id("lid");
        let created = Locator {
            id: id.clone(),
            locator_type: locator.locator_type,
            path: format!("https://fake.streaming.example/{}/", id),
            base_uri: Some(format!("https://fake.blob.example/{}", locator.asset_id)),
            content_access_component: Some("?sig=fake".to_string()),
            expiration_date_time: None,
            access_policy_id: locator.access_policy_id.clone(),
            asset_id: locator.asset_id.clone(),
        };
        state.locators.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_locator(&self, locator_id: &str) -> Result<()> {
        self.lock()
            .locators
            .remove(locator_id)
            .map(|_| ())
            .ok_or_else(|| not_found("Locator"))
    }

    async fn media_processors(&self, name: &str) -> Result<Vec<MediaProcessor>> {
        if name != PROCESSOR_NAME {
            return Ok(vec![]);
        }
        Ok(vec![MediaProcessor {
            id: "nb:mpid:UUID:encoder".to_string(),
            name: name.to_string(),
            version: "1.0".to_string(),
            vendor: "Fake".to_string(),
        }])
    }

    /// Jobs finish immediately and leave a streamable output asset.
    async fn create_job(&self, new_job: &NewJob) -> Result<Job> {
        let mut state = self.lock();
        if !state.assets.contains_key(&new_job.input_asset_id) {
            return Err(not_found("Asset"));
        }

        let output_id = state.id("cid");
        state
            .assets
            .insert(output_id.clone(), asset(&output_id, &new_job.output_asset_name));
        let outputs = [
            (format!("{}.ism", new_job.output_asset_name), b"<smil/>".to_vec()),
            (format!("{}_128.mp4", new_job.output_asset_name), vec![7u8; 100]),
        ];
        for (name, content) in outputs {
            let file_id = state.id("cid");
            state.files.push(AssetFile {
                id: file_id,
                name: name.clone(),
                parent_asset_id: output_id.clone(),
                content_file_size: content.len() as u64,
                is_primary: false,
                mime_type: None,
            });
            state.blobs.insert((output_id.clone(), name), content);
        }

        let id = state.id("jid");
        let mut created = job(&id, JobState::Finished);
        created.name = new_job.name.clone();
        state.jobs.insert(id.clone(), created.clone());
        state.job_outputs.insert(id, output_id);
        created.state = JobState::Queued;
        Ok(created)
    }

    /// Canceling jobs settle to Canceled on the second fetch.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut state = self.lock();
        let fetches = {
            let count = state.job_fetches.entry(job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let Some(job) = state.jobs.get_mut(job_id) else {
            return Ok(None);
        };
        let current = job.clone();
        if job.state == JobState::Canceling && fetches > 1 {
            job.state = JobState::Canceled;
        }
        Ok(Some(current))
    }

    async fn job_tasks(&self, job_id: &str) -> Result<Vec<JobTask>> {
        let state = self.lock();
        let job = state.jobs.get(job_id).ok_or_else(|| not_found("Job"))?;
        Ok(vec![JobTask {
            id: format!("{}-task", job.id),
            name: "encode".to_string(),
            state: job.state.code(),
            progress: if job.state == JobState::Finished { 100.0 } else { 0.0 },
            error_details: vec![],
        }])
    }

    async fn job_output_assets(&self, job_id: &str) -> Result<Vec<Asset>> {
        let state = self.lock();
        Ok(state
            .job_outputs
            .get(job_id)
            .and_then(|id| state.assets.get(id))
            .cloned()
            .into_iter()
            .collect())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| not_found("Job"))?;
        job.state = JobState::Canceling;
        state.job_fetches.insert(job_id.to_string(), 0);
        state.canceled_jobs.push(job_id.to_string());
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.jobs.remove(job_id).ok_or_else(|| not_found("Job"))?;
        state.deleted_jobs.push(job_id.to_string());
        Ok(())
    }

    async fn put_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.locators.contains_key(&locator.id) {
            return Err(MediaError::service(403, "AuthenticationFailed"));
        }
        state
            .staged
            .entry((locator.asset_id.clone(), file_name.to_string()))
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn put_block_list(
        &self,
        locator: &Locator,
        file_name: &str,
        block_ids: &[String],
        _content_type: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        let key = (locator.asset_id.clone(), file_name.to_string());
        let staged = state.staged.remove(&key).unwrap_or_default();
        let mut content = Vec::new();
        for id in block_ids {
            let block = staged
                .get(id)
                .ok_or_else(|| MediaError::service(400, "InvalidBlockList"))?;
            content.extend_from_slice(block);
        }
        state.blobs.insert(key, content);
        Ok(())
    }

    async fn open_blob(&self, locator: &Locator, file_name: &str) -> Result<Box<dyn BlobReader>> {
        let state = self.lock();
        let content = state
            .blobs
            .get(&(locator.asset_id.clone(), file_name.to_string()))
            .cloned()
            .ok_or_else(|| MediaError::service(404, "BlobNotFound"))?;
        Ok(Box::new(MemoryBlob { content, offset: 0 }))
    }
}
