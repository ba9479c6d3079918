use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{MediaError, Result};
use crate::models::{
    AccessPermissions, AccessPolicy, Asset, AssetCreationOptions, AssetFile, Job, JobTask, Locator,
    MediaProcessor,
};
use super::{BlobReader, MediaServiceApi, NewAssetFile, NewJob, NewLocator, TokenProvider};

const API_VERSION: &str = "2.19";
const DATA_SERVICE_VERSION: &str = "3.0";
const ODATA_VERBOSE: &str = "application/json;odata=verbose";
const STORAGE_VERSION: &str = "2017-04-17";

/// `{"d": ...}` wrapper of verbose OData responses.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    d: T,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Collection<T> {
    Results { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Collection<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Collection::Results { results } => results,
            Collection::Bare(items) => items,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AssetFileBody<'a> {
    name: &'a str,
    parent_asset_id: &'a str,
    // Int64 travels as a string in verbose JSON
    content_file_size: String,
    is_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LocatorBody<'a> {
    access_policy_id: &'a str,
    asset_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(rename = "Type")]
    locator_type: i32,
}

/// Media service client speaking the v2 REST (OData) protocol.
pub struct RestMediaService {
    http: Client,
    base_url: String,
    tokens: TokenProvider,
}

impl RestMediaService {
    /// Build the HTTP session and exchange credentials for a first token, so
    /// bad credentials fail here rather than on first use.
    pub async fn connect(config: &ServiceConfig) -> Result<Self> {
        let service = Self::new(config)?;
        service.tokens.access_token().await?;
        info!("Connected to media service at {}", service.base_url);
        Ok(service)
    }

    /// Build the session without authenticating yet.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("mediasvc/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MediaError::Http)?;

        let tokens = TokenProvider::new(http.clone(), config);

        let mut base_url = config.rest_api_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, set: &str) -> String {
        format!("{}{}", self.base_url, set)
    }

    fn entity_url(&self, set: &str, id: &str) -> String {
        format!("{}{}('{}')", self.base_url, set, urlencoding::encode(id))
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        debug!("{} {}", method, url);

        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("x-ms-version", API_VERSION)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION)
            .header(reqwest::header::ACCEPT, ODATA_VERBOSE)
            .header("x-ms-client-request-id", Uuid::new_v4().to_string()))
    }

    /// Send an authenticated request. A 401 drops the cached token and the
    /// request is sent once more with a fresh one.
    async fn execute<F>(&self, method: Method, url: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let response = build(self.request(method.clone(), url).await?).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("{} {} was rejected with 401, refreshing access token", method, url);
        self.tokens.invalidate().await;
        Ok(build(self.request(method, url).await?).send().await?)
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(MediaError::service(status, &body))
    }

    async fn get_entity<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.execute(Method::GET, url, |builder| builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(Some(envelope.d))
    }

    async fn get_collection<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let response = self
            .execute(Method::GET, url, |builder| builder.query(query))
            .await?;
        let response = Self::check(response).await?;
        let envelope: Envelope<Collection<T>> = response.json().await?;
        Ok(envelope.d.into_vec())
    }

    async fn post_entity<T: DeserializeOwned>(&self, url: &str, body: &serde_json::Value) -> Result<T> {
        let payload = serde_json::to_vec(body)?;
        let response = self
            .execute(Method::POST, url, |builder| {
                builder
                    .header(reqwest::header::CONTENT_TYPE, ODATA_VERBOSE)
                    .body(payload.clone())
            })
            .await?;
        let response = Self::check(response).await?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.d)
    }

    async fn delete_entity(&self, url: &str) -> Result<()> {
        let response = self.execute(Method::DELETE, url, |builder| builder).await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `{base_uri}/{file}{sas}` of a SAS locator.
    fn blob_url(locator: &Locator, file_name: &str) -> Result<String> {
        let base_uri = locator.base_uri.as_deref().ok_or_else(|| {
            MediaError::Service {
                status: 0,
                code: None,
                message: format!("Locator {} has no blob base URI", locator.id),
            }
        })?;
        let sas = locator.content_access_component.as_deref().unwrap_or("");
        Ok(format!(
            "{}/{}{}",
            base_uri.trim_end_matches('/'),
            urlencoding::encode(file_name),
            sas
        ))
    }

    fn with_query(url: &str, extra: &str) -> String {
        if url.contains('?') {
            format!("{}&{}", url, extra)
        } else {
            format!("{}?{}", url, extra)
        }
    }
}

/// XML payload telling the encoder which input feeds which output asset.
pub(crate) fn task_body(output_asset_name: &str, output_options: AssetCreationOptions) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><taskBody><inputAsset>JobInputAsset(0)</inputAsset>\
         <outputAsset assetCreationOptions=\"{}\" assetName=\"{}\">JobOutputAsset(0)</outputAsset></taskBody>",
        i32::from(output_options),
        xml_escape(output_asset_name)
    )
}

pub(crate) fn block_list_body(block_ids: &[String]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for id in block_ids {
        body.push_str(&format!("<Latest>{}</Latest>", xml_escape(id)));
    }
    body.push_str("</BlockList>");
    body
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn odata_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[async_trait]
impl MediaServiceApi for RestMediaService {
    async fn create_asset(&self, name: &str, options: AssetCreationOptions) -> Result<Asset> {
        let body = json!({ "Name": name, "Options": i32::from(options) });
        self.post_entity(&self.collection_url("Assets"), &body).await
    }

    async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        self.get_entity(&self.entity_url("Assets", asset_id)).await
    }

    async fn list_assets_page(&self, skip: usize, top: usize) -> Result<Vec<Asset>> {
        let query = [
            ("$orderby", "Id".to_string()),
            ("$skip", skip.to_string()),
            ("$top", top.to_string()),
        ];
        self.get_collection(&self.collection_url("Assets"), &query).await
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        self.delete_entity(&self.entity_url("Assets", asset_id)).await
    }

    async fn asset_files(&self, asset_id: &str) -> Result<Vec<AssetFile>> {
        let url = format!("{}/Files", self.entity_url("Assets", asset_id));
        self.get_collection(&url, &[]).await
    }

    async fn create_asset_file(&self, file: &NewAssetFile) -> Result<AssetFile> {
        let body = serde_json::to_value(AssetFileBody {
            name: &file.name,
            parent_asset_id: &file.parent_asset_id,
            content_file_size: file.content_file_size.to_string(),
            is_primary: file.is_primary,
            mime_type: file.mime_type.as_deref(),
        })?;
        self.post_entity(&self.collection_url("Files"), &body).await
    }

    async fn create_access_policy(
        &self,
        name: &str,
        duration_minutes: f64,
        permissions: AccessPermissions,
    ) -> Result<AccessPolicy> {
        let body = json!({
            "Name": name,
            "DurationInMinutes": duration_minutes,
            "Permissions": permissions.0,
        });
        self.post_entity(&self.collection_url("AccessPolicies"), &body).await
    }

    async fn delete_access_policy(&self, policy_id: &str) -> Result<()> {
        self.delete_entity(&self.entity_url("AccessPolicies", policy_id)).await
    }

    async fn create_locator(&self, locator: &NewLocator) -> Result<Locator> {
        let body = serde_json::to_value(LocatorBody {
            access_policy_id: &locator.access_policy_id,
            asset_id: &locator.asset_id,
            start_time: locator
                .start_time
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            locator_type: i32::from(locator.locator_type),
        })?;
        self.post_entity(&self.collection_url("Locators"), &body).await
    }

    async fn delete_locator(&self, locator_id: &str) -> Result<()> {
        self.delete_entity(&self.entity_url("Locators", locator_id)).await
    }

    async fn media_processors(&self, name: &str) -> Result<Vec<MediaProcessor>> {
        let query = [("$filter", format!("Name eq {}", odata_literal(name)))];
        self.get_collection(&self.collection_url("MediaProcessors"), &query).await
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job> {
        let body = json!({
            "Name": job.name,
            "InputMediaAssets": [
                { "__metadata": { "uri": self.entity_url("Assets", &job.input_asset_id) } }
            ],
            "Tasks": [
                {
                    "Configuration": job.configuration,
                    "MediaProcessorId": job.processor_id,
                    "TaskBody": task_body(&job.output_asset_name, job.output_options),
                }
            ],
        });
        self.post_entity(&self.collection_url("Jobs"), &body).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.get_entity(&self.entity_url("Jobs", job_id)).await
    }

    async fn job_tasks(&self, job_id: &str) -> Result<Vec<JobTask>> {
        let url = format!("{}/Tasks", self.entity_url("Jobs", job_id));
        self.get_collection(&url, &[]).await
    }

    async fn job_output_assets(&self, job_id: &str) -> Result<Vec<Asset>> {
        let url = format!("{}/OutputMediaAssets", self.entity_url("Jobs", job_id));
        self.get_collection(&url, &[]).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let query = [("jobid", odata_literal(job_id))];
        let response = self
            .execute(Method::GET, &self.collection_url("CancelJob"), |builder| builder.query(&query))
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.delete_entity(&self.entity_url("Jobs", job_id)).await
    }

    async fn put_block(
        &self,
        locator: &Locator,
        file_name: &str,
        block_id: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let url = Self::with_query(
            &Self::blob_url(locator, file_name)?,
            &format!("comp=block&blockid={}", urlencoding::encode(block_id)),
        );
        let builder = self
            .http
            .put(&url)
            .header("x-ms-version", STORAGE_VERSION)
            .body(data);
        Self::send(builder).await?;
        Ok(())
    }

    async fn put_block_list(
        &self,
        locator: &Locator,
        file_name: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<()> {
        let url = Self::with_query(&Self::blob_url(locator, file_name)?, "comp=blocklist");
        let builder = self
            .http
            .put(&url)
            .header("x-ms-version", STORAGE_VERSION)
            .header("x-ms-blob-content-type", content_type)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(block_list_body(block_ids));
        Self::send(builder).await?;
        Ok(())
    }

    async fn open_blob(&self, locator: &Locator, file_name: &str) -> Result<Box<dyn BlobReader>> {
        let url = Self::blob_url(locator, file_name)?;
        let builder = self.http.get(&url).header("x-ms-version", STORAGE_VERSION);
        let response = Self::send(builder).await?;
        Ok(Box::new(HttpBlobReader { response }))
    }
}

struct HttpBlobReader {
    response: Response,
}

#[async_trait]
impl BlobReader for HttpBlobReader {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.response.chunk().await?.map(|bytes| bytes.to_vec()))
    }

    fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocatorType;

    fn locator(base_uri: Option<&str>, sas: Option<&str>) -> Locator {
        Locator {
            id: "nb:lid:UUID:1".to_string(),
            locator_type: LocatorType::Sas,
            path: String::new(),
            base_uri: base_uri.map(str::to_string),
            content_access_component: sas.map(str::to_string),
            expiration_date_time: None,
            access_policy_id: String::new(),
            asset_id: String::new(),
        }
    }

    #[test]
    fn test_task_body_escapes_asset_name() {
        let body = task_body("a<b>&\"c\"", AssetCreationOptions::None);
        assert!(body.contains("assetName=\"a&lt;b&gt;&amp;&quot;c&quot;\""));
        assert!(body.contains("assetCreationOptions=\"0\""));
        assert!(body.contains("<inputAsset>JobInputAsset(0)</inputAsset>"));
    }

    #[test]
    fn test_block_list_body() {
        let body = block_list_body(&["AAA=".to_string(), "AAE=".to_string()]);
        assert!(body.ends_with("<BlockList><Latest>AAA=</Latest><Latest>AAE=</Latest></BlockList>"));
    }

    #[test]
    fn test_blob_url() {
        let url = RestMediaService::blob_url(
            &locator(Some("https://acct.blob.core.windows.net/asset-1/"), Some("?sv=2017&sig=x")),
            "my movie.mp4",
        )
        .unwrap();
        assert_eq!(url, "https://acct.blob.core.windows.net/asset-1/my%20movie.mp4?sv=2017&sig=x");
        assert!(RestMediaService::blob_url(&locator(None, None), "a").is_err());
    }

    #[test]
    fn test_with_query() {
        assert_eq!(RestMediaService::with_query("https://h/a?sv=1", "comp=block"), "https://h/a?sv=1&comp=block");
        assert_eq!(RestMediaService::with_query("https://h/a", "comp=block"), "https://h/a?comp=block");
    }

    #[test]
    fn test_odata_literal_doubles_quotes() {
        assert_eq!(odata_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_entity_url_encodes_id() {
        let mut config = ServiceConfig::default();
        config.rest_api_url = "https://account.restv2.media.azure.net/api".to_string();
        let service = RestMediaService::new(&config).unwrap();
        assert_eq!(service.base_url(), "https://account.restv2.media.azure.net/api/");
        assert_eq!(
            service.entity_url("Jobs", "nb:jid:UUID:1"),
            "https://account.restv2.media.azure.net/api/Jobs('nb%3Ajid%3AUUID%3A1')"
        );
    }
}
