use assert_fs::prelude::*;
use assert_fs::TempDir;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mediasvc::config::ServiceConfig;
use mediasvc::models::{AssetCreationOptions, JobState, Locator, LocatorType};
use mediasvc::service::{MediaServiceApi, NewJob, RestMediaService};
use mediasvc::{ClientSettings, MediaError, MediaServiceClient};

fn config(server: &MockServer) -> ServiceConfig {
    ServiceConfig {
        tenant_domain: "contoso".to_string(),
        rest_api_url: format!("{}/api/", server.uri()),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        authority_url: server.uri(),
        ..ServiceConfig::default()
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "Bearer",
            "expires_in": "3599"
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn connect(server: &MockServer) -> RestMediaService {
    mount_token(server).await;
    RestMediaService::connect(&config(server)).await.unwrap()
}

#[tokio::test]
async fn test_get_job_sends_protocol_headers() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Jobs\('.+'\)$"))
        .and(header("authorization", "Bearer tok"))
        .and(header("x-ms-version", "2.19"))
        .and(header("DataServiceVersion", "3.0"))
        .and(header("MaxDataServiceVersion", "3.0"))
        .and(header("accept", "application/json;odata=verbose"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": {
                "Id": "nb:jid:UUID:1",
                "Name": "Encoding clip.mp4",
                "State": 2,
                "Created": "2019-03-01T10:00:00",
                "RunningDuration": 1.5
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let job = service.get_job("nb:jid:UUID:1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert!(job.created.is_some());

    // Cached token is reused
    service.get_job("nb:jid:UUID:1").await.unwrap();
}

#[tokio::test]
async fn test_lookup_of_missing_asset_is_none() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Assets\('.+'\)$"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "odata.error": { "code": "", "message": { "lang": "en-US", "value": "Resource Asset not found" } }
        })))
        .mount(&server)
        .await;

    assert!(service.get_asset("nb:cid:UUID:missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_request_carries_service_message() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/Assets"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "odata.error": {
                "code": "InvalidName",
                "message": { "lang": "en-US", "value": "Asset name is too long" }
            }
        })))
        .mount(&server)
        .await;

    let err = service.create_asset("x", AssetCreationOptions::None).await.unwrap_err();
    assert_eq!(err.user_message(), "Asset name is too long");
    match err {
        MediaError::Service { status, code, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code.as_deref(), Some("InvalidName"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_credentials_fail_on_connect() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret is provided."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = RestMediaService::connect(&config(&server)).await.err().unwrap();
    match err {
        MediaError::Auth(message) => assert!(message.contains("Invalid client secret")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once_on_401() {
    let server = MockServer::start().await;

    for token in ["stale", "fresh"] {
        Mock::given(method("POST"))
            .and(path("/contoso/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_in": "3599"
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Jobs\('.+'\)$"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Jobs\('.+'\)$"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "Id": "nb:jid:UUID:1", "Name": "encode", "State": 3 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = RestMediaService::connect(&config(&server)).await.unwrap();
    let job = service.get_job("nb:jid:UUID:1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Finished);
}

#[tokio::test]
async fn test_cancel_job_uses_service_operation() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/CancelJob"))
        .and(query_param("jobid", "'nb:jid:UUID:1'"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    service.cancel_job("nb:jid:UUID:1").await.unwrap();
}

#[tokio::test]
async fn test_list_assets_page_and_processor_filter() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/Assets"))
        .and(query_param("$orderby", "Id"))
        .and(query_param("$skip", "0"))
        .and(query_param("$top", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [ { "Id": "nb:cid:UUID:1", "Name": "clip.mp4", "Options": 1 } ] }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/MediaProcessors"))
        .and(query_param("$filter", "Name eq 'Media Encoder Standard'"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d": { "results": [
                { "Id": "nb:mpid:UUID:1", "Name": "Media Encoder Standard", "Version": "1.9", "Vendor": "Microsoft" },
                { "Id": "nb:mpid:UUID:2", "Name": "Media Encoder Standard", "Version": "1.12", "Vendor": "Microsoft" }
            ] }
        })))
        .mount(&server)
        .await;

    let assets = service.list_assets_page(0, 1000).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].options, AssetCreationOptions::StorageEncrypted);

    let processors = service.media_processors("Media Encoder Standard").await.unwrap();
    assert_eq!(processors.len(), 2);
}

#[tokio::test]
async fn test_create_job_posts_task_body() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/Jobs"))
        .and(header("content-type", "application/json;odata=verbose"))
        .and(body_string_contains("__metadata"))
        .and(body_string_contains("JobInputAsset(0)"))
        .and(body_string_contains("assetName=\\\"videoAsset\\\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": { "Id": "nb:jid:UUID:9", "Name": "Encoding", "State": 0 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let job = service
        .create_job(&NewJob {
            name: "Encoding".to_string(),
            input_asset_id: "nb:cid:UUID:1".to_string(),
            output_asset_name: "videoAsset".to_string(),
            output_options: AssetCreationOptions::None,
            processor_id: "nb:mpid:UUID:2".to_string(),
            configuration: "Adaptive Streaming".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Queued);
}

#[tokio::test]
async fn test_upload_through_rest_and_blob_storage() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/Assets"))
        .and(body_string_contains("\"Name\":\"clip.mp4\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": { "Id": "nb:cid:UUID:1", "Name": "clip.mp4", "Options": 0 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/AccessPolicies"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": { "Id": "nb:pid:UUID:1", "Name": "UploadPolicy", "DurationInMinutes": 1440.0, "Permissions": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Locators"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": {
                "Id": "nb:lid:UUID:1",
                "Type": 1,
                "Path": format!("{}/blob/asset-1?sv=2017&sig=abc", server.uri()),
                "BaseUri": format!("{}/blob/asset-1", server.uri()),
                "ContentAccessComponent": "?sv=2017&sig=abc",
                "AccessPolicyId": "nb:pid:UUID:1",
                "AssetId": "nb:cid:UUID:1"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/blob/asset-1/clip.mp4"))
        .and(query_param("comp", "block"))
        .and(query_param("sig", "abc"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/blob/asset-1/clip.mp4"))
        .and(query_param("comp", "blocklist"))
        .and(header("x-ms-blob-content-type", "video/mp4"))
        .and(body_string_contains("<BlockList><Latest>"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Files"))
        .and(body_string_contains("\"ContentFileSize\":\"6\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "d": {
                "Id": "nb:cid:UUID:f",
                "Name": "clip.mp4",
                "ParentAssetId": "nb:cid:UUID:1",
                "ContentFileSize": "6",
                "IsPrimary": true
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/api/Locators\('.+'\)$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/api/AccessPolicies\('.+'\)$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = RestMediaService::connect(&config(&server)).await.unwrap();
    let client = MediaServiceClient::with_api(
        Box::new(api),
        ClientSettings {
            block_size: 4,
            ..ClientSettings::default()
        },
    );

    let dir = TempDir::new().unwrap();
    let source = dir.child("clip.mp4");
    source.write_str("abcdef").unwrap();

    let asset = client
        .upload(source.path(), AssetCreationOptions::None, |_| {})
        .await
        .unwrap();
    assert_eq!(asset.id, "nb:cid:UUID:1");
}

#[tokio::test]
async fn test_open_blob_streams_content() {
    let server = MockServer::start().await;
    let service = connect(&server).await;

    Mock::given(method("GET"))
        .and(path("/blob/asset-1/movie.ism"))
        .and(query_param("sig", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<smil/>".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let locator = Locator {
        id: "nb:lid:UUID:1".to_string(),
        locator_type: LocatorType::Sas,
        path: String::new(),
        base_uri: Some(format!("{}/blob/asset-1", server.uri())),
        content_access_component: Some("?sig=abc".to_string()),
        expiration_date_time: None,
        access_policy_id: "nb:pid:UUID:1".to_string(),
        asset_id: "nb:cid:UUID:1".to_string(),
    };

    let mut reader = service.open_blob(&locator, "movie.ism").await.unwrap();
    assert_eq!(reader.content_length(), Some(7));

    let mut content = Vec::new();
    while let Some(chunk) = reader.next_chunk().await.unwrap() {
        content.extend_from_slice(&chunk);
    }
    assert_eq!(content, b"<smil/>");
}
