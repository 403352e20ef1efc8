//! Credential exchange against a mock provider.

use tempfile::TempDir;
use thingshadow_credentials::{CredentialsConfig, CredentialsError, CredentialsProvider};
use thingshadow_protocol::ThingName;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREDENTIALS_PATH: &str = "/role-aliases/device-role/credentials";

struct Identity {
    _dir: TempDir,
    cert: std::path::PathBuf,
    key: std::path::PathBuf,
}

fn identity() -> Identity {
    let dir = TempDir::new().unwrap();
    let device = rcgen::generate_simple_self_signed(vec!["device.local".into()]).unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("private.key");
    std::fs::write(&cert, device.cert.pem()).unwrap();
    std::fs::write(&key, device.key_pair.serialize_pem()).unwrap();
    Identity {
        _dir: dir,
        cert,
        key,
    }
}

fn config(server: &MockServer, identity: &Identity) -> CredentialsConfig {
    CredentialsConfig::new(
        format!("{}{}", server.uri(), CREDENTIALS_PATH),
        ThingName::new("test").unwrap(),
        &identity.cert,
        &identity.key,
    )
}

#[tokio::test]
async fn fetch_sends_thing_name_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CREDENTIALS_PATH))
        .and(header("x-amzn-iot-thingname", "test"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"credentials":{"accessKeyId":"ASIA1","secretAccessKey":"s3cr3t","sessionToken":"tok","expiration":"2026-10-19T12:00:00Z"}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let identity = identity();
    let provider = CredentialsProvider::new(&config(&server, &identity)).unwrap();
    let credentials = provider.fetch().await.unwrap();

    assert_eq!(credentials.access_key_id, "ASIA1");
    assert_eq!(credentials.secret_access_key, "s3cr3t");
    assert_eq!(credentials.session_token, "tok");
    assert_eq!(credentials.expiration, "2026-10-19T12:00:00Z");
}

#[tokio::test]
async fn non_200_surfaces_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Access Denied"))
        .mount(&server)
        .await;

    let identity = identity();
    let provider = CredentialsProvider::new(&config(&server, &identity)).unwrap();

    match provider.fetch().await {
        Err(CredentialsError::Status { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "Access Denied");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"unexpected":true}"#))
        .mount(&server)
        .await;

    let identity = identity();
    let provider = CredentialsProvider::new(&config(&server, &identity)).unwrap();

    assert!(matches!(
        provider.fetch().await,
        Err(CredentialsError::Decode(_))
    ));
}

#[tokio::test]
async fn missing_certificate_is_reported() {
    let server = MockServer::start().await;
    let identity = identity();
    let mut config = config(&server, &identity);
    config.cert_path = identity.cert.with_file_name("missing.pem");

    match CredentialsProvider::new(&config) {
        Err(CredentialsError::Certificate { path, .. }) => {
            assert_eq!(path, identity.cert.with_file_name("missing.pem"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
