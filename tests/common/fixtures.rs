//! Mock server fixtures and test content generators

use std::time::Duration;

use bundle_dl::{ResourceDescriptor, ResourceKind, TransferRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Body served in place of a missing file by some hosts
pub const HTML_ERROR_PAGE: &str =
    "<!DOCTYPE html><html><head><title>404</title></head><body>Not Found</body></html>";

/// Deterministic payload of `len` bytes
pub fn generate_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serve `body` at `/files/<name>`
pub async fn mount_file(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(body),
        )
        .mount(server)
        .await;
}

/// Serve `body` at `/files/<name>` after `delay`
pub async fn mount_slow_file(server: &MockServer, name: &str, body: Vec<u8>, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Answer `/files/<name>` with `status` and an empty body
pub async fn mount_status(server: &MockServer, name: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Descriptor for a file served by [`mount_file`]
pub fn descriptor(server: &MockServer, name: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        format!("{}/files/{}", server.uri(), name),
        name,
        ResourceKind::File,
    )
}

/// Request selecting every named file on `server`
pub fn request_for(server: &MockServer, names: &[&str]) -> TransferRequest {
    TransferRequest {
        resources: names.iter().map(|n| descriptor(server, n)).collect(),
        ..TransferRequest::default()
    }
}
