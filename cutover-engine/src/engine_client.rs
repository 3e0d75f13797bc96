//! Engine API binding for the source and target runtimes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hyper::Method;
use serde::de::DeserializeOwned;

use cutover_core::source::VolumeList;
use cutover_core::{ContainerDetail, ContainerSummary, EngineInfo, ImageDetail, Volume};

use crate::backend::{SourceRuntime, TargetRuntime};
use crate::unix_client::api_request;
use crate::MigrateError;

const API_VERSION: &str = "/v1.24";

/// Client for an engine HTTP API served on a Unix socket.
///
/// Pointed at the source socket it is a [`SourceRuntime`]; pointed at the
/// target socket it is a [`TargetRuntime`].
#[derive(Debug, Clone)]
pub struct EngineClient {
    socket_path: PathBuf,
}

impl EngineClient {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call(&self, method: Method, path: &str) -> Result<String, MigrateError> {
        api_request(&self.socket_path, method, &format!("{API_VERSION}{path}"), None).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MigrateError> {
        let body = self.call(Method::GET, path).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// POST that treats 304 "already in that state" as success.
    async fn post_idempotent(&self, path: &str) -> Result<(), MigrateError> {
        match self.call(Method::POST, path).await {
            Ok(_) | Err(MigrateError::Api { status: Some(304), .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Percent-encode the characters of an image reference or name that are not
/// valid in a URI path segment.
fn escape(segment: &str) -> String {
    segment
        .bytes()
        .fold(String::with_capacity(segment.len()), |mut out, b| {
            if b.is_ascii_alphanumeric() || b"-._~:@/".contains(&b) {
                out.push(char::from(b));
            } else {
                out.push_str(&format!("%{b:02X}"));
            }
            out
        })
}

#[async_trait]
impl SourceRuntime for EngineClient {
    async fn info(&self) -> Result<EngineInfo, MigrateError> {
        self.get("/info").await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, MigrateError> {
        self.get("/containers/json?all=1").await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, MigrateError> {
        self.get(&format!("/containers/{}/json", escape(id))).await
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetail, MigrateError> {
        self.get(&format!("/images/{}/json", escape(reference))).await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, MigrateError> {
        let list: VolumeList = self.get("/volumes").await?;
        Ok(list.volumes)
    }

    async fn inspect_volume(&self, name: &str) -> Result<Volume, MigrateError> {
        self.get(&format!("/volumes/{}", escape(name))).await
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), MigrateError> {
        tracing::debug!(container = %id, timeout_secs = timeout.as_secs(), "stopping source container");
        self.post_idempotent(&format!("/containers/{}/stop?t={}", escape(id), timeout.as_secs()))
            .await
    }

    async fn start(&self, id: &str) -> Result<(), MigrateError> {
        tracing::debug!(container = %id, "starting source container");
        self.post_idempotent(&format!("/containers/{}/start", escape(id))).await
    }
}

#[async_trait]
impl TargetRuntime for EngineClient {
    async fn start_container(&self, id: &str) -> Result<(), MigrateError> {
        tracing::debug!(container = %id, "starting target container");
        self.post_idempotent(&format!("/containers/{}/start", escape(id))).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), MigrateError> {
        tracing::debug!(container = %id, force, "removing target container");
        let force = u8::from(force);
        self.call(Method::DELETE, &format!("/containers/{}?force={force}", escape(id)))
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_keeps_reference_syntax() {
        assert_eq!(escape("reg.io/app/web:v1"), "reg.io/app/web:v1");
        assert_eq!(escape("busybox@sha256:ab"), "busybox@sha256:ab");
        assert_eq!(escape("a b?c"), "a%20b%3Fc");
    }
}
