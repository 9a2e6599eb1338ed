use std::{path::Path, sync::Arc};

use portal_core::RequestFailure;
use tracing::info;
use uuid::Uuid;

use crate::{executor::ResilientRequestExecutor, service::BackendService};

/// Blob uploads through the resilient executor.
#[derive(Clone)]
pub struct ResilientStorage {
    backend: Arc<dyn BackendService>,
    executor: ResilientRequestExecutor,
}

impl ResilientStorage {
    pub fn new(backend: Arc<dyn BackendService>, executor: ResilientRequestExecutor) -> Self {
        Self { backend, executor }
    }

    /// Upload `bytes` and return the object's public URL.
    pub async fn upload(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, RequestFailure> {
        let backend = &self.backend;
        self.executor
            .execute("storage.upload", |cancel| {
                backend.upload(bucket, object_path, bytes, content_type, cancel)
            })
            .await?;

        info!(bucket, object_path, size = bytes.len(), "object uploaded");
        Ok(self.backend.public_url(bucket, object_path))
    }
}

/// Collision-free object path under `dir` that keeps the extension of
/// `file_name`.
pub fn unique_object_path(dir: &str, file_name: &str) -> String {
    let id = Uuid::new_v4();
    let extension = Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty());
    let name = match extension {
        Some(extension) => format!("{id}.{}", extension.to_ascii_lowercase()),
        None => id.to_string(),
    };

    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name
    } else {
        format!("{dir}/{name}")
    }
}
