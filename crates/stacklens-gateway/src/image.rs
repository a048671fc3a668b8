// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container image registry inspection.
//!
//! Every image analysis starts by asking the registry for the image manifest.
//! This surfaces authentication problems before any work is dispatched and
//! yields the content digest the analysis is deduplicated on.

use async_trait::async_trait;
use axum::http::StatusCode;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

/// Registry inspection failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ImageError {
    /// The request itself is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The registry does not know the image.
    #[error("Unknown manifest for the given image")]
    ManifestUnknown,

    /// The registry requires credentials.
    #[error("There is required authentication in order to pull image and image details")]
    AuthenticationRequired,

    /// The registry certificate could not be verified.
    #[error(
        "There was an error with x509 certification check: certificate signed by unknown authority"
    )]
    Tls,

    /// The registry rejected the supplied credentials.
    #[error("Invalid credentials supplied for the image registry")]
    InvalidCredentials,

    /// Anything else; details are only logged.
    #[error(
        "There was an error when extracting image information, please contact administrator for more details"
    )]
    Other,
}

impl ImageError {
    /// HTTP status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ImageError::AuthenticationRequired | ImageError::Tls => StatusCode::UNAUTHORIZED,
            ImageError::InvalidCredentials => StatusCode::FORBIDDEN,
            ImageError::BadRequest(_) | ImageError::ManifestUnknown | ImageError::Other => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// Classify the stderr of a failed registry inspection.
    pub fn from_stderr(stderr: &str) -> Self {
        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("manifest unknown") {
            ImageError::ManifestUnknown
        } else if lowered.contains("unauthorized: authentication required") {
            ImageError::AuthenticationRequired
        } else if lowered.contains("x509: certificate signed by unknown authority") {
            ImageError::Tls
        } else if lowered.contains("invalid username/password")
            || lowered.contains("incorrect username or password")
        {
            ImageError::InvalidCredentials
        } else {
            ImageError::Other
        }
    }
}

/// An image to inspect, with optional registry credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Image reference (`registry/repository:tag`).
    pub image: String,
    /// Registry user.
    pub registry_user: Option<String>,
    /// Registry password.
    pub registry_password: Option<String>,
    /// Verify the registry TLS certificate.
    pub verify_tls: bool,
}

impl ImageRequest {
    /// Request for a public image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            registry_user: None,
            registry_password: None,
            verify_tls: true,
        }
    }

    /// Attach registry credentials.
    pub fn with_credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.registry_user = user;
        self.registry_password = password;
        self
    }

    /// Set TLS verification.
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Credentials as a pair; user and password must be given together.
    pub fn credentials(&self) -> Result<Option<(&str, &str)>, ImageError> {
        match (self.registry_user.as_deref(), self.registry_password.as_deref()) {
            (Some(user), Some(password)) => Ok(Some((user, password))),
            (None, None) => Ok(None),
            _ => Err(ImageError::BadRequest(
                "Both parameters registry_user and registry_password have to be supplied for registry authentication"
                    .to_string(),
            )),
        }
    }

    /// Parameters echoed back on errors; the password is never included.
    pub fn parameters(&self) -> Value {
        json!({
            "image": self.image,
            "registry_user": self.registry_user,
            "verify_tls": self.verify_tls,
        })
    }
}

/// Image metadata as reported by the registry, in snake case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Content digest of the image manifest.
    #[serde(alias = "Digest")]
    pub digest: String,
    /// Image name.
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    /// Tag.
    #[serde(default, alias = "Tag")]
    pub tag: Option<String>,
    /// Tags known for the repository.
    #[serde(default, alias = "RepoTags")]
    pub repo_tags: Option<Vec<String>>,
    /// Creation time.
    #[serde(default, alias = "Created")]
    pub created: Option<String>,
    /// Docker version used for the build.
    #[serde(default, alias = "DockerVersion")]
    pub docker_version: Option<String>,
    /// Image labels.
    #[serde(default, alias = "Labels")]
    pub labels: Option<BTreeMap<String, String>>,
    /// CPU architecture.
    #[serde(default, alias = "Architecture")]
    pub architecture: Option<String>,
    /// Operating system.
    #[serde(default, alias = "Os")]
    pub os: Option<String>,
    /// Layer digests.
    #[serde(default, alias = "Layers")]
    pub layers: Option<Vec<String>>,
}

impl ImageMetadata {
    /// Metadata with only a digest.
    pub fn with_digest(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            name: None,
            tag: None,
            repo_tags: None,
            created: None,
            docker_version: None,
            labels: None,
            architecture: None,
            os: None,
            layers: None,
        }
    }
}

/// Inspects images in their registries.
#[async_trait]
pub trait ImageInspector: Send + Sync {
    /// Fetch metadata of `request.image`.
    async fn inspect(&self, request: &ImageRequest) -> Result<ImageMetadata, ImageError>;
}

// ============================================================================
// skopeo
// ============================================================================

/// Inspector shelling out to `skopeo inspect`.
#[derive(Debug, Clone)]
pub struct SkopeoInspector {
    binary: String,
}

impl SkopeoInspector {
    /// Create an inspector running `binary`.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn arguments(request: &ImageRequest) -> Result<Vec<String>, ImageError> {
        let mut args = vec!["inspect".to_string()];
        if let Some((user, password)) = request.credentials()? {
            args.push(format!("--creds={}:{}", user, password));
        }
        if !request.verify_tls {
            args.push("--tls-verify=false".to_string());
        }
        args.push(format!("docker://{}", request.image));
        Ok(args)
    }
}

impl Default for SkopeoInspector {
    fn default() -> Self {
        Self::new("skopeo")
    }
}

#[async_trait]
impl ImageInspector for SkopeoInspector {
    async fn inspect(&self, request: &ImageRequest) -> Result<ImageMetadata, ImageError> {
        let args = Self::arguments(request)?;

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                error!(binary = %self.binary, error = %e, "Failed to run registry inspector");
                ImageError::Other
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = ImageError::from_stderr(&stderr);
            if err == ImageError::Other {
                error!(
                    image = %request.image,
                    stderr = %stderr.trim(),
                    "An unhandled error occurred during inspection of image"
                );
            } else {
                debug!(image = %request.image, error = %err, "Image inspection rejected");
            }
            return Err(err);
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            error!(image = %request.image, error = %e, "Unparseable registry inspector output");
            ImageError::Other
        })
    }
}

// ============================================================================
// Static
// ============================================================================

/// Inspector answering from a fixed table; unknown images have no manifest.
#[derive(Debug, Default)]
pub struct StaticInspector {
    images: DashMap<String, ImageMetadata>,
    credentials: DashMap<String, (String, String)>,
    inspections: AtomicU64,
}

impl StaticInspector {
    /// Create an inspector that knows no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image` with content `digest`.
    pub fn with_image(self, image: &str, digest: &str) -> Self {
        self.images
            .insert(image.to_string(), ImageMetadata::with_digest(digest));
        self
    }

    /// Require `user`/`password` for `image`.
    pub fn with_credentials(self, image: &str, user: &str, password: &str) -> Self {
        self.credentials
            .insert(image.to_string(), (user.to_string(), password.to_string()));
        self
    }

    /// Number of inspections served.
    pub fn inspections(&self) -> u64 {
        self.inspections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageInspector for StaticInspector {
    async fn inspect(&self, request: &ImageRequest) -> Result<ImageMetadata, ImageError> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        let supplied = request.credentials()?;

        if let Some(required) = self.credentials.get(&request.image) {
            let (user, password) = required.value();
            if supplied != Some((user.as_str(), password.as_str())) {
                return Err(ImageError::AuthenticationRequired);
            }
        }

        self.images
            .get(&request.image)
            .map(|m| m.clone())
            .ok_or(ImageError::ManifestUnknown)
    }
}
