// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request fingerprints.
//!
//! A fingerprint is the SHA-256 of the canonical JSON (RFC 8785, sorted keys)
//! of every parameter that affects the result of a piece of work. Callers pass
//! only result-affecting fields; secrets, `force` flags and callback URLs must
//! never reach this module. Lists whose order carries no meaning must be sorted
//! by the caller before fingerprinting.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Stable fingerprint of a request's result-affecting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint arbitrary serializable parameters.
    pub fn of<T: Serialize + ?Sized>(params: &T) -> Result<Self> {
        let canonical = serde_jcs::to_vec(params)?;
        Ok(Self(sha256_hex(&canonical)))
    }

    /// Fingerprint parameters of work performed on a container image.
    ///
    /// The image's content digest is used instead of its reference so that
    /// different tags pointing at the same content share a fingerprint.
    pub fn of_image<T: Serialize + ?Sized>(image_digest: &str, params: &T) -> Result<Self> {
        let params = Self::of(params)?;
        Ok(Self(format!("{}+{}", image_digest, params.0)))
    }

    /// Wrap an already computed fingerprint (e.g. read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fingerprint as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
