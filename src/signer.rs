// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;

pub type JsonObject = Map<String, Value>;

/// JSON Web Signature (JWS) Signer.
#[async_trait]
pub trait JwsSigner {
  type Error: Error;
  /// Creates a compact JWS over `payload`. The algorithm used for signing must
  /// be read from the `header.alg` property.
  async fn sign(&self, header: &JsonObject, payload: &JsonObject) -> Result<Vec<u8>, Self::Error>;
}

/// JSON Web Signature (JWS) Verifier.
#[async_trait]
pub trait JwsVerifier {
  type Error: Error;
  /// Checks the signature of the compact JWS `jws`.
  async fn verify(&self, jws: &str) -> Result<(), Self::Error>;
}
