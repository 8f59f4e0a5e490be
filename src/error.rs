// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

/// Alias for a `Result` with the error type [`Error`].
pub type Result<T> = ::core::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
#[non_exhaustive]
pub enum Error {
  /// A disclosure string that is not base64url, not a JSON array, has the wrong
  /// number of elements, carries non-string salt or name, or discloses `null`.
  #[error("malformed disclosure: {0}")]
  MalformedDisclosure(String),

  #[error("unsupported hash algorithm: {0}")]
  UnsupportedHashAlgorithm(String),

  #[error("claim set contains digests but no top-level `_sd_alg` claim")]
  MissingHashAlgorithm,

  /// Two distinct disclosures hashed to the same digest.
  #[error("distinct disclosures share the digest {0}")]
  DigestCollision(String),

  /// The candidate disclosure list contains the same disclosure twice.
  #[error("duplicated candidate disclosure: {0}")]
  NonUniqueDisclosures(String),

  /// Candidate disclosures that matched no digest anywhere in the claim set.
  #[error("disclosures matched no digest in the claim set: {}", .0.join(", "))]
  UnusedDisclosures(Vec<String>),

  #[error("claim {0} of disclosure already exists")]
  DuplicateClaim(String),

  #[error("digest {0} appears multiple times")]
  DuplicateDigest(String),

  #[error("reserved claim name: {0}")]
  ReservedName(String),

  /// A disclosable tree that breaks its own structural rules, e.g. duplicate
  /// property names at one level.
  #[error("invalid disclosable structure: {0}")]
  InvalidDisclosable(String),

  #[error("array disclosure object contains keys other than `...`")]
  InvalidArrayDisclosureObject,

  #[error("data type is not expected: {0}")]
  DataTypeMismatch(String),

  #[error("invalid input: {0}")]
  DeserializationError(String),

  #[error("invalid path: {0}")]
  InvalidPath(String),

  /// A hasher whose algorithm differs from the claim set's `_sd_alg`.
  #[error("invalid hasher: {0}")]
  InvalidHasher(String),

  #[error("jws signer failed: {0}")]
  JwsSignerFailure(String),

  #[error("missing key binding jwt")]
  MissingKeyBindingJwt,

  #[error("salt size must be greater or equal 16")]
  InvalidSaltSize,
}
