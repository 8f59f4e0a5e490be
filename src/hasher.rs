// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crypto::hashes::sha::SHA256;
use crypto::hashes::sha::SHA256_LEN;
use crypto::hashes::sha::SHA384;
use crypto::hashes::sha::SHA384_LEN;
use crypto::hashes::sha::SHA512;
use crypto::hashes::sha::SHA512_LEN;
use sha3::Digest as _;
use sha3::Sha3_256;
use sha3::Sha3_384;
use sha3::Sha3_512;

use crate::Error;
use crate::Result;

/// Used to implement hash functions to be used for encoding/decoding.
///
/// ## Note
///
/// Implementations of this trait are expected only for algorithms listed in
/// the IANA "Named Information Hash Algorithm" registry.
/// See [Hash Function Claim](https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-07.html#name-hash-function-claim)
pub trait Hasher: Sync + Send {
  /// Digests input to produce unique fixed-size hash value in bytes.
  fn digest(&self, input: &[u8]) -> Vec<u8>;

  /// Returns the name of hash function used.
  fn alg_name(&self) -> &'static str;

  /// Returns the base64url-encoded digest of a `disclosure`.
  fn encoded_digest(&self, disclosure: &str) -> String {
    let hash = self.digest(disclosure.as_bytes());
    multibase::Base::Base64Url.encode(hash)
  }
}

/// The closed set of hash algorithms a claim set's `_sd_alg` may name.
///
/// The wire form of each variant is its IANA hash name alias, e.g. `sha-256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::IntoStaticStr, strum::EnumIter)]
pub enum HashAlg {
  #[strum(serialize = "sha-256")]
  Sha256,
  #[strum(serialize = "sha-384")]
  Sha384,
  #[strum(serialize = "sha-512")]
  Sha512,
  #[strum(serialize = "sha3-256")]
  Sha3_256,
  #[strum(serialize = "sha3-384")]
  Sha3_384,
  #[strum(serialize = "sha3-512")]
  Sha3_512,
}

impl HashAlg {
  /// Resolves an `_sd_alg` alias.
  ///
  /// ## Error
  /// [`Error::UnsupportedHashAlgorithm`] for any alias outside the closed set,
  /// including aliases the IANA registry knows but this library does not accept.
  pub fn from_alias(alias: &str) -> Result<Self> {
    alias
      .parse()
      .map_err(|_| Error::UnsupportedHashAlgorithm(alias.to_owned()))
  }

  /// The canonical alias of this algorithm, as serialized into `_sd_alg`.
  pub fn alias(&self) -> &'static str {
    (*self).into()
  }
}

impl Hasher for HashAlg {
  fn digest(&self, input: &[u8]) -> Vec<u8> {
    match self {
      HashAlg::Sha256 => {
        let mut digest: [u8; SHA256_LEN] = Default::default();
        SHA256(input, &mut digest);
        digest.to_vec()
      }
      HashAlg::Sha384 => {
        let mut digest: [u8; SHA384_LEN] = [0; SHA384_LEN];
        SHA384(input, &mut digest);
        digest.to_vec()
      }
      HashAlg::Sha512 => {
        let mut digest: [u8; SHA512_LEN] = [0; SHA512_LEN];
        SHA512(input, &mut digest);
        digest.to_vec()
      }
      HashAlg::Sha3_256 => Sha3_256::digest(input).to_vec(),
      HashAlg::Sha3_384 => Sha3_384::digest(input).to_vec(),
      HashAlg::Sha3_512 => Sha3_512::digest(input).to_vec(),
    }
  }

  fn alg_name(&self) -> &'static str {
    self.alias()
  }
}

// Some test values taken from https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-05.html#name-hashing-disclosures
#[cfg(test)]
mod test {
  use super::HashAlg;
  use super::Hasher;
  use crate::Error;

  #[test]
  fn object_disclosure_digest() {
    let disclosure = "WyI2cU1RdlJMNWhhaiIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0";
    let hash = HashAlg::Sha256.encoded_digest(disclosure);
    assert_eq!("uutlBuYeMDyjLLTpf6Jxi7yNkEF35jdyWMn9U7b_RYY", hash);
  }

  #[test]
  fn escaped_content_digest() {
    let disclosure =
      "WyJlSThaV205UW5LUHBOUGVOZW5IZGhRIiwgImVtYWlsIiwgIlwidW51c3VhbCBlbWFpbCBhZGRyZXNzXCJAZXhhbXBsZS5qcCJd";
    let hash = HashAlg::Sha256.encoded_digest(disclosure);
    assert_eq!("Kuet1yAa0HIQvYnOVd59hcViO9Ug6J2kSfqYRBeowvE", hash);
  }

  #[test]
  fn array_entry_disclosure_digest() {
    let disclosure = "WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgIkZSIl0";
    let hash = HashAlg::Sha256.encoded_digest(disclosure);
    assert_eq!("w0I8EKcdCtUPkGCNUrfwVp2xEgNjtoIDlOxc9-PlOhs", hash);
  }

  #[test]
  fn aliases_round_trip() {
    for (alias, alg) in [
      ("sha-256", HashAlg::Sha256),
      ("sha-384", HashAlg::Sha384),
      ("sha-512", HashAlg::Sha512),
      ("sha3-256", HashAlg::Sha3_256),
      ("sha3-384", HashAlg::Sha3_384),
      ("sha3-512", HashAlg::Sha3_512),
    ] {
      assert_eq!(HashAlg::from_alias(alias).unwrap(), alg);
      assert_eq!(alg.alias(), alias);
    }
  }

  #[test]
  fn unknown_alias_is_rejected() {
    for alias in ["md5", "sha256", "SHA-256", ""] {
      assert!(matches!(
        HashAlg::from_alias(alias).unwrap_err(),
        Error::UnsupportedHashAlgorithm(_)
      ));
    }
  }

  #[test]
  fn digest_lengths() {
    for (alg, len) in [
      (HashAlg::Sha256, 32),
      (HashAlg::Sha384, 48),
      (HashAlg::Sha512, 64),
      (HashAlg::Sha3_256, 32),
      (HashAlg::Sha3_384, 48),
      (HashAlg::Sha3_512, 64),
    ] {
      assert_eq!(alg.digest(b"abc").len(), len);
    }
  }
}
