// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::Hasher;

/// Default salt size in bytes, the 128 bits the SD-JWT draft recommends.
pub(crate) const DEFAULT_SALT_SIZE: usize = 16;

const DECOY_INPUT_MIN: usize = 12;
const DECOY_INPUT_MAX: usize = 24;

/// Source of the randomness consumed while encoding: salts, decoy material and
/// digest shuffling.
///
/// Implementations must be thread-safe; concurrent draws yield independent
/// values.
pub trait SaltProvider: Send + Sync {
  /// Returns `len` bytes of cryptographically unpredictable data.
  fn random_bytes(&self, len: usize) -> Vec<u8>;

  /// Returns a uniformly distributed index in `[0, bound)`. `bound` must be
  /// greater than zero.
  fn pick(&self, bound: usize) -> usize;

  /// Returns a fresh base64url-encoded salt of the default size.
  fn salt(&self) -> String {
    multibase::Base::Base64Url.encode(self.random_bytes(DEFAULT_SALT_SIZE))
  }
}

/// A [`SaltProvider`] drawing from the calling thread's RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSaltProvider;

impl SaltProvider for DefaultSaltProvider {
  fn random_bytes(&self, len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
  }

  fn pick(&self, bound: usize) -> usize {
    rand::thread_rng().gen_range(0..bound)
  }
}

/// A reproducible [`SaltProvider`] seeded once, for deterministic encodings in
/// tests and golden files.
#[derive(Debug)]
pub struct SeededSaltProvider(Mutex<StdRng>);

impl SeededSaltProvider {
  pub fn new(seed: u64) -> Self {
    Self(Mutex::new(StdRng::seed_from_u64(seed)))
  }
}

impl SaltProvider for SeededSaltProvider {
  fn random_bytes(&self, len: usize) -> Vec<u8> {
    let mut rng = self.0.lock().expect("poisoned salt provider lock");
    (0..len).map(|_| rng.gen()).collect()
  }

  fn pick(&self, bound: usize) -> usize {
    let mut rng = self.0.lock().expect("poisoned salt provider lock");
    rng.gen_range(0..bound)
  }
}

/// Fisher-Yates shuffle over the injected randomness source.
pub(crate) fn shuffle<T>(values: &mut [T], salts: &dyn SaltProvider) {
  for i in (1..values.len()).rev() {
    values.swap(i, salts.pick(i + 1));
  }
}

/// Returns a digest indistinguishable from that of a real disclosure: random
/// input of 12 to 23 bytes, hashed and base64url-encoded.
pub(crate) fn decoy_digest(hasher: &dyn Hasher, salts: &dyn SaltProvider) -> String {
  let len = DECOY_INPUT_MIN + salts.pick(DECOY_INPUT_MAX - DECOY_INPUT_MIN);
  let input = salts.random_bytes(len);
  multibase::Base::Base64Url.encode(hasher.digest(&input))
}

#[cfg(test)]
mod test {
  use super::decoy_digest;
  use super::shuffle;
  use super::SaltProvider;
  use super::SeededSaltProvider;
  use crate::HashAlg;

  #[test]
  fn seeded_provider_is_reproducible() {
    let a = SeededSaltProvider::new(7);
    let b = SeededSaltProvider::new(7);
    assert_eq!(a.random_bytes(16), b.random_bytes(16));
    assert_eq!(a.salt(), b.salt());
    assert_eq!(a.pick(100), b.pick(100));
  }

  #[test]
  fn distinct_salts() {
    let salts = SeededSaltProvider::new(42);
    assert_ne!(salts.salt(), salts.salt());
  }

  #[test]
  fn shuffle_preserves_elements() {
    let salts = SeededSaltProvider::new(3);
    let mut values: Vec<u32> = (0..32).collect();
    shuffle(&mut values, &salts);
    let mut sorted = values.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..32).collect::<Vec<u32>>());
    assert_ne!(values, sorted);
  }

  #[test]
  fn decoy_has_digest_length() {
    let salts = SeededSaltProvider::new(11);
    let decoy = decoy_digest(&HashAlg::Sha256, &salts);
    let decoded = multibase::Base::Base64Url.decode(&decoy).unwrap();
    assert_eq!(decoded.len(), 32);
  }
}
