// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use serde_json::json;
use serde_json::Value;

use crate::decoy_digest;
use crate::shuffle;
use crate::ClaimPath;
use crate::Disclosable;
use crate::DisclosableArray;
use crate::DisclosableObject;
use crate::Disclosure;
use crate::Error;
use crate::Fold;
use crate::HashAlg;
use crate::Hasher;
use crate::JsonObject;
use crate::Result;
use crate::SaltProvider;
use crate::ARRAY_DIGEST_KEY;
use crate::DEFAULT_SALT_SIZE;
use crate::DIGESTS_KEY;
use crate::SD_ALG;

/// Compiles a disclosable tree into the JSON object to be signed and the
/// disclosures hoisted out of it.
#[derive(Debug, Clone)]
pub struct SdObjectEncoder<H = HashAlg, S = crate::DefaultSaltProvider> {
  /// The hash function used to create digests.
  hasher: H,
  /// Source of salts, decoy material and shuffling randomness.
  salts: S,
  /// Size of random data used to generate the salts for disclosures in bytes.
  salt_size: usize,
  /// Decoy digests added to every container that hoists at least one claim.
  decoys: usize,
}

/// The output of [`SdObjectEncoder::encode`]: the redacted claim set and the
/// disclosures backing its digests, in hoisting order.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
  pub object: JsonObject,
  pub disclosures: Vec<Disclosure>,
}

impl SdObjectEncoder {
  /// Creates an encoder for `alg` drawing randomness from the thread RNG.
  pub fn new(alg: HashAlg) -> Self {
    Self::with_parts(alg, crate::DefaultSaltProvider)
  }
}

impl<H: Hasher> SdObjectEncoder<H> {
  /// Creates an encoder with a custom hash function to create digests.
  pub fn with_custom_hasher(hasher: H) -> Self {
    Self::with_parts(hasher, crate::DefaultSaltProvider)
  }
}

impl<H: Hasher, S: SaltProvider> SdObjectEncoder<H, S> {
  /// Creates an encoder with a custom hash function and salt source.
  pub fn with_parts(hasher: H, salts: S) -> Self {
    Self {
      hasher,
      salts,
      salt_size: DEFAULT_SALT_SIZE,
      decoys: 0,
    }
  }

  /// Requests `decoys` additional decoy digests in every container that hoists
  /// at least one claim.
  pub fn with_decoys(mut self, decoys: usize) -> Self {
    self.decoys = decoys;
    self
  }

  /// Sets size of random data used to generate the salts for disclosures in bytes.
  ///
  /// ## Warning
  /// Salt size must be >= 16.
  pub fn set_salt_size(&mut self, salt_size: usize) -> Result<()> {
    if salt_size < 16 {
      Err(Error::InvalidSaltSize)
    } else {
      self.salt_size = salt_size;
      Ok(())
    }
  }

  /// Encodes `root`, substituting every selectively disclosable element with a
  /// digest and returning the hoisted disclosures in insertion order. The
  /// `_sd_alg` claim is added iff any digest was emitted.
  ///
  /// ## Error
  /// [`Error::ReservedName`] if a claim is named `_sd`/`_sd_alg` or such a key
  /// appears inside a leaf value; [`Error::DataTypeMismatch`] if a `null`
  /// value is marked selectively disclosable; [`Error::DigestCollision`] if
  /// two disclosures (or decoys) hash to the same digest.
  pub fn encode(&self, root: &DisclosableObject) -> Result<EncodedPayload> {
    let mut folder = EncodeFolder {
      hasher: &self.hasher,
      salts: &self.salts,
      salt_size: self.salt_size,
      decoys: self.decoys,
      seen_digests: HashSet::new(),
      emitted_digests: false,
    };
    let root_node = root.fold(&mut folder)?;
    let Value::Object(mut object) = root_node.value else {
      unreachable!();
    };
    if folder.emitted_digests {
      object.insert(SD_ALG.to_owned(), Value::String(self.hasher.alg_name().to_owned()));
    }
    Ok(EncodedPayload {
      object,
      disclosures: root_node.disclosures,
    })
  }
}

struct EncodeFolder<'a> {
  hasher: &'a dyn Hasher,
  salts: &'a dyn SaltProvider,
  salt_size: usize,
  decoys: usize,
  /// All digests emitted so far, for collision detection.
  seen_digests: HashSet<String>,
  emitted_digests: bool,
}

/// One encoded subtree: its JSON form and the disclosures hoisted below it.
struct EncodedNode {
  value: Value,
  disclosures: Vec<Disclosure>,
}

impl EncodeFolder<'_> {
  fn fresh_salt(&self) -> String {
    multibase::Base::Base64Url.encode(self.salts.random_bytes(self.salt_size))
  }

  fn record_digest(&mut self, digest: &str) -> Result<()> {
    if self.seen_digests.insert(digest.to_owned()) {
      Ok(())
    } else {
      Err(Error::DigestCollision(digest.to_owned()))
    }
  }

  /// The number of digest entries a container must carry, given how many
  /// claims were actually hoisted out of it.
  fn digest_floor(&self, hoisted: usize, min_digests: Option<usize>) -> usize {
    let requested = if hoisted == 0 { 0 } else { self.decoys };
    min_digests.unwrap_or(0).max(hoisted + requested)
  }
}

impl Fold for EncodeFolder<'_> {
  type Out = EncodedNode;

  fn leaf(&mut self, path: &ClaimPath, selective: bool, value: &Value) -> Result<EncodedNode> {
    ensure_no_reserved_keys(value, path)?;
    if selective && value.is_null() {
      return Err(Error::DataTypeMismatch(format!(
        "null value at {path} cannot be selectively disclosed"
      )));
    }
    Ok(EncodedNode {
      value: value.clone(),
      disclosures: Vec::new(),
    })
  }

  fn object(
    &mut self,
    path: &ClaimPath,
    object: &DisclosableObject,
    children: Vec<(String, Disclosable<EncodedNode>)>,
  ) -> Result<EncodedNode> {
    let mut map = JsonObject::new();
    let mut disclosures: Vec<Disclosure> = Vec::new();
    let mut digests: Vec<String> = Vec::new();
    for (name, child) in children {
      if name == DIGESTS_KEY || name == SD_ALG {
        return Err(Error::ReservedName(format!("{path}/{name}")));
      }
      match child {
        Disclosable::Plain(node) => {
          disclosures.extend(node.disclosures);
          map.insert(name, node.value);
        }
        Disclosable::Selective(node) => {
          let disclosure = Disclosure::hoisted(self.fresh_salt(), Some(name), node.value);
          let digest = disclosure.digest(self.hasher);
          self.record_digest(&digest)?;
          disclosures.extend(node.disclosures);
          disclosures.push(disclosure);
          digests.push(digest);
        }
      }
    }

    let floor = self.digest_floor(digests.len(), object.min_digests());
    while digests.len() < floor {
      let decoy = decoy_digest(self.hasher, self.salts);
      self.record_digest(&decoy)?;
      digests.push(decoy);
    }
    if !digests.is_empty() {
      // Uniformly shuffled so position and count leak nothing about decoys.
      shuffle(&mut digests, self.salts);
      map.insert(
        DIGESTS_KEY.to_owned(),
        Value::Array(digests.into_iter().map(Value::String).collect()),
      );
      self.emitted_digests = true;
    }

    Ok(EncodedNode {
      value: Value::Object(map),
      disclosures,
    })
  }

  fn array(
    &mut self,
    _path: &ClaimPath,
    array: &DisclosableArray,
    elements: Vec<Disclosable<EncodedNode>>,
  ) -> Result<EncodedNode> {
    let mut values: Vec<Value> = Vec::with_capacity(elements.len());
    let mut disclosures: Vec<Disclosure> = Vec::new();
    let mut placeholders = 0usize;
    for element in elements {
      match element {
        Disclosable::Plain(node) => {
          disclosures.extend(node.disclosures);
          values.push(node.value);
        }
        Disclosable::Selective(node) => {
          let disclosure = Disclosure::hoisted(self.fresh_salt(), None, node.value);
          let digest = disclosure.digest(self.hasher);
          self.record_digest(&digest)?;
          disclosures.extend(node.disclosures);
          disclosures.push(disclosure);
          values.push(json!({ ARRAY_DIGEST_KEY: digest }));
          placeholders += 1;
        }
      }
    }

    let floor = self.digest_floor(placeholders, array.min_digests());
    while placeholders < floor {
      let decoy = decoy_digest(self.hasher, self.salts);
      self.record_digest(&decoy)?;
      values.push(json!({ ARRAY_DIGEST_KEY: decoy }));
      placeholders += 1;
    }
    if placeholders > 0 {
      self.emitted_digests = true;
    }

    Ok(EncodedNode {
      value: Value::Array(values),
      disclosures,
    })
  }
}

/// Rejects user claim values carrying `_sd` or `_sd_alg` keys at any depth.
fn ensure_no_reserved_keys(value: &Value, path: &ClaimPath) -> Result<()> {
  match value {
    Value::Object(object) => {
      for (key, value) in object {
        if key == DIGESTS_KEY || key == SD_ALG {
          return Err(Error::ReservedName(format!("{path}: nested key {key}")));
        }
        ensure_no_reserved_keys(value, path)?;
      }
      Ok(())
    }
    Value::Array(values) => values.iter().try_for_each(|value| ensure_no_reserved_keys(value, path)),
    _ => Ok(()),
  }
}

#[cfg(test)]
mod test {
  use serde_json::json;
  use serde_json::Value;

  use super::SdObjectEncoder;
  use crate::DisclosableArray;
  use crate::DisclosableObject;
  use crate::Error;
  use crate::HashAlg;
  use crate::Hasher;
  use crate::SeededSaltProvider;

  fn address_tree() -> DisclosableObject {
    let mut root = DisclosableObject::new();
    root.insert_plain("sub", json!("6c5c0a49-b589-431d-bae7-219122a9ec2c")).unwrap();
    root.insert_plain("iss", json!("sample")).unwrap();
    root
      .insert_selective(
        "address",
        json!({
          "street_address": "Schulstr. 12",
          "locality": "Schulpforta",
          "region": "Sachsen-Anhalt",
          "country": "DE"
        }),
      )
      .unwrap();
    root
  }

  #[test]
  fn hoisted_claim_with_decoys() {
    let encoder = SdObjectEncoder::with_parts(HashAlg::Sha256, SeededSaltProvider::new(1)).with_decoys(4);
    let payload = encoder.encode(&address_tree()).unwrap();

    let keys: Vec<&str> = payload.object.keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 4);
    for key in ["sub", "iss", "_sd", "_sd_alg"] {
      assert!(keys.contains(&key));
    }
    assert_eq!(payload.object["_sd"].as_array().unwrap().len(), 5);
    assert_eq!(payload.object["_sd_alg"], json!("sha-256"));
    assert_eq!(payload.disclosures.len(), 1);
  }

  #[test]
  fn plain_tree_has_no_alg_claim() {
    let mut root = DisclosableObject::new();
    root.insert_plain("sub", json!("user_42")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    assert!(payload.object.get("_sd_alg").is_none());
    assert!(payload.object.get("_sd").is_none());
    assert!(payload.disclosures.is_empty());
  }

  #[test]
  fn every_digest_is_backed_or_decoy() {
    let encoder = SdObjectEncoder::with_parts(HashAlg::Sha256, SeededSaltProvider::new(5)).with_decoys(3);
    let payload = encoder.encode(&address_tree()).unwrap();
    let digests: Vec<&str> = payload.object["_sd"]
      .as_array()
      .unwrap()
      .iter()
      .map(|digest| digest.as_str().unwrap())
      .collect();
    let real: Vec<String> = payload
      .disclosures
      .iter()
      .map(|disclosure| disclosure.digest(&HashAlg::Sha256))
      .collect();
    for digest in &real {
      assert!(digests.contains(&digest.as_str()));
    }
    assert_eq!(digests.len(), real.len() + 3);
  }

  #[test]
  fn min_digests_floor_pads_with_decoys() {
    let mut root = DisclosableObject::new().with_min_digests(6);
    root.insert_plain("sub", json!("user_42")).unwrap();
    root.insert_selective("email", json!("user@example.com")).unwrap();
    let encoder = SdObjectEncoder::with_parts(HashAlg::Sha256, SeededSaltProvider::new(2));
    let payload = encoder.encode(&root).unwrap();
    assert_eq!(payload.object["_sd"].as_array().unwrap().len(), 6);
    assert_eq!(payload.disclosures.len(), 1);
  }

  #[test]
  fn decoy_only_container_still_carries_alg() {
    let mut root = DisclosableObject::new().with_min_digests(2);
    root.insert_plain("sub", json!("user_42")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    assert_eq!(payload.object["_sd"].as_array().unwrap().len(), 2);
    assert_eq!(payload.object["_sd_alg"], json!("sha-256"));
    assert!(payload.disclosures.is_empty());
  }

  #[test]
  fn array_elements_become_placeholders() {
    let mut nationalities = DisclosableArray::new();
    nationalities.push_plain(json!("DE"));
    nationalities.push_selective(json!("IS"));
    let mut root = DisclosableObject::new();
    root.insert_plain("nationalities", nationalities).unwrap();

    let encoder = SdObjectEncoder::with_parts(HashAlg::Sha256, SeededSaltProvider::new(9));
    let payload = encoder.encode(&root).unwrap();
    let array = payload.object["nationalities"].as_array().unwrap();
    assert_eq!(array[0], json!("DE"));
    let digest = array[1]["..."].as_str().unwrap();
    assert_eq!(payload.disclosures.len(), 1);
    assert_eq!(payload.disclosures[0].digest(&HashAlg::Sha256), digest);
    assert_eq!(payload.object["_sd_alg"], json!("sha-256"));
  }

  #[test]
  fn reserved_claim_names_are_rejected() {
    let mut root = DisclosableObject::new();
    root.insert_plain("_sd", json!("foo")).unwrap();
    assert!(matches!(
      SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap_err(),
      Error::ReservedName(_)
    ));

    let mut root = DisclosableObject::new();
    root.insert_plain("claim", json!({"nested": {"_sd": ["digest"]}})).unwrap();
    assert!(matches!(
      SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap_err(),
      Error::ReservedName(_)
    ));
  }

  #[test]
  fn selective_null_is_rejected() {
    let mut root = DisclosableObject::new();
    root.insert_selective("claim", json!(null)).unwrap();
    assert!(matches!(
      SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap_err(),
      Error::DataTypeMismatch(_)
    ));
  }

  #[test]
  fn deterministic_given_seeded_salts() {
    let encode = || {
      let encoder = SdObjectEncoder::with_parts(HashAlg::Sha256, SeededSaltProvider::new(77)).with_decoys(2);
      encoder.encode(&address_tree()).unwrap()
    };
    let (first, second) = (encode(), encode());
    assert_eq!(Value::Object(first.object.clone()), Value::Object(second.object.clone()));
    let strings = |payload: &super::EncodedPayload| {
      payload
        .disclosures
        .iter()
        .map(|disclosure| disclosure.as_str().to_owned())
        .collect::<Vec<_>>()
    };
    assert_eq!(strings(&first), strings(&second));
  }
}
