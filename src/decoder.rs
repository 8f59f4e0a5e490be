// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde_json::Value;
use strum::IntoEnumIterator;

use crate::Disclosure;
use crate::Error;
use crate::HashAlg;
use crate::Hasher;
use crate::JsonObject;
use crate::Result;
use crate::ARRAY_DIGEST_KEY;
use crate::DIGESTS_KEY;
use crate::SD_ALG;

/// Recreates the original claims of an SD-JWT object by substituting digests
/// with the plain text values of matching disclosures.
pub struct SdObjectDecoder {
  hashers: BTreeMap<String, Box<dyn Hasher>>,
}

/// Matched digests and every digest encountered, tracked across the walk.
#[derive(Default)]
struct DecodeState {
  applied: Vec<String>,
  encountered: HashSet<String>,
}

impl SdObjectDecoder {
  /// Creates a new [`SdObjectDecoder`] with every built-in hash algorithm
  /// registered.
  pub fn new() -> Self {
    let mut decoder = Self {
      hashers: BTreeMap::new(),
    };
    for alg in HashAlg::iter() {
      decoder.add_hasher(Box::new(alg));
    }
    decoder
  }

  /// Adds a hasher.
  ///
  /// If a hasher for the same algorithm [`Hasher::alg_name`] already exists, it will be replaced and
  /// the existing hasher will be returned, otherwise `None`.
  pub fn add_hasher(&mut self, hasher: Box<dyn Hasher>) -> Option<Box<dyn Hasher>> {
    self.hashers.insert(hasher.alg_name().to_owned(), hasher)
  }

  /// Removes a hasher.
  ///
  /// If the hasher for that algorithm exists, it will be removed and returned, otherwise `None`.
  pub fn remove_hasher(&mut self, alg_name: &str) -> Option<Box<dyn Hasher>> {
    self.hashers.remove(alg_name)
  }

  /// Substitutes the digests in `object` with the plain text values of the
  /// matching `disclosures`, returning the recreated object together with the
  /// disclosures actually consumed, in application order.
  ///
  /// The hash algorithm is read from the top-level `_sd_alg` claim. Without it
  /// the object must contain no digests and is returned unchanged. `_sd`,
  /// `_sd_alg` and unmatched array placeholders are stripped from the output;
  /// unmatched digests are indistinguishable from decoys and simply dropped.
  ///
  /// ## Error
  /// Fails without partial output if a disclosure is malformed, duplicated or
  /// never used, if a digest appears twice, or if a disclosed claim collides
  /// with an existing property.
  pub fn decode(&self, object: &JsonObject, disclosures: &[String]) -> Result<(JsonObject, Vec<Disclosure>)> {
    let alg = match object.get(SD_ALG) {
      Some(Value::String(alg)) => Some(alg.clone()),
      Some(_) => {
        return Err(Error::DataTypeMismatch(
          "the value of `_sd_alg` is not a string".to_owned(),
        ))
      }
      None => None,
    };
    let Some(alg) = alg else {
      if contains_digests(object) {
        return Err(Error::MissingHashAlgorithm);
      }
      // Nothing is redacted; any candidate disclosure is necessarily unused.
      if !disclosures.is_empty() {
        return Err(Error::UnusedDisclosures(disclosures.to_vec()));
      }
      return Ok((object.clone(), Vec::new()));
    };
    let hasher = self
      .hashers
      .get(alg.as_str())
      .map(AsRef::as_ref)
      .ok_or_else(|| Error::UnsupportedHashAlgorithm(alg.clone()))?;

    // Map of (disclosure digest) → (disclosure).
    let mut candidates: BTreeMap<String, Disclosure> = BTreeMap::new();
    for disclosure in disclosures {
      let parsed = Disclosure::parse(disclosure)?;
      if candidates.insert(parsed.digest(hasher), parsed).is_some() {
        return Err(Error::NonUniqueDisclosures(disclosure.clone()));
      }
    }

    let mut state = DecodeState::default();
    let mut decoded = self.decode_object(object, &candidates, &mut state, true)?;
    decoded.remove(SD_ALG);

    if state.applied.len() != candidates.len() {
      let unused: Vec<String> = candidates
        .iter()
        .filter(|(digest, _)| !state.applied.contains(digest))
        .map(|(_, disclosure)| disclosure.as_str().to_owned())
        .collect();
      return Err(Error::UnusedDisclosures(unused));
    }

    let used: Vec<Disclosure> = state
      .applied
      .iter()
      .flat_map(|digest| candidates.get(digest).cloned())
      .collect();
    Ok((decoded, used))
  }

  fn decode_object(
    &self,
    object: &JsonObject,
    candidates: &BTreeMap<String, Disclosure>,
    state: &mut DecodeState,
    top_level: bool,
  ) -> Result<JsonObject> {
    let mut output = object.clone();
    for (key, value) in object {
      if key == SD_ALG {
        if top_level {
          continue;
        }
        return Err(Error::DataTypeMismatch(
          "`_sd_alg` must appear at the top level only".to_owned(),
        ));
      }
      if key == DIGESTS_KEY {
        let digests = value
          .as_array()
          .ok_or_else(|| Error::DataTypeMismatch(format!("{DIGESTS_KEY} is not an array")))?;
        for digest in digests {
          let digest = digest
            .as_str()
            .ok_or_else(|| Error::DataTypeMismatch(format!("{digest} is not a string")))?;
          if !state.encountered.insert(digest.to_owned()) {
            return Err(Error::DuplicateDigest(digest.to_owned()));
          }
          // Digests without a matching disclosure are dropped: decoys and
          // undisclosed claims are indistinguishable here.
          if let Some(disclosure) = candidates.get(digest) {
            let name = disclosure
              .claim_name()
              .ok_or_else(|| Error::MalformedDisclosure(format!("array element disclosure in `_sd`: {disclosure}")))?;
            if output.contains_key(name) {
              return Err(Error::DuplicateClaim(name.to_owned()));
            }
            state.applied.push(digest.to_owned());
            let disclosed = self.decode_value(disclosure.claim_value(), candidates, state)?;
            output.insert(name.to_owned(), disclosed);
          }
        }
        output.remove(DIGESTS_KEY);
        continue;
      }

      match value {
        Value::Object(nested) => {
          let decoded = self.decode_object(nested, candidates, state, false)?;
          output.insert(key.clone(), Value::Object(decoded));
        }
        Value::Array(nested) => {
          let decoded = self.decode_array(nested, candidates, state)?;
          output.insert(key.clone(), Value::Array(decoded));
        }
        // Only objects and arrays require decoding.
        _ => {}
      }
    }
    Ok(output)
  }

  fn decode_array(
    &self,
    array: &[Value],
    candidates: &BTreeMap<String, Disclosure>,
    state: &mut DecodeState,
  ) -> Result<Vec<Value>> {
    let mut output: Vec<Value> = Vec::with_capacity(array.len());
    for value in array {
      if let Some(object) = value.as_object() {
        if let Some(digest) = object.get(ARRAY_DIGEST_KEY) {
          if object.len() != 1 {
            return Err(Error::InvalidArrayDisclosureObject);
          }
          let digest = digest
            .as_str()
            .ok_or_else(|| Error::DataTypeMismatch(format!("{ARRAY_DIGEST_KEY} digest is not a string")))?;
          if !state.encountered.insert(digest.to_owned()) {
            return Err(Error::DuplicateDigest(digest.to_owned()));
          }
          if let Some(disclosure) = candidates.get(digest) {
            if disclosure.claim_name().is_some() {
              return Err(Error::MalformedDisclosure(format!(
                "object property disclosure behind an array placeholder: {disclosure}"
              )));
            }
            state.applied.push(digest.to_owned());
            output.push(self.decode_value(disclosure.claim_value(), candidates, state)?);
          }
          // Unmatched placeholders mark undisclosed elements; drop them.
        } else {
          output.push(Value::Object(self.decode_object(object, candidates, state, false)?));
        }
      } else if let Some(nested) = value.as_array() {
        output.push(Value::Array(self.decode_array(nested, candidates, state)?));
      } else {
        output.push(value.clone());
      }
    }
    Ok(output)
  }

  /// Recursively decodes a disclosed claim value, resolving the digests a
  /// recursive disclosure may carry.
  fn decode_value(
    &self,
    value: &Value,
    candidates: &BTreeMap<String, Disclosure>,
    state: &mut DecodeState,
  ) -> Result<Value> {
    match value {
      Value::Object(object) => Ok(Value::Object(self.decode_object(object, candidates, state, false)?)),
      Value::Array(array) => Ok(Value::Array(self.decode_array(array, candidates, state)?)),
      _ => Ok(value.clone()),
    }
  }
}

impl Default for SdObjectDecoder {
  fn default() -> Self {
    Self::new()
  }
}

fn contains_digests(object: &JsonObject) -> bool {
  object
    .iter()
    .any(|(key, value)| key == DIGESTS_KEY || value_contains_digests(value))
}

fn value_contains_digests(value: &Value) -> bool {
  match value {
    Value::Object(object) => contains_digests(object),
    Value::Array(array) => array.iter().any(|element| match element {
      Value::Object(object) => object.contains_key(ARRAY_DIGEST_KEY) || contains_digests(object),
      other => value_contains_digests(other),
    }),
    _ => false,
  }
}

#[cfg(test)]
mod test {
  use serde_json::json;
  use serde_json::Value;

  use super::SdObjectDecoder;
  use crate::DisclosableObject;
  use crate::Error;
  use crate::HashAlg;
  use crate::SdObjectEncoder;

  #[test]
  fn disclosed_claim_collides_with_plain_property() {
    let mut root = DisclosableObject::new();
    root.insert_selective("id", json!("did:value")).unwrap();
    let mut payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    payload
      .object
      .insert("id".to_owned(), Value::String("id-value".to_owned()));

    let disclosures = vec![payload.disclosures[0].as_str().to_owned()];
    let error = SdObjectDecoder::new().decode(&payload.object, &disclosures).unwrap_err();
    assert!(matches!(error, Error::DuplicateClaim(_)));
  }

  #[test]
  fn alg_claim_is_stripped() {
    let mut root = DisclosableObject::new();
    root.insert_plain("id", json!("did:value")).unwrap();
    root.insert_selective("email", json!("user@example.com")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    assert_eq!(payload.object.get("_sd_alg").unwrap(), "sha-256");

    let disclosures = vec![payload.disclosures[0].as_str().to_owned()];
    let (decoded, used) = SdObjectDecoder::new().decode(&payload.object, &disclosures).unwrap();
    assert!(decoded.get("_sd_alg").is_none());
    assert!(decoded.get("_sd").is_none());
    assert_eq!(used.len(), 1);
  }

  #[test]
  fn plain_object_passes_through() {
    let object = json!({"id": "did:value", "claim": [1, 2]});
    let (decoded, used) = SdObjectDecoder::new()
      .decode(object.as_object().unwrap(), &[])
      .unwrap();
    assert_eq!(Value::Object(decoded), object);
    assert!(used.is_empty());
  }

  #[test]
  fn digests_without_alg_claim_are_rejected() {
    let object = json!({"_sd": ["mcKLMnXQdCM0gJ5l4Hb6ignpVgCw4SfienkI8vFgpjE"]});
    let error = SdObjectDecoder::new().decode(object.as_object().unwrap(), &[]).unwrap_err();
    assert!(matches!(error, Error::MissingHashAlgorithm));

    // Placeholders deep inside arrays count as well.
    let object = json!({"claim": [{"...": "mcKLMnXQdCM0gJ5l4Hb6ignpVgCw4SfienkI8vFgpjE"}]});
    let error = SdObjectDecoder::new().decode(object.as_object().unwrap(), &[]).unwrap_err();
    assert!(matches!(error, Error::MissingHashAlgorithm));
  }

  #[test]
  fn unknown_alg_is_rejected() {
    let object = json!({
      "_sd_alg": "md5",
      "_sd": ["mcKLMnXQdCM0gJ5l4Hb6ignpVgCw4SfienkI8vFgpjE"]
    });
    let error = SdObjectDecoder::new().decode(object.as_object().unwrap(), &[]).unwrap_err();
    assert!(matches!(error, Error::UnsupportedHashAlgorithm(_)));
  }

  #[test]
  fn nested_alg_claim_is_rejected() {
    let object = json!({
      "_sd_alg": "sha-256",
      "claim": {"_sd_alg": "sha-256"}
    });
    let error = SdObjectDecoder::new().decode(object.as_object().unwrap(), &[]).unwrap_err();
    assert!(matches!(error, Error::DataTypeMismatch(_)));
  }

  #[test]
  fn duplicated_digest_is_rejected() {
    let mut root = DisclosableObject::new();
    root.insert_selective("id", json!("did:value")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    let digest = payload.object["_sd"].as_array().unwrap()[0].clone();

    let object = json!({"_sd": [digest.clone(), digest], "_sd_alg": "sha-256"});
    let disclosures = vec![payload.disclosures[0].as_str().to_owned()];
    let error = SdObjectDecoder::new()
      .decode(object.as_object().unwrap(), &disclosures)
      .unwrap_err();
    assert!(matches!(error, Error::DuplicateDigest(_)));
  }

  #[test]
  fn unmatched_candidates_are_rejected() {
    let mut root = DisclosableObject::new();
    root.insert_selective("id", json!("did:value")).unwrap();
    root.insert_selective("tst", json!("tst-value")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();

    // Only the digest of `id` survives in the claim set.
    let id_digest = payload.disclosures[0].digest(&HashAlg::Sha256);
    let object = json!({"_sd": [id_digest], "_sd_alg": "sha-256"});
    let disclosures: Vec<String> = payload
      .disclosures
      .iter()
      .map(|disclosure| disclosure.as_str().to_owned())
      .collect();
    let error = SdObjectDecoder::new()
      .decode(object.as_object().unwrap(), &disclosures)
      .unwrap_err();
    let Error::UnusedDisclosures(unused) = error else {
      panic!("expected unused disclosures");
    };
    assert_eq!(unused, vec![payload.disclosures[1].as_str().to_owned()]);
  }

  #[test]
  fn duplicated_candidates_are_rejected() {
    let mut root = DisclosableObject::new();
    root.insert_selective("id", json!("did:value")).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    let disclosure = payload.disclosures[0].as_str().to_owned();
    let error = SdObjectDecoder::new()
      .decode(&payload.object, &[disclosure.clone(), disclosure])
      .unwrap_err();
    assert!(matches!(error, Error::NonUniqueDisclosures(_)));
  }

  #[test]
  fn undisclosed_array_elements_are_removed() {
    let object = json!({
      "claim": ["plain", {"...": "mcKLMnXQdCM0gJ5l4Hb6ignpVgCw4SfienkI8vFgpjE"}],
      "_sd_alg": "sha-256"
    });
    let (decoded, used) = SdObjectDecoder::new().decode(object.as_object().unwrap(), &[]).unwrap();
    assert_eq!(decoded["claim"], json!(["plain"]));
    assert!(used.is_empty());
  }

  #[test]
  fn candidate_order_does_not_matter() {
    let mut root = DisclosableObject::new();
    root.insert_selective("a", json!(1)).unwrap();
    root.insert_selective("b", json!(2)).unwrap();
    root.insert_selective("c", json!(3)).unwrap();
    let payload = SdObjectEncoder::new(HashAlg::Sha256).encode(&root).unwrap();
    let mut disclosures: Vec<String> = payload
      .disclosures
      .iter()
      .map(|disclosure| disclosure.as_str().to_owned())
      .collect();

    let decoder = SdObjectDecoder::new();
    let (forward, _) = decoder.decode(&payload.object, &disclosures).unwrap();
    disclosures.reverse();
    let (reversed, _) = decoder.decode(&payload.object, &disclosures).unwrap();
    assert_eq!(Value::Object(forward), Value::Object(reversed));
  }
}
