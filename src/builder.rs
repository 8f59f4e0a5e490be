// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context as _;
use serde::Serialize;
use serde_json::Value;

use crate::ClaimPath;
use crate::ClaimPathSegment;
use crate::DefaultSaltProvider;
use crate::DisclosableArray;
use crate::DisclosableObject;
use crate::DisclosableValue;
use crate::EncodedPayload;
use crate::Error;
use crate::HashAlg;
use crate::Hasher;
use crate::JsonObject;
use crate::Jwt;
use crate::JwsSigner;
use crate::RequiredKeyBinding;
use crate::Result;
use crate::SaltProvider;
use crate::SdJwt;
use crate::SdJwtClaims;
use crate::SdObjectEncoder;
use crate::HEADER_TYP;

/// Builder structure to create an issuable SD-JWT: marks claims of a JSON
/// object as concealable by path, then compiles and signs the result.
#[derive(Debug)]
pub struct SdJwtBuilder<H = HashAlg, S = DefaultSaltProvider> {
  object: Value,
  concealable: Vec<ClaimPath>,
  decoy_floors: Vec<(ClaimPath, usize)>,
  encoder: SdObjectEncoder<H, S>,
  key_bind: Option<RequiredKeyBinding>,
}

impl SdJwtBuilder {
  /// Creates a new [`SdJwtBuilder`] with the `sha-256` hash function.
  ///
  /// ## Error
  /// Returns [`Error::DataTypeMismatch`] if `object` is not a JSON object.
  pub fn new<T: Serialize>(object: T) -> Result<Self> {
    Self::with_encoder(object, SdObjectEncoder::new(HashAlg::Sha256))
  }
}

impl<H: Hasher, S: SaltProvider> SdJwtBuilder<H, S> {
  /// Creates a new [`SdJwtBuilder`] compiling with `encoder`.
  pub fn with_encoder<T: Serialize>(object: T, encoder: SdObjectEncoder<H, S>) -> Result<Self> {
    let object = serde_json::to_value(object).map_err(|e| Error::DeserializationError(e.to_string()))?;
    if !object.is_object() {
      return Err(Error::DataTypeMismatch("expected object".to_owned()));
    }
    Ok(Self {
      object,
      concealable: Vec::new(),
      decoy_floors: Vec::new(),
      encoder,
      key_bind: None,
    })
  }

  /// Marks the claim at `path` as selectively disclosable.
  ///
  /// ## Notes
  /// - `path` is `/`-separated, with array elements addressed by index or `*`
  ///   for all of them.
  ///
  /// ## Example
  ///  ```rust
  ///  use sd_jwt_core::SdJwtBuilder;
  ///  use serde_json::json;
  ///
  ///  let obj = json!({
  ///   "id": "did:value",
  ///   "claim1": {
  ///      "abc": true
  ///   },
  ///   "claim2": ["val_1", "val_2"]
  /// });
  /// let builder = SdJwtBuilder::new(obj)
  ///   .unwrap()
  ///   .make_concealable("/id").unwrap() // conceals "id": "did:value"
  ///   .make_concealable("/claim1/abc").unwrap() // "abc": true
  ///   .make_concealable("/claim2/0").unwrap(); // conceals "val_1"
  /// ```
  ///
  /// ## Error
  /// [`Error::InvalidPath`] if the claim at `path` doesn't exist.
  pub fn make_concealable(mut self, path: &str) -> Result<Self> {
    let path: ClaimPath = path.parse()?;
    ensure_exists(&self.object, &path)?;
    self.concealable.push(path);
    Ok(self)
  }

  /// Adds `number_of_decoys` decoy digests to the container at `path`.
  ///
  /// Use `path` = "" to add decoys to the top level.
  pub fn add_decoys(mut self, path: &str, number_of_decoys: usize) -> Result<Self> {
    let path = if path.is_empty() || path == "/" {
      ClaimPath::default()
    } else {
      let path: ClaimPath = path.parse()?;
      let targets = ensure_exists(&self.object, &path)?;
      if targets.iter().any(|value| !value.is_object() && !value.is_array()) {
        return Err(Error::InvalidPath(format!("{path} is neither an object nor an array")));
      }
      path
    };
    self.decoy_floors.push((path, number_of_decoys));
    Ok(self)
  }

  /// Require a proof of possession of a given key from the holder.
  ///
  /// This operation adds a JWT confirmation (`cnf`) claim as specified in
  /// [RFC7800](https://www.rfc-editor.org/rfc/rfc7800.html#section-3).
  pub fn require_key_binding(mut self, key_bind: RequiredKeyBinding) -> Self {
    self.key_bind = Some(key_bind);
    self
  }

  /// Compiles the claim set, signs it through `signer` and returns the
  /// issued SD-JWT.
  pub async fn finish<J>(self, signer: &J, alg: &str) -> Result<SdJwt>
  where
    J: JwsSigner,
  {
    let SdJwtBuilder {
      object,
      concealable,
      decoy_floors,
      encoder,
      key_bind,
    } = self;
    let Value::Object(object) = object else {
      unreachable!();
    };
    let tree = to_disclosable_object(object, &mut ClaimPath::default(), &concealable, &decoy_floors)?;
    let EncodedPayload {
      mut object,
      disclosures,
    } = encoder.encode(&tree)?;

    // Add key binding requirement as `cnf`.
    if let Some(key_bind) = key_bind {
      let key_bind = serde_json::to_value(key_bind).map_err(|e| Error::DeserializationError(e.to_string()))?;
      object.insert("cnf".to_string(), key_bind);
    }

    let Value::Object(header) = serde_json::json!({
      "typ": HEADER_TYP,
      "alg": alg,
    }) else {
      unreachable!();
    };

    let jws = signer
      .sign(&header, &object)
      .await
      .map_err(|e| anyhow::anyhow!("jws failed: {e}"))
      .and_then(|jws_bytes| String::from_utf8(jws_bytes).context("invalid JWS"))
      .map_err(|e| Error::JwsSignerFailure(e.to_string()))?;
    let jwt: Jwt<SdJwtClaims> = jws.parse()?;

    Ok(SdJwt::new(jwt, disclosures, None))
  }
}

/// Resolves `path` against `object`, erroring if it addresses nothing.
/// Several nodes are returned when the path crosses an all-elements marker.
fn ensure_exists<'a>(object: &'a Value, path: &ClaimPath) -> Result<Vec<&'a Value>> {
  let missing = || Error::InvalidPath(format!("{path} does not exist"));
  let mut current: Vec<&Value> = vec![object];
  for segment in path.segments() {
    let mut next: Vec<&Value> = Vec::new();
    for value in current {
      match (value, segment) {
        (Value::Object(map), segment) => {
          next.push(map.get(&segment.to_string()).ok_or_else(missing)?);
        }
        (Value::Array(values), ClaimPathSegment::Index(index)) => {
          next.push(values.get(*index).ok_or_else(missing)?);
        }
        (Value::Array(values), ClaimPathSegment::AllElements) => {
          if values.is_empty() {
            return Err(missing());
          }
          next.extend(values.iter());
        }
        _ => return Err(Error::InvalidPath(format!("{path} cannot be traversed"))),
      }
    }
    current = next;
  }
  Ok(current)
}

fn to_disclosable_object(
  map: JsonObject,
  path: &mut ClaimPath,
  concealable: &[ClaimPath],
  decoy_floors: &[(ClaimPath, usize)],
) -> Result<DisclosableObject> {
  let mut object = DisclosableObject::new();
  let mut hoisted = 0usize;
  for (name, value) in map {
    path.push(ClaimPathSegment::Key(name.clone()));
    let payload = to_disclosable_value(value, path, concealable, decoy_floors);
    let marked = concealable.iter().any(|mark| mark.matches(path));
    path.pop();
    if marked {
      hoisted += 1;
      object.insert_selective(name, payload?)?;
    } else {
      object.insert_plain(name, payload?)?;
    }
  }
  if let Some(decoys) = floor_for(decoy_floors, path) {
    object = object.with_min_digests(hoisted + decoys);
  }
  Ok(object)
}

fn to_disclosable_array(
  values: Vec<Value>,
  path: &mut ClaimPath,
  concealable: &[ClaimPath],
  decoy_floors: &[(ClaimPath, usize)],
) -> Result<DisclosableArray> {
  let mut array = DisclosableArray::new();
  let mut hoisted = 0usize;
  for (index, value) in values.into_iter().enumerate() {
    path.push(ClaimPathSegment::Index(index));
    let payload = to_disclosable_value(value, path, concealable, decoy_floors);
    let marked = concealable.iter().any(|mark| mark.matches(path));
    path.pop();
    if marked {
      hoisted += 1;
      array.push_selective(payload?);
    } else {
      array.push_plain(payload?);
    }
  }
  if let Some(decoys) = floor_for(decoy_floors, path) {
    array = array.with_min_digests(hoisted + decoys);
  }
  Ok(array)
}

fn to_disclosable_value(
  value: Value,
  path: &mut ClaimPath,
  concealable: &[ClaimPath],
  decoy_floors: &[(ClaimPath, usize)],
) -> Result<DisclosableValue> {
  match value {
    Value::Object(map) => Ok(DisclosableValue::Object(to_disclosable_object(
      map,
      path,
      concealable,
      decoy_floors,
    )?)),
    Value::Array(values) => Ok(DisclosableValue::Array(to_disclosable_array(
      values,
      path,
      concealable,
      decoy_floors,
    )?)),
    value => Ok(DisclosableValue::Leaf(value)),
  }
}

fn floor_for(decoy_floors: &[(ClaimPath, usize)], path: &ClaimPath) -> Option<usize> {
  let mut requested: Option<usize> = None;
  for (floor_path, decoys) in decoy_floors {
    if floor_path.matches(path) {
      requested = Some(requested.unwrap_or(0) + decoys);
    }
  }
  requested
}
