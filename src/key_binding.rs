// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::Jwt;
use crate::Result;

/// Claims set for key binding JWT.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyBindingJwtClaims {
  pub iat: i64,
  pub aud: String,
  pub nonce: String,
  pub sd_hash: String,
  #[serde(flatten)]
  pub properties: JsonObject,
}

impl KeyBindingJwtClaims {
  pub const KB_JWT_HEADER_TYP: &'static str = "kb+jwt";

  /// Creates a new [`KeyBindingJwtClaims`] binding a presentation to the
  /// holder's key: `sd_hash` digests the serialized SD-JWT up to and
  /// including the `~` preceding the KB-JWT.
  pub fn new(
    hasher: &dyn Hasher,
    jwt: &str,
    disclosures: &[Disclosure],
    nonce: String,
    aud: String,
    iat: i64,
  ) -> Self {
    Self {
      iat,
      aud,
      nonce,
      sd_hash: presentation_hash(hasher, jwt, disclosures),
      properties: JsonObject::new(),
    }
  }
}

/// Digest of `<jwt>~<disclosure 1>~...~<disclosure n>~`, the part of a
/// presentation a key binding JWT commits to.
pub(crate) fn presentation_hash(hasher: &dyn Hasher, jwt: &str, disclosures: &[Disclosure]) -> String {
  let disclosures = disclosures.iter().map(ToString::to_string).join("~");
  let prefix = if disclosures.is_empty() {
    format!("{jwt}~")
  } else {
    format!("{jwt}~{disclosures}~")
  };
  hasher.encoded_digest(&prefix)
}

/// The holder key the issuer committed to in the `cnf` claim. The recreation
/// engine passes it through untouched; resolving and checking the key is the
/// signature layer's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequiredKeyBinding {
  /// A JSON Web Key.
  Jwk(JsonObject),
  /// A key identifier resolvable out of band.
  Kid(String),
}

/// A key binding JWT, proving the holder's possession of the key named by the
/// `cnf` claim of the SD-JWT it is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBindingJwt(Jwt<KeyBindingJwtClaims>);

impl KeyBindingJwt {
  pub fn header(&self) -> &JsonObject {
    &self.0.header
  }

  pub fn claims(&self) -> &KeyBindingJwtClaims {
    &self.0.claims
  }

  /// The compact serialization of this KB-JWT.
  pub fn as_str(&self) -> &str {
    self.0.as_str()
  }
}

impl Display for KeyBindingJwt {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.0.as_str())
  }
}

impl FromStr for KeyBindingJwt {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let jwt: Jwt<KeyBindingJwtClaims> = s.parse()?;
    let typ = jwt.header.get("typ").and_then(Value::as_str);
    if typ != Some(KeyBindingJwtClaims::KB_JWT_HEADER_TYP) {
      return Err(Error::DeserializationError(format!(
        "invalid KB-JWT: header `typ` must be `{}`",
        KeyBindingJwtClaims::KB_JWT_HEADER_TYP
      )));
    }
    Ok(Self(jwt))
  }
}
