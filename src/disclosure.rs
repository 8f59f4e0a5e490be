// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

use serde_json::Value;

use crate::Error;
use crate::Hasher;
use crate::Result;

pub(crate) const DIGESTS_KEY: &str = "_sd";
pub(crate) const SD_ALG: &str = "_sd_alg";
pub(crate) const ARRAY_DIGEST_KEY: &str = "...";

/// A disclosable value in its salted, base64url-encoded form.
/// Both object properties and array elements disclosures are supported.
///
/// See: https://www.ietf.org/archive/id/draft-ietf-oauth-selective-disclosure-jwt-07.html#name-disclosures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
  salt: String,
  /// The claim name, `None` for array elements.
  claim_name: Option<String>,
  claim_value: Value,
  /// The exact base64url text this disclosure was built or parsed from.
  /// Digests are computed over this form, so foreign encodings (which may
  /// serialize the same array with different whitespace) keep their digest.
  unparsed: String,
}

impl Disclosure {
  /// Builds the disclosure of the object property `name`.
  ///
  /// ## Error
  /// [`Error::ReservedName`] if `name` is reserved or `value` contains an
  /// `_sd` key at any depth; [`Error::DataTypeMismatch`] if `value` is `null`.
  pub fn for_property(salt: String, name: &str, value: Value) -> Result<Self> {
    check_claim_name(name)?;
    check_claim_value(name, &value)?;
    Ok(Self::hoisted(salt, Some(name.to_owned()), value))
  }

  /// Builds the disclosure of a single array element.
  ///
  /// The same `null` and `_sd` prohibitions as [`Disclosure::for_property`]
  /// apply to `value`.
  pub fn for_array_element(salt: String, value: Value) -> Result<Self> {
    check_claim_value("array element", &value)?;
    Ok(Self::hoisted(salt, None, value))
  }

  /// Builds a disclosure without inspecting `value`. The encoder uses this for
  /// hoisted containers, whose values legitimately carry nested `_sd` arrays.
  pub(crate) fn hoisted(salt: String, claim_name: Option<String>, claim_value: Value) -> Self {
    let mut parts: Vec<Value> = Vec::with_capacity(3);
    parts.push(Value::String(salt.clone()));
    if let Some(name) = claim_name.as_deref() {
      parts.push(Value::String(name.to_owned()));
    }
    parts.push(claim_value.clone());
    // Compact serialization, no whitespace: the encoded form must be byte-stable.
    let json = Value::Array(parts).to_string();
    let unparsed = multibase::Base::Base64Url.encode(json);
    Self {
      salt,
      claim_name,
      claim_value,
      unparsed,
    }
  }

  /// Parses a base64url-encoded disclosure into a [`Disclosure`], retaining
  /// the input text for digest computation.
  ///
  /// ## Error
  /// Returns an [`Error::MalformedDisclosure`] if input is not a valid disclosure.
  pub fn parse(disclosure: &str) -> Result<Self> {
    let decoded: Vec<Value> = multibase::Base::Base64Url
      .decode(disclosure)
      .map_err(|_| malformed(disclosure, "not base64url-encoded"))
      .and_then(|bytes| {
        serde_json::from_slice(&bytes).map_err(|_| malformed(disclosure, "content is not a JSON array"))
      })?;

    let (salt, claim_name, claim_value) = match decoded.as_slice() {
      [salt, value] => (salt, None, value),
      [salt, name, value] => {
        let name = name
          .as_str()
          .ok_or_else(|| malformed(disclosure, "claim name is not a string"))?;
        if name == DIGESTS_KEY || name == SD_ALG {
          return Err(malformed(disclosure, "claim name is reserved"));
        }
        (salt, Some(name.to_owned()), value)
      }
      elements => {
        return Err(malformed(
          disclosure,
          &format!("array has an invalid length of {}", elements.len()),
        ))
      }
    };

    let salt = salt
      .as_str()
      .ok_or_else(|| malformed(disclosure, "salt is not a string"))?
      .to_owned();
    if claim_value.is_null() {
      return Err(malformed(disclosure, "value is null"));
    }

    Ok(Self {
      salt,
      claim_name,
      claim_value: claim_value.clone(),
      unparsed: disclosure.to_owned(),
    })
  }

  /// The base64url text of this disclosure.
  pub fn as_str(&self) -> &str {
    &self.unparsed
  }

  pub fn salt(&self) -> &str {
    &self.salt
  }

  /// The claim name, `None` for array element disclosures.
  pub fn claim_name(&self) -> Option<&str> {
    self.claim_name.as_deref()
  }

  pub fn claim_value(&self) -> &Value {
    &self.claim_value
  }

  /// Returns the base64url-encoded digest of this disclosure under `hasher`.
  pub fn digest(&self, hasher: &dyn Hasher) -> String {
    hasher.encoded_digest(&self.unparsed)
  }
}

impl Display for Disclosure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.unparsed)
  }
}

fn malformed(disclosure: &str, reason: &str) -> Error {
  Error::MalformedDisclosure(format!("{reason}: {disclosure}"))
}

pub(crate) fn check_claim_name(name: &str) -> Result<()> {
  if name == DIGESTS_KEY || name == SD_ALG {
    Err(Error::ReservedName(name.to_owned()))
  } else {
    Ok(())
  }
}

fn check_claim_value(name: &str, value: &Value) -> Result<()> {
  if value.is_null() {
    return Err(Error::DataTypeMismatch(format!(
      "claim {name} is null and cannot be disclosed"
    )));
  }
  ensure_no_digest_keys(value)
}

/// Rejects values carrying an `_sd` key at any depth; such keys would be
/// indistinguishable from digest arrays after recreation.
fn ensure_no_digest_keys(value: &Value) -> Result<()> {
  match value {
    Value::Object(object) => {
      for (key, value) in object {
        if key == DIGESTS_KEY {
          return Err(Error::ReservedName(key.to_owned()));
        }
        ensure_no_digest_keys(value)?;
      }
      Ok(())
    }
    Value::Array(values) => values.iter().try_for_each(ensure_no_digest_keys),
    _ => Ok(()),
  }
}
