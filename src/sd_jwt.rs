// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::ops::Deref;
use std::ops::DerefMut;
use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::key_binding::presentation_hash;
use crate::ClaimPath;
use crate::ClaimPathSegment;
use crate::Disclosure;
use crate::Error;
use crate::Hasher;
use crate::JsonObject;
use crate::Jwt;
use crate::KeyBindingJwt;
use crate::RequiredKeyBinding;
use crate::Result;
use crate::SdObjectDecoder;
use crate::ARRAY_DIGEST_KEY;
use crate::DIGESTS_KEY;

/// Header `typ` of an issued SD-JWT.
pub const HEADER_TYP: &str = "sd-jwt";

/// The claim set of an SD-JWT payload: the digest machinery claims plus the
/// remaining, plainly disclosed properties.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct SdJwtClaims {
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub _sd: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub _sd_alg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cnf: Option<RequiredKeyBinding>,
  #[serde(flatten)]
  pub(crate) properties: JsonObject,
}

impl Deref for SdJwtClaims {
  type Target = JsonObject;
  fn deref(&self) -> &Self::Target {
    &self.properties
  }
}

impl DerefMut for SdJwtClaims {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.properties
  }
}

/// Representation of an SD-JWT of the format
/// `<Issuer-signed JWT>~<Disclosure 1>~<Disclosure 2>~...~<Disclosure N>~<optional KB-JWT>`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SdJwt {
  /// The JWT part.
  jwt: Jwt<SdJwtClaims>,
  /// The disclosures part.
  disclosures: Vec<Disclosure>,
  /// The optional key binding JWT.
  key_binding_jwt: Option<KeyBindingJwt>,
}

impl SdJwt {
  /// Creates a new [`SdJwt`] from its components.
  pub fn new(jwt: Jwt<SdJwtClaims>, disclosures: Vec<Disclosure>, key_binding_jwt: Option<KeyBindingJwt>) -> Self {
    Self {
      jwt,
      disclosures,
      key_binding_jwt,
    }
  }

  pub fn jwt(&self) -> &Jwt<SdJwtClaims> {
    &self.jwt
  }

  pub fn header(&self) -> &JsonObject {
    &self.jwt.header
  }

  pub fn claims(&self) -> &SdJwtClaims {
    &self.jwt.claims
  }

  pub fn disclosures(&self) -> &[Disclosure] {
    &self.disclosures
  }

  pub fn required_key_bind(&self) -> Option<&RequiredKeyBinding> {
    self.claims().cnf.as_ref()
  }

  pub fn key_binding_jwt(&self) -> Option<&KeyBindingJwt> {
    self.key_binding_jwt.as_ref()
  }

  /// The digest a key binding JWT for the current presentation must carry in
  /// its `sd_hash` claim.
  pub fn sd_hash(&self, hasher: &dyn Hasher) -> String {
    presentation_hash(hasher, self.jwt.as_str(), &self.disclosures)
  }

  /// Serializes the components into the final SD-JWT.
  pub fn presentation(&self) -> String {
    let disclosures = self.disclosures.iter().map(ToString::to_string).join("~");
    let key_binding = self
      .key_binding_jwt
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_default();
    if disclosures.is_empty() {
      format!("{}~{}", self.jwt, key_binding)
    } else {
      format!("{}~{}~{}", self.jwt, disclosures, key_binding)
    }
  }

  /// Parses an SD-JWT into its components as [`SdJwt`].
  ///
  /// ## Error
  /// Returns a [`Error::DeserializationError`] if the input carries no `~`
  /// separator or its first segment is not a JWT, and a
  /// [`Error::MalformedDisclosure`] for any undecodable disclosure segment. A
  /// last segment that is not empty must be a valid KB-JWT.
  pub fn parse(sd_jwt: &str) -> Result<Self> {
    let segments: Vec<&str> = sd_jwt.split('~').collect();
    if segments.len() < 2 {
      return Err(Error::DeserializationError(
        "SD-JWT format is invalid, no `~` separator".to_string(),
      ));
    }

    let jwt = segments[0].parse()?;

    let disclosures = segments[1..segments.len() - 1]
      .iter()
      .map(|segment| Disclosure::parse(segment))
      .try_collect()?;

    let key_binding_jwt = segments
      .last()
      .filter(|segment| !segment.is_empty())
      .map(|segment| segment.parse())
      .transpose()?;

    Ok(Self {
      jwt,
      disclosures,
      key_binding_jwt,
    })
  }

  /// Prepares this [`SdJwt`] for presentation to a verifier, returning an
  /// [`SdJwtPresentationBuilder`] on which claims can be concealed and a
  /// KB-JWT attached.
  ///
  /// ## Error
  /// [`Error::InvalidHasher`] if `hasher`'s algorithm doesn't match the one
  /// named by the `_sd_alg` claim.
  pub fn into_presentation(self, hasher: &dyn Hasher) -> Result<SdJwtPresentationBuilder> {
    SdJwtPresentationBuilder::new(self, hasher)
  }

  /// Returns the JSON object obtained by replacing all digests with their
  /// corresponding disclosed claims.
  pub fn into_disclosed_object(self) -> Result<JsonObject> {
    let object = serde_json::to_value(self.claims())
      .map_err(|e| Error::DeserializationError(format!("invalid SD-JWT claims: {e}")))?;
    let Value::Object(object) = object else {
      unreachable!();
    };
    let disclosures: Vec<String> = self
      .disclosures
      .iter()
      .map(|disclosure| disclosure.as_str().to_owned())
      .collect();
    SdObjectDecoder::new()
      .decode(&object, &disclosures)
      .map(|(object, _)| object)
  }
}

impl Display for SdJwt {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.presentation())
  }
}

impl FromStr for SdJwt {
  type Err = Error;
  fn from_str(s: &str) -> Result<Self> {
    Self::parse(s)
  }
}

/// Holder-side selection of the claims a presentation reveals: conceals claims
/// by withholding their disclosures, then attaches an optional KB-JWT.
#[derive(Debug, Clone)]
pub struct SdJwtPresentationBuilder {
  sd_jwt: SdJwt,
  /// Digest → disclosure for everything still being revealed.
  disclosures: IndexMap<String, Disclosure>,
  removed_disclosures: Vec<Disclosure>,
  /// The claim set with its `_sd` array re-attached, for path navigation.
  object: Value,
}

impl SdJwtPresentationBuilder {
  pub fn new(mut sd_jwt: SdJwt, hasher: &dyn Hasher) -> Result<Self> {
    match sd_jwt.claims()._sd_alg.as_deref() {
      Some(required) if required != hasher.alg_name() => {
        return Err(Error::InvalidHasher(format!(
          "hasher \"{}\" was provided, but \"{required}\" is required",
          hasher.alg_name()
        )));
      }
      None if !sd_jwt.disclosures.is_empty() => return Err(Error::MissingHashAlgorithm),
      _ => {}
    }

    let disclosures = std::mem::take(&mut sd_jwt.disclosures)
      .into_iter()
      .map(|disclosure| (disclosure.digest(hasher), disclosure))
      .collect();
    let object = {
      let sd = std::mem::take(&mut sd_jwt.jwt.claims._sd)
        .into_iter()
        .map(Value::String)
        .collect();
      let mut object = Value::Object(std::mem::take(&mut sd_jwt.jwt.claims.properties));
      object
        .as_object_mut()
        .unwrap()
        .insert(DIGESTS_KEY.to_string(), Value::Array(sd));
      object
    };
    Ok(Self {
      sd_jwt,
      disclosures,
      removed_disclosures: vec![],
      object,
    })
  }

  /// Conceals the claim at `path`, e.g. `/address/street_address` or
  /// `/nationalities/0`, by withholding its disclosure.
  ///
  /// ## Notes
  /// - Concealing a claim also withholds the disclosures of all concealable
  ///   sub-claims nested below it.
  ///
  /// ## Error
  /// [`Error::InvalidPath`] if the element at `path` doesn't exist or is not
  /// concealable.
  pub fn conceal(mut self, path: &str) -> Result<Self> {
    let path: ClaimPath = path.parse()?;
    let digests: Vec<String> = digests_to_conceal(&self.object, path.segments(), &self.disclosures)?
      .into_iter()
      .map(ToOwned::to_owned)
      .collect();

    for digest in digests {
      if let Some(disclosure) = self.disclosures.shift_remove(&digest) {
        self.removed_disclosures.push(disclosure);
      }
    }
    Ok(self)
  }

  /// Adds a [`KeyBindingJwt`] to this presentation.
  pub fn attach_key_binding_jwt(mut self, kb_jwt: KeyBindingJwt) -> Self {
    self.sd_jwt.key_binding_jwt = Some(kb_jwt);
    self
  }

  /// Returns the resulting [`SdJwt`] together with all withheld disclosures.
  ///
  /// ## Error
  /// [`Error::MissingKeyBindingJwt`] if the SD-JWT requires key binding but no
  /// KB-JWT was attached.
  pub fn finish(self) -> Result<(SdJwt, Vec<Disclosure>)> {
    if self.sd_jwt.required_key_bind().is_some() && self.sd_jwt.key_binding_jwt.is_none() {
      return Err(Error::MissingKeyBindingJwt);
    }

    // Put everything back in its place.
    let SdJwtPresentationBuilder {
      mut sd_jwt,
      disclosures,
      removed_disclosures,
      object,
    } = self;
    sd_jwt.disclosures = disclosures.into_values().collect();

    let Value::Object(mut object) = object else {
      unreachable!();
    };
    let Value::Array(sd) = object.remove(DIGESTS_KEY).unwrap_or(Value::Array(vec![])) else {
      unreachable!();
    };
    sd_jwt.jwt.claims._sd = sd
      .into_iter()
      .map(|value| {
        if let Value::String(digest) = value {
          digest
        } else {
          unreachable!()
        }
      })
      .collect();
    sd_jwt.jwt.claims.properties = object;

    Ok((sd_jwt, removed_disclosures))
  }
}

/// Resolves `segments` against `object` and returns the digests whose
/// disclosures must be withheld to conceal the addressed claim: the claim's
/// own digest plus those of every concealable descendant.
fn digests_to_conceal<'a>(
  object: &'a Value,
  segments: &[ClaimPathSegment],
  disclosures: &'a IndexMap<String, Disclosure>,
) -> Result<Vec<&'a str>> {
  let Some((segment, rest)) = segments.split_first() else {
    return Err(Error::InvalidPath("empty path".to_owned()));
  };
  let not_concealable =
    || Error::InvalidPath(format!("element {segment} doesn't exist or is not concealable"));

  match object {
    Value::Object(map) => {
      let key = segment.to_string();
      if rest.is_empty() {
        // `map` is the parent of the claim being concealed.
        let digest = find_digest_for(map, &key, disclosures).ok_or_else(not_concealable)?;
        let disclosure = disclosures.get(digest).unwrap();
        let mut digests = nested_digests(disclosure.claim_value(), disclosures);
        digests.push(digest);
        Ok(digests)
      } else {
        // Descend, following disclosures of already-concealable claims.
        let next = map
          .get(&key)
          .or_else(|| {
            find_digest_for(map, &key, disclosures)
              .and_then(|digest| disclosures.get(digest))
              .map(Disclosure::claim_value)
          })
          .ok_or_else(not_concealable)?;
        digests_to_conceal(next, rest, disclosures)
      }
    }
    Value::Array(values) => {
      let ClaimPathSegment::Index(index) = segment else {
        return Err(Error::InvalidPath(format!("{segment} is not an array index")));
      };
      let element = values.get(*index).ok_or_else(not_concealable)?;
      if rest.is_empty() {
        let digest = element
          .as_object()
          .and_then(|entry| placeholder_digest(entry, disclosures))
          .ok_or_else(not_concealable)?;
        let disclosure = disclosures.get(digest).unwrap();
        let mut digests = nested_digests(disclosure.claim_value(), disclosures);
        digests.push(digest);
        Ok(digests)
      } else {
        digests_to_conceal(element, rest, disclosures)
      }
    }
    _ => Err(Error::InvalidPath(format!("{segment} cannot be traversed"))),
  }
}

/// Searches the `_sd` array of `object` for the digest disclosing the property
/// `key`.
fn find_digest_for<'a>(
  object: &'a JsonObject,
  key: &str,
  disclosures: &IndexMap<String, Disclosure>,
) -> Option<&'a str> {
  object
    .get(DIGESTS_KEY)?
    .as_array()?
    .iter()
    .filter_map(Value::as_str)
    .find(|digest| {
      disclosures
        .get(*digest)
        .and_then(Disclosure::claim_name)
        .is_some_and(|name| name == key)
    })
}

/// The digest of a `{"...": <digest>}` array entry, if `entry` is one and its
/// disclosure is still being revealed.
fn placeholder_digest<'a>(entry: &'a JsonObject, disclosures: &IndexMap<String, Disclosure>) -> Option<&'a str> {
  entry
    .get(ARRAY_DIGEST_KEY)
    .and_then(Value::as_str)
    .filter(|_| entry.len() == 1)
    .filter(|digest| disclosures.contains_key(*digest))
}

/// All digests below `value` whose disclosures are still being revealed.
fn nested_digests<'a>(value: &'a Value, disclosures: &'a IndexMap<String, Disclosure>) -> Vec<&'a str> {
  let mut digests = Vec::new();
  collect_nested_digests(value, disclosures, &mut digests);
  digests
}

fn collect_nested_digests<'a>(
  value: &'a Value,
  disclosures: &'a IndexMap<String, Disclosure>,
  out: &mut Vec<&'a str>,
) {
  match value {
    Value::Object(object) => {
      if let Some(sd) = object.get(DIGESTS_KEY).and_then(Value::as_array) {
        out.extend(
          sd.iter()
            .filter_map(Value::as_str)
            .filter(|digest| disclosures.contains_key(*digest)),
        );
        // The disclosures behind those digests may nest further.
        for digest in sd.iter().filter_map(Value::as_str) {
          if let Some(disclosure) = disclosures.get(digest) {
            collect_nested_digests(disclosure.claim_value(), disclosures, out);
          }
        }
      }
      for nested in object.values() {
        collect_nested_digests(nested, disclosures, out);
      }
    }
    Value::Array(values) => {
      for element in values {
        if let Some(digest) = element.get(ARRAY_DIGEST_KEY).and_then(Value::as_str) {
          if disclosures.contains_key(digest) {
            out.push(digest);
            if let Some(disclosure) = disclosures.get(digest) {
              collect_nested_digests(disclosure.claim_value(), disclosures, out);
            }
          }
        } else {
          collect_nested_digests(element, disclosures, out);
        }
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod test {
  use crate::SdJwt;

  const SD_JWT: &str = "eyJhbGciOiAiRVMyNTYiLCAidHlwIjogImV4YW1wbGUrc2Qtand0In0.eyJfc2QiOiBbIkM5aW5wNllvUmFFWFI0Mjd6WUpQN1FyazFXSF84YmR3T0FfWVVyVW5HUVUiLCAiS3VldDF5QWEwSElRdlluT1ZkNTloY1ZpTzlVZzZKMmtTZnFZUkJlb3d2RSIsICJNTWxkT0ZGekIyZDB1bWxtcFRJYUdlcmhXZFVfUHBZZkx2S2hoX2ZfOWFZIiwgIlg2WkFZT0lJMnZQTjQwVjd4RXhad1Z3ejd5Um1MTmNWd3Q1REw4Ukx2NGciLCAiWTM0em1JbzBRTExPdGRNcFhHd2pCZ0x2cjE3eUVoaFlUMEZHb2ZSLWFJRSIsICJmeUdwMFdUd3dQdjJKRFFsbjFsU2lhZW9iWnNNV0ExMGJRNTk4OS05RFRzIiwgIm9tbUZBaWNWVDhMR0hDQjB1eXd4N2ZZdW8zTUhZS08xNWN6LVJaRVlNNVEiLCAiczBCS1lzTFd4UVFlVTh0VmxsdE03TUtzSVJUckVJYTFQa0ptcXhCQmY1VSJdLCAiaXNzIjogImh0dHBzOi8vaXNzdWVyLmV4YW1wbGUuY29tIiwgImlhdCI6IDE2ODMwMDAwMDAsICJleHAiOiAxODgzMDAwMDAwLCAiYWRkcmVzcyI6IHsiX3NkIjogWyI2YVVoelloWjdTSjFrVm1hZ1FBTzN1MkVUTjJDQzFhSGhlWnBLbmFGMF9FIiwgIkF6TGxGb2JrSjJ4aWF1cFJFUHlvSnotOS1OU2xkQjZDZ2pyN2ZVeW9IemciLCAiUHp6Y1Z1MHFiTXVCR1NqdWxmZXd6a2VzRDl6dXRPRXhuNUVXTndrclEtayIsICJiMkRrdzBqY0lGOXJHZzhfUEY4WmN2bmNXN3p3Wmo1cnlCV3ZYZnJwemVrIiwgImNQWUpISVo4VnUtZjlDQ3lWdWIyVWZnRWs4anZ2WGV6d0sxcF9KbmVlWFEiLCAiZ2xUM2hyU1U3ZlNXZ3dGNVVEWm1Xd0JUdzMyZ25VbGRJaGk4aEdWQ2FWNCIsICJydkpkNmlxNlQ1ZWptc0JNb0d3dU5YaDlxQUFGQVRBY2k0MG9pZEVlVnNBIiwgInVOSG9XWWhYc1poVkpDTkUyRHF5LXpxdDd0NjlnSkt5NVFhRnY3R3JNWDQiXX0sICJfc2RfYWxnIjogInNoYS0yNTYifQ.gR6rSL7urX79CNEvTQnP1MH5xthG11ucIV44SqKFZ4Pvlu_u16RfvXQd4k4CAIBZNKn2aTI18TfvFwV97gJFoA~WyJHMDJOU3JRZmpGWFE3SW8wOXN5YWpBIiwgInJlZ2lvbiIsICJcdTZlMmZcdTUzM2EiXQ~WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ~";

  #[test]
  fn parse() {
    let sd_jwt = SdJwt::parse(SD_JWT).unwrap();
    assert_eq!(sd_jwt.disclosures().len(), 2);
    assert!(sd_jwt.key_binding_jwt().is_none());
    assert_eq!(sd_jwt.claims()._sd.len(), 8);
    assert_eq!(sd_jwt.claims()._sd_alg.as_deref(), Some("sha-256"));
  }

  #[test]
  fn round_trip_ser_des() {
    let sd_jwt = SdJwt::parse(SD_JWT).unwrap();
    assert_eq!(&sd_jwt.to_string(), SD_JWT);
  }

  #[test]
  fn rejects_input_without_separator() {
    let jwt_only = SD_JWT.split('~').next().unwrap();
    assert!(SdJwt::parse(jwt_only).is_err());
  }

  #[test]
  fn rejects_empty_disclosure_segment() {
    let with_empty_segment = SD_JWT.replace("~WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgImNvdW50cnkiLCAiSlAiXQ~", "~~");
    assert!(SdJwt::parse(&with_empty_segment).is_err());
  }

  #[test]
  fn trailing_jws_is_a_key_binding_jwt() {
    let claims = serde_json::json!({
      "iat": 1683000000,
      "aud": "https://verifier.example.com",
      "nonce": "nonce-123",
      "sd_hash": "digest"
    });
    let kb_jwt = format!(
      "{}.{}.sig",
      multibase::Base::Base64Url.encode(serde_json::json!({"typ": "kb+jwt", "alg": "ES256"}).to_string()),
      multibase::Base::Base64Url.encode(claims.to_string()),
    );
    let presentation = format!("{SD_JWT}{kb_jwt}");
    let sd_jwt = SdJwt::parse(&presentation).unwrap();
    assert!(sd_jwt.key_binding_jwt().is_some());
    assert_eq!(sd_jwt.presentation(), presentation);
  }
}
