// Copyright 2020-2024 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;

use crate::Error;
use crate::Result;

/// One step from a node of a claim set to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimPathSegment {
  /// An object property name.
  Key(String),
  /// A concrete array index.
  Index(usize),
  /// Every element of an array.
  AllElements,
}

impl ClaimPathSegment {
  fn matches(&self, other: &ClaimPathSegment) -> bool {
    use ClaimPathSegment::*;
    match (self, other) {
      (AllElements, Index(_)) | (Index(_), AllElements) | (AllElements, AllElements) => true,
      // A numeric object key and an index are written identically in paths.
      (Key(key), Index(index)) | (Index(index), Key(key)) => key == &index.to_string(),
      _ => self == other,
    }
  }
}

impl Display for ClaimPathSegment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ClaimPathSegment::Key(key) => f.write_str(key),
      ClaimPathSegment::Index(index) => write!(f, "{index}"),
      ClaimPathSegment::AllElements => f.write_str("*"),
    }
  }
}

/// The path of a claim inside a claim set, from the root object down.
///
/// The textual form is `/`-separated, e.g. `/address/street_address` or
/// `/nationalities/0`; `*` addresses all elements of an array. Property names
/// containing `/` cannot be expressed textually; build such paths from
/// segments instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClaimPath(Vec<ClaimPathSegment>);

impl ClaimPath {
  pub fn from_segments(segments: Vec<ClaimPathSegment>) -> Self {
    Self(segments)
  }

  pub fn segments(&self) -> &[ClaimPathSegment] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether this path addresses the same node as `other`, with `*` matching
  /// any concrete index.
  pub fn matches(&self, other: &ClaimPath) -> bool {
    self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.matches(b))
  }

  pub(crate) fn push(&mut self, segment: ClaimPathSegment) {
    self.0.push(segment);
  }

  pub(crate) fn pop(&mut self) {
    self.0.pop();
  }
}

impl FromStr for ClaimPath {
  type Err = Error;

  fn from_str(path: &str) -> Result<Self> {
    if path.is_empty() || path == "/" {
      return Err(Error::InvalidPath("empty path".to_owned()));
    }
    let segments = path
      .trim_start_matches('/')
      .split('/')
      .map(|segment| {
        if segment.is_empty() {
          Err(Error::InvalidPath(format!("empty segment in {path}")))
        } else if segment == "*" {
          Ok(ClaimPathSegment::AllElements)
        } else if let Ok(index) = segment.parse::<usize>() {
          Ok(ClaimPathSegment::Index(index))
        } else {
          Ok(ClaimPathSegment::Key(segment.to_owned()))
        }
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(Self(segments))
  }
}

impl Display for ClaimPath {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for segment in &self.0 {
      write!(f, "/{segment}")?;
    }
    Ok(())
  }
}

/// Whether an element appears verbatim in the signed claim set or is hoisted
/// behind a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disclosable<T> {
  /// The element always appears in the signed claim set. A plain container may
  /// still hold selectively disclosable children.
  Plain(T),
  /// The element is hoisted into a single disclosure and replaced by its
  /// digest. For containers this nests: inner rules are applied to the hoisted
  /// value itself.
  Selective(T),
}

impl<T> Disclosable<T> {
  pub fn is_selective(&self) -> bool {
    matches!(self, Disclosable::Selective(_))
  }

  pub fn inner(&self) -> &T {
    match self {
      Disclosable::Plain(value) | Disclosable::Selective(value) => value,
    }
  }

  pub fn into_inner(self) -> T {
    match self {
      Disclosable::Plain(value) | Disclosable::Selective(value) => value,
    }
  }

  /// Wraps `value` in the same variant as `self`.
  pub(crate) fn rewrap<U>(&self, value: U) -> Disclosable<U> {
    match self {
      Disclosable::Plain(_) => Disclosable::Plain(value),
      Disclosable::Selective(_) => Disclosable::Selective(value),
    }
  }
}

/// The payload of a [`Disclosable`] element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisclosableValue {
  /// A leaf claim value, disclosed (or hoisted) as-is.
  Leaf(Value),
  Object(DisclosableObject),
  Array(DisclosableArray),
}

impl From<Value> for DisclosableValue {
  fn from(value: Value) -> Self {
    DisclosableValue::Leaf(value)
  }
}

impl From<DisclosableObject> for DisclosableValue {
  fn from(object: DisclosableObject) -> Self {
    DisclosableValue::Object(object)
  }
}

impl From<DisclosableArray> for DisclosableValue {
  fn from(array: DisclosableArray) -> Self {
    DisclosableValue::Array(array)
  }
}

/// An object node of a disclosable tree: named elements, each plain or
/// selectively disclosable, plus an optional floor on the number of digests
/// its `_sd` array must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisclosableObject {
  content: IndexMap<String, Disclosable<DisclosableValue>>,
  min_digests: Option<usize>,
}

impl DisclosableObject {
  pub fn new() -> Self {
    Self::default()
  }

  /// Requires the `_sd` array of this object to carry at least `floor`
  /// entries, padding with decoys if fewer claims are hoisted.
  pub fn with_min_digests(mut self, floor: usize) -> Self {
    self.min_digests = Some(floor);
    self
  }

  pub fn min_digests(&self) -> Option<usize> {
    self.min_digests
  }

  /// Adds `element` under `name`.
  ///
  /// ## Error
  /// [`Error::InvalidDisclosable`] if `name` is already present: one name
  /// cannot be both plain and selectively disclosable.
  pub fn insert(&mut self, name: impl Into<String>, element: Disclosable<DisclosableValue>) -> Result<()> {
    let name = name.into();
    if self.content.contains_key(&name) {
      return Err(Error::InvalidDisclosable(format!("duplicate property {name}")));
    }
    self.content.insert(name, element);
    Ok(())
  }

  /// Adds a property that always appears in the signed claim set.
  pub fn insert_plain(&mut self, name: impl Into<String>, value: impl Into<DisclosableValue>) -> Result<()> {
    self.insert(name, Disclosable::Plain(value.into()))
  }

  /// Adds a property hoisted behind a digest.
  pub fn insert_selective(&mut self, name: impl Into<String>, value: impl Into<DisclosableValue>) -> Result<()> {
    self.insert(name, Disclosable::Selective(value.into()))
  }

  pub fn get(&self, name: &str) -> Option<&Disclosable<DisclosableValue>> {
    self.content.get(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Disclosable<DisclosableValue>)> {
    self.content.iter().map(|(name, element)| (name.as_str(), element))
  }

  pub fn len(&self) -> usize {
    self.content.len()
  }

  pub fn is_empty(&self) -> bool {
    self.content.is_empty()
  }

  /// Folds the tree bottom-up: children are folded before `folder` sees their
  /// parent, so handlers receive fully folded subtrees. Encoding and claim
  /// path enumeration both ride this single traversal.
  pub fn fold<F: Fold>(&self, folder: &mut F) -> Result<F::Out> {
    let mut path = ClaimPath::default();
    fold_object(self, folder, &mut path)
  }

  /// Enumerates the paths of all elements of this tree: every leaf and every
  /// intermediate container, in depth-first order.
  pub fn claim_paths(&self) -> Vec<ClaimPath> {
    let mut collector = PathCollector::default();
    // The collector's handlers are infallible.
    let _ = self.fold(&mut collector);
    collector.paths
  }
}

/// An array node of a disclosable tree. Selectively disclosable elements are
/// replaced by `{"...": <digest>}` placeholders at their original index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisclosableArray {
  content: Vec<Disclosable<DisclosableValue>>,
  min_digests: Option<usize>,
}

impl DisclosableArray {
  pub fn new() -> Self {
    Self::default()
  }

  /// Requires at least `floor` placeholders among the encoded elements,
  /// padding with decoy placeholders appended after the real ones.
  pub fn with_min_digests(mut self, floor: usize) -> Self {
    self.min_digests = Some(floor);
    self
  }

  pub fn min_digests(&self) -> Option<usize> {
    self.min_digests
  }

  pub fn push(&mut self, element: Disclosable<DisclosableValue>) {
    self.content.push(element);
  }

  /// Appends an element that always appears in the signed claim set.
  pub fn push_plain(&mut self, value: impl Into<DisclosableValue>) {
    self.push(Disclosable::Plain(value.into()));
  }

  /// Appends an element hoisted behind a placeholder digest.
  pub fn push_selective(&mut self, value: impl Into<DisclosableValue>) {
    self.push(Disclosable::Selective(value.into()));
  }

  pub fn iter(&self) -> impl Iterator<Item = &Disclosable<DisclosableValue>> {
    self.content.iter()
  }

  pub fn len(&self) -> usize {
    self.content.len()
  }

  pub fn is_empty(&self) -> bool {
    self.content.is_empty()
  }
}

/// Handler strategies for the node kinds a disclosable tree folds over.
///
/// `Out` is the value produced for every visited element; container handlers
/// receive their children's outputs still wrapped in the child's
/// [`Disclosable`] mode.
pub trait Fold {
  type Out;

  /// A leaf claim value at `path`.
  fn leaf(&mut self, path: &ClaimPath, selective: bool, value: &Value) -> Result<Self::Out>;

  /// An object node at `path` whose children have been folded.
  fn object(
    &mut self,
    path: &ClaimPath,
    object: &DisclosableObject,
    children: Vec<(String, Disclosable<Self::Out>)>,
  ) -> Result<Self::Out>;

  /// An array node at `path` whose elements have been folded.
  fn array(
    &mut self,
    path: &ClaimPath,
    array: &DisclosableArray,
    elements: Vec<Disclosable<Self::Out>>,
  ) -> Result<Self::Out>;
}

fn fold_object<F: Fold>(object: &DisclosableObject, folder: &mut F, path: &mut ClaimPath) -> Result<F::Out> {
  let mut children = Vec::with_capacity(object.len());
  for (name, element) in object.iter() {
    path.push(ClaimPathSegment::Key(name.to_owned()));
    let folded = fold_value(element, folder, path);
    path.pop();
    children.push((name.to_owned(), element.rewrap(folded?)));
  }
  folder.object(path, object, children)
}

fn fold_array<F: Fold>(array: &DisclosableArray, folder: &mut F, path: &mut ClaimPath) -> Result<F::Out> {
  let mut elements = Vec::with_capacity(array.len());
  for (index, element) in array.iter().enumerate() {
    path.push(ClaimPathSegment::Index(index));
    let folded = fold_value(element, folder, path);
    path.pop();
    elements.push(element.rewrap(folded?));
  }
  folder.array(path, array, elements)
}

fn fold_value<F: Fold>(
  element: &Disclosable<DisclosableValue>,
  folder: &mut F,
  path: &mut ClaimPath,
) -> Result<F::Out> {
  match element.inner() {
    DisclosableValue::Leaf(value) => folder.leaf(path, element.is_selective(), value),
    DisclosableValue::Object(object) => fold_object(object, folder, path),
    DisclosableValue::Array(array) => fold_array(array, folder, path),
  }
}

#[derive(Default)]
struct PathCollector {
  paths: Vec<ClaimPath>,
}

impl Fold for PathCollector {
  type Out = ();

  fn leaf(&mut self, path: &ClaimPath, _selective: bool, _value: &Value) -> Result<()> {
    self.paths.push(path.clone());
    Ok(())
  }

  fn object(&mut self, path: &ClaimPath, _object: &DisclosableObject, _children: Vec<(String, Disclosable<()>)>) -> Result<()> {
    if !path.is_empty() {
      self.paths.push(path.clone());
    }
    Ok(())
  }

  fn array(&mut self, path: &ClaimPath, _array: &DisclosableArray, _elements: Vec<Disclosable<()>>) -> Result<()> {
    if !path.is_empty() {
      self.paths.push(path.clone());
    }
    Ok(())
  }
}
