use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DimensionError;

/// Stable lookup key of a [`DimensionSpacePoint`].
///
/// Derived from the canonical JSON form, so two structurally equal points
/// always share a hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePointHash(String);

impl DimensionSpacePointHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionSpacePointHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One concrete combination of dimension values, e.g. `{"language":"de","market":"CH"}`.
///
/// Coordinates are kept sorted by dimension id, which makes the JSON form
/// canonical.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePoint {
    coordinates: BTreeMap<String, String>,
}

impl DimensionSpacePoint {
    pub fn new<I, K, V>(coordinates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            coordinates: coordinates
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The point without any coordinates. It is the only allowed point of a
    /// repository that declares no dimensions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, DimensionError> {
        serde_json::from_str(json).map_err(|e| DimensionError::InvalidPoint(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // A map of strings always serializes.
        serde_json::to_string(&self.coordinates).unwrap_or_default()
    }

    pub fn hash(&self) -> DimensionSpacePointHash {
        let digest = blake3::hash(self.to_json().as_bytes());
        DimensionSpacePointHash(digest.to_hex()[..32].to_string())
    }

    pub fn coordinate(&self, dimension: &str) -> Option<&str> {
        self.coordinates.get(dimension).map(String::as_str)
    }

    pub fn coordinates(&self) -> &BTreeMap<String, String> {
        &self.coordinates
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Copy of this point with one coordinate replaced.
    pub fn vary(&self, dimension: &str, value: &str) -> Self {
        let mut coordinates = self.coordinates.clone();
        coordinates.insert(dimension.to_string(), value.to_string());
        Self { coordinates }
    }

    /// True iff both points declare the same dimensions and differ in
    /// exactly `dimension`.
    pub fn differs_only_in(&self, other: &Self, dimension: &str) -> bool {
        if self.coordinates.len() != other.coordinates.len() {
            return false;
        }
        let mut differs_in_dimension = false;
        for (key, value) in &self.coordinates {
            match other.coordinates.get(key) {
                Some(other_value) if other_value == value => {}
                Some(_) if key == dimension => differs_in_dimension = true,
                _ => return false,
            }
        }
        differs_in_dimension
    }
}

impl fmt::Display for DimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl FromStr for DimensionSpacePoint {
    type Err = DimensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

/// The point at which a node variant was authored.
///
/// Where the variant is *visible* is a different question, answered through
/// the variation graph.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginDimensionSpacePoint(DimensionSpacePoint);

impl OriginDimensionSpacePoint {
    pub fn new<I, K, V>(coordinates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(DimensionSpacePoint::new(coordinates))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_point(&self) -> &DimensionSpacePoint {
        &self.0
    }

    pub fn to_point(&self) -> DimensionSpacePoint {
        self.0.clone()
    }

    pub fn hash(&self) -> DimensionSpacePointHash {
        self.0.hash()
    }
}

impl From<DimensionSpacePoint> for OriginDimensionSpacePoint {
    fn from(point: DimensionSpacePoint) -> Self {
        Self(point)
    }
}

impl From<OriginDimensionSpacePoint> for DimensionSpacePoint {
    fn from(origin: OriginDimensionSpacePoint) -> Self {
        origin.0
    }
}

impl fmt::Display for OriginDimensionSpacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A deterministic, ordered set of dimension space points.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpacePointSet {
    points: BTreeSet<DimensionSpacePoint>,
}

impl DimensionSpacePointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(point: DimensionSpacePoint) -> Self {
        let mut set = Self::new();
        set.insert(point);
        set
    }

    pub fn insert(&mut self, point: DimensionSpacePoint) -> bool {
        self.points.insert(point)
    }

    pub fn remove(&mut self, point: &DimensionSpacePoint) -> bool {
        self.points.remove(point)
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.points.contains(point)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DimensionSpacePoint> {
        self.points.iter()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            points: self.points.union(&other.points).cloned().collect(),
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            points: self.points.intersection(&other.points).cloned().collect(),
        }
    }

    pub fn difference(&self, other: &Self) -> Self {
        Self {
            points: self.points.difference(&other.points).cloned().collect(),
        }
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.points.is_subset(&other.points)
    }
}

impl FromIterator<DimensionSpacePoint> for DimensionSpacePointSet {
    fn from_iter<T: IntoIterator<Item = DimensionSpacePoint>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DimensionSpacePointSet {
    type Item = DimensionSpacePoint;
    type IntoIter = std::collections::btree_set::IntoIter<DimensionSpacePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a> IntoIterator for &'a DimensionSpacePointSet {
    type Item = &'a DimensionSpacePoint;
    type IntoIter = std::collections::btree_set::Iter<'a, DimensionSpacePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl fmt::Display for DimensionSpacePointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, point) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            point.fmt(f)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(language: &str) -> DimensionSpacePoint {
        DimensionSpacePoint::new([("language", language)])
    }

    #[test]
    fn json_form_is_canonical() {
        let a = DimensionSpacePoint::new([("market", "CH"), ("language", "de")]);
        let b = DimensionSpacePoint::from_json(r#"{"language":"de","market":"CH"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json(), r#"{"language":"de","market":"CH"}"#);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = DimensionSpacePoint::from_json("[1,2]").unwrap_err();
        assert!(matches!(err, DimensionError::InvalidPoint(_)));
    }

    #[test]
    fn differs_only_in_checks_every_other_coordinate() {
        let de_ch = DimensionSpacePoint::new([("language", "de"), ("market", "CH")]);
        let en_ch = de_ch.vary("language", "en");
        let en_de = en_ch.vary("market", "DE");

        assert!(de_ch.differs_only_in(&en_ch, "language"));
        assert!(!de_ch.differs_only_in(&en_ch, "market"));
        assert!(!de_ch.differs_only_in(&en_de, "language"));
        assert!(!de_ch.differs_only_in(&de_ch, "language"));
    }

    #[test]
    fn set_operations() {
        let a: DimensionSpacePointSet = [point("en"), point("de")].into_iter().collect();
        let b: DimensionSpacePointSet = [point("de"), point("fr")].into_iter().collect();

        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(a.intersection(&b), DimensionSpacePointSet::single(point("de")));
        assert_eq!(a.difference(&b), DimensionSpacePointSet::single(point("en")));
        assert!(DimensionSpacePointSet::single(point("de")).is_subset(&a));
    }

    #[test]
    fn origin_wraps_point_transparently() {
        let origin = OriginDimensionSpacePoint::new([("language", "en")]);
        let json = serde_json::to_string(&origin).unwrap();
        assert_eq!(json, r#"{"language":"en"}"#);
        assert_eq!(origin.to_point(), point("en"));
    }
}
