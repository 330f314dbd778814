//! Scene-description carrier types: asset paths, composition arcs, layer
//! offsets, and the small closed enumerations stored in spec fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::path::ScenePath;

/// The path to an asset as authored plus, when known, its resolved form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AssetPath {
    /// The authored path, exactly as written in scene description.
    pub authored: String,
    /// The resolver's answer for `authored`, or empty if unresolved.
    pub resolved: String,
}

impl AssetPath {
    /// Creates an unresolved asset path.
    #[must_use]
    pub fn new(authored: impl Into<String>) -> Self {
        Self {
            authored: authored.into(),
            resolved: String::new(),
        }
    }

    /// Creates an asset path carrying its resolved form.
    #[must_use]
    pub fn with_resolved(authored: impl Into<String>, resolved: impl Into<String>) -> Self {
        Self {
            authored: authored.into(),
            resolved: resolved.into(),
        }
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@", self.authored)
    }
}

/// A time mapping `t -> t * scale + offset` applied to a sublayer, reference,
/// or payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerOffset {
    pub offset: f64,
    pub scale: f64,
}

impl LayerOffset {
    /// Creates an offset.
    #[must_use]
    pub const fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// The identity mapping.
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0.0, 1.0)
    }

    /// True for the identity mapping.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.offset == 0.0 && self.scale == 1.0
    }

    /// Applies the mapping to a time value.
    #[must_use]
    pub fn apply(&self, time: f64) -> f64 {
        time * self.scale + self.offset
    }

    /// The inverse mapping, if the scale is invertible.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        if self.scale == 0.0 {
            return None;
        }
        Some(Self::new(-self.offset / self.scale, 1.0 / self.scale))
    }
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for LayerOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(offset = {}, scale = {})", self.offset, self.scale)
    }
}

/// A reference arc to a prim in another (or the same) layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Reference {
    /// Asset path of the referenced layer; empty for internal references.
    pub asset_path: String,
    /// Target prim; empty means the target layer's default prim.
    pub prim_path: ScenePath,
    /// Time mapping applied across the arc.
    pub layer_offset: LayerOffset,
}

impl Reference {
    /// Creates a reference arc.
    #[must_use]
    pub fn new(asset_path: impl Into<String>, prim_path: ScenePath) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path,
            layer_offset: LayerOffset::identity(),
        }
    }

    /// True for internal references (no asset path).
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.asset_path.is_empty()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@<{}>", self.asset_path, self.prim_path)
    }
}

/// A payload arc: like a reference, but loadable on demand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    pub asset_path: String,
    pub prim_path: ScenePath,
    pub layer_offset: LayerOffset,
}

impl Payload {
    /// Creates a payload arc.
    #[must_use]
    pub fn new(asset_path: impl Into<String>, prim_path: ScenePath) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path,
            layer_offset: LayerOffset::identity(),
        }
    }

    /// True for internal payloads (no asset path).
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.asset_path.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}@<{}>", self.asset_path, self.prim_path)
    }
}

/// A time value measured in scene time codes.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct TimeCode(pub f64);

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sentinel for opaque attribute values: present but never authored with
/// a concrete payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OpaqueValue;

impl fmt::Display for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueValue")
    }
}

/// A value whose type was not recognized at read time; preserved verbatim so
/// round trips do not lose data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnregisteredValue(pub String);

impl fmt::Display for UnregisteredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a prim contributes to composition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Specifier {
    /// Defines a concrete prim.
    Def,
    /// Speculative overrides, applied only where a prim already exists.
    #[default]
    Over,
    /// Declares an abstract prim, composed only when inherited.
    Class,
}

/// Write permission recorded on a property or prim.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Permission {
    #[default]
    Public,
    Private,
}

/// Whether a property may vary over time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Variability {
    #[default]
    Varying,
    Uniform,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_offset_inverse_round_trips() {
        let offset = LayerOffset::new(10.0, 2.0);
        let inverse = offset.inverse().unwrap();
        assert_eq!(inverse.apply(offset.apply(3.0)), 3.0);
        assert!(LayerOffset::new(1.0, 0.0).inverse().is_none());
        assert!(LayerOffset::identity().is_identity());
    }

    #[test]
    fn enum_string_forms() {
        assert_eq!(Specifier::Def.to_string(), "def");
        assert_eq!("class".parse::<Specifier>().unwrap(), Specifier::Class);
        assert_eq!(Variability::Uniform.to_string(), "uniform");
        assert_eq!(Permission::Private.to_string(), "private");
    }

    #[test]
    fn internal_arcs() {
        assert!(Reference::new("", ScenePath::from_string("/A")).is_internal());
        assert!(!Payload::new("other.strata", ScenePath::empty()).is_internal());
    }
}
