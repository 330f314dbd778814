//! The type-erased value held by spec fields.
//!
//! [`Value`] is a closed tagged union over every type the data model can
//! author: scalars, fixed-dimension aggregates, their arrays, dictionaries,
//! time-sample maps, list-ops, paths, and composition-arc structs. Typed
//! access is monomorphized through the [`ValueType`] trait, which the
//! `value_types!` macro implements for every carried type, so call sites
//! read `value.get::<f32>()` rather than matching on variants.

use std::{collections::BTreeMap, fmt, hash::Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    list_op::ListOp,
    path::ScenePath,
    pattern::PathExpression,
    token::Token,
    types::{
        AssetPath, Half, LayerOffset, Matrix2d, Matrix3d, Matrix4d, OpaqueValue, Payload, Permission, Quatd, Quatf,
        Quath, Reference, Specifier, TimeCode, UnregisteredValue, Variability, Vec2d, Vec2f, Vec2h, Vec2i, Vec3d,
        Vec3f, Vec3h, Vec3i, Vec4d, Vec4f, Vec4h, Vec4i,
    },
};

/// A string-keyed, insertion-ordered dictionary of values.
///
/// Nested entries are addressable by dotted key paths (`a.b.c`); setting a
/// nested key creates the intermediate dictionaries, and erasing one prunes
/// intermediates it leaves empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueDictionary(pub IndexMap<String, Value>);

impl ValueDictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the dictionary holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up a value by dotted key path.
    #[must_use]
    pub fn value_at_path(&self, key_path: &str) -> Option<&Value> {
        let mut segments = key_path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.get::<ValueDictionary>()?.0.get(segment)?;
        }
        Some(current)
    }

    /// Sets a value at a dotted key path, creating intermediate dictionaries
    /// as needed. Fails (returns false) if an intermediate key holds a
    /// non-dictionary value.
    pub fn set_value_at_path(&mut self, key_path: &str, value: Value) -> bool {
        let mut segments: Vec<&str> = key_path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return false;
        };
        if leaf.is_empty() {
            return false;
        }
        let mut current = &mut self.0;
        for segment in segments {
            let entry = current
                .entry(segment.to_owned())
                .or_insert_with(|| Value::from(ValueDictionary::new()));
            match entry {
                Value::Dictionary(dict) => current = &mut dict.0,
                _ => return false,
            }
        }
        current.insert(leaf.to_owned(), value);
        true
    }

    /// Erases the value at a dotted key path, pruning intermediate
    /// dictionaries left empty. Returns true if something was removed.
    pub fn erase_value_at_path(&mut self, key_path: &str) -> bool {
        fn erase(map: &mut IndexMap<String, Value>, segments: &[&str]) -> bool {
            match segments {
                [] => false,
                [leaf] => map.shift_remove(*leaf).is_some(),
                [head, rest @ ..] => {
                    let Some(Value::Dictionary(inner)) = map.get_mut(*head) else {
                        return false;
                    };
                    let removed = erase(&mut inner.0, rest);
                    if removed && inner.is_empty() {
                        map.shift_remove(*head);
                    }
                    removed
                }
            }
        }
        let segments: Vec<&str> = key_path.split('.').collect();
        erase(&mut self.0, &segments)
    }

    /// The top-level keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// Totally ordered `f64` key for time-sample maps (orders by `total_cmp`).
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeKey(f64);

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// An ordered map from sample time to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSampleMap(BTreeMap<TimeKey, Value>);

// Time samples travel as `(time, value)` pair sequences: JSON maps demand
// string keys, and the order is reconstructible either way.
impl Serialize for TimeSampleMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|(key, value)| (key.0, value)))
    }
}

impl<'de> Deserialize<'de> for TimeSampleMap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs: Vec<(f64, Value)> = Vec::deserialize(deserializer)?;
        Ok(Self(pairs.into_iter().map(|(time, value)| (TimeKey(time), value)).collect()))
    }
}

impl TimeSampleMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no samples are authored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Inserts or overwrites the sample at `time`.
    pub fn insert(&mut self, time: f64, value: Value) {
        self.0.insert(TimeKey(time), value);
    }

    /// Removes the sample at `time`, returning it.
    pub fn remove(&mut self, time: f64) -> Option<Value> {
        self.0.remove(&TimeKey(time))
    }

    /// The sample exactly at `time`.
    #[must_use]
    pub fn get(&self, time: f64) -> Option<&Value> {
        self.0.get(&TimeKey(time))
    }

    /// All sample times in ascending order.
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.keys().map(|k| k.0)
    }

    /// Iterates `(time, value)` pairs in ascending time order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &Value)> {
        self.0.iter().map(|(k, v)| (k.0, v))
    }

    /// Returns the pair of sample times bracketing `time`: both equal the
    /// nearest extreme when `time` lies at or beyond it, and both equal the
    /// sample time when `time` lands exactly on a sample. `None` when no
    /// samples exist.
    #[must_use]
    pub fn bracketing(&self, time: f64) -> Option<(f64, f64)> {
        let first = self.0.first_key_value()?.0.0;
        let last = self.0.last_key_value()?.0.0;
        if time <= first {
            return Some((first, first));
        }
        if time >= last {
            return Some((last, last));
        }
        let upper = self.0.range(TimeKey(time)..).next()?.0.0;
        if upper == time {
            return Some((time, time));
        }
        let lower = self.0.range(..TimeKey(time)).next_back()?.0.0;
        Some((lower, upper))
    }

    /// The greatest sample time strictly less than `time`, or `None` when
    /// `time` is at or before the first sample.
    #[must_use]
    pub fn previous(&self, time: f64) -> Option<f64> {
        let first = self.0.first_key_value()?.0.0;
        if time <= first {
            return None;
        }
        let last = self.0.last_key_value()?.0.0;
        if time > last {
            return Some(last);
        }
        self.0.range(..TimeKey(time)).next_back().map(|(k, _)| k.0)
    }
}

/// Monomorphized access into [`Value`]; implemented for every carried type
/// by the `value_types!` macro.
pub trait ValueType: Sized {
    /// The value-type name used by the type registry and file formats.
    const TYPE_NAME: &'static str;

    /// Wraps this value.
    fn into_value(self) -> Value;
    /// Borrows the payload if the value holds this type.
    fn from_value(value: &Value) -> Option<&Self>;
    /// Takes the payload if the value holds this type.
    fn take_from_value(value: Value) -> Option<Self>;
}

macro_rules! value_types {
    ($(($variant:ident, $ty:ty, $name:literal)),* $(,)?) => {
        /// A type-erased scene value; see the module docs.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum Value {
            /// Holds nothing. Setting an empty value erases the field.
            Empty,
            $($variant($ty),)*
        }

        impl Value {
            /// The value-type name of the held type, or `""` when empty.
            #[must_use]
            pub fn type_name(&self) -> &'static str {
                match self {
                    Self::Empty => "",
                    $(Self::$variant(_) => $name,)*
                }
            }
        }

        $(
            impl ValueType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<&Self> {
                    match value {
                        Value::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn take_from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(inner: $ty) -> Self {
                    Self::$variant(inner)
                }
            }
        )*
    };
}

value_types! {
    // Scalars
    (Bool, bool, "bool"),
    (UChar, u8, "uchar"),
    (Int, i32, "int"),
    (UInt, u32, "uint"),
    (Int64, i64, "int64"),
    (UInt64, u64, "uint64"),
    (Half, Half, "half"),
    (Float, f32, "float"),
    (Double, f64, "double"),
    (TimeCode, TimeCode, "timecode"),
    (String, std::string::String, "string"),
    (Token, Token, "token"),
    (Asset, AssetPath, "asset"),
    (Opaque, OpaqueValue, "opaque"),
    // Fixed-dimension aggregates
    (Vec2i, Vec2i, "int2"),
    (Vec3i, Vec3i, "int3"),
    (Vec4i, Vec4i, "int4"),
    (Vec2h, Vec2h, "half2"),
    (Vec3h, Vec3h, "half3"),
    (Vec4h, Vec4h, "half4"),
    (Vec2f, Vec2f, "float2"),
    (Vec3f, Vec3f, "float3"),
    (Vec4f, Vec4f, "float4"),
    (Vec2d, Vec2d, "double2"),
    (Vec3d, Vec3d, "double3"),
    (Vec4d, Vec4d, "double4"),
    (Quath, Quath, "quath"),
    (Quatf, Quatf, "quatf"),
    (Quatd, Quatd, "quatd"),
    (Matrix2d, Matrix2d, "matrix2d"),
    (Matrix3d, Matrix3d, "matrix3d"),
    (Matrix4d, Matrix4d, "matrix4d"),
    // Arrays
    (BoolArray, Vec<bool>, "bool[]"),
    (UCharArray, Vec<u8>, "uchar[]"),
    (IntArray, Vec<i32>, "int[]"),
    (UIntArray, Vec<u32>, "uint[]"),
    (Int64Array, Vec<i64>, "int64[]"),
    (UInt64Array, Vec<u64>, "uint64[]"),
    (HalfArray, Vec<Half>, "half[]"),
    (FloatArray, Vec<f32>, "float[]"),
    (DoubleArray, Vec<f64>, "double[]"),
    (TimeCodeArray, Vec<TimeCode>, "timecode[]"),
    (StringArray, Vec<std::string::String>, "string[]"),
    (TokenArray, Vec<Token>, "token[]"),
    (AssetArray, Vec<AssetPath>, "asset[]"),
    (Vec2iArray, Vec<Vec2i>, "int2[]"),
    (Vec3iArray, Vec<Vec3i>, "int3[]"),
    (Vec4iArray, Vec<Vec4i>, "int4[]"),
    (Vec2hArray, Vec<Vec2h>, "half2[]"),
    (Vec3hArray, Vec<Vec3h>, "half3[]"),
    (Vec4hArray, Vec<Vec4h>, "half4[]"),
    (Vec2fArray, Vec<Vec2f>, "float2[]"),
    (Vec3fArray, Vec<Vec3f>, "float3[]"),
    (Vec4fArray, Vec<Vec4f>, "float4[]"),
    (Vec2dArray, Vec<Vec2d>, "double2[]"),
    (Vec3dArray, Vec<Vec3d>, "double3[]"),
    (Vec4dArray, Vec<Vec4d>, "double4[]"),
    (QuathArray, Vec<Quath>, "quath[]"),
    (QuatfArray, Vec<Quatf>, "quatf[]"),
    (QuatdArray, Vec<Quatd>, "quatd[]"),
    (Matrix2dArray, Vec<Matrix2d>, "matrix2d[]"),
    (Matrix3dArray, Vec<Matrix3d>, "matrix3d[]"),
    (Matrix4dArray, Vec<Matrix4d>, "matrix4d[]"),
    // Scene-description carriers
    (Path, ScenePath, "path"),
    (PathVector, Vec<ScenePath>, "path[]"),
    (LayerOffset, LayerOffset, "layerOffset"),
    (LayerOffsetVector, Vec<LayerOffset>, "layerOffset[]"),
    (Reference, Reference, "reference"),
    (Payload, Payload, "payload"),
    (Specifier, Specifier, "specifier"),
    (Permission, Permission, "permission"),
    (Variability, Variability, "variability"),
    (Unregistered, UnregisteredValue, "unregistered"),
    (PathExpression, PathExpression, "pathExpression"),
    (Dictionary, ValueDictionary, "dictionary"),
    (TimeSamples, TimeSampleMap, "timeSamples"),
    (VariantSelectionMap, BTreeMap<Token, Token>, "variantSelection"),
    (RelocatesMap, BTreeMap<ScenePath, ScenePath>, "relocates"),
    // List operators
    (IntListOp, ListOp<i32>, "intListOp"),
    (UIntListOp, ListOp<u32>, "uintListOp"),
    (Int64ListOp, ListOp<i64>, "int64ListOp"),
    (UInt64ListOp, ListOp<u64>, "uint64ListOp"),
    (StringListOp, ListOp<std::string::String>, "stringListOp"),
    (TokenListOp, ListOp<Token>, "tokenListOp"),
    (PathListOp, ListOp<ScenePath>, "pathListOp"),
    (ReferenceListOp, ListOp<Reference>, "referenceListOp"),
    (PayloadListOp, ListOp<Payload>, "payloadListOp"),
    (UnregisteredValueListOp, ListOp<UnregisteredValue>, "unregisteredValueListOp"),
}

impl Value {
    /// True for the empty value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// True if the value holds a `T`.
    #[must_use]
    pub fn is_holding<T: ValueType>(&self) -> bool {
        T::from_value(self).is_some()
    }

    /// Borrows the payload if the value holds a `T`.
    #[must_use]
    pub fn get<T: ValueType>(&self) -> Option<&T> {
        T::from_value(self)
    }

    /// Takes the payload if the value holds a `T`.
    #[must_use]
    pub fn take<T: ValueType>(self) -> Option<T> {
        T::take_from_value(self)
    }

    /// Numeric cast to `f64` for any scalar numeric variant.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::UChar(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(f64::from(*v)),
            Self::UInt(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Half(v) => Some(f64::from(v.to_f32())),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::TimeCode(v) => Some(v.0),
            _ => None,
        }
    }

    /// Numeric cast to `i64` for integral variants.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::UChar(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::UInt(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Content hash, stable within a process run. Built over the serialized
    /// form so every variant hashes without a per-type `Hash` obligation.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let bytes = postcard::to_allocvec(self).unwrap_or_default();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hasher.write(&bytes);
        hasher.finish()
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Empty
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl fmt::Display for Value {
    /// Renders the serialized form; used by debug dumps, not file formats.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip_through_erasure() {
        let value = Value::from(1.5f32);
        assert_eq!(value.type_name(), "float");
        assert_eq!(value.get::<f32>(), Some(&1.5));
        assert_eq!(value.get::<f64>(), None);
        assert!(value.is_holding::<f32>());
        assert_eq!(value.take::<f32>(), Some(1.5));

        let value = Value::from(vec![Token::new("a"), Token::new("b")]);
        assert_eq!(value.type_name(), "token[]");
        assert_eq!(value.get::<Vec<Token>>().unwrap().len(), 2);
    }

    #[test]
    fn numeric_casts() {
        assert_eq!(Value::from(true).as_f64(), Some(1.0));
        assert_eq!(Value::from(7i32).as_i64(), Some(7));
        assert_eq!(Value::from(Half::from_f32(0.5)).as_f64(), Some(0.5));
        assert_eq!(Value::from("text").as_f64(), None);
    }

    #[test]
    fn empty_value_semantics() {
        assert!(Value::Empty.is_empty());
        assert!(Value::default().is_empty());
        assert_eq!(Value::Empty.type_name(), "");
        assert!(!Value::from(0i32).is_empty());
    }

    #[test]
    fn hash_distinguishes_type_and_content() {
        assert_eq!(Value::from(1i32).hash_value(), Value::from(1i32).hash_value());
        assert_ne!(Value::from(1i32).hash_value(), Value::from(2i32).hash_value());
        assert_ne!(Value::from(1i32).hash_value(), Value::from(1i64).hash_value());
    }

    #[test]
    fn dictionary_dotted_key_paths() {
        let mut dict = ValueDictionary::new();
        assert!(dict.set_value_at_path("a.b.c", Value::from(1i32)));
        assert_eq!(dict.value_at_path("a.b.c"), Some(&Value::from(1i32)));
        assert!(dict.value_at_path("a.b").unwrap().is_holding::<ValueDictionary>());
        assert!(dict.value_at_path("a.x").is_none());
        // Intermediate non-dictionaries refuse nesting.
        assert!(!dict.set_value_at_path("a.b.c.d", Value::from(2i32)));
        // Erasing the leaf prunes the now-empty intermediates.
        assert!(dict.erase_value_at_path("a.b.c"));
        assert!(dict.is_empty());
        assert!(!dict.erase_value_at_path("a.b.c"));
    }

    #[test]
    fn time_sample_map_bracketing() {
        let mut samples = TimeSampleMap::new();
        samples.insert(1.0, Value::from(10i32));
        samples.insert(2.0, Value::from(20i32));
        assert_eq!(samples.times().collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(samples.bracketing(1.5), Some((1.0, 2.0)));
        assert_eq!(samples.bracketing(0.5), Some((1.0, 1.0)));
        assert_eq!(samples.bracketing(2.5), Some((2.0, 2.0)));
        assert_eq!(samples.bracketing(2.0), Some((2.0, 2.0)));
        assert_eq!(TimeSampleMap::new().bracketing(1.0), None);
    }

    #[test]
    fn time_sample_map_previous() {
        let mut samples = TimeSampleMap::new();
        for t in [1.0, 2.0, 3.0] {
            samples.insert(t, Value::from(t));
        }
        assert_eq!(samples.previous(1.0), None);
        assert_eq!(samples.previous(1.5), Some(1.0));
        assert_eq!(samples.previous(2.0), Some(1.0));
        assert_eq!(samples.previous(10.0), Some(3.0));
        // A time infinitesimally below a sample still lands on the sample
        // before it.
        let just_below = f64::from_bits(2.0f64.to_bits() - 1);
        assert_eq!(samples.previous(just_below), Some(1.0));
    }
}
