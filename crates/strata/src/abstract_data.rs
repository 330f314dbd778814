//! The polymorphic record store underlying every layer.
//!
//! An [`AbstractData`] implementation maps scene paths to records, each
//! carrying a [`SpecType`] tag and a set of `(field, value)` entries. Two
//! backends ship: the hash-table [`MemoryData`](crate::memory_data::MemoryData)
//! and the file-backed [`CrateData`](crate::crate_data::CrateData). Helpers
//! that do not vary per backend (dictionary key paths, deep equality, the
//! debug dump, and the bracketing-based previous-sample walk) live here.

use std::io::Write;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    path::ScenePath,
    token::{FieldKey, Token},
    value::{Value, ValueDictionary},
};

/// The closed set of record kinds a data store can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum SpecType {
    #[default]
    Unknown,
    PseudoRoot,
    Prim,
    Attribute,
    Connection,
    Expression,
    Mapper,
    MapperArg,
    Relationship,
    RelationshipTarget,
    Variant,
    VariantSet,
}

/// Callback for [`AbstractData::visit_specs`]; returning false halts the
/// traversal.
pub trait SpecVisitor {
    fn visit(&mut self, data: &dyn AbstractData, path: &ScenePath) -> bool;
}

impl<F: FnMut(&dyn AbstractData, &ScenePath) -> bool> SpecVisitor for F {
    fn visit(&mut self, data: &dyn AbstractData, path: &ScenePath) -> bool {
        self(data, path)
    }
}

/// The record-store interface; see the module docs.
///
/// Every non-empty store holds a record with spec type
/// [`SpecType::PseudoRoot`] at the absolute root path. `create_spec` does not
/// create ancestors, and `erase_spec` does not erase descendants; the layer
/// above owns those protocols.
pub trait AbstractData: Send + Sync + 'static {
    /// Concrete-type access for callers that can exploit a specific backend.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable concrete-type access.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// True iff values are paged from backing storage on demand.
    fn streams_data(&self) -> bool;

    /// True iff the store holds no references into an external asset.
    fn is_detached(&self) -> bool {
        !self.streams_data()
    }

    /// Inserts a record at `path` with the given spec type.
    fn create_spec(&mut self, path: &ScenePath, spec_type: SpecType);

    /// True if a record exists at `path`.
    fn has_spec(&self, path: &ScenePath) -> bool;

    /// Removes the record at `path` (not its descendants).
    fn erase_spec(&mut self, path: &ScenePath);

    /// Atomically relocates the record at `from` to the absent path `to`.
    fn move_spec(&mut self, from: &ScenePath, to: &ScenePath);

    /// The record's spec type, or `Unknown` when absent.
    fn spec_type(&self, path: &ScenePath) -> SpecType;

    /// The field names authored at `path`, in storage order.
    fn list(&self, path: &ScenePath) -> Vec<Token>;

    /// True if `field` is authored at `path`. Cheaper than [`get`] when the
    /// value itself is not needed.
    ///
    /// [`get`]: AbstractData::get
    fn has(&self, path: &ScenePath, field: Token) -> bool;

    /// The value of `field` at `path`, or [`Value::Empty`] when absent.
    fn get(&self, path: &ScenePath, field: Token) -> Value;

    /// Single-lookup combination of [`spec_type`] and [`get`]. The value is
    /// present iff the field is authored, regardless of its payload.
    ///
    /// [`spec_type`]: AbstractData::spec_type
    /// [`get`]: AbstractData::get
    fn spec_type_and_field(&self, path: &ScenePath, field: Token) -> (SpecType, Option<Value>) {
        let spec_type = self.spec_type(path);
        if spec_type == SpecType::Unknown {
            return (SpecType::Unknown, None);
        }
        let value = self.get(path, field);
        if self.has(path, field) {
            (spec_type, Some(value))
        } else {
            (spec_type, None)
        }
    }

    /// Writes `field` at `path`. An empty value erases the field.
    fn set(&mut self, path: &ScenePath, field: Token, value: Value);

    /// Removes `field` at `path`.
    fn erase(&mut self, path: &ScenePath, field: Token);

    /// Every sample time authored anywhere in the store, ascending, unique.
    fn list_all_time_samples(&self) -> Vec<f64>;

    /// The sample times authored at `path`, ascending.
    fn list_time_samples_for_path(&self, path: &ScenePath) -> Vec<f64>;

    /// Number of samples authored at `path`.
    fn num_time_samples_for_path(&self, path: &ScenePath) -> usize {
        self.list_time_samples_for_path(path).len()
    }

    /// Bracketing sample times across the whole store; see
    /// [`bracketing_in_sorted`].
    fn bracketing_time_samples(&self, time: f64) -> Option<(f64, f64)> {
        bracketing_in_sorted(&self.list_all_time_samples(), time)
    }

    /// Bracketing sample times at `path`.
    fn bracketing_time_samples_for_path(&self, path: &ScenePath, time: f64) -> Option<(f64, f64)>;

    /// The greatest sample time strictly before `time` at `path`.
    ///
    /// This default derives the answer from bracketing queries alone: when
    /// `time` sits exactly on a sample it re-brackets at the next float
    /// toward negative infinity to step off the sample. Backends with an
    /// ordered sample map override this with a direct lookup.
    fn previous_time_sample_for_path(&self, path: &ScenePath, time: f64) -> Option<f64> {
        let (lower, _) = self.bracketing_time_samples_for_path(path, time)?;
        if time < lower {
            return None;
        }
        if time == lower {
            let stepped = time.next_down();
            let (new_lower, _) = self.bracketing_time_samples_for_path(path, stepped)?;
            if new_lower == time {
                // Still bracketed by the same sample: time sits on the first
                // sample and has no predecessor.
                return None;
            }
            return Some(new_lower);
        }
        Some(lower)
    }

    /// The value sampled exactly at `time`, if authored.
    fn query_time_sample(&self, path: &ScenePath, time: f64) -> Option<Value>;

    /// Authors a sample. An empty value erases the sample at `time`.
    fn set_time_sample(&mut self, path: &ScenePath, time: f64, value: Value);

    /// Removes the sample at `time`.
    fn erase_time_sample(&mut self, path: &ScenePath, time: f64);

    /// Invokes `visitor` for every spec until it returns false. Visit order
    /// is unspecified.
    fn visit_specs(&self, visitor: &mut dyn SpecVisitor);
}

/// Shared bracketing rule over an ascending, unique time list: both results
/// equal the nearest extreme beyond the range, and both equal the sample
/// when `time` lands exactly on one.
#[must_use]
pub fn bracketing_in_sorted(times: &[f64], time: f64) -> Option<(f64, f64)> {
    let first = *times.first()?;
    let last = *times.last()?;
    if time <= first {
        return Some((first, first));
    }
    if time >= last {
        return Some((last, last));
    }
    let upper_index = times.partition_point(|t| *t < time);
    let upper = times[upper_index];
    if upper == time {
        Some((time, time))
    } else {
        Some((times[upper_index - 1], upper))
    }
}

/// Collects every spec path in the store, sorted.
#[must_use]
pub fn collect_spec_paths(data: &dyn AbstractData) -> Vec<ScenePath> {
    let mut paths = Vec::new();
    let mut collector = |_: &dyn AbstractData, path: &ScenePath| {
        paths.push(path.clone());
        true
    };
    data.visit_specs(&mut collector);
    paths.sort();
    paths
}

impl dyn AbstractData {
    /// True if the dictionary-valued `field` holds an entry at the dotted
    /// `key_path`.
    #[must_use]
    pub fn has_dict_key(&self, path: &ScenePath, field: Token, key_path: &str) -> bool {
        self.get_dict_value_by_key(path, field, key_path).is_some()
    }

    /// Reads an entry of a dictionary-valued field by dotted key path.
    #[must_use]
    pub fn get_dict_value_by_key(&self, path: &ScenePath, field: Token, key_path: &str) -> Option<Value> {
        let value = self.get(path, field);
        let dict = value.get::<ValueDictionary>()?;
        dict.value_at_path(key_path).cloned()
    }

    /// Writes an entry of a dictionary-valued field by dotted key path,
    /// creating the dictionary (and intermediates) as needed. An empty value
    /// erases the entry.
    pub fn set_dict_value_by_key(&mut self, path: &ScenePath, field: Token, key_path: &str, value: Value) {
        if value.is_empty() {
            self.erase_dict_value_by_key(path, field, key_path);
            return;
        }
        let mut dict = self
            .get(path, field)
            .take::<ValueDictionary>()
            .unwrap_or_default();
        if dict.set_value_at_path(key_path, value) {
            self.set(path, field, Value::from(dict));
        }
    }

    /// Erases an entry of a dictionary-valued field by dotted key path. When
    /// the removal leaves the dictionary empty, the field itself is erased.
    pub fn erase_dict_value_by_key(&mut self, path: &ScenePath, field: Token, key_path: &str) {
        let Some(mut dict) = self.get(path, field).take::<ValueDictionary>() else {
            return;
        };
        if !dict.erase_value_at_path(key_path) {
            return;
        }
        if dict.is_empty() {
            self.erase(path, field);
        } else {
            self.set(path, field, Value::from(dict));
        }
    }

    /// Top-level keys of a dictionary-valued field.
    #[must_use]
    pub fn list_dict_keys(&self, path: &ScenePath, field: Token) -> Vec<String> {
        self.get(path, field)
            .get::<ValueDictionary>()
            .map(ValueDictionary::keys)
            .unwrap_or_default()
    }

    /// Deep equality of spec sets and field contents.
    #[must_use]
    pub fn equals(&self, other: &dyn AbstractData) -> bool {
        let mine = collect_spec_paths(self);
        let theirs = collect_spec_paths(other);
        if mine != theirs {
            return false;
        }
        for path in &mine {
            if self.spec_type(path) != other.spec_type(path) {
                return false;
            }
            let mut my_fields = self.list(path);
            let mut their_fields = other.list(path);
            my_fields.sort();
            their_fields.sort();
            if my_fields != their_fields {
                return false;
            }
            for field in my_fields {
                if self.get(path, field) != other.get(path, field) {
                    return false;
                }
            }
        }
        true
    }

    /// Dumps every spec and field in sorted, deterministic order.
    pub fn write_to_stream(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for path in collect_spec_paths(self) {
            writeln!(out, "<{path}> : {}", self.spec_type(&path))?;
            let mut fields = self.list(&path);
            fields.sort();
            for field in fields {
                writeln!(out, "    {field}: {}", self.get(&path, field))?;
            }
        }
        Ok(())
    }
}

/// The field under which time samples are stored.
#[must_use]
pub fn time_samples_field() -> Token {
    FieldKey::TimeSamples.token()
}
