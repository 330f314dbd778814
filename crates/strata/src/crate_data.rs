//! The binary ("crate") data store backend.
//!
//! A crate file is a 16-byte header (magic + format version), a postcard-
//! encoded spec index, and a value blob. The index records, per spec, the
//! field names and blob ranges of their values; values decode on demand from
//! the shared buffer, so opening a large file does not materialize its
//! payloads. Edits overlay decoded slots in memory; saving re-encodes the
//! whole store and staged-renames over the destination.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    abstract_data::{AbstractData, SpecType, SpecVisitor, time_samples_field},
    error::{self, Error},
    file_version::FileVersion,
    path::ScenePath,
    resolver::Asset,
    token::Token,
    value::{TimeSampleMap, Value},
};

/// Magic bytes opening every crate file.
pub const CRATE_MAGIC: &[u8; 12] = b"strata-crate";
/// The version written by this build.
pub const CRATE_WRITE_VERSION: FileVersion = FileVersion::new(1, 0, 0);
/// The newest version this build can read.
pub const CRATE_READ_VERSION: FileVersion = FileVersion::new(1, 0, 0);

const HEADER_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct IndexField {
    name: Token,
    offset: u64,
    len: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    path: ScenePath,
    spec_type: SpecType,
    fields: Vec<IndexField>,
}

/// A field value: either a blob range still on disk, or a live edit.
#[derive(Debug, Clone)]
enum FieldSlot {
    Stored { offset: u64, len: u32 },
    Live(Value),
}

#[derive(Debug, Clone, Default)]
struct CrateRecord {
    spec_type: SpecType,
    fields: Vec<(Token, FieldSlot)>,
}

impl CrateRecord {
    fn slot(&self, field: Token) -> Option<&FieldSlot> {
        self.fields.iter().find(|(name, _)| *name == field).map(|(_, s)| s)
    }
}

/// File-backed [`AbstractData`] backend; see the module docs.
pub struct CrateData {
    table: AHashMap<ScenePath, CrateRecord>,
    blob: Arc<[u8]>,
    asset_backed: bool,
    version: FileVersion,
}

impl Default for CrateData {
    fn default() -> Self {
        Self::new()
    }
}

impl CrateData {
    /// Creates an empty, detached store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: AHashMap::new(),
            blob: Arc::from(&[][..]),
            asset_backed: false,
            version: CRATE_WRITE_VERSION,
        }
    }

    /// Opens a store over the bytes of `asset`. Fails on bad magic,
    /// unreadable version, or a malformed index.
    pub fn open(asset: &Arc<dyn Asset>) -> error::Result<Self> {
        let buffer = asset
            .buffer()
            .map_err(|err| Error::runtime(format!("cannot read crate file: {err}")))?;
        let mut data = Self::from_bytes_impl(&buffer)?;
        data.asset_backed = true;
        Ok(data)
    }

    /// Decodes a store from in-memory bytes (detached).
    pub fn from_bytes(bytes: &[u8]) -> error::Result<Self> {
        Self::from_bytes_impl(bytes)
    }

    fn from_bytes_impl(buffer: &[u8]) -> error::Result<Self> {
        if buffer.len() < HEADER_LEN || &buffer[..CRATE_MAGIC.len()] != CRATE_MAGIC {
            return Err(Error::parse("not a crate file (bad magic)"));
        }
        let version = FileVersion::new(buffer[12], buffer[13], buffer[14]);
        if !CRATE_READ_VERSION.can_read(version) {
            return Err(Error::VersionMismatch {
                found: version,
                max_readable: CRATE_READ_VERSION,
            });
        }
        let index_len_bytes: [u8; 8] = buffer
            .get(HEADER_LEN..HEADER_LEN + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::parse("truncated crate header"))?;
        let index_len = usize::try_from(u64::from_le_bytes(index_len_bytes))
            .map_err(|_| Error::parse("oversized crate index"))?;
        let index_start = HEADER_LEN + 8;
        let blob_start = index_start + index_len;
        let index_bytes = buffer
            .get(index_start..blob_start)
            .ok_or_else(|| Error::parse("truncated crate index"))?;
        let index: Vec<IndexRecord> = postcard::from_bytes(index_bytes)
            .map_err(|err| Error::parse(format!("malformed crate index: {err}")))?;
        let blob: Arc<[u8]> = buffer
            .get(blob_start..)
            .map(Arc::from)
            .ok_or_else(|| Error::parse("truncated crate blob"))?;

        let mut table = AHashMap::with_capacity(index.len());
        for record in index {
            table.insert(
                record.path,
                CrateRecord {
                    spec_type: record.spec_type,
                    fields: record
                        .fields
                        .into_iter()
                        .map(|f| (f.name, FieldSlot::Stored { offset: f.offset, len: f.len }))
                        .collect(),
                },
            );
        }
        Ok(Self {
            table,
            blob,
            asset_backed: false,
            version,
        })
    }

    /// The format version this store was read with (or will be written as).
    #[must_use]
    pub fn version(&self) -> FileVersion {
        self.version
    }

    fn decode_slot(&self, slot: &FieldSlot) -> Value {
        match slot {
            FieldSlot::Live(value) => value.clone(),
            FieldSlot::Stored { offset, len } => {
                let start = usize::try_from(*offset).unwrap_or(usize::MAX);
                let end = start.saturating_add(*len as usize);
                let Some(bytes) = self.blob.get(start..end) else {
                    error::post_runtime_error("crate value range out of bounds");
                    return Value::Empty;
                };
                match postcard::from_bytes(bytes) {
                    Ok(value) => value,
                    Err(err) => {
                        error::post_runtime_error(format!("undecodable crate value: {err}"));
                        Value::Empty
                    }
                }
            }
        }
    }

    /// Materializes every stored slot and drops the backing buffer, leaving
    /// the store detached from its source asset.
    pub fn detach(&mut self) {
        let paths: Vec<ScenePath> = self.table.keys().cloned().collect();
        for path in paths {
            let record = self.table.get(&path).cloned().unwrap_or_default();
            let fields = record
                .fields
                .iter()
                .map(|(name, slot)| (*name, FieldSlot::Live(self.decode_slot(slot))))
                .collect();
            if let Some(entry) = self.table.get_mut(&path) {
                entry.fields = fields;
            }
        }
        self.blob = Arc::from(&[][..]);
        self.asset_backed = false;
    }

    /// Encodes the whole store as crate-file bytes.
    pub fn to_bytes(&self) -> error::Result<Vec<u8>> {
        let mut paths: Vec<&ScenePath> = self.table.keys().collect();
        paths.sort();

        let mut blob: Vec<u8> = Vec::new();
        let mut index: Vec<IndexRecord> = Vec::with_capacity(paths.len());
        for path in paths {
            let record = &self.table[path];
            let mut fields = Vec::with_capacity(record.fields.len());
            for (name, slot) in &record.fields {
                let value = self.decode_slot(slot);
                let encoded = postcard::to_allocvec(&value)
                    .map_err(|err| Error::runtime(format!("unencodable value: {err}")))?;
                let offset = blob.len() as u64;
                let len = u32::try_from(encoded.len())
                    .map_err(|_| Error::runtime("value exceeds crate field size limit"))?;
                blob.extend_from_slice(&encoded);
                fields.push(IndexField { name: *name, offset, len });
            }
            index.push(IndexRecord {
                path: path.clone(),
                spec_type: record.spec_type,
                fields,
            });
        }

        let index_bytes = postcard::to_allocvec(&index)
            .map_err(|err| Error::runtime(format!("unencodable crate index: {err}")))?;
        let mut out = Vec::with_capacity(HEADER_LEN + 8 + index_bytes.len() + blob.len());
        out.extend_from_slice(CRATE_MAGIC);
        out.push(CRATE_WRITE_VERSION.major);
        out.push(CRATE_WRITE_VERSION.minor);
        out.push(CRATE_WRITE_VERSION.patch);
        out.push(0);
        out.extend_from_slice(&(index_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&index_bytes);
        out.extend_from_slice(&blob);
        Ok(out)
    }

    fn samples(&self, path: &ScenePath) -> Option<TimeSampleMap> {
        let record = self.table.get(path)?;
        let slot = record.slot(time_samples_field())?;
        self.decode_slot(slot).take::<TimeSampleMap>()
    }
}

impl AbstractData for CrateData {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn streams_data(&self) -> bool {
        true
    }

    fn is_detached(&self) -> bool {
        !self.asset_backed
    }

    fn create_spec(&mut self, path: &ScenePath, spec_type: SpecType) {
        if spec_type == SpecType::Unknown {
            error::post_coding_error(format!("cannot create spec of unknown type at <{path}>"));
            return;
        }
        self.table.entry(path.clone()).or_default().spec_type = spec_type;
    }

    fn has_spec(&self, path: &ScenePath) -> bool {
        self.table.contains_key(path)
    }

    fn erase_spec(&mut self, path: &ScenePath) {
        if self.table.remove(path).is_none() {
            error::post_coding_error(format!("no spec to erase at <{path}>"));
        }
    }

    fn move_spec(&mut self, from: &ScenePath, to: &ScenePath) {
        if self.table.contains_key(to) {
            error::post_coding_error(format!("cannot move spec to occupied path <{to}>"));
            return;
        }
        let Some(record) = self.table.remove(from) else {
            error::post_coding_error(format!("no spec to move at <{from}>"));
            return;
        };
        self.table.insert(to.clone(), record);
    }

    fn spec_type(&self, path: &ScenePath) -> SpecType {
        self.table.get(path).map_or(SpecType::Unknown, |r| r.spec_type)
    }

    fn list(&self, path: &ScenePath) -> Vec<Token> {
        self.table
            .get(path)
            .map(|r| r.fields.iter().map(|(name, _)| *name).collect())
            .unwrap_or_default()
    }

    fn has(&self, path: &ScenePath, field: Token) -> bool {
        self.table.get(path).is_some_and(|r| r.slot(field).is_some())
    }

    fn get(&self, path: &ScenePath, field: Token) -> Value {
        self.table
            .get(path)
            .and_then(|r| r.slot(field))
            .map_or(Value::Empty, |slot| self.decode_slot(slot))
    }

    fn set(&mut self, path: &ScenePath, field: Token, value: Value) {
        if value.is_empty() {
            self.erase(path, field);
            return;
        }
        let Some(record) = self.table.get_mut(path) else {
            error::post_coding_error(format!("no spec at <{path}> when setting field '{field}'"));
            return;
        };
        match record.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = FieldSlot::Live(value),
            None => record.fields.push((field, FieldSlot::Live(value))),
        }
    }

    fn erase(&mut self, path: &ScenePath, field: Token) {
        if let Some(record) = self.table.get_mut(path) {
            record.fields.retain(|(name, _)| *name != field);
        }
    }

    fn list_all_time_samples(&self) -> Vec<f64> {
        let mut times: Vec<f64> = Vec::new();
        for path in self.table.keys() {
            if let Some(samples) = self.samples(path) {
                times.extend(samples.times());
            }
        }
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    fn list_time_samples_for_path(&self, path: &ScenePath) -> Vec<f64> {
        self.samples(path).map(|map| map.times().collect()).unwrap_or_default()
    }

    fn num_time_samples_for_path(&self, path: &ScenePath) -> usize {
        self.samples(path).map_or(0, |map| map.len())
    }

    fn bracketing_time_samples_for_path(&self, path: &ScenePath, time: f64) -> Option<(f64, f64)> {
        self.samples(path)?.bracketing(time)
    }

    fn previous_time_sample_for_path(&self, path: &ScenePath, time: f64) -> Option<f64> {
        self.samples(path)?.previous(time)
    }

    fn query_time_sample(&self, path: &ScenePath, time: f64) -> Option<Value> {
        self.samples(path)?.get(time).cloned()
    }

    fn set_time_sample(&mut self, path: &ScenePath, time: f64, value: Value) {
        if value.is_empty() {
            self.erase_time_sample(path, time);
            return;
        }
        if !self.table.contains_key(path) {
            error::post_coding_error(format!("no spec at <{path}> when setting time sample"));
            return;
        }
        let mut samples = self.samples(path).unwrap_or_default();
        samples.insert(time, value);
        self.set(path, time_samples_field(), Value::from(samples));
    }

    fn erase_time_sample(&mut self, path: &ScenePath, time: f64) {
        let Some(mut samples) = self.samples(path) else {
            return;
        };
        samples.remove(time);
        if samples.is_empty() {
            self.erase(path, time_samples_field());
        } else {
            self.set(path, time_samples_field(), Value::from(samples));
        }
    }

    fn visit_specs(&self, visitor: &mut dyn SpecVisitor) {
        for path in self.table.keys() {
            if !visitor.visit(self, path) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryAsset;

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn sample_store() -> CrateData {
        let mut data = CrateData::new();
        data.create_spec(&ScenePath::absolute_root(), SpecType::PseudoRoot);
        data.create_spec(&p("/Hello"), SpecType::Prim);
        data.set(&p("/Hello"), Token::new("size"), Value::from(1.0f32));
        data.set_time_sample(&p("/Hello"), 1.0, Value::from(10i32));
        data.set_time_sample(&p("/Hello"), 2.0, Value::from(20i32));
        data
    }

    #[test]
    fn encode_open_round_trip() {
        let original = sample_store();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(&bytes[..12], CRATE_MAGIC);

        let asset: Arc<dyn Asset> = Arc::new(MemoryAsset::new(bytes));
        let reopened = CrateData::open(&asset).unwrap();
        assert!(reopened.streams_data());
        assert!(!reopened.is_detached(), "asset-backed store is attached");
        assert_eq!(reopened.spec_type(&p("/Hello")), SpecType::Prim);
        assert_eq!(reopened.get(&p("/Hello"), Token::new("size")), Value::from(1.0f32));
        assert_eq!(reopened.list_time_samples_for_path(&p("/Hello")), vec![1.0, 2.0]);
        assert!((&original as &dyn AbstractData).equals(&reopened));
    }

    #[test]
    fn detach_materializes_values() {
        let bytes = sample_store().to_bytes().unwrap();
        let asset: Arc<dyn Asset> = Arc::new(MemoryAsset::new(bytes));
        let mut data = CrateData::open(&asset).unwrap();
        data.detach();
        assert!(data.is_detached());
        assert_eq!(data.get(&p("/Hello"), Token::new("size")), Value::from(1.0f32));
    }

    #[test]
    fn edits_overlay_stored_values() {
        let bytes = sample_store().to_bytes().unwrap();
        let asset: Arc<dyn Asset> = Arc::new(MemoryAsset::new(bytes));
        let mut data = CrateData::open(&asset).unwrap();
        data.set(&p("/Hello"), Token::new("size"), Value::from(2.0f32));
        assert_eq!(data.get(&p("/Hello"), Token::new("size")), Value::from(2.0f32));
        // Re-encoding carries the overlay.
        let reread = CrateData::from_bytes(&data.to_bytes().unwrap()).unwrap();
        assert_eq!(reread.get(&p("/Hello"), Token::new("size")), Value::from(2.0f32));
    }

    #[test]
    fn bad_magic_and_future_versions_are_rejected() {
        assert!(matches!(
            CrateData::from_bytes(b"not a crate file at all"),
            Err(Error::Parse(_))
        ));
        let mut bytes = sample_store().to_bytes().unwrap();
        bytes[12] = 99;
        assert!(matches!(
            CrateData::from_bytes(&bytes),
            Err(Error::VersionMismatch { .. })
        ));
    }
}
