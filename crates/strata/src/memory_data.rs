//! The hash-table data store backend.

use ahash::AHashMap;

use crate::{
    abstract_data::{AbstractData, SpecType, SpecVisitor, time_samples_field},
    error,
    path::ScenePath,
    token::Token,
    value::{TimeSampleMap, Value},
};

/// One record: a spec-type tag plus fields in authoring order.
///
/// Fields are a plain vector; records typically hold a handful of fields and
/// linear scans beat hashing at that size.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SpecRecord {
    pub spec_type: SpecType,
    pub fields: Vec<(Token, Value)>,
}

impl SpecRecord {
    pub(crate) fn field(&self, field: Token) -> Option<&Value> {
        self.fields.iter().find(|(name, _)| *name == field).map(|(_, v)| v)
    }

    fn field_mut(&mut self, field: Token) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| *name == field)
            .map(|(_, v)| v)
    }
}

/// In-memory [`AbstractData`] backend: a hash table from path to record.
/// Always detached; never streams.
#[derive(Debug, Default)]
pub struct MemoryData {
    table: AHashMap<ScenePath, SpecRecord>,
}

impl MemoryData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spec records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn samples(&self, path: &ScenePath) -> Option<&TimeSampleMap> {
        self.table.get(path)?.field(time_samples_field())?.get::<TimeSampleMap>()
    }
}

impl AbstractData for MemoryData {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn streams_data(&self) -> bool {
        false
    }

    fn is_detached(&self) -> bool {
        true
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
        self.table.get(path).is_some_and(|r| r.field(field).is_some())
    }

    fn get(&self, path: &ScenePath, field: Token) -> Value {
        self.table
            .get(path)
            .and_then(|r| r.field(field).cloned())
            .unwrap_or(Value::Empty)
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
        match record.field_mut(field) {
            Some(slot) => *slot = value,
            None => record.fields.push((field, value)),
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
            times.extend(self.list_time_samples_for_path(path));
        }
        times.sort_by(f64::total_cmp);
        times.dedup();
        times
    }

    fn list_time_samples_for_path(&self, path: &ScenePath) -> Vec<f64> {
        self.samples(path).map(|map| map.times().collect()).unwrap_or_default()
    }

    fn num_time_samples_for_path(&self, path: &ScenePath) -> usize {
        self.samples(path).map_or(0, TimeSampleMap::len)
    }

    fn bracketing_time_samples_for_path(&self, path: &ScenePath, time: f64) -> Option<(f64, f64)> {
        self.samples(path)?.bracketing(time)
    }

    fn previous_time_sample_for_path(&self, path: &ScenePath, time: f64) -> Option<f64> {
        // Direct ordered-map lookup; the trait's re-bracketing walk is only
        // for backends without one.
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
        let field = time_samples_field();
        let mut samples = self
            .get(path, field)
            .take::<TimeSampleMap>()
            .unwrap_or_default();
        samples.insert(time, value);
        self.set(path, field, Value::from(samples));
    }

    fn erase_time_sample(&mut self, path: &ScenePath, time: f64) {
        let field = time_samples_field();
        let Some(mut samples) = self.get(path, field).take::<TimeSampleMap>() else {
            return;
        };
        samples.remove(time);
        if samples.is_empty() {
            self.erase(path, field);
        } else {
            self.set(path, field, Value::from(samples));
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

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn store_with_prim(path: &str) -> MemoryData {
        let mut data = MemoryData::new();
        data.create_spec(&ScenePath::absolute_root(), SpecType::PseudoRoot);
        data.create_spec(&p(path), SpecType::Prim);
        data
    }

    #[test]
    fn create_and_field_round_trip() {
        let mut data = store_with_prim("/Hello");
        let field = Token::new("size");
        data.set(&p("/Hello"), field, Value::from(1.0f32));
        assert!(data.has(&p("/Hello"), field));
        assert_eq!(data.get(&p("/Hello"), field), Value::from(1.0f32));
        assert_eq!(data.spec_type(&p("/Hello")), SpecType::Prim);
        assert_eq!(data.list(&p("/Hello")), vec![field]);

        // Setting an empty value erases.
        data.set(&p("/Hello"), field, Value::Empty);
        assert!(!data.has(&p("/Hello"), field));
    }

    #[test]
    fn set_without_spec_is_a_coding_error() {
        let collector = error::DiagnosticCollector::new();
        let mut data = MemoryData::new();
        data.set(&p("/Nowhere"), Token::new("x"), Value::from(1i32));
        assert!(!data.has(&p("/Nowhere"), Token::new("x")));
        assert_eq!(collector.take().len(), 1);
    }

    #[test]
    fn move_spec_requires_absent_destination() {
        let mut data = store_with_prim("/A");
        data.create_spec(&p("/B"), SpecType::Prim);
        let collector = error::DiagnosticCollector::new();
        data.move_spec(&p("/A"), &p("/B"));
        assert_eq!(collector.take().len(), 1, "occupied destination is a coding error");
        data.move_spec(&p("/A"), &p("/C"));
        assert!(!data.has_spec(&p("/A")));
        assert!(data.has_spec(&p("/C")));
    }

    #[test]
    fn time_sample_contract() {
        let mut data = store_with_prim("/P");
        let path = p("/P");
        data.set_time_sample(&path, 1.0, Value::from(10i32));
        data.set_time_sample(&path, 2.0, Value::from(20i32));
        assert_eq!(data.list_time_samples_for_path(&path), vec![1.0, 2.0]);
        assert_eq!(data.num_time_samples_for_path(&path), 2);
        assert_eq!(data.bracketing_time_samples_for_path(&path, 1.5), Some((1.0, 2.0)));
        assert_eq!(data.bracketing_time_samples_for_path(&path, 0.5), Some((1.0, 1.0)));
        assert_eq!(data.bracketing_time_samples_for_path(&path, 2.5), Some((2.0, 2.0)));
        assert_eq!(data.query_time_sample(&path, 2.0), Some(Value::from(20i32)));
        assert_eq!(data.query_time_sample(&path, 1.5), None);

        // Erasing the last sample removes the field entirely.
        data.erase_time_sample(&path, 1.0);
        data.set_time_sample(&path, 2.0, Value::Empty);
        assert!(!data.has(&path, time_samples_field()));
    }

    #[test]
    fn previous_time_sample_direct_lookup() {
        let mut data = store_with_prim("/P");
        let path = p("/P");
        for t in [1.0, 2.0] {
            data.set_time_sample(&path, t, Value::from(t));
        }
        assert_eq!(data.previous_time_sample_for_path(&path, 1.0), None);
        assert_eq!(data.previous_time_sample_for_path(&path, 1.5), Some(1.0));
        assert_eq!(data.previous_time_sample_for_path(&path, 2.0), Some(1.0));
        assert_eq!(data.previous_time_sample_for_path(&path, 10.0), Some(2.0));
    }

    #[test]
    fn dict_key_helpers_via_trait_object() {
        let mut data = store_with_prim("/P");
        let data: &mut dyn AbstractData = &mut data;
        let path = p("/P");
        let field = Token::new("customData");
        data.set_dict_value_by_key(&path, field, "a.b", Value::from(5i32));
        assert!(data.has_dict_key(&path, field, "a.b"));
        assert_eq!(data.get_dict_value_by_key(&path, field, "a.b"), Some(Value::from(5i32)));
        assert_eq!(data.list_dict_keys(&path, field), vec!["a".to_owned()]);
        // Erasing the only key erases the field.
        data.erase_dict_value_by_key(&path, field, "a.b");
        assert!(!data.has(&path, field));
    }

    #[test]
    fn equals_and_dump_are_deterministic() {
        let mut a = store_with_prim("/X");
        a.set(&p("/X"), Token::new("f"), Value::from(1i32));
        let mut b = store_with_prim("/X");
        b.set(&p("/X"), Token::new("f"), Value::from(1i32));
        assert!((&a as &dyn AbstractData).equals(&b));
        b.set(&p("/X"), Token::new("f"), Value::from(2i32));
        assert!(!(&a as &dyn AbstractData).equals(&b));

        let mut out = Vec::new();
        (&a as &dyn AbstractData).write_to_stream(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("</X> : Prim"), "dump lists specs: {text}");
    }
}
