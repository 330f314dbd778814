//! Layers: the root containers of scene description.
//!
//! A layer owns exactly one data store plus its identity: identifier,
//! resolved path, file format, permissions, version, and the sublayer list.
//! All reads and writes flow through the layer; every mutator opens a change
//! block, performs the edit, posts an event, and marks the layer dirty.
//! Layers are registered process-wide by identifier; user code holds
//! [`LayerHandle`]s and spec facades re-resolve through weak handles.
//!
//! Spec creation and removal maintain the children lists on parent specs
//! (prim children, properties, variant sets, connection and relationship
//! targets), so the data store's records and the name hierarchy never
//! disagree.

use std::sync::{
    Arc, LazyLock, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    atomic::{AtomicU64, Ordering},
};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    abstract_data::{AbstractData, SpecType, collect_spec_paths},
    change::{ChangeBlock, ChangeEvent, ChangeKind, queue_event},
    error::{self, Error},
    file_format::{self, FileFormat},
    file_version::FileVersion,
    list_op::ListOp,
    memory_data::MemoryData,
    path::{PathPart, ScenePath},
    resolver::default_resolver,
    token::{FieldKey, Token},
    types::{LayerOffset, Payload, Reference},
    value::{Value, ValueType},
};

/// Strong reference to a layer.
pub type LayerHandle = Arc<Layer>;
/// Expirable reference to a layer, as held by spec facades.
pub type LayerWeakHandle = Weak<Layer>;

/// Marker between an asset path and its format arguments in an identifier.
pub const FORMAT_ARGS_MARKER: &str = ":SDF_FORMAT_ARGS:";
/// Prefix of anonymous layer identifiers.
pub const ANONYMOUS_PREFIX: &str = "anon:";

static REGISTRY: LazyLock<Mutex<AHashMap<String, LayerHandle>>> =
    LazyLock::new(|| Mutex::new(AHashMap::new()));
static MUTED: LazyLock<Mutex<AHashSet<String>>> = LazyLock::new(|| Mutex::new(AHashSet::new()));
static ANON_COUNTER: AtomicU64 = AtomicU64::new(1);

// ----------------------------------------------------------------------
// Identifier grammar

/// True for `anon:HEX[:TAG]` identifiers. An identifier carrying format
/// arguments is never anonymous.
#[must_use]
pub fn is_anonymous_layer_identifier(identifier: &str) -> bool {
    identifier.starts_with(ANONYMOUS_PREFIX) && !identifier.contains(FORMAT_ARGS_MARKER)
}

/// Splits an identifier into its asset path and format arguments, which are
/// preserved exactly as given.
#[must_use]
pub fn split_layer_identifier(identifier: &str) -> (String, IndexMap<String, String>) {
    let Some((path, args_text)) = identifier.split_once(FORMAT_ARGS_MARKER) else {
        return (identifier.to_owned(), IndexMap::new());
    };
    let mut args = IndexMap::new();
    for pair in args_text.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => args.insert(key.to_owned(), value.to_owned()),
            None => args.insert(pair.to_owned(), String::new()),
        };
    }
    (path.to_owned(), args)
}

/// Joins an asset path and format arguments back into an identifier.
#[must_use]
pub fn join_layer_identifier(path: &str, args: &IndexMap<String, String>) -> String {
    if args.is_empty() {
        return path.to_owned();
    }
    let args_text: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}{FORMAT_ARGS_MARKER}{}", args_text.join("&"))
}

fn new_anonymous_identifier(tag: &str) -> String {
    let serial = ANON_COUNTER.fetch_add(1, Ordering::Relaxed);
    if tag.is_empty() {
        format!("{ANONYMOUS_PREFIX}{serial:08X}")
    } else {
        format!("{ANONYMOUS_PREFIX}{serial:08X}:{tag}")
    }
}

// ----------------------------------------------------------------------
// Layer

struct LayerState {
    identifier: String,
    resolved_path: String,
    format: Arc<dyn FileFormat>,
    data: Box<dyn AbstractData>,
    /// Data parked aside while the layer is muted (non-streaming backends).
    parked_data: Option<Box<dyn AbstractData>>,
    dirty: bool,
    permission_to_edit: bool,
    permission_to_save: bool,
    version: FileVersion,
}

/// A scene-description layer; see the module docs.
pub struct Layer {
    state: RwLock<LayerState>,
}

fn empty_store() -> Box<dyn AbstractData> {
    let mut data = MemoryData::new();
    data.create_spec(&ScenePath::absolute_root(), SpecType::PseudoRoot);
    Box::new(data)
}

impl Layer {
    fn register(state: LayerState) -> LayerHandle {
        let identifier = state.identifier.clone();
        let handle = Arc::new(Self {
            state: RwLock::new(state),
        });
        REGISTRY
            .lock()
            .expect("layer registry poisoned")
            .insert(identifier, Arc::clone(&handle));
        handle
    }

    /// Creates a new, empty, dirty layer registered under `identifier`.
    /// Fails if the identifier is already registered.
    pub fn create_new(identifier: &str) -> Option<LayerHandle> {
        if Self::find(identifier).is_some() {
            error::post_coding_error(format!("layer {identifier:?} already exists"));
            return None;
        }
        let (path, _args) = split_layer_identifier(identifier);
        let format = file_format::format_for_path(&path).unwrap_or_else(file_format::text_format);
        tracing::debug!(target: "strata::layer", identifier, "create new layer");
        Some(Self::register(LayerState {
            identifier: identifier.to_owned(),
            resolved_path: path,
            format,
            data: empty_store(),
            parked_data: None,
            dirty: true,
            permission_to_edit: true,
            permission_to_save: true,
            version: FileVersion::default(),
        }))
    }

    /// Creates a new, empty layer with a fresh anonymous identifier. The tag
    /// is for display only.
    pub fn create_anonymous(tag: &str) -> LayerHandle {
        Self::create_anonymous_with_format(tag, file_format::text_format())
    }

    /// [`create_anonymous`](Self::create_anonymous) with an explicit format.
    pub fn create_anonymous_with_format(tag: &str, format: Arc<dyn FileFormat>) -> LayerHandle {
        Self::register(LayerState {
            identifier: new_anonymous_identifier(tag),
            resolved_path: String::new(),
            format,
            data: empty_store(),
            parked_data: None,
            dirty: true,
            permission_to_edit: true,
            permission_to_save: true,
            version: FileVersion::default(),
        })
    }

    /// Registry lookup; never touches the filesystem.
    #[must_use]
    pub fn find(identifier: &str) -> Option<LayerHandle> {
        REGISTRY
            .lock()
            .expect("layer registry poisoned")
            .get(identifier)
            .cloned()
    }

    /// Registry lookup, falling back to opening the layer from its source.
    /// Returns `None` (with a diagnostic) when the asset cannot be opened.
    pub fn find_or_open(identifier: &str) -> Option<LayerHandle> {
        if let Some(existing) = Self::find(identifier) {
            return Some(existing);
        }
        Self::open_impl(identifier, identifier.to_owned(), false)
    }

    /// Opens the layer at `path` but registers it under a fresh anonymous
    /// identifier.
    pub fn open_as_anonymous(path: &str, metadata_only: bool, tag: &str) -> Option<LayerHandle> {
        Self::open_impl(path, new_anonymous_identifier(tag), metadata_only)
    }

    fn open_impl(source: &str, register_as: String, metadata_only: bool) -> Option<LayerHandle> {
        let (path, _args) = split_layer_identifier(source);
        let Some(resolved) = default_resolver().resolve(&path) else {
            error::post_runtime_error(format!("cannot resolve layer {path:?}"));
            return None;
        };
        let format = file_format::format_for_path(&resolved)?;
        let (data, version) = match format.read(&resolved, metadata_only) {
            Ok(read) => read,
            Err(err) => {
                error::post(err);
                return None;
            }
        };
        tracing::debug!(target: "strata::layer", identifier = register_as, resolved, "opened layer");
        let handle = Self::register(LayerState {
            identifier: register_as,
            resolved_path: resolved,
            format,
            data,
            parked_data: None,
            dirty: false,
            permission_to_edit: true,
            permission_to_save: true,
            version,
        });
        if handle.is_muted() {
            handle.park_for_muting();
        }
        Some(handle)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LayerState> {
        self.state.read().expect("layer lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LayerState> {
        self.state.write().expect("layer lock poisoned")
    }

    // ------------------------------------------------------------------
    // Identity

    /// The identifier this layer is registered under.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.read_state().identifier.clone()
    }

    /// Re-registers the layer under a new identifier.
    pub fn set_identifier(&self, new_identifier: &str) -> bool {
        if Self::find(new_identifier).is_some() {
            error::post_coding_error(format!("layer {new_identifier:?} already exists"));
            return false;
        }
        let old = {
            let mut state = self.write_state();
            let old = std::mem::replace(&mut state.identifier, new_identifier.to_owned());
            let (path, _args) = split_layer_identifier(new_identifier);
            if !is_anonymous_layer_identifier(new_identifier) {
                state.resolved_path = path;
            }
            old
        };
        let mut registry = REGISTRY.lock().expect("layer registry poisoned");
        if let Some(handle) = registry.remove(&old) {
            registry.insert(new_identifier.to_owned(), handle);
        }
        true
    }

    /// The resolved filesystem or package-relative path, when any.
    #[must_use]
    pub fn resolved_path(&self) -> String {
        self.read_state().resolved_path.clone()
    }

    /// Stable identifier of the layer's file format.
    #[must_use]
    pub fn file_format_id(&self) -> &'static str {
        self.read_state().format.format_id()
    }

    /// The format arguments carried by the identifier.
    #[must_use]
    pub fn file_format_arguments(&self) -> IndexMap<String, String> {
        split_layer_identifier(&self.identifier()).1
    }

    /// True for anonymous layers.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        is_anonymous_layer_identifier(&self.read_state().identifier)
    }

    /// The version last read from or written to the layer's source.
    #[must_use]
    pub fn version(&self) -> FileVersion {
        self.read_state().version
    }

    /// True when in-memory state differs from the layer's source.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.read_state().dirty
    }

    /// True when the layer holds nothing beyond its pseudo-root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.read_state();
        let mut count = 0usize;
        let mut counter = |_: &dyn AbstractData, _: &ScenePath| {
            count += 1;
            count <= 1
        };
        state.data.visit_specs(&mut counter);
        count <= 1
    }

    // ------------------------------------------------------------------
    // Permissions

    /// Whether edits are currently allowed.
    #[must_use]
    pub fn permission_to_edit(&self) -> bool {
        self.read_state().permission_to_edit
    }

    pub fn set_permission_to_edit(&self, allow: bool) {
        self.write_state().permission_to_edit = allow;
    }

    /// Whether saves are currently allowed.
    #[must_use]
    pub fn permission_to_save(&self) -> bool {
        self.read_state().permission_to_save
    }

    pub fn set_permission_to_save(&self, allow: bool) {
        self.write_state().permission_to_save = allow;
    }

    fn check_edit(&self) -> bool {
        if self.permission_to_edit() {
            true
        } else {
            error::post_coding_error(format!(
                "layer {:?} is not editable",
                self.read_state().identifier
            ));
            false
        }
    }

    // ------------------------------------------------------------------
    // Muting

    /// The identifiers currently muted, process-wide.
    #[must_use]
    pub fn muted_layers() -> Vec<String> {
        let mut muted: Vec<String> = MUTED
            .lock()
            .expect("muted set poisoned")
            .iter()
            .cloned()
            .collect();
        muted.sort();
        muted
    }

    /// True if this layer's identifier is muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        MUTED
            .lock()
            .expect("muted set poisoned")
            .contains(&self.identifier())
    }

    /// Adds an identifier to the muted set and empties any registered layer
    /// carrying it. The layer is not destroyed; unmuting restores it.
    pub fn add_muted_layer(identifier: &str) {
        let newly = MUTED
            .lock()
            .expect("muted set poisoned")
            .insert(identifier.to_owned());
        if !newly {
            return;
        }
        if let Some(layer) = Self::find(identifier) {
            layer.park_for_muting();
        }
    }

    /// Removes an identifier from the muted set and restores any registered
    /// layer carrying it.
    pub fn remove_muted_layer(identifier: &str) {
        let was = MUTED
            .lock()
            .expect("muted set poisoned")
            .remove(identifier);
        if !was {
            return;
        }
        if let Some(layer) = Self::find(identifier) {
            layer.restore_from_muting();
        }
    }

    fn park_for_muting(&self) {
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            let replaced = std::mem::replace(&mut state.data, empty_store());
            // Streaming stores are cheap to re-open; drop them instead of
            // parking and reload on unmute.
            if !replaced.streams_data() {
                state.parked_data = Some(replaced);
            }
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::MutenessChanged,
        });
    }

    fn restore_from_muting(&self) {
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            if let Some(parked) = state.parked_data.take() {
                state.data = parked;
            } else if !state.resolved_path.is_empty() {
                match state.format.read(&state.resolved_path, false) {
                    Ok((data, version)) => {
                        state.data = data;
                        state.version = version;
                    }
                    Err(err) => error::post(err),
                }
            }
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::MutenessChanged,
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle

    /// Re-reads content from the layer's source. Dirty layers refuse unless
    /// `force`; anonymous layers cannot reload.
    pub fn reload(&self, force: bool) -> bool {
        if self.is_anonymous() {
            error::post_coding_error("anonymous layers cannot be reloaded");
            return false;
        }
        if self.is_dirty() && !force {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            match state.format.read(&state.resolved_path, false) {
                Ok((data, version)) => {
                    state.data = data;
                    state.version = version;
                    state.dirty = false;
                }
                Err(err) => {
                    error::post(err);
                    return false;
                }
            }
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::LayerReloaded,
        });
        true
    }

    /// Serializes to the layer's source. Clean layers are a no-op unless
    /// `force`.
    pub fn save(&self, force: bool) -> bool {
        if !self.permission_to_save() {
            error::post_coding_error(format!("layer {:?} is not savable", self.identifier()));
            return false;
        }
        if self.is_anonymous() {
            error::post_coding_error("anonymous layers have no save location; use export");
            return false;
        }
        if !self.is_dirty() && !force {
            return true;
        }
        let mut state = self.write_state();
        let result = state.format.save_to_file(state.data.as_ref(), &state.resolved_path.clone());
        match result {
            Ok(()) => {
                state.dirty = false;
                true
            }
            Err(err) => {
                error::post(err);
                false
            }
        }
    }

    /// Serializes to an arbitrary path, chosen format by extension.
    pub fn export(&self, path: &str, comment: Option<&str>) -> bool {
        let Some(format) = file_format::format_for_path(path) else {
            error::post_coding_error(format!("no file format for {path:?}"));
            return false;
        };
        let state = self.read_state();
        match format.write_to_file(state.data.as_ref(), path, comment) {
            Ok(()) => true,
            Err(err) => {
                error::post(err);
                false
            }
        }
    }

    /// Serializes to the text format, whatever the layer's own format.
    pub fn export_to_string(&self) -> error::Result<String> {
        let state = self.read_state();
        file_format::text_format().write_to_string(state.data.as_ref(), None)
    }

    /// Replaces content from a text-format string.
    pub fn import_from_string(&self, text: &str) -> bool {
        if !self.check_edit() {
            return false;
        }
        let (data, version) = match file_format::text_format().read_from_string(text) {
            Ok(read) => read,
            Err(err) => {
                error::post(err);
                return false;
            }
        };
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data = data;
            state.version = version;
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::ContentReplaced,
        });
        true
    }

    /// Replaces this layer's content with a copy of `source`'s content,
    /// keeping this layer's identity.
    pub fn transfer_content(&self, source: &Layer) -> bool {
        if !self.check_edit() {
            return false;
        }
        let copy: Box<dyn AbstractData> = {
            let source_state = source.read_state();
            let mut copy = MemoryData::new();
            for path in collect_spec_paths(source_state.data.as_ref()) {
                copy.create_spec(&path, source_state.data.spec_type(&path));
                for field in source_state.data.list(&path) {
                    copy.set(&path, field, source_state.data.get(&path, field));
                }
            }
            Box::new(copy)
        };
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data = copy;
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::ContentReplaced,
        });
        true
    }

    /// Removes every spec, leaving just the pseudo-root.
    pub fn clear(&self) -> bool {
        if !self.check_edit() {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data = empty_store();
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: ScenePath::absolute_root(),
            change: ChangeKind::ContentReplaced,
        });
        true
    }

    // ------------------------------------------------------------------
    // Field access

    /// True if a spec exists at `path`.
    #[must_use]
    pub fn has_spec(&self, path: &ScenePath) -> bool {
        self.read_state().data.has_spec(path)
    }

    /// The spec type at `path`, or `Unknown`.
    #[must_use]
    pub fn spec_type(&self, path: &ScenePath) -> SpecType {
        self.read_state().data.spec_type(path)
    }

    /// The field names authored at `path`.
    #[must_use]
    pub fn list_fields(&self, path: &ScenePath) -> Vec<Token> {
        self.read_state().data.list(path)
    }

    /// True if `field` is authored at `path`.
    #[must_use]
    pub fn has_field(&self, path: &ScenePath, field: Token) -> bool {
        self.read_state().data.has(path, field)
    }

    /// The value of `field` at `path`, or empty.
    #[must_use]
    pub fn get_field(&self, path: &ScenePath, field: Token) -> Value {
        self.read_state().data.get(path, field)
    }

    /// Typed read of `field` at `path`.
    #[must_use]
    pub fn get_field_as<T: ValueType>(&self, path: &ScenePath, field: Token) -> Option<T> {
        self.get_field(path, field).take::<T>()
    }

    /// Writes `field` at `path`. Empty values erase. Fails on missing spec
    /// or read-only layer.
    pub fn set_field(&self, path: &ScenePath, field: Token, value: Value) -> bool {
        if !self.check_edit() {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            if !value.is_empty() && !state.data.has_spec(path) {
                error::post_coding_error(format!("no spec at <{path}> to set field '{field}' on"));
                return false;
            }
            state.data.set(path, field, value);
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::FieldChanged(field),
        });
        true
    }

    /// Removes `field` at `path`.
    pub fn erase_field(&self, path: &ScenePath, field: Token) -> bool {
        if !self.check_edit() {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data.erase(path, field);
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::FieldChanged(field),
        });
        true
    }

    /// Reads one entry of a dictionary-valued field by dotted key path.
    #[must_use]
    pub fn get_field_dict_value_by_key(&self, path: &ScenePath, field: Token, key_path: &str) -> Option<Value> {
        self.read_state().data.get_dict_value_by_key(path, field, key_path)
    }

    /// Writes one entry of a dictionary-valued field by dotted key path.
    pub fn set_field_dict_value_by_key(
        &self,
        path: &ScenePath,
        field: Token,
        key_path: &str,
        value: Value,
    ) -> bool {
        if !self.check_edit() {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data.set_dict_value_by_key(path, field, key_path, value);
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::FieldChanged(field),
        });
        true
    }

    // ------------------------------------------------------------------
    // Time samples

    /// Sample times authored at `path`.
    #[must_use]
    pub fn list_time_samples_for_path(&self, path: &ScenePath) -> Vec<f64> {
        self.read_state().data.list_time_samples_for_path(path)
    }

    /// Number of samples at `path`.
    #[must_use]
    pub fn num_time_samples_for_path(&self, path: &ScenePath) -> usize {
        self.read_state().data.num_time_samples_for_path(path)
    }

    /// Bracketing sample times at `path`.
    #[must_use]
    pub fn bracketing_time_samples_for_path(&self, path: &ScenePath, time: f64) -> Option<(f64, f64)> {
        self.read_state().data.bracketing_time_samples_for_path(path, time)
    }

    /// The greatest sample time strictly before `time` at `path`.
    #[must_use]
    pub fn previous_time_sample_for_path(&self, path: &ScenePath, time: f64) -> Option<f64> {
        self.read_state().data.previous_time_sample_for_path(path, time)
    }

    /// The value sampled exactly at `time`.
    #[must_use]
    pub fn query_time_sample(&self, path: &ScenePath, time: f64) -> Option<Value> {
        self.read_state().data.query_time_sample(path, time)
    }

    /// Authors a sample at `path`. Empty values erase the sample.
    pub fn set_time_sample(&self, path: &ScenePath, time: f64, value: Value) -> bool {
        if !self.check_edit() {
            return false;
        }
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            state.data.set_time_sample(path, time, value);
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::TimeSamplesChanged,
        });
        true
    }

    /// Removes the sample at `time`.
    pub fn erase_time_sample(&self, path: &ScenePath, time: f64) -> bool {
        self.set_time_sample(path, time, Value::Empty)
    }

    // ------------------------------------------------------------------
    // Pseudo-root conveniences

    /// The layer's default prim, or the empty path.
    #[must_use]
    pub fn default_prim(&self) -> ScenePath {
        self.get_field_as::<ScenePath>(&ScenePath::absolute_root(), FieldKey::DefaultPrim.token())
            .unwrap_or_default()
    }

    /// Sets (or, with the empty path, clears) the default prim.
    pub fn set_default_prim(&self, prim: &ScenePath) -> bool {
        let field = FieldKey::DefaultPrim.token();
        let root = ScenePath::absolute_root();
        if prim.is_empty() {
            self.erase_field(&root, field)
        } else {
            self.set_field(&root, field, Value::from(prim.clone()))
        }
    }

    /// The ordered sublayer identifier list.
    #[must_use]
    pub fn sublayer_paths(&self) -> Vec<String> {
        self.get_field_as::<Vec<String>>(&ScenePath::absolute_root(), FieldKey::SubLayers.token())
            .unwrap_or_default()
    }

    /// The per-sublayer time offsets; always the same length as
    /// [`sublayer_paths`](Self::sublayer_paths).
    #[must_use]
    pub fn sublayer_offsets(&self) -> Vec<LayerOffset> {
        let offsets = self
            .get_field_as::<Vec<LayerOffset>>(&ScenePath::absolute_root(), FieldKey::SubLayerOffsets.token())
            .unwrap_or_default();
        let paths = self.sublayer_paths().len();
        // The pairing invariant is maintained by every mutator; re-assert it
        // on read in case a raw field edit bypassed them.
        let mut offsets = offsets;
        offsets.resize(paths, LayerOffset::identity());
        offsets
    }

    fn write_sublayers(&self, paths: Vec<String>, offsets: Vec<LayerOffset>) -> bool {
        debug_assert_eq!(paths.len(), offsets.len());
        let root = ScenePath::absolute_root();
        if paths.is_empty() {
            self.erase_field(&root, FieldKey::SubLayers.token())
                && self.erase_field(&root, FieldKey::SubLayerOffsets.token())
        } else {
            self.set_field(&root, FieldKey::SubLayers.token(), Value::from(paths))
                && self.set_field(&root, FieldKey::SubLayerOffsets.token(), Value::from(offsets))
        }
    }

    /// Replaces the whole sublayer list; offsets reset to identity.
    pub fn set_sublayer_paths(&self, paths: Vec<String>) -> bool {
        let offsets = vec![LayerOffset::identity(); paths.len()];
        self.write_sublayers(paths, offsets)
    }

    /// Inserts a sublayer at `index` with an identity offset.
    pub fn insert_sublayer_path(&self, index: usize, path: &str) -> bool {
        let mut paths = self.sublayer_paths();
        let mut offsets = self.sublayer_offsets();
        if index > paths.len() {
            error::post_coding_error(format!("sublayer index {index} out of range"));
            return false;
        }
        paths.insert(index, path.to_owned());
        offsets.insert(index, LayerOffset::identity());
        self.write_sublayers(paths, offsets)
    }

    /// Removes the sublayer at `index` together with its offset.
    pub fn remove_sublayer_path(&self, index: usize) -> bool {
        let mut paths = self.sublayer_paths();
        let mut offsets = self.sublayer_offsets();
        if index >= paths.len() {
            error::post_coding_error(format!("sublayer index {index} out of range"));
            return false;
        }
        paths.remove(index);
        offsets.remove(index);
        self.write_sublayers(paths, offsets)
    }

    /// Sets the time offset of the sublayer at `index`.
    pub fn set_sublayer_offset(&self, index: usize, offset: LayerOffset) -> bool {
        let paths = self.sublayer_paths();
        let mut offsets = self.sublayer_offsets();
        if index >= paths.len() {
            error::post_coding_error(format!("sublayer index {index} out of range"));
            return false;
        }
        offsets[index] = offset;
        self.write_sublayers(paths, offsets)
    }

    /// The names of root prims in namespace order.
    #[must_use]
    pub fn root_prim_names(&self) -> Vec<Token> {
        self.get_field_as::<Vec<Token>>(&ScenePath::absolute_root(), FieldKey::PrimChildren.token())
            .unwrap_or_default()
    }

    /// Reorders root prims; names absent from the layer are ignored.
    pub fn apply_root_prim_order(&self, order: &[Token]) -> bool {
        let mut names = self.root_prim_names();
        crate::list_op::apply_list_ordering(&mut names, order);
        self.set_field(
            &ScenePath::absolute_root(),
            FieldKey::PrimChildren.token(),
            Value::from(names),
        )
    }

    // ------------------------------------------------------------------
    // Spec management

    /// Every spec path in the layer, sorted.
    #[must_use]
    pub fn spec_paths(&self) -> Vec<ScenePath> {
        collect_spec_paths(self.read_state().data.as_ref())
    }

    /// Creates a spec at `path`, linking it into its parent's children
    /// list. The parent spec must already exist (the pseudo-root is created
    /// on demand).
    pub fn create_spec(&self, path: &ScenePath, spec_type: SpecType) -> bool {
        if !self.check_edit() {
            return false;
        }
        let Some(linkage) = ChildLinkage::for_path(path) else {
            error::post_coding_error(format!("cannot create spec at <{path}>"));
            return false;
        };
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            if state.data.has_spec(path) {
                // Overwrite the spec type in place; children stay linked.
                state.data.create_spec(path, spec_type);
                state.dirty = true;
            } else {
                if !state.data.has_spec(&linkage.parent) {
                    if linkage.parent.is_absolute_root() {
                        state.data.create_spec(&linkage.parent, SpecType::PseudoRoot);
                    } else {
                        error::post_coding_error(format!(
                            "cannot create spec at <{path}>: no parent spec at <{}>",
                            linkage.parent
                        ));
                        return false;
                    }
                }
                linkage.link(state.data.as_mut());
                state.data.create_spec(path, spec_type);
                state.dirty = true;
            }
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::SpecCreated,
        });
        true
    }

    /// Removes the spec at `path`, its whole subtree, and its entry in the
    /// parent's children list.
    pub fn remove_spec(&self, path: &ScenePath) -> bool {
        if !self.check_edit() {
            return false;
        }
        let Some(linkage) = ChildLinkage::for_path(path) else {
            error::post_coding_error(format!("cannot remove spec at <{path}>"));
            return false;
        };
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            if !state.data.has_spec(path) {
                error::post_coding_error(format!("no spec to remove at <{path}>"));
                return false;
            }
            let subtree = collect_spec_subtree(state.data.as_ref(), path);
            for spec in subtree.iter().rev() {
                state.data.erase_spec(spec);
            }
            linkage.unlink(state.data.as_mut());
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: path.clone(),
            change: ChangeKind::SpecRemoved,
        });
        true
    }

    /// Renames the spec at `path`, moving its whole subtree. Fails if a
    /// sibling already carries the new name.
    pub fn rename_spec(&self, path: &ScenePath, new_name: Token) -> bool {
        let new_path = path.replace_name(new_name);
        if new_path.is_empty() {
            return false;
        }
        self.move_spec_subtree(path, &new_path, None)
    }

    /// Moves the spec subtree at `from` to `to`, relinking parents'
    /// children lists. `index` positions the entry in the new parent's list;
    /// with `None`, renames within one parent keep their position and moves
    /// across parents append. The destination must be absent.
    pub fn move_spec_subtree(&self, from: &ScenePath, to: &ScenePath, index: Option<usize>) -> bool {
        if !self.check_edit() {
            return false;
        }
        if from == to {
            return true;
        }
        if to.has_prefix(from) {
            error::post_coding_error(format!("cannot move spec <{from}> into its own subtree <{to}>"));
            return false;
        }
        let (Some(from_linkage), Some(to_linkage)) = (ChildLinkage::for_path(from), ChildLinkage::for_path(to))
        else {
            error::post_coding_error(format!("cannot move spec <{from}> to <{to}>"));
            return false;
        };
        let _block = ChangeBlock::new();
        let identifier;
        {
            let mut state = self.write_state();
            identifier = state.identifier.clone();
            if !state.data.has_spec(from) {
                error::post_coding_error(format!("no spec to move at <{from}>"));
                return false;
            }
            if state.data.has_spec(to) {
                error::post_coding_error(format!("cannot move spec onto existing <{to}>"));
                return false;
            }
            if !state.data.has_spec(&to_linkage.parent) {
                error::post_coding_error(format!("no parent spec at <{}>", to_linkage.parent));
                return false;
            }
            // Renames within one parent keep the child's position.
            let index = index.or_else(|| {
                (from_linkage.parent == to_linkage.parent)
                    .then(|| from_linkage.position(state.data.as_ref()))
                    .flatten()
            });
            let subtree = collect_spec_subtree(state.data.as_ref(), from);
            from_linkage.unlink(state.data.as_mut());
            to_linkage.link_at(state.data.as_mut(), index);
            for spec in &subtree {
                let target = spec.replace_prefix(from, to);
                state.data.move_spec(spec, &target);
            }
            state.dirty = true;
        }
        queue_event(ChangeEvent {
            layer: identifier,
            path: from.clone(),
            change: ChangeKind::SpecMoved { new_path: to.clone() },
        });
        true
    }

    /// Runs `f` with read access to the underlying data store.
    pub fn with_data<R>(&self, f: impl FnOnce(&dyn AbstractData) -> R) -> R {
        f(self.read_state().data.as_ref())
    }

    // ------------------------------------------------------------------
    // External references

    /// Sublayer identifiers plus every reference and payload asset path.
    #[must_use]
    pub fn get_composition_asset_dependencies(&self) -> Vec<String> {
        let mut dependencies = self.sublayer_paths();
        let state = self.read_state();
        for path in collect_spec_paths(state.data.as_ref()) {
            if let Some(refs) = state
                .data
                .get(&path, FieldKey::References.token())
                .take::<ListOp<Reference>>()
            {
                collect_arc_assets(&refs, |r| &r.asset_path, &mut dependencies);
            }
            if let Some(payloads) = state
                .data
                .get(&path, FieldKey::Payload.token())
                .take::<ListOp<Payload>>()
            {
                collect_arc_assets(&payloads, |p| &p.asset_path, &mut dependencies);
            }
        }
        dedup_preserving_order(dependencies)
    }

    /// All external references: composition dependencies under their
    /// conventional name.
    #[must_use]
    pub fn get_external_references(&self) -> Vec<String> {
        self.get_composition_asset_dependencies()
    }

    /// Composition dependencies plus every asset-valued field.
    #[must_use]
    pub fn get_external_asset_dependencies(&self) -> Vec<String> {
        let mut dependencies = self.get_composition_asset_dependencies();
        let state = self.read_state();
        for path in collect_spec_paths(state.data.as_ref()) {
            for field in state.data.list(&path) {
                match state.data.get(&path, field) {
                    Value::Asset(asset) => dependencies.push(asset.authored),
                    Value::AssetArray(assets) => {
                        dependencies.extend(assets.into_iter().map(|a| a.authored));
                    }
                    _ => {}
                }
            }
        }
        dedup_preserving_order(dependencies)
    }

    /// Rewrites one external reference everywhere it appears: sublayers,
    /// references, and payloads. An empty `new_url` removes it.
    pub fn update_external_reference(&self, old_url: &str, new_url: &str) -> bool {
        if !self.check_edit() {
            return false;
        }
        if old_url.is_empty() {
            error::post_coding_error("update_external_reference requires a non-empty source");
            return false;
        }
        let _block = ChangeBlock::new();

        // Sublayers.
        let mut paths = self.sublayer_paths();
        let mut offsets = self.sublayer_offsets();
        let mut changed = false;
        let mut index = 0;
        while index < paths.len() {
            if paths[index] == old_url {
                changed = true;
                if new_url.is_empty() {
                    paths.remove(index);
                    offsets.remove(index);
                    continue;
                }
                paths[index] = new_url.to_owned();
            }
            index += 1;
        }
        if changed {
            self.write_sublayers(paths, offsets);
        }

        // References and payloads.
        for path in self.spec_paths() {
            let refs_field = FieldKey::References.token();
            if let Some(mut refs) = self.get_field_as::<ListOp<Reference>>(&path, refs_field) {
                let modified = refs.modify(|r| {
                    if r.asset_path == old_url {
                        if new_url.is_empty() {
                            return None;
                        }
                        let mut updated = r.clone();
                        updated.asset_path = new_url.to_owned();
                        return Some(updated);
                    }
                    Some(r.clone())
                });
                if modified {
                    self.set_field(&path, refs_field, Value::from(refs));
                }
            }
            let payload_field = FieldKey::Payload.token();
            if let Some(mut payloads) = self.get_field_as::<ListOp<Payload>>(&path, payload_field) {
                let modified = payloads.modify(|p| {
                    if p.asset_path == old_url {
                        if new_url.is_empty() {
                            return None;
                        }
                        let mut updated = p.clone();
                        updated.asset_path = new_url.to_owned();
                        return Some(updated);
                    }
                    Some(p.clone())
                });
                if modified {
                    self.set_field(&path, payload_field, Value::from(payloads));
                }
            }
        }
        true
    }
}

fn collect_arc_assets<T: Clone + PartialEq>(
    op: &ListOp<T>,
    asset_of: impl Fn(&T) -> &String,
    out: &mut Vec<String>,
) {
    for slot in [
        crate::list_op::ListOpSlot::Explicit,
        crate::list_op::ListOpSlot::Added,
        crate::list_op::ListOpSlot::Prepended,
        crate::list_op::ListOpSlot::Appended,
        crate::list_op::ListOpSlot::Ordered,
    ] {
        for item in op.items(slot) {
            let asset = asset_of(item);
            if !asset.is_empty() {
                out.push(asset.clone());
            }
        }
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = AHashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

// ----------------------------------------------------------------------
// Children linkage

/// How a spec hangs off its parent: which parent spec, which children
/// field, and under what key.
pub(crate) struct ChildLinkage {
    pub parent: ScenePath,
    pub field: Token,
    pub key: ChildKey,
}

#[derive(Clone, PartialEq)]
pub(crate) enum ChildKey {
    Name(Token),
    Path(ScenePath),
}

impl ChildLinkage {
    /// Computes the linkage for the spec at `path`, or `None` for paths
    /// that cannot hold specs (the pseudo-root, relative paths).
    pub(crate) fn for_path(path: &ScenePath) -> Option<Self> {
        if !path.is_absolute() {
            return None;
        }
        let part = path.last_part()?.clone();
        match part {
            PathPart::Prim(name) => Some(Self {
                parent: path.parent(),
                field: FieldKey::PrimChildren.token(),
                key: ChildKey::Name(name),
            }),
            PathPart::Property(name) | PathPart::RelationalAttribute(name) => Some(Self {
                parent: path.parent(),
                field: FieldKey::PropertyChildren.token(),
                key: ChildKey::Name(name),
            }),
            PathPart::PrimVariantSelection(set, variant) => {
                if variant.is_empty() {
                    // A variant set spec: /P{set=} hangs off the prim.
                    Some(Self {
                        parent: path.parent(),
                        field: FieldKey::VariantSetChildren.token(),
                        key: ChildKey::Name(set),
                    })
                } else {
                    // A variant spec hangs off its variant set spec.
                    Some(Self {
                        parent: path.parent().append_variant_selection(set, Token::empty()),
                        field: FieldKey::VariantChildren.token(),
                        key: ChildKey::Name(variant),
                    })
                }
            }
            PathPart::Target(target) => {
                // Connections hang off attributes, targets off
                // relationships; the field is chosen at link time from the
                // parent's spec type.
                Some(Self {
                    parent: path.parent(),
                    field: FieldKey::TargetChildren.token(),
                    key: ChildKey::Path(target),
                })
            }
            PathPart::Mapper(connection) => Some(Self {
                parent: path.parent(),
                field: FieldKey::MapperChildren.token(),
                key: ChildKey::Path(connection),
            }),
            PathPart::MapperArg(name) => Some(Self {
                parent: path.parent(),
                field: FieldKey::MapperArgChildren.token(),
                key: ChildKey::Name(name),
            }),
            PathPart::Expression => Some(Self {
                parent: path.parent(),
                field: FieldKey::ExpressionChildren.token(),
                key: ChildKey::Name(Token::new("expression")),
            }),
            PathPart::AbsoluteRoot | PathPart::ReflexiveRelative | PathPart::ParentRelative => None,
        }
    }

    fn effective_field(&self, data: &dyn AbstractData) -> Token {
        if self.field == FieldKey::TargetChildren.token()
            && data.spec_type(&self.parent) == SpecType::Attribute
        {
            FieldKey::ConnectionChildren.token()
        } else {
            self.field
        }
    }

    fn link(&self, data: &mut dyn AbstractData) {
        self.link_at(data, None);
    }

    /// Computes the parent children-list update that repositions this key,
    /// returning the field and its new value (no mutation happens here).
    pub(crate) fn reposition(
        &self,
        data: &dyn AbstractData,
        position: crate::namespace_edit::EditPosition,
    ) -> Option<(Token, Value)> {
        use crate::namespace_edit::EditPosition;
        let field = self.effective_field(data);
        fn reorder<T: PartialEq>(items: &mut Vec<T>, current: usize, position: EditPosition) {
            let item = items.remove(current);
            let target = match position {
                EditPosition::Same => current,
                EditPosition::AtEnd => items.len(),
                EditPosition::At(index) => index,
            };
            items.insert(target.min(items.len()), item);
        }
        match &self.key {
            ChildKey::Name(name) => {
                let mut names = data.get(&self.parent, field).take::<Vec<Token>>()?;
                let current = names.iter().position(|n| n == name)?;
                reorder(&mut names, current, position);
                Some((field, Value::from(names)))
            }
            ChildKey::Path(target) => {
                let mut targets = data.get(&self.parent, field).take::<Vec<ScenePath>>()?;
                let current = targets.iter().position(|t| t == target)?;
                reorder(&mut targets, current, position);
                Some((field, Value::from(targets)))
            }
        }
    }

    /// The key's current position in the parent's children list.
    fn position(&self, data: &dyn AbstractData) -> Option<usize> {
        let field = self.effective_field(data);
        match &self.key {
            ChildKey::Name(name) => data
                .get(&self.parent, field)
                .take::<Vec<Token>>()?
                .iter()
                .position(|n| n == name),
            ChildKey::Path(target) => data
                .get(&self.parent, field)
                .take::<Vec<ScenePath>>()?
                .iter()
                .position(|t| t == target),
        }
    }

    fn link_at(&self, data: &mut dyn AbstractData, index: Option<usize>) {
        let field = self.effective_field(data);
        match &self.key {
            ChildKey::Name(name) => {
                let mut names = data.get(&self.parent, field).take::<Vec<Token>>().unwrap_or_default();
                if !names.contains(name) {
                    names.insert(index.unwrap_or(names.len()).min(names.len()), *name);
                    data.set(&self.parent, field, Value::from(names));
                }
            }
            ChildKey::Path(target) => {
                let mut targets = data
                    .get(&self.parent, field)
                    .take::<Vec<ScenePath>>()
                    .unwrap_or_default();
                if !targets.contains(target) {
                    targets.insert(index.unwrap_or(targets.len()).min(targets.len()), target.clone());
                    data.set(&self.parent, field, Value::from(targets));
                }
            }
        }
    }

    fn unlink(&self, data: &mut dyn AbstractData) {
        let field = self.effective_field(data);
        match &self.key {
            ChildKey::Name(name) => {
                let mut names = data.get(&self.parent, field).take::<Vec<Token>>().unwrap_or_default();
                names.retain(|n| n != name);
                let value = if names.is_empty() { Value::Empty } else { Value::from(names) };
                data.set(&self.parent, field, value);
            }
            ChildKey::Path(target) => {
                let mut targets = data
                    .get(&self.parent, field)
                    .take::<Vec<ScenePath>>()
                    .unwrap_or_default();
                targets.retain(|t| t != target);
                let value = if targets.is_empty() { Value::Empty } else { Value::from(targets) };
                data.set(&self.parent, field, value);
            }
        }
    }
}

/// Collects `path` and every descendant spec, parents before children,
/// walking the children fields (plain path-prefix walks would miss variant
/// specs, whose paths do not share their variant set's node chain).
pub(crate) fn collect_spec_subtree(data: &dyn AbstractData, path: &ScenePath) -> Vec<ScenePath> {
    let mut result = Vec::new();
    let mut stack = vec![path.clone()];
    while let Some(current) = stack.pop() {
        if !data.has_spec(&current) {
            continue;
        }
        result.push(current.clone());
        for (field, is_name) in [
            (FieldKey::PrimChildren.token(), true),
            (FieldKey::PropertyChildren.token(), true),
            (FieldKey::VariantSetChildren.token(), true),
            (FieldKey::VariantChildren.token(), true),
            (FieldKey::MapperArgChildren.token(), true),
            (FieldKey::ExpressionChildren.token(), true),
            (FieldKey::ConnectionChildren.token(), false),
            (FieldKey::TargetChildren.token(), false),
            (FieldKey::MapperChildren.token(), false),
        ] {
            if is_name {
                let Some(names) = data.get(&current, field).take::<Vec<Token>>() else {
                    continue;
                };
                for name in names {
                    if let Some(child) = child_path(&current, field, &ChildKey::Name(name)) {
                        stack.push(child);
                    }
                }
            } else {
                let Some(targets) = data.get(&current, field).take::<Vec<ScenePath>>() else {
                    continue;
                };
                for target in targets {
                    if let Some(child) = child_path(&current, field, &ChildKey::Path(target)) {
                        stack.push(child);
                    }
                }
            }
        }
    }
    result
}

/// Reconstructs a child spec path from its parent, children field, and key.
pub(crate) fn child_path(parent: &ScenePath, field: Token, key: &ChildKey) -> Option<ScenePath> {
    let child = match (key, field) {
        (ChildKey::Name(name), f) if f == FieldKey::PrimChildren.token() => parent.append_child(*name),
        (ChildKey::Name(name), f) if f == FieldKey::PropertyChildren.token() => {
            if parent.is_target_path() {
                parent.append_relational_attribute(*name)
            } else {
                parent.append_property(*name)
            }
        }
        (ChildKey::Name(set), f) if f == FieldKey::VariantSetChildren.token() => {
            parent.append_variant_selection(*set, Token::empty())
        }
        (ChildKey::Name(variant), f) if f == FieldKey::VariantChildren.token() => {
            // The parent is the variant set spec /P{set=}; the variant lives
            // at /P{set=variant}.
            let (set, _) = parent.variant_selection()?;
            parent.parent().append_variant_selection(set, *variant)
        }
        (ChildKey::Name(name), f) if f == FieldKey::MapperArgChildren.token() => parent.append_mapper_arg(*name),
        (ChildKey::Name(_), f) if f == FieldKey::ExpressionChildren.token() => parent.append_expression(),
        (ChildKey::Path(target), f)
            if f == FieldKey::ConnectionChildren.token() || f == FieldKey::TargetChildren.token() =>
        {
            parent.append_target(target)
        }
        (ChildKey::Path(connection), f) if f == FieldKey::MapperChildren.token() => {
            parent.append_mapper(connection)
        }
        _ => ScenePath::empty(),
    };
    (!child.is_empty()).then_some(child)
}

/// Creates the prim at `path` plus any missing ancestors (as inert overs),
/// like a namespace `mkdir -p`.
pub fn create_prim_in_layer(layer: &Layer, path: &ScenePath) -> bool {
    if !path.is_absolute_root_or_prim_path() && !path.is_prim_variant_selection_path() {
        error::post_coding_error(format!("<{path}> is not a prim path"));
        return false;
    }
    let _block = ChangeBlock::new();
    let mut missing: Vec<ScenePath> = Vec::new();
    for ancestor in path.ancestors() {
        if ancestor.is_absolute_root() || layer.has_spec(&ancestor) {
            break;
        }
        missing.push(ancestor);
    }
    for ancestor in missing.iter().rev() {
        let spec_type = if ancestor.is_prim_variant_selection_path() {
            if ancestor.variant_selection().is_some_and(|(_, v)| v.is_empty()) {
                SpecType::VariantSet
            } else {
                // A variant needs its variant set spec in place first; the
                // path ancestry walk does not visit it (variant paths do not
                // share the set spec's node chain).
                if let Some((set, _)) = ancestor.variant_selection() {
                    let set_spec = ancestor.parent().append_variant_selection(set, Token::empty());
                    if !layer.has_spec(&set_spec) && !layer.create_spec(&set_spec, SpecType::VariantSet) {
                        return false;
                    }
                }
                SpecType::Variant
            }
        } else {
            SpecType::Prim
        };
        if !layer.create_spec(ancestor, spec_type) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_grammar() {
        assert!(is_anonymous_layer_identifier("anon:0000000A"));
        assert!(is_anonymous_layer_identifier("anon:0000000A:display-tag"));
        assert!(!is_anonymous_layer_identifier("scene.strata"));
        assert!(!is_anonymous_layer_identifier(
            "anon:1:SDF_FORMAT_ARGS:a=b"
        ));

        let (path, args) = split_layer_identifier("scene.strata:SDF_FORMAT_ARGS:a=1&b=two");
        assert_eq!(path, "scene.strata");
        assert_eq!(args.get("a").map(String::as_str), Some("1"));
        assert_eq!(args.get("b").map(String::as_str), Some("two"));
        assert_eq!(join_layer_identifier(&path, &args), "scene.strata:SDF_FORMAT_ARGS:a=1&b=two");

        let (path, args) = split_layer_identifier("plain.strata");
        assert!(args.is_empty());
        assert_eq!(join_layer_identifier(&path, &args), "plain.strata");
    }

    #[test]
    fn anonymous_layers_register_uniquely() {
        let a = Layer::create_anonymous("tag");
        let b = Layer::create_anonymous("tag");
        assert_ne!(a.identifier(), b.identifier());
        assert!(a.is_anonymous());
        assert!(a.is_dirty());
        assert!(a.is_empty());
        assert_eq!(Layer::find(&a.identifier()).unwrap().identifier(), a.identifier());
    }

    #[test]
    fn sublayer_paths_and_offsets_stay_paired() {
        let layer = Layer::create_anonymous("sublayers");
        assert!(layer.insert_sublayer_path(0, "a.strata"));
        assert!(layer.insert_sublayer_path(1, "b.strata"));
        assert_eq!(layer.sublayer_paths().len(), layer.sublayer_offsets().len());
        assert!(layer.set_sublayer_offset(1, LayerOffset::new(5.0, 2.0)));
        assert!(layer.remove_sublayer_path(0));
        assert_eq!(layer.sublayer_paths(), vec!["b.strata".to_owned()]);
        assert_eq!(layer.sublayer_offsets(), vec![LayerOffset::new(5.0, 2.0)]);
        assert!(!layer.remove_sublayer_path(7), "out-of-range index is rejected");
    }

    #[test]
    fn edit_permission_gates_mutators() {
        let layer = Layer::create_anonymous("permissions");
        let root_prim = ScenePath::from_string("/P");
        assert!(layer.create_spec(&root_prim, SpecType::Prim));
        layer.set_permission_to_edit(false);
        let collector = error::DiagnosticCollector::new();
        assert!(!layer.set_field(&root_prim, Token::new("x"), Value::from(1i32)));
        assert!(!layer.remove_spec(&root_prim));
        assert!(collector.take().iter().all(Error::is_coding_error));
        layer.set_permission_to_edit(true);
        assert!(layer.set_field(&root_prim, Token::new("x"), Value::from(1i32)));
    }

    #[test]
    fn spec_creation_links_children() {
        let layer = Layer::create_anonymous("children");
        let prim = ScenePath::from_string("/Root");
        assert!(layer.create_spec(&prim, SpecType::Prim));
        assert_eq!(layer.root_prim_names(), vec![Token::new("Root")]);

        let attr = prim.append_property(Token::new("size"));
        assert!(layer.create_spec(&attr, SpecType::Attribute));
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&prim, FieldKey::PropertyChildren.token()),
            Some(vec![Token::new("size")])
        );

        // Connections link under connectionChildren because the parent is an
        // attribute.
        let target = attr.append_target(&ScenePath::from_string("/Other.out"));
        assert!(layer.create_spec(&target, SpecType::Connection));
        assert_eq!(
            layer
                .get_field_as::<Vec<ScenePath>>(&attr, FieldKey::ConnectionChildren.token())
                .map(|v| v.len()),
            Some(1)
        );

        assert!(layer.remove_spec(&attr));
        assert!(!layer.has_spec(&target), "subtree removal includes targets");
        assert!(!layer.has_field(&prim, FieldKey::PropertyChildren.token()));
    }

    #[test]
    fn variant_specs_link_through_their_set() {
        let layer = Layer::create_anonymous("variants");
        let prim = ScenePath::from_string("/Rig");
        layer.create_spec(&prim, SpecType::Prim);
        let vset = prim.append_variant_selection(Token::new("lod"), Token::empty());
        assert!(layer.create_spec(&vset, SpecType::VariantSet));
        let variant = prim.append_variant_selection(Token::new("lod"), Token::new("high"));
        assert!(layer.create_spec(&variant, SpecType::Variant));
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&prim, FieldKey::VariantSetChildren.token()),
            Some(vec![Token::new("lod")])
        );
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&vset, FieldKey::VariantChildren.token()),
            Some(vec![Token::new("high")])
        );
        // Removing the set removes its variants even though their paths do
        // not share the set's node chain.
        assert!(layer.remove_spec(&vset));
        assert!(!layer.has_spec(&variant));
    }

    #[test]
    fn rename_moves_subtree_and_refuses_collisions() {
        let layer = Layer::create_anonymous("rename");
        create_prim_in_layer(&layer, &ScenePath::from_string("/A/B"));
        create_prim_in_layer(&layer, &ScenePath::from_string("/A/C"));
        layer.create_spec(&ScenePath::from_string("/A/B.attr"), SpecType::Attribute);

        let collector = error::DiagnosticCollector::new();
        assert!(!layer.rename_spec(&ScenePath::from_string("/A/B"), Token::new("C")));
        assert!(!collector.take().is_empty(), "sibling collision is reported");

        assert!(layer.rename_spec(&ScenePath::from_string("/A/B"), Token::new("Z")));
        assert!(layer.has_spec(&ScenePath::from_string("/A/Z")));
        assert!(layer.has_spec(&ScenePath::from_string("/A/Z.attr")));
        assert!(!layer.has_spec(&ScenePath::from_string("/A/B")));
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&ScenePath::from_string("/A"), FieldKey::PrimChildren.token()),
            Some(vec![Token::new("Z"), Token::new("C")])
        );
    }

    #[test]
    fn muting_parks_and_restores_content() {
        let layer = Layer::create_anonymous("muting");
        let prim = ScenePath::from_string("/Content");
        layer.create_spec(&prim, SpecType::Prim);
        let identifier = layer.identifier();

        Layer::add_muted_layer(&identifier);
        assert!(layer.is_muted());
        assert!(layer.is_empty(), "muted layers read as empty");
        assert!(Layer::muted_layers().contains(&identifier));

        Layer::remove_muted_layer(&identifier);
        assert!(!layer.is_muted());
        assert!(layer.has_spec(&prim), "unmuting restores the parked content");
    }

    #[test]
    fn default_prim_round_trip() {
        let layer = Layer::create_anonymous("default-prim");
        assert!(layer.default_prim().is_empty());
        let prim = ScenePath::from_string("/Main");
        layer.set_default_prim(&prim);
        assert_eq!(layer.default_prim(), prim);
        layer.set_default_prim(&ScenePath::empty());
        assert!(layer.default_prim().is_empty());
    }

    #[test]
    fn external_reference_updates() {
        let layer = Layer::create_anonymous("ext-refs");
        let prim = ScenePath::from_string("/P");
        layer.create_spec(&prim, SpecType::Prim);
        layer.insert_sublayer_path(0, "shared.strata");
        let refs = ListOp::create(
            vec![Reference::new("dep.strata", ScenePath::from_string("/D"))],
            vec![],
            vec![],
        );
        layer.set_field(&prim, FieldKey::References.token(), Value::from(refs));

        let deps = layer.get_composition_asset_dependencies();
        assert_eq!(deps, vec!["shared.strata".to_owned(), "dep.strata".to_owned()]);

        assert!(layer.update_external_reference("dep.strata", "renamed.strata"));
        assert!(layer
            .get_composition_asset_dependencies()
            .contains(&"renamed.strata".to_owned()));
        assert!(layer.update_external_reference("shared.strata", ""));
        assert!(layer.sublayer_paths().is_empty());
    }
}
