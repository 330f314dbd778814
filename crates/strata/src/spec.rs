//! Typed facades over spec records.
//!
//! A facade is a `(layer, path)` pair: it holds no scene data itself, and
//! every accessor re-resolves through the layer registry. If the record (or
//! the layer) goes away the handle turns *dormant*: accessors post a coding
//! error and return defaults, and `is_dormant` reports the state. Handles
//! are cheap to copy.
//!
//! List-valued fields are edited through [`ListOpEditor`], an explicit
//! editor struct that loads the current operator, accumulates edits, and
//! commits on [`apply`](ListOpEditor::apply) — there are no live list
//! proxies.

use std::collections::BTreeMap;

use crate::{
    abstract_data::SpecType,
    error,
    layer::{LayerHandle, LayerWeakHandle},
    list_op::{ListOp, ListOpSlot},
    path::ScenePath,
    token::{FieldKey, Token},
    types::{Payload, Permission, Reference, Specifier, Variability},
    value::{Value, ValueDictionary, ValueType},
};

/// The untyped core every facade wraps.
#[derive(Clone)]
pub struct SpecHandle {
    layer: LayerWeakHandle,
    path: ScenePath,
}

impl SpecHandle {
    /// Builds a handle without verifying that a record exists.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            layer: std::sync::Arc::downgrade(layer),
            path,
        }
    }

    /// The path this handle addresses.
    #[must_use]
    pub fn path(&self) -> &ScenePath {
        &self.path
    }

    /// The owning layer, if it is still alive.
    #[must_use]
    pub fn layer(&self) -> Option<LayerHandle> {
        self.layer.upgrade()
    }

    /// True when the layer is gone or no record exists at the path.
    #[must_use]
    pub fn is_dormant(&self) -> bool {
        self.layer
            .upgrade()
            .is_none_or(|layer| !layer.has_spec(&self.path))
    }

    /// Resolves the layer for an access, posting a coding error when the
    /// handle is dormant.
    fn resolve(&self) -> Option<LayerHandle> {
        match self.layer.upgrade() {
            Some(layer) if layer.has_spec(&self.path) => Some(layer),
            _ => {
                error::post_coding_error(format!("access to dormant spec handle <{}>", self.path));
                None
            }
        }
    }

    /// The record's spec type, or `Unknown` when dormant.
    #[must_use]
    pub fn spec_type(&self) -> SpecType {
        self.layer
            .upgrade()
            .map_or(SpecType::Unknown, |layer| layer.spec_type(&self.path))
    }

    /// The name of the addressed object.
    #[must_use]
    pub fn name(&self) -> Token {
        self.path.name_token()
    }

    /// Renames the addressed object, moving its subtree. With `validate`,
    /// the new name must be a legal identifier.
    pub fn set_name(&self, new_name: Token, validate: bool) -> bool {
        if validate && !is_valid_spec_name(new_name.as_str()) {
            error::post_coding_error(format!("invalid spec name {new_name:?}"));
            return false;
        }
        let Some(layer) = self.resolve() else {
            return false;
        };
        layer.rename_spec(&self.path, new_name)
    }

    /// The authored field names.
    #[must_use]
    pub fn list_fields(&self) -> Vec<Token> {
        self.resolve().map(|l| l.list_fields(&self.path)).unwrap_or_default()
    }

    /// True if `field` is authored.
    #[must_use]
    pub fn has_field(&self, field: Token) -> bool {
        self.resolve().is_some_and(|l| l.has_field(&self.path, field))
    }

    /// The value of `field`, or empty.
    #[must_use]
    pub fn get_field(&self, field: Token) -> Value {
        self.resolve()
            .map(|l| l.get_field(&self.path, field))
            .unwrap_or(Value::Empty)
    }

    /// Writes `field`.
    pub fn set_field(&self, field: Token, value: Value) -> bool {
        self.resolve().is_some_and(|l| l.set_field(&self.path, field, value))
    }

    /// Removes `field`.
    pub fn clear_field(&self, field: Token) -> bool {
        self.resolve().is_some_and(|l| l.erase_field(&self.path, field))
    }

    fn get_as<T: ValueType>(&self, key: FieldKey) -> Option<T> {
        self.resolve()?.get_field_as::<T>(&self.path, key.token())
    }

    fn get_or<T: ValueType>(&self, key: FieldKey, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    fn set_as<T: ValueType>(&self, key: FieldKey, value: T) -> bool {
        self.set_field(key.token(), value.into_value())
    }

    /// True when only fields every spec of this kind carries are authored.
    #[must_use]
    pub fn has_only_required_fields(&self) -> bool {
        let required: &[FieldKey] = match self.spec_type() {
            SpecType::Prim => &[FieldKey::Specifier, FieldKey::TypeName, FieldKey::PrimChildren],
            SpecType::Attribute | SpecType::Relationship => {
                &[FieldKey::Custom, FieldKey::Variability, FieldKey::TypeName]
            }
            _ => &[],
        };
        self.list_fields()
            .iter()
            .all(|field| required.iter().any(|key| key.token() == *field))
    }
}

fn is_valid_spec_name(name: &str) -> bool {
    !name.is_empty()
        && name.split(':').all(|segment| {
            let mut chars = segment.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Declares delegating accessors shared by the concrete facades.
macro_rules! common_spec_api {
    () => {
        /// The path this spec addresses.
        #[must_use]
        pub fn path(&self) -> &ScenePath {
            self.handle.path()
        }

        /// The owning layer, if still alive.
        #[must_use]
        pub fn layer(&self) -> Option<LayerHandle> {
            self.handle.layer()
        }

        /// True when the underlying record is gone.
        #[must_use]
        pub fn is_dormant(&self) -> bool {
            self.handle.is_dormant()
        }

        /// The spec's name.
        #[must_use]
        pub fn name(&self) -> Token {
            self.handle.name()
        }

        /// Renames the spec; fails on sibling collision.
        pub fn set_name(&self, new_name: Token, validate: bool) -> bool {
            self.handle.set_name(new_name, validate)
        }

        /// Generic field read.
        #[must_use]
        pub fn get_field(&self, field: Token) -> Value {
            self.handle.get_field(field)
        }

        /// Generic field write.
        pub fn set_field(&self, field: Token, value: Value) -> bool {
            self.handle.set_field(field, value)
        }

        /// True if `field` is authored.
        #[must_use]
        pub fn has_field(&self, field: Token) -> bool {
            self.handle.has_field(field)
        }

        /// Removes `field`.
        pub fn clear_field(&self, field: Token) -> bool {
            self.handle.clear_field(field)
        }

        /// The authored field names.
        #[must_use]
        pub fn list_fields(&self) -> Vec<Token> {
            self.handle.list_fields()
        }

        /// True when only required fields are authored.
        #[must_use]
        pub fn has_only_required_fields(&self) -> bool {
            self.handle.has_only_required_fields()
        }
    };
}

/// Declares the accessors shared by attribute and relationship facades.
macro_rules! property_spec_api {
    () => {
        /// Whether the property may vary over time.
        #[must_use]
        pub fn variability(&self) -> Variability {
            self.handle.get_or(FieldKey::Variability, Variability::Varying)
        }

        pub fn set_variability(&self, variability: Variability) -> bool {
            self.handle.set_as(FieldKey::Variability, variability)
        }

        /// True for user-declared (non-schema) properties.
        #[must_use]
        pub fn custom(&self) -> bool {
            self.handle.get_or(FieldKey::Custom, false)
        }

        pub fn set_custom(&self, custom: bool) -> bool {
            self.handle.set_as(FieldKey::Custom, custom)
        }

        /// The authored default value, or empty.
        #[must_use]
        pub fn default_value(&self) -> Value {
            self.handle.get_field(FieldKey::Default.token())
        }

        pub fn set_default_value(&self, value: Value) -> bool {
            self.handle.set_field(FieldKey::Default.token(), value)
        }

        pub fn clear_default_value(&self) -> bool {
            self.handle.clear_field(FieldKey::Default.token())
        }

        /// Write permission recorded on the property.
        #[must_use]
        pub fn permission(&self) -> Permission {
            self.handle.get_or(FieldKey::Permission, Permission::Public)
        }

        pub fn set_permission(&self, permission: Permission) -> bool {
            self.handle.set_as(FieldKey::Permission, permission)
        }

        /// UI grouping name.
        #[must_use]
        pub fn display_group(&self) -> String {
            self.handle.get_or(FieldKey::DisplayGroup, String::new())
        }

        pub fn set_display_group(&self, group: &str) -> bool {
            self.handle.set_as(FieldKey::DisplayGroup, group.to_owned())
        }

        /// UI display name.
        #[must_use]
        pub fn display_name(&self) -> String {
            self.handle.get_or(FieldKey::DisplayName, String::new())
        }

        pub fn set_display_name(&self, name: &str) -> bool {
            self.handle.set_as(FieldKey::DisplayName, name.to_owned())
        }

        /// Name prefix applied by symmetry tooling.
        #[must_use]
        pub fn prefix(&self) -> String {
            self.handle.get_or(FieldKey::Prefix, String::new())
        }

        pub fn set_prefix(&self, prefix: &str) -> bool {
            self.handle.set_as(FieldKey::Prefix, prefix.to_owned())
        }

        /// Name suffix applied by symmetry tooling.
        #[must_use]
        pub fn suffix(&self) -> String {
            self.handle.get_or(FieldKey::Suffix, String::new())
        }

        pub fn set_suffix(&self, suffix: &str) -> bool {
            self.handle.set_as(FieldKey::Suffix, suffix.to_owned())
        }

        /// The symmetric counterpart property, when authored.
        #[must_use]
        pub fn symmetric_peer(&self) -> String {
            self.handle.get_or(FieldKey::SymmetricPeer, String::new())
        }

        pub fn set_symmetric_peer(&self, peer: &str) -> bool {
            self.handle.set_as(FieldKey::SymmetricPeer, peer.to_owned())
        }

        /// The symmetry function token, when authored.
        #[must_use]
        pub fn symmetry_function(&self) -> Token {
            self.handle.get_or(FieldKey::SymmetryFunction, Token::empty())
        }

        pub fn set_symmetry_function(&self, function: Token) -> bool {
            self.handle.set_as(FieldKey::SymmetryFunction, function)
        }

        /// Arguments of the symmetry function.
        #[must_use]
        pub fn symmetry_arguments(&self) -> ValueDictionary {
            self.handle.get_or(FieldKey::SymmetryArguments, ValueDictionary::new())
        }

        pub fn set_symmetry_argument(&self, key_path: &str, value: Value) -> bool {
            let Some(layer) = self.handle.resolve() else {
                return false;
            };
            layer.set_field_dict_value_by_key(
                self.handle.path(),
                FieldKey::SymmetryArguments.token(),
                key_path,
                value,
            )
        }
    };
}

// ----------------------------------------------------------------------
// Prim

/// Facade over a prim (or variant, which nests a prim-like view) record.
#[derive(Clone)]
pub struct PrimSpec {
    handle: SpecHandle,
}

impl PrimSpec {
    common_spec_api!();

    /// Wraps `path` without verifying a record exists there.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            handle: SpecHandle::new(layer, path),
        }
    }

    /// Creates a child prim spec under `parent`.
    pub fn define_child(&self, name: Token, specifier: Specifier, type_name: Token) -> Option<Self> {
        let layer = self.handle.resolve()?;
        let path = self.handle.path().append_child(name);
        if path.is_empty() {
            return None;
        }
        if !layer.create_spec(&path, SpecType::Prim) {
            return None;
        }
        let child = Self::new(&layer, path);
        child.set_specifier(specifier);
        if !type_name.is_empty() {
            child.set_type_name(type_name);
        }
        Some(child)
    }

    /// How this prim contributes to composition.
    #[must_use]
    pub fn specifier(&self) -> Specifier {
        self.handle.get_or(FieldKey::Specifier, Specifier::Over)
    }

    pub fn set_specifier(&self, specifier: Specifier) -> bool {
        self.handle.set_as(FieldKey::Specifier, specifier)
    }

    /// The declared schema type name.
    #[must_use]
    pub fn type_name(&self) -> Token {
        self.handle.get_or(FieldKey::TypeName, Token::empty())
    }

    pub fn set_type_name(&self, type_name: Token) -> bool {
        self.handle.set_as(FieldKey::TypeName, type_name)
    }

    /// The model-hierarchy kind.
    #[must_use]
    pub fn kind(&self) -> Token {
        self.handle.get_or(FieldKey::Kind, Token::empty())
    }

    pub fn set_kind(&self, kind: Token) -> bool {
        self.handle.set_as(FieldKey::Kind, kind)
    }

    /// Whether the prim participates in composition (defaults true).
    #[must_use]
    pub fn active(&self) -> bool {
        self.handle.get_or(FieldKey::Active, true)
    }

    pub fn set_active(&self, active: bool) -> bool {
        self.handle.set_as(FieldKey::Active, active)
    }

    /// UI visibility hint.
    #[must_use]
    pub fn hidden(&self) -> bool {
        self.handle.get_or(FieldKey::Hidden, false)
    }

    pub fn set_hidden(&self, hidden: bool) -> bool {
        self.handle.set_as(FieldKey::Hidden, hidden)
    }

    /// Authoring comment.
    #[must_use]
    pub fn comment(&self) -> String {
        self.handle.get_or(FieldKey::Comment, String::new())
    }

    pub fn set_comment(&self, comment: &str) -> bool {
        self.handle.set_as(FieldKey::Comment, comment.to_owned())
    }

    /// User documentation.
    #[must_use]
    pub fn documentation(&self) -> String {
        self.handle.get_or(FieldKey::Documentation, String::new())
    }

    pub fn set_documentation(&self, documentation: &str) -> bool {
        self.handle.set_as(FieldKey::Documentation, documentation.to_owned())
    }

    /// Free-form custom data.
    #[must_use]
    pub fn custom_data(&self) -> ValueDictionary {
        self.handle.get_or(FieldKey::CustomData, ValueDictionary::new())
    }

    /// Writes one dotted key of the custom-data dictionary.
    pub fn set_custom_data_by_key(&self, key_path: &str, value: Value) -> bool {
        let Some(layer) = self.handle.resolve() else {
            return false;
        };
        layer.set_field_dict_value_by_key(self.handle.path(), FieldKey::CustomData.token(), key_path, value)
    }

    /// Asset-resolution metadata.
    #[must_use]
    pub fn asset_info(&self) -> ValueDictionary {
        self.handle.get_or(FieldKey::AssetInfo, ValueDictionary::new())
    }

    pub fn set_asset_info_by_key(&self, key_path: &str, value: Value) -> bool {
        let Some(layer) = self.handle.resolve() else {
            return false;
        };
        layer.set_field_dict_value_by_key(self.handle.path(), FieldKey::AssetInfo.token(), key_path, value)
    }

    /// Child prims, in namespace order.
    #[must_use]
    pub fn name_children(&self) -> Vec<Self> {
        let Some(layer) = self.handle.resolve() else {
            return Vec::new();
        };
        self.handle
            .get_or(FieldKey::PrimChildren, Vec::new())
            .into_iter()
            .map(|name: Token| Self::new(&layer, self.handle.path().append_child(name)))
            .collect()
    }

    /// Properties, in namespace order.
    #[must_use]
    pub fn properties(&self) -> Vec<PropertySpec> {
        let Some(layer) = self.handle.resolve() else {
            return Vec::new();
        };
        self.handle
            .get_or(FieldKey::PropertyChildren, Vec::new())
            .into_iter()
            .filter_map(|name: Token| {
                let path = self.handle.path().append_property(name);
                match layer.spec_type(&path) {
                    SpecType::Attribute => Some(PropertySpec::Attribute(AttributeSpec::new(&layer, path))),
                    SpecType::Relationship => {
                        Some(PropertySpec::Relationship(RelationshipSpec::new(&layer, path)))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// The attribute named `name`, if authored.
    #[must_use]
    pub fn attribute(&self, name: Token) -> Option<AttributeSpec> {
        let layer = self.handle.resolve()?;
        let path = self.handle.path().append_property(name);
        (layer.spec_type(&path) == SpecType::Attribute).then(|| AttributeSpec::new(&layer, path))
    }

    /// The relationship named `name`, if authored.
    #[must_use]
    pub fn relationship(&self, name: Token) -> Option<RelationshipSpec> {
        let layer = self.handle.resolve()?;
        let path = self.handle.path().append_property(name);
        (layer.spec_type(&path) == SpecType::Relationship).then(|| RelationshipSpec::new(&layer, path))
    }

    /// Variant sets authored on this prim.
    #[must_use]
    pub fn variant_sets(&self) -> Vec<VariantSetSpec> {
        let Some(layer) = self.handle.resolve() else {
            return Vec::new();
        };
        self.handle
            .get_or(FieldKey::VariantSetChildren, Vec::new())
            .into_iter()
            .map(|set: Token| {
                VariantSetSpec::new(&layer, self.handle.path().append_variant_selection(set, Token::empty()))
            })
            .collect()
    }

    /// The authored variant selections.
    #[must_use]
    pub fn variant_selections(&self) -> BTreeMap<Token, Token> {
        self.handle.get_or(FieldKey::VariantSelection, BTreeMap::new())
    }

    /// Selects `variant` for `set`; an empty variant clears the selection.
    pub fn set_variant_selection(&self, set: Token, variant: Token) -> bool {
        let mut selections = self.variant_selections();
        if variant.is_empty() {
            selections.remove(&set);
        } else {
            selections.insert(set, variant);
        }
        if selections.is_empty() {
            self.handle.clear_field(FieldKey::VariantSelection.token())
        } else {
            self.handle.set_as(FieldKey::VariantSelection, selections)
        }
    }

    /// The prim's relocates table.
    #[must_use]
    pub fn relocates(&self) -> BTreeMap<ScenePath, ScenePath> {
        self.handle.get_or(FieldKey::Relocates, BTreeMap::new())
    }

    pub fn set_relocates(&self, relocates: BTreeMap<ScenePath, ScenePath>) -> bool {
        if relocates.is_empty() {
            self.handle.clear_field(FieldKey::Relocates.token())
        } else {
            self.handle.set_as(FieldKey::Relocates, relocates)
        }
    }

    /// Editor over the references list.
    #[must_use]
    pub fn edit_references(&self) -> ListOpEditor<Reference> {
        ListOpEditor::new(&self.handle, FieldKey::References)
    }

    /// Editor over the payloads list.
    #[must_use]
    pub fn edit_payloads(&self) -> ListOpEditor<Payload> {
        ListOpEditor::new(&self.handle, FieldKey::Payload)
    }

    /// Editor over the inherit-paths list.
    #[must_use]
    pub fn edit_inherit_paths(&self) -> ListOpEditor<ScenePath> {
        ListOpEditor::new(&self.handle, FieldKey::InheritPaths)
    }

    /// Editor over the specializes list.
    #[must_use]
    pub fn edit_specializes(&self) -> ListOpEditor<ScenePath> {
        ListOpEditor::new(&self.handle, FieldKey::Specializes)
    }
}

// ----------------------------------------------------------------------
// Properties

/// Either concrete property facade.
#[derive(Clone)]
pub enum PropertySpec {
    Attribute(AttributeSpec),
    Relationship(RelationshipSpec),
}

impl PropertySpec {
    /// The property's path.
    #[must_use]
    pub fn path(&self) -> &ScenePath {
        match self {
            Self::Attribute(a) => a.path(),
            Self::Relationship(r) => r.path(),
        }
    }

    /// The property's name.
    #[must_use]
    pub fn name(&self) -> Token {
        match self {
            Self::Attribute(a) => a.name(),
            Self::Relationship(r) => r.name(),
        }
    }
}

/// Facade over an attribute record.
#[derive(Clone)]
pub struct AttributeSpec {
    handle: SpecHandle,
}

impl AttributeSpec {
    common_spec_api!();
    property_spec_api!();

    /// Wraps `path` without verifying a record exists there.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            handle: SpecHandle::new(layer, path),
        }
    }

    /// Creates an attribute on `prim` with the given value type name.
    pub fn create(prim: &PrimSpec, name: Token, type_name: Token) -> Option<Self> {
        let layer = prim.layer()?;
        let path = prim.path().append_property(name);
        if path.is_empty() || !layer.create_spec(&path, SpecType::Attribute) {
            return None;
        }
        let attribute = Self::new(&layer, path);
        attribute.set_type_name(type_name);
        Some(attribute)
    }

    /// The attribute's value type name.
    #[must_use]
    pub fn type_name(&self) -> Token {
        self.handle.get_or(FieldKey::TypeName, Token::empty())
    }

    pub fn set_type_name(&self, type_name: Token) -> bool {
        self.handle.set_as(FieldKey::TypeName, type_name)
    }

    /// The color space the value is expressed in.
    #[must_use]
    pub fn color_space(&self) -> Token {
        self.handle.get_or(FieldKey::ColorSpace, Token::empty())
    }

    pub fn set_color_space(&self, color_space: Token) -> bool {
        self.handle.set_as(FieldKey::ColorSpace, color_space)
    }

    /// The preferred display unit.
    #[must_use]
    pub fn display_unit(&self) -> Token {
        self.handle.get_or(FieldKey::DisplayUnit, Token::empty())
    }

    pub fn set_display_unit(&self, unit: Token) -> bool {
        self.handle.set_as(FieldKey::DisplayUnit, unit)
    }

    /// Tokens this attribute's value is restricted to, when authored.
    #[must_use]
    pub fn allowed_tokens(&self) -> Vec<Token> {
        self.handle.get_or(FieldKey::AllowedTokens, Vec::new())
    }

    pub fn set_allowed_tokens(&self, tokens: Vec<Token>) -> bool {
        self.handle.set_as(FieldKey::AllowedTokens, tokens)
    }

    /// Editor over the connection-paths list. Applying the editor also
    /// synchronizes the connection child specs.
    #[must_use]
    pub fn edit_connections(&self) -> ListOpEditor<ScenePath> {
        ListOpEditor::with_children_sync(&self.handle, FieldKey::ConnectionPaths, SpecType::Connection)
    }

    /// Authored sample times.
    #[must_use]
    pub fn time_samples(&self) -> Vec<f64> {
        self.handle
            .resolve()
            .map(|l| l.list_time_samples_for_path(self.handle.path()))
            .unwrap_or_default()
    }

    /// The value sampled exactly at `time`.
    #[must_use]
    pub fn query_time_sample(&self, time: f64) -> Option<Value> {
        self.handle.resolve()?.query_time_sample(self.handle.path(), time)
    }

    /// Authors a sample.
    pub fn set_time_sample(&self, time: f64, value: Value) -> bool {
        self.handle
            .resolve()
            .is_some_and(|l| l.set_time_sample(self.handle.path(), time, value))
    }

    /// Removes the sample at `time`.
    pub fn erase_time_sample(&self, time: f64) -> bool {
        self.handle
            .resolve()
            .is_some_and(|l| l.erase_time_sample(self.handle.path(), time))
    }

    /// Alias for [`default_value`](Self::default_value), the common read
    /// spelling at call sites.
    #[must_use]
    pub fn get_default_value(&self) -> Value {
        self.default_value()
    }
}

/// Facade over a relationship record.
#[derive(Clone)]
pub struct RelationshipSpec {
    handle: SpecHandle,
}

impl RelationshipSpec {
    common_spec_api!();
    property_spec_api!();

    /// Wraps `path` without verifying a record exists there.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            handle: SpecHandle::new(layer, path),
        }
    }

    /// Creates a relationship on `prim`.
    pub fn create(prim: &PrimSpec, name: Token) -> Option<Self> {
        let layer = prim.layer()?;
        let path = prim.path().append_property(name);
        if path.is_empty() || !layer.create_spec(&path, SpecType::Relationship) {
            return None;
        }
        Some(Self::new(&layer, path))
    }

    /// Hint that targets should not be loaded eagerly.
    #[must_use]
    pub fn no_load_hint(&self) -> bool {
        self.handle.get_or(FieldKey::NoLoadHint, false)
    }

    pub fn set_no_load_hint(&self, hint: bool) -> bool {
        self.handle.set_as(FieldKey::NoLoadHint, hint)
    }

    /// Editor over the target-paths list. Applying the editor also
    /// synchronizes the relationship-target child specs.
    #[must_use]
    pub fn edit_targets(&self) -> ListOpEditor<ScenePath> {
        ListOpEditor::with_children_sync(&self.handle, FieldKey::TargetPaths, SpecType::RelationshipTarget)
    }

    /// Replaces `old` with `new` everywhere it appears in the target list
    /// operator, keeping each occurrence's position, and re-synchronizes the
    /// target child specs.
    pub fn replace_target_path(&self, old: &ScenePath, new: &ScenePath) -> bool {
        let mut editor = self.edit_targets();
        editor.op_mut().modify(|path| {
            if path == old {
                Some(new.clone())
            } else {
                Some(path.clone())
            }
        });
        editor.apply_with_children()
    }

    /// Removes `target` from every slot of the target list operator and
    /// drops its target child spec.
    pub fn remove_target_path(&self, target: &ScenePath) -> bool {
        let mut editor = self.edit_targets();
        editor
            .op_mut()
            .modify(|path| if path == target { None } else { Some(path.clone()) });
        editor.apply_with_children()
    }
}

// ----------------------------------------------------------------------
// Variants

/// Facade over a variant set record (`/Prim{set=}`).
#[derive(Clone)]
pub struct VariantSetSpec {
    handle: SpecHandle,
}

impl VariantSetSpec {
    common_spec_api!();

    /// Wraps `path` without verifying a record exists there.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            handle: SpecHandle::new(layer, path),
        }
    }

    /// Creates a variant set on `prim`.
    pub fn create(prim: &PrimSpec, set: Token) -> Option<Self> {
        let layer = prim.layer()?;
        let path = prim.path().append_variant_selection(set, Token::empty());
        if path.is_empty() || !layer.create_spec(&path, SpecType::VariantSet) {
            return None;
        }
        Some(Self::new(&layer, path))
    }

    /// The set's name.
    #[must_use]
    pub fn variant_set_name(&self) -> Token {
        self.handle
            .path()
            .variant_selection()
            .map(|(set, _)| set)
            .unwrap_or_default()
    }

    /// The owning prim.
    #[must_use]
    pub fn owner(&self) -> Option<PrimSpec> {
        let layer = self.handle.layer()?;
        Some(PrimSpec::new(&layer, self.handle.path().parent()))
    }

    /// The variants of this set.
    #[must_use]
    pub fn variants(&self) -> Vec<VariantSpec> {
        let Some(layer) = self.handle.resolve() else {
            return Vec::new();
        };
        let set = self.variant_set_name();
        let prim_path = self.handle.path().parent();
        self.handle
            .get_or(FieldKey::VariantChildren, Vec::new())
            .into_iter()
            .map(|variant: Token| {
                VariantSpec::new(&layer, prim_path.append_variant_selection(set, variant))
            })
            .collect()
    }

    /// Creates a variant in this set.
    pub fn create_variant(&self, variant: Token) -> Option<VariantSpec> {
        let layer = self.handle.resolve()?;
        let set = self.variant_set_name();
        let path = self.handle.path().parent().append_variant_selection(set, variant);
        if path.is_empty() || !layer.create_spec(&path, SpecType::Variant) {
            return None;
        }
        Some(VariantSpec::new(&layer, path))
    }
}

/// Facade over a variant record (`/Prim{set=variant}`).
#[derive(Clone)]
pub struct VariantSpec {
    handle: SpecHandle,
}

impl VariantSpec {
    common_spec_api!();

    /// Wraps `path` without verifying a record exists there.
    #[must_use]
    pub fn new(layer: &LayerHandle, path: ScenePath) -> Self {
        Self {
            handle: SpecHandle::new(layer, path),
        }
    }

    /// The prim-like view of this variant: child prims and properties
    /// author under the variant's path exactly as under a prim.
    #[must_use]
    pub fn prim(&self) -> Option<PrimSpec> {
        let layer = self.handle.layer()?;
        Some(PrimSpec::new(&layer, self.handle.path().clone()))
    }

    /// The owning variant set spec.
    #[must_use]
    pub fn owner(&self) -> Option<VariantSetSpec> {
        let layer = self.handle.layer()?;
        let (set, _) = self.handle.path().variant_selection()?;
        Some(VariantSetSpec::new(
            &layer,
            self.handle.path().parent().append_variant_selection(set, Token::empty()),
        ))
    }
}

// ----------------------------------------------------------------------
// Lookup

/// Any concrete facade, as resolved by [`object_at_path`].
pub enum SpecObject {
    Prim(PrimSpec),
    Attribute(AttributeSpec),
    Relationship(RelationshipSpec),
    VariantSet(VariantSetSpec),
    Variant(VariantSpec),
    Other(SpecHandle),
}

/// Resolves the record at `path` to its typed facade, or `None` when no
/// record exists.
#[must_use]
pub fn object_at_path(layer: &LayerHandle, path: &ScenePath) -> Option<SpecObject> {
    match layer.spec_type(path) {
        SpecType::Unknown => None,
        SpecType::Prim | SpecType::PseudoRoot => Some(SpecObject::Prim(PrimSpec::new(layer, path.clone()))),
        SpecType::Attribute => Some(SpecObject::Attribute(AttributeSpec::new(layer, path.clone()))),
        SpecType::Relationship => Some(SpecObject::Relationship(RelationshipSpec::new(layer, path.clone()))),
        SpecType::VariantSet => Some(SpecObject::VariantSet(VariantSetSpec::new(layer, path.clone()))),
        SpecType::Variant => Some(SpecObject::Variant(VariantSpec::new(layer, path.clone()))),
        _ => Some(SpecObject::Other(SpecHandle::new(layer, path.clone()))),
    }
}

/// The prim at `path`, if a prim record exists there.
#[must_use]
pub fn prim_at_path(layer: &LayerHandle, path: &ScenePath) -> Option<PrimSpec> {
    matches!(layer.spec_type(path), SpecType::Prim | SpecType::PseudoRoot | SpecType::Variant)
        .then(|| PrimSpec::new(layer, path.clone()))
}

/// The attribute at `path`, if an attribute record exists there.
#[must_use]
pub fn attribute_at_path(layer: &LayerHandle, path: &ScenePath) -> Option<AttributeSpec> {
    (layer.spec_type(path) == SpecType::Attribute).then(|| AttributeSpec::new(layer, path.clone()))
}

/// The relationship at `path`, if a relationship record exists there.
#[must_use]
pub fn relationship_at_path(layer: &LayerHandle, path: &ScenePath) -> Option<RelationshipSpec> {
    (layer.spec_type(path) == SpecType::Relationship).then(|| RelationshipSpec::new(layer, path.clone()))
}

// ----------------------------------------------------------------------
// List editors

/// Explicit editor over a list-op field. Loads the current operator on
/// construction, accumulates edits in memory, and writes back only on
/// [`apply`](Self::apply).
pub struct ListOpEditor<T: Clone + PartialEq> {
    handle: SpecHandle,
    field: Token,
    op: ListOp<T>,
    /// When set, applying also synchronizes child specs of this type for
    /// the applied path list (connections, relationship targets).
    children_spec_type: Option<SpecType>,
}

impl<T: Clone + PartialEq> ListOpEditor<T>
where
    ListOp<T>: ValueType,
{
    fn new(handle: &SpecHandle, key: FieldKey) -> Self {
        let field = key.token();
        let op = handle.get_field(field).take::<ListOp<T>>().unwrap_or_default();
        Self {
            handle: handle.clone(),
            field,
            op,
            children_spec_type: None,
        }
    }

    /// The operator being edited.
    #[must_use]
    pub fn op(&self) -> &ListOp<T> {
        &self.op
    }

    /// Mutable access for arbitrary edits.
    pub fn op_mut(&mut self) -> &mut ListOp<T> {
        &mut self.op
    }

    /// Appends to the prepended slot.
    pub fn prepend(&mut self, item: T) -> &mut Self {
        let mut items = self.op.items(ListOpSlot::Prepended).to_vec();
        if !items.contains(&item) {
            items.push(item);
        }
        self.op.set_items(ListOpSlot::Prepended, items);
        self
    }

    /// Appends to the appended slot.
    pub fn append(&mut self, item: T) -> &mut Self {
        let mut items = self.op.items(ListOpSlot::Appended).to_vec();
        if !items.contains(&item) {
            items.push(item);
        }
        self.op.set_items(ListOpSlot::Appended, items);
        self
    }

    /// Appends to the deleted slot.
    pub fn delete(&mut self, item: T) -> &mut Self {
        let mut items = self.op.items(ListOpSlot::Deleted).to_vec();
        if !items.contains(&item) {
            items.push(item);
        }
        self.op.set_items(ListOpSlot::Deleted, items);
        self
    }

    /// Switches to explicit mode with exactly `items`.
    pub fn set_explicit(&mut self, items: Vec<T>) -> &mut Self {
        self.op.set_items(ListOpSlot::Explicit, items);
        self
    }

    /// Commits the edited operator to the layer. An operator with no keys
    /// clears the field.
    pub fn apply(self) -> bool {
        let value = if self.op.has_keys() || self.op.is_explicit() {
            self.op.clone().into_value()
        } else {
            Value::Empty
        };
        if value.is_empty() {
            self.handle.clear_field(self.field)
        } else {
            self.handle.set_field(self.field, value)
        }
    }
}

impl ListOpEditor<ScenePath> {
    fn with_children_sync(handle: &SpecHandle, key: FieldKey, spec_type: SpecType) -> Self {
        let mut editor = Self::new(handle, key);
        editor.children_spec_type = Some(spec_type);
        editor
    }

    /// Synchronizes target child specs with the applied path list: creates
    /// missing target specs, removes stale ones.
    fn sync_target_children(&self) -> bool {
        let Some(spec_type) = self.children_spec_type else {
            return true;
        };
        let Some(layer) = self.handle.resolve() else {
            return false;
        };
        let applied = self.op.applied_items();
        let children_field = match spec_type {
            SpecType::Connection => FieldKey::ConnectionChildren.token(),
            _ => FieldKey::TargetChildren.token(),
        };
        let existing: Vec<ScenePath> = layer
            .get_field_as::<Vec<ScenePath>>(self.handle.path(), children_field)
            .unwrap_or_default();
        for stale in existing.iter().filter(|t| !applied.contains(t)) {
            let target_path = self.handle.path().append_target(stale);
            if layer.has_spec(&target_path) {
                layer.remove_spec(&target_path);
            }
        }
        for target in applied.iter().filter(|t| !existing.contains(t)) {
            let target_path = self.handle.path().append_target(target);
            if !layer.has_spec(&target_path) && !layer.create_spec(&target_path, spec_type) {
                return false;
            }
        }
        true
    }

    /// Commits, then synchronizes target child specs.
    pub fn apply_with_children(self) -> bool {
        let sync_ok = self.sync_target_children();
        let value = if self.op.has_keys() || self.op.is_explicit() {
            self.op.clone().into_value()
        } else {
            Value::Empty
        };
        let committed = if value.is_empty() {
            self.handle.clear_field(self.field)
        } else {
            self.handle.set_field(self.field, value)
        };
        committed && sync_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn prim_fixture() -> (LayerHandle, PrimSpec) {
        let layer = Layer::create_anonymous("spec-tests");
        layer.create_spec(&p("/Root"), SpecType::Prim);
        let prim = PrimSpec::new(&layer, p("/Root"));
        (layer, prim)
    }

    #[test]
    fn prim_metadata_round_trips() {
        let (_layer, prim) = prim_fixture();
        assert_eq!(prim.specifier(), Specifier::Over, "unauthored specifier defaults to over");
        prim.set_specifier(Specifier::Def);
        assert_eq!(prim.specifier(), Specifier::Def);
        prim.set_type_name(Token::new("Scope"));
        assert_eq!(prim.type_name(), Token::new("Scope"));
        assert!(prim.active(), "active defaults true");
        prim.set_active(false);
        assert!(!prim.active());
        prim.set_comment("a comment");
        assert_eq!(prim.comment(), "a comment");
        prim.set_custom_data_by_key("group.flag", Value::from(true));
        assert_eq!(prim.custom_data().value_at_path("group.flag"), Some(&Value::from(true)));
    }

    #[test]
    fn attribute_creation_and_defaults() {
        let (_layer, prim) = prim_fixture();
        let attr = AttributeSpec::create(&prim, Token::new("size"), Token::new("float")).unwrap();
        assert_eq!(attr.type_name(), Token::new("float"));
        attr.set_default_value(Value::from(1.0f32));
        assert_eq!(attr.get_default_value(), Value::from(1.0f32));
        assert_eq!(attr.variability(), Variability::Varying);
        attr.set_time_sample(1.0, Value::from(2.0f32));
        assert_eq!(attr.time_samples(), vec![1.0]);
        assert_eq!(attr.query_time_sample(1.0), Some(Value::from(2.0f32)));

        let properties = prim.properties();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].name(), Token::new("size"));
    }

    #[test]
    fn dormant_handles_report_errors() {
        let (layer, prim) = prim_fixture();
        let attr = AttributeSpec::create(&prim, Token::new("a"), Token::new("int")).unwrap();
        assert!(!attr.is_dormant());
        layer.remove_spec(attr.path());
        assert!(attr.is_dormant());
        let collector = error::DiagnosticCollector::new();
        assert_eq!(attr.default_value(), Value::Empty);
        assert!(!attr.set_default_value(Value::from(1i32)));
        let captured = collector.take();
        assert!(!captured.is_empty());
        assert!(captured.iter().all(crate::error::Error::is_coding_error));
    }

    #[test]
    fn rename_through_facade_respects_siblings() {
        let (_layer, prim) = prim_fixture();
        let child_a = prim
            .define_child(Token::new("A"), Specifier::Def, Token::empty())
            .unwrap();
        prim.define_child(Token::new("B"), Specifier::Def, Token::empty())
            .unwrap();
        assert!(!child_a.set_name(Token::new("B"), true), "sibling collision fails");
        assert!(!child_a.set_name(Token::new("9bad"), true), "validation rejects bad names");
        assert!(child_a.set_name(Token::new("C"), true));
        assert_eq!(
            prim.name_children().iter().map(PrimSpec::name).collect::<Vec<_>>(),
            vec![Token::new("C"), Token::new("B")]
        );
    }

    #[test]
    fn reference_editor_commits_on_apply() {
        let (layer, prim) = prim_fixture();
        let reference = Reference::new("other.strata", p("/X"));
        let mut editor = prim.edit_references();
        editor.prepend(reference.clone());
        assert!(
            !layer.has_field(&p("/Root"), FieldKey::References.token()),
            "nothing written before apply"
        );
        assert!(editor.apply());
        let op: ListOp<Reference> = layer
            .get_field_as(&p("/Root"), FieldKey::References.token())
            .unwrap();
        assert_eq!(op.items(ListOpSlot::Prepended), &[reference]);
    }

    #[test]
    fn relationship_targets_sync_child_specs() {
        let (layer, prim) = prim_fixture();
        let rel = RelationshipSpec::create(&prim, Token::new("rel")).unwrap();
        let target = p("/Root/Other");
        let mut editor = rel.edit_targets();
        editor.append(target.clone());
        assert!(editor.apply_with_children());

        let target_spec = rel.path().append_target(&target);
        assert_eq!(layer.spec_type(&target_spec), SpecType::RelationshipTarget);

        // Replacing a target preserves its slot position.
        let renamed = p("/Root/Renamed");
        assert!(rel.replace_target_path(&target, &renamed));
        let op: ListOp<ScenePath> = layer
            .get_field_as(rel.path(), FieldKey::TargetPaths.token())
            .unwrap();
        assert_eq!(op.items(ListOpSlot::Appended), &[renamed.clone()]);

        assert!(rel.remove_target_path(&renamed));
        let value = layer.get_field(rel.path(), FieldKey::TargetPaths.token());
        assert!(value.is_empty(), "empty operator clears the field");
    }

    #[test]
    fn variant_machinery() {
        let (layer, prim) = prim_fixture();
        let vset = VariantSetSpec::create(&prim, Token::new("lod")).unwrap();
        let variant = vset.create_variant(Token::new("high")).unwrap();
        assert_eq!(vset.variants().len(), 1);
        assert_eq!(variant.owner().unwrap().variant_set_name(), Token::new("lod"));

        // The variant's prim view authors beneath the variant path.
        let nested = variant.prim().unwrap();
        let child = nested
            .define_child(Token::new("Geo"), Specifier::Over, Token::empty())
            .unwrap();
        assert_eq!(child.path(), &p("/Root{lod=high}Geo"));
        assert!(layer.has_spec(child.path()));

        prim.set_variant_selection(Token::new("lod"), Token::new("high"));
        assert_eq!(
            prim.variant_selections().get(&Token::new("lod")),
            Some(&Token::new("high"))
        );
        prim.set_variant_selection(Token::new("lod"), Token::empty());
        assert!(prim.variant_selections().is_empty());
    }
}
