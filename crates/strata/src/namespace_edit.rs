//! Transactional batches of namespace edits.
//!
//! A [`BatchNamespaceEdit`] is an ordered list of rename / reparent /
//! remove / reorder operations. [`Layer::can_apply_namespace_edits`]
//! validates the whole sequence without touching the layer (later edits are
//! checked against the state earlier edits would produce), returning
//! per-edit reason codes on failure. [`Layer::apply_namespace_edits`]
//! applies the batch inside one change block, or fails without mutating
//! anything.

use strum::{Display, IntoStaticStr};

use crate::{
    error::{self, DiagnosticCollector},
    layer::{ChildLinkage, Layer},
    path::ScenePath,
    token::Token,
};

/// Where a moved or reordered spec lands in its parent's children list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPosition {
    /// Keep the current position (renames) or append (reparents).
    Same,
    /// Append at the end of the list.
    AtEnd,
    /// Insert at this index.
    At(usize),
}

/// One namespace operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceEdit {
    /// The object being edited.
    pub current_path: ScenePath,
    /// Its new path; the empty path removes the object.
    pub new_path: ScenePath,
    /// Its new position among its (new) siblings.
    pub position: EditPosition,
}

impl NamespaceEdit {
    /// Removes the object at `path` and its subtree.
    #[must_use]
    pub fn remove(path: ScenePath) -> Self {
        Self {
            current_path: path,
            new_path: ScenePath::empty(),
            position: EditPosition::Same,
        }
    }

    /// Renames the object at `path` in place.
    #[must_use]
    pub fn rename(path: ScenePath, new_name: Token) -> Self {
        let new_path = path.replace_name(new_name);
        Self {
            current_path: path,
            new_path,
            position: EditPosition::Same,
        }
    }

    /// Moves the object at `path` to `new_path` (possibly under a new
    /// parent) at `position`.
    #[must_use]
    pub fn reparent(path: ScenePath, new_path: ScenePath, position: EditPosition) -> Self {
        Self {
            current_path: path,
            new_path,
            position,
        }
    }

    /// Repositions the object among its current siblings.
    #[must_use]
    pub fn reorder(path: ScenePath, position: EditPosition) -> Self {
        Self {
            current_path: path.clone(),
            new_path: path,
            position,
        }
    }

    fn is_remove(&self) -> bool {
        self.new_path.is_empty()
    }

    fn is_reorder(&self) -> bool {
        !self.is_remove() && self.current_path == self.new_path
    }
}

/// An ordered batch of edits.
#[derive(Debug, Clone, Default)]
pub struct BatchNamespaceEdit {
    edits: Vec<NamespaceEdit>,
}

impl BatchNamespaceEdit {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an edit.
    pub fn add(&mut self, edit: NamespaceEdit) -> &mut Self {
        self.edits.push(edit);
        self
    }

    /// The edits, in application order.
    #[must_use]
    pub fn edits(&self) -> &[NamespaceEdit] {
        &self.edits
    }
}

/// Why an edit cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum EditFailureReason {
    /// No object exists at the edit's current path.
    NonexistentObject,
    /// An object already exists at the edit's new path.
    ExistingObject,
    /// The new path is malformed, parentless, or inside the moved subtree.
    InvalidNewPath,
    /// The edit changes the object's kind (prim vs property).
    IncompatiblePaths,
    /// The layer does not permit edits.
    ReadOnlyLayer,
}

/// A per-edit validation failure.
#[derive(Debug, Clone)]
pub struct EditDetail {
    pub edit: NamespaceEdit,
    pub reason: EditFailureReason,
    pub message: String,
}

fn detail(edit: &NamespaceEdit, reason: EditFailureReason, message: impl Into<String>) -> EditDetail {
    EditDetail {
        edit: edit.clone(),
        reason,
        message: message.into(),
    }
}

/// Validates one edit against `layer`'s current state, then applies it so
/// the next edit in the batch sees the produced state. Used both against a
/// scratch copy (validation) and the real layer (application).
fn validate_and_apply_one(layer: &Layer, edit: &NamespaceEdit) -> Result<(), EditDetail> {
    if !layer.has_spec(&edit.current_path) {
        return Err(detail(
            edit,
            EditFailureReason::NonexistentObject,
            format!("no object at <{}>", edit.current_path),
        ));
    }
    if edit.is_remove() {
        if !layer.remove_spec(&edit.current_path) {
            return Err(detail(edit, EditFailureReason::NonexistentObject, "removal failed"));
        }
        return Ok(());
    }
    if edit.is_reorder() {
        return reorder_among_siblings(layer, edit);
    }

    if edit.new_path.is_empty()
        || edit.current_path.is_property_path() != edit.new_path.is_property_path()
    {
        return Err(detail(
            edit,
            EditFailureReason::IncompatiblePaths,
            format!("cannot turn <{}> into <{}>", edit.current_path, edit.new_path),
        ));
    }
    if layer.has_spec(&edit.new_path) {
        return Err(detail(
            edit,
            EditFailureReason::ExistingObject,
            format!("an object already exists at <{}>", edit.new_path),
        ));
    }
    if edit.new_path.has_prefix(&edit.current_path) {
        return Err(detail(
            edit,
            EditFailureReason::InvalidNewPath,
            format!("<{}> lies inside the moved subtree", edit.new_path),
        ));
    }
    let Some(new_linkage) = ChildLinkage::for_path(&edit.new_path) else {
        return Err(detail(
            edit,
            EditFailureReason::InvalidNewPath,
            format!("<{}> cannot hold a spec", edit.new_path),
        ));
    };
    if !layer.has_spec(&new_linkage.parent) {
        return Err(detail(
            edit,
            EditFailureReason::InvalidNewPath,
            format!("no parent object at <{}>", new_linkage.parent),
        ));
    }

    let index = match edit.position {
        EditPosition::At(index) => Some(index),
        EditPosition::Same | EditPosition::AtEnd => None,
    };
    // The individual checks above cover the failure modes; anything the move
    // itself still rejects surfaces as a generic invalid-path failure.
    let collector = DiagnosticCollector::new();
    if layer.move_spec_subtree(&edit.current_path, &edit.new_path, index) {
        Ok(())
    } else {
        let message = collector
            .take()
            .first()
            .map_or_else(|| "move failed".to_owned(), ToString::to_string);
        Err(detail(edit, EditFailureReason::InvalidNewPath, message))
    }
}

/// Repositions a spec in its parent's children list without moving records.
fn reorder_among_siblings(layer: &Layer, edit: &NamespaceEdit) -> Result<(), EditDetail> {
    let Some(linkage) = ChildLinkage::for_path(&edit.current_path) else {
        return Err(detail(edit, EditFailureReason::InvalidNewPath, "object has no parent list"));
    };
    let moved = layer.with_data(|data| linkage.reposition(data, edit.position));
    // Repositioning mutates through the field API to stay observable.
    match moved {
        Some((field, value)) => {
            layer.set_field(&linkage.parent, field, value);
            Ok(())
        }
        None => Err(detail(
            edit,
            EditFailureReason::NonexistentObject,
            "object missing from its parent's children list",
        )),
    }
}

impl Layer {
    /// Validates the batch without changing any state. `Ok(())` means
    /// [`apply_namespace_edits`](Self::apply_namespace_edits) would succeed;
    /// the error lists one detail per failing edit (validation stops the
    /// sequence at the first failure, since later edits depend on it).
    pub fn can_apply_namespace_edits(&self, batch: &BatchNamespaceEdit) -> Result<(), Vec<EditDetail>> {
        if !self.permission_to_edit() {
            let reason = batch
                .edits()
                .first()
                .map(|edit| detail(edit, EditFailureReason::ReadOnlyLayer, "layer is read-only"))
                .into_iter()
                .collect();
            return Err(reason);
        }
        // Rehearse the whole sequence against a scratch copy so later edits
        // are validated against the state earlier edits produce.
        let scratch = Self::create_anonymous("namespace_edit_rehearsal");
        scratch.transfer_content(self);
        let _quiet = DiagnosticCollector::new();
        let mut failures = Vec::new();
        for edit in batch.edits() {
            if let Err(failure) = validate_and_apply_one(&scratch, edit) {
                failures.push(failure);
                break;
            }
        }
        if failures.is_empty() { Ok(()) } else { Err(failures) }
    }

    /// Applies the batch transactionally: either every edit lands (inside
    /// one change block) or the layer is untouched.
    pub fn apply_namespace_edits(&self, batch: &BatchNamespaceEdit) -> bool {
        if let Err(failures) = self.can_apply_namespace_edits(batch) {
            for failure in &failures {
                error::post_coding_error(format!(
                    "namespace edit <{}> -> <{}>: {} ({})",
                    failure.edit.current_path, failure.edit.new_path, failure.reason, failure.message
                ));
            }
            return false;
        }
        let _block = crate::change::ChangeBlock::new();
        for edit in batch.edits() {
            if let Err(failure) = validate_and_apply_one(self, edit) {
                // can_apply vouched for the sequence; reaching this means the
                // layer changed underneath us.
                error::post_runtime_error(format!(
                    "namespace edit batch failed mid-application at <{}>: {}",
                    failure.edit.current_path, failure.message
                ));
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abstract_data::SpecType,
        layer::create_prim_in_layer,
        token::FieldKey,
    };

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn fixture() -> crate::layer::LayerHandle {
        let layer = Layer::create_anonymous("ns-edit");
        create_prim_in_layer(&layer, &p("/A/B"));
        create_prim_in_layer(&layer, &p("/A/C"));
        create_prim_in_layer(&layer, &p("/D"));
        layer
    }

    #[test]
    fn sequential_batch_applies_transactionally() {
        let layer = fixture();
        let mut batch = BatchNamespaceEdit::new();
        batch
            .add(NamespaceEdit::rename(p("/A/B"), Token::new("Renamed")))
            // The second edit depends on the first having run.
            .add(NamespaceEdit::reparent(p("/A/Renamed"), p("/D/Renamed"), EditPosition::AtEnd))
            .add(NamespaceEdit::remove(p("/A/C")));

        assert!(layer.can_apply_namespace_edits(&batch).is_ok());
        // Validation must not have touched the layer.
        assert!(layer.has_spec(&p("/A/B")));
        assert!(layer.has_spec(&p("/A/C")));

        assert!(layer.apply_namespace_edits(&batch));
        assert!(layer.has_spec(&p("/D/Renamed")));
        assert!(!layer.has_spec(&p("/A/B")));
        assert!(!layer.has_spec(&p("/A/C")));
    }

    #[test]
    fn failures_carry_reason_codes() {
        let layer = fixture();

        let mut missing = BatchNamespaceEdit::new();
        missing.add(NamespaceEdit::remove(p("/Nope")));
        let failures = layer.can_apply_namespace_edits(&missing).unwrap_err();
        assert_eq!(failures[0].reason, EditFailureReason::NonexistentObject);

        let mut collision = BatchNamespaceEdit::new();
        collision.add(NamespaceEdit::rename(p("/A/B"), Token::new("C")));
        let failures = layer.can_apply_namespace_edits(&collision).unwrap_err();
        assert_eq!(failures[0].reason, EditFailureReason::ExistingObject);

        let mut into_self = BatchNamespaceEdit::new();
        into_self.add(NamespaceEdit::reparent(p("/A"), p("/A/B/X"), EditPosition::AtEnd));
        let failures = layer.can_apply_namespace_edits(&into_self).unwrap_err();
        assert_eq!(failures[0].reason, EditFailureReason::InvalidNewPath);

        let mut orphan = BatchNamespaceEdit::new();
        orphan.add(NamespaceEdit::reparent(p("/A/B"), p("/Missing/B"), EditPosition::AtEnd));
        let failures = layer.can_apply_namespace_edits(&orphan).unwrap_err();
        assert_eq!(failures[0].reason, EditFailureReason::InvalidNewPath);

        // A failed batch leaves the layer untouched.
        let collector = DiagnosticCollector::new();
        assert!(!layer.apply_namespace_edits(&collision));
        assert!(!collector.take().is_empty());
        assert!(layer.has_spec(&p("/A/B")));
    }

    #[test]
    fn read_only_layers_refuse_batches() {
        let layer = fixture();
        layer.set_permission_to_edit(false);
        let mut batch = BatchNamespaceEdit::new();
        batch.add(NamespaceEdit::remove(p("/A/B")));
        let failures = layer.can_apply_namespace_edits(&batch).unwrap_err();
        assert_eq!(failures[0].reason, EditFailureReason::ReadOnlyLayer);
    }

    #[test]
    fn reorder_moves_within_siblings() {
        let layer = fixture();
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&p("/A"), FieldKey::PrimChildren.token()),
            Some(vec![Token::new("B"), Token::new("C")])
        );
        let mut batch = BatchNamespaceEdit::new();
        batch.add(NamespaceEdit::reorder(p("/A/C"), EditPosition::At(0)));
        assert!(layer.apply_namespace_edits(&batch));
        assert_eq!(
            layer.get_field_as::<Vec<Token>>(&p("/A"), FieldKey::PrimChildren.token()),
            Some(vec![Token::new("C"), Token::new("B")])
        );
        assert_eq!(layer.spec_type(&p("/A/C")), SpecType::Prim, "records are untouched");
    }
}
