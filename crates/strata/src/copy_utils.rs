//! Policy-driven deep copies of spec subtrees across layers.
//!
//! [`copy_spec`] copies the spec at a source path, its fields, and its
//! children to a destination path in another (or the same) layer. The
//! default policies rewrite paths that pointed into the copied subtree so
//! they point into the copy: path-valued list operators, internal sub-root
//! reference and payload prim paths, relocates entries, and connection /
//! relationship-target child lists. Callers can substitute their own
//! policies to filter fields, replace values outright, or defer a
//! destination-side edit.

use std::collections::{BTreeMap, VecDeque};

use crate::{
    abstract_data::SpecType,
    change::ChangeBlock,
    error,
    layer::{ChildKey, Layer, LayerHandle, child_path, create_prim_in_layer},
    list_op::ListOp,
    path::ScenePath,
    token::{FieldKey, Token},
    types::{Payload, Reference, Specifier},
    value::{Value, ValueType},
};

/// Everything a value policy sees for one field of one spec.
pub struct ValueCopyArgs<'a> {
    pub spec_type: SpecType,
    pub field: Token,
    pub src_layer: &'a LayerHandle,
    pub src_path: &'a ScenePath,
    pub field_in_src: bool,
    pub dst_layer: &'a LayerHandle,
    pub dst_path: &'a ScenePath,
    pub field_in_dst: bool,
}

/// A destination-side edit applied instead of a plain field write.
pub type ValueEditFn = Box<dyn Fn(&Layer, &ScenePath)>;

/// What a value policy decided for one field.
pub enum ValueDecision {
    /// Copy the source value (erasing the destination field when the source
    /// has none).
    Copy,
    /// Write this value instead.
    Replace(Value),
    /// Run this edit against the destination instead of writing a value.
    Edit(ValueEditFn),
    /// Leave the destination untouched.
    Skip,
}

/// Everything a children policy sees for one children field of one spec.
pub struct ChildrenCopyArgs<'a> {
    pub children_field: Token,
    pub src_layer: &'a LayerHandle,
    pub src_path: &'a ScenePath,
    pub field_in_src: bool,
    pub dst_layer: &'a LayerHandle,
    pub dst_path: &'a ScenePath,
    pub field_in_dst: bool,
}

/// What a children policy decided for one children field.
pub enum ChildrenDecision {
    /// Copy the source children under their own keys.
    Copy,
    /// Pair these source children with these destination children; the two
    /// values must hold equal-length lists.
    Replace { src: Value, dst: Value },
    /// Do not copy these children.
    Skip,
}

/// Value policy callback.
pub type ShouldCopyValueFn<'a> = &'a dyn Fn(&ValueCopyArgs<'_>) -> ValueDecision;
/// Children policy callback.
pub type ShouldCopyChildrenFn<'a> = &'a dyn Fn(&ChildrenCopyArgs<'_>) -> ChildrenDecision;

/// Copies the spec subtree at `src_path` to `dst_path` with the default
/// path-rewriting policies. Returns false (with a diagnostic) on misuse.
pub fn copy_spec(
    src_layer: &LayerHandle,
    src_path: &ScenePath,
    dst_layer: &LayerHandle,
    dst_path: &ScenePath,
) -> bool {
    let src_root = src_path.clone();
    let dst_root = dst_path.clone();
    let value_policy = move |args: &ValueCopyArgs<'_>| default_should_copy_value(&src_root, &dst_root, args);
    let src_root = src_path.clone();
    let dst_root = dst_path.clone();
    let children_policy =
        move |args: &ChildrenCopyArgs<'_>| default_should_copy_children(&src_root, &dst_root, args);
    copy_spec_with_policies(src_layer, src_path, dst_layer, dst_path, &value_policy, &children_policy)
}

/// [`copy_spec`] with caller-supplied policies.
pub fn copy_spec_with_policies(
    src_layer: &LayerHandle,
    src_path: &ScenePath,
    dst_layer: &LayerHandle,
    dst_path: &ScenePath,
    should_copy_value: ShouldCopyValueFn<'_>,
    should_copy_children: ShouldCopyChildrenFn<'_>,
) -> bool {
    if src_path.is_empty() || dst_path.is_empty() {
        error::post_coding_error("copy_spec requires non-empty paths");
        return false;
    }

    // Source and destination must be the same kind of thing.
    let prim_like = |p: &ScenePath| p.is_absolute_root_or_prim_path() || p.is_prim_variant_selection_path();
    if prim_like(src_path) != prim_like(dst_path)
        || src_path.is_property_path() != dst_path.is_property_path()
        || src_path.is_target_path() != dst_path.is_target_path()
        || src_path.is_mapper_path() != dst_path.is_mapper_path()
        || src_path.is_mapper_arg_path() != dst_path.is_mapper_arg_path()
        || src_path.is_expression_path() != dst_path.is_expression_path()
    {
        error::post_coding_error(format!(
            "incompatible copy_spec paths <{src_path}> and <{dst_path}>"
        ));
        return false;
    }

    // Target specs hang off existing children lists; the destination must
    // already exist.
    if dst_path.is_target_path() && !dst_layer.has_spec(dst_path) {
        error::post_coding_error(format!("no spec at destination target path <{dst_path}>"));
        return false;
    }

    // Overlapping copy within one layer: stage the source in an anonymous
    // intermediate so the copy never reads what it just wrote.
    if std::sync::Arc::ptr_eq(src_layer, dst_layer)
        && (src_path.has_prefix(dst_path) || dst_path.has_prefix(src_path))
    {
        let staging = Layer::create_anonymous("copy_spec_staging");
        let src_prim_path = src_path.prim_path();
        create_prim_in_layer(&staging, &src_prim_path);
        if !copy_spec(src_layer, &src_prim_path, &staging, &src_prim_path) {
            error::post_runtime_error(format!(
                "failed to stage overlapped copy <{src_path}> -> <{dst_path}>"
            ));
            return false;
        }
        return copy_spec_with_policies(
            &staging,
            src_path,
            dst_layer,
            dst_path,
            should_copy_value,
            should_copy_children,
        );
    }

    let _block = ChangeBlock::new();

    enum FieldAction {
        Write(Value),
        Edit(ValueEditFn),
    }

    let mut work: VecDeque<(ScenePath, ScenePath)> = VecDeque::new();
    work.push_back((src_path.clone(), dst_path.clone()));
    while let Some((src, dst)) = work.pop_front() {
        // An empty source marks a destination child to remove.
        if src.is_empty() {
            dst_layer.remove_spec(&dst);
            continue;
        }

        let mut spec_type = src_layer.spec_type(&src);
        if spec_type == SpecType::Unknown {
            error::post_coding_error(format!(
                "cannot copy unknown spec at <{src}> from layer {:?}",
                src_layer.identifier()
            ));
            return false;
        }

        // Gather the value fields (everything but children) present on
        // either side, and let the policy decide each.
        let mut data_to_copy: Vec<(Token, FieldAction)> = Vec::new();
        for (field, in_src, in_dst) in merged_fields(src_layer, &src, dst_layer, &dst, false) {
            let args = ValueCopyArgs {
                spec_type,
                field,
                src_layer,
                src_path: &src,
                field_in_src: in_src,
                dst_layer,
                dst_path: &dst,
                field_in_dst: in_dst,
            };
            match should_copy_value(&args) {
                ValueDecision::Copy => {
                    data_to_copy.push((field, FieldAction::Write(src_layer.get_field(&src, field))));
                }
                ValueDecision::Replace(value) => data_to_copy.push((field, FieldAction::Write(value))),
                ValueDecision::Edit(edit) => data_to_copy.push((field, FieldAction::Edit(edit))),
                ValueDecision::Skip => {}
            }
        }

        // Prims and variants hold the same information, so one can be copied
        // onto the other; fix up the fields that differ.
        let copying_prim_to_variant = spec_type == SpecType::Prim && dst.is_prim_variant_selection_path();
        let copying_variant_to_prim = spec_type == SpecType::Variant && dst.is_prim_path();
        if copying_prim_to_variant || copying_variant_to_prim {
            let specifier = FieldKey::Specifier.token();
            let type_name = FieldKey::TypeName.token();
            data_to_copy.retain(|(field, _)| *field != specifier && *field != type_name);
            if copying_prim_to_variant {
                // Variants author themselves as overs.
                data_to_copy.push((specifier, FieldAction::Write(Value::from(Specifier::Over))));
                spec_type = SpecType::Variant;
            } else {
                // Variants carry no specifier or type name; take them from
                // the owning prim for convenience.
                let owner = src.prim_path();
                for field in [specifier, type_name] {
                    let in_src = src_layer.has_field(&owner, field);
                    let in_dst = dst_layer.has_field(&dst, field);
                    if !in_src && !in_dst {
                        continue;
                    }
                    let args = ValueCopyArgs {
                        spec_type,
                        field,
                        src_layer,
                        src_path: &owner,
                        field_in_src: in_src,
                        dst_layer,
                        dst_path: &dst,
                        field_in_dst: in_dst,
                    };
                    match should_copy_value(&args) {
                        ValueDecision::Copy => {
                            data_to_copy
                                .push((field, FieldAction::Write(src_layer.get_field(&owner, field))));
                        }
                        ValueDecision::Replace(value) => {
                            data_to_copy.push((field, FieldAction::Write(value)));
                        }
                        ValueDecision::Edit(edit) => data_to_copy.push((field, FieldAction::Edit(edit))),
                        ValueDecision::Skip => {}
                    }
                }
                spec_type = SpecType::Prim;
            }
        }

        if !dst_layer.has_spec(&dst) && !dst_layer.create_spec(&dst, spec_type) {
            return false;
        }
        for (field, action) in data_to_copy {
            match action {
                FieldAction::Write(value) => {
                    dst_layer.set_field(&dst, field, value);
                }
                FieldAction::Edit(edit) => edit(dst_layer, &dst),
            }
        }

        // Children fields are gathered only after values landed: procedural
        // stores may present children derived from value fields.
        for (field, in_src, in_dst) in merged_fields(src_layer, &src, dst_layer, &dst, true) {
            let args = ChildrenCopyArgs {
                children_field: field,
                src_layer,
                src_path: &src,
                field_in_src: in_src,
                dst_layer,
                dst_path: &dst,
                field_in_dst: in_dst,
            };
            let (src_children, dst_children) = match should_copy_children(&args) {
                ChildrenDecision::Copy => {
                    let children = src_layer.get_field(&src, field);
                    (children.clone(), children)
                }
                ChildrenDecision::Replace { src, dst } => (src, dst),
                ChildrenDecision::Skip => continue,
            };
            if !enqueue_children(
                field,
                &src_children,
                &dst_children,
                &src,
                &dst,
                dst_layer,
                in_dst,
                &mut work,
            ) {
                return false;
            }
        }
    }
    true
}

/// Walks the (sorted, deduplicated) union of field names on both sides,
/// filtered to children or value fields.
fn merged_fields(
    src_layer: &LayerHandle,
    src: &ScenePath,
    dst_layer: &LayerHandle,
    dst: &ScenePath,
    children: bool,
) -> Vec<(Token, bool, bool)> {
    let keep = |field: &Token| FieldKey::token_holds_children(*field) == children;
    let mut src_fields: Vec<Token> = src_layer.list_fields(src).into_iter().filter(keep).collect();
    let mut dst_fields: Vec<Token> = dst_layer.list_fields(dst).into_iter().filter(keep).collect();
    src_fields.sort();
    dst_fields.sort();
    let mut merged = Vec::with_capacity(src_fields.len() + dst_fields.len());
    for field in &src_fields {
        merged.push((*field, true, dst_fields.contains(field)));
    }
    for field in dst_fields {
        if !src_fields.contains(&field) {
            merged.push((field, false, true));
        }
    }
    merged
}

/// Pushes work items for each paired child, plus removal items for
/// destination children not retained by the copy.
fn enqueue_children(
    field: Token,
    src_children: &Value,
    dst_children: &Value,
    src: &ScenePath,
    dst: &ScenePath,
    dst_layer: &LayerHandle,
    children_in_dst: bool,
    work: &mut VecDeque<(ScenePath, ScenePath)>,
) -> bool {
    let (src_keys, dst_keys) = match (children_keys(src_children), children_keys(dst_children)) {
        (Some(s), Some(d)) => (s, d),
        _ => {
            if src_children.is_empty() && dst_children.is_empty() {
                return true;
            }
            error::post_coding_error(format!("malformed children field '{field}'"));
            return false;
        }
    };
    if src_keys.len() != dst_keys.len() {
        error::post_coding_error(format!(
            "mismatched children lists for field '{field}' ({} vs {})",
            src_keys.len(),
            dst_keys.len()
        ));
        return false;
    }
    for (src_key, dst_key) in src_keys.iter().zip(dst_keys.iter()) {
        let (Some(src_child), Some(dst_child)) =
            (child_path(src, field, src_key), child_path(dst, field, dst_key))
        else {
            continue;
        };
        work.push_back((src_child, dst_child));
    }
    // Destination children outside the copied set get removal work items.
    if children_in_dst {
        let existing = dst_layer.get_field(dst, field);
        if let Some(existing_keys) = children_keys(&existing) {
            for old in existing_keys {
                if !dst_keys.contains(&old) {
                    if let Some(old_path) = child_path(dst, field, &old) {
                        work.push_back((ScenePath::empty(), old_path));
                    }
                }
            }
        }
    }
    true
}

/// Normalizes a children-field value into its key list.
fn children_keys(value: &Value) -> Option<Vec<ChildKey>> {
    if value.is_empty() {
        return Some(Vec::new());
    }
    if let Some(names) = value.get::<Vec<Token>>() {
        return Some(names.iter().map(|n| ChildKey::Name(*n)).collect());
    }
    value
        .get::<Vec<ScenePath>>()
        .map(|paths| paths.iter().map(|p| ChildKey::Path(p.clone())).collect())
}

// ----------------------------------------------------------------------
// Default policies

fn rewrite_prefixes(src_root: &ScenePath, dst_root: &ScenePath) -> (ScenePath, ScenePath) {
    (
        src_root.prim_path().strip_all_variant_selections(),
        dst_root.prim_path().strip_all_variant_selections(),
    )
}

/// Fixes internal sub-root reference/payload prim paths that pointed inside
/// the copied subtree. External arcs and root-prim targets pass through.
fn fix_internal_subroot<T>(
    asset_path: &str,
    prim_path: &ScenePath,
    src_prefix: &ScenePath,
    dst_prefix: &ScenePath,
    rebuild: impl FnOnce(ScenePath) -> T,
    unchanged: T,
) -> T {
    if !asset_path.is_empty() || prim_path.is_empty() || prim_path.is_root_prim_path() {
        return unchanged;
    }
    rebuild(prim_path.replace_prefix(src_prefix, dst_prefix))
}

/// The stock value policy: copy everything, rewriting paths that pointed
/// into the copied subtree. Relationship-target default values are
/// deliberately not re-anchored.
pub fn default_should_copy_value(
    src_root: &ScenePath,
    dst_root: &ScenePath,
    args: &ValueCopyArgs<'_>,
) -> ValueDecision {
    if !args.field_in_src {
        return ValueDecision::Copy;
    }
    let (src_prefix, dst_prefix) = rewrite_prefixes(src_root, dst_root);

    let path_list_fields = [
        FieldKey::ConnectionPaths.token(),
        FieldKey::TargetPaths.token(),
        FieldKey::InheritPaths.token(),
        FieldKey::Specializes.token(),
    ];
    if path_list_fields.contains(&args.field) {
        if let Some(mut op) = args
            .src_layer
            .get_field_as::<ListOp<ScenePath>>(args.src_path, args.field)
        {
            op.modify(|path| Some(path.replace_prefix(&src_prefix, &dst_prefix)));
            return ValueDecision::Replace(op.into_value());
        }
    } else if args.field == FieldKey::References.token() {
        if let Some(mut op) = args
            .src_layer
            .get_field_as::<ListOp<Reference>>(args.src_path, args.field)
        {
            op.modify(|reference| {
                Some(fix_internal_subroot(
                    &reference.asset_path,
                    &reference.prim_path,
                    &src_prefix,
                    &dst_prefix,
                    |rewritten| {
                        let mut fixed = reference.clone();
                        fixed.prim_path = rewritten;
                        fixed
                    },
                    reference.clone(),
                ))
            });
            return ValueDecision::Replace(op.into_value());
        }
    } else if args.field == FieldKey::Payload.token() {
        if let Some(mut op) = args
            .src_layer
            .get_field_as::<ListOp<Payload>>(args.src_path, args.field)
        {
            op.modify(|payload| {
                Some(fix_internal_subroot(
                    &payload.asset_path,
                    &payload.prim_path,
                    &src_prefix,
                    &dst_prefix,
                    |rewritten| {
                        let mut fixed = payload.clone();
                        fixed.prim_path = rewritten;
                        fixed
                    },
                    payload.clone(),
                ))
            });
            return ValueDecision::Replace(op.into_value());
        }
    } else if args.field == FieldKey::Relocates.token() {
        if let Some(relocates) = args
            .src_layer
            .get_field_as::<BTreeMap<ScenePath, ScenePath>>(args.src_path, args.field)
        {
            let rewritten: BTreeMap<ScenePath, ScenePath> = relocates
                .into_iter()
                .map(|(from, to)| {
                    (
                        from.replace_prefix(&src_prefix, &dst_prefix),
                        to.replace_prefix(&src_prefix, &dst_prefix),
                    )
                })
                .collect();
            return ValueDecision::Replace(rewritten.into_value());
        }
    }
    ValueDecision::Copy
}

/// The stock children policy: copy everything; target-valued child lists
/// (connections, relationship targets, mappers) are re-anchored into the
/// destination subtree.
pub fn default_should_copy_children(
    src_root: &ScenePath,
    dst_root: &ScenePath,
    args: &ChildrenCopyArgs<'_>,
) -> ChildrenDecision {
    if !args.field_in_src {
        return ChildrenDecision::Copy;
    }
    let path_children_fields = [
        FieldKey::ConnectionChildren.token(),
        FieldKey::TargetChildren.token(),
        FieldKey::MapperChildren.token(),
    ];
    if path_children_fields.contains(&args.children_field) {
        if let Some(children) = args
            .src_layer
            .get_field_as::<Vec<ScenePath>>(args.src_path, args.children_field)
        {
            let (src_prefix, dst_prefix) = rewrite_prefixes(src_root, dst_root);
            let rewritten: Vec<ScenePath> = children
                .iter()
                .map(|child| child.replace_prefix(&src_prefix, &dst_prefix))
                .collect();
            return ChildrenDecision::Replace {
                src: Value::from(children),
                dst: Value::from(rewritten),
            };
        }
    }
    ChildrenDecision::Copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list_op::ListOpSlot, token::Token, value::Value};

    fn p(text: &str) -> ScenePath {
        ScenePath::from_string(text)
    }

    fn layer_with_tree() -> LayerHandle {
        let layer = Layer::create_anonymous("copy-src");
        create_prim_in_layer(&layer, &p("/A/B"));
        layer
    }

    #[test]
    fn copies_fields_and_children() {
        let src = layer_with_tree();
        src.set_field(&p("/A/B"), Token::new("size"), Value::from(2.0f32));
        let dst = Layer::create_anonymous("copy-dst");

        assert!(copy_spec(&src, &p("/A"), &dst, &p("/Dest")));
        assert_eq!(dst.spec_type(&p("/Dest")), SpecType::Prim);
        assert_eq!(dst.spec_type(&p("/Dest/B")), SpecType::Prim);
        assert_eq!(dst.get_field(&p("/Dest/B"), Token::new("size")), Value::from(2.0f32));
    }

    #[test]
    fn internal_references_rewrite_into_the_copy() {
        let src = layer_with_tree();
        // One reference into the copied subtree, one external, one internal
        // but outside the subtree.
        let refs = ListOp::create(
            vec![
                Reference::new("", p("/A/X")),
                Reference::new("other.strata", p("/A/X")),
                Reference::new("", p("/Elsewhere/Y")),
            ],
            vec![],
            vec![],
        );
        src.set_field(&p("/A/B"), FieldKey::References.token(), Value::from(refs));
        let dst = Layer::create_anonymous("copy-ref-dst");

        assert!(copy_spec(&src, &p("/A"), &dst, &p("/Dest")));
        let copied: ListOp<Reference> = dst
            .get_field_as(&p("/Dest/B"), FieldKey::References.token())
            .unwrap();
        let items = copied.items(ListOpSlot::Prepended);
        assert_eq!(items[0].prim_path, p("/Dest/X"), "internal subtree reference rewrites");
        assert_eq!(items[1].prim_path, p("/A/X"), "external references are untouched");
        assert_eq!(items[2].prim_path, p("/Elsewhere/Y"), "non-subtree internals rewrite to themselves");
    }

    #[test]
    fn connection_targets_reanchor() {
        let src = layer_with_tree();
        src.create_spec(&p("/A/B.out"), SpecType::Attribute);
        let target = p("/A/B.out").append_target(&p("/A/B.in"));
        src.create_spec(&target, SpecType::Connection);

        let dst = Layer::create_anonymous("copy-conn-dst");
        assert!(copy_spec(&src, &p("/A"), &dst, &p("/Dest")));
        assert_eq!(
            dst.get_field_as::<Vec<ScenePath>>(&p("/Dest/B.out"), FieldKey::ConnectionChildren.token()),
            Some(vec![p("/Dest/B.in")]),
            "connection child lists re-anchor into the copy"
        );
        let copied_target = p("/Dest/B.out").append_target(&p("/Dest/B.in"));
        assert_eq!(dst.spec_type(&copied_target), SpecType::Connection);
    }

    #[test]
    fn overlapping_copy_within_one_layer() {
        let layer = layer_with_tree();
        layer.set_field(&p("/A/B"), Token::new("marker"), Value::from(1i32));
        assert!(copy_spec(&layer, &p("/A"), &layer, &p("/A/B/Deep")));
        assert_eq!(layer.get_field(&p("/A/B/Deep/B"), Token::new("marker")), Value::from(1i32));
        // The original survives the copy.
        assert_eq!(layer.get_field(&p("/A/B"), Token::new("marker")), Value::from(1i32));
    }

    #[test]
    fn incompatible_paths_are_rejected() {
        let src = layer_with_tree();
        let dst = Layer::create_anonymous("copy-bad-dst");
        let collector = error::DiagnosticCollector::new();
        assert!(!copy_spec(&src, &p("/A"), &dst, &p("/Dest.attr")));
        assert_eq!(collector.take().len(), 1);
    }

    #[test]
    fn prim_copies_onto_variant_as_over() {
        let src = layer_with_tree();
        src.set_field(&p("/A/B"), FieldKey::Specifier.token(), Value::from(Specifier::Def));
        src.set_field(&p("/A/B"), FieldKey::TypeName.token(), Value::from(Token::new("Scope")));

        let dst = Layer::create_anonymous("copy-variant-dst");
        dst.create_spec(&p("/Rig"), SpecType::Prim);
        dst.create_spec(
            &p("/Rig").append_variant_selection(Token::new("geo"), Token::empty()),
            SpecType::VariantSet,
        );

        let variant_path = p("/Rig").append_variant_selection(Token::new("geo"), Token::new("main"));
        assert!(copy_spec(&src, &p("/A/B"), &dst, &variant_path));
        assert_eq!(dst.spec_type(&variant_path), SpecType::Variant);
        assert_eq!(
            dst.get_field(&variant_path, FieldKey::Specifier.token()),
            Value::from(Specifier::Over),
            "variants author as overs"
        );
        assert!(
            !dst.has_field(&variant_path, FieldKey::TypeName.token()),
            "type name stays on the owning prim"
        );
    }

    #[test]
    fn stale_destination_children_are_removed() {
        let src = layer_with_tree();
        let dst = Layer::create_anonymous("copy-stale-dst");
        create_prim_in_layer(&dst, &p("/Dest/Old"));
        assert!(copy_spec(&src, &p("/A"), &dst, &p("/Dest")));
        assert!(!dst.has_spec(&p("/Dest/Old")), "children absent from the source are removed");
        assert!(dst.has_spec(&p("/Dest/B")));
    }
}
