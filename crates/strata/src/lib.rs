#![doc = include_str!("../../../README.md")]
#![expect(clippy::must_use_candidate, reason = "readers are obvious from their signatures")]
#![expect(clippy::missing_panics_doc, reason = "panics are poisoned-lock and invariant cases only")]
#![expect(clippy::return_self_not_must_use, reason = "builder-style editors are used for effects")]
#![expect(clippy::struct_field_names, reason = "field names mirror the data model's vocabulary")]

mod abstract_data;
mod change;
mod copy_utils;
mod crate_data;
mod error;
mod file_format;
mod file_version;
mod layer;
mod list_op;
mod memory_data;
mod namespace_edit;
mod path;
mod path_table;
mod pattern;
mod resolver;
mod spec;
mod token;
mod types;
mod value;
mod value_registry;
mod zip;

pub use crate::{
    abstract_data::{AbstractData, SpecType, SpecVisitor, bracketing_in_sorted, collect_spec_paths},
    change::{ChangeBlock, ChangeEvent, ChangeKind, ListenerHandle, queue_event, register_listener},
    copy_utils::{
        ChildrenCopyArgs, ChildrenDecision, ShouldCopyChildrenFn, ShouldCopyValueFn, ValueCopyArgs, ValueDecision,
        ValueEditFn, copy_spec, copy_spec_with_policies, default_should_copy_children, default_should_copy_value,
    },
    crate_data::{CRATE_READ_VERSION, CRATE_WRITE_VERSION, CrateData},
    error::{DiagnosticCollector, Error, Result},
    file_format::{
        CRATE_EXTENSION, CrateFileFormat, FileFormat, PACKAGE_EXTENSION, PackageFileFormat, TEXT_COOKIE,
        TEXT_EXTENSION, TEXT_READ_VERSION, TEXT_WRITE_VERSION, TextFileFormat, format_by_id, format_for_path,
        package_root_layer_path, text_format,
    },
    file_version::FileVersion,
    layer::{
        ANONYMOUS_PREFIX, FORMAT_ARGS_MARKER, Layer, LayerHandle, LayerWeakHandle, create_prim_in_layer,
        is_anonymous_layer_identifier, join_layer_identifier, split_layer_identifier,
    },
    list_op::{
        ApplyCallback, Int64ListOp, IntListOp, ListOp, ListOpSlot, PathListOp, PayloadListOp, ReferenceListOp,
        StringListOp, TokenListOp, UInt64ListOp, UIntListOp, UnregisteredValueListOp, apply_list_ordering,
    },
    memory_data::MemoryData,
    namespace_edit::{BatchNamespaceEdit, EditDetail, EditFailureReason, EditPosition, NamespaceEdit},
    path::{AncestorsRange, PathPart, ScenePath, find_longest_prefix, find_prefixed_range},
    path_table::{PathTable, SubtreeIter},
    pattern::{
        Constancy, IncrementalSearchState, PathExpression, PathExpressionEval, PathPattern, PredicateFn,
        PredicateLibrary, PredicateResult,
    },
    resolver::{
        Asset, AssetResolver, FileAsset, FilesystemResolver, MemoryAsset, OffsetAsset, ResolverCacheScope,
        default_resolver, is_package_relative_path, join_package_path, split_package_path_inner,
        split_package_path_outer,
    },
    spec::{
        AttributeSpec, ListOpEditor, PrimSpec, PropertySpec, RelationshipSpec, SpecHandle, SpecObject, VariantSetSpec,
        VariantSpec, attribute_at_path, object_at_path, prim_at_path, relationship_at_path,
    },
    token::{FieldKey, Token},
    types::{
        AssetPath, Half, LayerOffset, Matrix2d, Matrix3d, Matrix4d, OpaqueValue, Payload, Permission, Quat, Quatd,
        Quatf, Quath, Reference, Specifier, TimeCode, UnregisteredValue, Variability, Vec2, Vec2d, Vec2f, Vec2h,
        Vec2i, Vec3, Vec3d, Vec3f, Vec3h, Vec3i, Vec4, Vec4d, Vec4f, Vec4h, Vec4i,
    },
    value::{TimeSampleMap, Value, ValueDictionary, ValueType},
    value_registry::{ValueRole, ValueTypeInfo, ValueTypeRegistry, instance as value_type_registry},
    zip::{ZipArchive, ZipFileInfo, ZipWriter},
};
