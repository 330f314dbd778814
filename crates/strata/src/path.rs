//! Interned hierarchical paths addressing every object in a scene hierarchy.
//!
//! A [`ScenePath`] is an immutable cons-list of path parts, tail-shared
//! through a process-wide intern table keyed by `(parent, part)`. After
//! interning, equal paths are identical by address, so equality and hashing
//! are pointer operations and `has_prefix` is a pointer walk. Construction is
//! safe from any thread; concurrent interning of equal paths yields the same
//! node.
//!
//! The textual syntax: absolute paths begin with `/`, children are
//! `/`-separated, properties are `.`-separated, relationship/connection
//! targets sit in brackets `[...]`, variant selections are `{set=var}`,
//! mappers are `.mapper[target]` on a property, and `.expression` marks an
//! expression spec. Relative paths begin with `.` or `..`.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    sync::{Arc, LazyLock, Mutex, Weak},
};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{error, token::Token};

/// One element of a path's cons-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPart {
    /// The absolute root `/`.
    AbsoluteRoot,
    /// The relative anchor `.`.
    ReflexiveRelative,
    /// One `..` step. Chains for `../..` and so on.
    ParentRelative,
    /// A prim name.
    Prim(Token),
    /// A variant selection `{set=variant}` on a prim.
    PrimVariantSelection(Token, Token),
    /// A property name (possibly namespaced with `:`).
    Property(Token),
    /// A relationship target or attribute connection target `[path]`.
    Target(ScenePath),
    /// An attribute of a relationship target.
    RelationalAttribute(Token),
    /// A connection mapper `.mapper[connection]`.
    Mapper(ScenePath),
    /// An argument of a mapper.
    MapperArg(Token),
    /// The expression marker `.expression`.
    Expression,
}

impl PathPart {
    /// Rank used by the total path order. Any fixed ranking works; what
    /// matters is that the order is total and prefix-first.
    fn rank(&self) -> u8 {
        match self {
            Self::AbsoluteRoot => 0,
            Self::ReflexiveRelative => 1,
            Self::ParentRelative => 2,
            Self::Prim(_) => 3,
            Self::PrimVariantSelection(..) => 4,
            Self::Property(_) => 5,
            Self::Target(_) => 6,
            Self::RelationalAttribute(_) => 7,
            Self::Mapper(_) => 8,
            Self::MapperArg(_) => 9,
            Self::Expression => 10,
        }
    }

    fn cmp_parts(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Prim(a), Self::Prim(b))
            | (Self::Property(a), Self::Property(b))
            | (Self::RelationalAttribute(a), Self::RelationalAttribute(b))
            | (Self::MapperArg(a), Self::MapperArg(b)) => a.cmp(b),
            (Self::PrimVariantSelection(s1, v1), Self::PrimVariantSelection(s2, v2)) => {
                s1.cmp(s2).then_with(|| v1.cmp(v2))
            }
            (Self::Target(a), Self::Target(b)) | (Self::Mapper(a), Self::Mapper(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Number of path elements this part contributes.
    fn element_weight(&self) -> u32 {
        match self {
            Self::AbsoluteRoot | Self::ReflexiveRelative => 0,
            _ => 1,
        }
    }
}

/// Interned path node. Nodes are shared tails: every distinct `(parent,
/// part)` pair exists at most once process-wide.
#[derive(Debug)]
struct PathNode {
    parent: ScenePath,
    part: PathPart,
    element_count: u32,
}

/// Intern-table key. Parent identity is the node address, which is stable
/// for the node's lifetime.
#[derive(PartialEq, Eq, Hash)]
struct InternKey {
    parent_addr: usize,
    part: PathPart,
}

static INTERN_TABLE: LazyLock<Mutex<AHashMap<InternKey, Weak<PathNode>>>> =
    LazyLock::new(|| Mutex::new(AHashMap::with_capacity(1024)));

fn node_addr(path: &ScenePath) -> usize {
    path.0.as_ref().map_or(0, |node| Arc::as_ptr(node) as usize)
}

impl Drop for PathNode {
    fn drop(&mut self) {
        // Evict this node's intern entry, unless a racing interner already
        // replaced it with a live node for the same key.
        let key = InternKey {
            parent_addr: node_addr(&self.parent),
            part: self.part.clone(),
        };
        let mut table = INTERN_TABLE.lock().expect("path intern table poisoned");
        if let Some(weak) = table.get(&key) {
            if weak.strong_count() == 0 {
                table.remove(&key);
            }
        }
    }
}

/// An immutable, interned scene path. Cheap to copy, pointer-hashable,
/// totally ordered with the empty path least and prefixes before their
/// descendants.
#[derive(Clone, Default)]
pub struct ScenePath(Option<Arc<PathNode>>);

fn intern(parent: ScenePath, part: PathPart) -> ScenePath {
    let key = InternKey {
        parent_addr: node_addr(&parent),
        part: part.clone(),
    };
    let mut table = INTERN_TABLE.lock().expect("path intern table poisoned");
    if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
        return ScenePath(Some(existing));
    }
    let element_count = parent.element_count() + part.element_weight();
    let node = Arc::new(PathNode {
        parent,
        part,
        element_count,
    });
    table.insert(key, Arc::downgrade(&node));
    ScenePath(Some(node))
}

impl ScenePath {
    // ------------------------------------------------------------------
    // Construction

    /// The empty path.
    #[must_use]
    pub fn empty() -> Self {
        Self(None)
    }

    /// The absolute root path `/`.
    #[must_use]
    pub fn absolute_root() -> Self {
        intern(Self::empty(), PathPart::AbsoluteRoot)
    }

    /// The relative anchor path `.`.
    #[must_use]
    pub fn reflexive_relative() -> Self {
        intern(Self::empty(), PathPart::ReflexiveRelative)
    }

    /// Parses a path from its textual form. Malformed input posts a parse
    /// diagnostic and yields the empty path.
    #[must_use]
    pub fn from_string(text: &str) -> Self {
        match parse::parse_path(text) {
            Ok(path) => path,
            Err(msg) => {
                error::post_parse_error(format!("invalid path {text:?}: {msg}"));
                Self::empty()
            }
        }
    }

    // ------------------------------------------------------------------
    // Structure access

    fn node(&self) -> Option<&Arc<PathNode>> {
        self.0.as_ref()
    }

    /// The final path part, if any.
    #[must_use]
    pub fn last_part(&self) -> Option<&PathPart> {
        self.node().map(|n| &n.part)
    }

    /// Number of path elements (root markers contribute zero).
    #[must_use]
    pub fn element_count(&self) -> u32 {
        self.node().map_or(0, |n| n.element_count)
    }

    /// Collects the parts from the root to this path.
    fn parts(&self) -> SmallVec<[&PathPart; 8]> {
        let mut parts: SmallVec<[&PathPart; 8]> = SmallVec::new();
        let mut cursor = self.node();
        while let Some(node) = cursor {
            parts.push(&node.part);
            cursor = node.parent.node();
        }
        parts.reverse();
        parts
    }

    // ------------------------------------------------------------------
    // Kind predicates

    /// True for the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// True if the path starts at the absolute root.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        let mut cursor = self.node();
        while let Some(node) = cursor {
            if node.parent.is_empty() {
                return node.part == PathPart::AbsoluteRoot;
            }
            cursor = node.parent.node();
        }
        false
    }

    /// True for exactly `/`.
    #[must_use]
    pub fn is_absolute_root(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::AbsoluteRoot))
    }

    /// True for paths identifying a prim (including relative anchors).
    #[must_use]
    pub fn is_prim_path(&self) -> bool {
        matches!(
            self.last_part(),
            Some(PathPart::Prim(_) | PathPart::ReflexiveRelative | PathPart::ParentRelative)
        )
    }

    /// True for `/` or any prim path.
    #[must_use]
    pub fn is_absolute_root_or_prim_path(&self) -> bool {
        self.is_absolute_root() || self.is_prim_path()
    }

    /// True for a prim directly under the absolute root.
    #[must_use]
    pub fn is_root_prim_path(&self) -> bool {
        match self.node() {
            Some(node) => matches!(node.part, PathPart::Prim(_)) && node.parent.is_absolute_root(),
            None => false,
        }
    }

    /// True for property and relational-attribute paths.
    #[must_use]
    pub fn is_property_path(&self) -> bool {
        matches!(
            self.last_part(),
            Some(PathPart::Property(_) | PathPart::RelationalAttribute(_))
        )
    }

    /// True for a property directly on a prim or prim variant selection.
    #[must_use]
    pub fn is_prim_property_path(&self) -> bool {
        match self.node() {
            Some(node) => {
                matches!(node.part, PathPart::Property(_))
                    && matches!(
                        node.parent.last_part(),
                        Some(PathPart::Prim(_) | PathPart::PrimVariantSelection(..))
                    )
            }
            None => false,
        }
    }

    /// True if the final element is a namespaced (`:`-containing) property.
    #[must_use]
    pub fn is_namespaced_property_path(&self) -> bool {
        match self.last_part() {
            Some(PathPart::Property(name) | PathPart::RelationalAttribute(name)) => {
                name.as_str().contains(':')
            }
            _ => false,
        }
    }

    /// True if the final element is a variant selection.
    #[must_use]
    pub fn is_prim_variant_selection_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::PrimVariantSelection(..)))
    }

    /// True for prim paths and prim variant selection paths.
    #[must_use]
    pub fn is_prim_or_prim_variant_selection_path(&self) -> bool {
        self.is_prim_path() || self.is_prim_variant_selection_path()
    }

    /// True if any element of the path is a variant selection.
    #[must_use]
    pub fn contains_prim_variant_selection(&self) -> bool {
        let mut cursor = self.node();
        while let Some(node) = cursor {
            if matches!(node.part, PathPart::PrimVariantSelection(..)) {
                return true;
            }
            cursor = node.parent.node();
        }
        false
    }

    /// True if the final element is a relationship or connection target.
    #[must_use]
    pub fn is_target_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::Target(_)))
    }

    /// True if the final element is a mapper.
    #[must_use]
    pub fn is_mapper_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::Mapper(_)))
    }

    /// True if the final element is a mapper argument.
    #[must_use]
    pub fn is_mapper_arg_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::MapperArg(_)))
    }

    /// True if the final element is the expression marker.
    #[must_use]
    pub fn is_expression_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::Expression))
    }

    /// True if the final element is a relational attribute.
    #[must_use]
    pub fn is_relational_attribute_path(&self) -> bool {
        matches!(self.last_part(), Some(PathPart::RelationalAttribute(_)))
    }

    // ------------------------------------------------------------------
    // Accessors

    /// The name of the final element as an interned token. Variant
    /// selections, targets, and mappers have no name and yield the empty
    /// token; the expression marker is named `expression`.
    #[must_use]
    pub fn name_token(&self) -> Token {
        match self.last_part() {
            Some(
                PathPart::Prim(name)
                | PathPart::Property(name)
                | PathPart::RelationalAttribute(name)
                | PathPart::MapperArg(name),
            ) => *name,
            Some(PathPart::Expression) => Token::new("expression"),
            Some(PathPart::ReflexiveRelative) => Token::new("."),
            Some(PathPart::ParentRelative) => Token::new(".."),
            _ => Token::empty(),
        }
    }

    /// The name of the final element as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name_token().as_str()
    }

    /// The target path of a target or mapper element, or empty.
    #[must_use]
    pub fn target_path(&self) -> Self {
        match self.last_part() {
            Some(PathPart::Target(target) | PathPart::Mapper(target)) => target.clone(),
            _ => Self::empty(),
        }
    }

    /// The `(set, variant)` pair of a trailing variant selection.
    #[must_use]
    pub fn variant_selection(&self) -> Option<(Token, Token)> {
        match self.last_part() {
            Some(PathPart::PrimVariantSelection(set, variant)) => Some((*set, *variant)),
            _ => None,
        }
    }

    /// The shortest textual suffix that reconstructs the final element when
    /// appended to the parent.
    #[must_use]
    pub fn element_string(&self) -> String {
        match self.last_part() {
            None => String::new(),
            Some(part) => part_element_string(part),
        }
    }

    // ------------------------------------------------------------------
    // Arithmetic

    /// The parent path. The parent of `/` and of the empty path is empty;
    /// the parent of `.` is `..` and parents of `..` chain upward.
    #[must_use]
    pub fn parent(&self) -> Self {
        let Some(node) = self.node() else {
            return Self::empty();
        };
        match node.part {
            PathPart::AbsoluteRoot => Self::empty(),
            PathPart::ReflexiveRelative => intern(Self::reflexive_relative(), PathPart::ParentRelative),
            PathPart::ParentRelative => intern(self.clone(), PathPart::ParentRelative),
            _ => node.parent.clone(),
        }
    }

    /// Strips any property, target, mapper, expression, and variant-selection
    /// suffix, leaving the owning prim (or root) path.
    #[must_use]
    pub fn prim_path(&self) -> Self {
        let mut cursor = self.clone();
        loop {
            match cursor.last_part() {
                None
                | Some(
                    PathPart::AbsoluteRoot
                    | PathPart::ReflexiveRelative
                    | PathPart::ParentRelative
                    | PathPart::Prim(_),
                ) => return cursor,
                Some(_) => {
                    let Some(node) = cursor.node() else {
                        return Self::empty();
                    };
                    let parent = node.parent.clone();
                    cursor = parent;
                }
            }
        }
    }

    /// Like [`prim_path`](Self::prim_path) but stops at a trailing variant
    /// selection instead of stripping it.
    #[must_use]
    pub fn prim_or_prim_variant_selection_path(&self) -> Self {
        let mut cursor = self.clone();
        loop {
            match cursor.last_part() {
                None
                | Some(
                    PathPart::AbsoluteRoot
                    | PathPart::ReflexiveRelative
                    | PathPart::ParentRelative
                    | PathPart::Prim(_)
                    | PathPart::PrimVariantSelection(..),
                ) => return cursor,
                Some(_) => {
                    let Some(node) = cursor.node() else {
                        return Self::empty();
                    };
                    let parent = node.parent.clone();
                    cursor = parent;
                }
            }
        }
    }

    /// Appends a child prim name. Valid on root, prim, variant-selection,
    /// and relative-anchor paths.
    #[must_use]
    pub fn append_child(&self, name: Token) -> Self {
        if !self.is_absolute_root_or_prim_path() && !self.is_prim_variant_selection_path() {
            error::post_coding_error(format!("cannot append child {name:?} to <{self}>"));
            return Self::empty();
        }
        if !is_valid_identifier(name.as_str()) {
            error::post_coding_error(format!("invalid prim name {name:?}"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::Prim(name))
    }

    /// Appends a property name. Valid on prim and variant-selection paths.
    #[must_use]
    pub fn append_property(&self, name: Token) -> Self {
        if !self.is_prim_path() && !self.is_prim_variant_selection_path() {
            error::post_coding_error(format!("cannot append property {name:?} to <{self}>"));
            return Self::empty();
        }
        if !is_valid_namespaced_identifier(name.as_str()) {
            error::post_coding_error(format!("invalid property name {name:?}"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::Property(name))
    }

    /// Appends a `{set=variant}` selection. Valid on prim and
    /// variant-selection paths. The variant may be empty.
    #[must_use]
    pub fn append_variant_selection(&self, set: Token, variant: Token) -> Self {
        if !self.is_prim_path() && !self.is_prim_variant_selection_path() {
            error::post_coding_error(format!("cannot append variant selection to <{self}>"));
            return Self::empty();
        }
        if !is_valid_identifier(set.as_str())
            || !(variant.is_empty() || is_valid_identifier(variant.as_str()))
        {
            error::post_coding_error(format!("invalid variant selection {{{set}={variant}}}"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::PrimVariantSelection(set, variant))
    }

    /// Appends a target path `[target]`. Valid on property and
    /// relational-attribute paths.
    #[must_use]
    pub fn append_target(&self, target: &Self) -> Self {
        if !self.is_property_path() {
            error::post_coding_error(format!("cannot append target to <{self}>"));
            return Self::empty();
        }
        if target.is_empty() {
            error::post_coding_error("cannot append empty target path");
            return Self::empty();
        }
        intern(self.clone(), PathPart::Target(target.clone()))
    }

    /// Appends a relational attribute. Valid on target paths.
    #[must_use]
    pub fn append_relational_attribute(&self, name: Token) -> Self {
        if !self.is_target_path() {
            error::post_coding_error(format!("cannot append relational attribute to <{self}>"));
            return Self::empty();
        }
        if !is_valid_namespaced_identifier(name.as_str()) {
            error::post_coding_error(format!("invalid relational attribute name {name:?}"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::RelationalAttribute(name))
    }

    /// Appends a mapper over the given connection path. Valid on property
    /// paths.
    #[must_use]
    pub fn append_mapper(&self, connection: &Self) -> Self {
        if !self.is_property_path() {
            error::post_coding_error(format!("cannot append mapper to <{self}>"));
            return Self::empty();
        }
        if connection.is_empty() {
            error::post_coding_error("cannot append mapper with empty connection path");
            return Self::empty();
        }
        intern(self.clone(), PathPart::Mapper(connection.clone()))
    }

    /// Appends a mapper argument. Valid on mapper paths.
    #[must_use]
    pub fn append_mapper_arg(&self, name: Token) -> Self {
        if !self.is_mapper_path() {
            error::post_coding_error(format!("cannot append mapper arg to <{self}>"));
            return Self::empty();
        }
        if !is_valid_identifier(name.as_str()) {
            error::post_coding_error(format!("invalid mapper arg name {name:?}"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::MapperArg(name))
    }

    /// Appends the expression marker. Valid on property paths.
    #[must_use]
    pub fn append_expression(&self) -> Self {
        if !self.is_property_path() {
            error::post_coding_error(format!("cannot append expression to <{self}>"));
            return Self::empty();
        }
        intern(self.clone(), PathPart::Expression)
    }

    /// Parses `element` as a single element string and appends it.
    #[must_use]
    pub fn append_element_string(&self, element: &str) -> Self {
        let text = if *self == Self::reflexive_relative() {
            // The anchor itself prints as "."; elements append bare.
            element.to_owned()
        } else {
            format!("{self}{}", normalize_element(self, element))
        };
        let appended = Self::from_string(&text);
        if appended.is_empty() {
            error::post_coding_error(format!("cannot append element {element:?} to <{self}>"));
        }
        appended
    }

    /// Appends each element of `relative` to this path; `..` elements pop.
    /// The argument must be a relative path.
    #[must_use]
    pub fn append_path(&self, relative: &Self) -> Self {
        if relative.is_empty() {
            error::post_coding_error("cannot append empty path");
            return Self::empty();
        }
        if relative.is_absolute() {
            error::post_coding_error(format!("cannot append absolute path <{relative}>"));
            return Self::empty();
        }
        let mut result = self.clone();
        for part in relative.parts() {
            match part {
                PathPart::ReflexiveRelative => {}
                PathPart::ParentRelative => {
                    result = result.parent();
                    if result.is_empty() {
                        error::post_coding_error(format!(
                            "cannot append <{relative}>: walked above the root of <{self}>"
                        ));
                        return Self::empty();
                    }
                }
                other => result = intern(result, other.clone()),
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Prefix / relative operations

    /// True if `prefix` equals this path or is an ancestor of it. The empty
    /// path prefixes nothing.
    #[must_use]
    pub fn has_prefix(&self, prefix: &Self) -> bool {
        if prefix.is_empty() {
            return false;
        }
        let target = prefix.element_count();
        let mut cursor = self.clone();
        while cursor.element_count() > target {
            let Some(node) = cursor.node() else {
                return false;
            };
            let parent = node.parent.clone();
            cursor = parent;
        }
        // Root markers weigh zero elements, so walk the remaining zero-weight
        // chain looking for pointer identity.
        loop {
            if cursor == *prefix {
                return true;
            }
            match cursor.node() {
                Some(node) if node.element_count == target => {
                    let parent = node.parent.clone();
                    cursor = parent;
                }
                _ => return false,
            }
        }
    }

    /// Replaces the `old_prefix` portion of this path (and, when
    /// `fix_target_paths`, of any embedded target paths) with `new_prefix`.
    /// Paths not containing the prefix come back unchanged.
    #[must_use]
    pub fn replace_prefix(&self, old_prefix: &Self, new_prefix: &Self) -> Self {
        self.replace_prefix_impl(old_prefix, new_prefix, true)
    }

    /// [`replace_prefix`](Self::replace_prefix) with control over embedded
    /// target-path rewriting.
    #[must_use]
    pub fn replace_prefix_fixing_targets(
        &self,
        old_prefix: &Self,
        new_prefix: &Self,
        fix_target_paths: bool,
    ) -> Self {
        self.replace_prefix_impl(old_prefix, new_prefix, fix_target_paths)
    }

    fn replace_prefix_impl(&self, old_prefix: &Self, new_prefix: &Self, fix_targets: bool) -> Self {
        if old_prefix.is_empty() || new_prefix.is_empty() {
            error::post_coding_error("replace_prefix requires non-empty prefixes");
            return Self::empty();
        }
        if self == old_prefix {
            return new_prefix.clone();
        }
        let Some(node) = self.node() else {
            return Self::empty();
        };
        let new_parent = node.parent.replace_prefix_impl(old_prefix, new_prefix, fix_targets);
        let new_part = if fix_targets {
            match &node.part {
                PathPart::Target(t) => {
                    PathPart::Target(t.replace_prefix_impl(old_prefix, new_prefix, fix_targets))
                }
                PathPart::Mapper(t) => {
                    PathPart::Mapper(t.replace_prefix_impl(old_prefix, new_prefix, fix_targets))
                }
                other => other.clone(),
            }
        } else {
            node.part.clone()
        };
        if new_parent == node.parent && new_part == node.part {
            self.clone()
        } else {
            intern(new_parent, new_part)
        }
    }

    /// The longest path prefixing both this path and `other`.
    #[must_use]
    pub fn get_common_prefix(&self, other: &Self) -> Self {
        let mut a = self.clone();
        let mut b = other.clone();
        while a.element_count() > b.element_count() {
            a = a.parent_or_empty();
        }
        while b.element_count() > a.element_count() {
            b = b.parent_or_empty();
        }
        while a != b && !a.is_empty() {
            a = a.parent_or_empty();
            b = b.parent_or_empty();
        }
        if a == b { a } else { Self::empty() }
    }

    /// Raw parent step used by structural walks: never synthesizes `..`.
    fn parent_or_empty(&self) -> Self {
        self.node().map_or_else(Self::empty, |n| n.parent.clone())
    }

    /// Removes the longest common *suffix* of the two paths, returning the
    /// shortened pair. With `stop_at_root_prim`, neither result is shortened
    /// past its root prim.
    #[must_use]
    pub fn remove_common_suffix(&self, other: &Self, stop_at_root_prim: bool) -> (Self, Self) {
        let floor = if stop_at_root_prim { 1 } else { 0 };
        let mut a = self.clone();
        let mut b = other.clone();
        loop {
            if a.element_count() <= floor || b.element_count() <= floor {
                break;
            }
            match (a.last_part(), b.last_part()) {
                (Some(pa), Some(pb)) if pa == pb => {
                    a = a.parent_or_empty();
                    b = b.parent_or_empty();
                }
                _ => break,
            }
        }
        (a, b)
    }

    /// Replaces the name of the final element, keeping its kind.
    #[must_use]
    pub fn replace_name(&self, new_name: Token) -> Self {
        match self.last_part() {
            Some(PathPart::Prim(_)) => self.parent_or_empty().append_child(new_name),
            Some(PathPart::Property(_)) => self.parent_or_empty().append_property(new_name),
            Some(PathPart::RelationalAttribute(_)) => {
                self.parent_or_empty().append_relational_attribute(new_name)
            }
            Some(PathPart::MapperArg(_)) => self.parent_or_empty().append_mapper_arg(new_name),
            _ => {
                error::post_coding_error(format!("cannot replace name of <{self}>"));
                Self::empty()
            }
        }
    }

    /// Replaces the target of a trailing target or mapper element.
    #[must_use]
    pub fn replace_target_path(&self, new_target: &Self) -> Self {
        match self.last_part() {
            Some(PathPart::Target(_)) => self.parent_or_empty().append_target(new_target),
            Some(PathPart::Mapper(_)) => self.parent_or_empty().append_mapper(new_target),
            _ => {
                error::post_coding_error(format!("cannot replace target path of <{self}>"));
                Self::empty()
            }
        }
    }

    /// Anchors a relative path at `anchor`, producing an absolute path.
    /// Embedded target paths are absolutized as well. Absolute paths come
    /// back unchanged (with targets absolutized).
    #[must_use]
    pub fn make_absolute_path(&self, anchor: &Self) -> Self {
        if !anchor.is_absolute() || !anchor.is_absolute_root_or_prim_path() {
            error::post_coding_error(format!("anchor <{anchor}> must be an absolute prim path"));
            return Self::empty();
        }
        if self.is_empty() {
            return Self::empty();
        }
        let mut result = if self.is_absolute() {
            Self::absolute_root()
        } else {
            anchor.clone()
        };
        for part in self.parts() {
            match part {
                PathPart::AbsoluteRoot | PathPart::ReflexiveRelative => {}
                PathPart::ParentRelative => {
                    result = result.parent_or_empty();
                    if result.is_empty() {
                        error::post_coding_error(format!(
                            "<{self}> escapes the root when anchored at <{anchor}>"
                        ));
                        return Self::empty();
                    }
                }
                PathPart::Target(t) => {
                    result = intern(result, PathPart::Target(t.make_absolute_path(anchor)));
                }
                PathPart::Mapper(t) => {
                    result = intern(result, PathPart::Mapper(t.make_absolute_path(anchor)));
                }
                other => result = intern(result, other.clone()),
            }
        }
        result
    }

    /// Expresses this absolute path relative to `anchor`.
    #[must_use]
    pub fn make_relative_path(&self, anchor: &Self) -> Self {
        if !anchor.is_absolute() || !anchor.is_absolute_root_or_prim_path() {
            error::post_coding_error(format!("anchor <{anchor}> must be an absolute prim path"));
            return Self::empty();
        }
        if !self.is_absolute() {
            // Already relative.
            return self.clone();
        }
        let common = self.get_common_prefix(anchor);
        let ups = anchor.element_count() - common.element_count();
        let mut result = Self::reflexive_relative();
        for _ in 0..ups {
            result = intern(result.clone(), PathPart::ParentRelative);
        }
        // Collect the parts of self below the common prefix, shallowest first.
        let mut below: SmallVec<[&PathPart; 8]> = SmallVec::new();
        let mut cursor = self.node();
        let mut remaining = self.element_count() - common.element_count();
        while remaining > 0 {
            let node = cursor.expect("element accounting is consistent");
            below.push(&node.part);
            remaining -= node.part.element_weight();
            cursor = node.parent.node();
        }
        for part in below.iter().rev() {
            result = intern(result, (*part).clone());
        }
        result
    }

    /// Removes every variant selection element from the path.
    #[must_use]
    pub fn strip_all_variant_selections(&self) -> Self {
        let Some(node) = self.node() else {
            return Self::empty();
        };
        let parent = node.parent.strip_all_variant_selections();
        match &node.part {
            PathPart::PrimVariantSelection(..) => parent,
            part => {
                if parent == node.parent {
                    self.clone()
                } else {
                    intern(parent, part.clone())
                }
            }
        }
    }

    /// Returns the `n` longest prefixes of this path, shortest first, the
    /// last being the path itself. Root markers are not included.
    #[must_use]
    pub fn get_prefixes(&self, n: usize) -> Vec<Self> {
        let mut prefixes: Vec<Self> = Vec::with_capacity(n);
        let mut cursor = self.clone();
        while prefixes.len() < n && cursor.element_count() > 0 {
            prefixes.push(cursor.clone());
            cursor = cursor.parent_or_empty();
        }
        prefixes.reverse();
        prefixes
    }

    /// Iterator over this path and its ancestors, ending before the empty
    /// path.
    #[must_use]
    pub fn ancestors(&self) -> AncestorsRange {
        AncestorsRange {
            cursor: self.clone(),
        }
    }

    /// Fast, process-stable arbitrary ordering by interned node address.
    #[must_use]
    pub fn arbitrary_cmp(&self, other: &Self) -> Ordering {
        node_addr(self).cmp(&node_addr(other))
    }

    /// The textual form of this path. The empty path renders as the empty
    /// string.
    #[must_use]
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

/// Iterator from a path up through its ancestors; see
/// [`ScenePath::ancestors`].
#[derive(Debug, Clone)]
pub struct AncestorsRange {
    cursor: ScenePath,
}

impl Iterator for AncestorsRange {
    type Item = ScenePath;

    fn next(&mut self) -> Option<ScenePath> {
        if self.cursor.is_empty() {
            return None;
        }
        let current = self.cursor.clone();
        // Structural parent: does not synthesize `..` chains, so the walk
        // terminates at the root marker.
        self.cursor = current.parent_or_empty();
        Some(current)
    }
}

// ----------------------------------------------------------------------
// Sorted-sequence queries

/// Returns the contiguous `[lo, hi)` range of `sorted` whose members equal
/// `prefix` or have it as an ancestor. `sorted` must be sorted by the path
/// order.
#[must_use]
pub fn find_prefixed_range(sorted: &[ScenePath], prefix: &ScenePath) -> Range<usize> {
    let lo = sorted.partition_point(|p| p < prefix);
    let hi = lo + sorted[lo..].partition_point(|p| p == prefix || p.has_prefix(prefix));
    lo..hi
}

/// Returns the index of the greatest member of `sorted` that prefixes
/// `path`, or `None`.
#[must_use]
pub fn find_longest_prefix(sorted: &[ScenePath], path: &ScenePath) -> Option<usize> {
    for ancestor in path.ancestors() {
        if let Ok(index) = sorted.binary_search(&ancestor) {
            return Some(index);
        }
    }
    None
}

// ----------------------------------------------------------------------
// Trait impls

impl PartialEq for ScenePath {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for ScenePath {}

impl Hash for ScenePath {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        node_addr(self).hash(state);
    }
}

impl PartialOrd for ScenePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScenePath {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        let a = self.parts();
        let b = other.parts();
        for (pa, pb) in a.iter().zip(b.iter()) {
            match pa.cmp_parts(pb) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.parts();
        if parts.is_empty() {
            return Ok(());
        }
        let mut out = String::new();
        for (i, part) in parts.iter().enumerate() {
            match part {
                PathPart::AbsoluteRoot => out.push('/'),
                PathPart::ReflexiveRelative => {
                    if parts.len() == 1 {
                        out.push('.');
                    }
                }
                PathPart::ParentRelative => {
                    if !out.is_empty() {
                        out.push('/');
                    }
                    out.push_str("..");
                }
                PathPart::Prim(name) => {
                    if i > 0 && !(out.ends_with('/') || out.ends_with('}') || out.is_empty()) {
                        out.push('/');
                    }
                    out.push_str(name.as_str());
                }
                PathPart::PrimVariantSelection(set, variant) => {
                    out.push('{');
                    out.push_str(set.as_str());
                    out.push('=');
                    out.push_str(variant.as_str());
                    out.push('}');
                }
                PathPart::Property(name)
                | PathPart::RelationalAttribute(name)
                | PathPart::MapperArg(name) => {
                    out.push('.');
                    out.push_str(name.as_str());
                }
                PathPart::Target(target) => {
                    out.push('[');
                    out.push_str(&target.to_string());
                    out.push(']');
                }
                PathPart::Mapper(target) => {
                    out.push_str(".mapper[");
                    out.push_str(&target.to_string());
                    out.push(']');
                }
                PathPart::Expression => out.push_str(".expression"),
            }
        }
        f.write_str(&out)
    }
}

impl fmt::Debug for ScenePath {
    /// Paths debug-print in angle brackets, the conventional diagnostic form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{self}>")
    }
}

impl serde::Serialize for ScenePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ScenePath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = std::borrow::Cow::<str>::deserialize(deserializer)?;
        if text.is_empty() {
            return Ok(Self::empty());
        }
        parse::parse_path(&text).map_err(serde::de::Error::custom)
    }
}

// ----------------------------------------------------------------------
// Element helpers

fn part_element_string(part: &PathPart) -> String {
    match part {
        PathPart::AbsoluteRoot => "/".to_owned(),
        PathPart::ReflexiveRelative => ".".to_owned(),
        PathPart::ParentRelative => "..".to_owned(),
        PathPart::Prim(name) => name.as_str().to_owned(),
        PathPart::PrimVariantSelection(set, variant) => format!("{{{set}={variant}}}"),
        PathPart::Property(name) | PathPart::RelationalAttribute(name) | PathPart::MapperArg(name) => {
            format!(".{name}")
        }
        PathPart::Target(target) => format!("[{target}]"),
        PathPart::Mapper(target) => format!(".mapper[{target}]"),
        PathPart::Expression => ".expression".to_owned(),
    }
}

/// Joins an element string onto a parent's textual form, inserting the `/`
/// separator only where child-prim syntax requires one.
fn normalize_element(parent: &ScenePath, element: &str) -> String {
    let needs_slash = !element.starts_with(['.', '[', '{'])
        && !parent.is_empty()
        && !parent.is_absolute_root();
    if needs_slash {
        format!("/{element}")
    } else {
        element.to_owned()
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_namespaced_identifier(s: &str) -> bool {
    !s.is_empty() && s.split(':').all(is_valid_identifier)
}

// ----------------------------------------------------------------------
// Parsing

mod parse {
    use super::{PathPart, ScenePath, intern, is_valid_identifier};
    use crate::token::Token;

    pub(super) fn parse_path(text: &str) -> Result<ScenePath, String> {
        if text.is_empty() {
            return Err("empty string".to_owned());
        }
        let mut parser = Parser {
            bytes: text.as_bytes(),
            pos: 0,
        };
        let path = parser.parse()?;
        if parser.pos != parser.bytes.len() {
            return Err(format!("trailing characters at offset {}", parser.pos));
        }
        Ok(path)
    }

    struct Parser<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    /// Where the cursor sits relative to the grammar; constrains which
    /// elements may appear next.
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Prim,
        VariantSelection,
        Property,
        Target,
        RelationalAttribute,
        Mapper,
        Terminal,
    }

    impl Parser<'_> {
        fn peek(&self) -> Option<u8> {
            self.bytes.get(self.pos).copied()
        }

        fn eat(&mut self, byte: u8) -> bool {
            if self.peek() == Some(byte) {
                self.pos += 1;
                true
            } else {
                false
            }
        }

        fn parse(&mut self) -> Result<ScenePath, String> {
            let mut path;
            let mut state = State::Prim;

            if self.eat(b'/') {
                path = ScenePath::absolute_root();
                if self.pos == self.bytes.len() {
                    return Ok(path);
                }
                let name = self.identifier()?;
                path = intern(path, PathPart::Prim(name));
            } else if self.peek() == Some(b'.') && self.bytes.get(self.pos + 1) != Some(&b'.') {
                // A lone "." is the reflexive anchor; "./Child" spells out
                // the same anchor explicitly.
                self.pos += 1;
                if self.pos == self.bytes.len() {
                    return Ok(ScenePath::reflexive_relative());
                }
                if !self.eat(b'/') {
                    return Err("'.' may only stand alone or separate elements".to_owned());
                }
                let name = self.identifier()?;
                path = intern(ScenePath::reflexive_relative(), PathPart::Prim(name));
            } else if self.peek() == Some(b'.') {
                // One or more ".." steps, optionally followed by children.
                path = ScenePath::reflexive_relative();
                loop {
                    self.expect_str("..")?;
                    path = intern(path, PathPart::ParentRelative);
                    if self.eat(b'/') {
                        if self.peek() == Some(b'.') {
                            continue;
                        }
                        let name = self.identifier()?;
                        path = intern(path, PathPart::Prim(name));
                        break;
                    }
                    if self.pos == self.bytes.len() {
                        return Ok(path);
                    }
                    break;
                }
            } else {
                // Relative path starting at an identifier.
                let name = self.identifier()?;
                path = intern(ScenePath::reflexive_relative(), PathPart::Prim(name));
            }

            loop {
                let Some(next) = self.peek() else {
                    return Ok(path);
                };
                match (state, next) {
                    (State::Prim | State::VariantSelection, b'/') => {
                        self.pos += 1;
                        let name = self.identifier()?;
                        path = intern(path, PathPart::Prim(name));
                        state = State::Prim;
                    }
                    (State::VariantSelection, c) if c.is_ascii_alphabetic() || c == b'_' => {
                        let name = self.identifier()?;
                        path = intern(path, PathPart::Prim(name));
                        state = State::Prim;
                    }
                    (State::Prim | State::VariantSelection, b'{') => {
                        self.pos += 1;
                        let set = self.identifier()?;
                        self.expect_str("=")?;
                        let variant = if self.peek() == Some(b'}') {
                            Token::empty()
                        } else {
                            self.identifier()?
                        };
                        self.expect_str("}")?;
                        path = intern(path, PathPart::PrimVariantSelection(set, variant));
                        state = State::VariantSelection;
                    }
                    (State::Prim | State::VariantSelection, b'.') => {
                        self.pos += 1;
                        let name = self.namespaced_identifier()?;
                        path = intern(path, PathPart::Property(name));
                        state = State::Property;
                    }
                    (State::Property | State::RelationalAttribute, b'[') => {
                        let target = self.bracketed_path()?;
                        path = intern(path, PathPart::Target(target));
                        state = State::Target;
                    }
                    (State::Property | State::RelationalAttribute, b'.') => {
                        self.pos += 1;
                        if self.try_str("expression") {
                            path = intern(path, PathPart::Expression);
                            state = State::Terminal;
                        } else if self.try_str("mapper") && self.peek() == Some(b'[') {
                            let target = self.bracketed_path()?;
                            path = intern(path, PathPart::Mapper(target));
                            state = State::Mapper;
                        } else {
                            return Err(format!(
                                "expected 'mapper[' or 'expression' at offset {}",
                                self.pos
                            ));
                        }
                    }
                    (State::Target, b'.') => {
                        self.pos += 1;
                        let name = self.namespaced_identifier()?;
                        path = intern(path, PathPart::RelationalAttribute(name));
                        state = State::RelationalAttribute;
                    }
                    (State::Mapper, b'.') => {
                        self.pos += 1;
                        let name = self.identifier()?;
                        path = intern(path, PathPart::MapperArg(name));
                        state = State::Terminal;
                    }
                    (_, c) => {
                        return Err(format!(
                            "unexpected character {:?} at offset {}",
                            char::from(c),
                            self.pos
                        ));
                    }
                }
            }
        }

        fn identifier(&mut self) -> Result<Token, String> {
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.bytes[start..self.pos])
                .map_err(|_| "non-utf8 identifier".to_owned())?;
            if !is_valid_identifier(text) {
                return Err(format!("invalid identifier at offset {start}"));
            }
            Ok(Token::new(text))
        }

        fn namespaced_identifier(&mut self) -> Result<Token, String> {
            let start = self.pos;
            loop {
                let _ = self.identifier()?;
                if !self.eat(b':') {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.bytes[start..self.pos])
                .map_err(|_| "non-utf8 identifier".to_owned())?;
            Ok(Token::new(text))
        }

        fn bracketed_path(&mut self) -> Result<ScenePath, String> {
            if !self.eat(b'[') {
                return Err(format!("expected '[' at offset {}", self.pos));
            }
            let start = self.pos;
            let mut depth = 1usize;
            while let Some(c) = self.peek() {
                match c {
                    b'[' => depth += 1,
                    b']' => {
                        depth -= 1;
                        if depth == 0 {
                            let inner = std::str::from_utf8(&self.bytes[start..self.pos])
                                .map_err(|_| "non-utf8 target".to_owned())?;
                            self.pos += 1;
                            return parse_path(inner);
                        }
                    }
                    _ => {}
                }
                self.pos += 1;
            }
            Err("unterminated '['".to_owned())
        }

        fn try_str(&mut self, s: &str) -> bool {
            if self.bytes[self.pos..].starts_with(s.as_bytes()) {
                // Only take the keyword when it is not a prefix of a longer
                // identifier.
                let after = self.bytes.get(self.pos + s.len()).copied();
                if !after.is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b':') {
                    self.pos += s.len();
                    return true;
                }
            }
            false
        }

        fn expect_str(&mut self, s: &str) -> Result<(), String> {
            if self.bytes[self.pos..].starts_with(s.as_bytes()) {
                self.pos += s.len();
                Ok(())
            } else {
                Err(format!("expected {s:?} at offset {}", self.pos))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> ScenePath {
        let path = ScenePath::from_string(text);
        assert!(!path.is_empty(), "{text:?} should parse");
        path
    }

    #[test]
    fn parse_and_print_round_trip() {
        for text in [
            "/",
            "/Hello",
            "/Hello/World",
            "/Hello.size",
            "/Hello.ns:size",
            "/A{v=x}",
            "/A{v=x}B",
            "/A{v=x}B.attr",
            "/A{v=}",
            "/A.rel[/B/C]",
            "/A.rel[/B/C].attr",
            "/A.attr.mapper[/T]",
            "/A.attr.mapper[/T].arg",
            "/A.attr.expression",
            ".",
            "..",
            "../..",
            "../Foo",
            "Foo/Bar.attr",
        ] {
            assert_eq!(p(text).to_string(), text, "round trip of {text:?}");
        }
    }

    #[test]
    fn malformed_input_yields_empty() {
        let collector = error::DiagnosticCollector::new();
        for text in ["", "//", "/Trailing/", "/9bad", "/A..b", "/A.b..c", "/A[", "/A{v}"] {
            assert!(
                ScenePath::from_string(text).is_empty(),
                "{text:?} should fail to parse"
            );
        }
        assert!(!collector.take().is_empty());
    }

    #[test]
    fn interning_is_pointer_identity() {
        assert_eq!(p("/A/B/C"), p("/A").append_child(Token::new("B")).append_child(Token::new("C")));
        let a = p("/X/Y");
        let b = p("/X/Y");
        assert_eq!(node_addr(&a), node_addr(&b));
    }

    #[test]
    fn kind_predicates() {
        assert!(p("/").is_absolute_root());
        assert!(p("/A").is_root_prim_path());
        assert!(!p("/A/B").is_root_prim_path());
        assert!(p("/A/B").is_prim_path());
        assert!(p("/A.b").is_prim_property_path());
        assert!(p("/A.ns:b").is_namespaced_property_path());
        assert!(p("/A{v=x}").is_prim_variant_selection_path());
        assert!(p("/A{v=x}").is_prim_or_prim_variant_selection_path());
        assert!(p("/A.r[/T]").is_target_path());
        assert!(p("/A.r[/T].a").is_relational_attribute_path());
        assert!(p("/A.r[/T].a").is_property_path());
        assert!(p("/A.a.mapper[/T]").is_mapper_path());
        assert!(p("/A.a.mapper[/T].x").is_mapper_arg_path());
        assert!(p("/A.a.expression").is_expression_path());
        assert!(p("..").is_prim_path());
        assert!(p("/A{v=x}B.attr").contains_prim_variant_selection());
    }

    #[test]
    fn parent_and_append_invert() {
        let path = p("/A/B");
        assert_eq!(path.parent().append_child(path.name_token()), path);
        let prop = p("/A/B.attr");
        assert_eq!(prop.parent().append_property(prop.name_token()), prop);
        assert_eq!(p("/A").parent(), p("/"));
        assert_eq!(p("/").parent(), ScenePath::empty());
        assert_eq!(p(".").parent(), p(".."));
        assert_eq!(p("..").parent(), p("../.."));
    }

    #[test]
    fn prim_path_strips_suffixes() {
        assert_eq!(p("/A/B.attr").prim_path(), p("/A/B"));
        assert_eq!(p("/A{v=x}.attr").prim_path(), p("/A"));
        assert_eq!(p("/A{v=x}.attr").prim_or_prim_variant_selection_path(), p("/A{v=x}"));
        assert_eq!(p("/A.r[/T].a").prim_path(), p("/A"));
        assert_eq!(p("/A/B").prim_path(), p("/A/B"));
    }

    #[test]
    fn has_prefix_walks_ancestry() {
        assert!(p("/A/B/C").has_prefix(&p("/A")));
        assert!(p("/A/B/C").has_prefix(&p("/A/B/C")));
        assert!(p("/A/B/C").has_prefix(&p("/")));
        assert!(!p("/A/B").has_prefix(&p("/A/B/C")));
        assert!(!p("/AB").has_prefix(&p("/A")));
        assert!(!p("/A").has_prefix(&ScenePath::empty()));
        assert!(p("/A.attr").has_prefix(&p("/A")));
    }

    #[test]
    fn replace_prefix_identity_law() {
        let path = p("/A/B/C.attr");
        let prefix = p("/A/B");
        assert_eq!(path.replace_prefix(&prefix, &prefix), path);
        assert_eq!(path.replace_prefix(&p("/A"), &p("/Z")), p("/Z/B/C.attr"));
        // No match leaves the path untouched.
        assert_eq!(path.replace_prefix(&p("/Q"), &p("/Z")), path);
    }

    #[test]
    fn replace_prefix_fixes_embedded_targets() {
        let path = p("/A.rel[/A/T]");
        assert_eq!(path.replace_prefix(&p("/A"), &p("/B")), p("/B.rel[/B/T]"));
        assert_eq!(
            path.replace_prefix_fixing_targets(&p("/A"), &p("/B"), false),
            p("/B.rel[/A/T]")
        );
    }

    #[test]
    fn common_prefix_and_suffix() {
        assert_eq!(p("/A/B/C").get_common_prefix(&p("/A/B/D")), p("/A/B"));
        assert_eq!(p("/A").get_common_prefix(&p("/B")), p("/"));
        let (a, b) = p("/A/X/Tail").remove_common_suffix(&p("/B/Y/Tail"), false);
        assert_eq!((a, b), (p("/A/X"), p("/B/Y")));
        let (a, b) = p("/Tail").remove_common_suffix(&p("/B/Tail"), true);
        assert_eq!((a, b), (p("/Tail"), p("/B/Tail")));
    }

    #[test]
    fn absolute_relative_round_trip() {
        let anchor = p("/A/B");
        let abs = p("/A/B/C/D");
        let rel = abs.make_relative_path(&anchor);
        assert_eq!(rel, p("C/D"));
        assert_eq!(rel.make_absolute_path(&anchor), abs);

        let cousin = p("/A/X");
        let rel = cousin.make_relative_path(&anchor);
        assert_eq!(rel, p("../X"));
        assert_eq!(rel.make_absolute_path(&anchor), cousin);

        assert_eq!(anchor.make_relative_path(&anchor), p("."));
    }

    #[test]
    fn strip_variant_selections() {
        assert_eq!(p("/A{v=x}B{w=y}.attr").strip_all_variant_selections(), p("/A/B.attr"));
        assert_eq!(p("/A/B").strip_all_variant_selections(), p("/A/B"));
    }

    #[test]
    fn prefixes_and_ancestors() {
        let path = p("/A/B/C");
        let prefixes = path.get_prefixes(2);
        assert_eq!(prefixes, vec![p("/A/B"), p("/A/B/C")]);
        let ancestors: Vec<_> = path.ancestors().collect();
        assert_eq!(ancestors, vec![p("/A/B/C"), p("/A/B"), p("/A"), p("/")]);
    }

    #[test]
    fn ordering_puts_prefixes_first() {
        let mut paths = vec![p("/a/b/c"), p("/a"), p("/a/d"), p("/"), p("/a/b")];
        paths.sort();
        assert_eq!(paths[0], p("/"));
        assert_eq!(paths[1], p("/a"));
        assert!(ScenePath::empty() < p("/"));
        // Subtree contiguity for the sorted order.
        let range = find_prefixed_range(&paths, &p("/a/b"));
        assert_eq!(&paths[range], &[p("/a/b"), p("/a/b/c")]);
    }

    #[test]
    fn prefixed_range_matches_filter() {
        let mut paths: Vec<_> = ["/a", "/a/b", "/a/b/c", "/a/bc", "/ab", "/b"]
            .iter()
            .map(|t| p(t))
            .collect();
        paths.sort();
        let query = p("/a/b");
        let range = find_prefixed_range(&paths, &query);
        let expected: Vec<_> = paths
            .iter()
            .filter(|x| **x == query || x.has_prefix(&query))
            .cloned()
            .collect();
        assert_eq!(&paths[range], expected.as_slice());
    }

    #[test]
    fn longest_prefix_query() {
        let mut paths: Vec<_> = ["/a", "/a/b", "/q"].iter().map(|t| p(t)).collect();
        paths.sort();
        let found = find_longest_prefix(&paths, &p("/a/b/c/d")).map(|i| paths[i].clone());
        assert_eq!(found, Some(p("/a/b")));
        assert_eq!(find_longest_prefix(&paths, &p("/z")), None);
    }

    #[test]
    fn element_strings_reconstruct() {
        for text in ["/A/B", "/A.b", "/A{v=x}", "/A.r[/T]", "/A.a.mapper[/T]"] {
            let path = p(text);
            let rebuilt = path.parent().append_element_string(&path.element_string());
            assert_eq!(rebuilt, path, "element string of {text:?}");
        }
    }

    #[test]
    fn concurrent_interning_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| node_addr(&p("/Conc/Urrent/Path"))))
            .collect();
        let addrs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }
}
