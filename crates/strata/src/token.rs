//! Process-wide string interning for names, field keys, and path components.
//!
//! A [`Token`] is a `Copy` handle to an interned string. Interned storage is
//! leaked, so equality and hashing reduce to pointer comparisons; two tokens
//! built from equal strings anywhere in the process are identical by address.
//! The interner is internally synchronized and safe to call from any thread.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::{LazyLock, Mutex},
};

use ahash::AHashSet;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// The process-wide intern pool.
///
/// Strings are leaked on first insertion to obtain the `'static` lifetime;
/// tokens are immortal by design, which is what makes pointer equality sound.
/// The pool is seeded with every [`FieldKey`] name so that field lookups by
/// well-known key never allocate.
static POOL: LazyLock<Mutex<AHashSet<&'static str>>> = LazyLock::new(|| {
    let mut pool = AHashSet::with_capacity(256);
    pool.insert("");
    for key in FieldKey::iter() {
        pool.insert(key.into());
    }
    Mutex::new(pool)
});

/// An interned, immortal string handle.
///
/// `Token` is 8 bytes, `Copy`, and compares and hashes by pointer. Content
/// ordering (`Ord`) is lexicographic for deterministic output; code that only
/// needs *some* stable order (list-op dedup, field sorting) should prefer
/// [`Token::arbitrary_cmp`], which compares addresses.
#[derive(Clone, Copy)]
pub struct Token(&'static str);

impl Token {
    /// Interns `s` and returns its token.
    #[must_use]
    pub fn new(s: &str) -> Self {
        let mut pool = POOL.lock().expect("token pool poisoned");
        if let Some(existing) = pool.get(s) {
            return Self(existing);
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        pool.insert(leaked);
        Self(leaked)
    }

    /// Returns the empty token.
    #[must_use]
    pub fn empty() -> Self {
        Self::new("")
    }

    /// Returns the interned string.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.0
    }

    /// Returns true if this is the empty token.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    /// Fast, stable-within-a-process ordering by interned address.
    ///
    /// Unrelated to lexicographic order; use only where the specific order
    /// does not matter (dedup sets, sort-then-merge field walks).
    #[inline]
    #[must_use]
    pub fn arbitrary_cmp(self, other: Self) -> Ordering {
        (self.0.as_ptr() as usize).cmp(&(other.0.as_ptr() as usize))
    }
}

impl PartialEq for Token {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Token {}

impl Hash for Token {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        if *self == *other {
            Ordering::Equal
        } else {
            self.0.cmp(other.0)
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl serde::Serialize for Token {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Token {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = std::borrow::Cow::<str>::deserialize(deserializer)?;
        Ok(Self::new(&s))
    }
}

/// Well-known field keys stored on spec records.
///
/// The string form of each variant (camelCase of the variant name) is the
/// token actually stored in data stores and files. These are pre-interned at
/// pool construction, so [`FieldKey::token`] never takes the slow insert path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum FieldKey {
    // Prim fields
    Specifier,
    TypeName,
    Kind,
    Active,
    Hidden,
    Instanceable,
    Comment,
    Documentation,
    CustomData,
    AssetInfo,
    References,
    Payload,
    InheritPaths,
    Specializes,
    VariantSelection,
    VariantSetNames,
    Relocates,
    PrimOrder,
    PropertyOrder,

    // Property fields
    Custom,
    Variability,
    Default,
    TimeSamples,
    Permission,
    DisplayGroup,
    DisplayName,
    Prefix,
    Suffix,
    SymmetricPeer,
    SymmetryFunction,
    SymmetryArguments,

    // Attribute fields
    ColorSpace,
    DisplayUnit,
    AllowedTokens,
    ConnectionPaths,

    // Relationship fields
    TargetPaths,
    NoLoadHint,

    // Layer (pseudo-root) fields
    SubLayers,
    SubLayerOffsets,
    DefaultPrim,
    StartTimeCode,
    EndTimeCode,
    TimeCodesPerSecond,
    FramesPerSecond,

    // Children fields
    PrimChildren,
    PropertyChildren,
    VariantSetChildren,
    VariantChildren,
    ConnectionChildren,
    TargetChildren,
    MapperChildren,
    MapperArgChildren,
    ExpressionChildren,
}

impl FieldKey {
    /// Returns the interned token for this field key.
    #[inline]
    #[must_use]
    pub fn token(self) -> Token {
        Token::new(self.into())
    }

    /// Returns true if this field stores the name list of a child spec kind.
    ///
    /// Children fields are traversed structurally (deep copies, namespace
    /// edits) rather than copied by value.
    #[must_use]
    pub fn holds_children(self) -> bool {
        matches!(
            self,
            Self::PrimChildren
                | Self::PropertyChildren
                | Self::VariantSetChildren
                | Self::VariantChildren
                | Self::ConnectionChildren
                | Self::TargetChildren
                | Self::MapperChildren
                | Self::MapperArgChildren
                | Self::ExpressionChildren
        )
    }

    /// Returns true if `token` names any children field.
    #[must_use]
    pub fn token_holds_children(token: Token) -> bool {
        FieldKey::iter().any(|key| key.holds_children() && key.token() == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_intern_to_identical_tokens() {
        let a = Token::new("Hello");
        let b = Token::new(&format!("He{}", "llo"));
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str(), b.as_str()), "tokens must share storage");
    }

    #[test]
    fn ordering_is_lexicographic_by_content() {
        let mut tokens = vec![Token::new("b"), Token::new("a"), Token::new("c")];
        tokens.sort();
        let strs: Vec<_> = tokens.iter().map(|t| t.as_str()).collect();
        assert_eq!(strs, ["a", "b", "c"]);
    }

    #[test]
    fn field_keys_render_camel_case() {
        assert_eq!(FieldKey::TypeName.token().as_str(), "typeName");
        assert_eq!(FieldKey::SubLayerOffsets.token().as_str(), "subLayerOffsets");
        assert_eq!(FieldKey::Default.token().as_str(), "default");
        assert!(FieldKey::PrimChildren.holds_children());
        assert!(!FieldKey::Specifier.holds_children());
    }

    #[test]
    fn concurrent_interning_yields_one_address() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Token::new("racer").as_str().as_ptr() as usize))
            .collect();
        let addrs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]), "all threads must agree");
    }
}
