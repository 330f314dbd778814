//! The registry mapping value-type-name tokens to concrete value types.
//!
//! Scene description refers to types by name (`float3`, `color3f`,
//! `token[]`); the registry resolves those names to a storage type, a role,
//! and a default value. Role names (color, point, normal, texCoord, vector)
//! share storage with their unroled base type and differ only in metadata.

use std::sync::LazyLock;

use ahash::AHashMap;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    token::Token,
    types::{Half, Matrix2d, Matrix3d, Matrix4d, Quatd, Quatf, Quath, Vec2d, Vec2f, Vec2h, Vec2i, Vec3d, Vec3f,
        Vec3h, Vec3i, Vec4d, Vec4f, Vec4h, Vec4i},
    value::Value,
};

/// Interpretation attached to a value type beyond its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum ValueRole {
    #[default]
    None,
    Point,
    Normal,
    Vector,
    Color,
    TexCoord,
    Frame,
}

/// Metadata for one registered value type name.
#[derive(Debug, Clone)]
pub struct ValueTypeInfo {
    /// The registered name, e.g. `color3f`.
    pub name: Token,
    /// The unroled storage name, e.g. `float3` for `color3f`.
    pub storage_name: Token,
    /// Role carried by the name.
    pub role: ValueRole,
    /// Default value for newly created attributes of this type.
    pub default: Value,
    /// Default display unit, or `None` for dimensionless types.
    pub default_unit: Option<Token>,
    /// The array form of this name (`float3[]`), if this is a scalar name.
    pub array_name: Option<Token>,
    /// The scalar form of this name, if this is an array name.
    pub scalar_name: Option<Token>,
}

impl ValueTypeInfo {
    /// True for array type names.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.scalar_name.is_some()
    }
}

/// Process-wide table of registered value types; see [`instance`].
pub struct ValueTypeRegistry {
    by_name: AHashMap<Token, ValueTypeInfo>,
}

impl ValueTypeRegistry {
    /// Looks up a type name, returning `None` for unregistered names.
    #[must_use]
    pub fn find(&self, name: Token) -> Option<&ValueTypeInfo> {
        self.by_name.get(&name)
    }

    /// All registered names, sorted for deterministic listings.
    #[must_use]
    pub fn all_names(&self) -> Vec<Token> {
        let mut names: Vec<Token> = self.by_name.keys().copied().collect();
        names.sort();
        names
    }

    fn register(&mut self, name: &str, storage: &str, role: ValueRole, default: Value) {
        let name_token = Token::new(name);
        let array_token = Token::new(&format!("{name}[]"));
        self.by_name.insert(
            name_token,
            ValueTypeInfo {
                name: name_token,
                storage_name: Token::new(storage),
                role,
                default: default.clone(),
                default_unit: None,
                array_name: Some(array_token),
                scalar_name: None,
            },
        );
        self.by_name.insert(
            array_token,
            ValueTypeInfo {
                name: array_token,
                storage_name: Token::new(&format!("{storage}[]")),
                role,
                default: Value::Empty,
                default_unit: None,
                array_name: None,
                scalar_name: Some(name_token),
            },
        );
    }
}

/// The process-wide registry, built on first use.
#[must_use]
pub fn instance() -> &'static ValueTypeRegistry {
    static REGISTRY: LazyLock<ValueTypeRegistry> = LazyLock::new(build);
    &REGISTRY
}

fn build() -> ValueTypeRegistry {
    use ValueRole as R;
    let mut registry = ValueTypeRegistry {
        by_name: AHashMap::with_capacity(128),
    };
    let r = &mut registry;

    // Base scalar types.
    r.register("bool", "bool", R::None, Value::from(false));
    r.register("uchar", "uchar", R::None, Value::from(0u8));
    r.register("int", "int", R::None, Value::from(0i32));
    r.register("uint", "uint", R::None, Value::from(0u32));
    r.register("int64", "int64", R::None, Value::from(0i64));
    r.register("uint64", "uint64", R::None, Value::from(0u64));
    r.register("half", "half", R::None, Value::from(Half::default()));
    r.register("float", "float", R::None, Value::from(0.0f32));
    r.register("double", "double", R::None, Value::from(0.0f64));
    r.register("timecode", "timecode", R::None, Value::from(crate::types::TimeCode(0.0)));
    r.register("string", "string", R::None, Value::from(String::new()));
    r.register("token", "token", R::None, Value::from(Token::empty()));
    r.register("asset", "asset", R::None, Value::from(crate::types::AssetPath::default()));

    // Aggregates.
    r.register("int2", "int2", R::None, Value::from(Vec2i::default()));
    r.register("int3", "int3", R::None, Value::from(Vec3i::default()));
    r.register("int4", "int4", R::None, Value::from(Vec4i::default()));
    r.register("half2", "half2", R::None, Value::from(Vec2h::default()));
    r.register("half3", "half3", R::None, Value::from(Vec3h::default()));
    r.register("half4", "half4", R::None, Value::from(Vec4h::default()));
    r.register("float2", "float2", R::None, Value::from(Vec2f::default()));
    r.register("float3", "float3", R::None, Value::from(Vec3f::default()));
    r.register("float4", "float4", R::None, Value::from(Vec4f::default()));
    r.register("double2", "double2", R::None, Value::from(Vec2d::default()));
    r.register("double3", "double3", R::None, Value::from(Vec3d::default()));
    r.register("double4", "double4", R::None, Value::from(Vec4d::default()));
    r.register("quath", "quath", R::None, Value::from(Quath::default()));
    r.register("quatf", "quatf", R::None, Value::from(Quatf::default()));
    r.register("quatd", "quatd", R::None, Value::from(Quatd::default()));
    r.register("matrix2d", "matrix2d", R::None, Value::from(Matrix2d::identity()));
    r.register("matrix3d", "matrix3d", R::None, Value::from(Matrix3d::identity()));
    r.register("matrix4d", "matrix4d", R::None, Value::from(Matrix4d::identity()));

    // Role types share storage with their base type.
    r.register("point3h", "half3", R::Point, Value::from(Vec3h::default()));
    r.register("point3f", "float3", R::Point, Value::from(Vec3f::default()));
    r.register("point3d", "double3", R::Point, Value::from(Vec3d::default()));
    r.register("normal3h", "half3", R::Normal, Value::from(Vec3h::default()));
    r.register("normal3f", "float3", R::Normal, Value::from(Vec3f::default()));
    r.register("normal3d", "double3", R::Normal, Value::from(Vec3d::default()));
    r.register("vector3h", "half3", R::Vector, Value::from(Vec3h::default()));
    r.register("vector3f", "float3", R::Vector, Value::from(Vec3f::default()));
    r.register("vector3d", "double3", R::Vector, Value::from(Vec3d::default()));
    r.register("color3h", "half3", R::Color, Value::from(Vec3h::default()));
    r.register("color3f", "float3", R::Color, Value::from(Vec3f::default()));
    r.register("color3d", "double3", R::Color, Value::from(Vec3d::default()));
    r.register("color4h", "half4", R::Color, Value::from(Vec4h::default()));
    r.register("color4f", "float4", R::Color, Value::from(Vec4f::default()));
    r.register("color4d", "double4", R::Color, Value::from(Vec4d::default()));
    r.register("texCoord2h", "half2", R::TexCoord, Value::from(Vec2h::default()));
    r.register("texCoord2f", "float2", R::TexCoord, Value::from(Vec2f::default()));
    r.register("texCoord2d", "double2", R::TexCoord, Value::from(Vec2d::default()));
    r.register("texCoord3h", "half3", R::TexCoord, Value::from(Vec3h::default()));
    r.register("texCoord3f", "float3", R::TexCoord, Value::from(Vec3f::default()));
    r.register("texCoord3d", "double3", R::TexCoord, Value::from(Vec3d::default()));
    r.register("frame4d", "matrix4d", R::Frame, Value::from(Matrix4d::identity()));

    // Opaque has no array form and no meaningful default.
    let opaque = Token::new("opaque");
    registry.by_name.insert(
        opaque,
        ValueTypeInfo {
            name: opaque,
            storage_name: opaque,
            role: ValueRole::None,
            default: Value::from(crate::types::OpaqueValue),
            default_unit: None,
            array_name: None,
            scalar_name: None,
        },
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_types_resolve() {
        let info = instance().find(Token::new("float")).unwrap();
        assert_eq!(info.role, ValueRole::None);
        assert_eq!(info.default, Value::from(0.0f32));
        assert_eq!(info.array_name, Some(Token::new("float[]")));
        assert!(!info.is_array());
    }

    #[test]
    fn role_types_share_storage() {
        let color = instance().find(Token::new("color3f")).unwrap();
        assert_eq!(color.role, ValueRole::Color);
        assert_eq!(color.storage_name, Token::new("float3"));
        let tex = instance().find(Token::new("texCoord2f[]")).unwrap();
        assert!(tex.is_array());
        assert_eq!(tex.scalar_name, Some(Token::new("texCoord2f")));
    }

    #[test]
    fn unknown_names_are_absent() {
        assert!(instance().find(Token::new("no-such-type")).is_none());
        assert!(instance().find(Token::new("opaque")).unwrap().array_name.is_none());
    }
}
