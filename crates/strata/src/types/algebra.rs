//! Fixed-dimension vector, quaternion, and matrix carriers.
//!
//! These are storage types, not a math library: the engine moves them between
//! stores and files but never evaluates them. Roles (point, normal, color,
//! texture coordinate) are distinguished by value-type name in the registry,
//! not by distinct Rust types, so a `color3f` and a `point3f` both travel as
//! [`Vec3f`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::half::Half;

macro_rules! vec_type {
    ($name:ident, $dim:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
        pub struct $name<T>(pub [T; $dim]);

        impl<T: Copy> $name<T> {
            /// Returns the components as a fixed-size array.
            #[inline]
            #[must_use]
            pub fn data(&self) -> [T; $dim] {
                self.0
            }
        }

        impl<T> From<[T; $dim]> for $name<T> {
            fn from(data: [T; $dim]) -> Self {
                Self(data)
            }
        }

        impl<T: fmt::Display> fmt::Display for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "(")?;
                for (i, c) in self.0.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
        }
    };
}

vec_type!(Vec2, 2, "A two-component vector.");
vec_type!(Vec3, 3, "A three-component vector.");
vec_type!(Vec4, 4, "A four-component vector.");

pub type Vec2h = Vec2<Half>;
pub type Vec2f = Vec2<f32>;
pub type Vec2d = Vec2<f64>;
pub type Vec2i = Vec2<i32>;
pub type Vec3h = Vec3<Half>;
pub type Vec3f = Vec3<f32>;
pub type Vec3d = Vec3<f64>;
pub type Vec3i = Vec3<i32>;
pub type Vec4h = Vec4<Half>;
pub type Vec4f = Vec4<f32>;
pub type Vec4d = Vec4<f64>;
pub type Vec4i = Vec4<i32>;

/// A quaternion stored as a real part plus a three-component imaginary part.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quat<T> {
    pub real: T,
    pub imaginary: Vec3<T>,
}

impl<T> Quat<T> {
    /// Creates a quaternion from its real and imaginary parts.
    pub fn new(real: T, i: T, j: T, k: T) -> Self {
        Self {
            real,
            imaginary: Vec3([i, j, k]),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Quat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} + {}i)", self.real, self.imaginary)
    }
}

pub type Quath = Quat<Half>;
pub type Quatf = Quat<f32>;
pub type Quatd = Quat<f64>;

macro_rules! matrix_type {
    ($name:ident, $dim:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub [[f64; $dim]; $dim]);

        impl $name {
            /// Returns the identity matrix.
            #[must_use]
            pub fn identity() -> Self {
                let mut data = [[0.0; $dim]; $dim];
                for (i, row) in data.iter_mut().enumerate() {
                    row[i] = 1.0;
                }
                Self(data)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::identity()
            }
        }

        impl From<[[f64; $dim]; $dim]> for $name {
            fn from(data: [[f64; $dim]; $dim]) -> Self {
                Self(data)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "(")?;
                for (i, row) in self.0.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "(")?;
                    for (j, c) in row.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{c}")?;
                    }
                    write!(f, ")")?;
                }
                write!(f, ")")
            }
        }
    };
}

matrix_type!(Matrix2d, 2, "A row-major 2x2 double matrix.");
matrix_type!(Matrix3d, 3, "A row-major 3x3 double matrix.");
matrix_type!(Matrix4d, 4, "A row-major 4x4 double matrix.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_defaults() {
        assert_eq!(Matrix2d::default(), Matrix2d([[1.0, 0.0], [0.0, 1.0]]));
        assert_eq!(Matrix4d::identity().0[3][3], 1.0);
        assert_eq!(Matrix4d::identity().0[3][0], 0.0);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Vec3f::from([1.0, 2.0, 3.0]).to_string(), "(1, 2, 3)");
        assert_eq!(Quatf::new(1.0, 0.0, 0.0, 0.0).to_string(), "(1 + (0, 0, 0)i)");
    }
}
