//! Mathematical types shared between sender and receiver.
//!
//! These are the canonical representations used in pose samples.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::constants::SLERP_LINEAR_THRESHOLD;

/// 3D Vector - position, velocity, direction
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array
    #[must_use]
    pub const fn from_array(arr: [f32; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// True when no component is NaN or infinite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Linear interpolation. `t` is not clamped.
    #[inline]
    #[must_use]
    pub fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Quaternion for rotations
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W component
    pub w: f32,
}

impl Quaternion {
    /// Creates a new quaternion
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Identity rotation
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Rotation of `angle_rad` radians around `axis`.
    ///
    /// Returns `None` if the axis has zero length.
    #[must_use]
    pub fn from_axis_angle(axis: Vec3, angle_rad: f32) -> Option<Self> {
        let len = axis.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return None;
        }
        let half = angle_rad * 0.5;
        let s = half.sin() / len;
        Some(Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos()))
    }

    /// Converts to array in `[x, y, z, w]` order
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Creates from array in `[x, y, z, w]` order
    #[must_use]
    pub const fn from_array(arr: [f32; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }

    /// 4D dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Euclidean norm
    #[must_use]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// True when no component is NaN or infinite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// True when `| |q| - 1 | <= tolerance`.
    #[must_use]
    pub fn is_unit(self, tolerance: f32) -> bool {
        self.is_finite() && (self.length() - 1.0).abs() <= tolerance
    }

    /// Returns the unit quaternion pointing the same way, or `None` for a
    /// zero or non-finite quaternion.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return None;
        }
        let inv = 1.0 / len;
        Some(Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv))
    }

    /// Same rotation, opposite hemisphere.
    #[must_use]
    pub fn negated(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, -self.w)
    }

    /// Angle in radians between two unit rotations.
    #[must_use]
    pub fn angle_to(self, other: Self) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        2.0 * d.acos()
    }

    /// Spherical interpolation along the shortest arc.
    ///
    /// `t <= 0` returns `a` and `t >= 1` returns `b` unchanged. For nearly
    /// parallel inputs the result is a normalized lerp, which avoids the
    /// division by a vanishing `sin(theta)`.
    #[must_use]
    pub fn slerp(a: Self, b: Self, t: f32) -> Self {
        if t <= 0.0 {
            return a;
        }
        if t >= 1.0 {
            return b;
        }

        let mut dot = a.dot(b);
        let mut end = b;
        if dot < 0.0 {
            dot = -dot;
            end = b.negated();
        }

        if dot > 1.0 - SLERP_LINEAR_THRESHOLD {
            let lerped = Self::new(
                a.x + (end.x - a.x) * t,
                a.y + (end.y - a.y) * t,
                a.z + (end.z - a.z) * t,
                a.w + (end.w - a.w) * t,
            );
            return lerped.normalized().unwrap_or(a);
        }

        let theta = dot.min(1.0).acos();
        let sin_theta = theta.sin();
        let wa = ((1.0 - t) * theta).sin() / sin_theta;
        let wb = (t * theta).sin() / sin_theta;

        Self::new(
            a.x * wa + end.x * wb,
            a.y * wa + end.y * wb,
            a.z * wa + end.z * wb,
            a.w * wa + end.w * wb,
        )
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Pose - world-space position + orientation
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Pose {
    /// Position
    pub position: Vec3,
    /// Orientation (unit quaternion)
    pub orientation: Quaternion,
}

impl Pose {
    /// Creates a new pose
    #[must_use]
    pub const fn new(position: Vec3, orientation: Quaternion) -> Self {
        Self { position, orientation }
    }

    /// Identity pose at the origin
    pub const IDENTITY: Self = Self::new(Vec3::ZERO, Quaternion::IDENTITY);

    /// True when every component is finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }

    /// Blends two poses: position lerp, orientation slerp.
    ///
    /// `t` is clamped to `[0, 1]`; the endpoints are returned bit-exact.
    #[must_use]
    pub fn lerp(a: Self, b: Self, t: f32) -> Self {
        if t <= 0.0 {
            return a;
        }
        if t >= 1.0 {
            return b;
        }
        Self::new(
            Vec3::lerp(a.position, b.position, t),
            Quaternion::slerp(a.orientation, b.orientation, t),
        )
    }
}
