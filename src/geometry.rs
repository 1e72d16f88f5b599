//! Vectors, axis-aligned bounds, and the cubic "box" derived from them.

use num_traits::Float;
use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};

/// A 3D Cartesian vector, generic over the scalar type the kernel runs in.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3<T> {
    pub data: [T; 3],
}

impl<T: Float> Vec3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { data: [x, y, z] }
    }

    pub fn splat(v: T) -> Self {
        Self { data: [v, v, v] }
    }

    pub fn zero() -> Self {
        Self::splat(T::zero())
    }

    pub fn dot(&self, other: &Self) -> T {
        self[0] * other[0] + self[1] * other[1] + self[2] * other[2]
    }

    pub fn norm_sq(&self) -> T {
        self.dot(self)
    }

    pub fn map(&self, mut f: impl FnMut(T) -> T) -> Self {
        Vec3::new(f(self[0]), f(self[1]), f(self[2]))
    }

    pub fn zip_map(&self, other: &Self, mut f: impl FnMut(T, T) -> T) -> Self {
        Vec3::new(
            f(self[0], other[0]),
            f(self[1], other[1]),
            f(self[2], other[2]),
        )
    }
}

impl<T: Copy> Index<usize> for Vec3<T> {
    type Output = T;
    fn index(&self, i: usize) -> &T {
        &self.data[i]
    }
}

impl<T: Copy> IndexMut<usize> for Vec3<T> {
    fn index_mut(&mut self, i: usize) -> &mut T {
        &mut self.data[i]
    }
}

impl<T: Float> Add for Vec3<T> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.zip_map(&rhs, |a, b| a + b)
    }
}

impl<T: Float> Sub for Vec3<T> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(&rhs, |a, b| a - b)
    }
}

impl<T: Float> Mul<T> for Vec3<T> {
    type Output = Self;
    fn mul(self, rhs: T) -> Self {
        self.map(|a| a * rhs)
    }
}

impl<T: Float> Div<T> for Vec3<T> {
    type Output = Self;
    fn div(self, rhs: T) -> Self {
        self.map(|a| a / rhs)
    }
}

/// Axis-aligned `(Xmin, Xmax)` bounding box, as produced by a min/max
/// reduction over a set of bodies.
#[derive(Clone, Copy, Debug)]
pub struct Bounds<T> {
    pub xmin: Vec3<T>,
    pub xmax: Vec3<T>,
}

impl<T: Float> Bounds<T> {
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a Vec3<T>>) -> Option<Self>
    where
        T: 'a,
    {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut xmin = first;
        let mut xmax = first;
        for p in iter {
            xmin = xmin.zip_map(p, T::min);
            xmax = xmax.zip_map(p, T::max);
        }
        Some(Self { xmin, xmax })
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            xmin: self.xmin.zip_map(&other.xmin, T::min),
            xmax: self.xmax.zip_map(&other.xmax, T::max),
        }
    }
}

/// A cubic box: centre and half-side, always symmetric across all three
/// axes so that Morton encoding operates at uniform resolution.
#[derive(Clone, Copy, Debug)]
pub struct Cube<T> {
    pub centre: Vec3<T>,
    pub radius: T,
}

/// Turn a [`Bounds`] into a [`Cube`] and rewrite `bounds` in place so that
/// `[xmin, xmax)` becomes the symmetric cube too. The 1.00001 inflation
/// guarantees strict containment under floating-point rounding, matching
/// `Partition::allreduceBounds`'s leeway factor in the original.
pub fn bounds_to_box<T: Float>(bounds: &mut Bounds<T>) -> Cube<T> {
    let leeway = T::from(1.00001).unwrap();
    let centre = (bounds.xmin + bounds.xmax) / T::from(2.0).unwrap();
    let mut radius = T::zero();
    for d in 0..3 {
        radius = radius.max(centre[d] - bounds.xmin[d]);
        radius = radius.max(bounds.xmax[d] - centre[d]);
    }
    radius = radius * leeway;
    bounds.xmin = centre - Vec3::splat(radius);
    bounds.xmax = centre + Vec3::splat(radius);
    Cube { centre, radius }
}
