//! The [`Body`] record: a fixed-layout, bulk-transportable point particle.
//!
//! Grounded on `include/types.h`'s `struct JBody`/`Body` (`X`, `SRC`, `IBODY`,
//! `IPROC`, `ICELL`, `TRG`) and on the teacher's `tree/src/types/point.rs`
//! `Point` struct, which takes the same "fixed coordinate + index + key"
//! shape. `#[repr(C)]` keeps the layout stable for the packed-byte transport
//! the partitioner and LET exchange rely on.

use crate::geometry::Vec3;
use crate::morton::MortonKey;
use num_traits::Float;

/// A point particle: position, scalar source strength, and a 4-component
/// target accumulator (potential + 3-component gradient/acceleration).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Body<T> {
    /// Position.
    pub x: Vec3<T>,
    /// Scalar source (mass/charge).
    pub src: T,
    /// Accumulator: `[potential, ax, ay, az]`.
    pub trg: [T; 4],
    /// Original index within the owning rank at input time.
    pub ibody: usize,
    /// Owning rank; reused transiently as a send-rank tag during partitioning.
    pub iproc: i32,
    /// Morton key of the containing leaf cell; also used as a sort key
    /// during partitioning (where it temporarily mirrors the destination rank).
    pub icell: MortonKey,
}

impl<T: Float> Body<T> {
    pub fn new(x: Vec3<T>, src: T, ibody: usize) -> Self {
        Self {
            x,
            src,
            trg: [T::zero(); 4],
            ibody,
            iproc: 0,
            icell: MortonKey::default(),
        }
    }
}

pub type Bodies<T> = Vec<Body<T>>;
