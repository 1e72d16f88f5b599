//! Parallel MSD radix sort (radix 64) over Morton keys.
//!
//! Grounded on `include/build_tree_cilk.h`'s `radixSort`/`recursion`: bodies
//! are split into `BLOCK_SIZE`-sized blocks, bin occupancies are counted
//! into a `(blocks x 64)` matrix, an exclusive column-major scan yields
//! write offsets, and blocks are relocated concurrently with `rayon`
//! (`cilk_for` in the original). Recursion drops 6 bits per pass and falls
//! back to a sequential comparison sort once a subrange is small enough
//! that block parallelism no longer pays for itself.
use crate::body::{Bodies, Body};
use num_traits::Float;
use rayon::prelude::*;

/// Raw pointers aren't `Send` by default; block relocation below writes into
/// disjoint regions of the same buffer from multiple rayon worker threads,
/// which is sound (each block's cursor range never overlaps another's) but
/// needs this wrapper to cross the `par_iter` closure boundary at all.
#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// Bodies per block for the parallel counting/relocation pass.
pub const BLOCK_SIZE: usize = 512;
/// log2 of the radix (64 bins per pass, 6 bits).
const RADIX_BITS: u32 = 6;
/// Below this many elements, fall back to a plain sequential sort.
const SEQUENTIAL_THRESHOLD: usize = BLOCK_SIZE;

/// Sort `bodies` by `icell` (ascending), in place, returning nothing: the
/// original produces a permutation vector and then applies it in a
/// separate `permute` pass, but since Rust's body records already carry
/// their own key there is no observable difference in applying the
/// permutation directly during the radix passes.
pub fn sort_by_morton_key<T: Float + Send + Sync>(bodies: &mut Bodies<T>) {
    let n = bodies.len();
    if n < 2 {
        return;
    }
    let mut buf = bodies.clone();
    radix_pass(bodies, &mut buf, 0, n, 0);
}

fn radix_pass<T: Float + Send + Sync>(bodies: &mut [Body<T>], buf: &mut [Body<T>], lo: usize, hi: usize, pass: u32) {
    let len = hi - lo;
    if len <= 1 || pass * RADIX_BITS >= 64 {
        return;
    }
    if len < SEQUENTIAL_THRESHOLD {
        bodies[lo..hi].sort_by_key(|b| b.icell.radix_digit(pass));
        // recurse sequentially into each bin that formed
        let mut start = lo;
        while start < hi {
            let digit = bodies[start].icell.radix_digit(pass);
            let mut end = start + 1;
            while end < hi && bodies[end].icell.radix_digit(pass) == digit {
                end += 1;
            }
            radix_pass(bodies, buf, start, end, pass + 1);
            start = end;
        }
        return;
    }

    let nbins = 1usize << RADIX_BITS;
    let blocks: Vec<_> = (lo..hi).collect::<Vec<_>>().chunks(BLOCK_SIZE).map(|c| (c[0], *c.last().unwrap() + 1)).collect();

    // Per-block bin counts, computed in parallel.
    let counts: Vec<Vec<usize>> = blocks
        .par_iter()
        .map(|&(s, e)| {
            let mut c = vec![0usize; nbins];
            for b in &bodies[s..e] {
                c[b.icell.radix_digit(pass)] += 1;
            }
            c
        })
        .collect();

    // Column-major exclusive scan: offset of block i, bin d, is the sum of
    // bin d over all earlier blocks, plus the sum of bins < d overall.
    let mut bin_totals = vec![0usize; nbins];
    for c in &counts {
        for d in 0..nbins {
            bin_totals[d] += c[d];
        }
    }
    let mut bin_base = vec![0usize; nbins];
    for d in 1..nbins {
        bin_base[d] = bin_base[d - 1] + bin_totals[d - 1];
    }
    let mut block_offsets = vec![vec![0usize; nbins]; blocks.len()];
    for d in 0..nbins {
        let mut running = bin_base[d];
        for (bi, c) in counts.iter().enumerate() {
            block_offsets[bi][d] = running;
            running += c[d];
        }
    }

    // Relocate: each block writes its elements into `buf` at the computed
    // offsets. Blocks touch disjoint output ranges per bin-start, but to
    // keep writes trivially race-free we serialize the within-block cursor
    // update and only parallelize across blocks (disjoint destination
    // regions are guaranteed by the exclusive scan above).
    let buf_ptr = SendPtr(buf.as_mut_ptr());
    blocks.par_iter().enumerate().for_each(|(bi, &(s, e))| {
        let buf_ptr = buf_ptr;
        let mut cursor = block_offsets[bi].clone();
        for b in &bodies[s..e] {
            let digit = b.icell.radix_digit(pass);
            unsafe {
                std::ptr::write(buf_ptr.0.add(cursor[digit]), *b);
            }
            cursor[digit] += 1;
        }
    });
    bodies[lo..hi].copy_from_slice(&buf[lo..hi]);

    // Recurse into each bin range.
    let mut ranges = Vec::with_capacity(nbins);
    let mut start = lo;
    for d in 0..nbins {
        let end = start + bin_totals[d];
        if end > start {
            ranges.push((start, end));
        }
        start = end;
    }
    ranges.into_par_iter().for_each(|(s, e)| {
        // SAFETY: ranges are disjoint, so concurrent mutable access to
        // disjoint slices of `bodies`/`buf` via raw pointers is sound.
        let bodies_ptr = bodies.as_ptr() as *mut Body<T>;
        let buf_ptr = buf.as_ptr() as *mut Body<T>;
        let bodies_slice = unsafe { std::slice::from_raw_parts_mut(bodies_ptr, bodies.len()) };
        let buf_slice = unsafe { std::slice::from_raw_parts_mut(buf_ptr, buf.len()) };
        radix_pass(bodies_slice, buf_slice, s, e, pass + 1);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vec3;
    use crate::morton::MortonKey;

    fn body_with_key(key: u64) -> Body<f64> {
        let mut b = Body::new(Vec3::zero(), 1.0, 0);
        b.icell = MortonKey(key);
        b
    }

    #[test]
    fn sorts_small_input() {
        let mut bodies: Vec<_> = [5u64, 1, 9, 3, 7].into_iter().map(body_with_key).collect();
        sort_by_morton_key(&mut bodies);
        let keys: Vec<_> = bodies.iter().map(|b| b.icell.0).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn sorts_large_input_spanning_multiple_blocks() {
        let mut bodies: Vec<_> = (0..2000u64).rev().map(body_with_key).collect();
        sort_by_morton_key(&mut bodies);
        for w in bodies.windows(2) {
            assert!(w[0].icell.0 <= w[1].icell.0);
        }
    }
}
