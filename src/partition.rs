//! Recursive-bisection rank partitioner and its two all-to-all redistributions.
//!
//! Grounded directly on `include/partition.h`'s `Partition` class:
//! `setPartition` (grid-doubling + rank sub-box assignment), `alltoall`/
//! `alltoallv` (count exchange then packed transport), `partition`/
//! `unpartition` (forward and reverse redistribution).

use crate::body::{Bodies, Body};
use crate::comm::Comm;
use crate::error::FmmError;
use crate::geometry::{bounds_to_box, Bounds, Cube, Vec3};
use crate::wire::{as_bytes, bytes_to_vec, prefix_sum_displs};
use num_traits::Float;

/// Number of sub-domains along each axis, derived by halving `size` along
/// axes 0,1,2,0,1,... . Requires `size` to be a power of two, as in the
/// original's `while (mpisize != 1) { Npartition[d] <<= 1; ... }` loop.
pub fn partition_grid(size: i32) -> [u32; 3] {
    let mut npartition = [1u32, 1, 1];
    let mut remaining = size as u32;
    let mut d = 0usize;
    while remaining != 1 {
        npartition[d] <<= 1;
        d = (d + 1) % 3;
        remaining >>= 1;
    }
    npartition
}

/// Decode this rank's index triple `(ix, iy, iz)` from a column-major
/// layout over `(Nx, Ny, Nz)`, matching
/// `ix = rank % Nx; iy = rank / Nx % Ny; iz = rank / Nx / Ny`.
pub fn rank_to_index(rank: i32, npartition: [u32; 3]) -> [u32; 3] {
    let rank = rank as u32;
    let ix = rank % npartition[0];
    let iy = (rank / npartition[0]) % npartition[1];
    let iz = rank / npartition[0] / npartition[1];
    [ix, iy, iz]
}

/// Reduce local bounds to a global, strictly-containing cubic box across all
/// ranks, and compute this rank's sub-box within the resulting partition grid.
pub fn global_bounds<T: Float, C: Comm>(local: &Bounds<T>, comm: &C) -> (Bounds<T>, Cube<T>) {
    let local_min: Vec<f64> = (0..3).map(|d| local.xmin[d].to_f64().unwrap()).collect();
    let local_max: Vec<f64> = (0..3).map(|d| local.xmax[d].to_f64().unwrap()).collect();
    let gmin = comm.all_reduce_min(&local_min);
    let gmax = comm.all_reduce_max(&local_max);
    let mut bounds = Bounds {
        xmin: Vec3::new(
            T::from(gmin[0]).unwrap(),
            T::from(gmin[1]).unwrap(),
            T::from(gmin[2]).unwrap(),
        ),
        xmax: Vec3::new(
            T::from(gmax[0]).unwrap(),
            T::from(gmax[1]).unwrap(),
            T::from(gmax[2]).unwrap(),
        ),
    };
    let cube = bounds_to_box(&mut bounds);
    (bounds, cube)
}

/// Sub-box `[xmin + i*delta, xmin + (i+1)*delta)` owned by `rank`.
pub fn rank_subbox<T: Float>(domain: &Bounds<T>, npartition: [u32; 3], rank: i32) -> Bounds<T> {
    let idx = rank_to_index(rank, npartition);
    let mut xmin = domain.xmin;
    let mut xmax = domain.xmin;
    for d in 0..3 {
        let delta = (domain.xmax[d] - domain.xmin[d]) / T::from(npartition[d]).unwrap();
        xmin[d] = domain.xmin[d] + T::from(idx[d]).unwrap() * delta;
        xmax[d] = domain.xmin[d] + T::from(idx[d] + 1).unwrap() * delta;
    }
    Bounds { xmin, xmax }
}

fn destination_rank<T: Float>(pos: &Vec3<T>, domain: &Bounds<T>, npartition: [u32; 3]) -> Result<i32, FmmError> {
    let mut idx = [0i64; 3];
    for d in 0..3 {
        let delta = (domain.xmax[d] - domain.xmin[d]) / T::from(npartition[d]).unwrap();
        let i = ((pos[d] - domain.xmin[d]) / delta).floor();
        let i = i.to_i64().ok_or_else(|| {
            FmmError::Invariant(format!("body position along axis {d} is not a finite index"))
        })?;
        if i < 0 || i >= npartition[d] as i64 {
            return Err(FmmError::Invariant(format!(
                "body destination index {i} on axis {d} out of range [0,{})",
                npartition[d]
            )));
        }
        idx[d] = i;
    }
    let rank = idx[0] + npartition[0] as i64 * (idx[1] + idx[2] * npartition[1] as i64);
    let total = (npartition[0] * npartition[1] * npartition[2]) as i64;
    if rank < 0 || rank >= total {
        return Err(FmmError::Invariant(format!(
            "body destination rank {rank} out of range [0,{total})"
        )));
    }
    Ok(rank as i32)
}

/// Tag every body with its destination rank (`iproc`), used both for the
/// initial forward partition and to re-derive the sort key before `unpartition`.
pub fn assign_destinations<T: Float, C: Comm>(
    bodies: &mut Bodies<T>,
    domain: &Bounds<T>,
    comm: &C,
) -> Result<[u32; 3], FmmError> {
    let npartition = partition_grid(comm.size());
    for b in bodies.iter_mut() {
        b.iproc = destination_rank(&b.x, domain, npartition)?;
    }
    Ok(npartition)
}

/// Exchange bodies so that every body ends up on the rank tagged in
/// `b.iproc`. Mirrors `Partition::alltoall` + `alltoallv`: first exchange
/// counts to learn how much each peer will send back, then transport the
/// packed records. Re-tags `iproc` to the sender's own rank on the way out,
/// exactly as the original does, so a later `unpartition` can reverse it.
pub fn exchange<T: Float, C: Comm>(bodies: &Bodies<T>, comm: &C) -> Result<Bodies<T>, FmmError> {
    let size = comm.size() as usize;
    let mut send_counts = vec![0i32; size];
    let mut by_rank: Vec<Vec<Body<T>>> = vec![Vec::new(); size];
    for b in bodies {
        let r = b.iproc;
        if r < 0 || r as usize >= size {
            return Err(FmmError::Invariant(format!("body iproc {r} out of range [0,{size})")));
        }
        send_counts[r as usize] += 1;
        let mut tagged = *b;
        tagged.iproc = comm.rank();
        by_rank[r as usize].push(tagged);
    }
    let mut send_buf: Vec<Body<T>> = Vec::with_capacity(bodies.len());
    for bucket in &mut by_rank {
        send_buf.append(bucket);
    }

    let recv_counts = comm.all_to_all_counts(&send_counts);
    let send_displs = prefix_sum_displs(&send_counts);
    let recv_displs = prefix_sum_displs(&recv_counts);

    let elem = std::mem::size_of::<Body<T>>() as i32;
    let scale = |v: &[i32]| v.iter().map(|c| c * elem).collect::<Vec<_>>();
    let recv_bytes = comm.all_to_all_v(
        as_bytes(&send_buf),
        &scale(&send_counts),
        &scale(&send_displs),
        &scale(&recv_counts),
        &scale(&recv_displs),
    );
    Ok(bytes_to_vec(&recv_bytes))
}

/// Forward redistribution: each body moves to the rank owning its position.
pub fn partition<T: Float, C: Comm>(mut bodies: Bodies<T>, comm: &C) -> Result<(Bodies<T>, Bounds<T>, Cube<T>), FmmError> {
    let local = Bounds::of_points(bodies.iter().map(|b| &b.x))
        .unwrap_or(Bounds { xmin: Vec3::zero(), xmax: Vec3::zero() });
    let (domain, cube) = global_bounds(&local, comm);
    assign_destinations(&mut bodies, &domain, comm)?;
    for b in bodies.iter_mut() {
        b.icell.0 = b.iproc as u64;
    }
    bodies.sort_by_key(|b| b.icell.0);
    let redistributed = exchange(&bodies, comm)?;
    Ok((redistributed, domain, cube))
}

/// Reverse redistribution: send every body back to the rank it originally
/// came from (tracked in `iproc` by [`exchange`]), then restore input order
/// by `ibody`.
pub fn unpartition<T: Float, C: Comm>(mut bodies: Bodies<T>, comm: &C) -> Result<Bodies<T>, FmmError> {
    for b in bodies.iter_mut() {
        b.icell.0 = b.iproc as u64;
    }
    bodies.sort_by_key(|b| b.icell.0);
    let mut restored = exchange(&bodies, comm)?;
    restored.sort_by_key(|b| b.ibody);
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;

    #[test]
    fn grid_is_trivial_at_size_one() {
        assert_eq!(partition_grid(1), [1, 1, 1]);
    }

    #[test]
    fn grid_halves_round_robin() {
        assert_eq!(partition_grid(8), [2, 2, 2]);
        assert_eq!(partition_grid(2), [2, 1, 1]);
        assert_eq!(partition_grid(4), [2, 2, 1]);
    }

    #[test]
    fn partition_then_unpartition_is_identity_at_p1() {
        let comm = LocalComm;
        let bodies: Bodies<f64> = (0..10)
            .map(|i| Body::new(Vec3::new(i as f64, 0.0, 0.0), 1.0, i))
            .collect();
        let original = bodies.clone();
        let (partitioned, _, _) = partition(bodies, &comm).unwrap();
        let restored = unpartition(partitioned, &comm).unwrap();
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.ibody, b.ibody);
            assert_eq!(a.x.data, b.x.data);
        }
    }

    #[test]
    fn nan_position_raises_invariant_error_instead_of_clamping() {
        let domain = Bounds { xmin: Vec3::new(0.0_f64, 0.0, 0.0), xmax: Vec3::new(1.0, 1.0, 1.0) };
        let pos = Vec3::new(f64::NAN, 0.5, 0.5);
        let err = destination_rank(&pos, &domain, [1, 1, 1]).unwrap_err();
        assert!(matches!(err, FmmError::Invariant(_)));
    }

    #[test]
    fn out_of_domain_position_raises_invariant_error() {
        let domain = Bounds { xmin: Vec3::new(0.0_f64, 0.0, 0.0), xmax: Vec3::new(1.0, 1.0, 1.0) };
        let pos = Vec3::new(5.0, 0.5, 0.5);
        let err = destination_rank(&pos, &domain, [1, 1, 1]).unwrap_err();
        assert!(matches!(err, FmmError::Invariant(_)));
    }

    #[test]
    fn containment_holds_after_partition() {
        let comm = LocalComm;
        let bodies: Bodies<f64> = (0..20)
            .map(|i| Body::new(Vec3::new(i as f64 - 10.0, 0.0, 0.0), 1.0, i))
            .collect();
        let (partitioned, domain, _) = partition(bodies, &comm).unwrap();
        let subbox = rank_subbox(&domain, partition_grid(1), comm.rank());
        for b in &partitioned {
            for d in 0..3 {
                assert!(b.x[d] >= subbox.xmin[d] && b.x[d] < subbox.xmax[d] || subbox.xmax[d] == subbox.xmin[d]);
            }
        }
    }
}
