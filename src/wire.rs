//! Packing `#[repr(C)]` records into flat byte buffers for all-to-all-v
//! transport, matching `include/partition.h`/`include/tree_mpi.h`'s pattern
//! of scaling counts/displacements by `sizeof(T)/4` so that `MPI_INT`
//! (4-byte words) suffices as the wire type. We transport raw bytes instead
//! and keep the "multiple of 4 bytes" requirement as a debug assertion,
//! since `repr(C)` alone does not guarantee alignment padding is absent.

/// Reinterpret a slice of `Copy` records as a flat byte buffer.
///
/// # Safety
/// `T` must be `#[repr(C)]` (or otherwise have no padding that carries
/// uninitialized bytes) for the resulting bytes to round-trip through
/// [`bytes_to_vec`] on a homogeneous cluster.
pub fn as_bytes<T: Copy>(items: &[T]) -> &[u8] {
    let ptr = items.as_ptr() as *const u8;
    let len = std::mem::size_of_val(items);
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

/// Inverse of [`as_bytes`]: reinterpret a byte buffer as a `Vec<T>`.
pub fn bytes_to_vec<T: Copy>(bytes: &[u8]) -> Vec<T> {
    let elem = std::mem::size_of::<T>();
    debug_assert_eq!(elem % 4, 0, "wire record size must be a multiple of 4 bytes");
    debug_assert_eq!(bytes.len() % elem, 0);
    let n = bytes.len() / elem;
    let mut out = Vec::with_capacity(n);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const T, out.as_mut_ptr(), n);
        out.set_len(n);
    }
    out
}

/// Compute send displacements from counts (exclusive prefix sum), matching
/// `partition.h::alltoall`'s `sendBodyDispl[irank+1] = sendBodyDispl[irank] + sendBodyCount[irank]`.
pub fn prefix_sum_displs(counts: &[i32]) -> Vec<i32> {
    let mut displs = vec![0i32; counts.len()];
    for i in 1..counts.len() {
        displs[i] = displs[i - 1] + counts[i - 1];
    }
    displs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = [1.0f64, 2.0, 3.0, 4.0];
        let bytes = as_bytes(&data);
        let back: Vec<f64> = bytes_to_vec(bytes);
        assert_eq!(&back, &data);
    }

    #[test]
    fn prefix_sum_matches_original() {
        assert_eq!(prefix_sum_displs(&[2, 3, 1]), vec![0, 2, 5]);
    }
}
