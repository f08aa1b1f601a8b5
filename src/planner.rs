// src/planner.rs

use crate::models::{ByteRange, ChunkSize};

/// Splits a resource of `total` bytes into contiguous inclusive ranges.
///
/// The nominal chunk size comes from `chunk_size`. When that would give fewer
/// chunks than `connections`, the file is instead cut into exactly
/// `connections` pieces and the remainder is spread one byte at a time over
/// the first chunks. A trailing chunk smaller than half the nominal size is
/// topped up from its predecessor so no request is degenerately small.
///
/// Returns an empty list for an empty resource.
pub fn plan_ranges(total: u64, chunk_size: &ChunkSize, connections: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    ranges_from_sizes(&chunk_sizes(total, chunk_size.resolve(total), connections))
}

fn chunk_sizes(total: u64, nominal: u64, connections: usize) -> Vec<u64> {
    let connections = connections.max(1) as u64;
    let chunk = nominal.max(1);

    if (total as u128) < (chunk as u128) * (connections as u128) {
        let forced = total / connections;
        if forced == 0 {
            // Fewer bytes than connections: one byte per chunk.
            return vec![1; total as usize];
        }
        let extra = total % connections;
        return (0..connections)
            .map(|i| if i < extra { forced + 1 } else { forced })
            .collect();
    }

    let count = total.div_ceil(chunk) as usize;
    let mut sizes = vec![chunk; count];
    let last = total - (count as u64 - 1) * chunk;
    sizes[count - 1] = last;

    if count > 1 && last * 2 < chunk {
        let diff = chunk / 2 - last;
        sizes[count - 1] += diff;
        sizes[count - 2] -= diff;
    }
    sizes
}

pub(crate) fn ranges_from_sizes(sizes: &[u64]) -> Vec<ByteRange> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|size| {
            let range = ByteRange::new(offset, offset + size - 1);
            offset += size;
            range
        })
        .collect()
}
