//! Size class table and lookup.
//!
//! Requests are rounded up to a small set of representative sizes so free
//! lists stay dense. The table is dense where small objects cluster (8-byte
//! steps up to 128) and widens geometrically above that, ending at
//! [`MAX_CACHED_UNIT_SIZE`]. The index function is pure bucket arithmetic:
//! no table scan, no per-request search.

use crate::{ALIGNMENT, MAX_CACHED_UNIT_SIZE};

/// Step width and inclusive upper size for each bucket of classes.
///
/// Each bucket covers `(previous upper, upper]` with classes every `step`
/// bytes; both are powers of two, so rounding inside a bucket is a mask.
const BUCKETS: [(usize, usize); 7] = [
    (8, 128),
    (128, 512),
    (256, 1024),
    (512, 2048),
    (1024, 4096),
    (2048, 8192),
    (4096, MAX_CACHED_UNIT_SIZE),
];

/// Number of size classes.
pub const CLASS_COUNT: usize = class_count();

/// Sentinel index reported for oversize requests. Never a valid index into
/// the class tables.
pub const OVERSIZE_INDEX: usize = CLASS_COUNT;

const fn class_count() -> usize {
    let mut total = 0;
    let mut lower = 0;
    let mut b = 0;
    while b < BUCKETS.len() {
        let (step, upper) = BUCKETS[b];
        total += (upper - lower) / step;
        lower = upper;
        b += 1;
    }
    total
}

/// Representative byte size of every class, ascending.
pub static CLASS_SIZES: [usize; CLASS_COUNT] = const {
    let mut sizes = [0usize; CLASS_COUNT];
    let mut i = 0;
    let mut lower = 0;
    let mut b = 0;
    while b < BUCKETS.len() {
        let (step, upper) = BUCKETS[b];
        let mut size = lower + step;
        while size <= upper {
            sizes[i] = size;
            i += 1;
            size += step;
        }
        lower = upper;
        b += 1;
    }
    sizes
};

/// Rounds `size` up to its class size.
///
/// Oversize requests round up to [`ALIGNMENT`] only; they bypass the class
/// tables entirely.
#[must_use]
pub const fn round_up(size: usize) -> usize {
    debug_assert!(size > 0);
    if size > MAX_CACHED_UNIT_SIZE {
        return (size + ALIGNMENT - 1) & !(ALIGNMENT - 1);
    }
    let mut b = 0;
    while b < BUCKETS.len() {
        let (step, upper) = BUCKETS[b];
        if size <= upper {
            return (size + step - 1) & !(step - 1);
        }
        b += 1;
    }
    unreachable!()
}

/// Resolves a request to `(class_size, class_index)`.
///
/// Oversize requests yield `(rounded_size, OVERSIZE_INDEX)` and are handled
/// by the oversize path. `size` must be non-zero; zero-size requests are
/// rejected before this point.
#[must_use]
pub const fn class_for(size: usize) -> (usize, usize) {
    debug_assert!(size > 0);
    if size > MAX_CACHED_UNIT_SIZE {
        return (round_up(size), OVERSIZE_INDEX);
    }
    let mut base = 0;
    let mut lower = 0;
    let mut b = 0;
    while b < BUCKETS.len() {
        let (step, upper) = BUCKETS[b];
        if size <= upper {
            let rounded = (size + step - 1) & !(step - 1);
            let index = base + (rounded - lower) / step - 1;
            return (rounded, index);
        }
        base += (upper - lower) / step;
        lower = upper;
        b += 1;
    }
    unreachable!()
}

/// Class size for a valid class index.
#[must_use]
pub fn size_of_class(index: usize) -> usize {
    CLASS_SIZES[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        assert_eq!(CLASS_SIZES[0], 8);
        assert_eq!(CLASS_SIZES[15], 128);
        assert_eq!(CLASS_SIZES[16], 256);
        assert_eq!(CLASS_SIZES[CLASS_COUNT - 1], MAX_CACHED_UNIT_SIZE);
    }

    #[test]
    fn test_classes_monotonically_increasing() {
        for i in 1..CLASS_COUNT {
            assert!(
                CLASS_SIZES[i] > CLASS_SIZES[i - 1],
                "class {} size {} not greater than class {} size {}",
                i,
                CLASS_SIZES[i],
                i - 1,
                CLASS_SIZES[i - 1]
            );
        }
    }

    #[test]
    fn test_all_sizes_pointer_aligned() {
        for (i, &size) in CLASS_SIZES.iter().enumerate() {
            assert_eq!(size % ALIGNMENT, 0, "class {i} size {size} misaligned");
        }
    }

    #[test]
    fn test_round_up_idempotent() {
        for size in 1..=MAX_CACHED_UNIT_SIZE {
            let once = round_up(size);
            assert_eq!(round_up(once), once, "round_up not idempotent at {size}");
            assert!(once >= size);
        }
    }

    #[test]
    fn test_index_agrees_with_round_up() {
        for size in 1..=MAX_CACHED_UNIT_SIZE {
            let (class_size, index) = class_for(size);
            assert_eq!(class_size, round_up(size));
            assert_eq!(class_for(class_size), (class_size, index));
            assert_eq!(CLASS_SIZES[index], class_size);
        }
    }

    #[test]
    fn test_round_trip_all_classes() {
        for (i, &size) in CLASS_SIZES.iter().enumerate() {
            assert_eq!(class_for(size), (size, i));
        }
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(class_for(128), (128, 15));
        assert_eq!(class_for(129), (256, 16));
        assert_eq!(class_for(512), (512, 18));
        assert_eq!(class_for(513), (768, 19));
        assert_eq!(class_for(8192), (8192, 26));
        assert_eq!(class_for(8193), (12288, 27));
    }

    #[test]
    fn test_oversize_sentinel() {
        let (size, index) = class_for(MAX_CACHED_UNIT_SIZE + 1);
        assert_eq!(index, OVERSIZE_INDEX);
        assert_eq!(size % ALIGNMENT, 0);
        assert!(size > MAX_CACHED_UNIT_SIZE);

        let (exact, index) = class_for(MAX_CACHED_UNIT_SIZE);
        assert_eq!(exact, MAX_CACHED_UNIT_SIZE);
        assert_eq!(index, CLASS_COUNT - 1);
    }
}
