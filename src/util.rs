use std::num::NonZeroU64;

/// Returns the smallest multiple of `alignment` that is greater or equal to `offset`, or `None` on
/// overflow.
///
/// Unlike a mask-based `(offset + alignment - 1) & !(alignment - 1)`, this also holds for alignments
/// that are not powers of two.
pub fn align_up(offset: u64, alignment: NonZeroU64) -> Option<u64> {
    let alignment = alignment.get();
    Some(offset.checked_add(alignment - 1)? / alignment * alignment)
}

/// Returns the size class a requirement of `size` bytes falls into: the next power of two greater or
/// equal to `size`. `None` if that power of two does not fit in a `u64`.
pub fn size_class(size: NonZeroU64) -> Option<NonZeroU64> {
    size.get()
        .checked_next_power_of_two()
        .and_then(NonZeroU64::new)
}

#[cfg(test)]
mod test {
    use super::{align_up, size_class};
    use nonzero_ext::nonzero;
    use std::num::NonZeroU64;

    #[test]
    fn align() {
        assert_eq!(align_up(0, nonzero!(256u64)), Some(0));
        assert_eq!(align_up(65, nonzero!(256u64)), Some(256));
        assert_eq!(align_up(256, nonzero!(256u64)), Some(256));
        assert_eq!(align_up(65, nonzero!(1u64)), Some(65));
        // Non power of two alignments are rounded the same way.
        assert_eq!(align_up(7, nonzero!(12u64)), Some(12));
        assert_eq!(align_up(u64::MAX, nonzero!(2u64)), None);
    }

    #[test]
    fn size_classes() {
        assert_eq!(size_class(nonzero!(1u64)), Some(nonzero!(1u64)));
        assert_eq!(size_class(nonzero!(64u64)), Some(nonzero!(64u64)));
        assert_eq!(size_class(nonzero!(200u64)), Some(nonzero!(256u64)));
        assert_eq!(size_class(nonzero!(4000u64)), Some(nonzero!(4096u64)));
        assert_eq!(size_class(NonZeroU64::new(u64::MAX).unwrap()), None);
    }
}
