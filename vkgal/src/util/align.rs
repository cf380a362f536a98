use ash::vk;

/// Round `current` up to the next multiple of `alignment`, or `None` on overflow. An alignment of
/// zero is treated as no alignment requirement.
pub fn checked_align(
    current: vk::DeviceSize,
    alignment: vk::DeviceSize,
) -> Option<vk::DeviceSize> {
    if alignment == 0 {
        Some(current)
    } else {
        current.checked_next_multiple_of(alignment)
    }
}

/// Number of `chunk` sized pieces needed to hold `size` bytes.
pub fn div_ceil(size: vk::DeviceSize, chunk: vk::DeviceSize) -> vk::DeviceSize {
    debug_assert!(chunk > 0);
    size.div_ceil(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_align() {
        assert_eq!(checked_align(0, 256), Some(0));
        assert_eq!(checked_align(1, 256), Some(256));
        assert_eq!(checked_align(256, 256), Some(256));
        assert_eq!(checked_align(257, 256), Some(512));
        assert_eq!(checked_align(100, 64), Some(128));
        // non power of two alignments still round to a multiple
        assert_eq!(checked_align(100, 48), Some(144));
        assert_eq!(checked_align(17, 0), Some(17));
        assert_eq!(checked_align(u64::MAX - 255, 256), Some(u64::MAX - 255));
        assert_eq!(checked_align(u64::MAX, 256), None);
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(0, 256), 0);
        assert_eq!(div_ceil(100, 256), 1);
        assert_eq!(div_ceil(256, 256), 1);
        assert_eq!(div_ceil(300, 256), 2);
    }
}
