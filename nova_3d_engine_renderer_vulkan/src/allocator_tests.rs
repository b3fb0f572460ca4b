//! Unit tests for alignment padding and memory-class mapping
//!
//! The padding rule is pure arithmetic, so it is tested directly against
//! representative device alignments without a device.

use gpu_allocator::MemoryLocation;

use crate::allocator::{align_up, MemoryClass};

#[test]
fn pad_rounds_up_to_device_alignment() {
    // A 100-byte request on a device reporting 256-byte uniform alignment.
    assert_eq!(align_up(100, 256), 256);
}

#[test]
fn pad_is_idempotent() {
    for alignment in [16u64, 64, 256] {
        for size in [0u64, 1, 100, 255, 256, 257, 4096] {
            let once = align_up(size, alignment);
            assert_eq!(align_up(once, alignment), once);
        }
    }
}

#[test]
fn pad_never_shrinks_and_yields_multiples() {
    for alignment in [16u64, 64, 256] {
        for size in [0u64, 1, 100, 255, 256, 257, 4096] {
            let padded = align_up(size, alignment);
            assert!(padded >= size);
            assert_eq!(padded % alignment, 0);
        }
    }
}

#[test]
fn exact_multiples_are_unchanged() {
    assert_eq!(align_up(0, 256), 0);
    assert_eq!(align_up(256, 256), 256);
    assert_eq!(align_up(512, 256), 512);
}

#[test]
fn memory_classes_map_to_expected_locations() {
    // Both CPU-visible classes live in CpuToGpu memory; only DeviceLocal is
    // GPU-only.
    assert_eq!(
        MemoryClass::HostVisible.location(),
        MemoryLocation::CpuToGpu
    );
    assert_eq!(MemoryClass::Staging.location(), MemoryLocation::CpuToGpu);
    assert_eq!(MemoryClass::DeviceLocal.location(), MemoryLocation::GpuOnly);
}
