//! Unit tests for descriptor pool capacity accounting
//!
//! The budget rules (no partial allocation, reset restores full capacity)
//! are enforced by `PoolBudget` before any driver call, so they are tested
//! without a device.

use ash::vk;

use nova_3d_engine::renderer::ResourceKind;

use crate::descriptor::{kind_to_vk, PoolBudget};

#[test]
fn over_capacity_request_reserves_nothing() {
    // A category configured with pool capacity 4: requesting 5 sets fails
    // and allocates zero.
    let mut budget = PoolBudget::new(4);
    assert!(!budget.try_reserve(5));
    assert_eq!(budget.available(), 4);

    // The failed request did not consume anything; a fitting one succeeds.
    assert!(budget.try_reserve(4));
    assert_eq!(budget.available(), 0);
}

#[test]
fn reset_restores_full_capacity() {
    let mut budget = PoolBudget::new(8);
    assert!(budget.try_reserve(3));
    assert!(budget.try_reserve(5));
    assert_eq!(budget.available(), 0);

    budget.reset();
    assert_eq!(budget.available(), budget.capacity());
    assert!(budget.try_reserve(8));
}

#[test]
fn incremental_reservations_accumulate() {
    let mut budget = PoolBudget::new(4);
    assert!(budget.try_reserve(1));
    assert!(budget.try_reserve(1));
    assert_eq!(budget.available(), 2);
    assert!(!budget.try_reserve(3));
    assert_eq!(budget.available(), 2);
}

#[test]
fn resource_kinds_map_to_expected_descriptor_types() {
    assert_eq!(
        kind_to_vk(ResourceKind::UniformBuffer),
        vk::DescriptorType::UNIFORM_BUFFER
    );
    assert_eq!(
        kind_to_vk(ResourceKind::DynamicUniformBuffer),
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
    );
    assert_eq!(
        kind_to_vk(ResourceKind::CombinedImageSampler),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    );
}
