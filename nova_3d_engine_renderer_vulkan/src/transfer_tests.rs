//! Unit tests for layout-transition barrier selection

use ash::vk;

use nova_3d_engine::nova3d::Error;

use crate::transfer::transition_masks;

#[test]
fn undefined_to_transfer_dst_is_supported() {
    let masks = transition_masks(
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )
    .unwrap();
    assert_eq!(masks.src_access, vk::AccessFlags::empty());
    assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
}

#[test]
fn transfer_dst_to_shader_read_is_supported() {
    let masks = transition_masks(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
    .unwrap();
    assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
    assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
    assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
}

#[test]
fn unsupported_pairs_are_configuration_errors() {
    let result = transition_masks(
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );
    assert!(matches!(result, Err(Error::ConfigurationError(_))));

    let result = transition_masks(
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
    assert!(matches!(result, Err(Error::ConfigurationError(_))));
}
