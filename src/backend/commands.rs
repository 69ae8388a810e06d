// Command recording
//
// One command buffer per swapchain image, recorded once at startup with
// SIMULTANEOUS_USE and replayed every frame the image is acquired. Each
// buffer encodes the fixed sequence:
//
//   bind -> barrier A -> dispatch -> barrier B -> blit -> barrier C
//
// driving two layout state machines that must never be reordered:
//   swapchain image: UNDEFINED -> TRANSFER_DST_OPTIMAL -> PRESENT_SRC_KHR
//   work image:      UNDEFINED -> GENERAL -> TRANSFER_SRC_OPTIMAL

use crate::error::Result;
use ash::vk;

use super::pipeline::ComputePipeline;
use super::resources::WorkImage;
use super::swapchain::Swapchain;
use super::VulkanDevice;

/// Kernel workgroup tile edge, in pixels (matches local_size_x/y).
pub const WORKGROUP_TILE: u32 = 32;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Workgroup grid covering `extent` at the fixed tile size; the third
/// dimension runs the per-pixel rays in parallel.
pub fn dispatch_grid(extent: vk::Extent2D, rays_per_pixel: u32) -> (u32, u32, u32) {
    (
        (extent.width + WORKGROUP_TILE - 1) / WORKGROUP_TILE,
        (extent.height + WORKGROUP_TILE - 1) / WORKGROUP_TILE,
        rays_per_pixel,
    )
}

pub fn create_command_pool(device: &VulkanDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_families.compute);

    let pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;
    Ok(pool)
}

/// Allocate and record one command buffer per swapchain image.
pub fn record_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    swapchain: &Swapchain,
    pipeline: &ComputePipeline,
    descriptor_set: vk::DescriptorSet,
    work_image: &WorkImage,
    rays_per_pixel: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(swapchain.images.len() as u32);

    let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info) }?;

    let compute_family = device.queue_families.compute;
    let (group_x, group_y, group_z) = dispatch_grid(swapchain.extent, rays_per_pixel);

    for (&cmd, &present_image) in command_buffers.iter().zip(&swapchain.images) {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        unsafe {
            device.device.begin_command_buffer(cmd, &begin_info)?;

            device.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline,
            );
            device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );

            // Barrier A: both images into their writable layouts before the
            // kernel runs
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &initial_layout_barriers(compute_family, present_image, work_image.image),
            );

            device.device.cmd_dispatch(cmd, group_x, group_y, group_z);

            // Barrier B: work image becomes the blit source
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[work_to_transfer_src_barrier(compute_family, work_image.image)],
            );

            device.device.cmd_blit_image(
                cmd,
                work_image.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                present_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit_region(swapchain.extent)],
                vk::Filter::NEAREST,
            );

            // Barrier C: swapchain image becomes presentable
            device.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[present_layout_barrier(compute_family, present_image)],
            );

            device.device.end_command_buffer(cmd)?;
        }
    }

    log::info!("Recorded {} command buffers", command_buffers.len());

    Ok(command_buffers)
}

/// UNDEFINED -> TRANSFER_DST_OPTIMAL for the presentable image and
/// UNDEFINED -> GENERAL for the work image. Src and dst family are both the
/// compute family: no ownership transfer happens in this design.
fn initial_layout_barriers(
    compute_family: u32,
    present_image: vk::Image,
    work_image: vk::Image,
) -> [vk::ImageMemoryBarrier; 2] {
    [
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(compute_family)
            .dst_queue_family_index(compute_family)
            .image(present_image)
            .subresource_range(COLOR_RANGE)
            .build(),
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::MEMORY_WRITE
                    | vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(compute_family)
            .dst_queue_family_index(compute_family)
            .image(work_image)
            .subresource_range(COLOR_RANGE)
            .build(),
    ]
}

/// GENERAL -> TRANSFER_SRC_OPTIMAL once the kernel has written the image.
fn work_to_transfer_src_barrier(
    compute_family: u32,
    work_image: vk::Image,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .old_layout(vk::ImageLayout::GENERAL)
        .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .src_queue_family_index(compute_family)
        .dst_queue_family_index(compute_family)
        .image(work_image)
        .subresource_range(COLOR_RANGE)
        .build()
}

/// TRANSFER_DST_OPTIMAL -> PRESENT_SRC_KHR after the blit.
fn present_layout_barrier(compute_family: u32, present_image: vk::Image) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_READ)
        .dst_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(compute_family)
        .dst_queue_family_index(compute_family)
        .image(present_image)
        .subresource_range(COLOR_RANGE)
        .build()
}

/// Full-extent blit, single color layer, same region on both sides.
fn blit_region(extent: vk::Extent2D) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let offsets = [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        },
    ];

    vk::ImageBlit {
        src_subresource: layers,
        src_offsets: offsets,
        dst_subresource: layers,
        dst_offsets: offsets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn grid_covers_the_extent_with_ceiling_division() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(dispatch_grid(extent, 4), (25, 19, 4));
    }

    #[test]
    fn exact_tile_multiples_need_no_extra_group() {
        let extent = vk::Extent2D {
            width: 1024,
            height: 32,
        };
        assert_eq!(dispatch_grid(extent, 1), (32, 1, 1));
    }

    #[test]
    fn presentable_image_walks_undefined_transfer_present() {
        let present = vk::Image::from_raw(1);
        let work = vk::Image::from_raw(2);

        let [first, _] = initial_layout_barriers(0, present, work);
        let last = present_layout_barrier(0, present);

        assert_eq!(first.image, present);
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        assert_eq!(last.image, present);
        assert_eq!(last.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(last.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn work_image_walks_undefined_general_transfer_src() {
        let present = vk::Image::from_raw(1);
        let work = vk::Image::from_raw(2);

        let [_, first] = initial_layout_barriers(0, present, work);
        let second = work_to_transfer_src_barrier(0, work);

        assert_eq!(first.image, work);
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::GENERAL);

        assert_eq!(second.image, work);
        assert_eq!(second.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(second.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn barriers_stay_within_one_queue_family() {
        let present = vk::Image::from_raw(1);
        let work = vk::Image::from_raw(2);

        for barrier in initial_layout_barriers(3, present, work)
            .into_iter()
            .chain([
                work_to_transfer_src_barrier(3, work),
                present_layout_barrier(3, present),
            ])
        {
            assert_eq!(barrier.src_queue_family_index, 3);
            assert_eq!(barrier.dst_queue_family_index, 3);
        }
    }

    #[test]
    fn blit_covers_the_full_extent_on_both_sides() {
        let region = blit_region(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(region.src_offsets[1].x, 800);
        assert_eq!(region.src_offsets[1].y, 600);
        assert_eq!(region.src_offsets[1].z, 1);
        assert_eq!(region.dst_offsets[1].x, 800);
        assert_eq!(region.dst_offsets[1].y, 600);
        assert_eq!(region.src_subresource.layer_count, 1);
    }
}
