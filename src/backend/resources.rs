// GPU resource allocation
//
// The compute kernel's output target (work image), its auxiliary state
// buffer, and the descriptor set binding both to the pipeline. Everything
// here is allocated once at startup and never recreated.

use crate::error::{RendererError, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Find a suitable memory type index: the lowest index whose bit is set in
/// `type_mask` and whose property flags are a superset of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_mask: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let has_type = (type_mask & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    Err(RendererError::NoSuitableMemoryType { type_mask })
}

/// Device-local 2D image the compute kernel writes and the per-frame blit
/// reads. Sized to the swapchain extent; RGBA32F so samples accumulate
/// without quantization.
pub struct WorkImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    memory: vk::DeviceMemory,
    device: Arc<VulkanDevice>,
}

impl WorkImage {
    pub const FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(Self::FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::STORAGE,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&image_info, None) }?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        // No required property flags: any type the image accepts will do
        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::empty(),
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }?;
        unsafe { device.device.bind_image_memory(image, memory, 0) }?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(Self::FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { device.device.create_image_view(&view_info, None) }?;

        Ok(Self {
            image,
            view,
            memory,
            device,
        })
    }
}

impl Drop for WorkImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Device-local storage buffer bound at descriptor slot 1. Its contents are
/// opaque to the host; only the kernel reads and writes it.
pub struct StateBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    memory: vk::DeviceMemory,
    device: Arc<VulkanDevice>,
}

impl StateBuffer {
    pub fn new(device: Arc<VulkanDevice>, size: vk::DeviceSize) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.device.allocate_memory(&alloc_info, None) }?;
        unsafe { device.device.bind_buffer_memory(buffer, memory, 0) }?;

        Ok(Self {
            buffer,
            size,
            memory,
            device,
        })
    }
}

impl Drop for StateBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Descriptor layout, pool and the single set binding the work image
/// (slot 0, GENERAL layout) and the state buffer (slot 1, whole range) to
/// the compute stage. The set is written once and never reallocated.
pub struct DescriptorResources {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    device: Arc<VulkanDevice>,
}

impl DescriptorResources {
    pub fn new(
        device: Arc<VulkanDevice>,
        work_image: &WorkImage,
        state_buffer: &StateBuffer,
    ) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout =
            unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }?;

        // Exactly one set with one descriptor of each type
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
        ];

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: work_image.view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: state_buffer.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&image_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&buffer_info)
                .build(),
        ];

        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        Ok(Self {
            layout,
            pool,
            set,
            device,
        })
    }
}

impl Drop for DescriptorResources {
    fn drop(&mut self) {
        unsafe {
            // The set is freed with its pool
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn lowest_matching_index_wins() {
        let props = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let index =
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn type_mask_excludes_lower_indices() {
        let props = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let index =
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn property_superset_is_required() {
        let props = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let index = find_memory_type(&props, 0b11, wanted).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn empty_requirement_matches_any_type() {
        let props = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let index = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::empty()).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn no_match_is_an_error() {
        let props = memory_table(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap_err();
        assert!(matches!(
            err,
            RendererError::NoSuitableMemoryType { type_mask: 0b1 }
        ));
    }
}
