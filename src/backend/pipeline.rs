// Compute pipeline creation and kernel loading
//
// The kernel is an opaque compiled SPIR-V blob loaded from disk. SPIR-V is
// a stream of 4-byte little-endian words; a file whose length is not a
// multiple of 4 is padded with zero bytes before repacking, since one
// misaligned word corrupts every word after it.

use crate::error::{RendererError, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;

/// Repack raw bytes into little-endian 32-bit words, zero-padding the tail.
/// Byte 0 lands in bits 0-7 of word 0.
pub fn pack_spirv_words(bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity((bytes.len() + 3) / 4);

    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(word));
    }

    words
}

/// Read the compiled kernel from disk as a word stream.
pub fn load_kernel_binary(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RendererError::KernelFileNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!("Loaded kernel binary {:?} ({} bytes)", path, bytes.len());

    Ok(pack_spirv_words(&bytes))
}

/// The compute pipeline plus the layout and shader module it was built
/// from. Immutable after creation.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    shader_module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ComputePipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        descriptor_layout: vk::DescriptorSetLayout,
        code: &[u32],
    ) -> Result<Self> {
        // One descriptor-set layout, no push constants
        let set_layouts = [descriptor_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }?;

        let shader_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let shader_module =
            unsafe { device.device.create_shader_module(&shader_info, None) }?;

        let stage_info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main");

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage_info.build())
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        }
        .map_err(|(_, err)| err)?;

        Ok(Self {
            pipeline: pipelines[0],
            layout,
            shader_module,
            device,
        })
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            self.device
                .device
                .destroy_shader_module(self.shader_module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_is_ceil_of_quarter_length() {
        for n in 0..=9 {
            let bytes = vec![0xFFu8; n];
            assert_eq!(pack_spirv_words(&bytes).len(), (n + 3) / 4, "n = {}", n);
        }
    }

    #[test]
    fn packing_is_little_endian() {
        let words = pack_spirv_words(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(words, vec![0x0403_0201]);
    }

    #[test]
    fn tail_is_zero_padded() {
        let words = pack_spirv_words(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert_eq!(words, vec![0xDDCC_BBAA, 0x0000_00EE]);
    }

    #[test]
    fn empty_input_packs_to_nothing() {
        assert!(pack_spirv_words(&[]).is_empty());
    }

    #[test]
    fn missing_kernel_file_is_an_error() {
        let err = load_kernel_binary(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(matches!(err, RendererError::KernelFileNotFound { .. }));
    }
}
