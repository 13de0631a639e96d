// Compute pipelines
//
// Binds an immutable set of constant/read/read-write resources plus
// samplers to a compiled shader and exposes dispatch. Each kind maps
// onto a disjoint binding band in one descriptor set, so backend slot
// numbering never leaks into the resource model and each kind can grow
// without renumbering the others.

use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use super::device::{Device, DeviceInner};
use super::resource::Resource;
use super::sampler::Sampler;
use super::spirv;
use crate::error::{Error, Result, VkResultExt};

/// Binding band reserved for constant buffers.
pub const CBV_BINDING_BASE: u32 = 0;
/// Binding band reserved for read-only resources.
pub const SRV_BINDING_BASE: u32 = 1024;
/// Binding band reserved for read-write resources.
pub const UAV_BINDING_BASE: u32 = 2048;
/// Binding band reserved for samplers.
pub const SAMPLER_BINDING_BASE: u32 = 3072;

/// The three roles a resource can be bound under.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BindRole {
    Constant,
    Read,
    ReadWrite,
}

impl BindRole {
    fn base(self) -> u32 {
        match self {
            BindRole::Constant => CBV_BINDING_BASE,
            BindRole::Read => SRV_BINDING_BASE,
            BindRole::ReadWrite => UAV_BINDING_BASE,
        }
    }
}

/// An immutable compute pipeline: shader + bound resources. Bound
/// resources are retained for the pipeline's lifetime and cannot be
/// re-bound after creation.
pub struct ComputePipeline {
    device: Arc<DeviceInner>,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    buffer_views: Vec<vk::BufferView>,
    image_views: Vec<vk::ImageView>,
    resources: Vec<Arc<Resource>>,
    samplers: Vec<Arc<Sampler>>,
}

impl Device {
    /// Creates a compute pipeline from a compiled SPIR-V blob, three
    /// ordered resource lists and a sampler list. Empty lists are
    /// legal. `entry_point` defaults to `"main"`.
    pub fn create_compute(
        &self,
        shader: &[u8],
        constants: &[Arc<Resource>],
        reads: &[Arc<Resource>],
        readwrites: &[Arc<Resource>],
        samplers: &[Arc<Sampler>],
        entry_point: Option<&str>,
    ) -> Result<ComputePipeline> {
        let device = self.inner()?;

        // Validation first: nothing native is touched on bad input.
        for resource in constants {
            if !resource.constant_buffer_eligible() {
                return Err(Error::validation(
                    "constant bindings require a raw Default-heap buffer with 16-byte-aligned size",
                ));
            }
        }
        for resource in reads.iter().chain(readwrites) {
            if resource.heap_kind().is_cpu_visible() {
                return Err(Error::validation(
                    "read and read-write bindings require Default-heap resources",
                ));
            }
        }

        let entry = CString::new(entry_point.unwrap_or("main"))
            .map_err(|_| Error::validation("entry point contains a NUL byte"))?;

        // Patch the shader for read-write BGRA textures when the
        // hardware lacks format-less storage-image reads. The patched
        // buffer replaces the input only while the pipeline is built.
        let mut patched: Option<Vec<u8>> = None;
        if !device.storage_read_without_format {
            for (i, resource) in readwrites.iter().enumerate() {
                let needs_patch = !resource.is_buffer()
                    && resource.format().map_or(false, |f| f.is_bgra8());
                if needs_patch {
                    let current = patched.as_deref().unwrap_or(shader);
                    if let Some(out) =
                        spirv::patch_nonreadable(current, UAV_BINDING_BASE + i as u32)
                    {
                        patched = Some(out);
                    }
                }
            }
        }
        let shader = patched.as_deref().unwrap_or(shader);

        let mut retained = Vec::with_capacity(constants.len() + reads.len() + readwrites.len());
        retained.extend(constants.iter().cloned());
        retained.extend(reads.iter().cloned());
        retained.extend(readwrites.iter().cloned());

        // Null handles below are filled in as creation proceeds; Drop
        // destroys whatever exists, so every failure path unwinds all
        // partially constructed native state.
        let mut pipeline = ComputePipeline {
            device: device.clone(),
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            buffer_views: Vec::new(),
            image_views: Vec::new(),
            resources: retained,
            samplers: samplers.to_vec(),
        };

        let bindings = [
            (BindRole::Constant, constants),
            (BindRole::Read, reads),
            (BindRole::ReadWrite, readwrites),
        ];

        // Descriptor set layout over the four bands.
        let mut layout_bindings = Vec::new();
        for (role, resources) in &bindings {
            for (i, resource) in resources.iter().enumerate() {
                layout_bindings.push(
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(role.base() + i as u32)
                        .descriptor_type(descriptor_type(*role, resource))
                        .descriptor_count(1)
                        .stage_flags(vk::ShaderStageFlags::COMPUTE)
                        .build(),
                );
            }
        }
        for i in 0..samplers.len() {
            layout_bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(SAMPLER_BINDING_BASE + i as u32)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build(),
            );
        }

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        pipeline.set_layout =
            unsafe { device.raw.create_descriptor_set_layout(&layout_info, None) }
                .ctx("creating descriptor set layout")?;

        if !layout_bindings.is_empty() {
            let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
            for binding in &layout_bindings {
                match pool_sizes
                    .iter_mut()
                    .find(|s| s.ty == binding.descriptor_type)
                {
                    Some(size) => size.descriptor_count += 1,
                    None => pool_sizes.push(vk::DescriptorPoolSize {
                        ty: binding.descriptor_type,
                        descriptor_count: 1,
                    }),
                }
            }
            let pool_info = vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .pool_sizes(&pool_sizes);
            pipeline.pool = unsafe { device.raw.create_descriptor_pool(&pool_info, None) }
                .ctx("creating descriptor pool")?;

            let set_layouts = [pipeline.set_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pipeline.pool)
                .set_layouts(&set_layouts);
            pipeline.set = unsafe { device.raw.allocate_descriptor_sets(&alloc_info) }
                .ctx("allocating descriptor set")?[0];

            pipeline.write_descriptors(&bindings)?;
        }

        // Shader module lives only for pipeline creation.
        let code = spirv_words(shader)?;
        let module_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.raw.create_shader_module(&module_info, None) }
            .ctx("creating shader module")?;

        let set_layouts = [pipeline.set_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let pipeline_layout =
            unsafe { device.raw.create_pipeline_layout(&pipeline_layout_info, None) };
        let pipeline_layout = match pipeline_layout {
            Ok(layout) => layout,
            Err(source) => {
                unsafe { device.raw.destroy_shader_module(module, None) };
                return Err(Error::Native {
                    context: "creating pipeline layout",
                    source,
                });
            }
        };
        pipeline.pipeline_layout = pipeline_layout;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry)
            .build();
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(pipeline.pipeline_layout)
            .build();
        let created = unsafe {
            device
                .raw
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        // Whatever happened, the module (and the patched blob, dropped
        // with this scope) is no longer needed.
        unsafe { device.raw.destroy_shader_module(module, None) };
        pipeline.pipeline = created
            .map_err(|(_, e)| e)
            .ctx("creating compute pipeline")?[0];

        Ok(pipeline)
    }
}

impl ComputePipeline {
    /// Records bind + dispatch into the device's single command buffer
    /// and blocks until the GPU completes.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) -> Result<()> {
        let device = &self.device;
        device.submit_and_wait(|cmd| {
            unsafe {
                device
                    .raw
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
                if self.set != vk::DescriptorSet::null() {
                    device.raw.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        self.pipeline_layout,
                        0,
                        &[self.set],
                        &[],
                    );
                }
                device.raw.cmd_dispatch(cmd, x, y, z);

                // Make shader writes visible to the copies that follow.
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ)
                    .build();
                device.raw.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }
            Ok(())
        })
    }

    /// The resources bound at creation, in band order.
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// The samplers bound at creation.
    pub fn samplers(&self) -> &[Arc<Sampler>] {
        &self.samplers
    }

    fn write_descriptors(&mut self, bindings: &[(BindRole, &[Arc<Resource>]); 3]) -> Result<()> {
        let device = self.device.clone();

        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo),
            Texel(vk::BufferView),
        }

        let mut infos: Vec<(u32, vk::DescriptorType, Info)> = Vec::new();
        // Sampler descriptors carry only the handle; view and layout
        // are ignored for this type.
        for (i, sampler) in self.samplers.iter().enumerate() {
            infos.push((
                SAMPLER_BINDING_BASE + i as u32,
                vk::DescriptorType::SAMPLER,
                Info::Image(vk::DescriptorImageInfo {
                    sampler: sampler.raw,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
            ));
        }
        for (role, resources) in bindings {
            for (i, resource) in resources.iter().enumerate() {
                let binding = role.base() + i as u32;
                let ty = descriptor_type(*role, resource);
                let info = match ty {
                    vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::STORAGE_BUFFER => {
                        Info::Buffer(vk::DescriptorBufferInfo {
                            buffer: resource.vk_buffer().ok_or_else(|| {
                                Error::validation("buffer binding requires a buffer resource")
                            })?,
                            offset: 0,
                            range: vk::WHOLE_SIZE,
                        })
                    }
                    vk::DescriptorType::UNIFORM_TEXEL_BUFFER
                    | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
                        Info::Texel(self.create_buffer_view(resource)?)
                    }
                    _ => Info::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: self.create_image_view(resource)?,
                        image_layout: vk::ImageLayout::GENERAL,
                    }),
                };
                infos.push((binding, ty, info));
            }
        }

        let mut writes = Vec::with_capacity(infos.len());
        for (binding, ty, info) in &infos {
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(self.set)
                .dst_binding(*binding)
                .descriptor_type(*ty);
            let write = match info {
                Info::Buffer(buffer_info) => {
                    write.buffer_info(std::slice::from_ref(buffer_info)).build()
                }
                Info::Image(image_info) => {
                    write.image_info(std::slice::from_ref(image_info)).build()
                }
                Info::Texel(view) => write.texel_buffer_view(std::slice::from_ref(view)).build(),
            };
            writes.push(write);
        }

        unsafe { device.raw.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    /// Whole-buffer typed view. The element count derives from the
    /// stride when structured, otherwise from the pixel size; a
    /// trailing partial element is truncated.
    fn create_buffer_view(&mut self, resource: &Resource) -> Result<vk::BufferView> {
        let format = resource
            .format()
            .ok_or_else(|| Error::validation("typed buffer binding requires a format"))?;
        let element_size = if resource.stride() > 0 {
            resource.stride() as u64
        } else {
            format.pixel_size() as u64
        };
        let elements = resource.size() / element_size;

        let info = vk::BufferViewCreateInfo::builder()
            .buffer(
                resource
                    .vk_buffer()
                    .ok_or_else(|| Error::validation("typed binding requires a buffer"))?,
            )
            .format(format.to_vk())
            .offset(0)
            .range(elements * element_size);
        let view = unsafe { self.device.raw.create_buffer_view(&info, None) }
            .ctx("creating buffer view")?;
        self.buffer_views.push(view);
        Ok(view)
    }

    fn create_image_view(&mut self, resource: &Resource) -> Result<vk::ImageView> {
        let format = resource
            .format()
            .ok_or_else(|| Error::validation("texture binding requires a format"))?;
        let view_type = match resource.dim() {
            super::resource::ResourceDim::Texture1D => vk::ImageViewType::TYPE_1D,
            super::resource::ResourceDim::Texture2D => vk::ImageViewType::TYPE_2D,
            super::resource::ResourceDim::Texture3D => vk::ImageViewType::TYPE_3D,
            super::resource::ResourceDim::Buffer => {
                return Err(Error::validation("texture binding requires a texture"))
            }
        };

        let info = vk::ImageViewCreateInfo::builder()
            .image(
                resource
                    .vk_image()
                    .ok_or_else(|| Error::validation("texture binding requires a texture"))?,
            )
            .view_type(view_type)
            .format(format.to_vk())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.raw.create_image_view(&info, None) }
            .ctx("creating image view")?;
        self.image_views.push(view);
        Ok(view)
    }
}

fn descriptor_type(role: BindRole, resource: &Resource) -> vk::DescriptorType {
    match role {
        BindRole::Constant => vk::DescriptorType::UNIFORM_BUFFER,
        BindRole::Read => {
            if resource.is_buffer() {
                if resource.format().is_some() && resource.stride() == 0 {
                    vk::DescriptorType::UNIFORM_TEXEL_BUFFER
                } else {
                    vk::DescriptorType::STORAGE_BUFFER
                }
            } else {
                vk::DescriptorType::SAMPLED_IMAGE
            }
        }
        BindRole::ReadWrite => {
            if resource.is_buffer() {
                if resource.format().is_some() && resource.stride() == 0 {
                    vk::DescriptorType::STORAGE_TEXEL_BUFFER
                } else {
                    vk::DescriptorType::STORAGE_BUFFER
                }
            } else {
                vk::DescriptorType::STORAGE_IMAGE
            }
        }
    }
}

/// Byte blob to SPIR-V words, rejecting misaligned or empty input.
fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(Error::validation(
            "shader binary must be a non-empty multiple of 4 bytes",
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        let raw = &self.device.raw;
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                raw.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                raw.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            for view in self.buffer_views.drain(..) {
                raw.destroy_buffer_view(view, None);
            }
            for view in self.image_views.drain(..) {
                raw.destroy_image_view(view, None);
            }
            if self.pool != vk::DescriptorPool::null() {
                // Frees the set with it.
                raw.destroy_descriptor_pool(self.pool, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                raw.destroy_descriptor_set_layout(self.set_layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_bands_never_overlap() {
        // Each band has room for 1024 bindings before touching the next.
        assert!(CBV_BINDING_BASE + 1023 < SRV_BINDING_BASE);
        assert!(SRV_BINDING_BASE + 1023 < UAV_BINDING_BASE);
        assert!(UAV_BINDING_BASE + 1023 < SAMPLER_BINDING_BASE);
    }

    #[test]
    fn spirv_word_conversion_checks_alignment() {
        assert!(spirv_words(&[]).is_err());
        assert!(spirv_words(&[1, 2, 3]).is_err());
        let words = spirv_words(&0x0723_0203u32.to_ne_bytes()).unwrap();
        assert_eq!(words, vec![0x0723_0203]);
    }
}
