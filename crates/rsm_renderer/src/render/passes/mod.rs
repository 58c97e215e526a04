//! GPU passes of the frame
//!
//! Each pass splits its objects into a persistent part, created once, and a
//! size-dependent part rebuilt on resize. Passes that read another pass's
//! images receive them as non-owning view bundles ([`CameraGBufferViews`],
//! [`LightGBufferViews`]) and must be handed fresh bundles after every resize.

pub mod aggregator;
pub mod direct_lighting;
pub mod gbuffer;
pub mod indirect_lighting;
pub mod rsm;

pub use aggregator::{Aggregator, AggregatorParams};
pub use direct_lighting::DirectLighting;
pub use gbuffer::{GBuffer, GBufferPass};
pub use indirect_lighting::IndirectLighting;
pub use rsm::{active_quadrants, alloc_light_constants, quadrant_rect, Rsm, RsmStats};

use ash::{vk, Device};
use std::collections::HashMap;
use std::mem::size_of;
use std::sync::{mpsc, Arc};

use crate::render::backends::vulkan::rendering::{GraphicsPipelineDesc, Pipeline, ShaderCache, ShaderStage};
use crate::render::backends::vulkan::resources::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter, Image, ImageDesc, Sampler,
};
use crate::render::backends::vulkan::state::AsyncPool;
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::batch::Batch;
use crate::render::constants::{PerFrameConstants, PerObjectConstants};
use crate::render::defines::{Defines, FIRST_MATERIAL_TEXTURE_BINDING};
use crate::render::ring::ConstantAllocation;
use crate::scene::{MaterialKey, MeshKey, SceneCollaborator, TextureKind};

/// Render target formats
pub mod formats {
    use ash::vk;

    /// Lighting accumulation and indirect output
    pub const HDR: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    /// World-space position
    pub const WORLD: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
    /// World-space normal
    pub const NORMAL: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    /// RSM flux
    pub const FLUX: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    /// Diffuse albedo
    pub const DIFFUSE: vk::Format = vk::Format::R8G8B8A8_UNORM;
    /// Specular reflectance and roughness
    pub const SPECULAR: vk::Format = vk::Format::R8G8B8A8_UNORM;
    /// Screen-space motion
    pub const MOTION: vk::Format = vk::Format::R16G16_SFLOAT;
    /// Depth
    pub const DEPTH: vk::Format = vk::Format::D32_SFLOAT;
}

/// Binding indices of the scene passes' set 0
pub mod scene_bindings {
    /// Per-frame constants, dynamic uniform
    pub const PER_FRAME: u32 = 0;
    /// Per-object constants, dynamic uniform
    pub const PER_OBJECT: u32 = 1;
}

/// Views of the camera G-Buffer
///
/// Non-owning; valid until the next resize. Passes holding descriptor sets
/// over these views must be given the new bundle after every resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraGBufferViews {
    /// Depth
    pub depth: vk::ImageView,
    /// World position
    pub world: vk::ImageView,
    /// Normal
    pub normal: vk::ImageView,
    /// Diffuse albedo
    pub diffuse: vk::ImageView,
    /// Specular and roughness
    pub specular: vk::ImageView,
    /// Motion vectors
    pub motion: vk::ImageView,
    /// HDR lighting accumulation
    pub hdr: vk::ImageView,
    /// Size of every view
    pub extent: vk::Extent2D,
}

/// Views of the RSM atlas
///
/// Non-owning; valid as long as the RSM that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightGBufferViews {
    /// World position
    pub world: vk::ImageView,
    /// Normal
    pub normal: vk::ImageView,
    /// Flux
    pub flux: vk::ImageView,
    /// Depth
    pub depth: vk::ImageView,
    /// Atlas size
    pub extent: vk::Extent2D,
}

/// Whole-target rectangle
pub fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Draw the fullscreen triangle generated by `fullscreen.vert`
pub fn draw_fullscreen(device: &Device, cmd: vk::CommandBuffer) {
    unsafe { device.cmd_draw(cmd, 3, 1, 0, 0) };
}

/// Set 0 shared by the G-Buffer and RSM passes: per-frame and per-object
/// constants, both bound with dynamic offsets into the constant ring
pub struct SceneFrameSet {
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
}

impl SceneFrameSet {
    /// Allocate from `pool` and point both bindings at `ring_buffer`
    pub fn new(device: &Device, pool: &DescriptorPool, ring_buffer: vk::Buffer) -> RenderResult<Self> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let layout = DescriptorSetLayoutBuilder::new()
            .add_dynamic_uniform_buffer(scene_bindings::PER_FRAME, stages)
            .add_dynamic_uniform_buffer(scene_bindings::PER_OBJECT, stages)
            .build(device)?;
        let set = pool.allocate_one(&layout)?;
        DescriptorSetWriter::new(set)
            .dynamic_uniform_buffer(scene_bindings::PER_FRAME, ring_buffer, size_of::<PerFrameConstants>() as u64)
            .dynamic_uniform_buffer(scene_bindings::PER_OBJECT, ring_buffer, size_of::<PerObjectConstants>() as u64)
            .update(device);
        Ok(Self { layout, set })
    }

    /// Layout handle
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Set handle
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Binding defines matching this set
    pub fn defines() -> Defines {
        Defines::new()
            .with("ID_PER_FRAME", scene_bindings::PER_FRAME)
            .with("ID_PER_OBJECT", scene_bindings::PER_OBJECT)
    }
}

struct MaterialSet {
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    _images: Vec<Image>,
}

/// Uploaded material textures and their set-1 descriptors
///
/// Only materials with textures get a set; the rest draw with set 0 alone.
pub struct MaterialBindings {
    sets: HashMap<MaterialKey, MaterialSet>,
    sampler: Sampler,
    pool: Option<DescriptorPool>,
}

impl MaterialBindings {
    /// Nothing uploaded yet
    pub fn new(sampler: Sampler) -> Self {
        Self {
            sets: HashMap::new(),
            sampler,
            pool: None,
        }
    }

    /// Upload the textures of every material referenced by the scene
    pub fn upload<C: SceneCollaborator + ?Sized>(
        &mut self,
        context: &DeviceContext,
        command_pool: vk::CommandPool,
        scene: &C,
    ) -> RenderResult<()> {
        let mut keys: Vec<MaterialKey> = scene
            .meshes()
            .iter()
            .flat_map(|(_, mesh)| mesh.primitives.iter().filter_map(|p| p.material))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.retain(|key| scene.material(*key).is_some_and(|m| !m.textures.is_empty()));
        if keys.is_empty() {
            return Ok(());
        }

        let pool = DescriptorPool::new(&context.device, keys.len() as u32)?;
        for key in keys {
            let Some(material) = scene.material(key) else { continue };

            let mut builder = DescriptorSetLayoutBuilder::new();
            let mut images = Vec::with_capacity(material.textures.len());
            for (slot, texture) in material.textures.iter().enumerate() {
                let format = match texture.kind {
                    TextureKind::BaseColor | TextureKind::Emissive => vk::Format::R8G8B8A8_SRGB,
                    TextureKind::MetallicRoughness | TextureKind::Normal => vk::Format::R8G8B8A8_UNORM,
                };
                let desc = ImageDesc {
                    name: "material texture",
                    extent: vk::Extent2D {
                        width: texture.width,
                        height: texture.height,
                    },
                    format,
                    usage: vk::ImageUsageFlags::SAMPLED,
                };
                images.push(Image::from_data(context, command_pool, &desc, &texture.rgba8)?);
                builder = builder.add_combined_image_sampler(
                    FIRST_MATERIAL_TEXTURE_BINDING + slot as u32,
                    vk::ShaderStageFlags::FRAGMENT,
                );
            }

            let layout = builder.build(&context.device)?;
            let set = pool.allocate_one(&layout)?;
            images
                .iter()
                .enumerate()
                .fold(DescriptorSetWriter::new(set), |writer, (slot, image)| {
                    writer.combined_image_sampler(
                        FIRST_MATERIAL_TEXTURE_BINDING + slot as u32,
                        image.view(),
                        self.sampler.handle(),
                    )
                })
                .update(&context.device);

            self.sets.insert(
                key,
                MaterialSet {
                    layout,
                    set,
                    _images: images,
                },
            );
        }
        self.pool = Some(pool);
        log::debug!("Uploaded textures of {} materials", self.sets.len());
        Ok(())
    }

    /// Set-1 layout of a material, if it has textures
    pub fn layout(&self, key: Option<MaterialKey>) -> Option<vk::DescriptorSetLayout> {
        key.and_then(|k| self.sets.get(&k)).map(|s| s.layout.handle())
    }

    /// Set-1 descriptor set of a material, if it has textures
    pub fn set(&self, key: Option<MaterialKey>) -> Option<vk::DescriptorSet> {
        key.and_then(|k| self.sets.get(&k)).map(|s| s.set)
    }

    /// Number of materials with a set
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no material has a set
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Drop every set and texture
    pub fn clear(&mut self) {
        self.sets.clear();
        self.pool = None;
    }
}

/// Vertex and fragment shader names of a scene pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassProgram {
    /// Vertex shader
    pub vertex: &'static str,
    /// Fragment shader
    pub fragment: &'static str,
}

/// Compiled pipeline per primitive; `None` where building failed
pub type PrimitivePipelines = HashMap<(MeshKey, usize), Option<Pipeline>>;

/// Build one pipeline per primitive of `scene` on `workers`
///
/// Defines are resolved here; shader loading and pipeline creation run on
/// the pool. A primitive whose pipeline fails is logged and stored as `None`
/// so batch building skips it.
pub fn build_primitive_pipelines<C: SceneCollaborator + ?Sized>(
    device: &Device,
    workers: &AsyncPool,
    shaders: &Arc<ShaderCache>,
    scene: &C,
    program: PassProgram,
    base: GraphicsPipelineDesc,
    pass_defines: &Defines,
    frame_layout: vk::DescriptorSetLayout,
    materials: &MaterialBindings,
) -> PrimitivePipelines {
    let (sender, receiver) = mpsc::channel();
    let mut submitted = 0usize;

    for (mesh_key, mesh) in scene.meshes() {
        for (index, primitive) in mesh.primitives.iter().enumerate() {
            let material = scene.material_for(primitive);
            let mut defines = pass_defines.clone();
            defines.merge(&Defines::for_material(material, primitive.attributes));
            let desc = base.with_material(material.flags);
            let mut set_layouts = vec![frame_layout];
            set_layouts.extend(materials.layout(primitive.material));

            let device = device.clone();
            let shaders = Arc::clone(shaders);
            let sender = sender.clone();
            workers.execute(move || {
                let result = (|| -> RenderResult<Pipeline> {
                    let vertex = shaders.module(&device, program.vertex, ShaderStage::Vertex, &defines)?;
                    let fragment = shaders.module(&device, program.fragment, ShaderStage::Fragment, &defines)?;
                    Pipeline::graphics(&device, &desc, &vertex, &fragment, &set_layouts)
                })();
                let pipeline = match result {
                    Ok(pipeline) => Some(pipeline),
                    Err(e) => {
                        log::warn!(
                            "[PIPELINE] {}/{} failed for primitive {index} of {mesh_key:?}: {e}",
                            program.vertex,
                            program.fragment
                        );
                        None
                    }
                };
                // The receiver outlives every job: the caller joins before reading
                let _ = sender.send(((mesh_key, index), pipeline));
            });
            submitted += 1;
        }
    }
    drop(sender);
    workers.join();

    let pipelines: PrimitivePipelines = receiver.try_iter().collect();
    let failed = pipelines.values().filter(|p| p.is_none()).count();
    log::info!(
        "[PIPELINE] Built {} {} pipelines ({failed} failed)",
        submitted - failed,
        program.fragment
    );
    pipelines
}

/// Record the draws of `batches`
///
/// Set 0 is bound with the per-frame offset and each batch's per-object
/// offset; set 1 only for materials with textures.
pub fn draw_batches(
    device: &Device,
    cmd: vk::CommandBuffer,
    batches: &[Batch<'_, Pipeline>],
    frame_set: vk::DescriptorSet,
    per_frame: &ConstantAllocation,
    materials: &MaterialBindings,
) -> usize {
    let mut drawn = 0;
    for batch in batches {
        let geometry = &batch.primitive.geometry;
        if !geometry.is_uploaded() {
            continue;
        }

        let pipeline = batch.state;
        pipeline.bind(cmd);
        let mut sets = vec![frame_set];
        sets.extend(materials.set(batch.primitive.material));
        pipeline.bind_sets(cmd, &sets, &[per_frame.dynamic_offset(), batch.per_object.dynamic_offset()]);

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[geometry.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, geometry.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, geometry.index_count, 1, geometry.first_index, geometry.vertex_offset, 0);
        }
        drawn += 1;
    }
    drawn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_defines_match_bindings() {
        let defines = SceneFrameSet::defines();
        assert_eq!(defines.binding("ID_PER_FRAME"), Some(scene_bindings::PER_FRAME));
        assert_eq!(defines.binding("ID_PER_OBJECT"), Some(scene_bindings::PER_OBJECT));
    }

    #[test]
    fn test_full_rect_starts_at_origin() {
        let rect = full_rect(vk::Extent2D { width: 640, height: 360 });
        assert_eq!(rect.offset.x, 0);
        assert_eq!(rect.extent.width, 640);
    }

    #[test]
    fn test_depth_format_has_depth_aspect() {
        assert_eq!(
            crate::render::backends::vulkan::resources::image::aspect_of(formats::DEPTH),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            crate::render::backends::vulkan::resources::image::aspect_of(formats::HDR),
            vk::ImageAspectFlags::COLOR
        );
    }
}
