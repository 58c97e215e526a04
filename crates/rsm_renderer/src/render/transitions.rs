//! Resource transition controller
//!
//! Every pass declares which images it touches, how, and in which layout
//! ([`PassManifest`]). Passes are grouped into [`Phase`]s that may run without
//! barriers between them. [`synthesize`] walks the phases, tracks each image's
//! layout and outstanding writes, and emits one [`BarrierGroup`] at every phase
//! boundary that needs one. [`audit`] re-checks a plan against the manifests
//! and reports any read or write that no barrier guards.

use ash::vk;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::render::backends::vulkan::resources::full_range;

/// Every image the frame graph tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    /// Camera depth buffer
    CameraDepth,
    /// Camera G-Buffer world position
    CameraWorld,
    /// Camera G-Buffer normal
    CameraNormal,
    /// Camera G-Buffer diffuse albedo
    CameraDiffuse,
    /// Camera G-Buffer specular reflectance and roughness
    CameraSpecular,
    /// Screen-space motion vectors
    MotionVectors,
    /// HDR radiance; forward target, direct lighting output and aggregate
    Hdr,
    /// RSM atlas world position
    RsmWorld,
    /// RSM atlas normal
    RsmNormal,
    /// RSM atlas flux
    RsmFlux,
    /// RSM atlas depth
    RsmDepth,
    /// Half-resolution indirect lighting
    IndirectOutput,
}

impl ResourceId {
    /// Every tracked image
    pub const ALL: [Self; 12] = [
        Self::CameraDepth,
        Self::CameraWorld,
        Self::CameraNormal,
        Self::CameraDiffuse,
        Self::CameraSpecular,
        Self::MotionVectors,
        Self::Hdr,
        Self::RsmWorld,
        Self::RsmNormal,
        Self::RsmFlux,
        Self::RsmDepth,
        Self::IndirectOutput,
    ];

    /// Whether the image has a depth format
    pub fn is_depth(self) -> bool {
        matches!(self, Self::CameraDepth | Self::RsmDepth)
    }

    /// Aspect used in barriers
    pub fn aspect(self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// Direction of an access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Reads only
    Read,
    /// Writes only
    Write,
    /// Reads and writes (load-op attachments, storage images)
    ReadWrite,
}

impl Usage {
    fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

const WRITE_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::SHADER_WRITE.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags::HOST_WRITE.as_raw()
        | vk::AccessFlags::MEMORY_WRITE.as_raw(),
);

const DEPTH_TEST_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

/// How one pass uses one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess {
    /// Image
    pub resource: ResourceId,
    /// Read, write or both
    pub usage: Usage,
    /// Layout required when the pass starts; `UNDEFINED` discards prior contents
    pub layout: vk::ImageLayout,
    /// Layout the pass leaves the image in
    pub final_layout: vk::ImageLayout,
    /// Access types used
    pub access: vk::AccessFlags,
    /// Stages performing the access
    pub stage: vk::PipelineStageFlags,
}

impl ResourceAccess {
    /// Colour attachment cleared or overwritten by a render pass
    pub fn color_write(resource: ResourceId) -> Self {
        Self {
            resource,
            usage: Usage::Write,
            layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }

    /// Colour attachment loaded and written
    pub fn color_load_write(resource: ResourceId) -> Self {
        Self {
            resource,
            usage: Usage::ReadWrite,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            access: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }

    /// Depth attachment cleared and tested
    pub fn depth_write(resource: ResourceId) -> Self {
        Self {
            resource,
            usage: Usage::Write,
            layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            stage: DEPTH_TEST_STAGES,
        }
    }

    /// Subpass input attachment read by fragment shaders
    pub fn input_attachment(resource: ResourceId) -> Self {
        Self::read(
            resource,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::INPUT_ATTACHMENT_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )
    }

    /// Image sampled by shaders in `stage`
    pub fn sampled(resource: ResourceId, stage: vk::PipelineStageFlags) -> Self {
        Self::read(resource, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::AccessFlags::SHADER_READ, stage)
    }

    /// Depth image sampled with comparison while staying depth read-only
    pub fn depth_sampled(resource: ResourceId, stage: vk::PipelineStageFlags) -> Self {
        Self::read(
            resource,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            stage,
        )
    }

    /// Storage image read and written in place
    pub fn storage(resource: ResourceId, stage: vk::PipelineStageFlags) -> Self {
        Self {
            resource,
            usage: Usage::ReadWrite,
            layout: vk::ImageLayout::GENERAL,
            final_layout: vk::ImageLayout::GENERAL,
            access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            stage,
        }
    }

    fn read(resource: ResourceId, layout: vk::ImageLayout, access: vk::AccessFlags, stage: vk::PipelineStageFlags) -> Self {
        Self {
            resource,
            usage: Usage::Read,
            layout,
            final_layout: layout,
            access,
            stage,
        }
    }

    fn discards(&self) -> bool {
        self.layout == vk::ImageLayout::UNDEFINED
    }
}

/// Images one pass touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassManifest {
    /// Pass name used in diagnostics
    pub name: &'static str,
    /// Accesses, at most one per image
    pub accesses: Vec<ResourceAccess>,
}

impl PassManifest {
    /// Access to `resource`, if declared
    pub fn access(&self, resource: ResourceId) -> Option<&ResourceAccess> {
        self.accesses.iter().find(|a| a.resource == resource)
    }
}

/// Passes recorded back to back without barriers between them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// Phase name used in group names
    pub name: &'static str,
    /// Member passes
    pub passes: Vec<PassManifest>,
}

/// Tracked state of one image between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    /// Current layout
    pub layout: vk::ImageLayout,
    /// Write access and stage not yet made visible by a barrier
    pub pending_write: Option<(vk::AccessFlags, vk::PipelineStageFlags)>,
    /// Stages that read the image since its last write
    pub readers: vk::PipelineStageFlags,
}

impl ResourceState {
    /// Contents unknown, nothing outstanding
    pub fn undefined() -> Self {
        Self {
            layout: vk::ImageLayout::UNDEFINED,
            pending_write: None,
            readers: vk::PipelineStageFlags::empty(),
        }
    }
}

/// One image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image
    pub resource: ResourceId,
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Writes made available
    pub src_access: vk::AccessFlags,
    /// Accesses the writes are made visible to
    pub dst_access: vk::AccessFlags,
    /// Aspect of the subresource range
    pub aspect: vk::ImageAspectFlags,
}

/// One `vkCmdPipelineBarrier` between two phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierGroup {
    /// `"<producer phase> -> <consumer phase>"`
    pub name: String,
    /// Index of the phase this group precedes
    pub before_phase: usize,
    /// Union of producer stages
    pub src_stage: vk::PipelineStageFlags,
    /// Union of consumer stages
    pub dst_stage: vk::PipelineStageFlags,
    /// Per-image transitions, ordered by resource
    pub transitions: Vec<ImageTransition>,
}

/// Image handles the barriers resolve against
pub type ImageTable = HashMap<ResourceId, vk::Image>;

impl BarrierGroup {
    /// Transition of `resource`, if any
    pub fn transition(&self, resource: ResourceId) -> Option<&ImageTransition> {
        self.transitions.iter().find(|t| t.resource == resource)
    }

    /// Image memory barriers for images present in `images`
    pub fn image_barriers(&self, images: &ImageTable) -> Vec<vk::ImageMemoryBarrier> {
        self.transitions
            .iter()
            .filter_map(|t| {
                let Some(&image) = images.get(&t.resource) else {
                    log::warn!("[BARRIER] No image bound for {:?} in '{}'", t.resource, self.name);
                    return None;
                };
                Some(
                    vk::ImageMemoryBarrier::builder()
                        .src_access_mask(t.src_access)
                        .dst_access_mask(t.dst_access)
                        .old_layout(t.old_layout)
                        .new_layout(t.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(full_range(t.aspect))
                        .build(),
                )
            })
            .collect()
    }

    /// Record the group into `cmd`
    pub fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, images: &ImageTable) {
        let barriers = self.image_barriers(images);
        if barriers.is_empty() {
            return;
        }
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }
}

/// Barriers of a whole frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierPlan {
    /// Groups in phase order
    pub groups: Vec<BarrierGroup>,
    /// Image states after the last phase
    pub final_states: BTreeMap<ResourceId, ResourceState>,
}

impl BarrierPlan {
    /// Group recorded right before phase `index`
    pub fn before(&self, index: usize) -> Option<&BarrierGroup> {
        self.groups.iter().find(|g| g.before_phase == index)
    }
}

/// Manifests that cannot be scheduled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Two passes of one phase use an image incompatibly
    #[error("passes '{first}' and '{second}' in phase '{phase}' conflict on {resource:?}")]
    PhaseConflict {
        /// Phase name
        phase: &'static str,
        /// Image
        resource: ResourceId,
        /// First pass
        first: &'static str,
        /// Second pass
        second: &'static str,
    },
}

#[derive(Clone, Copy)]
struct PhaseUse {
    pass: &'static str,
    access: ResourceAccess,
}

// Merge the accesses of every pass in a phase, one entry per image
fn phase_uses(phase: &Phase) -> Result<BTreeMap<ResourceId, PhaseUse>, TransitionError> {
    let mut uses: BTreeMap<ResourceId, PhaseUse> = BTreeMap::new();
    for pass in &phase.passes {
        for access in &pass.accesses {
            match uses.get_mut(&access.resource) {
                None => {
                    uses.insert(access.resource, PhaseUse { pass: pass.name, access: *access });
                }
                Some(existing) => {
                    let both_read = !existing.access.usage.writes() && !access.usage.writes();
                    if !both_read || existing.access.layout != access.layout {
                        return Err(TransitionError::PhaseConflict {
                            phase: phase.name,
                            resource: access.resource,
                            first: existing.pass,
                            second: pass.name,
                        });
                    }
                    existing.access.access |= access.access;
                    existing.access.stage |= access.stage;
                }
            }
        }
    }
    Ok(uses)
}

/// Derive the barrier groups between consecutive phases
///
/// Images absent from `initial` start [`ResourceState::undefined`].
pub fn synthesize(
    phases: &[Phase],
    initial: &BTreeMap<ResourceId, ResourceState>,
) -> Result<BarrierPlan, TransitionError> {
    let mut states: BTreeMap<ResourceId, ResourceState> = ResourceId::ALL
        .iter()
        .map(|&id| (id, initial.get(&id).copied().unwrap_or_else(ResourceState::undefined)))
        .collect();
    let mut groups = Vec::new();

    for (index, phase) in phases.iter().enumerate() {
        let uses = phase_uses(phase)?;
        let mut group = BarrierGroup {
            name: match index.checked_sub(1).and_then(|i| phases.get(i)) {
                Some(previous) => format!("{} -> {}", previous.name, phase.name),
                None => format!("frame start -> {}", phase.name),
            },
            before_phase: index,
            src_stage: vk::PipelineStageFlags::empty(),
            dst_stage: vk::PipelineStageFlags::empty(),
            transitions: Vec::new(),
        };

        for (&resource, phase_use) in &uses {
            let access = phase_use.access;
            let state = states.entry(resource).or_insert_with(ResourceState::undefined);

            if !access.discards() {
                let layout_change = state.layout != access.layout;
                let write_after_read = access.usage.writes() && !state.readers.is_empty();

                if layout_change || state.pending_write.is_some() || write_after_read {
                    let (src_access, mut src_stage) = state
                        .pending_write
                        .unwrap_or((vk::AccessFlags::empty(), vk::PipelineStageFlags::empty()));
                    if write_after_read {
                        src_stage |= state.readers;
                    }
                    if src_stage.is_empty() {
                        src_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
                    }

                    group.src_stage |= src_stage;
                    group.dst_stage |= access.stage;
                    group.transitions.push(ImageTransition {
                        resource,
                        old_layout: state.layout,
                        new_layout: access.layout,
                        src_access,
                        dst_access: access.access,
                        aspect: resource.aspect(),
                    });
                    state.pending_write = None;
                    state.readers = vk::PipelineStageFlags::empty();
                }
            }

            state.layout = access.final_layout;
            if access.usage.writes() {
                let written = access.access & WRITE_ACCESS;
                state.pending_write = Some((written, access.stage));
                state.readers = vk::PipelineStageFlags::empty();
            } else {
                state.readers |= access.stage;
            }
        }

        if !group.transitions.is_empty() {
            log::trace!("[BARRIER] '{}': {} transitions", group.name, group.transitions.len());
            groups.push(group);
        }
    }

    Ok(BarrierPlan {
        groups,
        final_states: states,
    })
}

/// A producer/consumer pair on one image with no adequate barrier between them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnguardedDependency {
    /// Image
    pub resource: ResourceId,
    /// Pass that wrote it
    pub producer: &'static str,
    /// Pass that then accessed it
    pub consumer: &'static str,
    /// What is missing
    pub reason: String,
}

impl fmt::Display for UnguardedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} -> {}: {}", self.resource, self.producer, self.consumer, self.reason)
    }
}

/// Check `plan` against the manifests
///
/// Every access to an image written by an earlier pass must be preceded by a
/// transition of that image, issued after the write, that ends in the layout
/// the consumer expects and whose destination access covers the consumer's
/// access. Discarding writes are exempt.
pub fn audit(phases: &[Phase], plan: &BarrierPlan) -> Vec<UnguardedDependency> {
    let mut findings = Vec::new();
    // Last writer: (phase index, pass name, layout left behind)
    let mut writers: HashMap<ResourceId, (usize, &'static str, vk::ImageLayout)> = HashMap::new();

    for (index, phase) in phases.iter().enumerate() {
        for pass in &phase.passes {
            for access in &pass.accesses {
                if let Some(&(writer_phase, producer, _)) = writers.get(&access.resource) {
                    if writer_phase == index && producer != pass.name {
                        findings.push(UnguardedDependency {
                            resource: access.resource,
                            producer,
                            consumer: pass.name,
                            reason: "producer and consumer share a phase".to_string(),
                        });
                        continue;
                    }
                }
            }
        }

        for pass in &phase.passes {
            for access in &pass.accesses {
                let Some(&(writer_phase, producer, writer_layout)) = writers.get(&access.resource) else {
                    continue;
                };
                if writer_phase >= index || access.discards() {
                    continue;
                }

                let guard = plan
                    .groups
                    .iter()
                    .filter(|g| g.before_phase > writer_phase && g.before_phase <= index)
                    .filter_map(|g| g.transition(access.resource))
                    .last();

                let reason = match guard {
                    None if writer_layout != access.layout => Some("no layout transition".to_string()),
                    None => Some("no barrier after the write".to_string()),
                    Some(t) if t.new_layout != access.layout => {
                        Some(format!("transitioned to {:?}, consumer expects {:?}", t.new_layout, access.layout))
                    }
                    Some(t) if !t.dst_access.contains(access.access) => Some(format!(
                        "destination access {:?} does not cover {:?}",
                        t.dst_access, access.access
                    )),
                    Some(_) => None,
                };
                if let Some(reason) = reason {
                    findings.push(UnguardedDependency {
                        resource: access.resource,
                        producer,
                        consumer: pass.name,
                        reason,
                    });
                }
            }
        }

        for pass in &phase.passes {
            for access in pass.accesses.iter().filter(|a| a.usage.writes()) {
                writers.insert(access.resource, (index, pass.name, access.final_layout));
            }
        }
    }
    findings
}

/// Images written by the G-Buffer pass
pub fn gbuffer_manifest() -> PassManifest {
    PassManifest {
        name: "gbuffer",
        accesses: vec![
            ResourceAccess::depth_write(ResourceId::CameraDepth),
            ResourceAccess::color_write(ResourceId::CameraWorld),
            ResourceAccess::color_write(ResourceId::CameraNormal),
            ResourceAccess::color_write(ResourceId::CameraDiffuse),
            ResourceAccess::color_write(ResourceId::CameraSpecular),
            ResourceAccess::color_write(ResourceId::MotionVectors),
            ResourceAccess::color_write(ResourceId::Hdr),
        ],
    }
}

/// Images written by the RSM pass
pub fn rsm_manifest() -> PassManifest {
    PassManifest {
        name: "rsm",
        accesses: vec![
            ResourceAccess::color_write(ResourceId::RsmWorld),
            ResourceAccess::color_write(ResourceId::RsmNormal),
            ResourceAccess::color_write(ResourceId::RsmFlux),
            ResourceAccess::depth_write(ResourceId::RsmDepth),
        ],
    }
}

/// Images used by direct lighting
pub fn direct_lighting_manifest() -> PassManifest {
    let fragment = vk::PipelineStageFlags::FRAGMENT_SHADER;
    PassManifest {
        name: "direct_lighting",
        accesses: vec![
            ResourceAccess::input_attachment(ResourceId::CameraWorld),
            ResourceAccess::input_attachment(ResourceId::CameraNormal),
            ResourceAccess::input_attachment(ResourceId::CameraDiffuse),
            ResourceAccess::input_attachment(ResourceId::CameraSpecular),
            ResourceAccess::depth_sampled(ResourceId::RsmDepth, fragment),
            ResourceAccess::color_load_write(ResourceId::Hdr),
        ],
    }
}

/// Images used by indirect lighting
pub fn indirect_lighting_manifest() -> PassManifest {
    let fragment = vk::PipelineStageFlags::FRAGMENT_SHADER;
    PassManifest {
        name: "indirect_lighting",
        accesses: vec![
            ResourceAccess::sampled(ResourceId::CameraWorld, fragment),
            ResourceAccess::sampled(ResourceId::CameraNormal, fragment),
            ResourceAccess::sampled(ResourceId::RsmWorld, fragment),
            ResourceAccess::sampled(ResourceId::RsmNormal, fragment),
            ResourceAccess::sampled(ResourceId::RsmFlux, fragment),
            ResourceAccess::color_write(ResourceId::IndirectOutput),
        ],
    }
}

/// Images used by the aggregator
pub fn aggregator_manifest() -> PassManifest {
    let compute = vk::PipelineStageFlags::COMPUTE_SHADER;
    PassManifest {
        name: "aggregator",
        accesses: vec![
            ResourceAccess::storage(ResourceId::Hdr, compute),
            ResourceAccess::sampled(ResourceId::IndirectOutput, compute),
        ],
    }
}

/// Images read by the temporal resolve
pub fn temporal_resolve_manifest() -> PassManifest {
    let compute = vk::PipelineStageFlags::COMPUTE_SHADER;
    PassManifest {
        name: "temporal_resolve",
        accesses: vec![
            ResourceAccess::sampled(ResourceId::Hdr, compute),
            ResourceAccess::sampled(ResourceId::MotionVectors, compute),
            ResourceAccess::sampled(ResourceId::CameraDepth, compute),
        ],
    }
}

/// The frame: geometry, lighting, aggregation, temporal resolve
pub fn standard_frame_phases() -> Vec<Phase> {
    vec![
        Phase {
            name: "geometry",
            passes: vec![gbuffer_manifest(), rsm_manifest()],
        },
        Phase {
            name: "lighting",
            passes: vec![direct_lighting_manifest(), indirect_lighting_manifest()],
        },
        Phase {
            name: "aggregation",
            passes: vec![aggregator_manifest()],
        },
        Phase {
            name: "temporal",
            passes: vec![temporal_resolve_manifest()],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_plan() -> BarrierPlan {
        synthesize(&standard_frame_phases(), &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_standard_frame_has_three_groups() {
        let plan = standard_plan();
        let indices: Vec<usize> = plan.groups.iter().map(|g| g.before_phase).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(plan.before(0).is_none());
    }

    #[test]
    fn test_geometry_to_lighting_group() {
        let plan = standard_plan();
        let group = plan.before(1).unwrap();

        for id in [
            ResourceId::CameraWorld,
            ResourceId::CameraNormal,
            ResourceId::CameraDiffuse,
            ResourceId::CameraSpecular,
        ] {
            let t = group.transition(id).unwrap();
            assert_eq!(t.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
            assert_eq!(t.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!(t.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
            assert!(t.dst_access.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));
        }
        // World and normal are also sampled by the indirect pass
        let world = group.transition(ResourceId::CameraWorld).unwrap();
        assert_eq!(world.dst_access, vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ);

        for id in [ResourceId::RsmWorld, ResourceId::RsmNormal, ResourceId::RsmFlux] {
            let t = group.transition(id).unwrap();
            assert_eq!(t.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            assert_eq!(t.dst_access, vk::AccessFlags::SHADER_READ);
        }

        let depth = group.transition(ResourceId::RsmDepth).unwrap();
        assert_eq!(depth.old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.new_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(depth.src_access, vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);

        assert!(group.src_stage.contains(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        ));
        assert!(group.dst_stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        // Indirect output is discarded, camera depth and motion vectors are not read yet
        assert!(group.transition(ResourceId::IndirectOutput).is_none());
        assert!(group.transition(ResourceId::CameraDepth).is_none());
        assert!(group.transition(ResourceId::MotionVectors).is_none());
    }

    #[test]
    fn test_lighting_to_aggregation_group() {
        let plan = standard_plan();
        let group = plan.before(2).unwrap();

        let hdr = group.transition(ResourceId::Hdr).unwrap();
        assert_eq!(hdr.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(hdr.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(hdr.dst_access, vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);

        let indirect = group.transition(ResourceId::IndirectOutput).unwrap();
        assert_eq!(indirect.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        assert_eq!(group.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(group.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(group.transitions.len(), 2);
    }

    #[test]
    fn test_aggregation_to_temporal_group() {
        let plan = standard_plan();
        let group = plan.before(3).unwrap();

        let hdr = group.transition(ResourceId::Hdr).unwrap();
        assert_eq!(hdr.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(hdr.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(hdr.src_access, vk::AccessFlags::SHADER_WRITE);

        let motion = group.transition(ResourceId::MotionVectors).unwrap();
        assert_eq!(motion.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = group.transition(ResourceId::CameraDepth).unwrap();
        assert_eq!(depth.old_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);

        assert_eq!(
            group.src_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                | vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(group.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn test_standard_frame_passes_audit() {
        let phases = standard_frame_phases();
        let plan = synthesize(&phases, &BTreeMap::new()).unwrap();
        let findings = audit(&phases, &plan);
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_audit_catches_a_removed_barrier() {
        let phases = standard_frame_phases();
        let mut plan = synthesize(&phases, &BTreeMap::new()).unwrap();
        plan.groups[1].transitions.retain(|t| t.resource != ResourceId::IndirectOutput);

        let findings = audit(&phases, &plan);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource, ResourceId::IndirectOutput);
        assert_eq!(findings[0].producer, "indirect_lighting");
        assert_eq!(findings[0].consumer, "aggregator");
    }

    #[test]
    fn test_audit_catches_insufficient_access() {
        let phases = standard_frame_phases();
        let mut plan = synthesize(&phases, &BTreeMap::new()).unwrap();
        for t in &mut plan.groups[0].transitions {
            if t.resource == ResourceId::RsmFlux {
                t.dst_access = vk::AccessFlags::INPUT_ATTACHMENT_READ;
            }
        }
        let findings = audit(&phases, &plan);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].consumer, "indirect_lighting");
    }

    #[test]
    fn test_producer_and_consumer_in_one_phase_conflict() {
        let phases = vec![Phase {
            name: "broken",
            passes: vec![rsm_manifest(), indirect_lighting_manifest()],
        }];
        let result = synthesize(&phases, &BTreeMap::new());
        assert!(matches!(
            result,
            Err(TransitionError::PhaseConflict { resource: ResourceId::RsmWorld, .. })
        ));
    }

    #[test]
    fn test_read_after_read_emits_nothing() {
        let fragment = vk::PipelineStageFlags::FRAGMENT_SHADER;
        let read = |name| PassManifest {
            name,
            accesses: vec![ResourceAccess::sampled(ResourceId::RsmFlux, fragment)],
        };
        let phases = vec![
            Phase { name: "write", passes: vec![rsm_manifest()] },
            Phase { name: "first", passes: vec![read("a")] },
            Phase { name: "second", passes: vec![read("b")] },
        ];
        let plan = synthesize(&phases, &BTreeMap::new()).unwrap();
        assert!(plan.before(1).is_some());
        assert!(plan.before(2).is_none());
    }

    #[test]
    fn test_write_after_read_waits_for_readers() {
        let phases = vec![
            Phase { name: "geometry", passes: vec![gbuffer_manifest()] },
            Phase { name: "read", passes: vec![temporal_resolve_manifest()] },
            Phase {
                name: "rewrite",
                passes: vec![PassManifest {
                    name: "overlay",
                    accesses: vec![ResourceAccess::storage(ResourceId::Hdr, vk::PipelineStageFlags::COMPUTE_SHADER)],
                }],
            },
        ];
        let plan = synthesize(&phases, &BTreeMap::new()).unwrap();
        let group = plan.before(2).unwrap();
        let t = group.transition(ResourceId::Hdr).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert!(group.src_stage.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
    }

    #[test]
    fn test_final_states_track_layouts() {
        let plan = standard_plan();
        assert_eq!(
            plan.final_states[&ResourceId::Hdr].layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            plan.final_states[&ResourceId::RsmDepth].layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_image_barriers_skip_unbound_images() {
        let plan = standard_plan();
        let group = plan.before(2).unwrap();
        let mut images = ImageTable::new();
        images.insert(ResourceId::Hdr, vk::Image::null());
        let barriers = group.image_barriers(&images);
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].new_layout, vk::ImageLayout::GENERAL);
    }
}
