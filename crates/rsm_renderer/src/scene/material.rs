//! Material parameters and shader-variant flags

use bitflags::bitflags;

use crate::foundation::math::{Vec3, Vec4};

bitflags! {
    /// Flags selecting the shader variant of a primitive
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        /// Render both faces; disables back-face culling
        const DOUBLE_SIDED = 1 << 0;
        /// Alpha-blended; batched as transparent
        const ALPHA_BLEND = 1 << 1;
        /// Alpha-tested against the material cutoff
        const ALPHA_MASK = 1 << 2;
        /// Vertex normals present
        const HAS_NORMAL = 1 << 3;
        /// Vertex tangents present
        const HAS_TANGENT = 1 << 4;
        /// First texture coordinate set present
        const HAS_TEXCOORD_0 = 1 << 5;
        /// Vertex colours present
        const HAS_COLOR_0 = 1 << 6;
    }
}

/// Which PBR input a texture feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Base colour (sRGB)
    BaseColor,
    /// Metallic in B, roughness in G
    MetallicRoughness,
    /// Tangent-space normal map
    Normal,
    /// Emissive colour
    Emissive,
}

/// Decoded RGBA8 texture owned by a material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTexture {
    /// Logical name; becomes the `ID_<name>` binding define
    pub name: String,
    /// PBR input fed by this texture
    pub kind: TextureKind,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Tightly packed RGBA8 texels
    pub rgba8: Vec<u8>,
}

/// Metallic-roughness PBR material
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Linear base colour and alpha
    pub base_color: Vec4,
    /// Metalness in [0, 1]
    pub metallic: f32,
    /// Perceptual roughness in [0, 1]
    pub roughness: f32,
    /// Emitted radiance
    pub emissive: Vec3,
    /// Alpha-test threshold for `ALPHA_MASK`
    pub alpha_cutoff: f32,
    /// Variant flags
    pub flags: MaterialFlags,
    /// Textures bound with the material
    pub textures: Vec<MaterialTexture>,
}

impl Default for Material {
    /// The fallback material used by primitives that reference none
    fn default() -> Self {
        Self {
            base_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            metallic: 0.0,
            roughness: 1.0,
            emissive: Vec3::zeros(),
            alpha_cutoff: 0.5,
            flags: MaterialFlags::empty(),
            textures: Vec::new(),
        }
    }
}

impl Material {
    /// Opaque, untextured material of the given colour
    pub fn solid(color: Vec3, roughness: f32) -> Self {
        Self {
            base_color: Vec4::new(color.x, color.y, color.z, 1.0),
            roughness,
            ..Self::default()
        }
    }

    /// Whether the material is batched as transparent
    pub fn is_transparent(&self) -> bool {
        self.flags.contains(MaterialFlags::ALPHA_BLEND)
    }

    /// Whether back faces are rendered
    pub fn is_double_sided(&self) -> bool {
        self.flags.contains(MaterialFlags::DOUBLE_SIDED)
    }

    /// Diffuse albedo and specular reflectance at normal incidence
    ///
    /// Dielectrics reflect 4%; metals tint their reflectance with the base colour.
    pub fn diffuse_and_specular(&self) -> (Vec3, Vec3) {
        let base = self.base_color.xyz();
        let f0 = Vec3::repeat(0.04);
        let diffuse = base * (1.0 - self.metallic) * (1.0 - f0.x);
        let specular = f0.lerp(&base, self.metallic);
        (diffuse, specular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_material_is_opaque_white() {
        let material = Material::default();
        assert!(!material.is_transparent());
        assert!(!material.is_double_sided());
        assert_relative_eq!(material.base_color, Vec4::new(1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn test_metal_has_no_diffuse() {
        let metal = Material {
            metallic: 1.0,
            ..Material::solid(Vec3::new(1.0, 0.5, 0.25), 0.3)
        };
        let (diffuse, specular) = metal.diffuse_and_specular();
        assert_relative_eq!(diffuse, Vec3::zeros());
        assert_relative_eq!(specular, Vec3::new(1.0, 0.5, 0.25));
    }

    #[test]
    fn test_dielectric_reflects_four_percent() {
        let (diffuse, specular) = Material::solid(Vec3::new(1.0, 1.0, 1.0), 0.5).diffuse_and_specular();
        assert_relative_eq!(specular, Vec3::repeat(0.04));
        assert_relative_eq!(diffuse, Vec3::repeat(0.96));
    }

    #[test]
    fn test_blend_flag_marks_transparent() {
        let glass = Material {
            flags: MaterialFlags::ALPHA_BLEND,
            ..Material::default()
        };
        assert!(glass.is_transparent());
    }
}
