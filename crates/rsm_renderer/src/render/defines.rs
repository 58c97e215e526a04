//! Shader preprocessor defines
//!
//! Host code and GLSL share binding indices through defines keyed by logical
//! name (`ID_PER_FRAME`, `ID_shadowMap`, ...). Each pass builds its map once,
//! merges in the material's feature defines and hands it to the shader loader,
//! which turns it into `glslc -D` arguments and a cache key.

use std::collections::BTreeMap;
use std::fmt;

use crate::scene::{Material, MaterialFlags};

/// Ordered map of define name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Defines(BTreeMap<String, String>);

impl Defines {
    /// Empty define set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.0.insert(name.into(), value.to_string());
        self
    }

    /// Builder form of [`set`](Self::set)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    /// Value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Binding index stored under `name`
    pub fn binding(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// Copy every define of `other` into `self`; `other` wins on conflicts
    pub fn merge(&mut self, other: &Defines) -> &mut Self {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
        self
    }

    /// `(name, value)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Number of defines
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no define is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `-DNAME=VALUE` arguments for glslc, in name order
    pub fn to_glslc_args(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    format!("-D{name}")
                } else {
                    format!("-D{name}={value}")
                }
            })
            .collect()
    }

    /// Stable key identifying this define set, usable in file names
    pub fn cache_key(&self) -> String {
        // FNV-1a over the sorted pairs
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for (name, value) in &self.0 {
            for byte in name.bytes().chain([b'=']).chain(value.bytes()).chain([b';']) {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
        format!("{hash:016x}")
    }

    /// Feature defines of a material drawn with the given vertex attributes
    pub fn for_material(material: &Material, attributes: MaterialFlags) -> Self {
        let mut defines = Self::new();
        let flags = material.flags | attributes;

        if flags.contains(MaterialFlags::HAS_NORMAL) {
            defines.set("ID_NORMAL", 1);
        }
        if flags.contains(MaterialFlags::HAS_TANGENT) {
            defines.set("ID_TANGENT", 3);
        }
        if flags.contains(MaterialFlags::HAS_TEXCOORD_0) {
            defines.set("ID_TEXCOORD_0", 2);
        }
        if flags.contains(MaterialFlags::HAS_COLOR_0) {
            defines.set("ID_COLOR_0", 4);
        }
        if flags.contains(MaterialFlags::DOUBLE_SIDED) {
            defines.set("DEF_doubleSided", 1);
        }
        if flags.contains(MaterialFlags::ALPHA_BLEND) {
            defines.set("DEF_alphaMode_BLEND", 1);
        } else if flags.contains(MaterialFlags::ALPHA_MASK) {
            defines.set("DEF_alphaMode_MASK", 1);
            defines.set("DEF_alphaCutoff", format!("{:.4}", material.alpha_cutoff));
        } else {
            defines.set("DEF_alphaMode_OPAQUE", 1);
        }

        for (slot, texture) in material.textures.iter().enumerate() {
            defines.set(format!("ID_{}", texture.name), FIRST_MATERIAL_TEXTURE_BINDING + slot as u32);
        }
        defines
    }
}

/// First binding of the per-object set used by material textures
pub const FIRST_MATERIAL_TEXTURE_BINDING: u32 = 2;

impl fmt::Display for Defines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}
