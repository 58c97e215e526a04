//! Shader modules and shader lookup
//!
//! Pass shaders are looked up by name and stage. With defines, the GLSL
//! source is compiled at runtime with `glslc` and the result cached on disk
//! under a key derived from the defines. Without `glslc`, the prebuilt SPIR-V
//! binary from `build.rs` stands in only when the source's `#ifndef` defaults
//! already match every requested define.

use ash::{vk, Device};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::{CStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::render::backends::vulkan::{RenderError, RenderResult};
use crate::render::defines::Defines;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a shader runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
    /// Compute shader
    Compute,
}

impl ShaderStage {
    /// GLSL file extension, also part of the SPIR-V file name
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }

    /// Vulkan stage flag
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Decode little-endian SPIR-V, checking length and magic number
pub fn spirv_words(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.len() < 20 {
        return Err(RenderError::InitializationFailed(format!(
            "SPIR-V length {} is not a whole number of words",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(RenderError::InitializationFailed(format!(
            "Bad SPIR-V magic {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}

/// SPIR-V shader module with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    /// Create a module from decoded SPIR-V words
    pub fn new(device: &Device, stage: ShaderStage, words: &[u32]) -> RenderResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
            log::error!("[SHADER] vkCreateShaderModule failed: {e:?}");
            RenderError::Api(e)
        })?;
        Ok(Self {
            device: device.clone(),
            module,
            stage,
        })
    }

    /// Create a module from raw SPIR-V bytes
    pub fn from_bytes(device: &Device, stage: ShaderStage, bytes: &[u8]) -> RenderResult<Self> {
        Self::new(device, stage, &spirv_words(bytes)?)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage the module was created for
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage create info with the `main` entry point
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Finds SPIR-V binaries and GLSL sources on disk
#[derive(Debug, Clone)]
pub struct ShaderLocator {
    binary_dirs: Vec<PathBuf>,
    source_dir: PathBuf,
    cache_dir: PathBuf,
    glslc: Option<PathBuf>,
}

impl ShaderLocator {
    /// Search `configured` first, then the build output, then the source tree
    pub fn new(configured: &Path) -> Self {
        let workspace = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let source_dir = workspace.join("resources/shaders");
        Self {
            binary_dirs: vec![configured.to_path_buf(), workspace.join("target/shaders"), source_dir.clone()],
            source_dir,
            cache_dir: std::env::temp_dir().join("rsm_shaders"),
            glslc: find_glslc(),
        }
    }

    /// Locator over explicit directories, without runtime compilation
    pub fn with_dirs(binary_dirs: Vec<PathBuf>, source_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            binary_dirs,
            source_dir,
            cache_dir,
            glslc: None,
        }
    }

    /// Use `glslc` at `path` for runtime compilation
    pub fn with_compiler(mut self, path: PathBuf) -> Self {
        self.glslc = Some(path);
        self
    }

    /// First prebuilt `<name>.<stage>.spv` in the search directories
    pub fn binary_path(&self, name: &str, stage: ShaderStage) -> Option<PathBuf> {
        let file = format!("{name}.{}.spv", stage.extension());
        self.binary_dirs.iter().map(|dir| dir.join(&file)).find(|path| path.is_file())
    }

    /// GLSL source `<name>.<stage>`
    pub fn source_path(&self, name: &str, stage: ShaderStage) -> Option<PathBuf> {
        let path = self.source_dir.join(format!("{name}.{}", stage.extension()));
        path.is_file().then_some(path)
    }

    /// Output path of a runtime-compiled variant
    pub fn variant_path(&self, name: &str, stage: ShaderStage, defines: &Defines) -> PathBuf {
        self.cache_dir
            .join(format!("{name}.{}.{}.spv", stage.extension(), defines.cache_key()))
    }

    /// `glslc` arguments compiling `source` to `output` with `defines`
    pub fn compile_args(&self, source: &Path, output: &Path, defines: &Defines) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            source.as_os_str().to_owned(),
            "-I".into(),
            self.source_dir.as_os_str().to_owned(),
        ];
        args.extend(defines.to_glslc_args().into_iter().map(OsString::from));
        args.push("-o".into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// SPIR-V words for `name` at `stage` compiled with `defines`
    pub fn load(&self, name: &str, stage: ShaderStage, defines: &Defines) -> RenderResult<Vec<u32>> {
        if !defines.is_empty() {
            if let (Some(glslc), Some(source)) = (&self.glslc, self.source_path(name, stage)) {
                let output = self.variant_path(name, stage, defines);
                if !output.is_file() {
                    self.compile(glslc, &source, &output, defines)?;
                }
                return read_spirv(&output);
            }
            self.check_prebuilt(name, stage, defines)?;
        }

        match self.binary_path(name, stage) {
            Some(path) => read_spirv(&path),
            None => {
                log::warn!("[SHADER] {name}.{}.spv not found in {:?}", stage.extension(), self.binary_dirs);
                Err(RenderError::ShaderNotFound {
                    path: format!("{name}.{}", stage.extension()),
                })
            }
        }
    }

    /// Fail unless the prebuilt binary behaves as if compiled with `defines`
    ///
    /// `build.rs` compiles without defines, so the binary matches when every
    /// requested define equals its `#ifndef` default or is never tested.
    pub fn check_prebuilt(&self, name: &str, stage: ShaderStage, defines: &Defines) -> RenderResult<()> {
        let file = format!("{name}.{}", stage.extension());
        let Some(source) = self.source_path(name, stage) else {
            log::warn!("[SHADER] {file}: no glslc and no source to check {defines} against");
            return Err(RenderError::InitializationFailed(format!(
                "{file} needs {defines} but cannot be compiled"
            )));
        };

        let baked = PrebuiltDefines::scan(&source, &self.source_dir)?;
        match baked.first_mismatch(defines) {
            None => {
                log::debug!("[SHADER] No compiler for {file}, prebuilt binary matches {defines}");
                Ok(())
            }
            Some(define) => {
                log::warn!("[SHADER] {file} needs {define}, which the prebuilt binary lacks, and no glslc was found");
                Err(RenderError::InitializationFailed(format!(
                    "{file} needs {define} but cannot be compiled"
                )))
            }
        }
    }

    fn compile(&self, glslc: &Path, source: &Path, output: &Path, defines: &Defines) -> RenderResult<()> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|e| {
            RenderError::InitializationFailed(format!("Cannot create {}: {e}", self.cache_dir.display()))
        })?;
        log::debug!("[SHADER] Compiling {} with {defines}", source.display());

        let result = Command::new(glslc)
            .args(self.compile_args(source, output, defines))
            .output()
            .map_err(|e| RenderError::InitializationFailed(format!("Cannot run {}: {e}", glslc.display())))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            log::error!("[SHADER] {} failed to compile:\n{stderr}", source.display());
            return Err(RenderError::InitializationFailed(format!(
                "glslc failed for {}",
                source.display()
            )));
        }
        Ok(())
    }
}

/// What a GLSL source compiled without `-D` arguments was built with
///
/// `defaults` holds every `#ifndef NAME` immediately followed by
/// `#define NAME value`; `tested` holds names only checked for presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrebuiltDefines {
    defaults: BTreeMap<String, String>,
    tested: BTreeSet<String>,
}

impl PrebuiltDefines {
    /// Read `source` and every file it includes from `include_dir`
    pub fn scan(source: &Path, include_dir: &Path) -> RenderResult<Self> {
        let mut baked = Self::default();
        let mut visited = BTreeSet::new();
        let mut pending = vec![source.to_path_buf()];

        while let Some(path) = pending.pop() {
            if !visited.insert(path.clone()) {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                log::error!("[SHADER] Failed to read {}: {e}", path.display());
                RenderError::ShaderNotFound {
                    path: path.display().to_string(),
                }
            })?;
            pending.extend(baked.absorb(&text).into_iter().map(|file| include_dir.join(file)));
        }
        Ok(baked)
    }

    /// Preprocessor facts of one file; returns its includes
    pub fn absorb(&mut self, text: &str) -> Vec<String> {
        let mut includes = Vec::new();
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty()).peekable();

        while let Some(line) = lines.next() {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("#include") => {
                    if let Some(file) = words.next() {
                        includes.push(file.trim_matches(|c| c == '"' || c == '<' || c == '>').to_string());
                    }
                }
                Some("#ifdef") => self.tested.extend(words.next().map(str::to_string)),
                Some("#ifndef") => {
                    let Some(name) = words.next() else { continue };
                    let default = lines.peek().and_then(|next| {
                        let mut next = next.split_whitespace();
                        (next.next() == Some("#define") && next.next() == Some(name))
                            .then(|| next.collect::<Vec<_>>().join(" "))
                    });
                    match default {
                        Some(value) => {
                            lines.next();
                            self.defaults.entry(name.to_string()).or_insert(value);
                        }
                        None => {
                            self.tested.insert(name.to_string());
                        }
                    }
                }
                Some("#if" | "#elif") => {
                    let mut tokens = line
                        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                        .filter(|token| !token.is_empty());
                    while let Some(token) = tokens.next() {
                        if token == "defined" {
                            self.tested.extend(tokens.next().map(str::to_string));
                        }
                    }
                }
                _ => {}
            }
        }
        includes
    }

    /// First requested define the binary was not built with, as `NAME=value`
    pub fn first_mismatch(&self, defines: &Defines) -> Option<String> {
        defines.iter().find_map(|(name, value)| {
            let matches = match self.defaults.get(name) {
                Some(default) => same_value(default, value),
                None => !self.tested.contains(name),
            };
            (!matches).then(|| format!("{name}={value}"))
        })
    }
}

fn same_value(a: &str, b: &str) -> bool {
    a == b || matches!((a.parse::<f64>(), b.parse::<f64>()), (Ok(x), Ok(y)) if x == y)
}

fn read_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| {
        log::error!("[SHADER] Failed to read {}: {e}", path.display());
        RenderError::ShaderNotFound {
            path: path.display().to_string(),
        }
    })?;
    spirv_words(&bytes)
}

fn find_glslc() -> Option<PathBuf> {
    let exe = if cfg!(target_os = "windows") { "glslc.exe" } else { "glslc" };
    if let Ok(sdk) = std::env::var("VULKAN_SDK") {
        for bin in ["bin", "Bin"] {
            let candidate = Path::new(&sdk).join(bin).join(exe);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(exe)).find(|p| p.is_file())
}

type CacheKey = (String, ShaderStage, String);

/// Thread-safe memo of loaded shader variants
///
/// Shared by the pipeline workers during scene load, so each distinct
/// `(name, stage, defines)` is compiled once.
pub struct ShaderCache {
    locator: ShaderLocator,
    loaded: Mutex<HashMap<CacheKey, Arc<Vec<u32>>>>,
}

impl ShaderCache {
    /// Cache over `locator`
    pub fn new(locator: ShaderLocator) -> Self {
        Self {
            locator,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// SPIR-V for the variant, loading it on first use
    pub fn get(&self, name: &str, stage: ShaderStage, defines: &Defines) -> RenderResult<Arc<Vec<u32>>> {
        let key = (name.to_string(), stage, defines.cache_key());
        if let Some(words) = self.loaded.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(Arc::clone(words));
        }

        // Loaded outside the lock; two workers may compile the same variant once each
        let words = Arc::new(self.locator.load(name, stage, defines)?);
        self.loaded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&words));
        Ok(words)
    }

    /// Create a module for the variant
    pub fn module(&self, device: &Device, name: &str, stage: ShaderStage, defines: &Defines) -> RenderResult<ShaderModule> {
        let words = self.get(name, stage, defines)?;
        ShaderModule::new(device, stage, &words)
    }

    /// Number of cached variants
    pub fn len(&self) -> usize {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing has been loaded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached variant
    pub fn clear(&self) {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rsm_shader_test_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_spirv_words_validates_magic_and_length() {
        let words = spirv_words(&minimal_spirv()).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);

        let mut truncated = minimal_spirv();
        truncated.pop();
        assert!(spirv_words(&truncated).is_err());

        let mut wrong = minimal_spirv();
        wrong[0] = 0;
        assert!(spirv_words(&wrong).is_err());
    }

    #[test]
    fn test_locator_search_order() {
        let first = scratch_dir("first");
        let second = scratch_dir("second");
        std::fs::write(second.join("rsm.frag.spv"), minimal_spirv()).unwrap();

        let locator = ShaderLocator::with_dirs(vec![first.clone(), second.clone()], first.clone(), first.clone());
        assert_eq!(locator.binary_path("rsm", ShaderStage::Fragment), Some(second.join("rsm.frag.spv")));
        assert!(locator.binary_path("rsm", ShaderStage::Vertex).is_none());

        std::fs::write(first.join("rsm.frag.spv"), minimal_spirv()).unwrap();
        assert_eq!(locator.binary_path("rsm", ShaderStage::Fragment), Some(first.join("rsm.frag.spv")));
    }

    #[test]
    fn test_missing_shader_is_reported() {
        let dir = scratch_dir("missing");
        let locator = ShaderLocator::with_dirs(vec![dir.clone()], dir.clone(), dir);
        let result = locator.load("nothing", ShaderStage::Compute, &Defines::new());
        assert!(matches!(result, Err(RenderError::ShaderNotFound { .. })));
    }

    #[test]
    fn test_prebuilt_binary_serves_matching_defines() {
        let dir = scratch_dir("fallback");
        std::fs::write(dir.join("gbuffer.vert.spv"), minimal_spirv()).unwrap();
        std::fs::write(dir.join("common.glsl"), "#ifndef ID_PER_FRAME\n#define ID_PER_FRAME 0\n#endif\n").unwrap();
        std::fs::write(
            dir.join("gbuffer.vert"),
            "#version 450\n#include \"common.glsl\"\n#ifdef ID_NORMAL\nlayout(location = ID_NORMAL) in vec3 n;\n#endif\n",
        )
        .unwrap();
        let locator = ShaderLocator::with_dirs(vec![dir.clone()], dir.clone(), dir);

        let cache = ShaderCache::new(locator.clone());
        let defines = Defines::new().with("ID_PER_FRAME", "0").with("DEF_alphaMode_OPAQUE", 1);
        let words = cache.get("gbuffer", ShaderStage::Vertex, &defines).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(cache.len(), 1);
        cache.get("gbuffer", ShaderStage::Vertex, &defines).unwrap();
        assert_eq!(cache.len(), 1);

        // A moved binding or an enabled attribute needs a real variant
        let moved = Defines::new().with("ID_PER_FRAME", "3");
        assert!(matches!(
            locator.load("gbuffer", ShaderStage::Vertex, &moved),
            Err(RenderError::InitializationFailed(_))
        ));
        let with_normal = Defines::new().with("ID_PER_FRAME", "0").with("ID_NORMAL", 1);
        assert!(locator.load("gbuffer", ShaderStage::Vertex, &with_normal).is_err());
        assert!(cache.get("gbuffer", ShaderStage::Vertex, &with_normal).is_err());
    }

    #[test]
    fn test_sample_count_other_than_the_default_needs_a_compiler() {
        let dir = scratch_dir("samples");
        std::fs::write(dir.join("indirect_lighting.frag.spv"), minimal_spirv()).unwrap();
        std::fs::write(
            dir.join("indirect_lighting.frag"),
            "#ifndef NUM_RSM_SAMPLES\n#define NUM_RSM_SAMPLES 100\n#endif\n#ifndef NOISE_TILING\n#define NOISE_TILING 4.0\n#endif\n",
        )
        .unwrap();
        let locator = ShaderLocator::with_dirs(vec![dir.clone()], dir.clone(), dir);

        let default = Defines::new().with("NUM_RSM_SAMPLES", 100).with("NOISE_TILING", "4");
        assert!(locator.load("indirect_lighting", ShaderStage::Fragment, &default).is_ok());
        let fewer = Defines::new().with("NUM_RSM_SAMPLES", 20);
        assert!(locator.load("indirect_lighting", ShaderStage::Fragment, &fewer).is_err());
    }

    #[test]
    fn test_defines_without_source_or_compiler_fail() {
        let dir = scratch_dir("nosource");
        std::fs::write(dir.join("rsm.frag.spv"), minimal_spirv()).unwrap();
        let locator = ShaderLocator::with_dirs(vec![dir.clone()], dir.join("missing"), dir);

        assert!(locator.load("rsm", ShaderStage::Fragment, &Defines::new()).is_ok());
        let defines = Defines::new().with("ID_PER_FRAME", 0);
        assert!(matches!(
            locator.load("rsm", ShaderStage::Fragment, &defines),
            Err(RenderError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_prebuilt_defines_parse_guards_and_conditions() {
        let mut baked = PrebuiltDefines::default();
        let includes = baked.absorb(
            "#ifndef PBR_GLSL\n#define PBR_GLSL\n#include \"per_frame.glsl\"\n\
             #ifndef ID_shadowMap\n\n#define ID_shadowMap 5\n#endif\n\
             #if defined(DEF_alphaMode_MASK) || defined ( DEF_doubleSided )\n#endif\n#ifndef FEATURE_X\n#endif\n",
        );
        assert_eq!(includes, vec!["per_frame.glsl".to_string()]);

        assert_eq!(baked.first_mismatch(&Defines::new().with("ID_shadowMap", 5)), None);
        assert_eq!(
            baked.first_mismatch(&Defines::new().with("ID_shadowMap", 6)),
            Some("ID_shadowMap=6".to_string())
        );
        assert!(baked.first_mismatch(&Defines::new().with("DEF_alphaMode_MASK", 1)).is_some());
        assert!(baked.first_mismatch(&Defines::new().with("DEF_doubleSided", 1)).is_some());
        assert!(baked.first_mismatch(&Defines::new().with("FEATURE_X", 1)).is_some());
        assert_eq!(baked.first_mismatch(&Defines::new().with("UNUSED", 1)), None);
    }

    #[test]
    fn test_compile_args_carry_defines_and_include_dir() {
        let dir = PathBuf::from("shaders");
        let locator = ShaderLocator::with_dirs(vec![], dir.clone(), dir.clone());
        let defines = Defines::new().with("ID_PER_FRAME", "0").with("DEF_doubleSided", "");
        let args = locator.compile_args(Path::new("shaders/gbuffer.frag"), Path::new("out.spv"), &defines);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(args[0], "shaders/gbuffer.frag");
        assert_eq!(&args[1..3], ["-I", "shaders"]);
        assert!(args.contains(&"-DID_PER_FRAME=0".to_string()));
        assert!(args.contains(&"-DDEF_doubleSided".to_string()));
        assert_eq!(&args[args.len() - 2..], ["-o", "out.spv"]);
    }

    #[test]
    fn test_variant_paths_differ_by_defines() {
        let dir = PathBuf::from("cache");
        let locator = ShaderLocator::with_dirs(vec![], dir.clone(), dir);
        let a = locator.variant_path("gbuffer", ShaderStage::Fragment, &Defines::new().with("DEF_doubleSided", ""));
        let b = locator.variant_path("gbuffer", ShaderStage::Fragment, &Defines::new());
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("cache"));
    }
}
