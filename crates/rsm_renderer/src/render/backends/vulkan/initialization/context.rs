//! Vulkan instance, device selection and the renderer error type
//!
//! The application shell owns the window and surface; it hands the required
//! instance extensions and a present-support predicate to this module and gets
//! back a [`LogicalDevice`]. The renderer only ever sees the non-owning
//! [`DeviceContext`] bundle.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::config::ConfigError;

/// Renderer error type
#[derive(Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A ring or pool ran out of space
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Vulkan context or pass initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Neither a SPIR-V binary nor a compilable source exists for a shader
    #[error("Shader not found: {path}")]
    ShaderNotFound {
        /// Shader name or path that was searched for
        path: String,
    },

    /// Configuration could not be loaded or is out of range
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// `required_extensions` are the window system's surface extensions. With
    /// `enable_validation` the Khronos validation layer (with synchronization
    /// validation) and a debug messenger forwarding to `log` are enabled.
    pub fn new(app_name: &str, required_extensions: &[String], enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name_cstr = to_cstring(app_name)?;
        let engine_name_cstr = to_cstring("rsm_renderer")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| to_cstring(ext))
            .collect::<RenderResult<Vec<_>>>()?;
        let mut extensions: Vec<*const std::os::raw::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![to_cstring("VK_LAYER_KHRONOS_validation")?]
        } else {
            Vec::new()
        };
        let layer_name_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let enabled_validation_features = [vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION];
        let mut validation_features = vk::ValidationFeaturesEXT::builder()
            .enabled_validation_features(&enabled_validation_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);
        if enable_validation {
            create_info = create_info.push_next(&mut validation_features);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        log::info!("Vulkan instance created (validation: {enable_validation})");

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> RenderResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?)
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn to_cstring(value: &str) -> RenderResult<CString> {
    CString::new(value)
        .map_err(|e| RenderError::InitializationFailed(format!("Invalid name {value:?}: {e}")))
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics + compute queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first device with a graphics+compute queue, a presenting queue and
    /// every extension in `required_extensions`
    pub fn select_suitable_device(
        instance: &Instance,
        required_extensions: &[&CStr],
        present_support: &dyn Fn(vk::PhysicalDevice, u32) -> bool,
    ) -> RenderResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        for device in devices {
            if let Some(info) = Self::evaluate_device(instance, device, required_extensions, present_support)? {
                log::info!("Selected GPU: {}", unsafe {
                    CStr::from_ptr(info.properties.device_name.as_ptr()).to_string_lossy()
                });
                return Ok(info);
            }
        }

        Err(RenderError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        required_extensions: &[&CStr],
        present_support: &dyn Fn(vk::PhysicalDevice, u32) -> bool,
    ) -> RenderResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        // The aggregator dispatches compute on the graphics queue
        let graphics_family = queue_families.iter().position(|family| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        });
        let present_family = (0..queue_families.len()).find(|&index| present_support(device, index as u32));

        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            return Ok(None);
        };

        let available = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let has_required_extensions = required_extensions.iter().all(|required| {
            available.iter().any(|extension| {
                (unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }) == *required
            })
        });
        if !has_required_extensions {
            return Ok(None);
        }

        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            graphics_family: graphics_family as u32,
            present_family: present_family as u32,
        }))
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics + compute queue
    pub graphics_queue: vk::Queue,
    /// Presentation queue
    pub present_queue: vk::Queue,
    /// Capabilities of the device this was created from
    pub physical: PhysicalDeviceInfo,
}

impl LogicalDevice {
    /// Create a new logical device with the graphics and present queues
    pub fn new(
        instance: &Instance,
        physical: PhysicalDeviceInfo,
        extensions: &[&CStr],
    ) -> RenderResult<Self> {
        let mut families = vec![physical.graphics_family];
        if physical.present_family != physical.graphics_family {
            families.push(physical.present_family);
        }

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let device_features = vk::PhysicalDeviceFeatures::builder().build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&device_features);

        let device = unsafe { instance.create_device(physical.device, &create_info, None) }?;
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            physical,
        })
    }

    /// Non-owning handle bundle handed to the renderer
    pub fn context(&self) -> DeviceContext {
        DeviceContext {
            device: self.device.clone(),
            physical_device: self.physical.device,
            memory_properties: self.physical.memory_properties,
            limits: self.physical.properties.limits,
            graphics_queue: self.graphics_queue,
            graphics_family: self.physical.graphics_family,
        }
    }

    /// Wait until the device is idle
    pub fn wait_idle(&self) -> RenderResult<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Non-owning device handles shared by every renderer object
///
/// Valid for as long as the [`LogicalDevice`] it came from; the shell must drop
/// the renderer before the device.
#[derive(Clone)]
pub struct DeviceContext {
    /// Logical device
    pub device: Device,
    /// Physical device the logical device was created from
    pub physical_device: vk::PhysicalDevice,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Device limits
    pub limits: vk::PhysicalDeviceLimits,
    /// Graphics + compute queue
    pub graphics_queue: vk::Queue,
    /// Family of `graphics_queue`
    pub graphics_family: u32,
}

impl DeviceContext {
    /// Find a memory type index allowed by `type_filter` with all of `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> RenderResult<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
    }

    /// Alignment required for dynamic uniform buffer offsets
    pub fn uniform_alignment(&self) -> u64 {
        self.limits.min_uniform_buffer_offset_alignment.max(16)
    }
}

/// Memory type lookup shared by buffers and images
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(RenderError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        properties
    }

    #[test]
    fn test_find_memory_type_respects_filter_and_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let host = find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(host, 1);

        let filtered = find_memory_type(&properties, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(filtered, 2);
    }

    #[test]
    fn test_find_memory_type_reports_missing_type() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(result, Err(RenderError::NoSuitableMemoryType)));
    }
}
