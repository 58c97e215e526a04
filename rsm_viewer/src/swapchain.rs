//! Swap chain and the per-frame presentation sync
//!
//! [`Swapchain`] is the [`Presenter`] handed to the renderer. It owns the
//! surface as well, so dropping it releases every window-system object.

use ash::extensions::khr;
use ash::{vk, Device, Entry, Instance};

use rsm_renderer::render::backends::vulkan::state::{Fence, Semaphore};
use rsm_renderer::render::backends::vulkan::LogicalDevice;
use rsm_renderer::render::{Presenter, RenderError, RenderResult};

/// Preferred sRGB format, or the first one the surface offers
pub fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX when offered, FIFO otherwise
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent, or the window size clamped to the surface limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, within the surface maximum
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    fn new(device: &Device) -> RenderResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Swap chain wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    physical_device: vk::PhysicalDevice,
    present_queue: vk::Queue,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    frames: Vec<FrameSync>,
    current: usize,
    out_of_date: bool,
}

impl Swapchain {
    /// Take ownership of `surface` and build a swap chain of `extent`
    pub fn new(
        entry: &Entry,
        instance: &Instance,
        device: &LogicalDevice,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        frames_in_flight: u32,
    ) -> RenderResult<Self> {
        let surface_loader = khr::Surface::new(entry, instance);
        let loader = khr::Swapchain::new(instance, &device.device);
        let frames = (0..frames_in_flight.max(1))
            .map(|_| FrameSync::new(&device.device))
            .collect::<RenderResult<Vec<_>>>()?;

        let mut swapchain = Self {
            device: device.device.clone(),
            physical_device: device.physical.device,
            present_queue: device.present_queue,
            surface_loader,
            surface,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent,
            frames,
            current: 0,
            out_of_date: false,
        };
        swapchain.build(extent)?;
        Ok(swapchain)
    }

    /// Recreate the swap chain for a window of `extent`
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        self.build(extent)?;
        self.out_of_date = false;
        Ok(())
    }

    fn build(&mut self, window_extent: vk::Extent2D) -> RenderResult<()> {
        let (caps, formats, modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)?,
            )
        };
        let format = choose_format(&formats)
            .ok_or_else(|| RenderError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, window_extent);

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }?;

        self.destroy_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.extent = extent;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain) }?;

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.create_image_view(&create_info, None) }?;
            self.views.push(view);
        }

        log::info!(
            "Swapchain {}x{}, {} images, {:?} {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            format.format,
            present_mode
        );
        Ok(())
    }

    fn destroy_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    fn frame(&self) -> RenderResult<&FrameSync> {
        self.frames.get(self.current).ok_or_else(|| RenderError::InvalidOperation {
            reason: format!("presentation frame {} out of range", self.current),
        })
    }

    /// Surface format of the images
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Size of the images
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// One view per swap chain image
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Whether the surface changed and [`Swapchain::rebuild`] is due
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }
}

impl Presenter for Swapchain {
    fn wait_for_swapchain(&mut self) -> RenderResult<u32> {
        let frame = self.frame()?;
        frame.in_flight.wait(u64::MAX)?;

        let acquired = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                frame.image_available.handle(),
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => {
                // Reset only once work is certain to be submitted against the fence
                frame.in_flight.reset()?;
                self.out_of_date |= suboptimal;
                Ok(index)
            }
            Err(err) => {
                if err == vk::Result::ERROR_OUT_OF_DATE_KHR {
                    self.out_of_date = true;
                }
                Err(err.into())
            }
        }
    }

    fn image_available(&self) -> vk::Semaphore {
        self.frame().map_or(vk::Semaphore::null(), |frame| frame.image_available.handle())
    }

    fn render_finished(&self) -> vk::Semaphore {
        self.frame().map_or(vk::Semaphore::null(), |frame| frame.render_finished.handle())
    }

    fn in_flight_fence(&self) -> vk::Fence {
        self.frame().map_or(vk::Fence::null(), |frame| frame.in_flight.handle())
    }

    fn present(&mut self, image_index: u32) -> RenderResult<()> {
        let wait_semaphores = [self.render_finished()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(self.present_queue, &present_info) };
        self.current = (self.current + 1) % self.frames.len();
        match result {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        self.destroy_views();
        // Sync objects go before the device; they are dropped with the struct
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D, min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_srgb_format() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_format(&[unorm]), Some(unorm));
        assert_eq!(choose_format(&[]), None);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_follows_surface_or_clamps_window() {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        let window = vk::Extent2D { width: 8000, height: 8 };
        assert_eq!(choose_extent(&caps(fixed, 2, 0), window), fixed);

        let undefined = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        assert_eq!(
            choose_extent(&caps(undefined, 2, 0), window),
            vk::Extent2D { width: 4096, height: 16 }
        );
    }

    #[test]
    fn test_image_count_respects_maximum() {
        let extent = vk::Extent2D { width: 1, height: 1 };
        assert_eq!(choose_image_count(&caps(extent, 2, 0)), 3);
        assert_eq!(choose_image_count(&caps(extent, 2, 2)), 2);
    }
}
