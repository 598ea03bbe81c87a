//! Presentable-image chain: swapchain, views, framebuffers.
//!
//! Rebuilt wholesale on resize/invalidation. The new chain is always built
//! before the previous one is destroyed (the old handle is passed along so
//! the driver can reuse it), and views/framebuffers have their own destroy
//! operations so the recreation path frees each object exactly once.

use ash::khr::{surface, swapchain};
use ash::{Device, Instance, vk};
use log::info;
use winit::dpi::PhysicalSize;

use super::error::{Error, Result};

pub struct SwapchainBundle {
    pub loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
}

impl SwapchainBundle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: &Instance,
        device: &Device,
        pdevice: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &surface::Instance,
        queue_families: (u32, u32),
        window_size: PhysicalSize<u32>,
        old: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(pdevice, surface)
        }
        .map_err(Error::setup("query surface capabilities"))?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(pdevice, surface) }
                .map_err(Error::setup("query surface formats"))?;

        let format = choose_format(&formats)?;
        let extent = choose_extent(&capabilities, window_size);
        let image_count = choose_image_count(&capabilities);

        let (graphics_family, present_family) = queue_families;
        let family_indices = [graphics_family, present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old.unwrap_or(vk::SwapchainKHR::null()));
        create_info = if graphics_family != present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = swapchain::Device::new(instance, device);
        // Driver rejection (e.g. a lost surface) is fatal here; the caller
        // never retries swapchain creation.
        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(Error::setup("create swapchain"))?;
        let images = unsafe { loader.get_swapchain_images(handle) }
            .map_err(Error::setup("get swapchain images"))?;

        let views = images
            .iter()
            .map(|&image| create_image_view(device, image, format.format))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "swapchain: {} images, {:?}, {}x{}",
            images.len(),
            format.format,
            extent.width,
            extent.height
        );

        Ok(Self {
            loader,
            handle,
            images,
            views,
            framebuffers: Vec::new(),
            extent,
            format,
        })
    }

    /// One framebuffer per image view, all against the fixed render pass.
    pub fn create_framebuffers(
        &mut self,
        device: &Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        self.framebuffers = self
            .views
            .iter()
            .map(|view| {
                let attachments = [*view];
                let create_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(self.extent.width)
                    .height(self.extent.height)
                    .layers(1);
                unsafe { device.create_framebuffer(&create_info, None) }
                    .map_err(Error::setup("create framebuffer"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    pub fn destroy_framebuffers(&mut self, device: &Device) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    /// Views-only teardown, used when the chain itself is being kept alive
    /// as the `old_swapchain` of its replacement.
    pub fn destroy_views(&mut self, device: &Device) {
        for view in self.views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    /// Destroys the bare swapchain handle. Called on a retired chain once its
    /// replacement has been created successfully.
    pub fn destroy_handle(&mut self) {
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
        self.handle = vk::SwapchainKHR::null();
    }

    pub fn destroy(&mut self, device: &Device) {
        self.destroy_framebuffers(device);
        self.destroy_views(device);
        self.destroy_handle();
    }
}

fn create_image_view(device: &Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.create_image_view(&view_info, None) }
        .map_err(Error::setup("create image view"))
}

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| Error::setup_message("choose surface format", "surface reports no formats"))
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: PhysicalSize<u32>,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let max = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    (capabilities.min_image_count + 1).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.min_image_count = min;
        caps.max_image_count = max;
        caps
    }

    #[test]
    fn image_count_stays_within_device_bounds() {
        assert_eq!(choose_image_count(&capabilities(2, 4)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        // max_image_count == 0 means unbounded.
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn extent_prefers_the_surface_report_then_clamps() {
        let mut caps = vk::SurfaceCapabilitiesKHR::default();
        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(
            choose_extent(&caps, PhysicalSize::new(1024, 1024)),
            vk::Extent2D { width: 800, height: 600 }
        );

        // u32::MAX sentinel: the window decides, clamped to device limits.
        caps.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        caps.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        caps.max_image_extent = vk::Extent2D { width: 2048, height: 2048 };
        assert_eq!(
            choose_extent(&caps, PhysicalSize::new(4096, 32)),
            vk::Extent2D { width: 2048, height: 64 }
        );
    }

    #[test]
    fn format_prefers_bgra_srgb_else_first_reported() {
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_format(&[other, preferred]).unwrap(), preferred);
        assert_eq!(choose_format(&[other]).unwrap(), other);
    }

    // Non-conformant drivers can report zero formats; that must surface as a
    // setup failure, not a panic.
    #[test]
    fn empty_format_list_is_a_setup_error() {
        let err = choose_format(&[]).unwrap_err();
        assert!(err.is_setup());
    }
}
