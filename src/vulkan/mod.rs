//! Vulkan renderer: context bootstrap, per-frame resources, and the frame
//! scheduler that ties them together.

use ash::khr::surface;
use ash::{Device, Entry, Instance, vk};
use log::{debug, error, info, warn};
use std::ffi;
use winit::dpi::PhysicalSize;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

pub mod error;
pub mod frames;
pub mod pipeline;
pub mod scheduler;
pub mod swapchain;

pub use error::{Error, Result};
pub use scheduler::draw_frame;

use crate::config::MAX_FRAMES_IN_FLIGHT;
use frames::{FlightTracker, FramePool};
use pipeline::PipelineBundle;
use swapchain::SwapchainBundle;

pub struct Renderer {
    _entry: Entry,
    instance: Instance,
    debug_loader: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    pdevice: vk::PhysicalDevice,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    swapchain: SwapchainBundle,
    pipeline: PipelineBundle,
    frames: FramePool,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    tracker: FlightTracker,
    window_size: PhysicalSize<u32>,
}

impl Renderer {
    pub fn new(window: &Window) -> Result<Self> {
        info!("initializing Vulkan renderer...");
        let entry = Entry::linked();
        let instance = create_instance(&entry, window)?;
        let (debug_loader, debug_messenger) = setup_debug_messenger(&entry, &instance)?;

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window
                    .display_handle()
                    .map_err(Error::setup("get display handle"))?
                    .as_raw(),
                window
                    .window_handle()
                    .map_err(Error::setup("get window handle"))?
                    .as_raw(),
                None,
            )
        }
        .map_err(Error::setup("create surface"))?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let (pdevice, graphics_family, present_family) =
            select_physical_device(&instance, &surface_loader, surface)?;
        let (device, graphics_queue, present_queue) =
            create_logical_device(&instance, pdevice, graphics_family, present_family)?;

        let window_size = window.inner_size();
        let mut swapchain = SwapchainBundle::new(
            &instance,
            &device,
            pdevice,
            surface,
            &surface_loader,
            (graphics_family, present_family),
            window_size,
            None,
        )?;
        let pipeline = PipelineBundle::new(&device, swapchain.format.format)?;
        swapchain.create_framebuffers(&device, pipeline.render_pass)?;

        let mem_props = unsafe { instance.get_physical_device_memory_properties(pdevice) };
        let frames = FramePool::new(&device, &mem_props, pipeline.set_layout, MAX_FRAMES_IN_FLIGHT)?;

        let command_pool = create_command_pool(&device, graphics_family)?;
        let command_buffers = allocate_command_buffers(&device, command_pool)?;
        let tracker = FlightTracker::new(MAX_FRAMES_IN_FLIGHT, swapchain.images.len());

        info!("Vulkan renderer initialized.");
        Ok(Self {
            _entry: entry,
            instance,
            debug_loader,
            debug_messenger,
            surface_loader,
            surface,
            pdevice,
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            swapchain,
            pipeline,
            frames,
            command_pool,
            command_buffers,
            tracker,
            window_size,
        })
    }

    /// Remembers the window size for the next swapchain recreation. Resizes
    /// themselves are picked up through OUT_OF_DATE/SUBOPTIMAL signals.
    pub fn note_resize(&mut self, size: PhysicalSize<u32>) {
        self.window_size = size;
    }

    pub fn surface_extent(&self) -> (u32, u32) {
        (self.swapchain.extent.width, self.swapchain.extent.height)
    }

    /// Drains the device and releases everything in reverse acquisition
    /// order. Must be the last call on this renderer.
    pub fn destroy(&mut self) {
        info!("tearing down Vulkan renderer...");
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle during teardown: {}", e);
            }
            self.device.destroy_command_pool(self.command_pool, None);
        }
        self.frames.destroy(&self.device);
        self.pipeline.destroy(&self.device);
        self.swapchain.destroy(&self.device);
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let (Some(loader), Some(messenger)) = (&self.debug_loader, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan renderer torn down.");
    }
}

fn create_instance(entry: &Entry, window: &Window) -> Result<Instance> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"mandelzoom")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"No Engine")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let display_handle = window
        .display_handle()
        .map_err(Error::setup("get display handle"))?;
    let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
        .map_err(Error::setup("enumerate instance extensions"))?
        .to_vec();
    if cfg!(debug_assertions) {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const ffi::c_char> = if cfg!(debug_assertions) {
        vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    unsafe { entry.create_instance(&create_info, None) }.map_err(Error::setup("create instance"))
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe { ffi::CStr::from_ptr((*p_callback_data).p_message) };
    let log_message = format!(
        "[vulkan {:?} {:?}] {}",
        message_severity,
        message_type,
        message.to_string_lossy()
    );

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("{}", log_message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("{}", log_message),
        _ => debug!("{}", log_message),
    }
    vk::FALSE
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(
    Option<ash::ext::debug_utils::Instance>,
    Option<vk::DebugUtilsMessengerEXT>,
)> {
    if !cfg!(debug_assertions) {
        return Ok((None, None));
    }
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
        .map_err(Error::setup("create debug messenger"))?;
    Ok((Some(loader), Some(messenger)))
}

/// Picks the first physical device with a graphics family, a family that can
/// present to the surface, and the shader features the fractal math needs
/// (64-bit floats, buffer device address).
fn select_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32, u32)> {
    let pdevices = unsafe { instance.enumerate_physical_devices() }
        .map_err(Error::setup("enumerate physical devices"))?;

    for pdevice in pdevices {
        let Some((graphics, present)) =
            find_queue_families(instance, pdevice, surface_loader, surface)
        else {
            continue;
        };
        if !supports_required_features(instance, pdevice) {
            continue;
        }
        let props = unsafe { instance.get_physical_device_properties(pdevice) };
        let name = props
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy();
        info!(
            "selected GPU: {} (graphics family {}, present family {})",
            name, graphics, present
        );
        return Ok((pdevice, graphics, present));
    }

    Err(Error::setup_message(
        "select physical device",
        "no GPU with graphics+present queues, shaderFloat64 and bufferDeviceAddress",
    ))
}

fn find_queue_families(
    instance: &Instance,
    pdevice: vk::PhysicalDevice,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<(u32, u32)> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };

    let supports_present = |i: u32| unsafe {
        surface_loader
            .get_physical_device_surface_support(pdevice, i, surface)
            .unwrap_or(false)
    };

    let mut graphics = None;
    let mut present = None;
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let has_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        // A family doing both keeps the swapchain EXCLUSIVE.
        if has_graphics && supports_present(i) {
            return Some((i, i));
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if present.is_none() && supports_present(i) {
            present = Some(i);
        }
    }
    graphics.zip(present)
}

fn supports_required_features(instance: &Instance, pdevice: vk::PhysicalDevice) -> bool {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
    unsafe { instance.get_physical_device_features2(pdevice, &mut features2) };
    let shader_float64 = features2.features.shader_float64 == vk::TRUE;
    shader_float64 && features12.buffer_device_address == vk::TRUE
}

fn create_logical_device(
    instance: &Instance,
    pdevice: vk::PhysicalDevice,
    graphics_family: u32,
    present_family: u32,
) -> Result<(Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let mut queue_infos = vec![
        vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_family)
            .queue_priorities(&queue_priorities),
    ];
    if present_family != graphics_family {
        queue_infos.push(
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(present_family)
                .queue_priorities(&queue_priorities),
        );
    }

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default().shader_float64(true);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut features12);

    let device = unsafe { instance.create_device(pdevice, &create_info, None) }
        .map_err(Error::setup("create logical device"))?;
    let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
    let present_queue = unsafe { device.get_device_queue(present_family, 0) };
    Ok((device, graphics_queue, present_queue))
}

fn create_command_pool(device: &Device, queue_family: u32) -> Result<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    unsafe { device.create_command_pool(&create_info, None) }
        .map_err(Error::setup("create command pool"))
}

/// One primary command buffer per frame slot.
fn allocate_command_buffers(
    device: &Device,
    pool: vk::CommandPool,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
    unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(Error::setup("allocate command buffers"))
}
