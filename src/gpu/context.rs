use anyhow::{anyhow, bail, Result};
use std::collections::HashSet;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia_vma as vma;

use crate::platform::SurfaceProvider;

const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

const SWAPCHAIN_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

const REQUIRED_API_VERSION: u32 = vk::make_version(1, 3, 0);

#[derive(Clone, Debug, Default)]
pub struct ContextOptions {
    pub validation: bool,
    pub gpu: Option<usize>,
    pub list_gpus: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);

        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        // Headless contexts never present; reuse the graphics family
        let present = if surface.is_null() {
            graphics
        } else {
            let mut present = None;
            for (index, _) in properties.iter().enumerate() {
                if instance.get_physical_device_surface_support_khr(
                    physical_device,
                    index as u32,
                    surface,
                )? {
                    present = Some(index as u32);
                    break;
                }
            }
            present
        };

        if let (Some(graphics), Some(present)) = (graphics, present) {
            Ok(Self { graphics, present })
        } else {
            Err(anyhow!("Missing required queue families."))
        }
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

// Other GPU objects hold clones of `device` and `allocator` and must be
// dropped before the context.
pub struct GpuContext {
    _entry: Entry,
    pub instance: Instance,
    pub device: Rc<Device>,
    allocator: ManuallyDrop<Rc<vma::Allocator>>,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

impl GpuContext {
    pub unsafe fn new(
        provider: Option<&dyn SurfaceProvider>,
        options: &ContextOptions,
    ) -> Result<Self> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let instance = create_instance(&entry, provider, options)?;
        let surface = match provider {
            Some(provider) => provider.create_surface(&instance)?,
            None => vk::SurfaceKHR::null(),
        };

        if options.list_gpus {
            let devices = list_devices(&instance)?;
            if devices.is_empty() {
                log::warn!("No Vulkan devices found!");
            }
            for device in devices {
                log::info!("{}", device);
            }
        }

        let physical_device = pick_physical_device(&instance, surface, options.gpu)?;
        let queue_families = QueueFamilyIndices::get(&instance, surface, physical_device)?;
        let device = create_logical_device(&instance, surface, physical_device, queue_families)?;

        let allocator =
            vma::Allocator::new(&vma::AllocatorOptions::new(&instance, &device, physical_device))
                .map_err(|e| anyhow!("Failed to create the memory allocator: {}", e))?;

        let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
        let present_queue = device.get_device_queue(queue_families.present, 0);

        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_families.graphics);
        let command_pool = device.create_command_pool(&info, None)?;

        Ok(Self {
            _entry: entry,
            properties: instance.get_physical_device_properties(physical_device),
            memory_properties: instance.get_physical_device_memory_properties(physical_device),
            instance,
            device: Rc::new(device),
            allocator: ManuallyDrop::new(Rc::new(allocator)),
            surface,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            command_pool,
        })
    }

    pub fn device_name(&self) -> String {
        self.properties.device_name.to_string()
    }

    pub fn allocator(&self) -> &Rc<vma::Allocator> {
        &self.allocator
    }

    pub fn memory_flags(&self, memory_type: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties.memory_types[memory_type as usize].property_flags
    }

    pub unsafe fn swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::get(&self.instance, self.surface, self.physical_device)
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.device.device_wait_idle()?;
        Ok(())
    }

    // Blocks until the graphics queue is idle; init-time uploads only
    pub unsafe fn submit_one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = self.device.allocate_command_buffers(&alloc_info)?[0];

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        self.device.begin_command_buffer(command_buffer, &info)?;
        record(&self.device, command_buffer);
        self.device.end_command_buffer(command_buffer)?;

        let command_buffers = &[command_buffer];
        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

        self.device
            .queue_submit(self.graphics_queue, &[info], vk::Fence::null())?;
        self.device.queue_wait_idle(self.graphics_queue)?;

        self.device
            .free_command_buffers(self.command_pool, &[command_buffer]);

        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Device wait before teardown failed: {}", e);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            if !self.surface.is_null() {
                self.instance.destroy_surface_khr(self.surface, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(
    entry: &Entry,
    provider: Option<&dyn SurfaceProvider>,
    options: &ContextOptions,
) -> Result<Instance> {
    // Check loader version support
    let loader_version = entry
        .enumerate_instance_version()
        .unwrap_or(vk::make_version(1, 0, 0));
    log::info!(
        "Vulkan loader version: {}.{}.{}",
        vk::version_major(loader_version),
        vk::version_minor(loader_version),
        vk::version_patch(loader_version)
    );

    if loader_version < REQUIRED_API_VERSION {
        bail!("Vulkan 1.3 loader required.");
    }

    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"BunnyMark VK\0")
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"No Engine\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(REQUIRED_API_VERSION);

    let extensions = provider
        .map(|p| p.required_instance_extensions())
        .unwrap_or(&[])
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    let mut layers = Vec::new();
    if options.validation {
        if validation_layer_available(entry)? {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            log::warn!("Validation layer requested but not installed; continuing without it.");
        }
    }

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    let instance = entry.create_instance(&info, None)?;

    Ok(instance)
}

unsafe fn validation_layer_available(entry: &Entry) -> Result<bool> {
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    Ok(available_layers.contains(&VALIDATION_LAYER))
}

// One line per physical device, in enumeration order (the `--gpu` index)
pub unsafe fn list_devices(instance: &Instance) -> Result<Vec<String>> {
    let devices = instance.enumerate_physical_devices()?;
    Ok(devices
        .into_iter()
        .enumerate()
        .map(|(index, physical_device)| {
            let properties = instance.get_physical_device_properties(physical_device);
            format!(
                "Device [{}] : {} ({:?}, Vulkan {}.{}.{})",
                index,
                properties.device_name,
                properties.device_type,
                vk::version_major(properties.api_version),
                vk::version_minor(properties.api_version),
                vk::version_patch(properties.api_version)
            )
        })
        .collect())
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    requested: Option<usize>,
) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    if let Some(index) = requested {
        match devices.get(index) {
            Some(&physical_device) => {
                let properties = instance.get_physical_device_properties(physical_device);
                check_physical_device(instance, surface, physical_device).map_err(|e| {
                    anyhow!(
                        "Selected device [{}] `{}` is unsuitable: {}",
                        index,
                        properties.device_name,
                        e
                    )
                })?;
                log::info!("Selected physical device [{}] (`{}`).", index, properties.device_name);
                return Ok(physical_device);
            }
            None => log::warn!(
                "Selected device index {} is out of range ({} devices), picking automatically",
                index,
                devices.len()
            ),
        }
    }

    for physical_device in devices {
        let properties = instance.get_physical_device_properties(physical_device);

        if let Err(error) = check_physical_device(instance, surface, physical_device) {
            log::warn!(
                "Skipping physical device (`{}`): {}",
                properties.device_name,
                error
            );
        } else {
            log::info!("Selected physical device (`{}`).", properties.device_name);
            return Ok(physical_device);
        }
    }

    Err(anyhow!("Failed to find suitable physical device."))
}

unsafe fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let properties = instance.get_physical_device_properties(physical_device);
    if properties.api_version < REQUIRED_API_VERSION {
        return Err(anyhow!("Vulkan 1.3 not supported."));
    }

    QueueFamilyIndices::get(instance, surface, physical_device)?;

    if !surface.is_null() {
        check_physical_device_extensions(instance, physical_device)?;

        let support = SwapchainSupport::get(instance, surface, physical_device)?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return Err(anyhow!("Insufficient swapchain support."));
        }
    }

    Ok(())
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();
    if SWAPCHAIN_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!("Missing required device extensions."))
    }
}

unsafe fn create_logical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
) -> Result<Device> {
    let mut unique_indices = HashSet::new();
    unique_indices.insert(indices.graphics);
    unique_indices.insert(indices.present);

    let queue_priorities = &[1.0];
    let queue_infos = unique_indices
        .iter()
        .map(|i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*i)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    let extensions = if surface.is_null() {
        Vec::new()
    } else {
        SWAPCHAIN_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect::<Vec<_>>()
    };

    let mut sync2_features =
        vk::PhysicalDeviceSynchronization2Features::builder().synchronization2(true);

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut sync2_features);

    let device = instance.create_device(physical_device, &info, None)?;

    Ok(device)
}
