// Device - adapter discovery and the lazily-created logical device
//
// Responsibilities:
// - Adapter enumeration without touching logical-device state
// - Logical device + one compute queue, created on first resource request
// - One reusable command buffer and one fence: every GPU operation runs
//   reset -> record -> submit -> wait-to-completion before the next one

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use super::instance::{self, InstanceState};
use crate::error::{Error, Result, VkResultExt};

/// An adapter as reported by `discover()`. Enumeration is cheap and
/// never creates logical-device state.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    /// Total bytes of device-local memory heaps.
    pub device_memory_bytes: u64,
    /// Total bytes of host-visible (shared) memory heaps.
    pub shared_memory_bytes: u64,
    pub is_hardware: bool,
    pub is_discrete: bool,
}

/// Enumerates adapters. Must not fail merely because a later logical
/// device creation might.
pub fn discover() -> Result<Vec<DeviceDescriptor>> {
    let shared = instance::ensure_instance()?;
    let physical_devices = unsafe { shared.instance.enumerate_physical_devices() }
        .ctx("enumerating physical devices")?;

    let mut descriptors = Vec::with_capacity(physical_devices.len());
    for (index, physical) in physical_devices.into_iter().enumerate() {
        let props = unsafe { shared.instance.get_physical_device_properties(physical) };
        let memory = unsafe {
            shared
                .instance
                .get_physical_device_memory_properties(physical)
        };

        let mut device_memory_bytes = 0;
        let mut shared_memory_bytes = 0;
        for heap in &memory.memory_heaps[..memory.memory_heap_count as usize] {
            if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                device_memory_bytes += heap.size;
            } else {
                shared_memory_bytes += heap.size;
            }
        }

        descriptors.push(DeviceDescriptor {
            index,
            name: unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            device_memory_bytes,
            shared_memory_bytes,
            is_hardware: props.device_type != vk::PhysicalDeviceType::CPU,
            is_discrete: props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
        });
    }
    Ok(descriptors)
}

/// Adapter-selection options for `Device::new`.
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    /// Explicit adapter index from `discover()`; `None` auto-selects.
    pub adapter_index: Option<usize>,
    /// When auto-selecting, score discrete GPUs above integrated ones.
    pub prefer_discrete: bool,
}

/// A logical GPU device. Construction is cheap; the native device,
/// queue, command buffer and fence materialize on first use and a
/// creation failure leaves the `Device` reusable for a retry.
pub struct Device {
    options: DeviceOptions,
    inner: Mutex<Option<Arc<DeviceInner>>>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new(DeviceOptions {
            adapter_index: None,
            prefer_discrete: true,
        })
    }
}

impl Device {
    pub fn new(options: DeviceOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(None),
        }
    }

    /// Idempotently creates the logical device. Safe to call repeatedly.
    pub fn ensure_ready(&self) -> Result<()> {
        self.inner().map(|_| ())
    }

    /// Drains and clears the backend validation/debug message queue.
    pub fn drain_debug_messages(&self) -> Vec<String> {
        instance::drain_debug_messages()
    }

    pub(crate) fn inner(&self) -> Result<Arc<DeviceInner>> {
        let mut slot = self.inner.lock();
        if let Some(inner) = slot.as_ref() {
            return Ok(inner.clone());
        }
        let inner = Arc::new(DeviceInner::create(&self.options)?);
        *slot = Some(inner.clone());
        Ok(inner)
    }
}

pub(crate) struct SubmitState {
    pub pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
}

pub(crate) struct DeviceInner {
    pub shared: Arc<InstanceState>,
    pub raw: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Whether format-less storage-image reads are native; when absent,
    /// BGRA read-write textures need the SPIR-V patch.
    pub storage_read_without_format: bool,
    pub swapchain_supported: bool,
    allocator: Mutex<Option<Allocator>>,
    submit: Mutex<SubmitState>,
}

impl DeviceInner {
    fn create(options: &DeviceOptions) -> Result<Self> {
        let shared = instance::ensure_instance()?;

        let (physical, queue_family) = pick_physical_device(&shared, options)?;
        let properties = unsafe { shared.instance.get_physical_device_properties(physical) };
        let memory_properties = unsafe {
            shared
                .instance
                .get_physical_device_memory_properties(physical)
        };
        let supported = unsafe { shared.instance.get_physical_device_features(physical) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Enable the storage-image features we can get; the SPIR-V
        // patch covers the read-without-format gap when we cannot.
        let features = vk::PhysicalDeviceFeatures {
            shader_storage_image_read_without_format: supported
                .shader_storage_image_read_without_format,
            shader_storage_image_write_without_format: supported
                .shader_storage_image_write_without_format,
            ..Default::default()
        };

        let device_extensions = unsafe {
            shared
                .instance
                .enumerate_device_extension_properties(physical)
        }
        .map_err(|source| Error::DeviceCreation {
            context: "enumerating device extensions",
            source,
        })?;
        let swapchain_supported = shared.surface_enabled
            && device_extensions.iter().any(|p| {
                let name = unsafe { CStr::from_ptr(p.extension_name.as_ptr()) };
                name == ash::extensions::khr::Swapchain::name()
            });

        let mut extensions: Vec<*const i8> = Vec::new();
        if swapchain_supported {
            extensions.push(ash::extensions::khr::Swapchain::name().as_ptr());
        }

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let raw = unsafe {
            shared
                .instance
                .create_device(physical, &create_info, None)
        }
        .map_err(|source| Error::DeviceCreation {
            context: "creating logical device",
            source,
        })?;

        let queue = unsafe { raw.get_device_queue(queue_family, 0) };

        // Everything below must unwind whatever already exists on the
        // logical device before destroying it.
        let submit = match Self::create_submit_state(&raw, queue_family) {
            Ok(submit) => submit,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e);
            }
        };
        let allocator = match Self::create_allocator(&shared, physical, &raw) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    raw.destroy_fence(submit.fence, None);
                    raw.destroy_command_pool(submit.pool, None);
                    raw.destroy_device(None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            shared,
            raw,
            physical,
            queue,
            queue_family,
            memory_properties,
            storage_read_without_format: supported.shader_storage_image_read_without_format
                == vk::TRUE,
            swapchain_supported,
            allocator: Mutex::new(Some(allocator)),
            submit: Mutex::new(submit),
        })
    }

    fn create_submit_state(raw: &ash::Device, queue_family: u32) -> Result<SubmitState> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = unsafe { raw.create_command_pool(&pool_info, None) }
            .ctx("creating command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { raw.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(source) => {
                unsafe { raw.destroy_command_pool(pool, None) };
                return Err(Error::Native {
                    context: "allocating command buffer",
                    source,
                });
            }
        };

        let fence = match unsafe { raw.create_fence(&vk::FenceCreateInfo::builder(), None) } {
            Ok(fence) => fence,
            Err(source) => {
                unsafe { raw.destroy_command_pool(pool, None) };
                return Err(Error::Native {
                    context: "creating fence",
                    source,
                });
            }
        };

        Ok(SubmitState {
            pool,
            command_buffer,
            fence,
        })
    }

    fn create_allocator(
        shared: &InstanceState,
        physical: vk::PhysicalDevice,
        raw: &ash::Device,
    ) -> Result<Allocator> {
        Ok(Allocator::new(&AllocatorCreateDesc {
            instance: shared.instance.clone(),
            device: raw.clone(),
            physical_device: physical,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?)
    }

    /// Records into the single command buffer, submits and blocks until
    /// the fence signals. The internal lock serializes callers: there is
    /// no overlap between successive submissions.
    pub(crate) fn submit_and_wait(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        self.submit_and_wait_ext(&[], &[], record)
    }

    pub(crate) fn submit_and_wait_ext(
        &self,
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signals: &[vk::Semaphore],
        record: impl FnOnce(vk::CommandBuffer) -> Result<()>,
    ) -> Result<()> {
        let submit = self.submit.lock();
        let cmd = submit.command_buffer;

        unsafe {
            self.raw
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .ctx("resetting command buffer")?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.raw
                .begin_command_buffer(cmd, &begin_info)
                .ctx("beginning command buffer")?;
        }

        record(cmd)?;

        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|w| w.0).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = waits.iter().map(|w| w.1).collect();

        unsafe {
            self.raw.end_command_buffer(cmd).ctx("ending command buffer")?;

            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(std::slice::from_ref(&cmd))
                .signal_semaphores(signals)
                .build();
            self.raw
                .queue_submit(self.queue, &[submit_info], submit.fence)
                .ctx("submitting to queue")?;
            self.raw
                .wait_for_fences(std::slice::from_ref(&submit.fence), true, u64::MAX)
                .ctx("waiting for fence")?;
            self.raw
                .reset_fences(std::slice::from_ref(&submit.fence))
                .ctx("resetting fence")?;
        }
        Ok(())
    }

    /// Runs `f` with exclusive access to the queue. Queue submission and
    /// presentation share one lock so they never interleave.
    pub(crate) fn with_queue<R>(&self, f: impl FnOnce(vk::Queue) -> R) -> R {
        let _guard = self.submit.lock();
        f(self.queue)
    }

    pub(crate) fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        let mut guard = self.allocator.lock();
        // The slot only empties inside Drop, which nothing else can race.
        let allocator = guard
            .as_mut()
            .ok_or_else(|| Error::validation("device is shutting down"))?;
        Ok(allocator.allocate(desc)?)
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        let mut guard = self.allocator.lock();
        if let Some(allocator) = guard.as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free GPU allocation: {}", e);
            }
        }
    }

    pub(crate) fn wait_idle(&self) {
        if let Err(e) = unsafe { self.raw.device_wait_idle() } {
            log::error!("device_wait_idle failed: {}", e);
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device");
        self.wait_idle();

        // The allocator must go before the device it allocates from.
        drop(self.allocator.lock().take());

        let submit = self.submit.lock();
        unsafe {
            self.raw.destroy_fence(submit.fence, None);
            self.raw.destroy_command_pool(submit.pool, None);
            self.raw.destroy_device(None);
        }
    }
}

fn pick_physical_device(
    shared: &InstanceState,
    options: &DeviceOptions,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { shared.instance.enumerate_physical_devices() }
        .map_err(|source| Error::DeviceCreation {
            context: "enumerating physical devices",
            source,
        })?;

    if devices.is_empty() {
        return Err(Error::NoSuitableDevice);
    }

    if let Some(index) = options.adapter_index {
        let physical = *devices
            .get(index)
            .ok_or_else(|| Error::validation(format!("adapter index {} out of range", index)))?;
        let family = compute_queue_family(shared, physical).ok_or(Error::NoSuitableDevice)?;
        return Ok((physical, family));
    }

    let mut best: Option<(vk::PhysicalDevice, u32)> = None;
    let mut best_score = 0;
    for physical in devices {
        let Some(family) = compute_queue_family(shared, physical) else {
            continue;
        };
        let props = unsafe { shared.instance.get_physical_device_properties(physical) };
        let score = match props.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU if options.prefer_discrete => 1000,
            vk::PhysicalDeviceType::DISCRETE_GPU => 100,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::CPU => 10,
            _ => 1,
        };
        if score > best_score {
            best_score = score;
            best = Some((physical, family));
        }
    }

    best.ok_or(Error::NoSuitableDevice)
}

/// Picks a compute-capable queue family, preferring one that also does
/// graphics (required for presenting through the same single queue).
fn compute_queue_family(shared: &InstanceState, physical: vk::PhysicalDevice) -> Option<u32> {
    let families = unsafe {
        shared
            .instance
            .get_physical_device_queue_family_properties(physical)
    };

    let mut compute_only = None;
    for (i, family) in families.iter().enumerate() {
        if !family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            continue;
        }
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return Some(i as u32);
        }
        compute_only.get_or_insert(i as u32);
    }
    compute_only
}
