// Process-wide Vulkan instance state
//
// One native instance per process, created on first use and shared by
// every Device and Swapchain. Validation/debug messages accumulate in a
// process-wide buffer that is drained only on explicit request.

use ash::{vk, Entry};
use parking_lot::{const_mutex, Mutex};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VkResultExt};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static DEBUG_MESSAGES: Mutex<Vec<String>> = const_mutex(Vec::new());
static INSTANCE: Mutex<Option<Arc<InstanceState>>> = const_mutex(None);

pub struct InstanceState {
    pub entry: Entry,
    pub instance: ash::Instance,
    /// Whether VK_KHR_surface (and a platform surface extension) got
    /// enabled; swapchain creation requires it.
    pub surface_enabled: bool,
    // Keeps the messenger (and its loader) alive for the process
    // lifetime; the instance is never destroyed.
    #[allow(dead_code)]
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

/// Enable or disable the validation layer and debug message capture.
/// Only effective before the first instance use; later calls only gate
/// whether new messages are recorded.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
}

pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}

/// Drains and clears the accumulated validation/debug messages.
/// Best-effort: empty when no debug layer is active.
pub fn drain_debug_messages() -> Vec<String> {
    std::mem::take(&mut *DEBUG_MESSAGES.lock())
}

/// Returns the shared instance, creating it on first call. A creation
/// failure is not cached: the next call retries from scratch.
pub fn ensure_instance() -> Result<Arc<InstanceState>> {
    let mut slot = INSTANCE.lock();
    if let Some(state) = slot.as_ref() {
        return Ok(state.clone());
    }
    let state = Arc::new(create_instance()?);
    *slot = Some(state.clone());
    Ok(state)
}

fn create_instance() -> Result<InstanceState> {
    let enable_validation = debug_enabled();
    log::info!(
        "Creating Vulkan instance (validation: {})",
        enable_validation
    );

    let entry = unsafe { Entry::load()? };

    let app_name = CString::new("gpukit").unwrap();
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&app_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    // Enable only what the loader actually offers; a headless ICD may
    // ship no surface extensions at all and that must not block compute.
    let available: Vec<CString> = entry
        .enumerate_instance_extension_properties(None)
        .ctx("enumerating instance extensions")?
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()).to_owned() })
        .collect();
    let is_available = |name: &CStr| available.iter().any(|a| a.as_c_str() == name);

    let mut extensions: Vec<*const i8> = Vec::new();
    let mut surface_enabled = false;
    if is_available(ash::extensions::khr::Surface::name()) {
        let mut platform: Vec<&CStr> = Vec::new();
        #[cfg(target_os = "windows")]
        platform.push(ash::extensions::khr::Win32Surface::name());
        #[cfg(any(target_os = "linux", target_os = "freebsd"))]
        {
            platform.push(ash::extensions::khr::XlibSurface::name());
            platform.push(ash::extensions::khr::XcbSurface::name());
            platform.push(ash::extensions::khr::WaylandSurface::name());
        }
        #[cfg(target_os = "macos")]
        platform.push(ash::extensions::ext::MetalSurface::name());
        #[cfg(target_os = "android")]
        platform.push(ash::extensions::khr::AndroidSurface::name());

        let platform: Vec<&CStr> = platform.into_iter().filter(|n| is_available(n)).collect();
        if !platform.is_empty() {
            extensions.push(ash::extensions::khr::Surface::name().as_ptr());
            extensions.extend(platform.iter().map(|n| n.as_ptr()));
            surface_enabled = true;
        }
    }

    let debug_utils_available = is_available(ash::extensions::ext::DebugUtils::name());
    if enable_validation && debug_utils_available {
        extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
    }

    let validation_layer = CString::new("VK_LAYER_KHRONOS_validation").unwrap();
    let layers_available = entry
        .enumerate_instance_layer_properties()
        .ctx("enumerating instance layers")?;
    let validation_available = layers_available
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == validation_layer.as_c_str());

    let layer_names = if enable_validation && validation_available {
        vec![validation_layer.as_ptr()]
    } else {
        if enable_validation && !validation_available {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .ctx("creating Vulkan instance")?;

    let debug_utils = if enable_validation && debug_utils_available {
        match setup_debug_messenger(&entry, &instance) {
            Ok(pair) => Some(pair),
            Err(e) => {
                log::warn!("Debug messenger unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(InstanceState {
        entry,
        instance,
        surface_enabled,
        debug_utils,
    })
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

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

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .ctx("creating debug messenger")?;

    Ok((debug_utils, messenger))
}

// Validation messages are mirrored to the log and accumulated for
// drain_debug_messages().
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        _ => {
            log::debug!("[Vulkan] {}", message);
        }
    }

    if debug_enabled() {
        DEBUG_MESSAGES.lock().push(message.into_owned());
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_clears_the_buffer() {
        DEBUG_MESSAGES.lock().push("test message".to_string());
        let drained = drain_debug_messages();
        assert!(drained.iter().any(|m| m == "test message"));
        assert!(drain_debug_messages().is_empty());
    }
}
