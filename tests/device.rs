// Adapter discovery, device lifecycle and configuration.

mod common;

use gpukit::{Config, Device, DeviceOptions, Error};

#[test]
fn discovery_reports_plausible_adapters() {
    let adapters = match gpukit::discover() {
        Ok(adapters) => adapters,
        Err(e) => {
            eprintln!("skipping: Vulkan unavailable: {e}");
            return;
        }
    };
    for (i, adapter) in adapters.iter().enumerate() {
        assert_eq!(adapter.index, i);
        assert!(!adapter.name.is_empty());
        assert!(adapter.device_memory_bytes > 0 || adapter.shared_memory_bytes > 0);
    }
}

#[test]
fn ensure_ready_is_idempotent() {
    let Some(device) = common::gpu() else { return };
    device.ensure_ready().unwrap();
    device.ensure_ready().unwrap();
}

#[test]
fn out_of_range_adapter_index_is_rejected() {
    if common::gpu().is_none() {
        return;
    }
    let device = Device::new(DeviceOptions {
        adapter_index: Some(usize::MAX),
        prefer_discrete: true,
    });
    assert!(matches!(
        device.ensure_ready(),
        Err(Error::NoSuitableDevice) | Err(Error::Validation(_))
    ));
}

#[test]
fn debug_messages_drain_to_empty() {
    let Some(device) = common::gpu() else { return };
    // With validation off the buffer stays empty; either way a second
    // drain returns nothing.
    device.drain_debug_messages();
    assert!(device.drain_debug_messages().is_empty());
}

#[test]
fn default_config_produces_a_working_device() {
    if common::gpu().is_none() {
        return;
    }
    let config = Config::default();
    let device = Device::new(config.apply());
    device.ensure_ready().unwrap();
}
