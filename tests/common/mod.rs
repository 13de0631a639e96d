// Shared helpers for the integration tests. All GPU tests skip (pass
// vacuously) when no Vulkan implementation is reachable, so the suite
// stays green on headless CI runners without a driver.

#![allow(dead_code)]

use gpukit::Device;

/// Returns a ready device, or `None` when no adapter is available.
pub fn gpu() -> Option<Device> {
    let _ = env_logger::builder().is_test(true).try_init();
    match gpukit::discover() {
        Ok(adapters) if !adapters.is_empty() => {
            let device = Device::default();
            match device.ensure_ready() {
                Ok(()) => Some(device),
                Err(e) => {
                    eprintln!("skipping: device creation failed: {e}");
                    None
                }
            }
        }
        Ok(_) => {
            eprintln!("skipping: no Vulkan adapters");
            None
        }
        Err(e) => {
            eprintln!("skipping: Vulkan unavailable: {e}");
            None
        }
    }
}

/// A hand-assembled SPIR-V compute module whose entry point `main`
/// returns immediately. Enough to exercise pipeline creation and
/// dispatch without a shader compiler in the loop.
pub fn noop_shader() -> Vec<u8> {
    let words: [u32; 35] = [
        0x0723_0203, // magic
        0x0001_0000, // version 1.0
        0,           // generator
        5,           // id bound
        0,           // schema
        0x0002_0011, 1, // OpCapability Shader
        0x0003_000e, 0, 1, // OpMemoryModel Logical GLSL450
        0x0005_000f, 5, 1, 0x6e69_616d, 0, // OpEntryPoint GLCompute %1 "main"
        0x0006_0010, 1, 17, 1, 1, 1, // OpExecutionMode %1 LocalSize 1 1 1
        0x0002_0013, 2, // %2 = OpTypeVoid
        0x0003_0021, 3, 2, // %3 = OpTypeFunction %2
        0x0005_0036, 2, 1, 0, 3, // %1 = OpFunction %2 None %3
        0x0002_00f8, 4, // %4 = OpLabel
        0x0001_00fd, // OpReturn
        0x0001_0038, // OpFunctionEnd
    ];
    words.iter().flat_map(|w| w.to_ne_bytes()).collect()
}
