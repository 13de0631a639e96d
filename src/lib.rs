// gpukit - a synchronous GPU compute library over Vulkan
//
// The model is deliberately simple: discover adapters, create buffers
// and textures on one of three heap kinds, move bytes with blocking
// copies, run compute shaders against immutable binding sets, and
// optionally blit results to a window. Every GPU operation completes
// before its call returns; there is no frame graph and no implicit
// batching.

pub mod backend;
pub mod config;
pub mod error;
pub mod formats;

pub use backend::device::{discover, Device, DeviceDescriptor, DeviceOptions};
pub use backend::heap::{Heap, HeapKind};
pub use backend::instance::{drain_debug_messages, set_debug};
pub use backend::pipeline::{
    ComputePipeline, CBV_BINDING_BASE, SAMPLER_BINDING_BASE, SRV_BINDING_BASE, UAV_BINDING_BASE,
};
pub use backend::resource::{HeapPlacement, Resource, ResourceDim};
pub use backend::sampler::{AddressMode, Filter, Sampler};
pub use backend::swapchain::Swapchain;
pub use config::Config;
pub use error::{Error, Result};
pub use formats::Format;
