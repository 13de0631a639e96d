// Vulkan backend
//
// Module layout mirrors the object model: one process-wide instance,
// lazily-created devices, resources and heaps on top, then the copy
// engine, compute pipelines and the swapchain.

pub mod device;
pub mod heap;
pub mod instance;
pub mod pipeline;
pub mod resource;
pub mod sampler;
pub mod swapchain;

mod copy;
mod spirv;

pub use device::{discover, Device, DeviceDescriptor, DeviceOptions};
pub use heap::{Heap, HeapKind};
pub use pipeline::ComputePipeline;
pub use resource::{HeapPlacement, Resource, ResourceDim};
pub use sampler::{AddressMode, Filter, Sampler};
pub use swapchain::Swapchain;
