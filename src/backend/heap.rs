// Explicit memory heaps for placed resources
//
// A Heap is one raw vkDeviceMemory block; buffers and textures can be
// created "placed" into it at a byte offset. Host-visible heaps stay
// persistently mapped. Aliasing placed resources inside one heap is
// allowed and not validated.

use ash::vk;
use std::sync::Arc;

use super::device::{Device, DeviceInner};
use crate::error::{Error, Result, VkResultExt};

/// Placement class of a resource's backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HeapKind {
    /// Device-local, no CPU access.
    Default = 0,
    /// CPU-write, GPU-read.
    Upload = 1,
    /// GPU-write, CPU-read.
    Readback = 2,
}

impl HeapKind {
    pub fn from_raw(code: u32) -> Result<HeapKind> {
        match code {
            0 => Ok(HeapKind::Default),
            1 => Ok(HeapKind::Upload),
            2 => Ok(HeapKind::Readback),
            other => Err(Error::UnknownHeap(other)),
        }
    }

    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, HeapKind::Default)
    }

    pub(crate) fn memory_property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            HeapKind::Default => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HeapKind::Upload | HeapKind::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// One raw device-memory block placed resources can bind into.
pub struct Heap {
    pub(crate) device: Arc<DeviceInner>,
    kind: HeapKind,
    size: u64,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) memory_type_index: u32,
    mapped: Option<*mut u8>,
}

// The mapped pointer aliases persistently-mapped coherent memory; all
// writes through it go through offset-checked slices.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn mapped_ptr(&self, offset: u64) -> Option<*mut u8> {
        self.mapped.map(|base| unsafe { base.add(offset as usize) })
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.device.raw.unmap_memory(self.memory);
            }
            self.device.raw.free_memory(self.memory, None);
        }
    }
}

impl Device {
    /// Allocates a raw memory heap of `size` bytes for placed resources.
    pub fn create_heap(&self, kind: HeapKind, size: u64) -> Result<Arc<Heap>> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        let device = self.inner()?;

        let memory_type_index = find_memory_type(
            &device.memory_properties,
            u32::MAX,
            kind.memory_property_flags(),
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { device.raw.allocate_memory(&alloc_info, None) }
            .ctx("allocating heap memory")?;

        let mapped = if kind.is_cpu_visible() {
            match unsafe { device.raw.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
            {
                Ok(ptr) => Some(ptr as *mut u8),
                Err(source) => {
                    unsafe { device.raw.free_memory(memory, None) };
                    return Err(Error::Native {
                        context: "mapping heap memory",
                        source,
                    });
                }
            }
        } else {
            None
        };

        log::debug!("Created {:?} heap of {} bytes", kind, size);

        Ok(Arc::new(Heap {
            device,
            kind,
            size,
            memory,
            memory_type_index,
            mapped,
        }))
    }
}

/// Find a suitable memory type index
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    Err(Error::validation(format!(
        "no memory type supports {:?}",
        properties
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_kind_raw_codes() {
        assert_eq!(HeapKind::from_raw(0).unwrap(), HeapKind::Default);
        assert_eq!(HeapKind::from_raw(1).unwrap(), HeapKind::Upload);
        assert_eq!(HeapKind::from_raw(2).unwrap(), HeapKind::Readback);
        assert!(matches!(HeapKind::from_raw(9999), Err(Error::UnknownHeap(9999))));
    }

    #[test]
    fn cpu_visibility_per_kind() {
        assert!(!HeapKind::Default.is_cpu_visible());
        assert!(HeapKind::Upload.is_cpu_visible());
        assert!(HeapKind::Readback.is_cpu_visible());
    }

    #[test]
    fn memory_type_search_respects_filter() {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 2;
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(
            find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert_eq!(
            find_memory_type(&props, u32::MAX, HeapKind::Upload.memory_property_flags()).unwrap(),
            1
        );
        // Excluding type 1 from the filter must fail the host-visible search.
        assert!(find_memory_type(&props, 0b01, HeapKind::Upload.memory_property_flags()).is_err());
    }
}
