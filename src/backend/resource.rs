// Resources - buffers and 1D/2D/3D textures
//
// One type covers both kinds: a resource is a buffer iff
// width == height == depth == 0. Textures always report a packed
// logical layout (row_pitch = width * pixel size); any native tiling
// difference is bridged by the copy engine, never exposed here.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::any::Any;
use std::ops::Range;
use std::sync::Arc;

use super::device::{Device, DeviceInner};
use super::heap::{find_memory_type, Heap, HeapKind};
use crate::error::{Error, Result, VkResultExt};
use crate::formats::Format;

/// Resource dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDim {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

/// Placement request for resources bound into an explicit [`Heap`].
#[derive(Clone)]
pub struct HeapPlacement {
    pub heap: Arc<Heap>,
    pub offset: u64,
}

pub(crate) enum NativeHandle {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

enum Backing {
    /// Memory owned through the device allocator.
    Allocated(Mutex<Option<Allocation>>),
    /// Bound into a caller-owned heap at a byte offset.
    Placed { heap: Arc<Heap>, offset: u64 },
    /// Externally-owned native object; never destroyed here. The guard
    /// keeps the exporter's handle alive for as long as the wrapper.
    External(Option<Arc<dyn Any + Send + Sync>>),
}

/// A buffer or texture and its byte layout.
pub struct Resource {
    pub(crate) device: Arc<DeviceInner>,
    dim: ResourceDim,
    heap_kind: HeapKind,
    size: u64,
    stride: u32,
    format: Option<Format>,
    width: u32,
    height: u32,
    depth: u32,
    row_pitch: u32,
    pub(crate) handle: NativeHandle,
    backing: Backing,
    /// Current image layout; meaningless for buffers.
    pub(crate) layout: Mutex<vk::ImageLayout>,
    /// Lazily-created CPU-visible shadow used to bridge mapping for
    /// copy/upload/readback when the resource itself is not mappable.
    pub(crate) staging: Mutex<Option<Arc<Resource>>>,
}

impl Resource {
    pub fn dim(&self) -> ResourceDim {
        self.dim
    }

    /// A resource is a buffer iff all three extents are zero.
    pub fn is_buffer(&self) -> bool {
        self.width == 0 && self.height == 0 && self.depth == 0
    }

    pub fn heap_kind(&self) -> HeapKind {
        self.heap_kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> Option<Format> {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Packed row pitch: `width * bytes_per_pixel`. Zero for buffers.
    pub fn row_pitch(&self) -> u32 {
        self.row_pitch
    }

    /// Whether this buffer can be bound as a constant buffer: Default
    /// heap, raw (no format, no stride) and 16-byte-aligned size.
    pub fn constant_buffer_eligible(&self) -> bool {
        self.is_buffer()
            && constant_buffer_eligible(self.heap_kind, self.size, self.stride, self.format)
    }

    pub(crate) fn vk_buffer(&self) -> Option<vk::Buffer> {
        match self.handle {
            NativeHandle::Buffer(buffer) => Some(buffer),
            NativeHandle::Image(_) => None,
        }
    }

    pub(crate) fn vk_image(&self) -> Option<vk::Image> {
        match self.handle {
            NativeHandle::Buffer(_) => None,
            NativeHandle::Image(image) => Some(image),
        }
    }

    pub(crate) fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width.max(1),
            height: self.height.max(1),
            depth: self.depth.max(1),
        }
    }

    fn mapped_ptr(&self) -> Option<*mut u8> {
        match &self.backing {
            Backing::Allocated(allocation) => allocation
                .lock()
                .as_ref()
                .and_then(|a| a.mapped_ptr())
                .map(|p| p.as_ptr() as *mut u8),
            Backing::Placed { heap, offset } => heap.mapped_ptr(*offset),
            Backing::External(_) => None,
        }
    }

    /// Returns (creating on first use) the CPU-visible staging shadow.
    pub(crate) fn staging_buffer(&self) -> Result<Arc<Resource>> {
        let mut slot = self.staging.lock();
        if let Some(staging) = slot.as_ref() {
            return Ok(staging.clone());
        }
        let staging = create_buffer_impl(
            self.device.clone(),
            HeapKind::Upload,
            self.size,
            0,
            None,
            None,
        )?;
        // Host-visible allocations are not zero-initialized; partial
        // staged writes must not leak stale bytes into the resource.
        if let Some(ptr) = staging.mapped_ptr() {
            unsafe { std::ptr::write_bytes(ptr, 0, staging.size as usize) };
        }
        *slot = Some(staging.clone());
        Ok(staging)
    }

    /// Uploads `data` at `offset`. Host-visible resources are written
    /// through the persistent mapping; Default-heap resources stage
    /// through the upload shadow and a device copy.
    pub fn upload(&self, data: &[u8], offset: u64) -> Result<()> {
        if range_overflows(offset, data.len() as u64, self.size) {
            return Err(Error::validation(format!(
                "upload of {} bytes at offset {} overflows resource of {} bytes",
                data.len(),
                offset,
                self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.write_regions(data, &[(offset, 0..data.len())])
    }

    /// Interleaves `stride`-sized chunks of `data` with `filler`,
    /// writing the expanded stream from offset 0.
    pub fn upload_chunked(&self, data: &[u8], stride: u32, filler: &[u8]) -> Result<()> {
        if stride == 0 {
            return Err(Error::validation("upload_chunked stride must be non-zero"));
        }
        let mut expanded =
            Vec::with_capacity(data.len() + (data.len() / stride as usize + 1) * filler.len());
        for chunk in data.chunks(stride as usize) {
            expanded.extend_from_slice(chunk);
            expanded.extend_from_slice(filler);
        }
        self.upload(&expanded, 0)
    }

    /// Row-by-row upload of packed source rows into a pitched layout.
    /// Each row copies `min(width * bpp, remaining source, remaining
    /// destination)` bytes and the loop stops once the source is
    /// exhausted: a best-effort partial copy, not a bounds error.
    pub fn upload2d(
        &self,
        data: &[u8],
        pitch: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<()> {
        let rows = plan_rows(
            data.len(),
            width as u64 * bytes_per_pixel as u64,
            pitch,
            height,
            self.size,
        );
        if rows.is_empty() {
            return Ok(());
        }
        self.write_regions(data, &rows)
    }

    /// Reads `size` bytes from `offset`; `size == 0` means "the rest".
    pub fn readback(&self, size: u64, offset: u64) -> Result<Vec<u8>> {
        if offset > self.size {
            return Err(Error::validation(format!(
                "readback offset {} beyond resource of {} bytes",
                offset, self.size
            )));
        }
        let size = if size == 0 { self.size - offset } else { size };
        if range_overflows(offset, size, self.size) {
            return Err(Error::validation(format!(
                "readback of {} bytes at offset {} overflows resource of {} bytes",
                size, offset, self.size
            )));
        }

        let mut out = vec![0u8; size as usize];
        self.read_region(&mut out, offset)?;
        Ok(out)
    }

    /// Copies `min(target.len(), size - offset)` bytes into the
    /// caller's slice; never writes past its declared length. Returns
    /// the number of bytes copied.
    pub fn readback_to_buffer(&self, target: &mut [u8], offset: u64) -> Result<usize> {
        if offset > self.size {
            return Err(Error::validation(format!(
                "readback offset {} beyond resource of {} bytes",
                offset, self.size
            )));
        }
        let n = (target.len() as u64).min(self.size - offset) as usize;
        self.read_region(&mut target[..n], offset)?;
        Ok(n)
    }

    /// Row-unpacking readback: drops per-row pitch padding and returns
    /// `width * bpp` packed bytes per row.
    pub fn readback2d(
        &self,
        pitch: u32,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>> {
        let span = (pitch as u64 * height as u64).min(self.size);
        let raw = self.readback(span, 0)?;
        Ok(super::copy::repack_rows(
            &raw,
            pitch as usize,
            (width * bytes_per_pixel) as usize,
            height as usize,
        ))
    }

    /// Scatter-write helper shared by upload/upload2d. `regions` pairs
    /// a destination byte offset with a source range; all regions are
    /// pre-validated against the resource size.
    fn write_regions(&self, data: &[u8], regions: &[(u64, Range<usize>)]) -> Result<()> {
        if let Some(ptr) = self.mapped_ptr() {
            for (dst_offset, src) in regions {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data[src.clone()].as_ptr(),
                        ptr.add(*dst_offset as usize),
                        src.len(),
                    );
                }
            }
            return Ok(());
        }

        // No direct mapping: write through the upload staging shadow,
        // then one device copy.
        let staging = self.staging_buffer()?;
        // Staged texture writes flush the whole image extent, so the
        // shadow must first mirror the current contents or every texel
        // outside the written regions would be overwritten.
        if !self.is_buffer() {
            super::copy::fill_staging_for_read(self, &staging)?;
        }
        for (dst_offset, src) in regions {
            // Staging mirrors the resource byte-for-byte.
            let ptr = staging
                .mapped_ptr()
                .ok_or_else(|| Error::validation("staging buffer is not mappable"))?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data[src.clone()].as_ptr(),
                    ptr.add(*dst_offset as usize),
                    src.len(),
                );
            }
        }
        super::copy::flush_staging_writes(self, &staging, regions)
    }

    fn read_region(&self, out: &mut [u8], offset: u64) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        if let Some(ptr) = self.mapped_ptr() {
            unsafe {
                std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
            }
            return Ok(());
        }

        let staging = self.staging_buffer()?;
        super::copy::fill_staging_for_read(self, &staging)?;
        let ptr = staging
            .mapped_ptr()
            .ok_or_else(|| Error::validation("staging buffer is not mappable"))?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        // Views over this resource are owned (and already released) by
        // the pipelines that created them; here the native object goes
        // before its memory.
        unsafe {
            match &self.backing {
                Backing::External(_) => {}
                _ => match self.handle {
                    NativeHandle::Buffer(buffer) => self.device.raw.destroy_buffer(buffer, None),
                    NativeHandle::Image(image) => self.device.raw.destroy_image(image, None),
                },
            }
        }
        if let Backing::Allocated(allocation) = &self.backing {
            if let Some(allocation) = allocation.lock().take() {
                self.device.free(allocation);
            }
        }
    }
}

impl Device {
    /// Creates a buffer. `stride` > 0 marks structured access, a format
    /// marks typed access; both zero/None is a raw buffer. Rejects
    /// `size == 0`.
    pub fn create_buffer(
        &self,
        heap: HeapKind,
        size: u64,
        stride: u32,
        format: Option<Format>,
    ) -> Result<Arc<Resource>> {
        create_buffer_impl(self.inner()?, heap, size, stride, format, None)
    }

    /// Creates a buffer placed into an explicit heap at a byte offset.
    pub fn create_buffer_in_heap(
        &self,
        placement: HeapPlacement,
        heap: HeapKind,
        size: u64,
        stride: u32,
        format: Option<Format>,
    ) -> Result<Arc<Resource>> {
        create_buffer_impl(self.inner()?, heap, size, stride, format, Some(placement))
    }

    pub fn create_texture1d(
        &self,
        width: u32,
        format: Format,
        placement: Option<HeapPlacement>,
    ) -> Result<Arc<Resource>> {
        create_texture_impl(self.inner()?, ResourceDim::Texture1D, width, 1, 1, format, placement)
    }

    pub fn create_texture2d(
        &self,
        width: u32,
        height: u32,
        format: Format,
        placement: Option<HeapPlacement>,
    ) -> Result<Arc<Resource>> {
        create_texture_impl(
            self.inner()?,
            ResourceDim::Texture2D,
            width,
            height,
            1,
            format,
            placement,
        )
    }

    pub fn create_texture3d(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        format: Format,
        placement: Option<HeapPlacement>,
    ) -> Result<Arc<Resource>> {
        create_texture_impl(
            self.inner()?,
            ResourceDim::Texture3D,
            width,
            height,
            depth,
            format,
            placement,
        )
    }

    /// Adopts an externally-owned `vk::Image` (interop with another
    /// graphics context). The wrapper never destroys the image and
    /// holds `keep_alive` so the exporter's handle outlives it; the
    /// image is expected to be in `GENERAL` layout. The declared
    /// dimensionality must be a texture kind and coherent with the
    /// extents.
    pub fn wrap_image(
        &self,
        image: vk::Image,
        dim: ResourceDim,
        width: u32,
        height: u32,
        depth: u32,
        format: Format,
        keep_alive: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Arc<Resource>> {
        let (width, height, depth) = validate_texture_dims(dim, width, height, depth)?;
        let (row_pitch, size) = texture_layout(width, height, depth, format)?;

        Ok(Arc::new(Resource {
            device: self.inner()?,
            dim,
            heap_kind: HeapKind::Default,
            size,
            stride: 0,
            format: Some(format),
            width,
            height,
            depth,
            row_pitch,
            handle: NativeHandle::Image(image),
            backing: Backing::External(keep_alive),
            layout: Mutex::new(vk::ImageLayout::GENERAL),
            staging: Mutex::new(None),
        }))
    }

    /// Adopts an externally-owned `vk::Buffer` of `size` bytes. Same
    /// ownership contract as [`Device::wrap_image`].
    pub fn wrap_buffer(
        &self,
        buffer: vk::Buffer,
        size: u64,
        stride: u32,
        format: Option<Format>,
        keep_alive: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<Arc<Resource>> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        Ok(Arc::new(Resource {
            device: self.inner()?,
            dim: ResourceDim::Buffer,
            heap_kind: HeapKind::Default,
            size,
            stride,
            format,
            width: 0,
            height: 0,
            depth: 0,
            row_pitch: 0,
            handle: NativeHandle::Buffer(buffer),
            backing: Backing::External(keep_alive),
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            staging: Mutex::new(None),
        }))
    }
}

fn create_buffer_impl(
    device: Arc<DeviceInner>,
    heap: HeapKind,
    size: u64,
    stride: u32,
    format: Option<Format>,
    placement: Option<HeapPlacement>,
) -> Result<Arc<Resource>> {
    if size == 0 {
        return Err(Error::ZeroSize);
    }

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(buffer_usage(heap, size, stride, format))
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.raw.create_buffer(&buffer_info, None) }
        .ctx("creating buffer")?;

    let requirements = unsafe { device.raw.get_buffer_memory_requirements(buffer) };

    let backing = match placement {
        None => {
            let allocation = device.allocate(&AllocationCreateDesc {
                name: "gpukit buffer",
                requirements,
                location: memory_location(heap),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.raw.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };
            if let Err(source) = unsafe {
                device
                    .raw
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            } {
                device.free(allocation);
                unsafe { device.raw.destroy_buffer(buffer, None) };
                return Err(Error::Native {
                    context: "binding buffer memory",
                    source,
                });
            }
            Backing::Allocated(Mutex::new(Some(allocation)))
        }
        Some(placement) => {
            if let Err(e) = validate_placement(&placement, heap, &requirements) {
                unsafe { device.raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
            if let Err(source) = unsafe {
                device
                    .raw
                    .bind_buffer_memory(buffer, placement.heap.memory, placement.offset)
            } {
                unsafe { device.raw.destroy_buffer(buffer, None) };
                return Err(Error::Native {
                    context: "binding placed buffer memory",
                    source,
                });
            }
            Backing::Placed {
                heap: placement.heap,
                offset: placement.offset,
            }
        }
    };

    Ok(Arc::new(Resource {
        device,
        dim: ResourceDim::Buffer,
        heap_kind: heap,
        size,
        stride,
        format,
        width: 0,
        height: 0,
        depth: 0,
        row_pitch: 0,
        handle: NativeHandle::Buffer(buffer),
        backing,
        layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        staging: Mutex::new(None),
    }))
}

fn create_texture_impl(
    device: Arc<DeviceInner>,
    dim: ResourceDim,
    width: u32,
    height: u32,
    depth: u32,
    format: Format,
    placement: Option<HeapPlacement>,
) -> Result<Arc<Resource>> {
    let (width, height, depth) = validate_texture_dims(dim, width, height, depth)?;
    if let Some(placement) = &placement {
        // Textures live in device-local memory only; a CPU-visible heap
        // cannot back an OPTIMAL-tiled image.
        if placement.heap.kind() != HeapKind::Default {
            return Err(Error::validation(
                "textures can only be placed into Default heaps",
            ));
        }
    }

    let (row_pitch, size) = texture_layout(width, height, depth, format)?;

    let image_type = match dim {
        ResourceDim::Texture1D => vk::ImageType::TYPE_1D,
        ResourceDim::Texture2D => vk::ImageType::TYPE_2D,
        ResourceDim::Texture3D => vk::ImageType::TYPE_3D,
        ResourceDim::Buffer => unreachable!("validated above"),
    };

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(image_type)
        .extent(vk::Extent3D {
            width,
            height,
            depth,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format.to_vk())
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .samples(vk::SampleCountFlags::TYPE_1)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let image = unsafe { device.raw.create_image(&image_info, None) }
        .ctx("creating image")?;

    let requirements = unsafe { device.raw.get_image_memory_requirements(image) };

    let backing = match placement {
        None => {
            let allocation = device.allocate(&AllocationCreateDesc {
                name: "gpukit texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.raw.destroy_image(image, None) };
                    return Err(e);
                }
            };
            if let Err(source) = unsafe {
                device
                    .raw
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
            } {
                device.free(allocation);
                unsafe { device.raw.destroy_image(image, None) };
                return Err(Error::Native {
                    context: "binding image memory",
                    source,
                });
            }
            Backing::Allocated(Mutex::new(Some(allocation)))
        }
        Some(placement) => {
            if let Err(e) = validate_placement(&placement, HeapKind::Default, &requirements) {
                unsafe { device.raw.destroy_image(image, None) };
                return Err(e);
            }
            if let Err(source) = unsafe {
                device
                    .raw
                    .bind_image_memory(image, placement.heap.memory, placement.offset)
            } {
                unsafe { device.raw.destroy_image(image, None) };
                return Err(Error::Native {
                    context: "binding placed image memory",
                    source,
                });
            }
            Backing::Placed {
                heap: placement.heap,
                offset: placement.offset,
            }
        }
    };

    let resource = Arc::new(Resource {
        device: device.clone(),
        dim,
        heap_kind: HeapKind::Default,
        size,
        stride: 0,
        format: Some(format),
        width,
        height,
        depth,
        row_pitch,
        handle: NativeHandle::Image(image),
        backing,
        layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        staging: Mutex::new(None),
    });

    // A fresh image starts UNDEFINED; bring it to the generally
    // accessible layout before anything binds or copies it.
    super::copy::transition_new_image(&resource)?;

    Ok(resource)
}

fn validate_texture_dims(
    dim: ResourceDim,
    width: u32,
    height: u32,
    depth: u32,
) -> Result<(u32, u32, u32)> {
    match dim {
        ResourceDim::Buffer => Err(Error::validation("expected a texture kind, got Buffer")),
        ResourceDim::Texture1D if width > 0 && height <= 1 && depth <= 1 => Ok((width, 1, 1)),
        ResourceDim::Texture2D if width > 0 && height > 0 && depth <= 1 => {
            Ok((width, height, 1))
        }
        ResourceDim::Texture3D if width > 0 && height > 0 && depth > 0 => {
            Ok((width, height, depth))
        }
        _ => Err(Error::validation(format!(
            "extents {}x{}x{} do not match {:?}",
            width, height, depth, dim
        ))),
    }
}

fn validate_placement(
    placement: &HeapPlacement,
    heap_kind: HeapKind,
    requirements: &vk::MemoryRequirements,
) -> Result<()> {
    if placement.heap.kind() != heap_kind {
        return Err(Error::validation(format!(
            "resource of heap kind {:?} cannot be placed into a {:?} heap",
            heap_kind,
            placement.heap.kind()
        )));
    }
    if placement.offset % requirements.alignment != 0 {
        return Err(Error::validation(format!(
            "heap offset {} violates required alignment {}",
            placement.offset, requirements.alignment
        )));
    }
    if placement.offset + requirements.size > placement.heap.size() {
        return Err(Error::validation(format!(
            "placed resource needs {} bytes at offset {} but the heap holds {}",
            requirements.size,
            placement.offset,
            placement.heap.size()
        )));
    }
    // The heap picked its memory type by kind alone; the resource must
    // be compatible with it.
    find_memory_type(
        &placement.heap.device.memory_properties,
        requirements.memory_type_bits & (1 << placement.heap.memory_type_index),
        heap_kind.memory_property_flags(),
    )
    .map_err(|_| Error::validation("resource is incompatible with the heap's memory type"))?;
    Ok(())
}

fn buffer_usage(
    heap: HeapKind,
    size: u64,
    stride: u32,
    format: Option<Format>,
) -> vk::BufferUsageFlags {
    match heap {
        HeapKind::Default => {
            let mut usage = vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST;
            if format.is_some() {
                usage |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                    | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
            }
            if constant_buffer_eligible(heap, size, stride, format) {
                usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
            }
            usage
        }
        HeapKind::Upload | HeapKind::Readback => {
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
        }
    }
}

fn memory_location(heap: HeapKind) -> MemoryLocation {
    match heap {
        HeapKind::Default => MemoryLocation::GpuOnly,
        HeapKind::Upload => MemoryLocation::CpuToGpu,
        HeapKind::Readback => MemoryLocation::GpuToCpu,
    }
}

/// 16-byte size alignment is load-bearing: constant-buffer hardware
/// requires it, and only raw Default-heap buffers qualify.
pub(crate) fn constant_buffer_eligible(
    heap: HeapKind,
    size: u64,
    stride: u32,
    format: Option<Format>,
) -> bool {
    heap == HeapKind::Default && format.is_none() && stride == 0 && size % 16 == 0
}

/// True when `offset + len` wraps or lands past `size`. Offsets are
/// caller-controlled u64s, so the addition itself must be checked.
pub(crate) fn range_overflows(offset: u64, len: u64, size: u64) -> bool {
    offset.checked_add(len).map_or(true, |end| end > size)
}

/// Packed byte layout of a texture, with the multiplies checked so
/// absurd extents fail validation instead of wrapping.
fn texture_layout(width: u32, height: u32, depth: u32, format: Format) -> Result<(u32, u64)> {
    let row_pitch = width
        .checked_mul(format.pixel_size())
        .ok_or_else(|| Error::validation("texture row pitch overflows u32"))?;
    let size = (row_pitch as u64)
        .checked_mul(height as u64)
        .and_then(|v| v.checked_mul(depth as u64))
        .ok_or_else(|| Error::validation("texture size overflows u64"))?;
    Ok((row_pitch, size))
}

/// Plans the row copies for `upload2d`: packed source rows of
/// `row_len` bytes land `pitch` bytes apart, each clamped to what the
/// source and the destination still hold.
fn plan_rows(
    src_len: usize,
    row_len: u64,
    pitch: u32,
    rows: u32,
    dst_size: u64,
) -> Vec<(u64, Range<usize>)> {
    let mut out = Vec::new();
    if row_len == 0 {
        return out;
    }
    // Rows longer than the whole source copy once and stop; clamping
    // here keeps the offset arithmetic inside usize.
    let row_len = row_len.min(src_len as u64) as usize;
    if row_len == 0 {
        return out;
    }
    for y in 0..rows as usize {
        let src_offset = y * row_len;
        if src_offset >= src_len {
            break;
        }
        let dst_offset = y as u64 * pitch as u64;
        if dst_offset >= dst_size {
            break;
        }
        let n = row_len
            .min(src_len - src_offset)
            .min((dst_size - dst_offset) as usize);
        out.push((dst_offset, src_offset..src_offset + n));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_buffer_eligibility() {
        // 64 bytes, raw, Default heap: eligible.
        assert!(constant_buffer_eligible(HeapKind::Default, 64, 0, None));
        // 50 bytes: not 16-byte aligned, still a valid generic buffer.
        assert!(!constant_buffer_eligible(HeapKind::Default, 50, 0, None));
        // Structured or typed buffers never qualify.
        assert!(!constant_buffer_eligible(HeapKind::Default, 64, 8, None));
        assert!(!constant_buffer_eligible(
            HeapKind::Default,
            64,
            0,
            Some(Format::R32Uint)
        ));
        // Neither do CPU-visible heaps.
        assert!(!constant_buffer_eligible(HeapKind::Upload, 64, 0, None));
    }

    #[test]
    fn texture_dim_validation() {
        assert_eq!(
            validate_texture_dims(ResourceDim::Texture1D, 16, 0, 0).unwrap(),
            (16, 1, 1)
        );
        assert_eq!(
            validate_texture_dims(ResourceDim::Texture2D, 4, 4, 0).unwrap(),
            (4, 4, 1)
        );
        assert_eq!(
            validate_texture_dims(ResourceDim::Texture3D, 2, 3, 4).unwrap(),
            (2, 3, 4)
        );
        assert!(validate_texture_dims(ResourceDim::Texture2D, 4, 0, 0).is_err());
        assert!(validate_texture_dims(ResourceDim::Texture1D, 4, 2, 1).is_err());
        assert!(validate_texture_dims(ResourceDim::Buffer, 4, 4, 1).is_err());
    }

    #[test]
    fn upload2d_copies_all_rows_when_source_is_exact() {
        // pitch 256, width 64, 4 bpp, 4 rows, source of exactly 1024
        // bytes: all four rows copy without truncation.
        let rows = plan_rows(1024, 64 * 4, 256, 4, 4096);
        assert_eq!(rows.len(), 4);
        for (y, (dst, src)) in rows.iter().enumerate() {
            assert_eq!(*dst, y as u64 * 256);
            assert_eq!(src.len(), 256);
        }
    }

    #[test]
    fn upload2d_stops_when_source_is_exhausted() {
        // 2x2 4bpp texture but only one pixel of source data.
        let rows = plan_rows(4, 8, 8, 2, 32);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (0, 0..4));
    }

    #[test]
    fn upload2d_clamps_to_destination() {
        let rows = plan_rows(64, 16, 16, 4, 24);
        // Row 0 fits, row 1 is clamped to the 8 bytes left, row 2 is
        // out of destination.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (0, 0..16));
        assert_eq!(rows[1], (16, 16..24));
    }

    #[test]
    fn range_checks_do_not_wrap() {
        assert!(!range_overflows(0, 16, 16));
        assert!(!range_overflows(8, 8, 16));
        assert!(range_overflows(8, 9, 16));
        // offset + len wrapping around u64 must read as out of range,
        // never as a small in-range end.
        assert!(range_overflows(u64::MAX, 2, 16));
        assert!(range_overflows(u64::MAX, u64::MAX, u64::MAX));
    }

    #[test]
    fn texture_layout_rejects_overflowing_extents() {
        assert_eq!(
            texture_layout(4, 4, 1, Format::R8G8B8A8Unorm).unwrap(),
            (16, 64)
        );
        // width * bpp past u32.
        assert!(texture_layout(u32::MAX, 1, 1, Format::R8G8B8A8Unorm).is_err());
        // row_pitch * height * depth past u64.
        assert!(texture_layout(1 << 30, u32::MAX, u32::MAX, Format::R8G8B8A8Unorm).is_err());
    }

    #[test]
    fn upload2d_plan_survives_huge_row_lengths() {
        // A row length far past the source must clamp to one partial
        // row instead of overflowing the offset arithmetic.
        let rows = plan_rows(4, u64::MAX, 8, 2, 32);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (0, 0..4));
        assert!(plan_rows(0, u64::MAX, 8, 2, 32).is_empty());
    }

    #[test]
    fn buffer_usage_per_heap() {
        let default = buffer_usage(HeapKind::Default, 64, 0, None);
        assert!(default.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(default.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));

        let unaligned = buffer_usage(HeapKind::Default, 50, 0, None);
        assert!(!unaligned.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));

        let typed = buffer_usage(HeapKind::Default, 64, 0, Some(Format::R32Uint));
        assert!(typed.contains(vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER));
        assert!(!typed.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));

        let upload = buffer_usage(HeapKind::Upload, 64, 0, None);
        assert!(!upload.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(upload.contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }
}
