// Copy engine
//
// Resource-to-resource transfer: device-side copies, staged
// upload/readback bridging, buffer<->texture reinterpretation and the
// layout round-trips around them. Every copy runs through the device's
// single command buffer and blocks until the GPU is done.

use ash::vk;
use std::ops::Range;
use std::sync::Arc;

use super::device::DeviceInner;
use super::resource::Resource;
use crate::error::{Error, Result};

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn access_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::GENERAL => {
            vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::SHADER_WRITE
                | vk::AccessFlags::TRANSFER_READ
                | vk::AccessFlags::TRANSFER_WRITE
        }
        _ => vk::AccessFlags::empty(),
    }
}

/// Records a full-subresource layout transition.
pub(crate) fn image_barrier(
    device: &DeviceInner,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(access_for_layout(old_layout))
        .dst_access_mask(access_for_layout(new_layout))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range())
        .build();

    unsafe {
        device.raw.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn buffer_barrier(device: &DeviceInner, cmd: vk::CommandBuffer, buffer: vk::Buffer, size: u64) {
    let barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(size)
        .build();

    unsafe {
        device.raw.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

/// Tracks a layout transition so the restore runs only when the
/// barrier was actually issued.
struct LayoutRoundTrip {
    image: vk::Image,
    prior: vk::ImageLayout,
    target: vk::ImageLayout,
    issued: bool,
}

impl LayoutRoundTrip {
    fn enter(
        device: &DeviceInner,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        prior: vk::ImageLayout,
        target: vk::ImageLayout,
    ) -> Self {
        let issued = prior != target;
        if issued {
            image_barrier(device, cmd, image, prior, target);
        }
        Self {
            image,
            prior,
            target,
            issued,
        }
    }

    fn exit(&self, device: &DeviceInner, cmd: vk::CommandBuffer) {
        if self.issued {
            image_barrier(device, cmd, self.image, self.target, self.prior);
        }
    }
}

/// Brings a freshly created image out of UNDEFINED into GENERAL.
pub(crate) fn transition_new_image(resource: &Resource) -> Result<()> {
    let image = resource
        .vk_image()
        .ok_or_else(|| Error::validation("expected a texture resource"))?;
    resource.device.submit_and_wait(|cmd| {
        image_barrier(
            &resource.device,
            cmd,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        Ok(())
    })?;
    *resource.layout.lock() = vk::ImageLayout::GENERAL;
    Ok(())
}

/// Pushes staged writes into their resource: per-region buffer copies
/// for buffers, a whole-image transfer for textures (the staging
/// shadow mirrors the packed layout byte-for-byte).
pub(crate) fn flush_staging_writes(
    resource: &Resource,
    staging: &Resource,
    regions: &[(u64, Range<usize>)],
) -> Result<()> {
    let device = &resource.device;
    let staging_buffer = staging
        .vk_buffer()
        .ok_or_else(|| Error::validation("staging must be a buffer"))?;

    if let Some(dst_buffer) = resource.vk_buffer() {
        let copies: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|(dst_offset, src)| vk::BufferCopy {
                src_offset: *dst_offset,
                dst_offset: *dst_offset,
                size: src.len() as u64,
            })
            .collect();
        return device.submit_and_wait(|cmd| {
            unsafe {
                device
                    .raw
                    .cmd_copy_buffer(cmd, staging_buffer, dst_buffer, &copies);
            }
            Ok(())
        });
    }

    let image = resource
        .vk_image()
        .ok_or_else(|| Error::validation("staged transfer target must be a texture"))?;
    let prior = *resource.layout.lock();
    device.submit_and_wait(|cmd| {
        let round_trip = LayoutRoundTrip::enter(
            device,
            cmd,
            image,
            prior,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: resource.extent(),
        };
        unsafe {
            device.raw.cmd_copy_buffer_to_image(
                cmd,
                staging_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        round_trip.exit(device, cmd);
        Ok(())
    })
}

/// Fills the staging shadow from its resource ahead of a CPU read.
pub(crate) fn fill_staging_for_read(resource: &Resource, staging: &Resource) -> Result<()> {
    let device = &resource.device;
    let staging_buffer = staging
        .vk_buffer()
        .ok_or_else(|| Error::validation("staging must be a buffer"))?;

    if let Some(src_buffer) = resource.vk_buffer() {
        return device.submit_and_wait(|cmd| {
            let copy = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: resource.size(),
            };
            unsafe {
                device
                    .raw
                    .cmd_copy_buffer(cmd, src_buffer, staging_buffer, &[copy]);
            }
            Ok(())
        });
    }

    let image = resource
        .vk_image()
        .ok_or_else(|| Error::validation("staged transfer target must be a texture"))?;
    let prior = *resource.layout.lock();
    device.submit_and_wait(|cmd| {
        let round_trip = LayoutRoundTrip::enter(
            device,
            cmd,
            image,
            prior,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: resource.extent(),
        };
        unsafe {
            device.raw.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging_buffer,
                &[region],
            );
        }
        round_trip.exit(device, cmd);
        Ok(())
    })
}

/// Repacks pitched rows into a packed byte stream. Zero-copy when the
/// pitch already matches the packed row length.
pub(crate) fn repack_rows(
    src: &[u8],
    src_pitch: usize,
    row_len: usize,
    rows: usize,
) -> Vec<u8> {
    if src_pitch == row_len {
        let n = src.len().min(rows * row_len);
        return src[..n].to_vec();
    }
    let mut out = Vec::with_capacity(rows * row_len);
    for y in 0..rows {
        let start = y * src_pitch;
        if start >= src.len() {
            break;
        }
        let n = row_len.min(src.len() - start);
        out.extend_from_slice(&src[start..start + n]);
    }
    out
}

/// How much of a texture a buffer of `buffer_size` bytes can cover,
/// in whole rows (and whole slices for 3D).
fn buffer_covered_extent(buffer_size: u64, texture: &Resource) -> vk::Extent3D {
    let extent = texture.extent();
    let row_pitch = texture.row_pitch() as u64;
    if row_pitch == 0 {
        return extent;
    }
    let rows_available = (buffer_size / row_pitch) as u32;
    if extent.depth > 1 {
        let rows_per_slice = extent.height;
        let slices = (rows_available / rows_per_slice).min(extent.depth);
        vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: slices,
        }
    } else {
        vk::Extent3D {
            width: extent.width,
            height: rows_available.min(extent.height),
            depth: 1,
        }
    }
}

impl Resource {
    /// The general resource-to-resource copy. Requires
    /// `self.size <= destination.size`; blocks until the GPU copy is
    /// complete. Resources on different devices are bridged through a
    /// CPU round-trip.
    pub fn copy_to(&self, dst: &Resource) -> Result<()> {
        if self.size() > dst.size() {
            return Err(Error::validation(format!(
                "cannot copy {} bytes into a resource of {} bytes",
                self.size(),
                dst.size()
            )));
        }

        if !Arc::ptr_eq(&self.device, &dst.device) {
            let data = self.readback(0, 0)?;
            return dst.upload(&data, 0);
        }

        match (self.is_buffer(), dst.is_buffer()) {
            (true, true) => self.copy_buffer_to_buffer(dst, self.size(), 0, 0),
            (true, false) => self.copy_buffer_to_texture(dst),
            (false, true) => self.copy_texture_to_buffer(dst),
            (false, false) => self.copy_texture_to_texture(dst),
        }
    }

    /// Buffer-to-buffer copy of an explicit byte range. `size == 0`
    /// means "as much as both ranges allow".
    pub fn copy_to_region(
        &self,
        dst: &Resource,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<()> {
        if !self.is_buffer() || !dst.is_buffer() {
            return Err(Error::validation(
                "region copies are only defined between buffers",
            ));
        }
        if src_offset > self.size() || dst_offset > dst.size() {
            return Err(Error::validation("copy offset beyond resource size"));
        }
        let size = if size == 0 {
            (self.size() - src_offset).min(dst.size() - dst_offset)
        } else {
            size
        };
        if super::resource::range_overflows(src_offset, size, self.size())
            || super::resource::range_overflows(dst_offset, size, dst.size())
        {
            return Err(Error::validation(format!(
                "copy of {} bytes at offsets {}/{} overflows {}/{}-byte resources",
                size,
                src_offset,
                dst_offset,
                self.size(),
                dst.size()
            )));
        }
        // A zero-byte range (explicit, or an offset at the very end of
        // either buffer) has nothing to record.
        if size == 0 {
            return Ok(());
        }

        if !Arc::ptr_eq(&self.device, &dst.device) {
            let data = self.readback(size, src_offset)?;
            return dst.upload(&data, dst_offset);
        }

        self.copy_buffer_to_buffer(dst, size, src_offset, dst_offset)
    }

    fn copy_buffer_to_buffer(
        &self,
        dst: &Resource,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<()> {
        let device = &self.device;
        let src_buffer = self
            .vk_buffer()
            .ok_or_else(|| Error::validation("copy source must be a buffer"))?;
        let dst_buffer = dst
            .vk_buffer()
            .ok_or_else(|| Error::validation("copy destination must be a buffer"))?;
        device.submit_and_wait(|cmd| {
            let copy = vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            };
            unsafe {
                device
                    .raw
                    .cmd_copy_buffer(cmd, src_buffer, dst_buffer, &[copy]);
            }
            Ok(())
        })
    }

    fn copy_buffer_to_texture(&self, dst: &Resource) -> Result<()> {
        let device = &self.device;
        let dst_image = dst
            .vk_image()
            .ok_or_else(|| Error::validation("copy destination must be a texture"))?;
        let dst_prior = *dst.layout.lock();
        let extent = buffer_covered_extent(self.size(), dst);
        if extent.height == 0 || extent.depth == 0 {
            // Less than one full row of source bytes.
            return Ok(());
        }

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: color_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: extent,
        };

        if self.heap_kind().is_cpu_visible() {
            // CPU-readable source: one direct pitch-aware transfer.
            let src_buffer = self
                .vk_buffer()
                .ok_or_else(|| Error::validation("copy source must be a buffer"))?;
            return device.submit_and_wait(|cmd| {
                let round_trip = LayoutRoundTrip::enter(
                    device,
                    cmd,
                    dst_image,
                    dst_prior,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                unsafe {
                    device.raw.cmd_copy_buffer_to_image(
                        cmd,
                        src_buffer,
                        dst_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                round_trip.exit(device, cmd);
                Ok(())
            });
        }

        // Device-local source: route through its CPU-visible staging
        // shadow in a single submission.
        let src_buffer = self
            .vk_buffer()
            .ok_or_else(|| Error::validation("copy source must be a buffer"))?;
        let staging = self.staging_buffer()?;
        let staging_buffer = staging
            .vk_buffer()
            .ok_or_else(|| Error::validation("staging buffer is not a buffer"))?;
        device.submit_and_wait(|cmd| {
            let copy = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.size(),
            };
            unsafe {
                device
                    .raw
                    .cmd_copy_buffer(cmd, src_buffer, staging_buffer, &[copy]);
            }
            buffer_barrier(device, cmd, staging_buffer, self.size());
            let round_trip = LayoutRoundTrip::enter(
                device,
                cmd,
                dst_image,
                dst_prior,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            unsafe {
                device.raw.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            round_trip.exit(device, cmd);
            Ok(())
        })
    }

    fn copy_texture_to_buffer(&self, dst: &Resource) -> Result<()> {
        // A buffer copy always lands packed (no hidden native pitch),
        // so the repack branch of the readback path is the no-op case
        // here; readback2d handles caller-specified pitches.
        let device = &self.device;
        let src_image = self
            .vk_image()
            .ok_or_else(|| Error::validation("copy source must be a texture"))?;
        let dst_buffer = dst
            .vk_buffer()
            .ok_or_else(|| Error::validation("copy destination must be a buffer"))?;
        let src_prior = *self.layout.lock();

        device.submit_and_wait(|cmd| {
            let round_trip = LayoutRoundTrip::enter(
                device,
                cmd,
                src_image,
                src_prior,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: color_layers(),
                image_offset: vk::Offset3D::default(),
                image_extent: self.extent(),
            };
            unsafe {
                device.raw.cmd_copy_image_to_buffer(
                    cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_buffer,
                    &[region],
                );
            }
            round_trip.exit(device, cmd);
            Ok(())
        })
    }

    fn copy_texture_to_texture(&self, dst: &Resource) -> Result<()> {
        let device = &self.device;
        let src_image = self
            .vk_image()
            .ok_or_else(|| Error::validation("copy source must be a texture"))?;
        let dst_image = dst
            .vk_image()
            .ok_or_else(|| Error::validation("copy destination must be a texture"))?;
        let src_prior = *self.layout.lock();
        let dst_prior = *dst.layout.lock();

        let src_extent = self.extent();
        let dst_extent = dst.extent();
        let extent = vk::Extent3D {
            width: src_extent.width.min(dst_extent.width),
            height: src_extent.height.min(dst_extent.height),
            depth: src_extent.depth.min(dst_extent.depth),
        };

        device.submit_and_wait(|cmd| {
            let src_trip = LayoutRoundTrip::enter(
                device,
                cmd,
                src_image,
                src_prior,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );
            let dst_trip = LayoutRoundTrip::enter(
                device,
                cmd,
                dst_image,
                dst_prior,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let copy = vk::ImageCopy {
                src_subresource: color_layers(),
                src_offset: vk::Offset3D::default(),
                dst_subresource: color_layers(),
                dst_offset: vk::Offset3D::default(),
                extent,
            };
            unsafe {
                device.raw.cmd_copy_image(
                    cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy],
                );
            }
            // Restore in reverse, and only the barriers that were
            // actually issued.
            dst_trip.exit(device, cmd);
            src_trip.exit(device, cmd);
            Ok(())
        })
    }
}
