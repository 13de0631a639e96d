// Swapchain - window presentation for compute output
//
// Presentation is a blit: the caller renders into an ordinary texture
// and `present` copies it into the next backbuffer at an offset. There
// is no render pass and no resize handling; the swapchain is created at
// the window's current extent and stays there.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::copy;
use super::device::{Device, DeviceInner};
use super::resource::Resource;
use crate::error::{Error, Result, VkResultExt};
use crate::formats::Format;

pub struct Swapchain {
    device: Arc<DeviceInner>,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    format: Format,
    acquire: vk::Semaphore,
    release: vk::Semaphore,
}

impl Device {
    /// Creates a swapchain over a native window. `buffer_count` is
    /// clamped to the surface's supported range; `present_mode` falls
    /// back to FIFO when the surface does not support it.
    pub fn create_swapchain(
        &self,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        format: Format,
        buffer_count: u32,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Swapchain> {
        if buffer_count == 0 {
            return Err(Error::validation("buffer count must be at least 1"));
        }
        let device = self.inner()?;
        if !device.swapchain_supported {
            return Err(Error::validation(
                "device does not support swapchain presentation",
            ));
        }

        let shared = &device.shared;
        let surface_loader = Surface::new(&shared.entry, &shared.instance);
        let surface = unsafe {
            ash_window::create_surface(
                &shared.entry,
                &shared.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .ctx("creating window surface")?;

        // From here on the surface must be released on failure.
        let mut swapchain = Swapchain {
            device: device.clone(),
            surface_loader,
            surface,
            loader: SwapchainLoader::new(&shared.instance, &device.raw),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            extent: vk::Extent2D::default(),
            format,
            acquire: vk::Semaphore::null(),
            release: vk::Semaphore::null(),
        };
        swapchain.init(buffer_count, present_mode)?;
        Ok(swapchain)
    }
}

impl Swapchain {
    fn init(&mut self, buffer_count: u32, present_mode: vk::PresentModeKHR) -> Result<()> {
        let device = self.device.clone();
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                device.physical,
                device.queue_family,
                self.surface,
            )
        }
        .ctx("querying surface support")?;
        if !supported {
            return Err(Error::validation(
                "compute queue cannot present to this surface",
            ));
        }

        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(device.physical, self.surface)
        }
        .ctx("querying surface capabilities")?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(device.physical, self.surface)
        }
        .ctx("querying surface formats")?;
        let modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(device.physical, self.surface)
        }
        .ctx("querying present modes")?;

        let vk_format = self.format.to_vk();
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk_format)
            .copied()
            .ok_or_else(|| Error::validation("surface does not support the requested format"))?;

        let present_mode = if modes.contains(&present_mode) {
            present_mode
        } else {
            // FIFO support is mandatory.
            vk::PresentModeKHR::FIFO
        };

        let mut image_count = buffer_count.max(caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        // Surfaces report u32::MAX when the window decides the extent;
        // the minimum extent is as good a default as any then.
        self.extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            caps.min_image_extent
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .ctx("creating swapchain")?;

        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }
            .ctx("getting swapchain images")?;
        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}",
            self.extent.width,
            self.extent.height,
            self.images.len(),
            present_mode
        );

        // Backbuffers live in PRESENT_SRC between presents.
        let images = self.images.clone();
        device.submit_and_wait(|cmd| {
            for image in &images {
                copy::image_barrier(
                    &device,
                    cmd,
                    *image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );
            }
            Ok(())
        })?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        self.acquire = unsafe { device.raw.create_semaphore(&semaphore_info, None) }
            .ctx("creating acquire semaphore")?;
        self.release = unsafe { device.raw.create_semaphore(&semaphore_info, None) }
            .ctx("creating release semaphore")?;
        Ok(())
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Copies `source` into the next backbuffer at `(x, y)` and presents
    /// it. The offset is clamped inside the backbuffer and the copied
    /// region is clamped to what both images can hold; the call blocks
    /// until the copy completes.
    pub fn present(&self, source: &Resource, x: u32, y: u32) -> Result<()> {
        if source.is_buffer() {
            return Err(Error::validation("present source must be a texture"));
        }
        let device = &self.device;

        let (index, _suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, self.acquire, vk::Fence::null())
        }
        .ctx("acquiring swapchain image")?;
        let backbuffer = self.images[index as usize];

        let src_extent = source.extent();
        let (x, y, region) = clamp_present_region(
            (src_extent.width, src_extent.height),
            (self.extent.width, self.extent.height),
            x,
            y,
        );
        let src_image = source
            .vk_image()
            .ok_or_else(|| Error::validation("present source must be a texture"))?;

        device.submit_and_wait_ext(
            &[(self.acquire, vk::PipelineStageFlags::TRANSFER)],
            &[self.release],
            |cmd| {
                copy::image_barrier(
                    device,
                    cmd,
                    backbuffer,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                copy::image_barrier(
                    device,
                    cmd,
                    src_image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );

                let copy_region = vk::ImageCopy {
                    src_subresource: copy::color_layers(),
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: copy::color_layers(),
                    dst_offset: vk::Offset3D {
                        x: x as i32,
                        y: y as i32,
                        z: 0,
                    },
                    extent: vk::Extent3D {
                        width: region.0,
                        height: region.1,
                        depth: 1,
                    },
                };
                unsafe {
                    device.raw.cmd_copy_image(
                        cmd,
                        src_image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        backbuffer,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy_region],
                    );
                }

                copy::image_barrier(
                    device,
                    cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::GENERAL,
                );
                copy::image_barrier(
                    device,
                    cmd,
                    backbuffer,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                );
                Ok(())
            },
        )?;

        let wait_semaphores = [self.release];
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        device
            .with_queue(|queue| unsafe { self.loader.queue_present(queue, &present_info) })
            .ctx("presenting swapchain image")?;
        Ok(())
    }
}

/// Clamps the blit offset inside the destination and shrinks the region
/// to fit both images. Returns the clamped `(x, y)` and `(width, height)`.
fn clamp_present_region(
    src: (u32, u32),
    dst: (u32, u32),
    x: u32,
    y: u32,
) -> (u32, u32, (u32, u32)) {
    let x = x.min(dst.0.saturating_sub(1));
    let y = y.min(dst.1.saturating_sub(1));
    let width = src.0.min(dst.0 - x);
    let height = src.1.min(dst.1 - y);
    (x, y, (width, height))
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.device.wait_idle();
        unsafe {
            if self.acquire != vk::Semaphore::null() {
                self.device.raw.destroy_semaphore(self.acquire, None);
            }
            if self.release != vk::Semaphore::null() {
                self.device.raw.destroy_semaphore(self.release, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_uses_full_source_when_it_fits() {
        let (x, y, region) = clamp_present_region((128, 128), (512, 512), 10, 20);
        assert_eq!((x, y), (10, 20));
        assert_eq!(region, (128, 128));
    }

    #[test]
    fn region_shrinks_against_the_far_edge() {
        let (x, y, region) = clamp_present_region((128, 128), (150, 150), 100, 100);
        assert_eq!((x, y), (100, 100));
        assert_eq!(region, (50, 50));
    }

    #[test]
    fn offset_is_clamped_inside_the_backbuffer() {
        let (x, y, region) = clamp_present_region((64, 64), (100, 100), 500, 500);
        assert_eq!((x, y), (99, 99));
        assert_eq!(region, (1, 1));
    }

    #[test]
    fn small_backbuffer_limits_the_region() {
        let (_, _, region) = clamp_present_region((256, 256), (100, 100), 0, 0);
        assert_eq!(region, (100, 100));
    }
}
