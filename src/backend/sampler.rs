// Samplers
//
// Immutable sampling state for read-only texture bindings. Samplers
// carry no memory of their own and are bound to pipelines through a
// dedicated binding band, separate from the resource bands.

use ash::vk;
use std::sync::Arc;

use super::device::{Device, DeviceInner};
use crate::error::{Result, VkResultExt};

/// Coordinate wrapping outside the [0, 1) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
}

impl AddressMode {
    fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
            AddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }
}

/// Texel filtering for minification and magnification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
}

impl Filter {
    fn to_vk(self) -> vk::Filter {
        match self {
            Filter::Point => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

/// Mip level selection follows the filters: nearest only when both
/// minification and magnification are point sampled.
fn mipmap_mode(filter_min: Filter, filter_mag: Filter) -> vk::SamplerMipmapMode {
    if filter_min == Filter::Point && filter_mag == Filter::Point {
        vk::SamplerMipmapMode::NEAREST
    } else {
        vk::SamplerMipmapMode::LINEAR
    }
}

/// An immutable sampler object.
pub struct Sampler {
    device: Arc<DeviceInner>,
    pub(crate) raw: vk::Sampler,
    address_u: AddressMode,
    address_v: AddressMode,
    address_w: AddressMode,
    filter_min: Filter,
    filter_mag: Filter,
}

impl Sampler {
    pub fn address_modes(&self) -> (AddressMode, AddressMode, AddressMode) {
        (self.address_u, self.address_v, self.address_w)
    }

    pub fn filters(&self) -> (Filter, Filter) {
        (self.filter_min, self.filter_mag)
    }
}

impl Device {
    /// Creates a sampler with per-axis address modes and separate
    /// minification/magnification filters.
    pub fn create_sampler(
        &self,
        address_u: AddressMode,
        address_v: AddressMode,
        address_w: AddressMode,
        filter_min: Filter,
        filter_mag: Filter,
    ) -> Result<Arc<Sampler>> {
        let device = self.inner()?;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(filter_mag.to_vk())
            .min_filter(filter_min.to_vk())
            .mipmap_mode(mipmap_mode(filter_min, filter_mag))
            .address_mode_u(address_u.to_vk())
            .address_mode_v(address_v.to_vk())
            .address_mode_w(address_w.to_vk());
        let raw = unsafe { device.raw.create_sampler(&info, None) }.ctx("creating sampler")?;

        Ok(Arc::new(Sampler {
            device,
            raw,
            address_u,
            address_v,
            address_w,
            filter_min,
            filter_mag,
        }))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_sampler(self.raw, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_modes_map_to_vulkan() {
        assert_eq!(AddressMode::Wrap.to_vk(), vk::SamplerAddressMode::REPEAT);
        assert_eq!(
            AddressMode::Mirror.to_vk(),
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
        assert_eq!(
            AddressMode::Clamp.to_vk(),
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
    }

    #[test]
    fn mipmap_mode_is_nearest_only_for_all_point_filters() {
        assert_eq!(
            mipmap_mode(Filter::Point, Filter::Point),
            vk::SamplerMipmapMode::NEAREST
        );
        assert_eq!(
            mipmap_mode(Filter::Point, Filter::Linear),
            vk::SamplerMipmapMode::LINEAR
        );
        assert_eq!(
            mipmap_mode(Filter::Linear, Filter::Point),
            vk::SamplerMipmapMode::LINEAR
        );
        assert_eq!(
            mipmap_mode(Filter::Linear, Filter::Linear),
            vk::SamplerMipmapMode::LINEAR
        );
    }
}
