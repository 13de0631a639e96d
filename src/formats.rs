// Pixel format table
//
// Maps the abstract format enumeration to vk::Format identifiers and
// byte-per-pixel sizes. Every other module goes through this table;
// nothing else hardcodes a native format.

use ash::vk;

use crate::error::{Error, Result};

/// Abstract pixel formats usable for typed buffers and textures.
///
/// The raw `u32` discriminants are stable and part of the public
/// surface: `0` is reserved for "no format" (raw buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Format {
    R32G32B32A32Float = 1,
    R32G32B32A32Uint = 2,
    R32G32B32A32Sint = 3,
    R16G16B16A16Float = 4,
    R16G16B16A16Unorm = 5,
    R16G16B16A16Uint = 6,
    R16G16B16A16Sint = 7,
    R32G32Float = 8,
    R32G32Uint = 9,
    R32G32Sint = 10,
    R8G8B8A8Unorm = 11,
    R8G8B8A8UnormSrgb = 12,
    R8G8B8A8Uint = 13,
    R8G8B8A8Sint = 14,
    B8G8R8A8Unorm = 15,
    B8G8R8A8UnormSrgb = 16,
    R16G16Float = 17,
    R16G16Uint = 18,
    R16G16Sint = 19,
    R32Float = 20,
    R32Uint = 21,
    R32Sint = 22,
    R16Float = 23,
    R16Unorm = 24,
    R16Uint = 25,
    R16Sint = 26,
    R8G8Unorm = 27,
    R8G8Uint = 28,
    R8G8Sint = 29,
    R8Unorm = 30,
    R8Uint = 31,
    R8Sint = 32,
}

impl Format {
    /// Bytes per pixel.
    pub fn pixel_size(self) -> u32 {
        use Format::*;
        match self {
            R32G32B32A32Float | R32G32B32A32Uint | R32G32B32A32Sint => 16,
            R16G16B16A16Float | R16G16B16A16Unorm | R16G16B16A16Uint | R16G16B16A16Sint => 8,
            R32G32Float | R32G32Uint | R32G32Sint => 8,
            R8G8B8A8Unorm | R8G8B8A8UnormSrgb | R8G8B8A8Uint | R8G8B8A8Sint => 4,
            B8G8R8A8Unorm | B8G8R8A8UnormSrgb => 4,
            R16G16Float | R16G16Uint | R16G16Sint => 4,
            R32Float | R32Uint | R32Sint => 4,
            R16Float | R16Unorm | R16Uint | R16Sint => 2,
            R8G8Unorm | R8G8Uint | R8G8Sint => 2,
            R8Unorm | R8Uint | R8Sint => 1,
        }
    }

    /// The native Vulkan format backing this entry.
    pub fn to_vk(self) -> vk::Format {
        use Format::*;
        match self {
            R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
            R32G32B32A32Uint => vk::Format::R32G32B32A32_UINT,
            R32G32B32A32Sint => vk::Format::R32G32B32A32_SINT,
            R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
            R16G16B16A16Unorm => vk::Format::R16G16B16A16_UNORM,
            R16G16B16A16Uint => vk::Format::R16G16B16A16_UINT,
            R16G16B16A16Sint => vk::Format::R16G16B16A16_SINT,
            R32G32Float => vk::Format::R32G32_SFLOAT,
            R32G32Uint => vk::Format::R32G32_UINT,
            R32G32Sint => vk::Format::R32G32_SINT,
            R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            R8G8B8A8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
            R8G8B8A8Uint => vk::Format::R8G8B8A8_UINT,
            R8G8B8A8Sint => vk::Format::R8G8B8A8_SINT,
            B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            B8G8R8A8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
            R16G16Float => vk::Format::R16G16_SFLOAT,
            R16G16Uint => vk::Format::R16G16_UINT,
            R16G16Sint => vk::Format::R16G16_SINT,
            R32Float => vk::Format::R32_SFLOAT,
            R32Uint => vk::Format::R32_UINT,
            R32Sint => vk::Format::R32_SINT,
            R16Float => vk::Format::R16_SFLOAT,
            R16Unorm => vk::Format::R16_UNORM,
            R16Uint => vk::Format::R16_UINT,
            R16Sint => vk::Format::R16_SINT,
            R8G8Unorm => vk::Format::R8G8_UNORM,
            R8G8Uint => vk::Format::R8G8_UINT,
            R8G8Sint => vk::Format::R8G8_SINT,
            R8Unorm => vk::Format::R8_UNORM,
            R8Uint => vk::Format::R8_UINT,
            R8Sint => vk::Format::R8_SINT,
        }
    }

    /// Looks up the format for a raw code. `0` means "no format" and
    /// maps to `None`; any other unknown code is an error.
    pub fn from_raw(code: u32) -> Result<Option<Format>> {
        use Format::*;
        let format = match code {
            0 => return Ok(None),
            1 => R32G32B32A32Float,
            2 => R32G32B32A32Uint,
            3 => R32G32B32A32Sint,
            4 => R16G16B16A16Float,
            5 => R16G16B16A16Unorm,
            6 => R16G16B16A16Uint,
            7 => R16G16B16A16Sint,
            8 => R32G32Float,
            9 => R32G32Uint,
            10 => R32G32Sint,
            11 => R8G8B8A8Unorm,
            12 => R8G8B8A8UnormSrgb,
            13 => R8G8B8A8Uint,
            14 => R8G8B8A8Sint,
            15 => B8G8R8A8Unorm,
            16 => B8G8R8A8UnormSrgb,
            17 => R16G16Float,
            18 => R16G16Uint,
            19 => R16G16Sint,
            20 => R32Float,
            21 => R32Uint,
            22 => R32Sint,
            23 => R16Float,
            24 => R16Unorm,
            25 => R16Uint,
            26 => R16Sint,
            27 => R8G8Unorm,
            28 => R8G8Uint,
            29 => R8G8Sint,
            30 => R8Unorm,
            31 => R8Uint,
            32 => R8Sint,
            other => return Err(Error::UnknownFormat(other)),
        };
        Ok(Some(format))
    }

    /// True for the 4x8-bit BGRA layouts that lack native format-less
    /// storage-image reads on some hardware (see the SPIR-V patching in
    /// `backend::spirv`).
    pub(crate) fn is_bgra8(self) -> bool {
        matches!(self, Format::B8G8R8A8Unorm | Format::B8G8R8A8UnormSrgb)
    }
}
