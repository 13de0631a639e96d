// Texture round-trips and buffer<->texture reinterpretation.

mod common;

use gpukit::{Error, Format, HeapKind};

#[test]
fn texture_roundtrip_through_buffers() {
    let Some(device) = common::gpu() else { return };
    let texture = device
        .create_texture2d(8, 8, Format::R8G8B8A8Unorm, None)
        .unwrap();
    let size = texture.size();
    assert_eq!(size, 8 * 8 * 4);

    let src = device.create_buffer(HeapKind::Upload, size, 0, None).unwrap();
    let dst = device
        .create_buffer(HeapKind::Readback, size, 0, None)
        .unwrap();

    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    src.upload(&data, 0).unwrap();
    src.copy_to(&texture).unwrap();
    texture.copy_to(&dst).unwrap();
    assert_eq!(dst.readback(0, 0).unwrap(), data);
}

#[test]
fn upload2d_and_readback2d_drop_pitch_padding() {
    let Some(device) = common::gpu() else { return };
    let buffer = device
        .create_buffer(HeapKind::Upload, 1024, 0, None)
        .unwrap();
    buffer.upload(&[0u8; 1024], 0).unwrap();

    // 64-pixel rows (256 bytes each when packed) on a 320-byte pitch.
    let packed: Vec<u8> = (0..3 * 256).map(|i| (i % 199) as u8).collect();
    buffer.upload2d(&packed, 320, 64, 3, 4).unwrap();

    let out = buffer.readback2d(320, 64, 3, 4).unwrap();
    assert_eq!(out, packed);

    // The padding bytes between rows were never touched.
    let raw = buffer.readback(0, 0).unwrap();
    assert_eq!(&raw[..256], &packed[..256]);
    assert_eq!(&raw[256..320], &[0u8; 64]);
    assert_eq!(&raw[320..576], &packed[256..512]);
}

#[test]
fn upload2d_stops_when_the_source_runs_out() {
    let Some(device) = common::gpu() else { return };
    let buffer = device
        .create_buffer(HeapKind::Upload, 1024, 0, None)
        .unwrap();
    buffer.upload(&[0u8; 1024], 0).unwrap();

    // Two full 16-byte rows from 32 source bytes, rows 2 and 3 untouched.
    buffer.upload2d(&[9u8; 32], 256, 4, 4, 4).unwrap();
    let raw = buffer.readback(0, 0).unwrap();
    assert_eq!(&raw[..16], &[9u8; 16]);
    assert_eq!(&raw[256..272], &[9u8; 16]);
    assert_eq!(&raw[512..528], &[0u8; 16]);
}

#[test]
fn texture_to_texture_copies_the_overlap() {
    let Some(device) = common::gpu() else { return };
    let big = device
        .create_texture2d(4, 4, Format::R8G8B8A8Unorm, None)
        .unwrap();
    let small = device
        .create_texture2d(2, 2, Format::R8G8B8A8Unorm, None)
        .unwrap();

    let data: Vec<u8> = (0..64).collect();
    let upload = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();
    upload.upload(&data, 0).unwrap();
    upload.copy_to(&big).unwrap();

    // Only the top-left 2x2 block fits.
    big.copy_to(&small).unwrap();

    let readback = device
        .create_buffer(HeapKind::Readback, 16, 0, None)
        .unwrap();
    small.copy_to(&readback).unwrap();
    let out = readback.readback(0, 0).unwrap();
    assert_eq!(&out[..8], &data[..8]);
    assert_eq!(&out[8..], &data[16..24]);
}

#[test]
fn partial_buffer_fills_whole_rows_only() {
    let Some(device) = common::gpu() else { return };
    let texture = device
        .create_texture2d(4, 4, Format::R8G8B8A8Unorm, None)
        .unwrap();

    // 40 bytes cover two 16-byte rows; the rest of the texture is
    // whatever it was (zero-initialized here via a full upload first).
    let zero = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();
    zero.upload(&[0u8; 64], 0).unwrap();
    zero.copy_to(&texture).unwrap();

    let partial = device.create_buffer(HeapKind::Upload, 40, 0, None).unwrap();
    partial.upload(&[5u8; 40], 0).unwrap();
    partial.copy_to(&texture).unwrap();

    let readback = device
        .create_buffer(HeapKind::Readback, 64, 0, None)
        .unwrap();
    texture.copy_to(&readback).unwrap();
    let out = readback.readback(0, 0).unwrap();
    assert_eq!(&out[..32], &[5u8; 32]);
    assert_eq!(&out[32..], &[0u8; 32]);
}

#[test]
fn partial_texture_upload_preserves_surrounding_texels() {
    let Some(device) = common::gpu() else { return };
    let texture = device
        .create_texture2d(4, 4, Format::R8G8B8A8Unorm, None)
        .unwrap();

    let data: Vec<u8> = (0..64).collect();
    let upload = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();
    upload.upload(&data, 0).unwrap();
    upload.copy_to(&texture).unwrap();

    // Overwriting one pixel through the staged path must leave every
    // other texel exactly as it was.
    texture.upload(&[9u8; 4], 0).unwrap();

    let readback = device
        .create_buffer(HeapKind::Readback, 64, 0, None)
        .unwrap();
    texture.copy_to(&readback).unwrap();
    let out = readback.readback(0, 0).unwrap();
    assert_eq!(&out[..4], &[9u8; 4]);
    assert_eq!(&out[4..], &data[4..]);
}

#[test]
fn textures_require_the_default_heap() {
    let Some(device) = common::gpu() else { return };
    let heap = device.create_heap(HeapKind::Upload, 1 << 20).unwrap();
    let placed = device.create_texture2d(
        16,
        16,
        Format::R8G8B8A8Unorm,
        Some(gpukit::HeapPlacement { heap, offset: 0 }),
    );
    assert!(matches!(placed, Err(Error::Validation(_))));
}

#[test]
fn texture_dimension_validation() {
    let Some(device) = common::gpu() else { return };
    assert!(device
        .create_texture2d(0, 4, Format::R8G8B8A8Unorm, None)
        .is_err());
    assert!(device
        .create_texture3d(4, 4, 0, Format::R8G8B8A8Unorm, None)
        .is_err());
}

#[test]
fn texture3d_roundtrip() {
    let Some(device) = common::gpu() else { return };
    let texture = device
        .create_texture3d(2, 2, 2, Format::R32Float, None)
        .unwrap();
    let size = texture.size();
    assert_eq!(size, 2 * 2 * 2 * 4);

    let src = device.create_buffer(HeapKind::Upload, size, 0, None).unwrap();
    let dst = device
        .create_buffer(HeapKind::Readback, size, 0, None)
        .unwrap();
    let data: Vec<u8> = (0..size as u8).collect();
    src.upload(&data, 0).unwrap();
    src.copy_to(&texture).unwrap();
    texture.copy_to(&dst).unwrap();
    assert_eq!(dst.readback(0, 0).unwrap(), data);
}
