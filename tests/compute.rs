// Compute pipeline creation, binding validation and dispatch.

mod common;

use gpukit::{AddressMode, Error, Filter, Format, HeapKind};

#[test]
fn dispatch_with_no_bindings() {
    let Some(device) = common::gpu() else { return };
    let pipeline = device
        .create_compute(&common::noop_shader(), &[], &[], &[], &[], None)
        .unwrap();
    pipeline.dispatch(1, 1, 1).unwrap();
    // The synchronous model allows immediate re-dispatch.
    pipeline.dispatch(4, 2, 1).unwrap();
}

#[test]
fn dispatch_with_bound_resources() {
    let Some(device) = common::gpu() else { return };
    let constants = device
        .create_buffer(HeapKind::Default, 64, 0, None)
        .unwrap();
    let input = device
        .create_buffer(HeapKind::Default, 256, 4, None)
        .unwrap();
    let output = device
        .create_buffer(HeapKind::Default, 256, 4, None)
        .unwrap();

    let pipeline = device
        .create_compute(
            &common::noop_shader(),
            std::slice::from_ref(&constants),
            std::slice::from_ref(&input),
            std::slice::from_ref(&output),
            &[],
            None,
        )
        .unwrap();
    assert_eq!(pipeline.resources().len(), 3);
    pipeline.dispatch(1, 1, 1).unwrap();
}

#[test]
fn dispatch_with_texture_bindings() {
    let Some(device) = common::gpu() else { return };
    let source = device
        .create_texture2d(16, 16, Format::R8G8B8A8Unorm, None)
        .unwrap();
    let target = device
        .create_texture2d(16, 16, Format::R8G8B8A8Unorm, None)
        .unwrap();

    let pipeline = device
        .create_compute(
            &common::noop_shader(),
            &[],
            std::slice::from_ref(&source),
            std::slice::from_ref(&target),
            &[],
            None,
        )
        .unwrap();
    pipeline.dispatch(2, 2, 1).unwrap();
}

#[test]
fn dispatch_with_sampler_bindings() {
    let Some(device) = common::gpu() else { return };
    let texture = device
        .create_texture2d(16, 16, Format::R8G8B8A8Unorm, None)
        .unwrap();
    let sampler = device
        .create_sampler(
            AddressMode::Wrap,
            AddressMode::Mirror,
            AddressMode::Clamp,
            Filter::Point,
            Filter::Linear,
        )
        .unwrap();

    let pipeline = device
        .create_compute(
            &common::noop_shader(),
            &[],
            std::slice::from_ref(&texture),
            &[],
            std::slice::from_ref(&sampler),
            None,
        )
        .unwrap();
    assert_eq!(pipeline.samplers().len(), 1);
    assert_eq!(
        pipeline.samplers()[0].address_modes(),
        (AddressMode::Wrap, AddressMode::Mirror, AddressMode::Clamp)
    );
    pipeline.dispatch(1, 1, 1).unwrap();

    // A pipeline binding only samplers is legal as well.
    let sampler_only = device
        .create_compute(
            &common::noop_shader(),
            &[],
            &[],
            &[],
            std::slice::from_ref(&sampler),
            None,
        )
        .unwrap();
    sampler_only.dispatch(1, 1, 1).unwrap();
}

#[test]
fn constant_bindings_must_be_aligned_default_buffers() {
    let Some(device) = common::gpu() else { return };

    // 50 bytes is not 16-byte aligned.
    let unaligned = device.create_buffer(HeapKind::Default, 50, 0, None).unwrap();
    let result = device.create_compute(
        &common::noop_shader(),
        std::slice::from_ref(&unaligned),
        &[],
        &[],
        &[],
        None,
    );
    assert!(matches!(result, Err(Error::Validation(_))));

    // Upload-heap buffers cannot back constants either.
    let upload = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();
    let result = device.create_compute(
        &common::noop_shader(),
        std::slice::from_ref(&upload),
        &[],
        &[],
        &[],
        None,
    );
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn cpu_heap_resources_cannot_be_shader_bound() {
    let Some(device) = common::gpu() else { return };
    let upload = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();

    let as_read = device.create_compute(
        &common::noop_shader(),
        &[],
        std::slice::from_ref(&upload),
        &[],
        &[],
        None,
    );
    assert!(matches!(as_read, Err(Error::Validation(_))));

    let as_readwrite = device.create_compute(
        &common::noop_shader(),
        &[],
        &[],
        std::slice::from_ref(&upload),
        &[],
        None,
    );
    assert!(matches!(as_readwrite, Err(Error::Validation(_))));
}

#[test]
fn malformed_shader_blobs_are_rejected() {
    let Some(device) = common::gpu() else { return };
    assert!(device.create_compute(&[], &[], &[], &[], &[], None).is_err());
    assert!(device
        .create_compute(&[1, 2, 3], &[], &[], &[], &[], None)
        .is_err());
}

#[test]
fn binding_validation_runs_before_shader_parsing() {
    let Some(device) = common::gpu() else { return };
    let upload = device.create_buffer(HeapKind::Upload, 64, 0, None).unwrap();

    // An invalid binding set fails as a validation error even when the
    // shader bytes are garbage.
    let result = device.create_compute(
        b"not spirv at all",
        &[],
        std::slice::from_ref(&upload),
        &[],
        &[],
        None,
    );
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn shader_writes_are_visible_to_readback() {
    let Some(device) = common::gpu() else { return };

    // The no-op kernel writes nothing; the sequence still proves an
    // upload, a dispatch touching the buffer binding and a readback
    // interleave without corruption.
    let buffer = device.create_buffer(HeapKind::Default, 64, 4, None).unwrap();
    let data: Vec<u8> = (0..64).collect();
    buffer.upload(&data, 0).unwrap();

    let pipeline = device
        .create_compute(
            &common::noop_shader(),
            &[],
            &[],
            std::slice::from_ref(&buffer),
            &[],
            None,
        )
        .unwrap();
    pipeline.dispatch(1, 1, 1).unwrap();
    assert_eq!(buffer.readback(0, 0).unwrap(), data);
}
