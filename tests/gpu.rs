// Device-requiring integration tests.
//
// Everything here talks to a live Vulkan driver and is therefore ignored
// by default; run with `cargo test -- --ignored` on a machine with a GPU.

use ash::vk;
use std::sync::Arc;

use renderer_core::{Config, Device, QueueType, RecordState, RenderError};

fn test_device() -> Arc<Device> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = Config::default();
    config.debug.validation_layers = false;

    Device::new("renderer-core tests", &config).expect("failed to create a headless device")
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn creates_headless_device() {
    let device = test_device();
    assert!(device.wait_idle().is_ok());
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn zero_sized_buffer_is_rejected_before_allocation() {
    let device = test_device();

    let result = device.create_buffer(
        0,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        vk::SharingMode::EXCLUSIVE,
    );

    assert!(matches!(result, Err(RenderError::InvalidParameters)));
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn zero_sized_image_is_rejected_before_allocation() {
    let device = test_device();

    let result = device.create_image(
        0,
        64,
        vk::Format::R8G8B8A8_SRGB,
        vk::ImageTiling::OPTIMAL,
        vk::ImageAspectFlags::COLOR,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
    );

    assert!(matches!(result, Err(RenderError::InvalidParameters)));
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn buffer_map_contract_is_enforced() {
    let device = test_device();

    let mut buffer = device
        .create_buffer(
            256,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::SharingMode::EXCLUSIVE,
        )
        .unwrap();

    // mapping twice without an unmap is a contract violation
    let address = buffer.map(256, 0).unwrap();
    assert!(!address.is_null());
    assert!(matches!(buffer.map(256, 0), Err(RenderError::InvalidState)));

    buffer.unmap().unwrap();
    assert!(matches!(buffer.unmap(), Err(RenderError::InvalidState)));

    // zero-sized mappings are malformed
    assert!(matches!(buffer.map(0, 0), Err(RenderError::InvalidParameters)));
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn copy_rejects_device_local_buffers() {
    let device = test_device();

    let mut buffer = device
        .create_buffer(
            256,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::SharingMode::EXCLUSIVE,
        )
        .unwrap();

    let data = [0u8; 256];
    assert!(matches!(buffer.copy(&data, 0), Err(RenderError::InvalidState)));
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn command_buffer_walks_the_state_machine() {
    let device = test_device();

    let mut commands = device.create_command_buffer(QueueType::Graphics).unwrap();
    assert_eq!(commands.record_state(), RecordState::Initialized);

    // reset and end are illegal before recording started
    assert!(matches!(commands.reset(), Err(RenderError::InvalidState)));
    assert!(matches!(commands.end(), Err(RenderError::InvalidState)));

    commands.begin().unwrap();
    assert_eq!(commands.record_state(), RecordState::Recording);
    assert!(matches!(commands.begin(), Err(RenderError::InvalidState)));
    assert!(matches!(commands.reset(), Err(RenderError::InvalidState)));

    commands.end().unwrap();
    assert_eq!(commands.record_state(), RecordState::Recorded);
    assert!(matches!(commands.end(), Err(RenderError::InvalidState)));

    commands.reset().unwrap();
    assert_eq!(commands.record_state(), RecordState::Initialized);
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn single_pass_rerecords_from_recorded_state() {
    let device = test_device();

    let mut commands = device.create_command_buffer(QueueType::Graphics).unwrap();

    // re-recording the identical command list from Recorded is legal and
    // produces the same recorded contents each time
    commands.write_single_pass(&[]).unwrap();
    assert_eq!(commands.record_state(), RecordState::Recorded);
    commands.write_single_pass(&[]).unwrap();
    assert_eq!(commands.record_state(), RecordState::Recorded);

    commands.submit().unwrap();
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn synchronous_submit_requires_recorded_state() {
    let device = test_device();

    let mut commands = device.create_command_buffer(QueueType::Transfer).unwrap();
    assert!(matches!(commands.submit(), Err(RenderError::InvalidState)));

    commands.begin().unwrap();
    assert!(matches!(commands.submit(), Err(RenderError::InvalidState)));

    commands.end().unwrap();
    commands.submit().unwrap();
}

#[test]
#[ignore = "requires a Vulkan-capable GPU"]
fn image_upload_runs_barrier_copy_barrier() {
    let device = test_device();

    let pixels = vec![0xffu8; 16 * 16 * 4];
    let mut staging = device
        .create_buffer(
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::SharingMode::EXCLUSIVE,
        )
        .unwrap();
    staging.copy(&pixels, 0).unwrap();

    let image = device
        .create_image(
            16,
            16,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageTiling::OPTIMAL,
            vk::ImageAspectFlags::COLOR,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .unwrap();

    image.copy_from_buffer(&staging).unwrap();
    assert!(image.sampler().is_some());
}
