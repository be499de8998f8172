use bunnymark_vk::batch::{instance_bytes, InstanceAllocator, InstanceStorage, DEFAULT_BATCH_SIZE};
use bunnymark_vk::gpu::buffer::{Buffer, BufferClass};
use bunnymark_vk::gpu::context::{ContextOptions, GpuContext};
use bunnymark_vk::sprite::{Sprite, SpriteInstance, TextureRegion};
use vulkanalia::vk;

fn headless() -> Option<GpuContext> {
    match unsafe { GpuContext::new(None, &ContextOptions::default()) } {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no usable Vulkan implementation ({e:#})");
            None
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

#[test]
fn staged_upload_reads_back_identically() {
    let Some(ctx) = headless() else { return };

    for len in [1, 3, 24, 4096, DEFAULT_BATCH_SIZE * 24] {
        let bytes = pattern(len);
        let mut buffer = unsafe {
            Buffer::new(
                &ctx,
                BufferClass::Device,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                len as u64,
                false,
            )
        }
        .unwrap();

        unsafe { buffer.upload_from_staging(&ctx, &bytes) }.unwrap();
        let read = unsafe { buffer.read_back(&ctx) }.unwrap();

        assert_eq!(&read[..len], &bytes[..], "size {len}");
    }
}

// Bits of every memory type the host cannot map
fn device_private_types(ctx: &GpuContext) -> u32 {
    let properties = &ctx.memory_properties;
    (0..properties.memory_type_count)
        .filter(|&i| {
            !properties.memory_types[i as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        })
        .fold(0, |bits, i| bits | 1 << i)
}

#[test]
fn upload_through_staging_copy_reads_back_identically() {
    let Some(ctx) = headless() else { return };
    let private = device_private_types(&ctx);
    if private == 0 {
        eprintln!("skipping: every memory type on `{}` is host visible", ctx.device_name());
        return;
    }

    for len in [1, 3, 24, 4096, DEFAULT_BATCH_SIZE * 24] {
        let bytes = pattern(len);
        let mut buffer = unsafe {
            Buffer::with_memory_types(
                &ctx,
                BufferClass::Device,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                len as u64,
                false,
                private,
            )
        }
        .unwrap();
        assert!(!buffer.is_host_visible(), "size {len}");
        assert!(unsafe { buffer.map() }.is_err());

        unsafe { buffer.upload_from_staging(&ctx, &bytes) }.unwrap();
        let read = unsafe { buffer.read_back(&ctx) }.unwrap();

        assert_eq!(&read[..len], &bytes[..], "size {len}");
    }
}

#[test]
fn many_instance_buffers_share_allocator_blocks() {
    let Some(ctx) = headless() else { return };

    let buffers = (0..256)
        .map(|_| ctx.allocate_instances(DEFAULT_BATCH_SIZE))
        .collect::<anyhow::Result<Vec<_>>>()
        .unwrap();

    assert!(buffers.iter().all(|b| b.is_mapped()));
}

#[test]
fn oversized_upload_is_rejected() {
    let Some(ctx) = headless() else { return };

    let mut buffer = unsafe {
        Buffer::new(
            &ctx,
            BufferClass::Staging,
            vk::BufferUsageFlags::empty(),
            16,
            false,
        )
    }
    .unwrap();

    assert!(unsafe { buffer.upload_from_staging(&ctx, &pattern(17)) }.is_err());
}

#[test]
fn zero_sized_buffer_is_rejected() {
    let Some(ctx) = headless() else { return };

    let result = unsafe {
        Buffer::new(
            &ctx,
            BufferClass::Transient,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            0,
            true,
        )
    };

    assert!(result.is_err());
}

#[test]
fn instance_storage_is_persistently_mapped() {
    let Some(ctx) = headless() else { return };

    let mut rng = fastrand::Rng::with_seed(11);
    let instances: Vec<SpriteInstance> = (0..DEFAULT_BATCH_SIZE)
        .map(|_| Sprite::spawn(TextureRegion::new(3), &mut rng).instance())
        .collect();

    let mut storage = ctx.allocate_instances(instances.len()).unwrap();
    assert_eq!(storage.size(), instance_bytes(instances.len()));
    assert!(storage.is_mapped());

    storage.write_instances(&instances).unwrap();
    assert!(storage.is_mapped());

    let read = unsafe { storage.read_back(&ctx) }.unwrap();
    assert_eq!(read, bytemuck::cast_slice::<SpriteInstance, u8>(&instances));
}
