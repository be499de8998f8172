use anyhow::{anyhow, bail, Result};
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;
use vulkanalia_vma::{self as vma, Alloc};

use super::context::GpuContext;
use crate::batch::{instance_bytes, InstanceAllocator, InstanceStorage};
use crate::sprite::SpriteInstance;

type Flags = vk::MemoryPropertyFlags;
type AllocationFlags = vma::AllocationCreateFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferClass {
    // Static data read by the GPU every frame
    Device,
    // Per-frame data rewritten through a persistent mapping
    Transient,
    // One-shot upload or readback
    Staging,
}

impl BufferClass {
    pub fn allocation_options(self) -> vma::AllocationOptions {
        match self {
            Self::Device => vma::AllocationOptions {
                usage: vma::MemoryUsage::AutoPreferDevice,
                flags: AllocationFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                    | AllocationFlags::HOST_ACCESS_ALLOW_TRANSFER_INSTEAD,
                preferred_flags: Flags::HOST_VISIBLE,
                ..Default::default()
            },
            Self::Transient => vma::AllocationOptions {
                usage: vma::MemoryUsage::AutoPreferHost,
                flags: AllocationFlags::HOST_ACCESS_SEQUENTIAL_WRITE | AllocationFlags::MAPPED,
                ..Default::default()
            },
            Self::Staging => vma::AllocationOptions {
                usage: vma::MemoryUsage::AutoPreferHost,
                flags: AllocationFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
        }
    }

    pub fn extra_usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Device | Self::Staging => {
                vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC
            }
            Self::Transient => vk::BufferUsageFlags::empty(),
        }
    }
}

pub struct Buffer {
    allocator: Rc<vma::Allocator>,
    buffer: vk::Buffer,
    allocation: Option<vma::Allocation>,
    size: u64,
    flags: Flags,
    mapped: *mut u8,
    persistent: bool,
}

impl Buffer {
    pub unsafe fn new(
        ctx: &GpuContext,
        class: BufferClass,
        usage: vk::BufferUsageFlags,
        size: u64,
        persistent_map: bool,
    ) -> Result<Self> {
        Self::with_memory_types(ctx, class, usage, size, persistent_map, u32::MAX)
    }

    // Like `new`, but only memory types whose bit is set in `memory_types` are considered
    pub unsafe fn with_memory_types(
        ctx: &GpuContext,
        class: BufferClass,
        usage: vk::BufferUsageFlags,
        size: u64,
        persistent_map: bool,
        memory_types: u32,
    ) -> Result<Self> {
        if size == 0 {
            bail!("Cannot create a zero-sized {:?} buffer.", class);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage | class.extra_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let mut options = class.allocation_options();
        options.memory_type_bits = memory_types;
        if persistent_map {
            options.flags |= AllocationFlags::MAPPED;
        }

        let allocator = ctx.allocator().clone();
        let (buffer, allocation) = allocator
            .create_buffer(buffer_info, &options)
            .map_err(|e| anyhow!("Failed to allocate {} byte {:?} buffer: {}", size, class, e))?;

        let info = allocator.get_allocation_info(allocation);

        // Dropping `result` on error releases the buffer and its allocation
        let mut result = Self {
            allocator,
            buffer,
            allocation: Some(allocation),
            size,
            flags: ctx.memory_flags(info.memoryType),
            mapped: std::ptr::null_mut(),
            persistent: false,
        };

        if persistent_map {
            if info.pMappedData.is_null() {
                bail!("{:?} buffer memory is not host visible.", class);
            }
            result.mapped = info.pMappedData.cast();
            result.persistent = true;
        }

        Ok(result)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_host_visible(&self) -> bool {
        self.flags.contains(Flags::HOST_VISIBLE)
    }

    pub fn is_mapped(&self) -> bool {
        !self.mapped.is_null()
    }

    fn allocation(&self) -> Result<vma::Allocation> {
        self.allocation
            .ok_or_else(|| anyhow!("Buffer has been destroyed."))
    }

    pub unsafe fn map(&mut self) -> Result<*mut u8> {
        if !self.is_host_visible() {
            bail!("Buffer memory is not host visible.");
        }
        if self.mapped.is_null() {
            self.mapped = self.allocator.map_memory(self.allocation()?)?;
        }
        Ok(self.mapped)
    }

    pub unsafe fn unmap(&mut self) {
        if self.persistent || self.mapped.is_null() {
            return;
        }
        if let Some(allocation) = self.allocation {
            self.allocator.unmap_memory(allocation);
        }
        self.mapped = std::ptr::null_mut();
    }

    pub unsafe fn upload(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_fits(bytes.len())?;
        let memory = self.map()?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), memory, bytes.len());
        self.flush(vk::WHOLE_SIZE as u64, 0)?;
        self.unmap();
        Ok(())
    }

    // Blocks on the graphics queue when the memory is not host visible
    pub unsafe fn upload_from_staging(&mut self, ctx: &GpuContext, bytes: &[u8]) -> Result<()> {
        self.check_fits(bytes.len())?;
        if self.is_host_visible() {
            return self.upload(bytes);
        }

        let size = bytes.len() as u64;
        let mut staging = Buffer::new(
            ctx,
            BufferClass::Staging,
            vk::BufferUsageFlags::empty(),
            size,
            false,
        )?;
        staging.upload(bytes)?;

        let (src, dst) = (staging.buffer, self.buffer);
        ctx.submit_one_shot(|device, command_buffer| {
            let regions = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(0)
                .size(size);
            device.cmd_copy_buffer(command_buffer, src, dst, &[regions]);
        })
    }

    pub unsafe fn read_back(&mut self, ctx: &GpuContext) -> Result<Vec<u8>> {
        let len = self.size as usize;

        if self.is_host_visible() {
            let memory = self.map()?;
            self.invalidate(vk::WHOLE_SIZE as u64, 0)?;
            let bytes = std::slice::from_raw_parts(memory, len).to_vec();
            self.unmap();
            return Ok(bytes);
        }

        let mut staging = Buffer::new(
            ctx,
            BufferClass::Staging,
            vk::BufferUsageFlags::empty(),
            self.size,
            false,
        )?;

        let (src, dst, size) = (self.buffer, staging.buffer, self.size);
        ctx.submit_one_shot(|device, command_buffer| {
            let regions = vk::BufferCopy::builder()
                .src_offset(0)
                .dst_offset(0)
                .size(size);
            device.cmd_copy_buffer(command_buffer, src, dst, &[regions]);
        })?;

        let memory = staging.map()?;
        staging.invalidate(vk::WHOLE_SIZE as u64, 0)?;
        let bytes = std::slice::from_raw_parts(memory, len).to_vec();
        staging.unmap();
        Ok(bytes)
    }

    pub unsafe fn flush(&self, size: u64, offset: u64) -> Result<()> {
        if self.flags.contains(Flags::HOST_COHERENT) {
            return Ok(());
        }
        self.allocator
            .flush_allocation(self.allocation()?, offset, size)?;
        Ok(())
    }

    pub unsafe fn invalidate(&self, size: u64, offset: u64) -> Result<()> {
        if self.flags.contains(Flags::HOST_COHERENT) {
            return Ok(());
        }
        self.allocator
            .invalidate_allocation(self.allocation()?, offset, size)?;
        Ok(())
    }

    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE as u64,
        }
    }

    // Idempotent. A persistent mapping is released together with its allocation
    pub unsafe fn destroy(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };
        if !self.persistent && !self.mapped.is_null() {
            self.allocator.unmap_memory(allocation);
        }
        self.mapped = std::ptr::null_mut();
        self.persistent = false;
        self.allocator.destroy_buffer(self.buffer, allocation);
        self.buffer = vk::Buffer::null();
    }

    fn check_fits(&self, len: usize) -> Result<()> {
        if len as u64 > self.size {
            bail!("Upload of {} bytes exceeds buffer size {}.", len, self.size);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.destroy() }
    }
}

impl InstanceStorage for Buffer {
    fn write_instances(&mut self, instances: &[SpriteInstance]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(instances);
        self.check_fits(bytes.len())?;
        unsafe {
            let memory = self.map()?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), memory, bytes.len());
            self.flush(vk::WHOLE_SIZE as u64, 0)?;
            self.unmap();
        }
        Ok(())
    }
}

impl InstanceAllocator for GpuContext {
    type Storage = Buffer;

    fn allocate_instances(&self, count: usize) -> Result<Buffer> {
        unsafe {
            Buffer::new(
                self,
                BufferClass::Transient,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                instance_bytes(count),
                true,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_class_prefers_host_visible_but_allows_staging() {
        let options = BufferClass::Device.allocation_options();

        assert!(matches!(options.usage, vma::MemoryUsage::AutoPreferDevice));
        assert!(options.preferred_flags.contains(Flags::HOST_VISIBLE));
        assert!(options.required_flags.is_empty());
        assert!(options
            .flags
            .contains(AllocationFlags::HOST_ACCESS_ALLOW_TRANSFER_INSTEAD));
    }

    #[test]
    fn transient_class_is_mapped_for_sequential_writes() {
        let options = BufferClass::Transient.allocation_options();

        assert!(matches!(options.usage, vma::MemoryUsage::AutoPreferHost));
        assert!(options.flags.contains(
            AllocationFlags::HOST_ACCESS_SEQUENTIAL_WRITE | AllocationFlags::MAPPED
        ));
    }

    #[test]
    fn staging_class_lives_in_host_memory() {
        let options = BufferClass::Staging.allocation_options();

        assert!(matches!(options.usage, vma::MemoryUsage::AutoPreferHost));
        assert!(options.flags.contains(AllocationFlags::HOST_ACCESS_RANDOM));
        assert!(!options.flags.contains(AllocationFlags::MAPPED));
    }

    #[test]
    fn transfer_usage_follows_class() {
        assert!(BufferClass::Device
            .extra_usage()
            .contains(vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(BufferClass::Transient.extra_usage().is_empty());
    }
}
