use anyhow::Result;
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;

use super::context::GpuContext;

// Which slots hold a command buffer matching the current scene
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotValidity {
    valid: Vec<bool>,
}

impl SlotValidity {
    pub fn new(count: usize) -> Self {
        Self {
            valid: vec![false; count],
        }
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    pub fn mark_valid(&mut self, index: usize) {
        if let Some(slot) = self.valid.get_mut(index) {
            *slot = true;
        }
    }

    pub fn invalidate_all(&mut self) {
        self.valid.iter_mut().for_each(|v| *v = false);
    }

    pub fn resize(&mut self, count: usize) {
        self.valid.clear();
        self.valid.resize(count, false);
    }

    // Runs `record` only when `index` is stale, then marks it valid. Returns
    // whether recording happened. A failed recording leaves the slot stale.
    pub fn record_if_stale<F>(&mut self, index: usize, record: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_valid(index) {
            return Ok(false);
        }
        record()?;
        self.mark_valid(index);
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub fence: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
}

// Per-image command buffers and synchronisation, indexed by swapchain image
pub struct FrameRing {
    device: Rc<Device>,
    command_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    spare_acquire: vk::Semaphore,
    validity: SlotValidity,
}

impl FrameRing {
    pub unsafe fn new(ctx: &GpuContext, count: usize) -> Result<Self> {
        let mut ring = Self {
            device: ctx.device.clone(),
            command_pool: ctx.command_pool,
            slots: Vec::new(),
            spare_acquire: vk::Semaphore::null(),
            validity: SlotValidity::new(count),
        };
        ring.spare_acquire = ring.device.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)?;
        ring.create_slots(count)?;
        Ok(ring)
    }

    // Handed to the next acquire
    pub fn spare_semaphore(&self) -> vk::Semaphore {
        self.spare_acquire
    }

    // Waits until the slot's previous submission has retired, then adopts
    // the semaphore just passed to acquire for this image.
    pub unsafe fn begin(&mut self, index: usize) -> Result<FrameSlot> {
        let fence = self.slots[index].fence;
        self.device.wait_for_fences(&[fence], true, u64::MAX)?;
        self.device.reset_fences(&[fence])?;

        let slot = &mut self.slots[index];
        std::mem::swap(&mut slot.image_acquired, &mut self.spare_acquire);
        Ok(*slot)
    }

    pub fn validity_mut(&mut self) -> &mut SlotValidity {
        &mut self.validity
    }

    // Replaces every command buffer for a rebuilt presentation chain and
    // marks every slot stale. The device must be idle.
    pub unsafe fn rebuild(&mut self, count: usize) -> Result<()> {
        if count == self.slots.len() {
            let command_buffers = self.allocate_command_buffers(count)?;
            self.free_command_buffers();
            for (slot, command_buffer) in self.slots.iter_mut().zip(command_buffers) {
                slot.command_buffer = command_buffer;
            }
        } else {
            self.destroy_slots();
            self.create_slots(count)?;
        }
        self.validity.resize(count);
        Ok(())
    }

    unsafe fn allocate_command_buffers(&self, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        Ok(self.device.allocate_command_buffers(&allocate_info)?)
    }

    unsafe fn free_command_buffers(&mut self) {
        let command_buffers = self
            .slots
            .iter()
            .map(|s| s.command_buffer)
            .filter(|c| !c.is_null())
            .collect::<Vec<_>>();
        if !command_buffers.is_empty() {
            self.device
                .free_command_buffers(self.command_pool, &command_buffers);
        }
        self.slots
            .iter_mut()
            .for_each(|s| s.command_buffer = vk::CommandBuffer::null());
    }

    unsafe fn create_slots(&mut self, count: usize) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let command_buffers = self.allocate_command_buffers(count)?;
        for command_buffer in command_buffers {
            // Pushed before creating its objects so a failure still cleans up
            self.slots.push(FrameSlot {
                command_buffer,
                fence: vk::Fence::null(),
                image_acquired: vk::Semaphore::null(),
                render_complete: vk::Semaphore::null(),
            });
            let index = self.slots.len() - 1;
            self.slots[index].fence = self.device.create_fence(&fence_info, None)?;
            self.slots[index].image_acquired = self.device.create_semaphore(&semaphore_info, None)?;
            self.slots[index].render_complete =
                self.device.create_semaphore(&semaphore_info, None)?;
        }
        Ok(())
    }

    unsafe fn destroy_slots(&mut self) {
        self.free_command_buffers();
        for slot in self.slots.drain(..) {
            self.device.destroy_fence(slot.fence, None);
            self.device.destroy_semaphore(slot.image_acquired, None);
            self.device.destroy_semaphore(slot.render_complete, None);
        }
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        unsafe {
            self.destroy_slots();
            self.device.destroy_semaphore(self.spare_acquire, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_slots_start_invalid() {
        let validity = SlotValidity::new(3);
        assert_eq!(validity, SlotValidity { valid: vec![false; 3] });
        assert!((0..3).all(|i| !validity.is_valid(i)));
    }

    #[test]
    fn marking_one_slot_leaves_others_alone() {
        let mut validity = SlotValidity::new(3);
        validity.mark_valid(1);

        assert!(validity.is_valid(1));
        assert!(!validity.is_valid(0));
        assert!(!validity.is_valid(2));
    }

    #[test]
    fn invalidate_all_clears_every_slot() {
        let mut validity = SlotValidity::new(4);
        (0..4).for_each(|i| validity.mark_valid(i));

        validity.invalidate_all();

        assert!((0..4).all(|i| !validity.is_valid(i)));
    }

    #[test]
    fn resize_discards_previous_state() {
        let mut validity = SlotValidity::new(2);
        validity.mark_valid(0);
        validity.mark_valid(1);

        validity.resize(3);

        assert_eq!(validity, SlotValidity::new(3));
    }

    #[test]
    fn stale_slot_is_recorded_once() {
        let mut validity = SlotValidity::new(2);
        let mut records = 0;

        for _ in 0..3 {
            validity
                .record_if_stale(1, || {
                    records += 1;
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(records, 1);
        assert!(validity.is_valid(1));
        assert!(!validity.is_valid(0));
    }

    #[test]
    fn failed_recording_leaves_slot_stale() {
        let mut validity = SlotValidity::new(1);

        let result = validity.record_if_stale(0, || anyhow::bail!("device lost"));

        assert!(result.is_err());
        assert!(!validity.is_valid(0));
        assert!(validity.record_if_stale(0, || Ok(())).unwrap());
    }

    #[test]
    fn out_of_range_slots_are_never_valid() {
        let mut validity = SlotValidity::new(1);
        validity.mark_valid(5);
        assert!(!validity.is_valid(5));
    }
}
