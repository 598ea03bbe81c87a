//! Per-frame resource slots and image-in-flight bookkeeping.
//!
//! `FramePool` owns N fixed slots (uniform buffer + persistent mapping +
//! descriptor set + sync primitives) cycled round-robin to bound in-flight
//! GPU work. `FlightTracker` is the pure bookkeeping half: which slot is
//! current, and which slot's fence owns each swapchain image.

use crate::viewport::ViewportRect;
use ash::{Device, vk};
use log::info;

use super::error::{Error, Result};

/// Uniform payload: left, top, right, bottom as 64-bit floats.
pub const UNIFORM_SIZE: vk::DeviceSize = (4 * std::mem::size_of::<f64>()) as vk::DeviceSize;

pub struct FrameSlot {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    // Persistently mapped at creation; the scheduler never maps per frame.
    mapped: *mut f64,
    pub descriptor_set: vk::DescriptorSet,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    fn new(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let mut slot = Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            mapped: std::ptr::null_mut(),
            descriptor_set: vk::DescriptorSet::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        if let Err(e) = slot.init(device, mem_props, descriptor_pool, set_layout) {
            // Frees whatever init got to; the destroy calls ignore the null
            // handles of steps never reached.
            slot.destroy(device);
            return Err(e);
        }
        Ok(slot)
    }

    fn init(
        &mut self,
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<()> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(UNIFORM_SIZE)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        self.buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(Error::setup("create uniform buffer"))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(self.buffer) };
        let memory_type = find_memory_type(
            mem_props,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or_else(|| {
            Error::setup_message("select uniform memory type", "no compatible memory type")
        })?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        self.memory = unsafe { device.allocate_memory(&alloc_info, None) }
            .map_err(Error::setup("allocate uniform memory"))?;
        unsafe { device.bind_buffer_memory(self.buffer, self.memory, 0) }
            .map_err(Error::setup("bind uniform memory"))?;

        self.mapped = unsafe {
            device.map_memory(self.memory, 0, UNIFORM_SIZE, vk::MemoryMapFlags::empty())
        }
        .map_err(Error::setup("map uniform memory"))? as *mut f64;

        let layouts = [set_layout];
        let set_alloc = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);
        self.descriptor_set = unsafe { device.allocate_descriptor_sets(&set_alloc) }
            .map_err(Error::setup("allocate descriptor set"))?[0];

        // Written once; each slot keeps its own fixed buffer so the set is
        // never rewritten after setup.
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.descriptor_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on this slot returns immediately.
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        self.image_available = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(Error::setup("create semaphore"))?;
        self.render_finished = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(Error::setup("create semaphore"))?;
        self.in_flight = unsafe { device.create_fence(&fence_info, None) }
            .map_err(Error::setup("create fence"))?;
        Ok(())
    }

    /// Copies the viewport rectangle into the mapped uniform. Host-coherent
    /// memory, plain copy; the slot's fence guarantees the GPU is done with
    /// the previous contents.
    pub fn write_rect(&self, rect: &ViewportRect) {
        unsafe {
            std::ptr::copy_nonoverlapping(rect.as_ptr(), self.mapped, rect.len());
        }
    }

    fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

pub struct FramePool {
    pub slots: Vec<FrameSlot>,
    descriptor_pool: vk::DescriptorPool,
}

impl FramePool {
    pub fn new(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        set_layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Self> {
        let pool_size = vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count as u32);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(std::slice::from_ref(&pool_size))
            .max_sets(count as u32);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(Error::setup("create descriptor pool"))?;

        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            match FrameSlot::new(device, mem_props, descriptor_pool, set_layout) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    // Construction aborts; release what was already built.
                    Self { slots, descriptor_pool }.destroy(device);
                    return Err(e);
                }
            }
        }

        info!("frame pool ready with {} slots in flight", count);
        Ok(Self { slots, descriptor_pool })
    }

    pub fn destroy(&self, device: &Device) {
        for slot in &self.slots {
            slot.destroy(device);
        }
        // Descriptor sets are returned with the pool.
        unsafe { device.destroy_descriptor_pool(self.descriptor_pool, None) };
    }
}

/// First-match-wins scan of the device's memory types. Deterministic on a
/// given device, not best-fit.
pub fn find_memory_type(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem_props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && mem_props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Round-robin slot index plus image-to-fence ownership.
///
/// The slot count is fixed at startup; the image count follows the swapchain
/// and may differ from it. An image must not be reused until the fence of the
/// slot that last rendered into it has been observed signaled, which matters
/// whenever the image count exceeds the slot count.
pub struct FlightTracker {
    slot: usize,
    slot_count: usize,
    image_owner: Vec<Option<usize>>,
}

impl FlightTracker {
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        Self {
            slot: 0,
            slot_count,
            image_owner: vec![None; image_count],
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn image_count(&self) -> usize {
        self.image_owner.len()
    }

    /// Records the current slot as owner of `image` and returns the slot that
    /// owned it before, whose fence must be waited on first.
    pub fn claim(&mut self, image: usize) -> Option<usize> {
        self.image_owner[image].replace(self.slot)
    }

    pub fn advance(&mut self) {
        self.slot = (self.slot + 1) % self.slot_count;
    }

    /// Swapchain recreation: all prior ownership is void (the device was
    /// drained) and the image count may have changed.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOTS: usize = 3;

    /// Fence/acquire stand-in: every submission completes the moment its
    /// fence is waited on, and images come back in presentation order.
    struct MockGpu {
        outstanding: Vec<u32>,
        image_count: usize,
        next_image: usize,
    }

    impl MockGpu {
        fn new(image_count: usize) -> Self {
            Self {
                outstanding: vec![0; SLOTS],
                image_count,
                next_image: 0,
            }
        }

        fn wait_fence(&mut self, slot: usize) {
            self.outstanding[slot] = 0;
        }

        fn acquire(&mut self) -> usize {
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            image
        }

        fn submit(&mut self, slot: usize) {
            self.outstanding[slot] += 1;
        }
    }

    fn run_frames(tracker: &mut FlightTracker, gpu: &mut MockGpu, frames: usize) {
        for frame in 0..frames {
            let slot = tracker.slot();
            assert_eq!(slot, frame % SLOTS, "slot index must cycle 0..N-1");

            gpu.wait_fence(slot);
            let image = gpu.acquire();
            if let Some(owner) = tracker.claim(image) {
                gpu.wait_fence(owner);
            }

            assert_eq!(
                gpu.outstanding[slot], 0,
                "slot {} submitted while still in flight",
                slot
            );
            gpu.submit(slot);
            assert!(
                gpu.outstanding.iter().all(|&n| n <= 1),
                "more than one outstanding submission on a slot"
            );

            tracker.advance();
        }
    }

    #[test]
    fn thousand_frames_cycle_without_deadlock() {
        let mut tracker = FlightTracker::new(SLOTS, SLOTS);
        let mut gpu = MockGpu::new(SLOTS);
        run_frames(&mut tracker, &mut gpu, 1000);
    }

    #[test]
    fn more_images_than_slots_still_bounds_every_slot() {
        let mut tracker = FlightTracker::new(SLOTS, 5);
        let mut gpu = MockGpu::new(5);
        run_frames(&mut tracker, &mut gpu, 1000);
    }

    // 5 images, 3 slots: images recur from frame 5 onward and must always
    // report the slot that previously rendered into them.
    #[test]
    fn claim_reports_the_prior_owner_when_an_image_recurs() {
        let mut tracker = FlightTracker::new(SLOTS, 5);

        for frame in 0..20 {
            let image = frame % 5;
            let prior = tracker.claim(image);
            if frame < 5 {
                assert_eq!(prior, None, "frame {}: image {} never used", frame, image);
            } else {
                // The image was last claimed 5 frames ago, by slot (frame-5)%3.
                assert_eq!(
                    prior,
                    Some((frame - 5) % SLOTS),
                    "frame {}: wrong prior owner for image {}",
                    frame,
                    image
                );
            }
            tracker.advance();
        }
    }

    #[test]
    fn reset_clears_owners_and_tracks_the_new_image_count() {
        let mut tracker = FlightTracker::new(SLOTS, 3);
        for image in 0..3 {
            tracker.claim(image);
            tracker.advance();
        }

        tracker.reset_images(5);
        assert_eq!(tracker.image_count(), 5);
        for image in 0..5 {
            assert_eq!(tracker.claim(image), None, "stale owner survived reset");
        }
    }

    #[test]
    fn memory_type_scan_is_first_match_wins() {
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 4;
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        props.memory_types[2].property_flags = wanted;
        props.memory_types[3].property_flags = wanted | vk::MemoryPropertyFlags::HOST_CACHED;

        // Both 2 and 3 qualify; the scan must stop at 2.
        assert_eq!(find_memory_type(&props, 0b1111, wanted), Some(2));
        // Type bits can exclude the first candidate.
        assert_eq!(find_memory_type(&props, 0b1000, wanted), Some(3));
        // No compatible type at all.
        assert_eq!(
            find_memory_type(&props, 0b0011, wanted),
            None,
            "host-visible alone must not satisfy coherent"
        );
    }
}
