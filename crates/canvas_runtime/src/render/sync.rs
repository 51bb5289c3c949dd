//! Frame synchronization ring
//!
//! Two independent rings:
//! - per swapchain image: one present semaphore
//! - per in-flight slot: one acquire semaphore and one fence, created signaled
//!
//! Acquire semaphores follow the slot because the slot fence is the only
//! thing that proves the submit waiting on them has run.
//!
//! `images_in_flight[image]` remembers which slot fence last submitted work
//! touching that image, so a frame never records into an image the GPU may
//! still be reading.

use super::backend::{FenceHandle, GpuBackend, GpuResult, SemaphoreHandle};
use std::time::Duration;

/// Semaphores, fences and the image ownership table
#[derive(Debug, Default)]
pub struct FrameSync {
    acquire: Vec<SemaphoreHandle>,
    present: Vec<SemaphoreHandle>,
    fences: Vec<FenceHandle>,
    images_in_flight: Vec<Option<usize>>,
}

impl FrameSync {
    /// Create sync objects for `image_count` images and `frames_in_flight` slots
    ///
    /// On failure every object created so far is destroyed before returning.
    pub fn create(
        backend: &mut dyn GpuBackend,
        image_count: usize,
        frames_in_flight: usize,
    ) -> GpuResult<Self> {
        let mut sync = Self::default();
        let result = sync
            .grow_images(backend, image_count)
            .and_then(|()| sync.create_slots(backend, frames_in_flight));

        if let Err(e) = result {
            log::warn!("Frame sync creation failed, rolling back: {e}");
            sync.destroy(backend);
            return Err(e);
        }
        Ok(sync)
    }

    fn create_slots(&mut self, backend: &mut dyn GpuBackend, count: usize) -> GpuResult<()> {
        for _ in 0..count {
            let acquire = backend.create_semaphore()?;
            match backend.create_fence(true) {
                Ok(fence) => {
                    self.acquire.push(acquire);
                    self.fences.push(fence);
                }
                Err(e) => {
                    backend.destroy_semaphore(acquire);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn grow_images(&mut self, backend: &mut dyn GpuBackend, count: usize) -> GpuResult<()> {
        while self.present.len() < count {
            let present = backend.create_semaphore()?;
            self.present.push(present);
        }
        self.images_in_flight.resize(count.max(self.images_in_flight.len()), None);
        Ok(())
    }

    /// Match the per-image ring to a rebuilt swapchain and clear ownership
    ///
    /// Callers must have waited for every in-flight fence first.
    pub fn resize_images(&mut self, backend: &mut dyn GpuBackend, image_count: usize) -> GpuResult<()> {
        while self.present.len() > image_count {
            if let Some(semaphore) = self.present.pop() {
                backend.destroy_semaphore(semaphore);
            }
        }
        self.grow_images(backend, image_count)?;
        self.clear_ownership();
        self.images_in_flight.resize(image_count, None);
        Ok(())
    }

    /// Replace the acquire semaphore of `slot` with a fresh unsignaled one
    ///
    /// Needed when a frame fails after its acquire signaled the semaphore
    /// but before any submit waited on it.
    pub fn replace_acquire_semaphore(&mut self, backend: &mut dyn GpuBackend, slot: usize) -> GpuResult<()> {
        let fresh = backend.create_semaphore()?;
        let index = slot % self.acquire.len();
        let old = std::mem::replace(&mut self.acquire[index], fresh);
        backend.destroy_semaphore(old);
        Ok(())
    }

    /// Block on every in-flight fence
    pub fn wait_all(&self, backend: &mut dyn GpuBackend, timeout: Duration) -> GpuResult<()> {
        for &fence in &self.fences {
            backend.wait_fence(fence, timeout)?;
        }
        Ok(())
    }

    /// Swap the fence of `slot` for a fresh signaled one
    ///
    /// Used when a submit fails after its fence was reset, which would
    /// otherwise leave a fence nothing will ever signal.
    pub fn replace_fence(&mut self, backend: &mut dyn GpuBackend, slot: usize) -> GpuResult<()> {
        let fresh = backend.create_fence(true)?;
        let index = slot % self.fences.len();
        let old = std::mem::replace(&mut self.fences[index], fresh);
        backend.destroy_fence(old);
        for entry in &mut self.images_in_flight {
            if *entry == Some(index) {
                *entry = None;
            }
        }
        Ok(())
    }

    /// Destroy semaphores then fences
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        for semaphore in self.present.drain(..).chain(self.acquire.drain(..)) {
            backend.destroy_semaphore(semaphore);
        }
        for fence in self.fences.drain(..).rev() {
            backend.destroy_fence(fence);
        }
        self.images_in_flight.clear();
    }

    /// Number of in-flight slots
    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    /// Number of per-image present semaphores
    pub fn image_count(&self) -> usize {
        self.present.len()
    }

    /// Fence of in-flight slot `slot`
    pub fn fence(&self, slot: usize) -> FenceHandle {
        self.fences[slot % self.fences.len()]
    }

    /// Acquire semaphore of in-flight slot `slot`
    pub fn acquire_semaphore(&self, slot: usize) -> SemaphoreHandle {
        self.acquire[slot % self.acquire.len()]
    }

    /// Present semaphore of image `image`
    pub fn present_semaphore(&self, image: usize) -> SemaphoreHandle {
        self.present[image]
    }

    /// Slot whose fence last submitted work for `image`
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    /// Record that slot `slot` now owns `image`
    pub fn set_image_owner(&mut self, image: usize, slot: usize) {
        if let Some(entry) = self.images_in_flight.get_mut(image) {
            *entry = Some(slot);
        }
    }

    /// Ownership table
    pub fn images_in_flight(&self) -> &[Option<usize>] {
        &self.images_in_flight
    }

    /// Forget every ownership entry
    fn clear_ownership(&mut self) {
        self.images_in_flight.iter_mut().for_each(|entry| *entry = None);
    }
}
