// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::PresentDevice;
use crate::error::FrameResult;

/// The semaphore pair shared by every frame.
///
/// Reuse across frames is only sound while at most one frame is in flight,
/// which the scheduler guarantees by waiting for completion after present.
pub struct SyncSet<D: PresentDevice> {
    device: Arc<D>,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
}

impl<D: PresentDevice> SyncSet<D> {
    pub fn new(device: Arc<D>) -> FrameResult<Self> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        debug!("created frame semaphores");
        Ok(Self {
            device,
            image_available,
            render_finished,
        })
    }

    /// Signaled by acquire, waited on by submit.
    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Signaled by submit, waited on by present.
    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }
}

impl<D: PresentDevice> Drop for SyncSet<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.render_finished);
        self.device.destroy_semaphore(self.image_available);
        debug!("destroyed frame semaphores");
    }
}
