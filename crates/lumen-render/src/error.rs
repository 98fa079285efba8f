// SPDX-License-Identifier: CEPL-1.0
//! Failure taxonomy for the frame loop.
//!
//! Acquire and present hand back a [`SwapchainError`], which forces callers to
//! deal with the recoverable [`Staleness`] case before anything else. Every
//! other failure is a [`FrameError`] and unwinds to the top level.

use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

/// Driver report that the current generation no longer matches the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staleness {
    /// Still usable for this frame, due for replacement.
    Suboptimal,
    /// Must not be used again.
    OutOfDate,
}

/// Unrecoverable failures.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Setup-time misconfiguration (no surface formats, no queue family, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounded wait on the GPU ran out of time.
    #[error("device appears hung: {op} did not complete within {timeout:?}")]
    DeviceHang {
        op: &'static str,
        timeout: Duration,
    },

    /// The driver rejected a call.
    #[error("{op} failed: {result}")]
    Api {
        op: &'static str,
        result: vk::Result,
    },

    /// The driver handed out an image index the generation does not have.
    #[error("acquired image index {index} is outside a generation of {image_count} images")]
    InvalidImageIndex { index: u32, image_count: usize },
}

impl FrameError {
    pub fn api(op: &'static str, result: vk::Result) -> Self {
        FrameError::Api { op, result }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        FrameError::Configuration(msg.into())
    }

    pub fn is_device_hang(&self) -> bool {
        matches!(self, FrameError::DeviceHang { .. })
    }
}

pub type FrameResult<T> = Result<T, FrameError>;

/// Outcome of a failed acquire or present.
#[derive(Error, Debug)]
pub enum SwapchainError {
    #[error("swapchain is stale ({0:?})")]
    Stale(Staleness),

    #[error(transparent)]
    Fatal(#[from] FrameError),
}

impl SwapchainError {
    /// Sorts a raw acquire/present code into the recoverable or fatal bucket.
    pub fn classify(op: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => SwapchainError::Stale(Staleness::OutOfDate),
            vk::Result::SUBOPTIMAL_KHR => SwapchainError::Stale(Staleness::Suboptimal),
            other => SwapchainError::Fatal(FrameError::api(op, other)),
        }
    }
}

/// Tags a raw `VkResult` with the operation that produced it.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> FrameResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn op(self, op: &'static str) -> FrameResult<T> {
        self.map_err(|result| FrameError::api(op, result))
    }
}
