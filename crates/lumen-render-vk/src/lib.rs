// SPDX-License-Identifier: CEPL-1.0
//! ash backend for the lumen frame loop.
#![deny(unsafe_op_in_unsafe_fn)]

mod bootstrap;
mod device;
mod renderer;

pub use device::AshDevice;
pub use renderer::VkRenderer;
