// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::LogicalSize;
use winit::window::WindowAttributes;

/// Initial drawable size of the main window.
pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (1024, 768);

pub fn main_window_attributes(title: &str) -> WindowAttributes {
    let (w, h) = DEFAULT_WINDOW_SIZE;
    WindowAttributes::default()
        .with_title(title)
        .with_inner_size(LogicalSize::new(w, h))
}
