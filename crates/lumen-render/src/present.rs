// SPDX-License-Identifier: CEPL-1.0
//! Pure selection policies for swapchain creation.

use ash::vk;

use crate::error::{FrameError, FrameResult};
use crate::options::UpdateMode;

/// Surface formats we render to directly, best first.
pub const PREFERRED_SURFACE_FORMATS: [vk::SurfaceFormatKHR; 3] = [
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::A8B8G8R8_SRGB_PACK32,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
];

/// FIFO unless throughput was asked for, or the platform wants mailbox.
pub fn choose_present_mode(
    platform_prefers_mailbox: bool,
    mode: UpdateMode,
    supported: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if platform_prefers_mailbox && supported.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    if mode != UpdateMode::MaxFrameRate {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| supported.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Clamps the requested length into the surface limits (`max == 0` is unbounded).
pub fn choose_image_count(requested: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

/// Extent the next generation will use, or `None` while the surface has no area.
pub fn resolve_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    target: vk::Extent2D,
) -> Option<vk::Extent2D> {
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: target
                .width
                .max(caps.min_image_extent.width)
                .min(caps.max_image_extent.width),
            height: target
                .height
                .max(caps.min_image_extent.height)
                .min(caps.max_image_extent.height),
        }
    };
    (!is_degenerate(extent)).then_some(extent)
}

pub fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> FrameResult<vk::SurfaceFormatKHR> {
    let Some(first) = formats.first().copied() else {
        return Err(FrameError::configuration(
            "surface reports no supported formats",
        ));
    };
    // Pre-1.1.111 drivers may report a lone UNDEFINED, meaning "anything goes".
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(PREFERRED_SURFACE_FORMATS[0]);
    }
    Ok(PREFERRED_SURFACE_FORMATS
        .iter()
        .copied()
        .find(|p| {
            formats
                .iter()
                .any(|f| f.format == p.format && f.color_space == p.color_space)
        })
        .unwrap_or(first))
}

// Info only
pub fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::A8B8G8R8_SRGB_PACK32 => "A8B8G8R8_SRGB",
        _ => "OTHER",
    }
}

pub fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODES: [vk::PresentModeKHR; 3] = [
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
    ];

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn present_mode_follows_update_mode() {
        assert_eq!(
            choose_present_mode(false, UpdateMode::Continuous, &ALL_MODES),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(false, UpdateMode::OnDemand, &ALL_MODES),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(false, UpdateMode::MaxFrameRate, &ALL_MODES),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn max_frame_rate_falls_back_to_immediate_then_fifo() {
        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(false, UpdateMode::MaxFrameRate, &no_mailbox),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(false, UpdateMode::MaxFrameRate, &[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn platform_mailbox_preference_wins_when_supported() {
        assert_eq!(
            choose_present_mode(true, UpdateMode::OnDemand, &ALL_MODES),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(true, UpdateMode::Continuous, &[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_respects_limits() {
        assert_eq!(choose_image_count(2, &caps(2, 0)), 2);
        assert_eq!(choose_image_count(2, &caps(3, 0)), 3);
        assert_eq!(choose_image_count(5, &caps(2, 3)), 3);
        assert_eq!(choose_image_count(1, &caps(2, 8)), 2);
    }

    #[test]
    fn extent_uses_fixed_surface_size() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let e = resolve_extent(
            &c,
            vk::Extent2D {
                width: 1024,
                height: 768,
            },
        )
        .unwrap();
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn extent_clamps_free_size_target() {
        let e = resolve_extent(
            &caps(2, 0),
            vk::Extent2D {
                width: 9000,
                height: 600,
            },
        )
        .unwrap();
        assert_eq!((e.width, e.height), (4096, 600));
    }

    #[test]
    fn degenerate_extent_is_not_ready() {
        let mut c = caps(2, 0);
        assert!(resolve_extent(
            &c,
            vk::Extent2D {
                width: 0,
                height: 600
            }
        )
        .is_some());
        c.min_image_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        assert!(resolve_extent(
            &c,
            vk::Extent2D {
                width: 0,
                height: 600
            }
        )
        .is_none());
        c.current_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        assert!(resolve_extent(
            &c,
            vk::Extent2D {
                width: 800,
                height: 600
            }
        )
        .is_none());
    }

    #[test]
    fn surface_format_preference_order() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_SRGB);

        let f = choose_surface_format(&formats[..1]).unwrap();
        assert_eq!(f.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn surface_format_legacy_undefined_and_empty() {
        let undefined = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let f = choose_surface_format(&undefined).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);

        assert!(matches!(
            choose_surface_format(&[]),
            Err(FrameError::Configuration(_))
        ));
    }
}
