// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue for the loop driver: `winit` re-export and the surface
//! probe the recreation path queries.
#![deny(unsafe_op_in_unsafe_fn)]
use std::sync::Arc;

use cadence_render::{RenderSize, SurfaceProbe};
use tracing::trace;
pub use winit;
use winit::{dpi::PhysicalSize, window::Window};

/// Drawable size as the swapchain should see it. A minimized window can
/// still report its restored inner size on some platforms, so minimized
/// always means zero area.
pub fn effective_size(inner: PhysicalSize<u32>, minimized: Option<bool>) -> RenderSize {
    if minimized == Some(true) {
        RenderSize::default()
    } else {
        RenderSize::new(inner.width, inner.height)
    }
}

/// [`SurfaceProbe`] over a `winit` window.
///
/// winit delivers events only from its own loop, so `wait_for_events` keeps
/// the default `false` and a minimized window defers recreation until a
/// later `draw_frame()`.
#[derive(Clone, Debug)]
pub struct WindowProbe {
    window: Arc<Window>,
}

impl WindowProbe {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl SurfaceProbe for WindowProbe {
    fn framebuffer_size(&mut self) -> RenderSize {
        let size = effective_size(self.window.inner_size(), self.window.is_minimized());
        trace!("window probe: {}", size);
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_has_no_area() {
        let inner = PhysicalSize::new(1280, 720);
        assert!(effective_size(inner, Some(true)).is_empty());
        assert_eq!(effective_size(inner, Some(false)), RenderSize::new(1280, 720));
        // Platforms that cannot tell report None; trust the inner size.
        assert_eq!(effective_size(inner, None), RenderSize::new(1280, 720));
        assert!(effective_size(PhysicalSize::new(0, 720), None).is_empty());
    }
}
