//! Pointer-driven pan/zoom state for the fractal viewport.
//!
//! Pure math, no GPU types. The app feeds it normalized cursor/button/scroll
//! events and asks for the viewport rectangle once per frame; the scheduler
//! copies that rectangle into the active frame slot's uniform buffer.

use crate::config::{FRACTAL_UNITS_PER_PIXEL, SCROLL_ZOOM_RATE};
use log::debug;

/// Viewport rectangle in fractal space: left, top, right, bottom.
pub type ViewportRect = [f64; 4];

/// Affine remap of `value` from `[old_min, old_max]` into `[new_min, new_max]`.
pub fn dmap(old_min: f64, old_max: f64, new_min: f64, new_max: f64, value: f64) -> f64 {
    (value - old_min) * (new_max - new_min) / (old_max - old_min) + new_min
}

pub struct Viewport {
    center: [f64; 2],
    zoom: f64,
    // Drawable size in pixels; tracks the window, used both for cursor
    // normalization and for the per-frame rectangle.
    extent: [f64; 2],
    cursor_point: [f64; 2],
    grab_point: [f64; 2],
    dragging: bool,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            center: [0.0, 0.0],
            zoom: 1.0,
            extent: [width as f64, height as f64],
            cursor_point: [0.0, 0.0],
            grab_point: [0.0, 0.0],
            dragging: false,
        }
    }

    pub fn set_extent(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.extent = [width as f64, height as f64];
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    /// Half the viewport span in fractal units, per axis.
    fn half_extent(&self) -> [f64; 2] {
        [
            self.extent[0] * FRACTAL_UNITS_PER_PIXEL / self.zoom,
            self.extent[1] * FRACTAL_UNITS_PER_PIXEL / self.zoom,
        ]
    }

    /// Maps a normalized [0,1]^2 window position into fractal space under the
    /// current center and zoom.
    fn map_to_fractal(&self, norm: [f64; 2]) -> [f64; 2] {
        let half = self.half_extent();
        [
            dmap(
                0.0,
                1.0,
                self.center[0] - half[0],
                self.center[0] + half[0],
                norm[0],
            ),
            dmap(
                0.0,
                1.0,
                self.center[1] - half[1],
                self.center[1] + half[1],
                norm[1],
            ),
        ]
    }

    /// Cursor moved to window-space pixel position (x, y).
    ///
    /// While a drag is active the center is translated so the fractal point
    /// grabbed at press time stays under the cursor.
    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        let norm = [x / self.extent[0], y / self.extent[1]];
        // Mapped under the pre-move center; the drag delta below compensates.
        self.cursor_point = self.map_to_fractal(norm);
        debug!(
            "cursor at {:.6},{:.6}",
            self.cursor_point[0], self.cursor_point[1]
        );

        if self.dragging {
            self.center[0] += self.grab_point[0] - self.cursor_point[0];
            self.center[1] += self.grab_point[1] - self.cursor_point[1];
        }
    }

    /// Primary button pressed: anchor the drag at the current fractal point.
    pub fn press(&mut self) {
        self.grab_point = self.cursor_point;
        self.dragging = true;
        debug!(
            "drag grabs {:.6},{:.6}",
            self.grab_point[0], self.grab_point[1]
        );
    }

    pub fn release(&mut self) {
        self.dragging = false;
    }

    /// Scroll by `dy` wheel lines: exponential zoom, `zoom *= 1 + dy * k`.
    /// A non-positive factor would flip the viewport inside out, so it is
    /// ignored rather than applied.
    pub fn scroll(&mut self, dy: f64) {
        if dy == 0.0 {
            return;
        }
        let factor = 1.0 + dy * SCROLL_ZOOM_RATE;
        if factor <= 0.0 {
            debug!("ignoring scroll {} (zoom factor {} <= 0)", dy, factor);
            return;
        }
        self.zoom *= factor;
        debug!("zoom is now {}", self.zoom);
    }

    /// The four-corner rectangle rendered this frame, recomputed from
    /// center/zoom/per-pixel scale and the current extent.
    pub fn rect(&self) -> ViewportRect {
        let half = self.half_extent();
        [
            self.center[0] - half[0],
            self.center[1] - half[1],
            self.center[0] + half[0],
            self.center[1] + half[1],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    // 1024x1024 at the default per-pixel scale spans center +/- 2.0 / zoom.
    fn default_viewport() -> Viewport {
        Viewport::new(1024, 1024)
    }

    #[test]
    fn dmap_roundtrips_through_its_inverse() {
        // Forward map is the cursor mapping at center (0,0), zoom 1.
        let (lo, hi) = (-2.0, 2.0);
        for &v in &[0.0, 0.125, 0.25, 0.5, 0.75, 0.875, 1.0] {
            let mapped = dmap(0.0, 1.0, lo, hi, v);
            let back = dmap(lo, hi, 0.0, 1.0, mapped);
            assert!((back - v).abs() < TOLERANCE, "{} -> {} -> {}", v, mapped, back);
        }
    }

    #[test]
    fn rect_is_centered_and_sized_by_zoom() {
        let mut vp = default_viewport();
        assert_eq!(vp.rect(), [-2.0, -2.0, 2.0, 2.0]);

        vp.scroll(10.0); // zoom 2.0
        let rect = vp.rect();
        assert!((rect[0] + 1.0).abs() < TOLERANCE);
        assert!((rect[2] - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn zoom_is_exponential_not_additive() {
        let mut vp = default_viewport();
        vp.scroll(1.0);
        assert!((vp.zoom() - 1.1).abs() < TOLERANCE);
        vp.scroll(-1.0);
        // 1.1 * 0.9 = 0.99, not back to 1.0.
        assert!((vp.zoom() - 0.99).abs() < TOLERANCE);
    }

    #[test]
    fn zoom_ignores_sign_flipping_factors() {
        let mut vp = default_viewport();
        vp.scroll(-10.0); // factor 0.0
        assert_eq!(vp.zoom(), 1.0);
        vp.scroll(-25.0); // factor -1.5
        assert_eq!(vp.zoom(), 1.0);
    }

    // Pressing at P0 (fractal point F0) and dragging to P1 (mapping, under the
    // pre-drag center, to F1) must translate the center by exactly F0 - F1 so
    // that the cursor still sits on F0.
    #[test]
    fn drag_anchors_the_grabbed_point_under_the_cursor() {
        let cases: &[([f64; 2], [f64; 2], f64)] = &[
            ([512.0, 512.0], [256.0, 640.0], 1.0),
            ([100.0, 900.0], [800.0, 200.0], 1.0),
            ([0.0, 0.0], [1024.0, 1024.0], 4.0),
            ([300.0, 300.0], [301.0, 299.0], 0.25),
        ];

        for &(p0, p1, zoom) in cases {
            let mut vp = default_viewport();
            if zoom != 1.0 {
                vp.zoom = zoom;
            }
            let center_before = vp.center();

            vp.cursor_moved(p0[0], p0[1]);
            let f0 = vp.cursor_point;
            vp.press();
            vp.cursor_moved(p1[0], p1[1]);
            let f1 = vp.cursor_point;

            let center_after = vp.center();
            assert!(
                (center_after[0] - (center_before[0] + f0[0] - f1[0])).abs() < TOLERANCE
                    && (center_after[1] - (center_before[1] + f0[1] - f1[1])).abs() < TOLERANCE,
                "center moved by {:?}, expected {:?}",
                [
                    center_after[0] - center_before[0],
                    center_after[1] - center_before[1]
                ],
                [f0[0] - f1[0], f0[1] - f1[1]],
            );

            // The cursor (now at P1) maps back onto the grabbed point.
            let under_cursor = vp.map_to_fractal([p1[0] / 1024.0, p1[1] / 1024.0]);
            assert!(
                (under_cursor[0] - f0[0]).abs() < TOLERANCE
                    && (under_cursor[1] - f0[1]).abs() < TOLERANCE,
                "grabbed point drifted: {:?} vs {:?}",
                under_cursor,
                f0,
            );
        }
    }

    #[test]
    fn release_stops_panning() {
        let mut vp = default_viewport();
        vp.cursor_moved(512.0, 512.0);
        vp.press();
        vp.cursor_moved(600.0, 600.0);
        let panned = vp.center();
        vp.release();
        vp.cursor_moved(900.0, 900.0);
        assert_eq!(vp.center(), panned);
    }

    #[test]
    fn resize_rescales_the_rect_but_not_the_center() {
        let mut vp = default_viewport();
        vp.set_extent(2048, 1024);
        let rect = vp.rect();
        assert_eq!(vp.center(), [0.0, 0.0]);
        assert!((rect[2] - rect[0] - 8.0).abs() < TOLERANCE);
        assert!((rect[3] - rect[1] - 4.0).abs() < TOLERANCE);

        // Zero-sized (minimized) extents are ignored.
        vp.set_extent(0, 0);
        assert_eq!(vp.rect(), rect);
    }
}
