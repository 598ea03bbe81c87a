// Window
pub const WINDOW_TITLE: &str = "mandelzoom";
pub const WINDOW_WIDTH: u32 = 1024;
pub const WINDOW_HEIGHT: u32 = 1024;

// Shader artifacts. Precompiled SPIR-V, read fully into memory at startup;
// a missing file aborts before any frame is shown.
pub const VERT_SHADER_PATH: &str = "shaders/quad.vert.spv";
pub const FRAG_SHADER_PATH: &str = "shaders/mandelbrot.frag.spv";

// Frame pacing
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

// Fractal navigation
pub const FRACTAL_UNITS_PER_PIXEL: f64 = 1.0 / 512.0;
pub const SCROLL_ZOOM_RATE: f64 = 0.1;
// Touchpads report pixel deltas instead of wheel lines.
pub const SCROLL_PIXELS_PER_LINE: f64 = 16.0;
