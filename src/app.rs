//! Winit application shell: owns the window, the renderer, and the viewport,
//! and routes events between them.

use log::{error, info, warn};
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use crate::config::{SCROLL_PIXELS_PER_LINE, WINDOW_HEIGHT, WINDOW_TITLE, WINDOW_WIDTH};
use crate::viewport::Viewport;
use crate::vulkan::{self, Renderer};

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    viewport: Viewport,
    // First fatal error; run() reports it after the loop unwinds.
    error: Option<vulkan::Error>,
}

impl App {
    pub fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            viewport: Viewport::new(WINDOW_WIDTH, WINDOW_HEIGHT),
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<vulkan::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: vulkan::Error) {
        error!("{}", e);
        if self.error.is_none() {
            self.error = Some(e);
        }
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if let Some(window) = &self.window {
            let size = window.inner_size();
            if size.width == 0 || size.height == 0 {
                // Minimized; presenting would only churn stale swapchains.
                return;
            }
        }

        // The rectangle is derived from whatever extent the swapchain
        // actually has, so resizes never stretch the fractal.
        let (width, height) = renderer.surface_extent();
        self.viewport.set_extent(width, height);
        let rect = self.viewport.rect();
        if let Err(e) = vulkan::draw_frame(renderer, &rect) {
            self.fail(event_loop, e);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                self.fail(event_loop, vulkan::Error::setup("create window")(e));
                return;
            }
        };

        match Renderer::new(&window) {
            Ok(renderer) => {
                let size = window.inner_size();
                self.viewport.set_extent(size.width, size.height);
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested; shutting down.");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.note_resize(size);
                }
                self.viewport.set_extent(size.width, size.height);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.viewport.cursor_moved(position.x, position.y);
            }
            WindowEvent::CursorEntered { .. } => {
                // The first CursorMoved after entry re-seeds the cursor point.
            }
            WindowEvent::CursorLeft { .. } => {
                // A drag cannot meaningfully continue without a cursor.
                self.viewport.release();
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.viewport.press(),
                ElementState::Released => self.viewport.release(),
            },
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => f64::from(y),
                    MouseScrollDelta::PixelDelta(pos) => pos.y / SCROLL_PIXELS_PER_LINE,
                };
                self.viewport.scroll(lines);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Continuous redraw; the frame pacer is the FIFO present queue.
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
        } else {
            warn!("exiting before the renderer was created");
        }
        self.window = None;
    }
}
