use crate::app::App;
use log::{LevelFilter, error, info};
use std::error::Error;
use winit::event_loop::EventLoop;

mod app;
mod config;
mod viewport;
mod vulkan;

fn main() {
    // --- Logging Setup ---
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .filter_module("mandelzoom::viewport", LevelFilter::Warn) // Reduce cursor spam unless debugging
        .init();

    info!("{} starting...", config::WINDOW_TITLE);

    if let Err(e) = run() {
        error!("Exiting with error: {}", e);
        std::process::exit(-1);
    }

    info!("Exited gracefully.");
}

fn run() -> Result<(), Box<dyn Error>> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    // Setup and frame-loop failures surface here; winit's run_app itself
    // cannot carry them out of the handler callbacks.
    if let Some(e) = app.take_error() {
        return Err(e.into());
    }
    Ok(())
}
