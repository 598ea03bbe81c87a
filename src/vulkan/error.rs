//! Failure taxonomy for the renderer.
//!
//! Three categories with distinct handling: setup errors abort before the
//! first frame is shown, stale-swapchain results are recovered locally by
//! recreation, and anything else in the frame loop is fatal.

use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Instance/device/surface/swapchain/pipeline/buffer/descriptor creation,
    /// including shader binary I/O. Never shown a frame; never retried.
    #[error("setup failed ({stage}): {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `ERROR_OUT_OF_DATE_KHR` / `SUBOPTIMAL_KHR` from acquire or present.
    /// Handled by swapchain recreation; surfaced only as a log line.
    #[error("swapchain stale ({0:?})")]
    SwapchainStale(vk::Result),

    /// Any other submit/present/fence failure mid-loop. Terminates the loop.
    #[error("frame loop failed ({stage}): {source}")]
    Frame {
        stage: &'static str,
        source: vk::Result,
    },
}

impl Error {
    pub fn setup<E>(stage: &'static str) -> impl FnOnce(E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        move |source| Error::Setup {
            stage,
            source: Box::new(source),
        }
    }

    pub fn setup_message(stage: &'static str, message: impl Into<String>) -> Error {
        Error::Setup {
            stage,
            source: message.into().into(),
        }
    }

    pub fn frame(stage: &'static str) -> impl FnOnce(vk::Result) -> Error {
        move |source| Error::Frame { stage, source }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Error::Setup { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::SwapchainStale(_))
    }

    pub fn is_frame_fatal(&self) -> bool {
        matches!(self, Error::Frame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_disjoint() {
        let setup = Error::setup("unit test")(vk::Result::ERROR_INITIALIZATION_FAILED);
        let stale = Error::SwapchainStale(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let fatal = Error::frame("unit test")(vk::Result::ERROR_DEVICE_LOST);

        assert!(setup.is_setup() && !setup.is_transient() && !setup.is_frame_fatal());
        assert!(stale.is_transient() && !stale.is_setup() && !stale.is_frame_fatal());
        assert!(fatal.is_frame_fatal() && !fatal.is_setup() && !fatal.is_transient());
    }

    #[test]
    fn shader_io_failures_classify_as_setup() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = Error::setup("read shaders/quad.vert.spv")(io);
        assert!(err.is_setup());
    }
}
