// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Display;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Every failure the engine can surface. Chain staleness is not an error;
/// it travels as [`crate::SwapOutcome::OutOfDate`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("{op} failed: {reason}")]
    Device { op: &'static str, reason: String },
    #[error("device lost during {0}")]
    DeviceLost(&'static str),
    #[error("window: {0}")]
    Window(String),
    #[error("shader: {0}")]
    Shader(String),
}

impl RenderError {
    pub fn device(op: &'static str, reason: impl Display) -> Self {
        Self::Device {
            op,
            reason: reason.to_string(),
        }
    }

    pub fn setup(reason: impl Display) -> Self {
        Self::Setup(reason.to_string())
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operation() {
        let e = RenderError::device("queue_submit", "ERROR_OUT_OF_HOST_MEMORY");
        assert_eq!(e.to_string(), "queue_submit failed: ERROR_OUT_OF_HOST_MEMORY");
        assert!(!e.is_device_lost());
        assert!(RenderError::DeviceLost("wait_for_fences").is_device_lost());
    }
}
