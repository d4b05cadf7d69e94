// SPDX-License-Identifier: CEPL-1.0
use crate::frame::FrameStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer is not initialised")]
    NotInitialized,
    #[error("renderer is already initialised")]
    AlreadyInitialized,
    #[error("backend setup failed: {0:#}")]
    Setup(#[source] anyhow::Error),
    #[error("surface is out of date")]
    SurfaceOutOfDate,
    #[error("frame failed at {stage}: {source:#}")]
    Frame {
        stage: FrameStage,
        #[source]
        source: anyhow::Error,
    },
    #[error("backend teardown failed: {0:#}")]
    Teardown(#[source] anyhow::Error),
}

impl RenderError {
    /// Per-frame failures the loop can carry on from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RenderError::SurfaceOutOfDate | RenderError::Frame { .. }
        )
    }
}

/// Returned bare by backends from `acquire_image` when the surface no longer
/// matches the swapchain.
#[derive(Debug, Clone, Copy, Error)]
#[error("swapchain is out of date with its surface")]
pub struct SurfaceOutOfDate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_survives_anyhow() {
        let err: anyhow::Error = SurfaceOutOfDate.into();
        assert!(err.is::<SurfaceOutOfDate>());
        let wrapped = err.context("acquire");
        assert!(wrapped.downcast_ref::<SurfaceOutOfDate>().is_some());
    }

    #[test]
    fn transient_classification() {
        assert!(RenderError::SurfaceOutOfDate.is_transient());
        assert!(RenderError::Frame {
            stage: FrameStage::Submit,
            source: anyhow::anyhow!("device lost"),
        }
        .is_transient());
        assert!(!RenderError::NotInitialized.is_transient());
        assert!(!RenderError::Setup(anyhow::anyhow!("no device")).is_transient());
    }

    #[test]
    fn frame_error_names_stage() {
        let err = RenderError::Frame {
            stage: FrameStage::Present,
            source: anyhow::anyhow!("lost"),
        };
        assert_eq!(err.to_string(), "frame failed at present: lost");
    }
}
