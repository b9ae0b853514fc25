// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Display;

use thiserror::Error;

use crate::FramePhase;

pub type FrameResult<T> = Result<T, FrameError>;

/// Failures that end the frame loop.
///
/// Surface staleness (out-of-date, suboptimal, resize) is deliberately not
/// in here: it is reported as a [`crate::PresentationOutcome`] and absorbed
/// by the recreation path.
#[derive(Debug, Error)]
pub enum FrameError {
    /// No usable device/format/present mode, or a native object could not be
    /// created (at startup or during recreation). There is no fallback.
    #[error("{context}: {detail}")]
    Setup { context: &'static str, detail: String },

    /// The caller broke the frame protocol. Indicates a logic defect.
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl FrameError {
    pub fn setup(context: &'static str, detail: impl Display) -> Self {
        FrameError::Setup {
            context,
            detail: detail.to_string(),
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, FrameError::Contract(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("frame slot {slot} submitted twice without waiting on its fence")]
    DoubleSubmission { slot: usize },

    #[error("`{op}` called while the scheduler is in {phase:?}")]
    OutOfPhase { op: &'static str, phase: FramePhase },

    #[error("image index {index} out of range for {count} swapchain images")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("scheduler used after its frame slots were destroyed")]
    Destroyed,
}
