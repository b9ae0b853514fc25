// SPDX-License-Identifier: CEPL-1.0

/// Classification of an acquire or present status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentationOutcome {
    Valid,
    /// Still presentable, but the surface no longer matches exactly.
    SubOptimal,
    /// Unusable; the swapchain must be rebuilt before the next frame.
    OutOfDate,
    Fatal,
}

impl PresentationOutcome {
    /// Whether work may continue with the image this outcome came with.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Valid | Self::SubOptimal)
    }

    pub fn needs_recreation(self) -> bool {
        matches!(self, Self::SubOptimal | Self::OutOfDate)
    }
}

/// Result of asking the presentation engine for its next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// `outcome` is `Valid` or `SubOptimal`.
    Image {
        index: u32,
        outcome: PresentationOutcome,
    },
    /// No image was handed out; `OutOfDate` or `Fatal`.
    Unavailable(PresentationOutcome),
}

impl Acquire {
    pub fn image(index: u32, suboptimal: bool) -> Self {
        Acquire::Image {
            index,
            outcome: if suboptimal {
                PresentationOutcome::SubOptimal
            } else {
                PresentationOutcome::Valid
            },
        }
    }

    pub fn outcome(&self) -> PresentationOutcome {
        match *self {
            Acquire::Image { outcome, .. } => outcome,
            Acquire::Unavailable(outcome) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_drives_recreation() {
        assert!(!PresentationOutcome::Valid.needs_recreation());
        assert!(PresentationOutcome::SubOptimal.needs_recreation());
        assert!(PresentationOutcome::OutOfDate.needs_recreation());
        assert!(!PresentationOutcome::Fatal.needs_recreation());
    }

    #[test]
    fn suboptimal_image_is_still_usable() {
        let acquired = Acquire::image(2, true);
        assert_eq!(acquired.outcome(), PresentationOutcome::SubOptimal);
        assert!(acquired.outcome().is_usable());
        assert!(!Acquire::Unavailable(PresentationOutcome::OutOfDate)
            .outcome()
            .is_usable());
    }
}
