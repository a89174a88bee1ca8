// SPDX-License-Identifier: CEPL-1.0
//! Chain invalidation policy: what the loop does with an acquire or present
//! result. Hard failures never reach this table; they are `Err` values.

/// Non-fatal result of an acquire or present call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapOutcome<T> {
    Optimal(T),
    Suboptimal(T),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStep {
    Acquire,
    Present,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainAction {
    Continue,
    Rebuild,
}

impl<T> SwapOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Self::Optimal(v) | Self::Suboptimal(v) => Some(v),
            Self::OutOfDate => None,
        }
    }

    pub fn classify(&self, step: ChainStep) -> ChainAction {
        classify(self, step)
    }
}

pub fn classify<T>(outcome: &SwapOutcome<T>, step: ChainStep) -> ChainAction {
    match (outcome, step) {
        (SwapOutcome::Optimal(_), _) => ChainAction::Continue,
        // the acquired image is still presentable, defer the rebuild
        (SwapOutcome::Suboptimal(_), ChainStep::Acquire) => ChainAction::Continue,
        (SwapOutcome::Suboptimal(_), ChainStep::Present) => ChainAction::Rebuild,
        (SwapOutcome::OutOfDate, _) => ChainAction::Rebuild,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        use ChainAction::*;
        use ChainStep::*;

        assert_eq!(SwapOutcome::Optimal(3u32).classify(Acquire), Continue);
        assert_eq!(SwapOutcome::Optimal(()).classify(Present), Continue);
        assert_eq!(SwapOutcome::Suboptimal(1u32).classify(Acquire), Continue);
        assert_eq!(SwapOutcome::Suboptimal(()).classify(Present), Rebuild);
        assert_eq!(SwapOutcome::<u32>::OutOfDate.classify(Acquire), Rebuild);
        assert_eq!(SwapOutcome::<()>::OutOfDate.classify(Present), Rebuild);
    }

    #[test]
    fn suboptimal_acquire_still_yields_the_image() {
        assert_eq!(SwapOutcome::Suboptimal(2u32).value(), Some(2));
        assert_eq!(SwapOutcome::<u32>::OutOfDate.value(), None);
    }
}
