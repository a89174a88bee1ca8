// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use strobe_render::{RenderError, RenderResult, SwapOutcome};

/// Attach the failing call's name to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn vk(self, op: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk(self, op: &'static str) -> RenderResult<T> {
        self.map_err(|e| vk_error(op, e))
    }
}

pub fn vk_error(op: &'static str, result: vk::Result) -> RenderError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost(op),
        other => RenderError::device(op, other),
    }
}

/// Fold the `(value, suboptimal)` pair ash returns from acquire and present
/// into one outcome. `ERROR_OUT_OF_DATE_KHR` is staleness, not failure.
pub fn swap_outcome<T>(op: &'static str, result: VkResult<(T, bool)>) -> RenderResult<SwapOutcome<T>> {
    match result {
        Ok((value, false)) => Ok(SwapOutcome::Optimal(value)),
        Ok((value, true)) => Ok(SwapOutcome::Suboptimal(value)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapOutcome::OutOfDate),
        // some drivers report suboptimal as an error code
        Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SwapOutcome::OutOfDate),
        Err(e) => Err(vk_error(op, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_its_own_variant() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .vk("queue_submit")
            .unwrap_err();
        assert!(err.is_device_lost());

        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .vk("allocate_memory")
            .unwrap_err();
        assert!(matches!(err, RenderError::Device { op: "allocate_memory", .. }));
    }

    #[test]
    fn swap_results_map_onto_outcomes() {
        assert_eq!(
            swap_outcome("acquire", Ok((2u32, false))).unwrap(),
            SwapOutcome::Optimal(2)
        );
        assert_eq!(
            swap_outcome("acquire", Ok((2u32, true))).unwrap(),
            SwapOutcome::Suboptimal(2)
        );
        assert_eq!(
            swap_outcome::<u32>("acquire", Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SwapOutcome::OutOfDate
        );
        assert!(swap_outcome::<()>("present", Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
