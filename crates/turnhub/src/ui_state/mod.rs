// SPDX-License-Identifier: BUSL-1.1

pub mod throttle;

pub use throttle::UiStateThrottle;
