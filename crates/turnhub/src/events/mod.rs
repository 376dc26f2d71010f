// SPDX-License-Identifier: BUSL-1.1

pub mod normalizer;

pub use normalizer::{normalize, FileChangeMemo, NormalizedEvent, UiType};
