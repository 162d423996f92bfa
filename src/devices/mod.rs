// MIT License - Copyright (c) 2026 Peter Wright
// Panel devices

pub mod input;
pub mod section;

pub use input::{Input, InputCategory, InputInfo, InputState, InputStatusFlags};
pub use section::{Section, SectionArmedState, SectionStatus};
