//! 通用工具

pub mod time;

pub use time::{Clock, ManualClock, SystemClock, TimeFormatter};
