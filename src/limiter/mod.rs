//! Rate Limiting Module
//!
//! Admission control that can be layered over any driver.

pub mod overlay;
pub mod window;

pub use overlay::{RateLimited, DEFAULT_PERIOD, DEFAULT_REQUESTS_PER_PERIOD};
pub use window::{RateWindow, WindowPolicy};
