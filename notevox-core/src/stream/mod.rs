//! Byte-range resolution and the delivery path behind audio streaming.

mod delivery;
mod range;

pub use delivery::AudioDelivery;
pub use range::{RangeResolution, ResolvedRange, resolve_range};
