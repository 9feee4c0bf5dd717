pub mod clock;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{CacheEntry, CacheStats, ResultCache};
