pub mod granularity;
pub mod period;
pub mod range;

pub use granularity::{Granularity, TickInterval};
pub use period::Period;
pub use range::DateRange;
