pub mod intervals;
pub mod watermarks;

pub use intervals::IntervalRepository;
pub use watermarks::WatermarkRepository;
