pub mod interval;
pub mod step;

pub use interval::TimeInterval;
pub use step::TimeStep;
