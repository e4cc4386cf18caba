pub mod group;
pub mod tracker;

pub use tracker::SessionTracker;
