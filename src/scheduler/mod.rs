pub mod assigner;
pub mod leader;

pub use assigner::WorkerAssigner;
pub use leader::{Assignment, LeaderScheduler};
