//! Periodic patrol scheduling.

pub mod cron;
pub mod engine;

pub use self::cron::PatrolSchedule;
pub use self::engine::run_patrol_loop;
