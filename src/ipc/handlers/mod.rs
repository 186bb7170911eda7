pub mod attendance;
pub mod backup_exchange;
pub mod class_logs;
pub mod core;
pub mod fees;
pub mod setup;
pub mod students;
pub mod tuitions;
