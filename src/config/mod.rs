// src/config/mod.rs
pub mod ai;
pub mod app;
pub mod regions;
pub mod watch;

pub use ai::AiConfig;
pub use app::AppConfig;
pub use regions::RegionTable;
pub use watch::{WatchConfig, WatchSpec};
