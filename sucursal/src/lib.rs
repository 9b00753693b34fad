mod config;
mod menu;
mod supervisor;

pub use config::Config;
pub use supervisor::Supervisor;
