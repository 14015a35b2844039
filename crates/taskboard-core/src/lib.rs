pub mod config;
pub mod executors;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod sqlite;

pub use config::StoreConfig;
pub use executors::TaskExecutorService;
