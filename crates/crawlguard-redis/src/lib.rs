pub mod config;
pub mod store;

pub use config::RedisConfig;
pub use store::RedisStore;
