pub mod app_config;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod ticket_repo;
pub mod webhook_repo;

pub use database::DbClient;
pub use memory::InMemoryStore;
pub use redis_repo::RedisClient;
pub use ticket_repo::PostgresTicketRepository;
pub use webhook_repo::PostgresWebhookLogRepository;
