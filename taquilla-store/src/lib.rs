pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod inventory_pg;
pub mod order_repo;
pub mod ticket_repo;

pub use catalog_repo::PgCatalogRepository;
pub use database::DbClient;
pub use inventory_pg::PgInventoryLedger;
pub use order_repo::PgOrderRepository;
pub use ticket_repo::PgTicketRepository;
