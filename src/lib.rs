pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod repository;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod thumbnail;
pub mod utils;
pub mod validation;

pub use routes::create_router;
pub use state::AppState;
