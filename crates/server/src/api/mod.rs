pub mod audit;
pub mod enrichments;
pub mod handlers;
pub mod maintenance;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
