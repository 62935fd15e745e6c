pub mod config;
pub mod logging;
pub mod multipart;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;
pub mod weights;

pub use routes::router;
pub use server::run_server;
pub use state::AppState;
