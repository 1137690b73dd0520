pub mod http;
pub mod models;
pub mod routes;

pub use http::{fetch_json_with_wake, FetchOutcome};
pub use routes::{router, AppState};
