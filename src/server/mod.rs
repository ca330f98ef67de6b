pub mod handlers;
pub mod state;

pub use handlers::{create_router, MetricQuery, OperationStatus, QuickstartRequest};
pub use state::AppState;
