pub mod audit;
pub mod handlers;
pub mod lifecycle;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::routes())
}
