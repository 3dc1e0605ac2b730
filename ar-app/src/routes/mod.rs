pub mod health;
pub mod stats;

use axum::Router;

pub fn router() -> Router {
    Router::new().merge(health::router()).merge(stats::router())
}
