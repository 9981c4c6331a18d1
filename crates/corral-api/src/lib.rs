pub mod conversations;
pub mod error;
pub mod middleware;

use std::sync::Arc;

use corral_store::Store;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Store,
    pub jwt_secret: String,
}
