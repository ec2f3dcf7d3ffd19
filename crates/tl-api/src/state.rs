use std::sync::Arc;
use tl_session::SessionManager;
use tl_ws::WsService;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub ws: Arc<WsService>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, ws: Arc<WsService>) -> Self {
        Self { sessions, ws }
    }
}
