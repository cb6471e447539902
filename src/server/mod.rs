//! WebDriver front door
//!
//! Local commands (status, session create/get/delete, device listing) are
//! served here; every other command addressed to a session is forwarded to
//! the device endpoint that owns the session.
//!
//! ```text
//! GET    /wd/hub/status
//! GET    /wd/hub/sessions
//! POST   /wd/hub/session
//! GET    /wd/hub/session/:sessionId
//! DELETE /wd/hub/session/:sessionId
//! *      /wd/hub/session/:sessionId/...   -> device endpoint
//! GET    /wd/hub/devices
//! POST   /wd/hub/devices/:deviceId/recover
//! GET    /health
//! GET    /metrics
//! ```

pub mod api;
pub mod proxy;
pub mod routes;
pub mod server;

pub use api::{create_router, dispatch, ApiError, Envelope};
pub use routes::{forwarded_session, Endpoint, RouteMatch, RouteTable, RouteTemplate, WD_PREFIX};
pub use server::{AppState, OrchestratorServer, ServerError, ServerInfo};
