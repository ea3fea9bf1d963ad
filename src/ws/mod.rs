//! Realtime session channel.
//!
//! ```text
//! browser ──WebSocket──▶ handler ──ClientRequest──▶ Dispatcher ──▶ Workspace
//!    ▲                      │                           │      ├──▶ CommandGateway
//!    │                  WsHub (sessions)                │      ├──▶ Extractor
//!    └──── ServerEvent ◀────┴──────── SessionHandle ◀───┘      └──▶ ChatProxy
//! ```
//!
//! Replies travel only on the session that issued the request. There is no
//! broadcast and no authentication: every session has the same capabilities.

mod dispatcher;
mod handler;
mod hub;
mod types;

pub use dispatcher::Dispatcher;
pub use handler::ws_handler;
pub use hub::{SessionHandle, WsHub};
pub use types::{ClientRequest, ErrorPayload, ExecRequest, ScrapeRequest, ServerEvent};
