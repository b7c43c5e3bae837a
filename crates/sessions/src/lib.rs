//! Session identity, admission, and lifecycle.
//!
//! A session is the routing identity for one (channel, conversation) pair,
//! keyed `"{channelType}:{channelId}:{chatId}"`. Admission is granted by
//! pairing-code handshake, operator approval, or an allowlist match at
//! creation. Storage is an injected key-value interface; the in-memory
//! implementation here backs tests and single-process deployments.

pub mod allowlist;
pub mod directives;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod session;
pub mod store;

pub use {
    allowlist::{Allowlist, AllowlistFile},
    directives::{Directive, DirectiveManager},
    error::{Error, Result},
    lifecycle::{LifecycleConfig, ResumeContext, SessionEvent, SessionLifecycleManager},
    manager::{DmPolicy, SessionManager, SessionManagerConfig},
    session::{Session, make_session_id, parse_session_id},
    store::{MemorySessionStore, SessionStore},
};
