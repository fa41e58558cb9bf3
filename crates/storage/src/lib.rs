//! Durable session storage for skipper conversations.
//!
//! A [`Session`] is the durable unit of one conversation: an id, creation
//! and update timestamps, and the ordered history of [`Content`] turns.
//! Each turn holds [`Part`]s — a heterogeneous tagged union of text,
//! function calls, and function responses — persisted as discriminated
//! `{type, content}` records so the exact variant sequence round-trips.
//!
//! The [`SessionStore`] keeps one pretty-printed JSON document per session
//! in a directory, overwriting in full on every save.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Content, Session, SessionStore};
//!
//! let store = SessionStore::new(".skipper/sessions");
//!
//! let mut session = Session::new();
//! session.push(Content::user_text("Hello!"));
//! session.touch();
//! store.save(&session)?;
//!
//! let loaded = store.load(session.id)?;
//! assert_eq!(loaded.history.len(), 1);
//!
//! for session in store.list()? {
//!     println!("{}: {} turns", session.id, session.history.len());
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod session;
mod store;

pub use error::{Error, Result};
pub use session::{Content, FunctionCall, FunctionResponse, Part, Role, Session, SessionId};
pub use store::SessionStore;
