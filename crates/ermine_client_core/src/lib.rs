#![forbid(unsafe_code)]

//! Session core for an Ermine chat client.
//!
//! Wires a gateway connection, REST access, paginated history, optimistic
//! writes and reference resolution around one shared
//! [`StateStore`](ermine_store::StateStore). The consuming surface owns a
//! [`SessionContext`] and tears it down on logout.

mod config;
mod error;
mod gateway;
mod history;
mod outbox;
mod resolver;
mod rest;
mod session;
mod subscriptions;

pub use config::ApiConfig;
pub use error::ClientError;
pub use gateway::{ConnectionStatus, Gateway};
pub use history::HistoryFetcher;
pub use outbox::{Outbox, SendFailed};
pub use resolver::{ReferenceResolver, ReplyPreview};
pub use rest::{MESSAGE_PAGE_LIMIT, RestClient, login_with_credentials, login_with_token};
pub use session::{Credentials, SessionContext};
pub use subscriptions::SubscriptionTracker;
