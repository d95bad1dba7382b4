//! Intent routing.
//!
//! [`IntentRouter::route`] turns a classified [`Intent`] into a [`Handler`]:
//! a named operation plus whether it may only run for an identified user.
//! The rules, in priority order:
//!
//! 1. a call to a known function maps to that function's handler
//! 2. non-empty free text is passed back to the user, for identified users only
//! 3. anything else gets a fixed informational reply
//!
//! Routing never fails and never touches the store; argument decoding and
//! validation happen when the handler runs.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::classifier::catalog::{
    BOOKKEEPING, GET_CATEGORY, GET_HELP, GET_LEDGER, GET_SOURCE_CODE, GET_USER_IDENTITY,
    QUERY_BILL,
};
use crate::services::Services;
use crate::store::DocumentStore;
use crate::types::{Intent, User};

pub mod args;
pub mod error;
pub mod handlers;
pub mod replies;

pub use error::{Disposition, HandlerError, ValidationError};

/// Handler name for passed-through free text.
pub const FREE_TEXT: &str = "free_text";
/// Handler name for the fallback reply.
pub const NOTHING: &str = "nothing";

type Operation = Box<dyn FnOnce(User) -> BoxFuture<'static, Result<String, HandlerError>> + Send>;

/// A routed operation, ready to run for a user.
pub struct Handler {
    name: String,
    requires_auth: bool,
    operation: Operation,
}

impl Handler {
    pub fn new<F, Fut>(name: impl Into<String>, requires_auth: bool, operation: F) -> Self
    where
        F: FnOnce(User) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, HandlerError>> + Send + 'static,
    {
        Handler {
            name: name.into(),
            requires_auth,
            operation: Box::new(move |user| operation(user).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Runs the operation. `user` is the identified user when
    /// [`requires_auth`](Self::requires_auth) holds, otherwise possibly an
    /// unidentified one.
    pub async fn execute(self, user: User) -> Result<String, HandlerError> {
        (self.operation)(user).await
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("requires_auth", &self.requires_auth)
            .finish_non_exhaustive()
    }
}

pub struct IntentRouter<S> {
    services: Arc<Services<S>>,
}

impl<S> Clone for IntentRouter<S> {
    fn clone(&self) -> Self {
        IntentRouter {
            services: Arc::clone(&self.services),
        }
    }
}

impl<S: DocumentStore> IntentRouter<S> {
    pub fn new(services: Arc<Services<S>>) -> Self {
        IntentRouter { services }
    }

    pub fn route(&self, intent: Intent) -> Handler {
        let services = Arc::clone(&self.services);
        match intent {
            Intent::FunctionCall { name, arguments } => match name.as_str() {
                GET_SOURCE_CODE => Handler::new(GET_SOURCE_CODE, false, move |_| async move {
                    Ok(services.source_url.clone())
                }),
                GET_HELP => Handler::new(GET_HELP, false, |_| async { Ok(replies::HELP.to_string()) }),
                GET_USER_IDENTITY => Handler::new(GET_USER_IDENTITY, false, move |user| {
                    handlers::user_identity(services, user, arguments)
                }),
                GET_LEDGER => Handler::new(GET_LEDGER, true, move |user| handlers::ledger(services, user)),
                GET_CATEGORY => {
                    Handler::new(GET_CATEGORY, true, move |user| handlers::categories(services, user))
                }
                QUERY_BILL => Handler::new(QUERY_BILL, true, move |user| {
                    handlers::query_bill(services, user, arguments)
                }),
                BOOKKEEPING => Handler::new(BOOKKEEPING, true, move |user| {
                    handlers::bookkeeping(services, user, arguments)
                }),
                _ => fallback(),
            },
            Intent::FreeText(text) if !text.trim().is_empty() => {
                Handler::new(FREE_TEXT, true, move |_| async move { Ok(text) })
            }
            Intent::FreeText(_) | Intent::Empty => fallback(),
        }
    }
}

fn fallback() -> Handler {
    Handler::new(NOTHING, false, |_| async { Ok(replies::FALLBACK.to_string()) })
}
