//! The dispatch pipeline for inbound chat messages.
//!
//! For each delivery:
//!
//! 1. unsupported messages (non-text, or text that is itself a JSON object)
//!    get a fixed reply without further work
//! 2. the [`Coalescer`] decides between replaying a cached reply and
//!    processing, waiting a bounded time for a concurrent copy
//! 3. processing runs in its own task that owns the in-flight guard, so it
//!    completes even if the platform hangs up:
//!    classify, route, apply the authorization gate, execute
//! 4. the reply is cached when its disposition allows
//!
//! Nothing escapes as an error: every failure becomes reply text. A panic in
//! processing is caught at the task boundary, answered with
//! `something is wrong with <payload>` and not cached.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};

use crate::classifier::{IntentClassifier, function_catalog, system_prompt};
use crate::idempotency::{Claim, Coalescer};
use crate::router::{Disposition, Handler, HandlerError, IntentRouter, replies};
use crate::services::Services;
use crate::store::DocumentStore;
use crate::types::{User, UserId};
use crate::wechat::InboundMessage;

/// Reply text and whether redeliveries may replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub cacheable: bool,
}

impl Reply {
    pub fn cached(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            cacheable: true,
        }
    }

    pub fn uncached(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            cacheable: false,
        }
    }

    fn from_error(err: &HandlerError) -> Self {
        Reply {
            text: err.user_message(),
            cacheable: err.is_cacheable(),
        }
    }
}

/// Object-safe view of a dispatcher, for the HTTP layer.
pub trait MessageDispatch: Send + Sync + 'static {
    fn reply_to<'a>(&'a self, message: &'a InboundMessage) -> BoxFuture<'a, String>;
}

pub struct Dispatcher<S, C> {
    inner: Arc<DispatcherInner<S, C>>,
}

struct DispatcherInner<S, C> {
    services: Arc<Services<S>>,
    router: IntentRouter<S>,
    classifier: Arc<C>,
    coalescer: Arc<Coalescer>,
}

impl<S, C> Clone for Dispatcher<S, C> {
    fn clone(&self) -> Self {
        Dispatcher {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn is_json_object(text: &str) -> bool {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(text).is_ok()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S: DocumentStore, C: IntentClassifier> Dispatcher<S, C> {
    pub fn new(services: Arc<Services<S>>, classifier: Arc<C>, coalescer: Arc<Coalescer>) -> Self {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                router: IntentRouter::new(Arc::clone(&services)),
                services,
                classifier,
                coalescer,
            }),
        }
    }

    pub fn coalescer(&self) -> &Arc<Coalescer> {
        &self.inner.coalescer
    }

    /// Produces the reply text for a message.
    #[instrument(skip_all, fields(delivery_id = %message.delivery_id(), sender = %message.from_user_name))]
    pub async fn dispatch(&self, message: &InboundMessage) -> String {
        let content = message.content.trim().to_string();
        if !message.is_text() || is_json_object(&content) {
            debug!(msg_type = %message.msg_type, "Unsupported message");
            return replies::UNSUPPORTED.to_string();
        }

        let id = message.delivery_id();
        let guard = match self.inner.coalescer.claim(&id).await {
            Claim::Replay(text) => {
                info!("Replaying cached reply");
                return text;
            }
            Claim::Process(guard) => guard,
        };

        let inner = Arc::clone(&self.inner);
        let sender = message.sender();
        let task = tokio::spawn(
            async move {
                match AssertUnwindSafe(inner.process(sender, content))
                    .catch_unwind()
                    .await
                {
                    Ok(reply) => {
                        if reply.cacheable {
                            guard.finish(reply.text.clone());
                        } else {
                            drop(guard);
                        }
                        reply.text
                    }
                    Err(payload) => {
                        let detail = panic_message(payload.as_ref());
                        error!(panic = %detail, "Processing panicked");
                        drop(guard);
                        replies::defect(&detail)
                    }
                }
            }
            .instrument(Span::current()),
        );

        match task.await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Processing task failed");
                replies::APOLOGY.to_string()
            }
        }
    }

    /// Applies the authorization gate to `handler` and runs it for `sender`.
    pub async fn run(&self, handler: Handler, sender: UserId) -> Reply {
        self.inner.run(handler, sender).await
    }
}

impl<S: DocumentStore, C: IntentClassifier> DispatcherInner<S, C> {
    async fn process(&self, sender: UserId, content: String) -> Reply {
        let now = self.services.now().with_timezone(&self.services.offset());
        let classified = self
            .classifier
            .classify(&system_prompt(now), &content, &function_catalog(now))
            .await;
        let intent = match classified {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Classification failed");
                return Reply::uncached(replies::APOLOGY);
            }
        };
        self.run(self.router.route(intent), sender).await
    }

    async fn run(&self, handler: Handler, sender: UserId) -> Reply {
        let name = handler.name().to_string();
        let user = if handler.requires_auth() {
            match self.services.users.get(&sender).await {
                Ok(Some(user)) if user.is_identified() => user,
                Ok(_) => {
                    info!(handler = %name, "Sender has not identified themselves");
                    return Reply::cached(replies::IDENTIFY_YOURSELF);
                }
                Err(e) => {
                    let err = HandlerError::from(e);
                    warn!(handler = %name, error = %err, "Looking up sender failed");
                    return Reply::from_error(&err);
                }
            }
        } else {
            User::unidentified(sender)
        };

        debug!(handler = %name, "Executing handler");
        match handler.execute(user).await {
            Ok(text) => Reply::cached(text),
            Err(e) => {
                match e.disposition() {
                    Disposition::Transient | Disposition::Failure => {
                        warn!(handler = %name, error = %e, "Handler failed")
                    }
                    Disposition::Validation | Disposition::AuthorizationGap => {
                        info!(handler = %name, error = %e, "Handler refused request")
                    }
                }
                Reply::from_error(&e)
            }
        }
    }
}

impl<S: DocumentStore, C: IntentClassifier> MessageDispatch for Dispatcher<S, C> {
    fn reply_to<'a>(&'a self, message: &'a InboundMessage) -> BoxFuture<'a, String> {
        self.dispatch(message).boxed()
    }
}
