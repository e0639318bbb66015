//! Request/reply naming and reply filtering

use crate::error::Result;
use crate::subscriber::{Delivery, ErrorHandler, Subscriber};
use crate::types::{AckMode, Event};
use async_trait::async_trait;

/// Event type of the response to `request`: `{eventType}.response`
pub fn response_event_type<E: Event + ?Sized>(request: &E) -> String {
    format!("{}.response", request.event_type())
}

/// Event id a response to `request` must carry: `response.{eventId}`
pub fn response_event_id<E: Event + ?Sized>(request: &E) -> String {
    format!("response.{}", request.event_id())
}

/// Channel responses to `request` are published on when there is no
/// reply subject: `responses.{eventType with '.' → '_'}.{eventId}`
pub fn response_channel<E: Event + ?Sized>(request: &E) -> String {
    format!(
        "responses.{}.{}",
        request.event_type().replace('.', "_"),
        request.event_id()
    )
}

/// Subscriber that only sees responses to one request
///
/// Events whose id is not `response.{request id}` are dropped without an
/// error, so several requests can share one raw subscription.
pub struct ResponseHandlerWrapper<S> {
    inner: S,
    expected_id: String,
}

impl<S> ResponseHandlerWrapper<S>
where
    S: Subscriber,
    S::Event: Event,
{
    pub fn new<E: Event + ?Sized>(inner: S, request: &E) -> Self {
        Self {
            inner,
            expected_id: response_event_id(request),
        }
    }

    /// Whether `candidate` answers the wrapped request
    pub fn matches<E: Event + ?Sized>(&self, candidate: &E) -> bool {
        candidate.event_id() == self.expected_id
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S> Subscriber for ResponseHandlerWrapper<S>
where
    S: Subscriber,
    S::Event: Event,
{
    type Event = S::Event;

    async fn handle(&self, event: Self::Event, delivery: &Delivery) -> Result<()> {
        if !self.matches(&event) {
            return Ok(());
        }
        self.inner.handle(event, delivery).await
    }

    fn ack_mode(&self) -> AckMode {
        self.inner.ack_mode()
    }

    fn uses(&self) -> Vec<String> {
        self.inner.uses()
    }

    fn error_handler(&self) -> Option<&dyn ErrorHandler> {
        self.inner.error_handler()
    }
}
