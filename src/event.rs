//! Events the host dispatches to a worker.

use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::{Request, Response};

/// Which lifecycle phase an [`ExtendableEvent`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Activate,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Activate => write!(f, "activate"),
        }
    }
}

/// A lifecycle event whose phase stays open until every future registered
/// with [`wait_until`](Self::wait_until) has completed.
pub struct ExtendableEvent {
    kind: LifecycleEvent,
    pending: Vec<BoxFuture<'static, Result<()>>>,
}

impl ExtendableEvent {
    #[must_use]
    pub fn new(kind: LifecycleEvent) -> Self {
        Self {
            kind,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> LifecycleEvent {
        self.kind
    }

    /// Extends the phase until `future` completes. A failed future fails the
    /// phase.
    pub fn wait_until<Fut>(&mut self, future: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pending.push(future.boxed());
    }

    /// Number of futures holding the phase open.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Waits for every registered future. Returns the first failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the first registered future that failed.
    pub async fn settle(self) -> Result<()> {
        future::try_join_all(self.pending).await?;
        Ok(())
    }
}

/// An intercepted request. The handler may supply a response once; if it
/// does not, the host falls back to the network.
pub struct FetchEvent {
    request: Request,
    response: Option<BoxFuture<'static, Result<Response>>>,
}

impl FetchEvent {
    #[must_use]
    pub const fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
        }
    }

    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Supplies the eventual response for this request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a response was already supplied.
    pub fn respond_with<Fut>(&mut self, response: Fut) -> Result<()>
    where
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        if self.response.is_some() {
            return Err(Error::InvalidState(format!(
                "respond_with called twice for {}",
                self.request.url()
            )));
        }
        self.response = Some(response.boxed());
        Ok(())
    }

    #[must_use]
    pub const fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Returns the supplied response future, if any.
    #[must_use]
    pub fn into_response(self) -> Option<BoxFuture<'static, Result<Response>>> {
        self.response
    }
}

/// Commands a controlling page can send to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate without waiting, as if installation had asked for it.
    SkipWaiting,
}

/// A structured message posted by a page.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    data: serde_json::Value,
}

impl MessageEvent {
    #[must_use]
    pub const fn new(data: serde_json::Value) -> Self {
        Self { data }
    }

    #[must_use]
    pub const fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Parses the payload as a recognised command.
    #[must_use]
    pub fn control(&self) -> Option<ControlMessage> {
        ControlMessage::deserialize(&self.data).ok()
    }
}
