//! Poller trait and the decorator pipeline.
//!
//! A pipeline is a fetch stage wrapped by an ordered list of layers. Each
//! layer receives the rest of the chain as an explicit [`Next`] and decides
//! locally what to do with the outcome.
//!
//! ```text
//! Pipeline::new(fetch)
//!     .layer(A)   // innermost, sees fetch errors first
//!     .layer(B)   // wraps A
//!
//! update() → B.handle(next = A) → A.handle(next = fetch) → fetch.update()
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::polling::error::PollError;

pub type PollFuture<'a> = BoxFuture<'a, Result<(), PollError>>;

/// One fetch-and-publish round per call to [`Poller::update`].
pub trait Poller: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &str;

    fn update(&self) -> PollFuture<'_>;
}

/// A decorator around the rest of the chain.
pub trait Layer: Send + Sync {
    fn handle<'a>(&'a self, next: Next<'a>) -> PollFuture<'a>;
}

/// The rest of the chain below a layer.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    fetch: &'a dyn Poller,
    layers: &'a [Box<dyn Layer>],
}

impl<'a> Next<'a> {
    /// Name of the fetch stage at the bottom of the chain.
    pub fn target(&self) -> &'a str {
        self.fetch.name()
    }

    pub fn run(self) -> PollFuture<'a> {
        match self.layers.split_last() {
            Some((outer, inner)) => outer.handle(Next {
                fetch: self.fetch,
                layers: inner,
            }),
            None => self.fetch.update(),
        }
    }
}

/// A fetch stage and its layers.
pub struct Pipeline {
    fetch: Arc<dyn Poller>,
    layers: Vec<Box<dyn Layer>>,
}

impl Pipeline {
    pub fn new(fetch: Arc<dyn Poller>) -> Self {
        Self {
            fetch,
            layers: Vec::new(),
        }
    }

    /// Wrap everything added so far in `layer`.
    pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl Poller for Pipeline {
    fn name(&self) -> &str {
        self.fetch.name()
    }

    fn update(&self) -> PollFuture<'_> {
        Next {
            fetch: self.fetch.as_ref(),
            layers: &self.layers,
        }
        .run()
    }
}
