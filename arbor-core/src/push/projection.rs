//! Push Projection
//!
//! A projection watches some inputs and, when pinged while dirty,
//! recomputes a payload and pushes it down an external stream. It is the
//! one place in the core where an error is surfaced instead of absorbed:
//! a failing compute (or a rejected delivery) is forwarded to the stream
//! and the projection kills itself.
//!
//! Liveness is tied to the stream: a cancelled stream makes the
//! projection report dead on the next fan-out, which prunes it from its
//! inputs' subscriber lists.

use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::tree::{CellId, CellKind, Tree};

/// The single surfaced error of the core.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("projection compute failed: {0}")]
    Compute(String),
    #[error("stream rejected payload: {0}")]
    Deliver(String),
}

/// External delivery target.
pub trait PushStream {
    fn next(&mut self, payload: String);
    fn failure(&mut self, error: ProjectionError);
    fn is_cancelled(&self) -> bool;
}

/// Arena state of one projection.
pub struct ProjectionState {
    pub(crate) compute: Rc<dyn Fn(&mut Tree) -> Result<String, ProjectionError>>,
    pub(crate) stream: Option<Box<dyn PushStream>>,
    pub(crate) alive: bool,
}

impl ProjectionState {
    pub(crate) fn stream_cancelled(&self) -> bool {
        self.stream
            .as_ref()
            .map(|s| s.is_cancelled())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ProjectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionState")
            .field("alive", &self.alive)
            .field("has_stream", &self.stream.is_some())
            .finish()
    }
}

/// Handle to a push projection.
#[derive(Debug, Clone, Copy)]
pub struct RxProjection {
    id: CellId,
}

impl RxProjection {
    /// The projection starts dirty so the first ping delivers an initial
    /// payload. Subscribe it to its inputs with [`Tree::subscribe`].
    pub fn new(
        tree: &mut Tree,
        parent: Option<CellId>,
        stream: Box<dyn PushStream>,
        compute: impl Fn(&mut Tree) -> Result<String, ProjectionError> + 'static,
    ) -> Self {
        let state = ProjectionState {
            compute: Rc::new(compute),
            stream: Some(stream),
            alive: true,
        };
        let id = tree.alloc(CellKind::Projection(state), parent);
        if let Some(node) = tree.node_mut(id) {
            node.dirty = true;
        }
        Self { id }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn is_alive(&self, tree: &Tree) -> bool {
        tree.is_alive(self.id)
    }

    /// Deliver the recomputed payload if dirty, then clear dirty. Any
    /// failure goes to the stream and terminates the projection.
    pub fn ping(&self, tree: &mut Tree) {
        let ready = {
            let Some(node) = tree.node_mut(self.id) else { return };
            let ready = node.dirty
                && matches!(&node.kind, CellKind::Projection(p) if p.alive);
            node.dirty = false;
            node.invalid = false;
            ready
        };
        if !ready {
            return;
        }
        let Some((compute, mut stream)) = tree.projection_state_mut(self.id).map(|state| {
            (Rc::clone(&state.compute), state.stream.take())
        }) else {
            return;
        };
        let result = compute(tree);
        let mut kill = false;
        match stream.as_mut() {
            Some(stream) if stream.is_cancelled() => {
                kill = true;
            }
            Some(stream) => match result {
                Ok(payload) => {
                    stream.next(payload);
                    tree.cost(1);
                }
                Err(error) => {
                    debug!(?error, "projection failed; terminating");
                    stream.failure(error);
                    kill = true;
                }
            },
            None => kill = true,
        }
        if let Some(state) = tree.projection_state_mut(self.id) {
            state.stream = stream;
            if kill {
                state.alive = false;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::RxInt64;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct SinkState {
        sent: Vec<String>,
        failures: Vec<String>,
        cancelled: bool,
    }

    #[derive(Clone, Default)]
    struct Sink(Rc<RefCell<SinkState>>);

    impl PushStream for Sink {
        fn next(&mut self, payload: String) {
            self.0.borrow_mut().sent.push(payload);
        }

        fn failure(&mut self, error: ProjectionError) {
            self.0.borrow_mut().failures.push(error.to_string());
        }

        fn is_cancelled(&self) -> bool {
            self.0.borrow().cancelled
        }
    }

    #[test]
    fn ping_delivers_only_when_dirty() {
        let mut tree = Tree::new();
        let value = RxInt64::new(&mut tree, None, 1);
        let sink = Sink::default();
        let proj = RxProjection::new(&mut tree, None, Box::new(sink.clone()), move |t| {
            Ok(format!("{{\"v\":\"{}\"}}", value.get(t)))
        });
        tree.subscribe(value.id(), proj.id());

        // Starts dirty: first ping delivers.
        proj.ping(&mut tree);
        assert_eq!(sink.0.borrow().sent, vec!["{\"v\":\"1\"}"]);

        // Clean: nothing.
        proj.ping(&mut tree);
        assert_eq!(sink.0.borrow().sent.len(), 1);

        // Input change re-dirties through the subscriber link.
        value.set(&mut tree, 2);
        proj.ping(&mut tree);
        assert_eq!(sink.0.borrow().sent.last().unwrap(), "{\"v\":\"2\"}");
    }

    #[test]
    fn failure_terminates_and_forwards() {
        let mut tree = Tree::new();
        let sink = Sink::default();
        let proj = RxProjection::new(&mut tree, None, Box::new(sink.clone()), |_| {
            Err(ProjectionError::Compute("boom".to_string()))
        });

        proj.ping(&mut tree);
        assert_eq!(sink.0.borrow().failures.len(), 1);
        assert!(!proj.is_alive(&tree));

        // Dead projections ignore further pings.
        proj.ping(&mut tree);
        assert_eq!(sink.0.borrow().failures.len(), 1);
    }

    #[test]
    fn cancelled_stream_prunes_the_subscription() {
        let mut tree = Tree::new();
        let value = RxInt64::new(&mut tree, None, 1);
        let sink = Sink::default();
        let proj = RxProjection::new(&mut tree, None, Box::new(sink.clone()), |_| {
            Ok("{}".to_string())
        });
        tree.subscribe(value.id(), proj.id());

        sink.0.borrow_mut().cancelled = true;
        assert!(!proj.is_alive(&tree));

        // Fan-out sees the dead projection and drops the link.
        value.set(&mut tree, 5);
        let subs = tree.node(value.id()).unwrap().subscribers.clone();
        assert!(subs.is_empty());
    }
}
