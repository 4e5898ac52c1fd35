//! Cooperative cancellation.
//!
//! Every blocking wait in the crate runs in short slices and checks a
//! [`CancelToken`] between them. A session token is a child of the server's
//! shutdown token, so cancelling either one stops the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GateError, Result};

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parents: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled by itself or by any of its ancestors.
    pub fn child(&self) -> Self {
        let mut parents = self.parents.clone();
        parents.push(self.flag.clone());
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parents,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.parents.iter().any(|p| p.load(Ordering::Acquire))
    }

    /// `Err(Cancelled)` once the token fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GateError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_but_not_the_reverse() {
        let root = CancelToken::new();
        let session = root.child();
        let nested = session.child();

        session.cancel();
        assert!(session.is_cancelled());
        assert!(nested.is_cancelled());
        assert!(!root.is_cancelled());

        let other = root.child();
        root.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(GateError::Cancelled)));
    }
}
