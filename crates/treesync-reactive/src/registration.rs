#![forbid(unsafe_code)]

//! Scoped-resource handle for subscriptions and other revocable effects.
//!
//! A [`Registration`] owns one revocation action. The action runs exactly
//! once: either eagerly through [`Registration::remove`] (which consumes the
//! handle, so a second call cannot be expressed) or when the handle is
//! dropped. [`Registration::empty`] produces an inert handle.
//!
//! # Failure Modes
//!
//! - Double removal: unrepresentable; `remove(self)` takes the handle by
//!   value.
//! - Panic inside the action: propagates to the caller of `remove` or to
//!   the drop site.

/// A disposable handle representing one active subscription or effect.
pub struct Registration {
    action: Option<Box<dyn FnOnce()>>,
}

impl Registration {
    /// Create a registration that runs `action` on removal or drop.
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A registration with no effect.
    #[must_use]
    pub fn empty() -> Self {
        Self { action: None }
    }

    /// Bundle several registrations into one; releasing the bundle releases
    /// the parts in reverse registration order.
    #[must_use]
    pub fn from_many(mut parts: Vec<Registration>) -> Self {
        Self::new(move || {
            while let Some(part) = parts.pop() {
                part.remove();
            }
        })
    }

    /// Release the underlying resource now. Consumes the handle, so removal
    /// happens exactly once.
    pub fn remove(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("armed", &self.action.is_some())
            .finish()
    }
}
