//! Extension points through which the host plugs in the actual
//! authorization decision and the response to a refusal.

use std::sync::Arc;

use crate::authz::errors::AccessDenied;
use crate::authz::signal::Signal;

/// Decides allow/deny for one signal by calling [`Signal::set_allowed`].
///
/// Leaving a signal undecided does not stop resolution, but the signal then
/// reports `is_allowed() == false` to link and template lookups.
pub trait Verifier: Send + Sync {
    fn verify(&self, signal: &mut Signal);
}

/// Receives the terminal denial of a request, once per request.
pub trait DenialHandler: Send + Sync {
    fn denied(&self, denial: &AccessDenied);
}

impl<F> Verifier for F
where
    F: Fn(&mut Signal) + Send + Sync,
{
    fn verify(&self, signal: &mut Signal) {
        self(signal)
    }
}

impl<F> DenialHandler for F
where
    F: Fn(&AccessDenied) + Send + Sync,
{
    fn denied(&self, denial: &AccessDenied) {
        self(denial)
    }
}

/// Ordered hook lists registered before any resolution happens.
#[derive(Clone, Default)]
pub struct Hooks {
    verifiers: Vec<Arc<dyn Verifier>>,
    denial_handlers: Vec<Arc<dyn DenialHandler>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_verify(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifiers.push(Arc::new(verifier));
        self
    }

    pub fn on_denied(mut self, handler: impl DenialHandler + 'static) -> Self {
        self.denial_handlers.push(Arc::new(handler));
        self
    }

    /// Run verifiers in registration order, stopping after the first denial.
    pub fn verify(&self, signal: &mut Signal) {
        for verifier in &self.verifiers {
            verifier.verify(signal);
            if signal.is_denied() {
                break;
            }
        }
    }

    pub fn denied(&self, denial: &AccessDenied) {
        for handler in &self.denial_handlers {
            handler.denied(denial);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("verifiers", &self.verifiers.len())
            .field("denial_handlers", &self.denial_handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::{DeclaredPolicyFact, NodeRef, ResourceIdx};
    use crate::authz::PolicyTree;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signal() -> Signal {
        let tree = PolicyTree::compile(vec![DeclaredPolicyFact::resource("App.Admin")]).unwrap();
        Signal::new(Arc::new(tree), NodeRef::Resource(ResourceIdx(0)))
    }

    #[test]
    fn test_verifiers_stop_after_first_denial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = Hooks::new()
            .on_verify(|s: &mut Signal| {
                s.deny("nope");
            })
            .on_verify(move |s: &mut Signal| {
                counter.fetch_add(1, Ordering::SeqCst);
                s.set_allowed(true);
            });

        let mut s = signal();
        hooks.verify(&mut s);
        assert!(s.is_denied());
        assert_eq!(s.message(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_every_denial_handler_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = (calls.clone(), calls.clone());
        let hooks = Hooks::new()
            .on_denied(move |_: &AccessDenied| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .on_denied(move |_: &AccessDenied| {
                b.fetch_add(1, Ordering::SeqCst);
            });

        let denial = AccessDenied::new(Arc::new(signal()), "denied");
        hooks.denied(&denial);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
