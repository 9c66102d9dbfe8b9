use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use warden::authz::errors::AccessDenied;
use warden::authz::hooks::{DenialHandler, Verifier};
use warden::authz::signal::Signal;

/// Verifier that denies a fixed set of node names, allows everything else
/// and records the order in which nodes were verified.
#[derive(Clone, Default)]
pub struct VerifyLog {
    deny: Arc<HashSet<String>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl VerifyLog {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn denying(names: &[&str]) -> Self {
        Self {
            deny: Arc::new(names.iter().map(|n| n.to_string()).collect()),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Verifier for VerifyLog {
    fn verify(&self, signal: &mut Signal) {
        let name = signal.node_name().to_string();
        let allowed = !self.deny.contains(&name);
        self.seen.lock().unwrap().push(name);
        signal.set_allowed(allowed);
    }
}

/// Denial handler recording each reported message.
#[derive(Clone, Default)]
pub struct DenialLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl DenialLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl DenialHandler for DenialLog {
    fn denied(&self, denial: &AccessDenied) {
        self.messages
            .lock()
            .unwrap()
            .push(denial.message().to_string());
    }
}
