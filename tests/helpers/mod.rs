pub mod components;
pub mod hooks;

pub use components::MockComponent;
pub use hooks::{DenialLog, VerifyLog};
