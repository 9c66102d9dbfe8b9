use std::collections::HashMap;

use crate::authz::errors::LinkError;

/// Parsed `"<presenterPath>:<actionOrSignal>[!]"` link destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Presenter path without the leading `:`, e.g. "Admin:User"
    pub presenter: String,
    /// Action, render or signal name; may be empty
    pub target: String,
    /// Trailing `!`: the target is a signal
    pub signal: bool,
}

impl Destination {
    pub fn parse(dest: &str) -> Result<Self, LinkError> {
        let invalid = || LinkError::InvalidLinkDestination(dest.to_string());

        let (body, signal) = match dest.strip_suffix('!') {
            Some(body) => (body, true),
            None => (dest, false),
        };
        let (presenter, target) = body.rsplit_once(':').ok_or_else(invalid)?;

        let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
        if presenter.is_empty() || !presenter.chars().all(|c| is_word(c) || c == ':') {
            return Err(invalid());
        }
        if !target.chars().all(is_word) {
            return Err(invalid());
        }

        let presenter = presenter.trim_start_matches(':');
        if presenter.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            presenter: presenter.to_string(),
            target: target.to_string(),
            signal,
        })
    }
}

/// Maps presenter paths used in links to the class names the policy tree is
/// keyed by. Supplied by the host, which owns presenter naming.
pub trait ClassResolver: Send + Sync {
    fn resolve_class(&self, presenter: &str) -> Option<String>;
}

impl<F> ClassResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve_class(&self, presenter: &str) -> Option<String> {
        self(presenter)
    }
}

/// Presenter path is the class name.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl ClassResolver for IdentityResolver {
    fn resolve_class(&self, presenter: &str) -> Option<String> {
        Some(presenter.to_string())
    }
}

/// Explicit presenter -> class table, usually taken from settings.
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    presenters: HashMap<String, String>,
}

impl TableResolver {
    pub fn new(presenters: HashMap<String, String>) -> Self {
        Self { presenters }
    }
}

impl ClassResolver for TableResolver {
    fn resolve_class(&self, presenter: &str) -> Option<String> {
        self.presenters.get(presenter).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_destination() {
        let d = Destination::parse("Admin:removeUser!").unwrap();
        assert_eq!(d.presenter, "Admin");
        assert_eq!(d.target, "removeUser");
        assert!(d.signal);
    }

    #[test]
    fn test_parse_module_path() {
        let d = Destination::parse(":Admin:User:edit").unwrap();
        assert_eq!(d.presenter, "Admin:User");
        assert_eq!(d.target, "edit");
        assert!(!d.signal);

        let d = Destination::parse("Admin:").unwrap();
        assert_eq!(d.target, "");
    }

    #[test]
    fn test_parse_invalid_destinations() {
        for dest in ["", "Admin", ":edit", "Admin:edit?x=1", "Ad min:edit", "Admin:edit!!"] {
            assert!(
                matches!(
                    Destination::parse(dest),
                    Err(LinkError::InvalidLinkDestination(_))
                ),
                "{dest:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolvers() {
        assert_eq!(IdentityResolver.resolve_class("Admin"), Some("Admin".into()));

        let table = TableResolver::new(HashMap::from([(
            "Admin:User".to_string(),
            "App.AdminModule.UserPresenter".to_string(),
        )]));
        assert_eq!(
            table.resolve_class("Admin:User").as_deref(),
            Some("App.AdminModule.UserPresenter")
        );
        assert!(table.resolve_class("Front").is_none());

        let closure = |p: &str| Some(format!("App.{p}Presenter"));
        assert_eq!(closure.resolve_class("Admin").as_deref(), Some("App.AdminPresenter"));
    }
}
