use warden::authz::engine::Component;

/// Builder for an in-memory handler tree
pub struct MockComponent {
    class: String,
    children: Vec<(String, MockComponent)>,
}

impl MockComponent {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, name: &str, child: MockComponent) -> Self {
        self.children.push((name.to_string(), child));
        self
    }
}

impl Component for MockComponent {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn child(&self, name: &str) -> Option<&dyn Component> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c as &dyn Component)
    }
}
