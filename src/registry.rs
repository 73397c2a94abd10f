//! The catalogue of rule classes the engine discovers rules from.

use crate::rule::RuleClass;

pub struct Registry {
    classes: Vec<&'static RuleClass>,
}

impl Registry {
    /// An empty registry, for callers that supply their own rules.
    pub fn new() -> Self {
        Registry {
            classes: Vec::new(),
        }
    }

    /// All the built-in rules.
    pub fn builtin() -> Self {
        let mut registry = Registry::new();
        for &class in crate::rules::BUILTIN {
            registry.register(class);
        }
        registry
    }

    /// Add a class.  A class whose name is already registered replaces the
    /// existing one, keeping its position.
    pub fn register(&mut self, class: &'static RuleClass) {
        match self.classes.iter_mut().find(|c| c.name == class.name) {
            Some(slot) => *slot = class,
            None => self.classes.push(class),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'static RuleClass> {
        self.classes.iter().copied().find(|c| c.name == name)
    }

    /// Registered classes in registration order, which is the order
    /// discovery considers them in.
    pub fn classes(&self) -> impl Iterator<Item = &'static RuleClass> + '_ {
        self.classes.iter().copied()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
