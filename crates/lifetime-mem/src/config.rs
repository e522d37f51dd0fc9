//! Factory configuration.

use std::borrow::Cow;

/// Settings shared by [`ConcreteFactory`](crate::ConcreteFactory) and
/// [`GenericFactory`](crate::GenericFactory).
///
/// ```
/// use lifetime_mem::FactoryConfig;
///
/// let config = FactoryConfig::default()
///     .named("textures")
///     .with_live_capacity(256);
/// assert_eq!(config.name(), "textures");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfig {
    name: Cow<'static, str>,
    live_capacity: usize,
}

impl FactoryConfig {
    /// Name used in errors and log events.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of live objects to reserve room for up front.
    pub fn with_live_capacity(mut self, capacity: usize) -> Self {
        self.live_capacity = capacity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn live_capacity(&self) -> usize {
        self.live_capacity
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("factory"),
            live_capacity: 0,
        }
    }
}
