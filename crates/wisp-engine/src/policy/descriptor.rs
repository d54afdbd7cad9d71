//! What the conversion policy knows about a thread being created

use serde::Serialize;

/// Identity of a thread-creation request.
///
/// `class` is the type that started the thread, in dotted form
/// (`app.net.Acceptor`). When no package is given it is taken from the class
/// path up to the last dot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ThreadDescriptor {
    name: String,
    class: Option<String>,
    package: Option<String>,
}

impl ThreadDescriptor {
    /// A descriptor carrying only a thread name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: None,
            package: None,
        }
    }

    /// Set the declaring class, deriving the package if none was given.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        if self.package.is_none() {
            self.package = class
                .rsplit_once('.')
                .map(|(package, _)| package.to_string());
        }
        self.class = Some(class);
        self
    }

    /// Set the package explicitly.
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring class, if known
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    /// Package, if known
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_derived_from_class() {
        let desc = ThreadDescriptor::new("t").with_class("app.net.Acceptor");
        assert_eq!(desc.class(), Some("app.net.Acceptor"));
        assert_eq!(desc.package(), Some("app.net"));
    }

    #[test]
    fn test_explicit_package_wins() {
        let desc = ThreadDescriptor::new("t")
            .with_package("lib")
            .with_class("app.net.Acceptor");
        assert_eq!(desc.package(), Some("lib"));

        let bare = ThreadDescriptor::new("t").with_class("Main");
        assert_eq!(bare.package(), None);
    }
}
