//! Thread-conversion policy
//!
//! Decides whether a thread-creation request becomes a task on an engine
//! or stays a native OS thread. Rules have the form `kind:pattern` where
//! kind is `name`, `class` or `package`, separated by `,` or `;`:
//!
//! ```text
//! name:wisp-*, class:app.net.Acceptor; package:app.legacy.*
//! ```
//!
//! A blacklisted thread always stays native. Otherwise it is converted if
//! `convert_all` is set or, in whitelist mode, if a whitelist rule matches.

mod descriptor;
mod pattern;

pub use descriptor::ThreadDescriptor;
pub use pattern::Pattern;

use crate::config::ThreadPolicyConfig;
use crate::error::PolicyError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a rule's pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Thread name
    Name,
    /// Declaring class
    Class,
    /// Package of the declaring class
    Package,
}

impl RuleKind {
    fn parse(kind: &str, rule: &str) -> Result<Self, PolicyError> {
        match kind {
            "name" => Ok(RuleKind::Name),
            "class" => Ok(RuleKind::Class),
            "package" => Ok(RuleKind::Package),
            _ => Err(PolicyError::UnknownKind {
                kind: kind.to_string(),
                rule: rule.to_string(),
            }),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RuleKind::Name => "name",
            RuleKind::Class => "class",
            RuleKind::Package => "package",
        }
    }
}

/// One `kind:pattern` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    kind: RuleKind,
    pattern: Pattern,
}

impl Rule {
    /// Parse a single rule.
    pub fn parse(rule: &str) -> Result<Self, PolicyError> {
        let (kind, pattern) = rule
            .split_once(':')
            .ok_or_else(|| PolicyError::MissingKind(rule.to_string()))?;
        let kind = RuleKind::parse(kind.trim(), rule)?;
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PolicyError::EmptyPattern(rule.to_string()));
        }
        Ok(Self {
            kind,
            pattern: Pattern::compile(pattern)?,
        })
    }

    /// Whether this rule matches `desc`. Class and package rules never match
    /// a descriptor without that information.
    pub fn matches(&self, desc: &ThreadDescriptor) -> bool {
        let subject = match self.kind {
            RuleKind::Name => Some(desc.name()),
            RuleKind::Class => desc.class(),
            RuleKind::Package => desc.package(),
        };
        subject.is_some_and(|s| self.pattern.matches(s))
    }

    /// The rule's kind
    pub fn kind(&self) -> RuleKind {
        self.kind
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.pattern)
    }
}

/// Ordered rules; the first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleList {
    rules: Vec<Rule>,
}

impl RuleList {
    /// Parse a `,`/`;` separated list. Empty entries are skipped.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let rules = text
            .split([',', ';'])
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Rule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// First rule matching `desc`.
    pub fn first_match(&self, desc: &ThreadDescriptor) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(desc))
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of evaluating a thread-creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Run as a task on an engine
    Task,
    /// Run as a plain OS thread
    Native,
}

/// Compiled black/white-list rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionPolicy {
    convert_all: bool,
    blacklist: RuleList,
    whitelist: Option<RuleList>,
}

impl ConversionPolicy {
    /// Compile the rules in `config`.
    pub fn from_config(config: &ThreadPolicyConfig) -> Result<Self, PolicyError> {
        let blacklist = RuleList::parse(&config.blacklist)?;
        let whitelist = config
            .whitelist
            .as_deref()
            .map(RuleList::parse)
            .transpose()?;
        Ok(Self {
            convert_all: config.convert_all,
            blacklist,
            whitelist,
        })
    }

    /// Decide how to run the thread described by `desc`.
    pub fn decide(&self, desc: &ThreadDescriptor) -> Conversion {
        if let Some(rule) = self.blacklist.first_match(desc) {
            debug!(thread = desc.name(), %rule, "blacklisted; running natively");
            return Conversion::Native;
        }
        if self.convert_all {
            return Conversion::Task;
        }
        match self
            .whitelist
            .as_ref()
            .and_then(|list| list.first_match(desc))
        {
            Some(rule) => {
                debug!(thread = desc.name(), %rule, "whitelisted; converting");
                Conversion::Task
            }
            None => Conversion::Native,
        }
    }

    /// Whether whitelist mode is active
    pub fn is_whitelist_mode(&self) -> bool {
        self.whitelist.is_some()
    }
}

/// A shared, reloadable [`ConversionPolicy`].
#[derive(Debug, Clone, Default)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<ConversionPolicy>>>,
}

impl PolicyHandle {
    /// Wrap an already compiled policy.
    pub fn new(policy: ConversionPolicy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    /// Compile `config` into a new handle.
    pub fn from_config(config: &ThreadPolicyConfig) -> Result<Self, PolicyError> {
        Ok(Self::new(ConversionPolicy::from_config(config)?))
    }

    /// The active policy
    pub fn load(&self) -> Arc<ConversionPolicy> {
        self.current.read().clone()
    }

    /// Evaluate `desc` against the active policy.
    pub fn decide(&self, desc: &ThreadDescriptor) -> Conversion {
        self.load().decide(desc)
    }

    /// Swap in rules compiled from `config`. On error the active policy is
    /// left untouched.
    pub fn reload(&self, config: &ThreadPolicyConfig) -> Result<(), PolicyError> {
        match ConversionPolicy::from_config(config) {
            Ok(policy) => {
                debug!(
                    convert_all = policy.convert_all,
                    blacklist = policy.blacklist.len(),
                    whitelist = policy.whitelist.as_ref().map_or(0, RuleList::len),
                    "thread policy reloaded"
                );
                *self.current.write() = Arc::new(policy);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rejected thread policy reload; keeping previous rules");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(convert_all: bool, blacklist: &str, whitelist: Option<&str>) -> ConversionPolicy {
        ConversionPolicy::from_config(&ThreadPolicyConfig {
            convert_all,
            blacklist: blacklist.to_string(),
            whitelist: whitelist.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn test_rule_list_separators() {
        let list = RuleList::parse("name:a-*, class:x.Y ;package:p.*,,").unwrap();
        assert_eq!(list.len(), 3);
        assert!(RuleList::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_rules_rejected() {
        assert_eq!(
            RuleList::parse("wisp-*"),
            Err(PolicyError::MissingKind("wisp-*".to_string()))
        );
        assert!(matches!(
            RuleList::parse("thread:wisp-*"),
            Err(PolicyError::UnknownKind { .. })
        ));
        assert!(matches!(
            RuleList::parse("name:"),
            Err(PolicyError::EmptyPattern(_))
        ));
    }

    #[test]
    fn test_blacklist_overrides_convert_all() {
        let p = policy(true, "name:wisp-*", None);
        assert_eq!(p.decide(&ThreadDescriptor::new("wisp-1")), Conversion::Native);
        assert_eq!(p.decide(&ThreadDescriptor::new("other-1")), Conversion::Task);
    }

    #[test]
    fn test_whitelist_only_mode() {
        let p = policy(false, "", Some("name:wisp-*"));
        assert!(p.is_whitelist_mode());
        assert_eq!(p.decide(&ThreadDescriptor::new("wisp-1")), Conversion::Task);
        assert_eq!(p.decide(&ThreadDescriptor::new("other-1")), Conversion::Native);
    }

    #[test]
    fn test_blacklist_beats_whitelist() {
        let p = policy(false, "class:app.Legacy", Some("package:app"));
        let legacy = ThreadDescriptor::new("t").with_class("app.Legacy");
        let fresh = ThreadDescriptor::new("t").with_class("app.Fresh");
        assert_eq!(p.decide(&legacy), Conversion::Native);
        assert_eq!(p.decide(&fresh), Conversion::Task);
    }

    #[test]
    fn test_class_rule_needs_class() {
        let rule = Rule::parse("class:*").unwrap();
        assert!(!rule.matches(&ThreadDescriptor::new("anything")));
        assert_eq!(rule.to_string(), "class:*");
    }

    #[test]
    fn test_default_is_native() {
        let p = ConversionPolicy::default();
        assert_eq!(p.decide(&ThreadDescriptor::new("x")), Conversion::Native);
    }

    #[test]
    fn test_invalid_reload_keeps_previous() {
        let handle = PolicyHandle::new(policy(true, "name:wisp-*", None));
        let bad = ThreadPolicyConfig {
            convert_all: false,
            blacklist: "bogus".to_string(),
            whitelist: None,
        };
        assert!(handle.reload(&bad).is_err());
        assert_eq!(handle.decide(&ThreadDescriptor::new("other")), Conversion::Task);

        let good = ThreadPolicyConfig {
            convert_all: false,
            blacklist: String::new(),
            whitelist: Some("name:other".to_string()),
        };
        handle.reload(&good).unwrap();
        assert_eq!(handle.decide(&ThreadDescriptor::new("other")), Conversion::Task);
        assert_eq!(handle.decide(&ThreadDescriptor::new("wisp-1")), Conversion::Native);
    }
}
