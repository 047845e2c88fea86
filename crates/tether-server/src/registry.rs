//! Channel registry: pattern → handler.
//!
//! Built once at startup and shared read-only (`Arc`) across workers.
//! Overlapping patterns are refused at registration time, so resolution
//! never has to pick between two candidates.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::channel::{ChannelHandler, JoinNotify};
use crate::errors::RegistryError;
use crate::pattern::{Match, Pattern};

/// A registered channel.
pub struct Channel {
    pattern: Pattern,
    handler: Arc<dyn ChannelHandler>,
    notify: JoinNotify,
}

impl Channel {
    /// The pattern this channel was registered with.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Hooks for topics under this channel.
    pub fn handler(&self) -> &dyn ChannelHandler {
        self.handler.as_ref()
    }

    /// When `on_join` fires.
    pub fn notify(&self) -> JoinNotify {
        self.notify
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("pattern", &self.pattern)
            .field("notify", &self.notify)
            .finish_non_exhaustive()
    }
}

/// A topic resolved to its channel.
#[derive(Clone, Debug)]
pub struct Resolved {
    /// Matching channel.
    pub channel: Arc<Channel>,
    /// Wildcard remainder, `None` for static channels.
    pub suffix: Option<String>,
}

/// Registry mapping channel patterns to handlers.
#[derive(Default)]
pub struct ChannelRegistry {
    statics: HashMap<String, Arc<Channel>>,
    wildcards: Vec<Arc<Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern`, notifying the handler on each topic's first subscriber.
    pub fn register(
        &mut self,
        pattern: &str,
        handler: impl ChannelHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.register_with(pattern, handler, JoinNotify::FirstSubscriber)
    }

    /// Register `pattern` with an explicit join notification mode.
    pub fn register_with(
        &mut self,
        pattern: &str,
        handler: impl ChannelHandler + 'static,
        notify: JoinNotify,
    ) -> Result<(), RegistryError> {
        let parsed = Pattern::parse(pattern)?;
        if let Some(existing) = self.channels().find(|c| c.pattern.overlaps(&parsed)) {
            return Err(RegistryError::Overlap {
                pattern: pattern.to_owned(),
                existing: existing.pattern.to_string(),
            });
        }

        let channel = Arc::new(Channel {
            pattern: parsed,
            handler: Arc::new(handler),
            notify,
        });
        match &channel.pattern {
            Pattern::Static(name) => {
                let _ = self.statics.insert(name.clone(), channel);
            }
            Pattern::Wildcard { .. } => self.wildcards.push(channel),
        }
        debug!(pattern, ?notify, "channel registered");
        Ok(())
    }

    /// Resolve a topic to its channel.
    pub fn resolve(&self, topic: &str) -> Option<Resolved> {
        if let Some(channel) = self.statics.get(topic) {
            return Some(Resolved {
                channel: channel.clone(),
                suffix: None,
            });
        }
        self.wildcards.iter().find_map(|channel| {
            match channel.pattern.matches(topic) {
                Match::Matched { suffix } => Some(Resolved {
                    channel: channel.clone(),
                    suffix: suffix.map(str::to_owned),
                }),
                Match::Unmatched => None,
            }
        })
    }

    /// Registered patterns (sorted).
    pub fn patterns(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels().map(|c| c.pattern.to_string()).collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.statics.len() + self.wildcards.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.statics.values().chain(self.wildcards.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NoopHandler;
    use crate::pattern::PatternError;
    use assert_matches::assert_matches;

    fn registry(patterns: &[&str]) -> ChannelRegistry {
        let mut reg = ChannelRegistry::new();
        for p in patterns {
            reg.register(p, NoopHandler).unwrap();
        }
        reg
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg = ChannelRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.resolve("chat").is_none());
    }

    #[test]
    fn resolves_static() {
        let reg = registry(&["chat"]);
        let resolved = reg.resolve("chat").unwrap();
        assert_eq!(resolved.channel.pattern().to_string(), "chat");
        assert!(resolved.suffix.is_none());
        assert!(reg.resolve("chat:1").is_none());
    }

    #[test]
    fn resolves_wildcard_with_suffix() {
        let reg = registry(&["lobby", "room:*"]);
        let resolved = reg.resolve("room:42").unwrap();
        assert_eq!(resolved.channel.pattern().to_string(), "room:*");
        assert_eq!(resolved.suffix.as_deref(), Some("42"));
        assert!(reg.resolve("room").is_none());
        assert!(reg.resolve("room:").is_none());
    }

    #[test]
    fn overlapping_registration_rejected() {
        let mut reg = registry(&["room:*"]);
        assert_matches!(
            reg.register("room:vip", NoopHandler),
            Err(RegistryError::Overlap { existing, .. }) if existing == "room:*"
        );
        assert_matches!(
            reg.register("room:a:*", NoopHandler),
            Err(RegistryError::Overlap { .. })
        );
        assert_matches!(
            reg.register("room:*", NoopHandler),
            Err(RegistryError::Overlap { .. })
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_static_rejected() {
        let mut reg = registry(&["chat"]);
        assert_matches!(
            reg.register("chat", NoopHandler),
            Err(RegistryError::Overlap { .. })
        );
    }

    #[test]
    fn static_registered_before_wildcard_still_conflicts() {
        let mut reg = registry(&["news:today"]);
        assert_matches!(
            reg.register("news:*", NoopHandler),
            Err(RegistryError::Overlap { pattern, .. }) if pattern == "news:*"
        );
    }

    #[test]
    fn disjoint_patterns_coexist() {
        let reg = registry(&["room", "room:*", "rooms:*", "lobby"]);
        assert_eq!(reg.patterns(), vec!["lobby", "room", "room:*", "rooms:*"]);
        assert_eq!(
            reg.resolve("rooms:1").unwrap().channel.pattern().to_string(),
            "rooms:*"
        );
    }

    #[test]
    fn invalid_pattern_rejected() {
        let mut reg = ChannelRegistry::new();
        assert_matches!(
            reg.register("bad*", NoopHandler),
            Err(RegistryError::InvalidPattern(PatternError::MisplacedWildcard(_)))
        );
    }

    #[test]
    fn register_with_keeps_notify_mode() {
        let mut reg = ChannelRegistry::new();
        reg.register_with("feed:*", NoopHandler, JoinNotify::EverySubscriber)
            .unwrap();
        let resolved = reg.resolve("feed:x").unwrap();
        assert_eq!(resolved.channel.notify(), JoinNotify::EverySubscriber);
    }
}
