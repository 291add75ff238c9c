//! Shared state handed to every gateway component.

use std::sync::Arc;

use cordial_events::{EventBus, GatewayEvent};

use crate::audio::AudioManager;
use crate::config::GatewayConfig;
use crate::connection::Outbound;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::EntityRegistry;

/// Configuration, registry, event bus and outbound handle for one client.
///
/// Cheap to clone; every clone refers to the same state.
#[derive(Debug, Clone)]
pub struct GatewayContext {
    /// Client configuration.
    pub config: Arc<GatewayConfig>,
    /// Entity registry.
    pub registry: Arc<EntityRegistry>,
    /// Domain event bus.
    pub bus: EventBus,
    /// Outbound frame queue for the current connection.
    pub outbound: Outbound,
}

impl GatewayContext {
    /// Build a context with an empty registry and a detached outbound handle.
    #[must_use]
    pub fn new(config: GatewayConfig, bus: EventBus) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(EntityRegistry::new()),
            bus,
            outbound: Outbound::new(),
        }
    }

    /// Audio manager for `guild_id`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AudioDisabled`] when audio is off and
    /// [`GatewayError::UnknownEntity`] when the guild is not in the registry.
    pub fn audio_manager(&self, guild_id: &str) -> GatewayResult<Arc<AudioManager>> {
        if !self.config.audio_enabled {
            return Err(GatewayError::AudioDisabled);
        }
        if self.registry.guild(guild_id).is_none() {
            return Err(GatewayError::UnknownEntity {
                kind: "guild",
                id: guild_id.to_string(),
            });
        }
        Ok(self.registry.audio_manager_or_insert_with(guild_id, || {
            AudioManager::new(guild_id, self.outbound.clone())
        }))
    }

    /// Publish a domain event. Returns the number of broadcast receivers.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        self.bus.publish(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Guild;

    #[test]
    fn audio_manager_requires_known_guild() {
        let ctx = GatewayContext::new(GatewayConfig::new("t"), EventBus::new());
        assert!(matches!(
            ctx.audio_manager("g1"),
            Err(GatewayError::UnknownEntity { kind: "guild", .. })
        ));

        ctx.registry.insert_guild(Guild {
            id: "g1".into(),
            ..Guild::default()
        });
        let first = ctx.audio_manager("g1").unwrap();
        let second = ctx.audio_manager("g1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn audio_manager_respects_disabled_audio() {
        let mut config = GatewayConfig::new("t");
        config.audio_enabled = false;
        let ctx = GatewayContext::new(config, EventBus::new());
        ctx.registry.insert_guild(Guild {
            id: "g1".into(),
            ..Guild::default()
        });
        assert!(matches!(
            ctx.audio_manager("g1"),
            Err(GatewayError::AudioDisabled)
        ));
    }
}
