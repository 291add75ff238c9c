//! Voice signaling handlers.

use cordial_events::GatewayEvent;
use serde_json::Value;
use tracing::{debug, warn};

use super::{HandlerContext, optional_str, required_str};
use crate::error::GatewayResult;

pub(super) fn voice_state_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let registry = &ctx.gateway.registry;
    let user_id = required_str(data, "user_id")?;
    let guild_id = optional_str(data, "guild_id");
    let channel_id = optional_str(data, "channel_id");

    if let Some(guild_id) = guild_id.as_deref() {
        registry.update_guild(guild_id, |g| match &channel_id {
            Some(channel) => {
                g.voice_states.insert(user_id.to_string(), channel.clone());
            },
            None => {
                g.voice_states.remove(user_id);
            },
        });

        let is_self = registry.self_user().is_some_and(|me| me.id == user_id);
        if is_self
            && channel_id.is_none()
            && let Some(manager) = registry.audio_manager(guild_id)
            && manager.mark_unexpectedly_disconnected()
        {
            warn!(guild_id, "Audio connection dropped by the server");
        }
    }

    ctx.publish(GatewayEvent::VoiceStateUpdated {
        metadata: ctx.metadata(),
        user_id: user_id.to_string(),
        guild_id,
        channel_id,
    });
    Ok(())
}

pub(super) fn voice_server_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let endpoint = optional_str(data, "endpoint");

    if let Some(manager) = ctx.gateway.registry.audio_manager(guild_id)
        && manager.mark_connected()
    {
        debug!(guild_id, endpoint = ?endpoint, "Audio connection established");
    }

    ctx.publish(GatewayEvent::VoiceServerUpdated {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        endpoint,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::super::EventKind;
    use super::super::test_support::{gateway, run};
    use crate::audio::AudioConnectionState;
    use crate::registry::{Guild, User, VoiceChannel};

    #[test]
    fn server_update_then_forced_leave() {
        let gw = gateway();
        let (tx, _out) = mpsc::unbounded_channel();
        gw.outbound.attach(tx);
        gw.registry.set_self_user(User {
            id: "me".into(),
            ..User::default()
        });
        gw.registry.insert_guild(Guild {
            id: "g1".into(),
            ..Guild::default()
        });
        let channel = VoiceChannel {
            id: "v1".into(),
            guild_id: "g1".into(),
            ..VoiceChannel::default()
        };
        gw.registry.insert_voice_channel(channel.clone());

        let manager = gw.audio_manager("g1").unwrap();
        manager.open_audio_connection(&channel).unwrap();

        run(
            &gw,
            EventKind::VoiceServerUpdate,
            &json!({"guild_id": "g1", "endpoint": "voice.example:80", "token": "x"}),
        )
        .unwrap();
        assert_eq!(manager.state(), AudioConnectionState::Connected("v1".into()));

        run(
            &gw,
            EventKind::VoiceStateUpdate,
            &json!({"user_id": "me", "guild_id": "g1", "channel_id": null}),
        )
        .unwrap();
        assert_eq!(
            manager.state(),
            AudioConnectionState::UnexpectedlyDisconnected("v1".into())
        );
    }

    #[test]
    fn other_users_voice_state_is_tracked() {
        let gw = gateway();
        gw.registry.insert_guild(Guild {
            id: "g1".into(),
            ..Guild::default()
        });
        run(
            &gw,
            EventKind::VoiceStateUpdate,
            &json!({"user_id": "u1", "guild_id": "g1", "channel_id": "v1"}),
        )
        .unwrap();
        assert_eq!(
            gw.registry.guild("g1").unwrap().voice_states.get("u1").map(String::as_str),
            Some("v1")
        );

        run(
            &gw,
            EventKind::VoiceStateUpdate,
            &json!({"user_id": "u1", "guild_id": "g1", "channel_id": null}),
        )
        .unwrap();
        assert!(gw.registry.guild("g1").unwrap().voice_states.is_empty());
    }
}
