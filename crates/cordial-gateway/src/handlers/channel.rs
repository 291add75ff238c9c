//! Channel create/update/delete.

use cordial_events::GatewayEvent;
use serde_json::Value;
use tracing::debug;

use super::{HandlerContext, optional_str, required_str};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{
    ChannelKind, channel_kind, parse_private_channel, parse_text_channel, parse_voice_channel,
};

/// Store any channel object. Returns its guild id, if it has one.
fn store_channel(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<Option<String>> {
    let registry = &ctx.gateway.registry;
    let guild_id = optional_str(data, "guild_id");
    let malformed = || GatewayError::Protocol("malformed channel".into());

    match channel_kind(data) {
        ChannelKind::Text => {
            let gid = guild_id.as_deref().ok_or_else(malformed)?;
            registry.insert_text_channel(parse_text_channel(data, gid).ok_or_else(malformed)?);
        },
        ChannelKind::Voice => {
            let gid = guild_id.as_deref().ok_or_else(malformed)?;
            registry.insert_voice_channel(parse_voice_channel(data, gid).ok_or_else(malformed)?);
        },
        ChannelKind::Private => {
            registry.insert_private_channel(parse_private_channel(data).ok_or_else(malformed)?);
        },
        ChannelKind::Other => {
            debug!(channel_id = ?optional_str(data, "id"), "Ignoring channel of unknown type");
        },
    }
    Ok(guild_id)
}

pub(super) fn channel_create(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let channel_id = required_str(data, "id")?.to_string();
    let guild_id = store_channel(ctx, data)?;
    ctx.publish(GatewayEvent::ChannelCreated {
        metadata: ctx.metadata(),
        channel_id,
        guild_id,
    });
    Ok(())
}

pub(super) fn channel_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let channel_id = required_str(data, "id")?.to_string();
    let guild_id = store_channel(ctx, data)?;
    ctx.publish(GatewayEvent::ChannelUpdated {
        metadata: ctx.metadata(),
        channel_id,
        guild_id,
    });
    Ok(())
}

pub(super) fn channel_delete(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let channel_id = required_str(data, "id")?;
    let guild_id = ctx
        .gateway
        .registry
        .remove_channel(channel_id)
        .ok_or_else(|| GatewayError::UnknownEntity {
            kind: "channel",
            id: channel_id.to_string(),
        })?;

    ctx.publish(GatewayEvent::ChannelDeleted {
        metadata: ctx.metadata(),
        channel_id: channel_id.to_string(),
        guild_id,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::EventKind;
    use super::super::test_support::{gateway, run};
    use super::*;

    #[test]
    fn create_update_delete_text_channel() {
        let gw = gateway();
        let mut rx = gw.bus.subscribe();

        run(
            &gw,
            EventKind::ChannelCreate,
            &json!({"id": "t1", "guild_id": "g1", "type": "text", "name": "general"}),
        )
        .unwrap();
        assert_eq!(gw.registry.text_channel("t1").unwrap().name, "general");

        run(
            &gw,
            EventKind::ChannelUpdate,
            &json!({"id": "t1", "guild_id": "g1", "type": "text", "name": "renamed", "topic": "hi"}),
        )
        .unwrap();
        let channel = gw.registry.text_channel("t1").unwrap();
        assert_eq!(channel.name, "renamed");
        assert_eq!(channel.topic.as_deref(), Some("hi"));

        run(&gw, EventKind::ChannelDelete, &json!({"id": "t1"})).unwrap();
        assert!(gw.registry.text_channel("t1").is_none());

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv())
            .map(|e| e.event_type())
            .collect();
        assert_eq!(kinds, vec!["channel_created", "channel_updated", "channel_deleted"]);
    }

    #[test]
    fn private_channel_create() {
        let gw = gateway();
        run(
            &gw,
            EventKind::ChannelCreate,
            &json!({"id": "p1", "is_private": true, "recipient": {"id": "u1"}}),
        )
        .unwrap();
        assert_eq!(gw.registry.private_channel("p1").unwrap().recipient_id, "u1");
    }

    #[test]
    fn guild_channel_without_guild_is_error() {
        let gw = gateway();
        let result = run(&gw, EventKind::ChannelCreate, &json!({"id": "v1", "type": "voice"}));
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
    }

    #[test]
    fn deleting_unknown_channel_is_error() {
        let gw = gateway();
        let result = run(&gw, EventKind::ChannelDelete, &json!({"id": "zzz"}));
        assert!(matches!(result, Err(GatewayError::UnknownEntity { kind: "channel", .. })));
    }
}
