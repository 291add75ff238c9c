//! Presence, typing and self-user handlers.

use cordial_events::GatewayEvent;
use serde_json::Value;

use super::{HandlerContext, nested_user_id, optional_str, required_str};
use crate::error::GatewayResult;
use crate::registry::User;

pub(super) fn presence_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let registry = &ctx.gateway.registry;
    let user_id = nested_user_id(data)?;
    let status = optional_str(data, "status");

    // Partial user objects only carry the id.
    let full_user = data
        .get("user")
        .filter(|u| u.get("username").is_some())
        .and_then(|u| serde_json::from_value::<User>(u.clone()).ok());
    if let Some(mut user) = full_user {
        user.status.clone_from(&status);
        registry.upsert_user(user);
    } else if status.is_some() {
        registry.update_user(user_id, |u| u.status.clone_from(&status));
    }

    ctx.publish(GatewayEvent::PresenceUpdated {
        metadata: ctx.metadata(),
        user_id: user_id.to_string(),
        guild_id: optional_str(data, "guild_id"),
        status,
    });
    Ok(())
}

pub(super) fn typing_start(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    ctx.publish(GatewayEvent::UserTyping {
        metadata: ctx.metadata(),
        user_id: required_str(data, "user_id")?.to_string(),
        channel_id: required_str(data, "channel_id")?.to_string(),
    });
    Ok(())
}

pub(super) fn user_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let user: User = serde_json::from_value(data.clone())?;
    let user_id = user.id.clone();
    ctx.gateway.registry.set_self_user(user);

    ctx.publish(GatewayEvent::SelfUpdated {
        metadata: ctx.metadata(),
        user_id,
    });
    Ok(())
}
