//! READY, guild, member and role handlers.

use cordial_events::{EventMetadata, GatewayEvent};
use serde_json::Value;
use tracing::debug;

use super::{HandlerContext, nested_user_id, optional_str, required_str};
use crate::context::GatewayContext;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol;
use crate::registry::{
    ChannelKind, Guild, GuildAnnouncement, Role, User, channel_kind, parse_member,
    parse_private_channel, parse_text_channel, parse_voice_channel,
};

/// The event announcing a guild once it is fully loaded.
pub(crate) fn announcement_event(
    metadata: EventMetadata,
    guild_id: &str,
    announcement: GuildAnnouncement,
) -> GatewayEvent {
    let guild_id = guild_id.to_string();
    match announcement {
        GuildAnnouncement::Available => GatewayEvent::GuildAvailable { metadata, guild_id },
        GuildAnnouncement::Joined => GatewayEvent::GuildJoined { metadata, guild_id },
    }
}

fn unknown_guild(id: &str) -> GatewayError {
    GatewayError::UnknownEntity {
        kind: "guild",
        id: id.to_string(),
    }
}

fn array<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn is_unavailable(data: &Value) -> bool {
    data.get("unavailable").and_then(Value::as_bool) == Some(true)
}

fn mark_unavailable(gateway: &GatewayContext, id: &str) {
    if gateway
        .registry
        .update_guild(id, |g| g.unavailable = true)
        .is_none()
    {
        gateway.registry.insert_guild(Guild {
            id: id.to_string(),
            unavailable: true,
            ..Guild::default()
        });
    }
}

// ── Guild loading ────────────────────────────────────────────

/// Store a full guild object. Returns `(member_count, loaded_members)`.
fn load_guild(gateway: &GatewayContext, data: &Value) -> GatewayResult<(u64, u64)> {
    let registry = &gateway.registry;
    let id = required_str(data, "id")?;

    let mut guild = Guild {
        id: id.to_string(),
        name: optional_str(data, "name").unwrap_or_default(),
        owner_id: optional_str(data, "owner_id"),
        unavailable: false,
        member_count: data.get("member_count").and_then(Value::as_u64).unwrap_or(0),
        ..Guild::default()
    };

    for role in array(data, "roles") {
        if let Ok(role) = serde_json::from_value::<Role>(role.clone()) {
            guild.roles.insert(role.id.clone(), role);
        }
    }

    for member in array(data, "members") {
        if let Some((member, user)) = parse_member(member) {
            registry.upsert_user(user);
            guild.members.insert(member.user_id.clone(), member);
        }
    }

    for presence in array(data, "presences") {
        if let (Ok(user_id), Some(status)) =
            (nested_user_id(presence), optional_str(presence, "status"))
        {
            registry.update_user(user_id, |u| u.status = Some(status));
        }
    }

    for state in array(data, "voice_states") {
        if let (Some(user_id), Some(channel_id)) =
            (optional_str(state, "user_id"), optional_str(state, "channel_id"))
        {
            guild.voice_states.insert(user_id, channel_id);
        }
    }

    for channel in array(data, "channels") {
        match channel_kind(channel) {
            ChannelKind::Text => {
                if let Some(c) = parse_text_channel(channel, id) {
                    registry.insert_text_channel(c);
                }
            },
            ChannelKind::Voice => {
                if let Some(c) = parse_voice_channel(channel, id) {
                    registry.insert_voice_channel(c);
                }
            },
            ChannelKind::Private | ChannelKind::Other => {},
        }
    }

    let loaded = u64::try_from(guild.members.len()).unwrap_or(u64::MAX);
    let member_count = guild.member_count;
    registry.insert_guild(guild);
    Ok((member_count, loaded))
}

/// Store a guild and, when it is large and incomplete, lock it and ask for
/// its members. Returns `true` if the guild was locked.
fn ingest_guild(
    ctx: &HandlerContext<'_>,
    data: &Value,
    announcement: GuildAnnouncement,
) -> GatewayResult<bool> {
    let gateway = ctx.gateway;
    let id = required_str(data, "id")?;
    let (member_count, loaded) = load_guild(gateway, data)?;

    let large = data.get("large").and_then(Value::as_bool) == Some(true)
        || member_count > u64::from(gateway.config.large_threshold);
    if !large || loaded >= member_count {
        return Ok(false);
    }

    gateway
        .registry
        .locks()
        .lock(id, member_count, loaded, announcement);
    gateway
        .outbound
        .send(protocol::build_request_guild_members(id))?;
    debug!(guild_id = id, member_count, loaded, "Requested members for large guild");
    Ok(true)
}

// ── Handlers ─────────────────────────────────────────────────

pub(super) fn ready(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let registry = &ctx.gateway.registry;

    if let Some(user) = data.get("user") {
        let user: User = serde_json::from_value(user.clone())?;
        registry.set_self_user(user);
    }

    for guild in array(data, "guilds") {
        if is_unavailable(guild) {
            mark_unavailable(ctx.gateway, required_str(guild, "id")?);
        } else {
            ingest_guild(ctx, guild, GuildAnnouncement::Available)?;
        }
    }

    for channel in array(data, "private_channels") {
        if let Some(channel) = parse_private_channel(channel) {
            registry.insert_private_channel(channel);
        }
    }

    debug!(
        guilds = registry.guild_count(),
        private_channels = registry.private_channels().len(),
        "READY loaded"
    );
    Ok(())
}

pub(super) fn guild_create(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let id = required_str(data, "id")?;
    if is_unavailable(data) {
        mark_unavailable(ctx.gateway, id);
        return Ok(());
    }

    let announcement = if ctx.gateway.registry.guild(id).is_some() {
        GuildAnnouncement::Available
    } else {
        GuildAnnouncement::Joined
    };

    let locked = ingest_guild(ctx, data, announcement)?;
    if !locked && !ctx.cold_start {
        ctx.publish(announcement_event(ctx.metadata(), id, announcement));
    }
    Ok(())
}

pub(super) fn guild_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let id = required_str(data, "id")?;
    let name = optional_str(data, "name");
    let owner_id = optional_str(data, "owner_id");

    ctx.gateway
        .registry
        .update_guild(id, |g| {
            if let Some(name) = name {
                g.name = name;
            }
            if owner_id.is_some() {
                g.owner_id = owner_id;
            }
        })
        .ok_or_else(|| unknown_guild(id))?;

    ctx.publish(GatewayEvent::GuildUpdated {
        metadata: ctx.metadata(),
        guild_id: id.to_string(),
    });
    Ok(())
}

pub(super) fn guild_delete(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let id = required_str(data, "id")?;
    let registry = &ctx.gateway.registry;
    let unavailable = is_unavailable(data);

    if let Some(dropped) = registry.locks().remove(id) {
        debug!(guild_id = id, dropped, "Discarded member lock for departed guild");
    }
    if unavailable {
        mark_unavailable(ctx.gateway, id);
    } else {
        if let Some(manager) = registry.audio_manager(id) {
            manager.mark_disconnected();
        }
        registry.remove_guild(id).ok_or_else(|| unknown_guild(id))?;
    }

    ctx.publish(GatewayEvent::GuildLeft {
        metadata: ctx.metadata(),
        guild_id: id.to_string(),
        unavailable,
    });
    Ok(())
}

pub(super) fn members_chunk(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let registry = &ctx.gateway.registry;
    let members = array(data, "members");

    let parsed: Vec<_> = members.iter().filter_map(parse_member).collect();
    registry
        .update_guild(guild_id, |g| {
            for (member, _) in &parsed {
                g.members.insert(member.user_id.clone(), member.clone());
            }
        })
        .ok_or_else(|| unknown_guild(guild_id))?;
    for (_, user) in parsed {
        registry.upsert_user(user);
    }

    registry.locks().record_chunk(guild_id, members.len());
    ctx.publish(GatewayEvent::MembersChunkLoaded {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        count: members.len(),
    });
    Ok(())
}

pub(super) fn member_add(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let (member, user) =
        parse_member(data).ok_or_else(|| GatewayError::Protocol("malformed member".into()))?;
    let user_id = member.user_id.clone();

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| {
            g.members.insert(member.user_id.clone(), member);
            g.member_count = g.member_count.saturating_add(1);
        })
        .ok_or_else(|| unknown_guild(guild_id))?;
    ctx.gateway.registry.upsert_user(user);

    ctx.publish(GatewayEvent::MemberJoined {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        user_id,
    });
    Ok(())
}

pub(super) fn member_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let (member, _) =
        parse_member(data).ok_or_else(|| GatewayError::Protocol("malformed member".into()))?;
    let user_id = member.user_id.clone();

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| {
            g.members.insert(member.user_id.clone(), member);
        })
        .ok_or_else(|| unknown_guild(guild_id))?;

    ctx.publish(GatewayEvent::MemberUpdated {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        user_id,
    });
    Ok(())
}

pub(super) fn member_remove(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let user_id = nested_user_id(data)?;

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| {
            g.members.remove(user_id);
            g.voice_states.remove(user_id);
            g.member_count = g.member_count.saturating_sub(1);
        })
        .ok_or_else(|| unknown_guild(guild_id))?;

    ctx.publish(GatewayEvent::MemberLeft {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        user_id: user_id.to_string(),
    });
    Ok(())
}

pub(super) fn ban_add(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let user_id = nested_user_id(data)?;

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| g.bans.insert(user_id.to_string()))
        .ok_or_else(|| unknown_guild(guild_id))?;

    ctx.publish(GatewayEvent::MemberBanned {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        user_id: user_id.to_string(),
    });
    Ok(())
}

pub(super) fn ban_remove(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let user_id = nested_user_id(data)?;

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| g.bans.remove(user_id))
        .ok_or_else(|| unknown_guild(guild_id))?;

    ctx.publish(GatewayEvent::MemberUnbanned {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        user_id: user_id.to_string(),
    });
    Ok(())
}

fn upsert_role(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<(String, String)> {
    let guild_id = required_str(data, "guild_id")?;
    let role: Role = serde_json::from_value(
        data.get("role")
            .cloned()
            .ok_or_else(|| GatewayError::Protocol("missing `role`".into()))?,
    )?;
    let role_id = role.id.clone();

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| g.roles.insert(role.id.clone(), role))
        .ok_or_else(|| unknown_guild(guild_id))?;
    Ok((guild_id.to_string(), role_id))
}

pub(super) fn role_create(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let (guild_id, role_id) = upsert_role(ctx, data)?;
    ctx.publish(GatewayEvent::RoleCreated {
        metadata: ctx.metadata(),
        guild_id,
        role_id,
    });
    Ok(())
}

pub(super) fn role_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let (guild_id, role_id) = upsert_role(ctx, data)?;
    ctx.publish(GatewayEvent::RoleUpdated {
        metadata: ctx.metadata(),
        guild_id,
        role_id,
    });
    Ok(())
}

pub(super) fn role_delete(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let guild_id = required_str(data, "guild_id")?;
    let role_id = required_str(data, "role_id")?;

    ctx.gateway
        .registry
        .update_guild(guild_id, |g| {
            g.roles.remove(role_id);
            for member in g.members.values_mut() {
                member.roles.retain(|r| r != role_id);
            }
        })
        .ok_or_else(|| unknown_guild(guild_id))?;

    ctx.publish(GatewayEvent::RoleDeleted {
        metadata: ctx.metadata(),
        guild_id: guild_id.to_string(),
        role_id: role_id.to_string(),
    });
    Ok(())
}
