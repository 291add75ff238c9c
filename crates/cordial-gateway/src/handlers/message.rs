//! Message handlers. Messages are not stored; they are only announced.

use cordial_events::GatewayEvent;
use serde_json::Value;

use super::{HandlerContext, optional_str, required_str};
use crate::error::GatewayResult;

pub(super) fn message_create(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let author_id = data
        .get("author")
        .and_then(|author| author.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    ctx.publish(GatewayEvent::MessageReceived {
        metadata: ctx.metadata(),
        message_id: required_str(data, "id")?.to_string(),
        channel_id: required_str(data, "channel_id")?.to_string(),
        author_id,
        content: optional_str(data, "content").unwrap_or_default(),
    });
    Ok(())
}

pub(super) fn message_update(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    ctx.publish(GatewayEvent::MessageUpdated {
        metadata: ctx.metadata(),
        message_id: required_str(data, "id")?.to_string(),
        channel_id: required_str(data, "channel_id")?.to_string(),
        content: optional_str(data, "content").unwrap_or_default(),
    });
    Ok(())
}

pub(super) fn message_embed(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    let embeds = data
        .get("embeds")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    ctx.publish(GatewayEvent::MessageEmbedded {
        metadata: ctx.metadata(),
        message_id: required_str(data, "id")?.to_string(),
        channel_id: required_str(data, "channel_id")?.to_string(),
        embeds,
    });
    Ok(())
}

pub(super) fn message_delete(ctx: &HandlerContext<'_>, data: &Value) -> GatewayResult<()> {
    ctx.publish(GatewayEvent::MessageDeleted {
        metadata: ctx.metadata(),
        message_id: required_str(data, "id")?.to_string(),
        channel_id: required_str(data, "channel_id")?.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::EventKind;
    use super::super::test_support::{gateway, run};
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn message_create_publishes_received() {
        let gw = gateway();
        let mut rx = gw.bus.subscribe();
        run(
            &gw,
            EventKind::MessageCreate,
            &json!({"id": "m1", "channel_id": "c1", "author": {"id": "u1"}, "content": "hello"}),
        )
        .unwrap();

        match &*rx.try_recv().unwrap() {
            GatewayEvent::MessageReceived {
                metadata,
                author_id,
                content,
                ..
            } => {
                assert_eq!(author_id, "u1");
                assert_eq!(content, "hello");
                assert_eq!(metadata.sequence, Some(1));
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn message_embed_carries_embeds() {
        let gw = gateway();
        let mut rx = gw.bus.subscribe();
        run(
            &gw,
            EventKind::MessageEmbed,
            &json!({"id": "m1", "channel_id": "c1", "embeds": [{"url": "https://x"}]}),
        )
        .unwrap();
        assert!(matches!(
            &*rx.try_recv().unwrap(),
            GatewayEvent::MessageEmbedded { embeds, .. } if embeds.len() == 1
        ));
    }

    #[test]
    fn missing_channel_is_error() {
        let gw = gateway();
        let result = run(&gw, EventKind::MessageDelete, &json!({"id": "m1"}));
        assert!(matches!(result, Err(GatewayError::Protocol(_))));
    }
}
