//! Proxy steps: forward events to external topics.

use crate::context::ProcessContext;
use crate::definition::ProxyRoute;
use crate::error::Result;
use crate::message::StepMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Deliver one message through the external channel, using the route keyed
/// by the message's function name (the authored local event name).
///
/// Missing routes and a missing channel are non-fatal: the message is
/// dropped with a warning, matching the engine's storage error policy of
/// degrading rather than failing the process.
pub(crate) async fn forward(
    routes: &HashMap<String, ProxyRoute>,
    message: &StepMessage,
    ctx: &Arc<ProcessContext>,
) -> Result<()> {
    let Some(route) = routes.get(&message.function_name) else {
        warn!(
            step = %message.destination_id,
            event = %message.function_name,
            "proxy step has no route for event; dropping"
        );
        return Ok(());
    };
    let Some(channel) = &ctx.external else {
        warn!(
            step = %message.destination_id,
            topic = %route.topic,
            "proxy step cannot forward: no external channel configured"
        );
        return Ok(());
    };

    if let Err(e) = channel
        .emit(&route.topic, route.channel_key.as_deref(), message.data.as_ref())
        .await
    {
        warn!(
            topic = %route.topic,
            error = %e,
            "external emission failed; dropping event"
        );
    }
    Ok(())
}
