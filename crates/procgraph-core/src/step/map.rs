//! Map steps: fan a JSON array across an element handler.

use crate::context::StepContext;
use crate::error::{ProcessError, Result};
use crate::message::StepMessage;
use crate::step::StepHandler;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Invoke `function` on the element handler once per input element,
/// concurrently, and collect the results in input order.
///
/// The element entry point must expose exactly one data slot; each element
/// is delivered under that slot's name. The first failing element fails the
/// whole map invocation.
pub(crate) async fn run_map(
    handler: &dyn StepHandler,
    function: &str,
    message: &StepMessage,
    ctx: &StepContext,
) -> Result<Value> {
    if message.function_name != function {
        debug!(
            step = %ctx.step_name(),
            declared = %function,
            requested = %message.function_name,
            "map step always runs its declared element function"
        );
    }

    let items = match &message.data {
        Some(Value::Array(items)) => items.clone(),
        other => {
            return Err(ProcessError::Execution(format!(
                "map step '{}' requires an array input, got {}",
                ctx.step_name(),
                other.as_ref().map_or("nothing", value_kind),
            )))
        }
    };

    let entry = handler
        .entry_points()
        .into_iter()
        .find(|e| e.name == function)
        .ok_or_else(|| ProcessError::UnknownFunction {
            step: ctx.step_name().to_string(),
            function: function.to_string(),
        })?;
    let slots: Vec<String> = entry.data_slots().map(str::to_string).collect();
    let [slot] = slots.as_slice() else {
        return Err(ProcessError::Configuration(format!(
            "map element function '{function}' must declare exactly one data parameter"
        )));
    };

    let invocations = items.iter().map(|item| {
        let arguments = HashMap::from([(slot.clone(), item.clone())]);
        handler.invoke(function, arguments, ctx)
    });
    let results: Vec<Value> = join_all(invocations)
        .await
        .into_iter()
        .collect::<Result<_>>()?;

    Ok(Value::Array(results))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
