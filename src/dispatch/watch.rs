//! Watcher engine.
//!
//! After an operation runs, every public field that differs from its value
//! at call entry triggers the operations watching it, called with
//! `(new_value, old_value, field_name)`. Fields are visited in declaration
//! order and watchers in operation declaration order.
//!
//! Watchers may change public fields themselves, so settling runs in
//! passes. Each pass compares against the values seen at the start of the
//! previous pass; the loop ends when a pass sees no change, or fails with
//! [`DispatchError::WatchCycle`] once `limit` passes were not enough.

use serde_json::{Map, Value};

use super::{DispatchError, tree::state_error};
use crate::widget::{CallContext, Instance};

/// Run watchers until public fields settle. Returns the number of passes.
pub(super) fn settle(
    instance: &mut dyn Instance,
    entry: Map<String, Value>,
    limit: usize,
    ctx: &mut CallContext,
) -> Result<usize, DispatchError> {
    let class = instance.descriptor().class;
    let mut baseline = entry;
    let mut passes = 0;

    loop {
        let current = instance
            .public_values()
            .map_err(|source| state_error(class, source))?;

        let changed: Vec<(String, Value, Value)> = instance
            .descriptor()
            .public
            .iter()
            .filter_map(|field| {
                let new = current.get(field).cloned().unwrap_or(Value::Null);
                let old = baseline.get(field).cloned().unwrap_or(Value::Null);
                (new != old).then(|| (field.clone(), new, old))
            })
            .collect();

        if changed.is_empty() {
            return Ok(passes);
        }
        passes += 1;
        if passes > limit {
            return Err(DispatchError::WatchCycle { limit });
        }
        baseline = current;

        for (field, new, old) in changed {
            let watchers: Vec<(usize, String)> = instance
                .descriptor()
                .watchers(&field)
                .map(|(index, op)| (index, op.name.clone()))
                .collect();

            for (index, operation) in watchers {
                let args = [new.clone(), old.clone(), Value::String(field.clone())];
                instance
                    .invoke(index, &args, ctx)
                    .map_err(|source| DispatchError::Operation { operation, source })?;
            }
        }
    }
}
