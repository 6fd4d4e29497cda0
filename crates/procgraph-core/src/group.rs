//! AllOf joins: edge-group declarations and their accumulating processors.
//!
//! An edge group declares the set of `(source step, event)` pairs that must
//! all fire before the destination step is invoked once with the combined
//! inputs. The runtime keeps at most one open [`EdgeGroupProcessor`] per
//! `(group id, destination step, run id)`; the processor is discarded as
//! soon as it releases.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Pure transformation from the accumulated `{source key -> value}` map into
/// the parameter map delivered to the destination function. A missing
/// mapping passes the accumulated map through unchanged.
pub type InputMapping = Arc<dyn Fn(&HashMap<String, Value>) -> HashMap<String, Value> + Send + Sync>;

/// One required contributor to an edge group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupSource {
    /// Authored name of the contributing step.
    pub step_id: String,
    /// Local event id the contribution arrives on.
    pub event_name: String,
}

impl GroupSource {
    pub fn new(step_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            event_name: event_name.into(),
        }
    }

    /// Stable identity of this source within the group: `"{step}.{event}"`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.step_id, self.event_name)
    }
}

/// Declaration of an AllOf join on a destination step.
#[derive(Clone)]
pub struct EdgeGroup {
    pub group_id: String,
    pub sources: Vec<GroupSource>,
    pub input_mapping: Option<InputMapping>,
}

impl EdgeGroup {
    pub fn new(group_id: impl Into<String>, sources: Vec<GroupSource>) -> Self {
        Self {
            group_id: group_id.into(),
            sources,
            input_mapping: None,
        }
    }

    pub fn with_input_mapping<F>(mut self, mapping: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> HashMap<String, Value> + Send + Sync + 'static,
    {
        self.input_mapping = Some(Arc::new(mapping));
        self
    }
}

impl std::fmt::Debug for EdgeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGroup")
            .field("group_id", &self.group_id)
            .field("sources", &self.sources)
            .field(
                "input_mapping",
                &self.input_mapping.as_ref().map(|_| "<function>"),
            )
            .finish()
    }
}

/// Outcome of feeding one contribution into a processor.
#[derive(Debug)]
pub enum GroupObservation {
    /// Sources are still missing; the accumulated data should be persisted.
    Incomplete,
    /// All sources observed; carries the parameter map to deliver and the
    /// processor must now be discarded.
    Complete(HashMap<String, Value>),
}

/// Accumulates one value per required source and releases a single combined
/// parameter map once all are present.
pub struct EdgeGroupProcessor {
    group: EdgeGroup,
    absent: HashSet<String>,
    data: HashMap<String, Value>,
}

impl EdgeGroupProcessor {
    pub fn new(group: EdgeGroup) -> Self {
        let absent = group.sources.iter().map(GroupSource::key).collect();
        Self {
            group,
            absent,
            data: HashMap::new(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group.group_id
    }

    /// Pre-fill accumulated data from a persisted partial, marking the
    /// corresponding sources as observed. Called once, before the first
    /// observation after a restart.
    pub fn rehydrate(&mut self, stored: HashMap<String, Value>) {
        for (key, value) in stored {
            if self.absent.remove(&key) || self.data.contains_key(&key) {
                self.data.insert(key, value);
            } else {
                tracing::warn!(
                    group = %self.group.group_id,
                    source = %key,
                    "discarding persisted value for undeclared group source"
                );
            }
        }
    }

    /// Record a contribution from `source_key`.
    ///
    /// Repeated arrivals overwrite the stored value in place (last-wins) and
    /// never release the group early. Contributions from undeclared sources
    /// are dropped with a warning.
    pub fn observe(&mut self, source_key: &str, value: Option<Value>) -> GroupObservation {
        let declared = self.absent.contains(source_key) || self.data.contains_key(source_key);
        if !declared {
            tracing::warn!(
                group = %self.group.group_id,
                source = %source_key,
                "dropping contribution from undeclared group source"
            );
            return GroupObservation::Incomplete;
        }

        if self.data.contains_key(source_key) {
            tracing::warn!(
                group = %self.group.group_id,
                source = %source_key,
                "overwriting previously observed group contribution"
            );
        }

        self.data
            .insert(source_key.to_string(), value.unwrap_or(Value::Null));
        self.absent.remove(source_key);

        if self.absent.is_empty() {
            let params = match &self.group.input_mapping {
                Some(mapping) => mapping(&self.data),
                None => self.data.clone(),
            };
            GroupObservation::Complete(params)
        } else {
            GroupObservation::Incomplete
        }
    }

    /// The accumulated partial, persisted after each incomplete observation.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}
