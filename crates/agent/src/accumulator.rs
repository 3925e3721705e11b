//! Tool-call accumulator.
//!
//! Providers surface tool calls as fragments keyed by a position index. The
//! delta variant splits names and argument text across many fragments; the
//! structured variant sends the whole call at once. Both fold into the same
//! per-index state here, and only become executable calls at end of stream.

use std::collections::BTreeMap;
use streamrelay_core::error::ToolError;
use streamrelay_core::provider::{MergeMode, ToolCallFragment};
use streamrelay_core::tool::ToolCall;

/// An in-progress call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PartialToolCall {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) arguments: String,
}

/// What end-of-stream promotion produced.
#[derive(Debug, Default)]
pub struct Promoted {
    /// Complete calls, in index order
    pub calls: Vec<ToolCall>,
    /// One entry per fragment whose arguments never became a JSON object
    pub malformed: Vec<ToolError>,
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partials: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fragment into the call at its index.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let partial = self.partials.entry(fragment.index).or_default();

        if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
            partial.name = name;
        }
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            partial.id = id;
        }
        match fragment.merge {
            MergeMode::Concatenate => partial.arguments.push_str(&fragment.arguments),
            MergeMode::Replace => partial.arguments = fragment.arguments,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.partials.len()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, index: u32) -> Option<&PartialToolCall> {
        self.partials.get(&index)
    }

    /// Turn every accumulated entry into a complete call, leaving the
    /// accumulator empty for the next turn.
    ///
    /// Empty argument text is treated as `{}`. A missing call id is
    /// synthesized from the index.
    pub fn promote(&mut self) -> Promoted {
        let mut promoted = Promoted::default();

        for (index, partial) in std::mem::take(&mut self.partials) {
            let text = partial.arguments.trim();
            let parsed = if text.is_empty() {
                Ok(serde_json::Value::Object(serde_json::Map::new()))
            } else {
                serde_json::from_str::<serde_json::Value>(text)
            };

            let arguments = match parsed {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(other) => {
                    promoted.malformed.push(ToolError::MalformedArguments {
                        index,
                        tool_name: partial.name,
                        reason: format!("expected a JSON object, got {other}"),
                    });
                    continue;
                }
                Err(e) => {
                    promoted.malformed.push(ToolError::MalformedArguments {
                        index,
                        tool_name: partial.name,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let id = if partial.id.is_empty() {
                format!("call_{index}")
            } else {
                partial.id
            };
            promoted.calls.push(ToolCall {
                id,
                name: partial.name,
                arguments,
            });
        }

        promoted
    }
}
