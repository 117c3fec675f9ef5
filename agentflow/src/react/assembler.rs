//! Reassembles streamed [`ToolCallFragment`]s into complete [`ToolCall`]s.
//!
//! A fragment carrying `id: Some(_)` starts a new call; a fragment with `id: None` continues
//! the most recently started call (providers emit the id once, on the first delta, then omit
//! it on continuations). `is_json_literal` does not change how fragments are merged — both
//! representations arrive as already-decoded text and concatenate directly — it only
//! documents which wire shape produced the text, which a provider adapter upstream of this
//! module would need to know to decode correctly in the first place.

use crate::llm::ToolCallFragment;
use crate::tool::ToolCall;

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates fragments across an entire streamed response.
#[derive(Default)]
pub struct ToolCallAssembler {
    calls: Vec<PendingCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &ToolCallFragment) {
        match &fragment.id {
            Some(id) => {
                self.calls.push(PendingCall { id: id.clone(), name: fragment.name.clone().unwrap_or_default(), arguments: fragment.arguments_fragment.clone() });
            }
            None => match self.calls.last_mut() {
                Some(pending) => {
                    if let Some(name) = &fragment.name {
                        pending.name = name.clone();
                    }
                    pending.arguments.push_str(&fragment.arguments_fragment);
                }
                None => {
                    // A continuation fragment with no prior call: start one with a generated id
                    // so the call is not silently dropped.
                    self.calls.push(PendingCall {
                        id: format!("call_{}", self.calls.len()),
                        name: fragment.name.clone().unwrap_or_default(),
                        arguments: fragment.arguments_fragment.clone(),
                    });
                }
            },
        }
    }

    pub fn finish(self) -> Vec<ToolCall> {
        self.calls.into_iter().map(|c| ToolCall { id: c.id, name: c.name, arguments: c.arguments }).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(id: Option<&str>, name: Option<&str>, arguments: &str) -> ToolCallFragment {
        ToolCallFragment { id: id.map(str::to_string), name: name.map(str::to_string), arguments_fragment: arguments.to_string(), is_json_literal: false }
    }

    #[test]
    fn single_call_single_fragment() {
        let mut asm = ToolCallAssembler::new();
        asm.push(&frag(Some("c1"), Some("search"), "{\"q\":\"hi\"}"));
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, "{\"q\":\"hi\"}");
    }

    #[test]
    fn continuation_fragments_append_to_last_call() {
        let mut asm = ToolCallAssembler::new();
        asm.push(&frag(Some("c1"), Some("search"), "{\"q\":"));
        asm.push(&frag(None, None, "\"hi\"}"));
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, "{\"q\":\"hi\"}");
    }

    #[test]
    fn two_distinct_calls_stay_separate() {
        let mut asm = ToolCallAssembler::new();
        asm.push(&frag(Some("c1"), Some("a"), "{}"));
        asm.push(&frag(Some("c2"), Some("b"), "{}"));
        let calls = asm.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[1].id, "c2");
    }
}
