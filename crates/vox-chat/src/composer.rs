//! The prompt composer.
//!
//! A pure function of its inputs: given the current utterance, the
//! short-term buffer, retrieved memory, and the action vocabulary, it
//! deterministically assembles the role-tagged payload sent to the model.
//! Fixed block order: system preamble, short-term buffer verbatim,
//! labeled earlier-context entries, current utterance last. When the
//! length budget is exceeded, the oldest memory entries go first, then
//! the oldest buffer turns; the newest turn and the utterance survive.

use std::fmt;

use vox_action::ActionRegistry;
use vox_core::config::ComposerConfig;
use vox_core::types::{Role, Turn};
use vox_memory::MemoryHit;

/// Role tag on one prompt block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    System,
    User,
    Assistant,
}

impl From<Role> for BlockRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => BlockRole::User,
            Role::Assistant => BlockRole::Assistant,
            Role::System => BlockRole::System,
        }
    }
}

impl fmt::Display for BlockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRole::System => write!(f, "system"),
            BlockRole::User => write!(f, "user"),
            BlockRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged text block.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptBlock {
    pub role: BlockRole,
    pub text: String,
}

impl PromptBlock {
    fn system(text: impl Into<String>) -> Self {
        Self {
            role: BlockRole::System,
            text: text.into(),
        }
    }
}

/// Ordered sequence of role-tagged blocks, the model-call payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PromptPayload {
    pub blocks: Vec<PromptBlock>,
}

impl PromptPayload {
    /// Total text length across blocks, in characters.
    pub fn chars(&self) -> usize {
        self.blocks.iter().map(|b| b.text.chars().count()).sum()
    }
}

/// Stateless prompt assembly with a configured length budget.
pub struct PromptComposer {
    assistant_name: String,
    max_chars: usize,
}

impl PromptComposer {
    pub fn new(config: &ComposerConfig) -> Self {
        Self {
            assistant_name: config.assistant_name.clone(),
            max_chars: config.max_prompt_chars,
        }
    }

    /// Assemble the payload for one model call.
    pub fn compose(
        &self,
        utterance: &str,
        recent_turns: &[Turn],
        memory: &[MemoryHit],
        registry: &ActionRegistry,
    ) -> PromptPayload {
        let preamble = PromptBlock::system(self.preamble(registry));

        let mut buffer: Vec<PromptBlock> = recent_turns
            .iter()
            .map(|turn| PromptBlock {
                role: turn.role.into(),
                text: turn.text.clone(),
            })
            .collect();

        // Memory entries keep their retrieval order (most similar first)
        // but are labeled so the model reads them as background, not as
        // the live conversation.
        let mut context: Vec<(u64, PromptBlock)> = memory
            .iter()
            .map(|hit| {
                let age_key = hit.turn.turn_id.map(|id| id.0).unwrap_or(0);
                let block = PromptBlock::system(format!(
                    "Earlier context: {}: {}",
                    hit.turn.role, hit.turn.text
                ));
                (age_key, block)
            })
            .collect();

        let utterance_block = PromptBlock {
            role: BlockRole::User,
            text: utterance.to_string(),
        };

        // Trim to the budget: oldest memory first, then oldest buffer
        // turns. The preamble, the newest buffer turn, and the utterance
        // are never dropped.
        let fixed = preamble.text.chars().count() + utterance_block.text.chars().count();
        loop {
            let total = fixed
                + buffer.iter().map(|b| b.text.chars().count()).sum::<usize>()
                + context
                    .iter()
                    .map(|(_, b)| b.text.chars().count())
                    .sum::<usize>();
            if total <= self.max_chars {
                break;
            }
            if !context.is_empty() {
                let oldest = context
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, (age, _))| *age)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                context.remove(oldest);
            } else if buffer.len() > 1 {
                buffer.remove(0);
            } else {
                break;
            }
        }

        let mut blocks = Vec::with_capacity(2 + buffer.len() + context.len());
        blocks.push(preamble);
        blocks.extend(buffer);
        blocks.extend(context.into_iter().map(|(_, block)| block));
        blocks.push(utterance_block);

        PromptPayload { blocks }
    }

    fn preamble(&self, registry: &ActionRegistry) -> String {
        let mut text = format!(
            "You are {}, a helpful voice assistant. Keep replies short and speakable.",
            self.assistant_name
        );

        if registry.is_empty() {
            text.push_str("\nNo actions are available in this session.");
            return text;
        }

        text.push_str("\nAvailable actions:");
        for capability in registry.entries() {
            let params = capability
                .params
                .iter()
                .map(|p| p.render())
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!(
                "\n- {}({}): {}",
                capability.name, params, capability.description
            ));
        }
        text.push_str(
            "\nTo run an action, include one tag like [action_name key=value] in your reply. \
             At most one action per reply; reply normally when none is needed.",
        );
        text
    }
}

// =============================================================================
// Tests
// =============================================================================
