//! Token accounting.
//!
//! Every [`Turn`](crate::chat::Turn) carries a [`Usage`] record. The engine
//! never persists usage beyond the conversation; aggregate it with `+` or
//! [`Conversation::total_usage`](crate::chat::Conversation::total_usage).

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token counts for a single provider round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt (history, system prompt, tool definitions).
    pub input_tokens: u64,
    /// Tokens produced by the model.
    pub output_tokens: u64,
}

impl Usage {
    /// Creates a usage record.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Sum of input and output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for Usage {
    /// Saturating field-by-field addition.
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
    }
}
