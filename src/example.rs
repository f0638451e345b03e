//! Parse inputs.
//!
//! An [`Example`] is one utterance to parse: a pre-tokenized sequence plus
//! the context needed to execute candidate formulas. Tokenization itself
//! happens upstream; this crate receives tokens as-is.

use std::sync::Arc;

use crate::derivation::Span;
use crate::executor::KnowledgeGraph;

/// Execution context threaded through a parse. Constructed by the caller and
/// passed by shared reference; there is no hidden global state.
#[derive(Debug, Clone, Default)]
pub struct ExContext {
    pub graph: Option<Arc<KnowledgeGraph>>,
}

/// One utterance to parse.
#[derive(Debug, Clone)]
pub struct Example {
    pub id: String,
    pub utterance: String,
    pub tokens: Vec<String>,
    pub context: ExContext,
}

impl Example {
    pub fn from_tokens(tokens: impl IntoIterator<Item = impl Into<String>>) -> Example {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        Example { id: String::new(), utterance: tokens.join(" "), tokens, context: ExContext::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Example {
        self.id = id.into();
        self
    }

    pub fn with_context(mut self, context: ExContext) -> Example {
        self.context = context;
        self
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, i: usize) -> &str {
        &self.tokens[i]
    }

    /// The surface phrase covering `span`, joined with single spaces.
    pub fn phrase(&self, span: Span) -> String {
        self.tokens[span.start..span.end].join(" ")
    }
}
