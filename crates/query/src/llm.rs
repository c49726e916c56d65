use extract::{ChatRequest, LanguageModel, LlmError};
use std::sync::Arc;

const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions based on \
the provided context from a knowledge graph. Answer using only information from the context. \
Be specific and mention the entities and relationships you rely on. If the context does not \
contain enough information, say so. Keep the answer concise and factual.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a helpful assistant synthesizing information \
from reports about thematic communities in a knowledge graph. Draw a comprehensive answer \
from the reports, identify overarching themes, and mention which communities are most \
relevant. Be clear about the scope and limitations of the answer.";

const ROWS_SYSTEM_PROMPT: &str = "You turn the result of a graph database query into a \
natural-language answer to the user's question. Use only the rows provided. If there are no \
rows, say that the graph holds no matching information.";

/// Answer-phrasing calls shared by every retrieval mode.
#[derive(Clone)]
pub struct QueryLlm {
    model: Arc<dyn LanguageModel>,
}

impl QueryLlm {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let reply = self.model.complete(request).await?;
        Ok(reply.trim().to_string())
    }

    pub async fn answer(&self, question: &str, context: &str) -> Result<String, LlmError> {
        let prompt = format!("CONTEXT:\n{context}\n\nQUESTION: {question}\n\nANSWER:");
        self.generate(&ChatRequest::text(ANSWER_SYSTEM_PROMPT, prompt))
            .await
    }

    pub async fn synthesize(&self, question: &str, reports: &str) -> Result<String, LlmError> {
        let prompt = format!("COMMUNITY REPORTS:\n{reports}\n\nQUESTION: {question}\n\nSYNTHESIS:");
        self.generate(&ChatRequest::text(SYNTHESIS_SYSTEM_PROMPT, prompt))
            .await
    }

    pub async fn phrase_rows(
        &self,
        question: &str,
        cypher: &str,
        rows: &str,
    ) -> Result<String, LlmError> {
        let prompt = format!("QUESTION: {question}\n\nQUERY:\n{cypher}\n\nROWS:\n{rows}\n\nANSWER:");
        self.generate(&ChatRequest::text(ROWS_SYSTEM_PROMPT, prompt))
            .await
    }
}
