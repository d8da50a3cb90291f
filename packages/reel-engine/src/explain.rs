use crate::error::{ReelError, ReelResult};
use crate::model::{ChatMessage, ModelClient};
use std::sync::Arc;
use tracing::info;

const EXPLANATION_SYSTEM_PROMPT: &str = "You are a mathematics expert and educator. Your task is to solve mathematical problems step-by-step with clear explanations.

Provide:
1. A detailed step-by-step solution to the problem
2. Clear explanations of each step
3. Final answer with proper mathematical notation
4. Any important notes about domain, range, or special conditions

Be thorough, educational, and use clear mathematical language.";

pub struct Explainer<C: ModelClient> {
    client: Arc<C>,
    model: String,
}

impl<C: ModelClient> Explainer<C> {
    pub fn new(client: Arc<C>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub async fn explain(&self, code: &str, user_request: &str) -> ReelResult<String> {
        let messages = [
            ChatMessage::system(EXPLANATION_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Please solve this mathematical problem step-by-step:\n\n{}\n\n\
                 Provide a complete solution with explanations for each step.",
                user_request
            )),
        ];
        tracing::debug!(code_len = code.len(), "requesting explanation");

        let text = self
            .client
            .chat(&self.model, &messages)
            .await
            .map_err(|e| ReelError::Explanation(format!("{:#}", e)))?;
        if text.trim().is_empty() {
            return Err(ReelError::Explanation("model returned no content".into()));
        }
        info!(model = %self.model, chars = text.len(), "explanation generated");
        Ok(text)
    }
}

/// Placeholder shown in place of an explanation that could not be generated.
pub fn fallback_notice(error: &ReelError) -> String {
    format!("Unable to generate explanation. Error: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mocks::MockModelClient;

    #[tokio::test]
    async fn test_explain_sends_request_as_user_message() {
        let mock = MockModelClient::new();
        mock.add_action(|prompt| {
            assert!(prompt.contains("inverse of x^3"));
            Ok("Step 1: swap x and y.".to_string())
        });
        let explainer = Explainer::new(Arc::new(mock), "deepseek-r1:1.5b");
        let text = explainer
            .explain("class A(Scene): pass", "find the inverse of x^3")
            .await
            .unwrap();
        assert_eq!(text, "Step 1: swap x and y.");
    }

    #[tokio::test]
    async fn test_failure_becomes_notice() {
        let mock = MockModelClient::new();
        mock.add_failure("model not loaded");
        mock.add_response("");
        let explainer = Explainer::new(Arc::new(mock), "m");

        let err = explainer.explain("", "x").await.unwrap_err();
        let notice = fallback_notice(&err);
        assert!(notice.starts_with("Unable to generate explanation."));
        assert!(notice.contains("model not loaded"));

        assert!(matches!(
            explainer.explain("", "x").await,
            Err(ReelError::Explanation(_))
        ));
    }
}
