use crate::error::{ReelError, ReelResult};
use crate::model::ModelClient;
use std::sync::Arc;
use tracing::{info, warn};

const MUTATION_SYSTEM_PROMPT: &str = "You are a Manim expert code modifier. Your task is to take an existing Manim code template and modify ONLY the requested function/animation to match the user's request.

STRICT RULES:
1. Keep the overall code structure intact.
2. Modify ONLY the specific function or animation indicated in the user request.
3. Do NOT remove, condense, combine, or alter any other lines anywhere in the code.
4. Preserve all original blank lines, comments, and formatting exactly as in the template.
5. Do not clean up or simplify any code, even inside the modified function; change only what the user requested.
6. Return only the complete modified Python code, no explanations.";

/// Asks a model to edit a template toward a request while leaving everything else alone.
///
/// The edit scope is enforced by instruction only; see [`changed_lines`] for the check
/// tests apply to the output.
pub struct CodeMutator<C: ModelClient> {
    client: Arc<C>,
    model: String,
}

impl<C: ModelClient> CodeMutator<C> {
    pub fn new(client: Arc<C>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_prompt(user_request: &str, template: &str) -> String {
        format!(
            "ORIGINAL TEMPLATE CODE:\n{}\n\nUSER REQUEST:\n{}\n\nINSTRUCTIONS:\n\
             Modify the above template code strictly according to the user's request.\n\
             Change only the necessary parts.\n\
             Do NOT remove, condense, combine, or alter any other lines.\n\
             Preserve all comments, blank lines, and formatting exactly as in the original code.\n\n\
             Return only the complete modified Python code without any omissions or simplifications.\n",
            template, user_request
        )
    }

    /// Returns the raw model output, which may still be wrapped in prose or fences.
    pub async fn mutate(&self, user_request: &str, template: &str) -> ReelResult<String> {
        let prompt = Self::build_prompt(user_request, template);
        match self
            .client
            .generate(&self.model, MUTATION_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                info!(model = %self.model, chars = text.len(), "template modified");
                Ok(text)
            }
            Ok(_) => Err(ReelError::Mutation("model returned an empty response".into())),
            Err(e) => {
                warn!(model = %self.model, error = %e, "template modification failed");
                Err(ReelError::Mutation(format!("{:#}", e)))
            }
        }
    }

    /// Mutation with the fallback the pipeline relies on: any failure yields the template unchanged.
    pub async fn mutate_or_template(&self, user_request: &str, template: &str) -> (String, bool) {
        match self.mutate(user_request, template).await {
            Ok(text) => (text, true),
            Err(_) => (template.to_string(), false),
        }
    }
}

/// One-based line numbers that differ between `template` and `output`, compared positionally.
///
/// Lines present in only one side count as changed. Intended for verifying scoped
/// edits in tests; nothing at runtime rejects output based on it.
pub fn changed_lines(template: &str, output: &str) -> Vec<usize> {
    let before: Vec<&str> = template.lines().collect();
    let after: Vec<&str> = output.lines().collect();
    (0..before.len().max(after.len()))
        .filter(|&i| before.get(i) != after.get(i))
        .map(|i| i + 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mocks::MockModelClient;

    const TEMPLATE: &str = "class C(Scene):\n    def construct(self):\n        circle = Circle(color=BLUE)\n\n        # show it\n        self.play(Create(circle))";

    #[tokio::test]
    async fn test_prompt_carries_template_and_request() {
        let mock = MockModelClient::new();
        mock.add_action(|prompt| {
            assert!(prompt.contains("ORIGINAL TEMPLATE CODE:\nclass C(Scene):"));
            assert!(prompt.contains("USER REQUEST:\nmake it red"));
            Ok("```python\nchanged\n```".to_string())
        });
        let mutator = CodeMutator::new(Arc::new(mock), "gpt-oss:20b");
        let out = mutator.mutate("make it red", TEMPLATE).await.unwrap();
        assert_eq!(out, "```python\nchanged\n```");
    }

    #[tokio::test]
    async fn test_failure_maps_to_mutation_error() {
        let mock = MockModelClient::new();
        mock.add_failure("connection refused");
        let mutator = CodeMutator::new(Arc::new(mock), "m");
        let err = mutator.mutate("x", TEMPLATE).await.unwrap_err();
        assert!(matches!(err, ReelError::Mutation(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_fallback_returns_template_unchanged() {
        let mock = MockModelClient::new();
        mock.add_failure("timeout");
        mock.add_response("   \n");
        let mutator = CodeMutator::new(Arc::new(mock), "m");

        let (code, applied) = mutator.mutate_or_template("x", TEMPLATE).await;
        assert!(!applied);
        assert_eq!(code, TEMPLATE);

        let (code, applied) = mutator.mutate_or_template("x", TEMPLATE).await;
        assert!(!applied);
        assert_eq!(code, TEMPLATE);
    }

    #[test]
    fn test_changed_lines() {
        let edited = TEMPLATE.replace("color=BLUE", "color=RED");
        assert_eq!(changed_lines(TEMPLATE, &edited), vec![3]);
        assert!(changed_lines(TEMPLATE, TEMPLATE).is_empty());

        let truncated = "class C(Scene):\n    def construct(self):";
        assert_eq!(changed_lines(TEMPLATE, truncated), vec![3, 4, 5, 6]);
    }
}
