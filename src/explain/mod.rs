//! Match explanations from a hosted language model.
//!
//! Providers return `Result<String, ExplainError>`. The degrade-to-placeholder
//! policy lives in one place, [`explain_or_placeholder`], which the CLI and
//! the HTTP daemon call at their boundary.

mod client;
mod prompts;

pub use client::ChatCompletionClient;

/// Shown in place of an explanation that could not be generated.
pub const PLACEHOLDER: &str = "(Error generating explanation)";

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("explanations are disabled in config")]
    Disabled,

    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("model returned empty content")]
    EmptyContent,
}

/// Produces a short free-text rationale of how a resume fits a job.
pub trait ExplanationProvider: Send + Sync {
    fn explain(&self, job_description: &str, resume_text: &str) -> Result<String, ExplainError>;
}

/// Provider used when explanations are switched off.
pub struct DisabledExplainer;

impl ExplanationProvider for DisabledExplainer {
    fn explain(&self, _job_description: &str, _resume_text: &str) -> Result<String, ExplainError> {
        Err(ExplainError::Disabled)
    }
}

/// An explanation, or [`PLACEHOLDER`] when the provider failed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Explanation {
    pub text: String,
    /// True when `text` is the placeholder
    pub degraded: bool,
}

/// Call the provider and map any error to the placeholder text.
pub fn explain_or_placeholder(
    provider: &dyn ExplanationProvider,
    job_description: &str,
    resume_text: &str,
) -> Explanation {
    match provider.explain(job_description, resume_text) {
        Ok(text) => Explanation {
            text,
            degraded: false,
        },
        Err(e) => {
            log::warn!("Explanation provider error: {}", e);
            Explanation {
                text: PLACEHOLDER.to_string(),
                degraded: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl ExplanationProvider for Fixed {
        fn explain(&self, _: &str, _: &str) -> Result<String, ExplainError> {
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    impl ExplanationProvider for Failing {
        fn explain(&self, _: &str, _: &str) -> Result<String, ExplainError> {
            Err(ExplainError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_success_passes_through() {
        let explanation = explain_or_placeholder(&Fixed("Strong fit."), "jd", "resume");
        assert_eq!(explanation.text, "Strong fit.");
        assert!(!explanation.degraded);
    }

    #[test]
    fn test_error_becomes_placeholder() {
        let explanation = explain_or_placeholder(&Failing, "jd", "resume");
        assert_eq!(explanation.text, PLACEHOLDER);
        assert!(explanation.degraded);
    }

    #[test]
    fn test_disabled_degrades() {
        let explanation = explain_or_placeholder(&DisabledExplainer, "jd", "resume");
        assert!(explanation.degraded);
    }
}
