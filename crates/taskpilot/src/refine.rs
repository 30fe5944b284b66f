//! Generate, critique, refine.
//!
//! A draft is judged against the requirement it was written for. Drafts that are not
//! accepted are handed back for refinement until the acceptance threshold is met or the
//! retry budget runs out. The latest draft is always returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::structured::{extract, Gated, StructuredOutput, Threshold};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "satisfyRequirement")]
    pub satisfy_requirement: bool,
    pub confidence_score: f64,
}

impl StructuredOutput for Verdict {
    const NAME: &'static str = "ComparisonResult";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "satisfyRequirement": {
                    "type": "boolean",
                    "description": "Does the draft generated satisfy the requirement"
                },
                "confidence_score": {
                    "type": "number",
                    "description": "Confidence score between 0 and 1"
                }
            },
            "required": ["satisfyRequirement", "confidence_score"],
            "additionalProperties": false
        })
    }
}

impl Gated for Verdict {
    fn flag(&self) -> bool {
        self.satisfy_requirement
    }

    fn confidence(&self) -> f64 {
        self.confidence_score
    }
}

#[async_trait]
pub trait Critic: Send + Sync {
    async fn judge(&self, requirement: &str, draft: &str) -> AgentResult<Verdict>;

    /// A reworked draft, or None when the critic produced nothing usable
    async fn refine(&self, requirement: &str, draft: &str) -> AgentResult<Option<String>>;
}

/// A critic backed by the model: judging is a structured extraction, refining a plain
/// completion
pub struct ModelCritic {
    provider: Arc<dyn Provider>,
}

impl ModelCritic {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    fn prompt(template: &str, requirement: &str, draft: &str) -> AgentResult<Message> {
        let text = load_prompt_file(
            template,
            &json!({"requirement": requirement, "draft": draft}),
        )
        .map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(Message::system().with_text(text))
    }
}

#[async_trait]
impl Critic for ModelCritic {
    async fn judge(&self, requirement: &str, draft: &str) -> AgentResult<Verdict> {
        let message = Self::prompt("judge.md", requirement, draft)?;
        extract(self.provider.as_ref(), &[message]).await
    }

    async fn refine(&self, requirement: &str, draft: &str) -> AgentResult<Option<String>> {
        let message = Self::prompt("refine.md", requirement, draft)?;
        let (response, _) = self
            .provider
            .complete(&[message], &[], None)
            .await
            .map_err(|e| AgentError::ModelCall(e.to_string()))?;
        Ok(response.text().filter(|text| !text.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineConfig {
    /// Maximum number of judge calls, each rejection consuming one retry
    pub max_retries: usize,
    pub acceptance: Threshold,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            acceptance: Threshold::above(0.9),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    pub artifact: String,
    /// The last verdict issued, which may predate the final refinement
    pub verdict: Option<Verdict>,
    pub accepted: bool,
    pub retries: usize,
}

pub struct RefineLoop {
    config: RefineConfig,
}

impl RefineLoop {
    pub fn new(config: RefineConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        critic: &dyn Critic,
        requirement: &str,
        initial: String,
    ) -> AgentResult<RefineOutcome> {
        let mut artifact = initial;
        let mut verdict = None;
        let mut retries = 0;

        while retries < self.config.max_retries {
            let judged = critic.judge(requirement, &artifact).await?;
            let accepted = judged.flag() && self.config.acceptance.admits(judged.confidence());
            tracing::debug!(
                retries,
                satisfied = judged.satisfy_requirement,
                confidence = judged.confidence_score,
                "draft judged"
            );
            verdict = Some(judged);
            if accepted {
                return Ok(RefineOutcome {
                    artifact,
                    verdict,
                    accepted: true,
                    retries,
                });
            }

            retries += 1;
            match critic.refine(requirement, &artifact).await? {
                Some(refined) => artifact = refined,
                None => tracing::debug!("refinement was empty, keeping the previous draft"),
            }
        }

        Ok(RefineOutcome {
            artifact,
            verdict,
            accepted: false,
            retries,
        })
    }
}

impl Default for RefineLoop {
    fn default() -> Self {
        Self::new(RefineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::sync::Mutex;

    struct ScriptedCritic {
        verdicts: Mutex<Vec<Verdict>>,
        refinements: Mutex<Vec<Option<String>>>,
        judged: Mutex<Vec<String>>,
    }

    impl ScriptedCritic {
        fn new(verdicts: Vec<Verdict>, refinements: Vec<Option<String>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts),
                refinements: Mutex::new(refinements),
                judged: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Critic for ScriptedCritic {
        async fn judge(&self, _requirement: &str, draft: &str) -> AgentResult<Verdict> {
            self.judged.lock().unwrap().push(draft.to_string());
            let mut verdicts = self.verdicts.lock().unwrap();
            Ok(if verdicts.len() > 1 {
                verdicts.remove(0)
            } else {
                verdicts[0].clone()
            })
        }

        async fn refine(&self, _requirement: &str, _draft: &str) -> AgentResult<Option<String>> {
            let mut refinements = self.refinements.lock().unwrap();
            Ok(if refinements.is_empty() {
                None
            } else {
                refinements.remove(0)
            })
        }
    }

    fn verdict(satisfy_requirement: bool, confidence_score: f64) -> Verdict {
        Verdict {
            satisfy_requirement,
            confidence_score,
        }
    }

    #[tokio::test]
    async fn test_never_satisfied_uses_every_retry() {
        let critic = ScriptedCritic::new(
            vec![verdict(false, 0.5)],
            vec![
                Some("draft 2".to_string()),
                Some("draft 3".to_string()),
                Some("draft 4".to_string()),
            ],
        );

        let outcome = RefineLoop::default()
            .run(&critic, "a haiku", "draft 1".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.retries, 3);
        assert!(!outcome.accepted);
        assert_eq!(outcome.artifact, "draft 4");
        assert_eq!(*critic.judged.lock().unwrap(), vec!["draft 1", "draft 2", "draft 3"]);
    }

    #[tokio::test]
    async fn test_stops_once_accepted() {
        let critic = ScriptedCritic::new(
            vec![verdict(true, 0.8), verdict(true, 0.95)],
            vec![Some("better".to_string())],
        );

        let outcome = RefineLoop::default()
            .run(&critic, "a haiku", "first".to_string())
            .await
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.artifact, "better");
        assert_eq!(outcome.verdict, Some(verdict(true, 0.95)));
    }

    #[tokio::test]
    async fn test_confidence_exactly_at_threshold_is_not_accepted() {
        let critic = ScriptedCritic::new(vec![verdict(true, 0.9)], vec![]);
        let outcome = RefineLoop::default()
            .run(&critic, "a haiku", "first".to_string())
            .await
            .unwrap();
        assert!(!outcome.accepted);
    }

    #[tokio::test]
    async fn test_empty_refinement_keeps_draft_and_consumes_retry() {
        let critic = ScriptedCritic::new(vec![verdict(false, 0.2)], vec![None, None, None]);
        let outcome = RefineLoop::default()
            .run(&critic, "a haiku", "only draft".to_string())
            .await
            .unwrap();
        assert_eq!(outcome.retries, 3);
        assert_eq!(outcome.artifact, "only draft");
    }

    #[tokio::test]
    async fn test_model_critic_prompts() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text(r#"{"satisfyRequirement": false, "confidence_score": 0.4}"#),
            Message::assistant().with_text("A tighter draft"),
        ]);
        let critic = ModelCritic::new(Arc::new(provider.clone()));

        let judged = critic.judge("two lines", "one line").await.unwrap();
        assert_eq!(judged, verdict(false, 0.4));
        let refined = critic.refine("two lines", "one line").await.unwrap();
        assert_eq!(refined.as_deref(), Some("A tighter draft"));

        let requests = provider.requests();
        assert_eq!(requests[0].response_format.as_deref(), Some("ComparisonResult"));
        let judge_prompt = requests[0].messages[0].text().unwrap();
        assert!(judge_prompt.starts_with(
            "Given the requirement \"two lines\", does the draft generated satisfy the requirements?"
        ));
        assert!(judge_prompt.contains("Draft: one line"));
        assert_eq!(requests[1].response_format, None);
    }
}
