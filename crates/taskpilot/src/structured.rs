//! Schema-constrained model output and the confidence gate built on it.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::providers::base::{Provider, ResponseFormat};

/// A type the model can be asked to return instead of free text
pub trait StructuredOutput: DeserializeOwned {
    const NAME: &'static str;

    /// JSON schema of the object, in the strict subset the provider accepts
    fn schema() -> Value;

    fn response_format() -> ResponseFormat {
        ResponseFormat::json_schema(Self::NAME, Self::schema())
    }
}

/// Ask the model for a single `T` over `messages`
pub async fn extract<T: StructuredOutput>(
    provider: &dyn Provider,
    messages: &[Message],
) -> AgentResult<T> {
    let format = T::response_format();
    let (message, _) = provider
        .complete(messages, &[], Some(&format))
        .await
        .map_err(|e| AgentError::ModelCall(e.to_string()))?;
    parse(&message)
}

/// Parse the content of a model message as `T`
pub fn parse<T: StructuredOutput>(message: &Message) -> AgentResult<T> {
    let text = message.text().ok_or_else(|| {
        AgentError::InvalidResponse(format!("expected a {} object but got no content", T::NAME))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| AgentError::InvalidResponse(format!("{}: {}", T::NAME, e)))
}

/// A confidence cut-off, either inclusive (`>=`) or strict (`>`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub value: f64,
    pub inclusive: bool,
}

impl Threshold {
    pub fn at_least(value: f64) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub fn above(value: f64) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }

    pub fn admits(&self, score: f64) -> bool {
        if self.inclusive {
            score >= self.value
        } else {
            score > self.value
        }
    }
}

/// An extraction with a yes/no classification and the model's confidence in it
pub trait Gated {
    fn flag(&self) -> bool;
    fn confidence(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision<T> {
    Accepted(T),
    Rejected(T),
}

impl<T> GateDecision<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GateDecision::Accepted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            GateDecision::Accepted(value) | GateDecision::Rejected(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate {
    pub threshold: Threshold,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(Threshold::at_least(0.7))
    }
}

impl Gate {
    pub fn new(threshold: Threshold) -> Self {
        Self { threshold }
    }

    pub fn decide<T: Gated>(&self, value: T) -> GateDecision<T> {
        if value.flag() && self.threshold.admits(value.confidence()) {
            GateDecision::Accepted(value)
        } else {
            GateDecision::Rejected(value)
        }
    }

    /// Extract a `T` from the model and apply the gate to it
    pub async fn classify<T>(
        &self,
        provider: &dyn Provider,
        messages: &[Message],
    ) -> AgentResult<GateDecision<T>>
    where
        T: StructuredOutput + Gated,
    {
        let value: T = extract(provider, messages).await?;
        let decision = self.decide(value);
        tracing::debug!(
            schema = T::NAME,
            accepted = decision.is_accepted(),
            "input classified"
        );
        Ok(decision)
    }
}
