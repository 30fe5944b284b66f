use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{conclude, model_error, primed, reject, Reply, Task, TaskContext, TaskKind};
use crate::agent::{Agent, LoopConfig};
use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::store::{retrieve, DocumentStore};
use crate::structured::{extract, Gate, GateDecision, Gated, StructuredOutput};
use crate::systems::{decode_arguments, System};

pub const SYSTEM_PROMPT: &str = "You are an automated trip planning assistant";
pub const GREETING: &str = "Ask me to plan a trip for you.";
pub const ANALYSE_PROMPT: &str = "Analyze if the text describes a trip planning event.";
pub const CONTINUATION_PROMPT: &str = "What is the next step or next tool to call?";
pub const REJECTION: &str = "The input is not a trip planning request.";
pub const STEP_BUDGET: usize = 10;

/// Documents in the local store that attractions can be grounded in
pub const LOCAL_DOCUMENTS: &[&str] = &["auckland_attraction.pdf"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub description: String,
    pub is_trip_planning_event: bool,
    pub should_query_local_data: bool,
    pub trip_duration: String,
    pub location: String,
    pub confidence_score: f64,
}

impl StructuredOutput for TripRequest {
    const NAME: &'static str = "EventExtraction";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Raw description of the event"
                },
                "is_trip_planning_event": {
                    "type": "boolean",
                    "description": "Whether this text describes a trip planning event"
                },
                "should_query_local_data": {
                    "type": "boolean",
                    "description": format!(
                        "Whether this event involves travelling to one of the cities that has local data: {:?}",
                        LOCAL_DOCUMENTS
                    )
                },
                "trip_duration": {
                    "type": "string",
                    "description": "Duration of the trip, if unknown, answer unknown"
                },
                "location": {
                    "type": "string",
                    "description": "Location of the event"
                },
                "confidence_score": {
                    "type": "number",
                    "description": "Confidence score between 0 and 1"
                }
            },
            "required": [
                "description",
                "is_trip_planning_event",
                "should_query_local_data",
                "trip_duration",
                "location",
                "confidence_score"
            ],
            "additionalProperties": false
        })
    }
}

impl Gated for TripRequest {
    fn flag(&self) -> bool {
        self.is_trip_planning_event
    }

    fn confidence(&self) -> f64 {
        self.confidence_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attraction {
    pub name: String,
    pub description: String,
    pub duration: String,
}

fn attraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Name of the attraction"},
            "description": {"type": "string", "description": "Description of the attraction"},
            "duration": {"type": "string", "description": "Duration of the attraction"}
        },
        "required": ["name", "description", "duration"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attractions {
    pub attractions: Vec<Attraction>,
}

impl StructuredOutput for Attractions {
    const NAME: &'static str = "AttractionExtraction";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "attractions": {
                    "type": "array",
                    "description": "List of attractions in this location",
                    "items": attraction_schema()
                }
            },
            "required": ["attractions"],
            "additionalProperties": false
        })
    }
}

/// Result of one trip planner tool
#[derive(Debug, Clone, PartialEq)]
pub enum TripOutput {
    Request(TripRequest),
    Attractions(Attractions),
    Text(String),
}

impl TripOutput {
    pub fn into_content(self) -> AgentResult<Vec<Content>> {
        let content = match self {
            TripOutput::Request(request) => Content::structured(&request),
            TripOutput::Attractions(attractions) => Content::structured(&attractions),
            TripOutput::Text(text) => Ok(Content::text(text)),
        }
        .map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(vec![content])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyseArgs {
    user_input: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttractionArgs {
    location: String,
    should_query_local_data: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItineraryArgs {
    attractions: Vec<Attraction>,
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SummaryArgs {
    user_input: String,
    itinerary: String,
}

/// Tools of the trip planner, each backed by its own model call
pub struct TripPlannerSystem {
    provider: Arc<dyn Provider>,
    store: Arc<dyn DocumentStore>,
    top_k: usize,
    tools: Vec<Tool>,
}

impl TripPlannerSystem {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn DocumentStore>, top_k: usize) -> Self {
        let analyse_input = Tool::new(
            "analyse_input",
            "Analyse if the text describes a trip planning event.",
            json!({
                "type": "object",
                "properties": {
                    "user_input": {"type": "string"}
                },
                "required": ["user_input"],
                "additionalProperties": false
            }),
        )
        .strict();

        let get_attractions = Tool::new(
            "get_attractions",
            "Get attractions for a certain location",
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string"},
                    "should_query_local_data": {"type": "boolean"}
                },
                "required": ["location", "should_query_local_data"],
                "additionalProperties": false
            }),
        )
        .strict();

        let generate_itinerary = Tool::new(
            "generate_itinerary",
            "Generate itinerary using a list of attractions and duration",
            json!({
                "type": "object",
                "properties": {
                    "attractions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "description": {"type": "string"},
                                "duration": {"type": "string"}
                            },
                            "required": ["name", "description", "duration"],
                            "additionalProperties": false
                        }
                    },
                    "duration": {"type": "string"}
                },
                "required": ["attractions", "duration"],
                "additionalProperties": false
            }),
        )
        .strict();

        let get_trip_summary = Tool::new(
            "get_trip_summary",
            "Provide a summary for a trip planning event using itinerary provided",
            json!({
                "type": "object",
                "properties": {
                    "user_input": {"type": "string"},
                    "itinerary": {"type": "string"}
                },
                "required": ["user_input", "itinerary"],
                "additionalProperties": false
            }),
        )
        .strict();

        Self {
            provider,
            store,
            top_k,
            tools: vec![
                analyse_input,
                get_attractions,
                generate_itinerary,
                get_trip_summary,
            ],
        }
    }

    async fn analyse_input(&self, args: AnalyseArgs) -> AgentResult<TripOutput> {
        let messages = [
            Message::system().with_text(ANALYSE_PROMPT),
            Message::user().with_text(args.user_input),
        ];
        let request = extract::<TripRequest>(self.provider.as_ref(), &messages).await?;
        Ok(TripOutput::Request(request))
    }

    async fn get_attractions(&self, args: AttractionArgs) -> AgentResult<TripOutput> {
        let local_data = if args.should_query_local_data {
            retrieve(self.store.as_ref(), &args.location, self.top_k)
                .await?
                .iter()
                .map(|chunk| format!("{}\n\n", chunk))
                .collect::<String>()
        } else {
            String::new()
        };

        let prompt = render(
            "attractions.md",
            &json!({"location": args.location, "local_data": local_data}),
        )?;
        let attractions =
            extract::<Attractions>(self.provider.as_ref(), &[Message::system().with_text(prompt)])
                .await?;
        Ok(TripOutput::Attractions(attractions))
    }

    async fn generate_itinerary(&self, args: ItineraryArgs) -> AgentResult<TripOutput> {
        let attractions = serde_json::to_string(&args.attractions)
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let duration = (!args.duration.eq_ignore_ascii_case("unknown")).then_some(args.duration);
        let prompt = render(
            "itinerary.md",
            &json!({"attractions": attractions, "duration": duration}),
        )?;
        Ok(TripOutput::Text(self.complete_text(prompt).await?))
    }

    async fn get_trip_summary(&self, args: SummaryArgs) -> AgentResult<TripOutput> {
        let prompt = render(
            "trip_summary.md",
            &json!({"itinerary": args.itinerary, "user_input": args.user_input}),
        )?;
        Ok(TripOutput::Text(self.complete_text(prompt).await?))
    }

    async fn complete_text(&self, prompt: String) -> AgentResult<String> {
        let (response, _) = self
            .provider
            .complete(&[Message::system().with_text(prompt)], &[], None)
            .await
            .map_err(model_error)?;
        Ok(response.text().unwrap_or_default())
    }
}

fn render(template: &str, context: &Value) -> AgentResult<String> {
    load_prompt_file(template, context)
        .map(|prompt| prompt.trim_end().to_string())
        .map_err(|e| AgentError::Internal(e.to_string()))
}

#[async_trait]
impl System for TripPlannerSystem {
    fn name(&self) -> &str {
        "TripPlannerSystem"
    }

    fn description(&self) -> &str {
        "Analyses trip requests, finds attractions and builds itineraries"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let output = match tool_call.name.as_str() {
            "analyse_input" => self.analyse_input(decode_arguments(&tool_call)?).await?,
            "get_attractions" => self.get_attractions(decode_arguments(&tool_call)?).await?,
            "generate_itinerary" => self.generate_itinerary(decode_arguments(&tool_call)?).await?,
            "get_trip_summary" => self.get_trip_summary(decode_arguments(&tool_call)?).await?,
            _ => return Err(AgentError::UnknownTool(tool_call.name)),
        };
        output.into_content()
    }
}

/// Gated trip planning over the tool loop
pub struct TripTask {
    agent: Agent,
    gate: Gate,
    config: LoopConfig,
}

impl TripTask {
    pub fn new(context: &TaskContext) -> AgentResult<Self> {
        let mut agent = Agent::new(context.provider.clone());
        agent.add_system(Box::new(TripPlannerSystem::new(
            context.provider.clone(),
            context.store.clone(),
            context.top_k,
        )))?;
        Ok(Self {
            agent,
            gate: Gate::default(),
            config: LoopConfig::new(STEP_BUDGET).with_continuation_prompt(CONTINUATION_PROMPT),
        })
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }
}

#[async_trait]
impl Task for TripTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Trip
    }

    fn start(&self) -> AgentResult<Conversation> {
        primed(SYSTEM_PROMPT, Some(GREETING))
    }

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply> {
        conversation.push(Message::user().with_text(input))?;

        let messages = [
            Message::system().with_text(ANALYSE_PROMPT),
            Message::user().with_text(input),
        ];
        let request = match self
            .gate
            .classify::<TripRequest>(self.agent.provider().as_ref(), &messages)
            .await?
        {
            GateDecision::Accepted(request) => request,
            GateDecision::Rejected(_) => return reject(conversation, REJECTION),
        };

        let extraction =
            serde_json::to_string(&request).map_err(|e| AgentError::Internal(e.to_string()))?;
        conversation.push(Message::system().with_text(extraction))?;
        let goal = render("trip_goal.md", &json!({"goal": input}))?;
        conversation.push(Message::system().with_text(goal))?;

        let outcome = self.agent.run(conversation, &self.config).await?;
        conclude(conversation, outcome)
    }
}
