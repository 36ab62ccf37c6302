//! Query orchestration
//!
//! Drives one question through the generation service and the tool registry until the
//! model produces a final answer. Each query runs as an explicit state machine:
//!
//! ```text
//! Start -> AwaitingModel -> (ToolRequested -> ToolExecuting -> AwaitingModel)* -> Done
//! ```
//!
//! Every model call and every tool round is bounded by the configured round timeout,
//! and the number of tool rounds is capped. Once the cap is reached the model gets one
//! last call with no tools advertised.


use std::sync::Arc;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConversationConfig;
use crate::generation::{ChatMessage, Generation, Generator, ToolCall};
use crate::index::Citation;
use crate::memory::{ConversationMemory, Role};
use crate::tools::{InvocationLog, ToolError, ToolRegistry};
use crate::{RagError, Result, ServiceError};

const SYSTEM_PROMPT: &str = "\
You are an assistant answering questions about a library of course transcripts.

Tools:
- search_course_content finds passages in the course materials. Filter by course_name \
and lesson_number when the question names a course or lesson.
- get_course_outline returns a course's title, link, instructor and lesson list. Use it \
for questions about what a course covers or how it is structured.

Rules:
- Answer general knowledge questions directly without searching.
- For questions about course material, search before answering and base the answer only \
on what the tools return.
- If a search returns nothing relevant, say so plainly instead of guessing.
- Do not mention the tools or the search process in the answer.
- Keep answers brief and direct.";

const UNAVAILABLE_MESSAGE: &str =
    "The course assistant is temporarily unavailable. Please try again in a moment.";

/// How the orchestrator arrived at an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The model answered normally
    Complete,
    /// The model kept requesting tools past the round limit
    RoundLimitReached,
    /// A round exceeded its timeout; the answer is best effort
    TimedOut,
    /// The model requested an unknown tool along the way
    Degraded,
    /// A service was unreachable; nothing was stored in memory
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub session_id: String,
    pub outcome: AnswerOutcome,
    pub tool_rounds: usize,
}

#[derive(Debug)]
enum QueryState {
    Start,
    AwaitingModel,
    ToolRequested(Vec<ToolCall>),
    ToolExecuting(Vec<ToolCall>),
    Done {
        answer: String,
        outcome: AnswerOutcome,
    },
}

/// Continuation data carried between states
#[derive(Debug, Default)]
struct QueryRun {
    messages: Vec<ChatMessage>,
    log: InvocationLog,
    rounds: usize,
    degraded: bool,
}

/// Why a round ended early
enum Interruption {
    Unavailable(ServiceError),
    Fatal(RagError),
}

pub struct QueryOrchestrator {
    generator: Arc<dyn Generator>,
    registry: Arc<ToolRegistry>,
    memory: Arc<ConversationMemory>,
    config: ConversationConfig,
}

impl QueryOrchestrator {
    #[inline]
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<ToolRegistry>,
        memory: Arc<ConversationMemory>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            generator,
            registry,
            memory,
            config,
        }
    }

    #[inline]
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Answer `question` within the conversation `session_id`, starting a new session
    /// when none is given
    #[inline]
    pub async fn answer(&self, question: &str, session_id: Option<String>) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Other(anyhow::anyhow!("question must not be empty")));
        }
        let session_id = session_id.unwrap_or_else(ConversationMemory::new_session_id);

        let mut run = QueryRun::default();
        let mut state = QueryState::Start;

        let (answer, outcome) = loop {
            state = match state {
                QueryState::Start => {
                    self.start(&mut run, &session_id, question).await;
                    QueryState::AwaitingModel
                }
                QueryState::AwaitingModel => match self.await_model(&mut run).await {
                    Ok(next) => next,
                    Err(Interruption::Unavailable(e)) => {
                        return Ok(unavailable(&run, session_id, &e));
                    }
                    Err(Interruption::Fatal(e)) => return Err(e),
                },
                QueryState::ToolRequested(calls) => {
                    run.rounds += 1;
                    debug!(
                        "Tool round {}/{}: {:?}",
                        run.rounds,
                        self.config.max_tool_rounds,
                        calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
                    );
                    run.messages
                        .push(ChatMessage::assistant_tool_calls(calls.clone()));
                    QueryState::ToolExecuting(calls)
                }
                QueryState::ToolExecuting(calls) => {
                    let round = timeout(
                        self.config.round_timeout(),
                        self.execute_tools(&mut run, &calls),
                    )
                    .await;
                    match round {
                        Ok(Ok(())) => QueryState::AwaitingModel,
                        Ok(Err(Interruption::Unavailable(e))) => {
                            return Ok(unavailable(&run, session_id, &e));
                        }
                        Ok(Err(Interruption::Fatal(e))) => return Err(e),
                        Err(_) => {
                            warn!(
                                "Tool round {} exceeded {:?}",
                                run.rounds,
                                self.config.round_timeout()
                            );
                            QueryState::Done {
                                answer: best_effort_answer(&run.log, AnswerOutcome::TimedOut),
                                outcome: AnswerOutcome::TimedOut,
                            }
                        }
                    }
                }
                QueryState::Done { answer, outcome } => break (answer, outcome),
            };
        };

        self.memory
            .append_exchange(&session_id, question, answer.as_str())
            .await;

        info!(
            "Answered in {} tool rounds ({:?}, {} invocations)",
            run.rounds,
            outcome,
            run.log.records().len()
        );

        Ok(Answer {
            answer,
            citations: run.log.citations(),
            session_id,
            outcome,
            tool_rounds: run.rounds,
        })
    }

    async fn start(&self, run: &mut QueryRun, session_id: &str, question: &str) {
        let history = self.memory.get_history(session_id).await;
        debug!(
            "Starting query in session {} with {} turns of history",
            session_id,
            history.len()
        );

        run.messages.push(ChatMessage::system(SYSTEM_PROMPT));
        run.messages
            .extend(history.into_iter().map(|turn| match turn.role {
                Role::User => ChatMessage::user(turn.text),
                Role::Assistant => ChatMessage::assistant(turn.text),
            }));
        run.messages.push(ChatMessage::user(question));
    }

    async fn await_model(
        &self,
        run: &mut QueryRun,
    ) -> std::result::Result<QueryState, Interruption> {
        let forced_final = run.rounds >= self.config.max_tool_rounds;
        let tools = if forced_final {
            debug!("Tool round limit reached, requesting a final answer");
            Vec::new()
        } else {
            self.registry.definitions()
        };

        let generation = timeout(
            self.config.round_timeout(),
            self.generator.generate(&run.messages, &tools),
        )
        .await;

        let generation = match generation {
            Ok(Ok(generation)) => generation,
            Ok(Err(e)) if e.is_transient() => return Err(Interruption::Unavailable(e)),
            Ok(Err(e)) => return Err(Interruption::Fatal(RagError::Generation(e))),
            Err(_) => {
                warn!(
                    "Model call exceeded {:?} after {} tool rounds",
                    self.config.round_timeout(),
                    run.rounds
                );
                return Ok(QueryState::Done {
                    answer: best_effort_answer(&run.log, AnswerOutcome::TimedOut),
                    outcome: AnswerOutcome::TimedOut,
                });
            }
        };

        Ok(match generation {
            Generation::Answer(answer) => QueryState::Done {
                answer,
                outcome: if run.degraded {
                    AnswerOutcome::Degraded
                } else {
                    AnswerOutcome::Complete
                },
            },
            Generation::ToolCalls(calls) if forced_final => {
                warn!(
                    "Model requested {} more tool calls after the final round",
                    calls.len()
                );
                QueryState::Done {
                    answer: best_effort_answer(&run.log, AnswerOutcome::RoundLimitReached),
                    outcome: AnswerOutcome::RoundLimitReached,
                }
            }
            Generation::ToolCalls(calls) if calls.is_empty() => {
                warn!("Model returned neither an answer nor tool calls");
                QueryState::Done {
                    answer: best_effort_answer(&run.log, AnswerOutcome::Degraded),
                    outcome: AnswerOutcome::Degraded,
                }
            }
            Generation::ToolCalls(calls) => QueryState::ToolRequested(calls),
        })
    }

    async fn execute_tools(
        &self,
        run: &mut QueryRun,
        calls: &[ToolCall],
    ) -> std::result::Result<(), Interruption> {
        for call in calls {
            let content = match self.registry.invoke(call, &mut run.log).await {
                Ok(output) if output.is_error => format!("Error: {}", output.text),
                Ok(output) => output.text,
                Err(ToolError::NotFound { name }) => {
                    warn!("Model requested unknown tool {}", name);
                    run.degraded = true;
                    format!("Error: no tool named '{}' is available", name)
                }
                Err(e @ ToolError::InvalidArguments { .. }) => format!("Error: {}", e),
                Err(ToolError::Execution { tool, source }) => {
                    return Err(match source {
                        RagError::Embedding(e) | RagError::Generation(e) if e.is_transient() => {
                            warn!("Tool {} could not reach its service: {}", tool, e);
                            Interruption::Unavailable(e)
                        }
                        RagError::IndexUnavailable(message) => {
                            warn!("Tool {} could not reach the index: {}", tool, message);
                            Interruption::Unavailable(ServiceError::Unavailable(message))
                        }
                        other => Interruption::Fatal(other),
                    });
                }
            };
            run.messages
                .push(ChatMessage::tool_result(call.name.as_str(), content));
        }
        Ok(())
    }
}

fn unavailable(run: &QueryRun, session_id: String, cause: &ServiceError) -> Answer {
    warn!("Answering with unavailable notice: {}", cause);
    Answer {
        answer: UNAVAILABLE_MESSAGE.to_string(),
        citations: run.log.citations(),
        session_id,
        outcome: AnswerOutcome::Unavailable,
        tool_rounds: run.rounds,
    }
}

/// Fallback answer assembled from whatever evidence the tools returned
fn best_effort_answer(log: &InvocationLog, outcome: AnswerOutcome) -> String {
    let evidence = log.evidence();
    let lead = match outcome {
        AnswerOutcome::TimedOut => "The answer took too long to produce.",
        _ => "I couldn't finish composing an answer.",
    };

    if evidence.is_empty() {
        format!("{} No relevant course material was found for this question.", lead)
    } else {
        format!(
            "{} Here is the most relevant course material I found:\n\n{}",
            lead,
            evidence.join("\n\n")
        )
    }
}
