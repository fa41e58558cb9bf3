//! The conversation engine: an explicit state machine over model turns
//! and function-call execution.

use serde_json::Value;
use storage::{Content, FunctionCall, FunctionResponse, Part, Role, Session, SessionId, SessionStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ModelBackend, ModelRequest};
use crate::builtins::{ASK_QUESTION, is_terminal};
use crate::error::{Error, Result};
use crate::registry::Registry;
use toolserver::FunctionDeclaration;

/// Nudge sent when the model returns nothing actionable.
const CONTINUE_PROMPT: &str = "Task may not be finished. Please continue.\n\
If you have finished the task, please call the 'complete' function.\n\
If you have any questions, please call the 'ask_question' function.";

/// How one processing call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The model called `complete`.
    Completed { message: String },
    /// The model called `ask_question`; the caller should answer in a
    /// follow-up message.
    QuestionRaised {
        question: String,
        options: Vec<String>,
    },
}

impl Outcome {
    fn from_call(call: &FunctionCall) -> Self {
        let text = |key: &str| {
            call.args
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        if call.name == ASK_QUESTION {
            let options = call
                .args
                .get("options")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Outcome::QuestionRaised {
                question: text("question"),
                options,
            }
        } else {
            Outcome::Completed {
                message: text("message"),
            }
        }
    }
}

/// Turn-processing state. One `process_message` call walks these until a
/// terminal tool call completes the loop or a failure ends it.
enum State {
    /// Waiting on the model's next turn.
    AwaitingModel,
    /// Executing the turn's function calls in emitted order.
    HandlingFunctionCalls(Vec<FunctionCall>),
    /// A terminal tool ran; persist and surface the outcome.
    Completed(Outcome),
    /// Fatal error; persist best-effort and surface it.
    Failed(Error),
}

/// Drives one session's conversation against a model backend.
///
/// Strictly sequential per session: at most one model or tool call is in
/// flight, and the history is only ever appended to during a cycle.
pub struct Engine<B> {
    backend: B,
    registry: Registry,
    store: SessionStore,
    session: Session,
    declarations: Vec<FunctionDeclaration>,
    system: Option<String>,
    max_continues: Option<u32>,
}

impl<B: ModelBackend> Engine<B> {
    /// Create an engine over a fresh or previously loaded session.
    pub fn new(backend: B, registry: Registry, store: SessionStore, session: Session) -> Self {
        let declarations = registry.declarations();
        Self {
            backend,
            registry,
            store,
            session,
            declarations,
            system: None,
            max_continues: None,
        }
    }

    /// Set the system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Cap the number of continue nudges per processing call.
    ///
    /// Unset means unbounded, which is the historical behavior.
    pub fn with_max_continues(mut self, max: u32) -> Self {
        self.max_continues = Some(max);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    /// Process one user message: loop over model turns and function calls
    /// until a terminal tool call or a failure.
    ///
    /// Cancellation through `cancel` fails the call rather than silently
    /// dropping it. The session is persisted on completion (hard) and on
    /// failure (best effort) — not after every turn.
    pub async fn process_message(
        &mut self,
        cancel: &CancellationToken,
        input: &str,
    ) -> Result<Outcome> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::EmptyInput);
        }

        info!(session = %self.session.id, "processing message");
        self.session.push(Content::user_text(input));

        let mut continues: u32 = 0;
        let mut state = State::AwaitingModel;

        loop {
            state = match state {
                State::AwaitingModel => self.await_model(cancel, &mut continues).await,
                State::HandlingFunctionCalls(calls) => self.handle_calls(cancel, calls).await,
                State::Completed(outcome) => {
                    self.session.touch();
                    self.store.save(&self.session)?;
                    info!(session = %self.session.id, "session persisted");
                    return Ok(outcome);
                }
                State::Failed(err) => {
                    self.save_best_effort();
                    return Err(err);
                }
            };
        }
    }

    async fn await_model(&mut self, cancel: &CancellationToken, continues: &mut u32) -> State {
        let request = ModelRequest {
            history: &self.session.history,
            system: self.system.as_deref(),
            declarations: &self.declarations,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return State::Failed(Error::Cancelled),
            result = self.backend.generate(request) => match result {
                Ok(response) => response,
                Err(err) => return State::Failed(err.into()),
            },
        };

        // Nothing actionable at all: nudge without recording a turn.
        if response.parts.is_empty() {
            return self.nudge(continues);
        }

        for text in response.parts.iter().filter_map(Part::as_text) {
            if !text.trim().is_empty() {
                info!(session = %self.session.id, "model: {}", text.trim());
            }
        }

        let calls: Vec<FunctionCall> = response
            .parts
            .iter()
            .filter_map(Part::as_function_call)
            .cloned()
            .collect();
        self.session.push(Content::new(Role::Model, response.parts));

        if calls.is_empty() {
            // Text only: the loop can only end through a terminal call, so
            // ask the model to keep going.
            self.nudge(continues)
        } else {
            State::HandlingFunctionCalls(calls)
        }
    }

    fn nudge(&mut self, continues: &mut u32) -> State {
        *continues += 1;
        if let Some(max) = self.max_continues
            && *continues > max
        {
            return State::Failed(Error::ContinueLimit(max));
        }

        debug!(session = %self.session.id, attempt = *continues, "nudging model to continue");
        self.session.push(Content::user_text(CONTINUE_PROMPT));
        State::AwaitingModel
    }

    async fn handle_calls(&mut self, cancel: &CancellationToken, calls: Vec<FunctionCall>) -> State {
        let mut responses: Vec<Part> = Vec::new();

        for call in calls {
            if is_terminal(&call.name) {
                let executed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return State::Failed(Error::Cancelled),
                    result = self.registry.execute(&call.name, call.args.clone()) => result,
                };
                if let Err(err) = executed {
                    return State::Failed(err.into());
                }

                if !responses.is_empty() {
                    self.session.push(Content::new(Role::User, responses));
                }
                // First terminal call wins; anything after it in this turn
                // is never executed.
                return State::Completed(Outcome::from_call(&call));
            }

            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return State::Failed(Error::Cancelled),
                result = self.registry.execute(&call.name, call.args.clone()) => result,
            };

            match executed {
                Ok(result) => {
                    responses.push(Part::FunctionResponse(FunctionResponse {
                        name: call.name,
                        response: result,
                    }));
                }
                Err(err) => return State::Failed(err.into()),
            }
        }

        self.session.push(Content::new(Role::User, responses));
        State::AwaitingModel
    }

    fn save_best_effort(&mut self) {
        self.session.touch();
        if let Err(err) = self.store.save(&self.session) {
            warn!(session = %self.session.id, error = %err, "best-effort session save failed");
        }
    }
}
