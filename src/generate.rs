use crate::consts::{MAX_COMPLETION_ATTEMPTS, RETRY_BACKOFF_MILLIS};
use crate::error::{GenerateError, ScoringError};
use crate::session::{PromptContext, Speaker};
use crate::transcribe::is_transient_status;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const COMPLETION_MODEL: &str = "gpt-4";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Default)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[allow(dead_code)]
#[derive(Deserialize, Debug)]
pub struct ChatChoice {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
    pub index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Complete,
    Partial,
    Abrupt,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub question: String,
    pub technical_assessment: String,
    pub communication_assessment: String,
}

/// Structured evaluation produced at the end of an interview.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub technical_score: f32,
    pub communication_score: f32,
    pub justification: String,
    pub completion_status: CompletionStatus,
    #[serde(default)]
    pub breakdown: Vec<ScoreBreakdown>,
}

/// Generates the interviewer's side of the conversation.  Both operations
/// are pure with respect to session state: they read the context and
/// return a value; the state machine appends results to history.
pub trait ResponseGenerator: Send + Sync {
    fn next_utterance(
        &self,
        ctx: &PromptContext,
    ) -> impl std::future::Future<Output = Result<String, GenerateError>> + Send;

    fn final_score(
        &self,
        ctx: &PromptContext,
    ) -> impl std::future::Future<Output = Result<ScoreResult, ScoringError>> + Send;
}

/// The fixed interviewer persona: two structured questions on distinct
/// topics, one at a time, then the conclusion offer.
fn interview_system_prompt(job_role: &str, job_description: &str) -> String {
    format!(
        "You are Askara, an AI interviewer conducting a phone interview for a {job_role} role. \
         Assess the candidate from their responses. Ask exactly 2 structured questions, changing \
         topic with each question, each grounded in the job description and its key skills. Do \
         not ask follow-up questions. Ask only ONE question at a time, at most 3 lines long, \
         precise and straightforward. After 2 questions say: 'Thank you for your time. Do you \
         have any questions for me?'. If the candidate asks a question, answer it and then \
         conclude the interview. Be strict: only rate the candidate well if they closely match \
         the role.\nJob Description:\n{job_description}"
    )
}

/// The structured scoring instruction.  The reply must be a JSON object in
/// the ScoreResult shape.
const SCORING_INSTRUCTION: &str = "The interview is over. Evaluate the candidate based on: \
1. Technical Knowledge (0-10): relevance to the job role, depth of understanding, accuracy. \
2. Communication Skills (0-10): clarity, fluency, professional tone. \
Deduct points if the interview ended abruptly. \
Respond with ONLY a JSON object of the form: \
{\"technicalScore\": number, \"communicationScore\": number, \"justification\": string, \
\"completionStatus\": \"complete\"|\"partial\"|\"abrupt\", \
\"breakdown\": [{\"question\": string, \"technicalAssessment\": string, \
\"communicationAssessment\": string}]}";

/// Deterministic prompt: system instruction, then the full history in
/// order.  Candidate lines map to the user role, interviewer lines to the
/// assistant role.
pub fn build_messages(ctx: &PromptContext) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system".to_string(),
        content: interview_system_prompt(&ctx.job_role, &ctx.job_description),
    }];
    for turn in &ctx.history {
        let role = match turn.speaker {
            Speaker::Candidate => "user",
            Speaker::Interviewer => "assistant",
        };
        messages.push(ChatMessage {
            role: role.to_string(),
            content: turn.text.clone(),
        });
    }
    messages
}

/// Pull the outermost JSON object out of a completion that may wrap it in
/// prose or markdown fences.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn parse_score(text: &str) -> Result<ScoreResult, ScoringError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ScoringError::Malformed(format!("no JSON object in: {text}")))?;
    serde_json::from_str::<ScoreResult>(json).map_err(|e| ScoringError::Malformed(e.to_string()))
}

/// Heuristic used in the Q&A phase to decide whether the candidate's
/// utterance deserves an answer before hanging up.  Deliberately crude:
/// a trailing question mark from the transcriber or a leading
/// interrogative word.  False positives cost one extra answered line;
/// false negatives skip straight to the farewell.  Both are acceptable.
pub fn looks_like_question(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.contains('?') {
        return true;
    }
    const INTERROGATIVES: &[&str] = &[
        "what", "how", "why", "when", "where", "who", "which", "can", "could", "would", "will",
        "do", "does", "is", "are", "should",
    ];
    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    INTERROGATIVES.contains(&first.as_str())
}

pub struct OpenAiGenerator {
    http_client: reqwest::Client,
    api_key: String,
}

impl OpenAiGenerator {
    pub fn new(http_client: reqwest::Client, api_key: String) -> Self {
        Self {
            http_client,
            api_key,
        }
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<String, GenerateError> {
        let payload = ChatPayload {
            model: COMPLETION_MODEL.to_string(),
            messages: messages.to_vec(),
            ..Default::default()
        };
        let resp = self
            .http_client
            .post(COMPLETIONS_URL)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&payload)
            .send()
            .await
            .map_err(|e| GenerateError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let body = resp
                .json::<ChatResponse>()
                .await
                .map_err(|e| GenerateError::Transient(e.to_string()))?;
            let choice = body
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| GenerateError::Definitive("no choices in completion".to_string()))?;
            return Ok(choice.message.content.trim().to_string());
        }
        let body = resp.text().await.unwrap_or_default();
        if is_transient_status(status.as_u16()) {
            Err(GenerateError::Transient(format!("{status}: {body}")))
        } else {
            Err(GenerateError::Definitive(format!("{status}: {body}")))
        }
    }

    /// One chat completion with bounded retry on transient failure.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, GenerateError> {
        let mut last = None;
        for attempt in 1..=MAX_COMPLETION_ATTEMPTS {
            match self.attempt(&messages).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(GenerateError::Transient(msg)) => {
                    warn!(attempt, error = %msg, "transient completion failure");
                    last = Some(GenerateError::Transient(msg));
                    if attempt < MAX_COMPLETION_ATTEMPTS {
                        sleep(Duration::from_millis(RETRY_BACKOFF_MILLIS * attempt as u64)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| GenerateError::Transient("retries exhausted".to_string())))
    }
}

impl ResponseGenerator for OpenAiGenerator {
    async fn next_utterance(&self, ctx: &PromptContext) -> Result<String, GenerateError> {
        self.complete(build_messages(ctx)).await
    }

    async fn final_score(&self, ctx: &PromptContext) -> Result<ScoreResult, ScoringError> {
        let mut messages = build_messages(ctx);
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: SCORING_INSTRUCTION.to_string(),
        });
        let text = self.complete(messages).await?;
        parse_score(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Turn;

    fn ctx() -> PromptContext {
        PromptContext {
            job_role: "Backend Engineer".to_string(),
            job_description: "Rust, distributed systems".to_string(),
            history: vec![
                Turn {
                    speaker: Speaker::Interviewer,
                    text: "Tell me about yourself.".to_string(),
                },
                Turn {
                    speaker: Speaker::Candidate,
                    text: "I build storage engines.".to_string(),
                },
            ],
        }
    }

    #[test]
    fn messages_preserve_history_order_and_roles() {
        let messages = build_messages(&ctx());
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Backend Engineer"));
        assert!(messages[0].content.contains("Rust, distributed systems"));
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "I build storage engines.");
    }

    #[test]
    fn prompt_is_deterministic() {
        let a = build_messages(&ctx());
        let b = build_messages(&ctx());
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn parses_score_wrapped_in_fences() {
        let reply = "Here is my evaluation:\n```json\n{\"technicalScore\": 7, \
                     \"communicationScore\": 8.5, \"justification\": \"solid\", \
                     \"completionStatus\": \"complete\", \"breakdown\": []}\n```";
        let score = parse_score(reply).unwrap();
        assert_eq!(score.technical_score, 7.0);
        assert_eq!(score.communication_score, 8.5);
        assert_eq!(score.completion_status, CompletionStatus::Complete);
    }

    #[test]
    fn breakdown_defaults_to_empty() {
        let reply = "{\"technicalScore\": 3, \"communicationScore\": 4, \
                     \"justification\": \"thin answers\", \"completionStatus\": \"abrupt\"}";
        let score = parse_score(reply).unwrap();
        assert!(score.breakdown.is_empty());
    }

    #[test]
    fn unparsable_score_is_an_error_not_a_default() {
        assert!(matches!(
            parse_score("Candidate Rating: 7/10"),
            Err(ScoringError::Malformed(_))
        ));
        assert!(matches!(
            parse_score("{\"technicalScore\": \"high\"}"),
            Err(ScoringError::Malformed(_))
        ));
    }

    #[test]
    fn question_heuristic() {
        assert!(looks_like_question("What does the on-call rotation look like?"));
        assert!(looks_like_question("how big is the team"));
        assert!(looks_like_question("Is the role remote"));
        assert!(!looks_like_question("No, I think that covers everything."));
        assert!(!looks_like_question("Thanks, that was all."));
        assert!(!looks_like_question(""));
    }
}
