use crate::call_control::{CallControl, CallInstruction};
use crate::consts::{
    APOLOGY, CONCLUSION_PROMPT, FAREWELL, PERSIST_ATTEMPTS, REPROMPT, RETRY_BACKOFF_MILLIS,
    SCORING_ATTEMPTS,
};
use crate::generate::{looks_like_question, ResponseGenerator, ScoreResult};
use crate::session::{Phase, PromptContext, SessionStore, Speaker};
use crate::sink::{CandidateRecord, ResultSink};
use crate::types::SessionEvent;

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct InterviewDeps<G, C, K> {
    pub store: Arc<SessionStore>,
    pub generator: Arc<G>,
    pub control: Arc<C>,
    pub sink: Arc<K>,
}

fn greeting_line(job_role: &str) -> String {
    format!(
        "Hi, I am Askara, your AI interviewer. I will be conducting your interview for the \
         {job_role} role today. Let's start with an introduction. Please tell me about yourself."
    )
}

/// The per-call event loop.  Events for this call are consumed strictly in
/// arrival order; nothing else mutates the session while it runs.  The
/// loop ends on the first terminal transition, after which queued
/// duplicates are dropped with the channel.
pub async fn run_session<G, C, K>(
    call_sid: String,
    mut events: mpsc::Receiver<SessionEvent>,
    deps: InterviewDeps<G, C, K>,
) where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    debug!(call=%call_sid, "session event loop started");
    while let Some(event) = events.recv().await {
        if handle_event(&call_sid, event, &deps).await {
            break;
        }
    }
    debug!(call=%call_sid, "session event loop finished");
}

/// Advance the session by one normalized event.  Returns true once the
/// session has reached its terminal state and the loop should stop.
async fn handle_event<G, C, K>(
    call_sid: &str,
    event: SessionEvent,
    deps: &InterviewDeps<G, C, K>,
) -> bool
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    let phase = match deps.store.mutate(call_sid, |s| {
        s.touch();
        s.phase
    }) {
        Ok(phase) => phase,
        Err(e) => {
            warn!(call=%call_sid, error=%e, "dropping event for missing session");
            return true;
        }
    };
    if phase >= Phase::Scoring {
        debug!(call=%call_sid, event=?event, "duplicate event in terminal phase; ignoring");
        return false;
    }

    match event {
        SessionEvent::CallStarted => {
            on_call_started(call_sid, deps).await;
            false
        }
        SessionEvent::SpeechRecognized(text) => on_speech(call_sid, text, phase, deps).await,
        SessionEvent::DigitPressed(digit) => on_digit(call_sid, digit, deps).await,
        SessionEvent::CallEnded => {
            info!(call=%call_sid, "call ended");
            finalize(call_sid, deps).await;
            true
        }
    }
}

/// First CallStarted speaks the greeting; later ones are capture restarts
/// after an utterance and are no-ops.
async fn on_call_started<G, C, K>(call_sid: &str, deps: &InterviewDeps<G, C, K>)
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    let greeting = deps.store.mutate(call_sid, |s| {
        if s.greeted {
            None
        } else {
            s.greeted = true;
            Some(greeting_line(&s.job_role))
        }
    });
    match greeting {
        Ok(Some(text)) => speak(deps.control.as_ref(), call_sid, CallInstruction::Speak(text)).await,
        Ok(None) => debug!(call=%call_sid, "capture resumed"),
        Err(e) => error!(call=%call_sid, error=%e, "call started for missing session"),
    }
}

async fn on_speech<G, C, K>(
    call_sid: &str,
    text: String,
    phase: Phase,
    deps: &InterviewDeps<G, C, K>,
) -> bool
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    match phase {
        Phase::Introduction | Phase::Question1 => {
            if text.is_empty() {
                speak(
                    deps.control.as_ref(),
                    call_sid,
                    CallInstruction::Speak(REPROMPT.to_string()),
                )
                .await;
                return false;
            }
            let ctx = match deps.store.mutate(call_sid, |s| {
                s.push_turn(Speaker::Candidate, text.clone());
                s.prompt_context()
            }) {
                Ok(ctx) => ctx,
                Err(_) => return true,
            };
            match deps.generator.next_utterance(&ctx).await {
                Ok(question) => {
                    let next = if phase == Phase::Introduction {
                        Phase::Question1
                    } else {
                        Phase::Question2
                    };
                    let _ = deps.store.mutate(call_sid, |s| {
                        s.push_turn(Speaker::Interviewer, question.clone());
                        s.questions_asked += 1;
                        s.advance(next);
                    });
                    speak(
                        deps.control.as_ref(),
                        call_sid,
                        CallInstruction::Speak(question),
                    )
                    .await;
                    false
                }
                Err(e) => {
                    error!(call=%call_sid, error=%e, "failed to generate next question");
                    apologize_and_end(call_sid, deps).await;
                    true
                }
            }
        }
        Phase::Question2 => {
            if text.is_empty() {
                speak(
                    deps.control.as_ref(),
                    call_sid,
                    CallInstruction::Speak(REPROMPT.to_string()),
                )
                .await;
                return false;
            }
            let _ = deps.store.mutate(call_sid, |s| {
                s.push_turn(Speaker::Candidate, text);
                s.push_turn(Speaker::Interviewer, CONCLUSION_PROMPT);
                s.conclusion_offered = true;
                s.advance(Phase::QnA);
            });
            speak(
                deps.control.as_ref(),
                call_sid,
                CallInstruction::Speak(CONCLUSION_PROMPT.to_string()),
            )
            .await;
            false
        }
        Phase::QnA => {
            if text.is_empty() {
                farewell_and_end(call_sid, None, deps).await;
                return true;
            }
            let ctx = match deps.store.mutate(call_sid, |s| {
                s.push_turn(Speaker::Candidate, text.clone());
                s.prompt_context()
            }) {
                Ok(ctx) => ctx,
                Err(_) => return true,
            };
            let answer = if looks_like_question(&text) {
                match deps.generator.next_utterance(&ctx).await {
                    Ok(answer) => Some(answer),
                    Err(e) => {
                        // Degrade to the plain farewell; the caller still
                        // gets call closure.
                        warn!(call=%call_sid, error=%e, "failed to answer candidate question");
                        None
                    }
                }
            } else {
                None
            };
            farewell_and_end(call_sid, answer, deps).await;
            true
        }
        // Guarded by the caller.
        Phase::Scoring | Phase::Terminated => false,
    }
}

/// '#' is the universal early-exit short circuit; other digits are noise.
async fn on_digit<G, C, K>(call_sid: &str, digit: char, deps: &InterviewDeps<G, C, K>) -> bool
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    if digit != '#' {
        debug!(call=%call_sid, digit=%digit, "ignoring digit");
        return false;
    }
    let offered = deps
        .store
        .mutate(call_sid, |s| s.conclusion_offered)
        .unwrap_or(false);
    info!(call=%call_sid, conclusion_offered = offered, "candidate requested early exit");
    farewell_and_end(call_sid, None, deps).await;
    true
}

async fn farewell_and_end<G, C, K>(
    call_sid: &str,
    preface: Option<String>,
    deps: &InterviewDeps<G, C, K>,
) where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    let line = match preface {
        Some(answer) => format!("{answer} {FAREWELL}"),
        None => FAREWELL.to_string(),
    };
    let _ = deps
        .store
        .mutate(call_sid, |s| s.push_turn(Speaker::Interviewer, line.clone()));
    speak(
        deps.control.as_ref(),
        call_sid,
        CallInstruction::SpeakAndHangup(line),
    )
    .await;
    finalize(call_sid, deps).await;
}

async fn apologize_and_end<G, C, K>(call_sid: &str, deps: &InterviewDeps<G, C, K>)
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    let _ = deps
        .store
        .mutate(call_sid, |s| s.push_turn(Speaker::Interviewer, APOLOGY));
    speak(
        deps.control.as_ref(),
        call_sid,
        CallInstruction::SpeakAndHangup(APOLOGY.to_string()),
    )
    .await;
    finalize(call_sid, deps).await;
}

/// Score, emit the candidate record, and tear the session down.  Runs
/// exactly once per session: the phase guard in `handle_event` and the
/// store removal here make duplicate terminal events no-ops.
async fn finalize<G, C, K>(call_sid: &str, deps: &InterviewDeps<G, C, K>)
where
    G: ResponseGenerator,
    C: CallControl,
    K: ResultSink,
{
    let (ctx, questions_asked, duration) = match deps.store.mutate(call_sid, |s| {
        s.advance(Phase::Scoring);
        (s.prompt_context(), s.questions_asked, s.created_at.elapsed())
    }) {
        Ok(v) => v,
        Err(_) => return,
    };

    let score = if ctx.history.is_empty() {
        debug!(call=%call_sid, "empty interview; skipping scoring");
        None
    } else {
        score_with_retry(deps.generator.as_ref(), &ctx, call_sid).await
    };
    let scoring_failed = score.is_none() && !ctx.history.is_empty();

    // The record is built from terminal session state so late events
    // cannot alter what the sink sees.
    let record = match deps.store.mutate(call_sid, |s| {
        s.score = score;
        s.advance(Phase::Terminated);
        CandidateRecord {
            phone: s.phone.clone(),
            job_role: s.job_role.clone(),
            transcript: s.history.clone(),
            score: s.score.clone(),
            completed_at: OffsetDateTime::now_utc(),
        }
    }) {
        Ok(record) => record,
        Err(_) => return,
    };
    if scoring_failed {
        warn!(call=%call_sid, "scoring exhausted; routing transcript to dead-letter area");
        if let Err(e) = deps.sink.dead_letter(&record).await {
            error!(call=%call_sid, error=%e, "failed to dead-letter transcript");
        }
    } else {
        persist_with_retry(deps.sink.as_ref(), &record, call_sid).await;
    }

    if deps.store.remove(call_sid) {
        info!(
            call=%call_sid,
            questions = questions_asked,
            duration_secs = duration.as_secs(),
            "session terminated"
        );
    }
}

async fn score_with_retry<G: ResponseGenerator>(
    generator: &G,
    ctx: &PromptContext,
    call_sid: &str,
) -> Option<ScoreResult> {
    for attempt in 1..=SCORING_ATTEMPTS {
        match generator.final_score(ctx).await {
            Ok(score) => {
                info!(
                    call=%call_sid,
                    technical = score.technical_score,
                    communication = score.communication_score,
                    "candidate scored"
                );
                return Some(score);
            }
            Err(e) => {
                warn!(call=%call_sid, attempt, error=%e, "scoring attempt failed");
                if attempt < SCORING_ATTEMPTS {
                    sleep(Duration::from_millis(RETRY_BACKOFF_MILLIS * attempt as u64)).await;
                }
            }
        }
    }
    None
}

async fn persist_with_retry<K: ResultSink>(sink: &K, record: &CandidateRecord, call_sid: &str) {
    for attempt in 1..=PERSIST_ATTEMPTS {
        match sink.persist(record).await {
            Ok(()) => return,
            Err(e) => {
                warn!(call=%call_sid, attempt, error=%e, "failed to persist candidate record");
                if attempt < PERSIST_ATTEMPTS {
                    sleep(Duration::from_millis(RETRY_BACKOFF_MILLIS * attempt as u64)).await;
                }
            }
        }
    }
    error!(call=%call_sid, "persist retries exhausted; routing record to dead-letter area");
    if let Err(e) = sink.dead_letter(record).await {
        error!(call=%call_sid, error=%e, "failed to dead-letter candidate record");
    }
}

async fn speak<C: CallControl>(control: &C, call_sid: &str, instruction: CallInstruction) {
    if let Err(e) = control.execute(call_sid, instruction).await {
        error!(call=%call_sid, error=%e, "failed to issue call instruction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ControlError, GenerateError, ScoringError, SinkError};
    use crate::generate::CompletionStatus;
    use crate::session::CallSession;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockGenerator {
        utterance_calls: AtomicU32,
        score_calls: AtomicU32,
        fail_utterances: bool,
        fail_scoring: bool,
    }

    impl ResponseGenerator for MockGenerator {
        async fn next_utterance(&self, _ctx: &PromptContext) -> Result<String, GenerateError> {
            let n = self.utterance_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_utterances {
                return Err(GenerateError::Definitive("mock rejection".to_string()));
            }
            Ok(format!("Generated utterance {n}?"))
        }

        async fn final_score(&self, _ctx: &PromptContext) -> Result<ScoreResult, ScoringError> {
            self.score_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_scoring {
                return Err(ScoringError::Malformed("mock gibberish".to_string()));
            }
            Ok(ScoreResult {
                technical_score: 7.0,
                communication_score: 8.0,
                justification: "solid".to_string(),
                completion_status: CompletionStatus::Complete,
                breakdown: vec![],
            })
        }
    }

    #[derive(Default)]
    struct MockControl {
        issued: Mutex<Vec<CallInstruction>>,
    }

    impl CallControl for MockControl {
        async fn execute(
            &self,
            _call_sid: &str,
            instruction: CallInstruction,
        ) -> Result<(), ControlError> {
            self.issued.lock().unwrap().push(instruction);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSink {
        persisted: Mutex<Vec<CandidateRecord>>,
        dead_lettered: Mutex<Vec<CandidateRecord>>,
    }

    impl ResultSink for MockSink {
        async fn persist(&self, record: &CandidateRecord) -> Result<(), SinkError> {
            self.persisted.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn dead_letter(&self, record: &CandidateRecord) -> Result<(), SinkError> {
            self.dead_lettered.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Fixture {
        deps: InterviewDeps<MockGenerator, MockControl, MockSink>,
        generator: Arc<MockGenerator>,
        control: Arc<MockControl>,
        sink: Arc<MockSink>,
    }

    fn fixture_with(generator: MockGenerator) -> Fixture {
        let store = Arc::new(SessionStore::new());
        let generator = Arc::new(generator);
        let control = Arc::new(MockControl::default());
        let sink = Arc::new(MockSink::default());
        let (tx, _rx) = mpsc::channel(8);
        store
            .create(
                CallSession::new(
                    "CA1".to_string(),
                    "+15550001111".to_string(),
                    "Backend Engineer".to_string(),
                    "Rust, distributed systems".to_string(),
                ),
                tx,
            )
            .unwrap();
        Fixture {
            deps: InterviewDeps {
                store,
                generator: generator.clone(),
                control: control.clone(),
                sink: sink.clone(),
            },
            generator,
            control,
            sink,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockGenerator::default())
    }

    fn phase(f: &Fixture) -> Phase {
        f.deps.store.mutate("CA1", |s| s.phase).unwrap()
    }

    #[tokio::test]
    async fn introduction_speech_moves_to_first_question() {
        let f = fixture();
        assert!(!handle_event("CA1", SessionEvent::CallStarted, &f.deps).await);
        assert!(
            !handle_event(
                "CA1",
                SessionEvent::SpeechRecognized("I am a backend engineer with six years".into()),
                &f.deps,
            )
            .await
        );
        assert_eq!(phase(&f), Phase::Question1);
        let history = f.deps.store.mutate("CA1", |s| s.history.clone()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].speaker, Speaker::Candidate);
        assert_eq!(history[1].speaker, Speaker::Interviewer);
        assert!(!history[1].text.is_empty());
        // Greeting plus the first question were spoken.
        let issued = f.control.issued.lock().unwrap();
        assert_eq!(issued.len(), 2);
        assert!(matches!(&issued[0], CallInstruction::Speak(t) if t.contains("Askara")));
    }

    #[tokio::test]
    async fn two_answers_reach_qna_with_two_questions_asked() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("answer one".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("answer two".into()), &f.deps).await;
        assert_eq!(phase(&f), Phase::QnA);
        let (asked, offered, history) = f
            .deps
            .store
            .mutate("CA1", |s| {
                (s.questions_asked, s.conclusion_offered, s.history.clone())
            })
            .unwrap();
        assert_eq!(asked, 2);
        assert!(offered);
        assert_eq!(history.last().unwrap().text, CONCLUSION_PROMPT);
    }

    #[tokio::test]
    async fn repeated_call_started_greets_once() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        assert_eq!(f.control.issued.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_speech_outside_qna_reprompts_without_advancing() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        assert!(!handle_event("CA1", SessionEvent::SpeechRecognized(String::new()), &f.deps).await);
        assert_eq!(phase(&f), Phase::Introduction);
        let history_len = f.deps.store.mutate("CA1", |s| s.history.len()).unwrap();
        assert_eq!(history_len, 0);
        let issued = f.control.issued.lock().unwrap();
        assert!(matches!(&issued[1], CallInstruction::Speak(t) if t.contains("didn't hear")));
    }

    #[tokio::test]
    async fn pound_key_in_qna_short_circuits_to_scoring() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("one".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("two".into()), &f.deps).await;
        assert!(handle_event("CA1", SessionEvent::DigitPressed('#'), &f.deps).await);
        assert_eq!(f.generator.score_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.sink.persisted.lock().unwrap().len(), 1);
        assert!(f.deps.store.get("CA1").is_none());
    }

    #[tokio::test]
    async fn pound_key_works_in_any_phase() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        assert!(handle_event("CA1", SessionEvent::DigitPressed('#'), &f.deps).await);
        assert!(f.deps.store.get("CA1").is_none());
    }

    #[tokio::test]
    async fn other_digits_are_ignored() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        assert!(!handle_event("CA1", SessionEvent::DigitPressed('5'), &f.deps).await);
        assert_eq!(phase(&f), Phase::Introduction);
    }

    #[tokio::test]
    async fn qna_question_gets_answered_before_farewell() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("one".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("two".into()), &f.deps).await;
        assert!(
            handle_event(
                "CA1",
                SessionEvent::SpeechRecognized("What does the team look like?".into()),
                &f.deps,
            )
            .await
        );
        let issued = f.control.issued.lock().unwrap();
        match issued.last().unwrap() {
            CallInstruction::SpeakAndHangup(line) => {
                assert!(line.contains("Generated utterance"));
                assert!(line.contains("Goodbye"));
            }
            other => panic!("expected SpeakAndHangup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn qna_statement_goes_straight_to_farewell() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("one".into()), &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("two".into()), &f.deps).await;
        let before = f.generator.utterance_calls.load(Ordering::SeqCst);
        assert!(
            handle_event(
                "CA1",
                SessionEvent::SpeechRecognized("No, that covers everything, thanks.".into()),
                &f.deps,
            )
            .await
        );
        assert_eq!(f.generator.utterance_calls.load(Ordering::SeqCst), before);
        let issued = f.control.issued.lock().unwrap();
        assert!(matches!(
            issued.last().unwrap(),
            CallInstruction::SpeakAndHangup(line) if line == FAREWELL
        ));
    }

    #[tokio::test]
    async fn duplicate_call_ended_scores_and_deletes_once() {
        let f = fixture();
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        assert!(handle_event("CA1", SessionEvent::CallEnded, &f.deps).await);
        assert!(handle_event("CA1", SessionEvent::CallEnded, &f.deps).await);
        assert_eq!(f.generator.score_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.sink.persisted.lock().unwrap().len(), 1);
        assert!(f.deps.store.get("CA1").is_none());
    }

    #[tokio::test]
    async fn scoring_exhaustion_dead_letters_the_transcript() {
        let f = fixture_with(MockGenerator {
            fail_scoring: true,
            ..Default::default()
        });
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await;
        assert!(handle_event("CA1", SessionEvent::CallEnded, &f.deps).await);
        assert_eq!(f.generator.score_calls.load(Ordering::SeqCst), SCORING_ATTEMPTS);
        assert!(f.sink.persisted.lock().unwrap().is_empty());
        let dead = f.sink.dead_lettered.lock().unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].score.is_none());
        assert!(!dead[0].transcript.is_empty());
    }

    #[tokio::test]
    async fn generation_failure_ends_with_apology() {
        let f = fixture_with(MockGenerator {
            fail_utterances: true,
            ..Default::default()
        });
        handle_event("CA1", SessionEvent::CallStarted, &f.deps).await;
        assert!(
            handle_event("CA1", SessionEvent::SpeechRecognized("intro".into()), &f.deps).await
        );
        let issued = f.control.issued.lock().unwrap();
        assert!(matches!(
            issued.last().unwrap(),
            CallInstruction::SpeakAndHangup(line) if line == APOLOGY
        ));
        assert!(f.deps.store.get("CA1").is_none());
    }

    #[tokio::test]
    async fn call_ended_with_empty_history_skips_scoring() {
        let f = fixture();
        assert!(handle_event("CA1", SessionEvent::CallEnded, &f.deps).await);
        assert_eq!(f.generator.score_calls.load(Ordering::SeqCst), 0);
        // The record is still emitted so the sink sees every call.
        assert_eq!(f.sink.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_interview_history_accounting() {
        let f = fixture();
        let deps = InterviewDeps {
            store: f.deps.store.clone(),
            generator: f.generator.clone(),
            control: f.control.clone(),
            sink: f.sink.clone(),
        };
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_session("CA1".to_string(), rx, deps));
        tx.send(SessionEvent::CallStarted).await.unwrap();
        tx.send(SessionEvent::SpeechRecognized("I build services.".into()))
            .await
            .unwrap();
        tx.send(SessionEvent::SpeechRecognized("Answer one.".into()))
            .await
            .unwrap();
        tx.send(SessionEvent::SpeechRecognized("Answer two.".into()))
            .await
            .unwrap();
        tx.send(SessionEvent::SpeechRecognized("No questions, thanks.".into()))
            .await
            .unwrap();
        handle.await.unwrap();

        let persisted = f.sink.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        // Four accepted candidate utterances plus four generated
        // interviewer lines (q1, q2, conclusion, farewell).
        assert_eq!(persisted[0].transcript.len(), 8);
        assert!(persisted[0].score.is_some());
        assert!(f.deps.store.get("CA1").is_none());
    }
}
