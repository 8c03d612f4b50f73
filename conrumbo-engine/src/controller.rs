//
// The speech interaction controller: owns the listen -> understand -> speak
// loop and every transition of `AssistantState`.
//
// Concurrency model: all mutable state sits in one `Inner` behind an async
// mutex. Each logical turn gets a fresh turn id and cancellation token; any
// code finishing an await re-checks the turn id before touching state, so a
// superseded turn can only ever no-op.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conrumbo_core::messages::{
    MSG_INSTRUCTION_READY, MSG_MIC_STOPPED, MSG_NO_AUDIO, MSG_PREPARING_MIC,
    MSG_PROCESSING, MSG_PROTOCOL_COMPLETE, MSG_RECORDING, MSG_RESTART_PROMPT,
    MSG_RETRY_PROMPT_SPOKEN, MSG_SILENCE_RETRY, MSG_SPEECH_FAILED, MSG_SR_UNSUPPORTED,
    MSG_STT_FAILED, MSG_TRANSCRIBING, error_status, user_facing_audio_error,
};
use conrumbo_core::state::AssistantState;
use conrumbo_core::text::{contains_call_keyword, normalize_utterance};
use conrumbo_core::types::GuideStep;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::events::ControllerEvent;
use crate::traits::{GuideService, MicSource, Speaker, SpeechRecognizer};

/// Automatic re-captures after an empty transcription before the user is
/// asked to restart manually.
pub const MAX_SILENCE_RETRIES: u32 = 2;

/// Rendered steps kept for display; oldest entries drop off first.
pub const STEP_LOG_CAPACITY: usize = 8;

pub const CALL_HIGHLIGHT_DURATION: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ControllerOptions {
    pub language: String,
    pub capture_window: Duration,
    /// Spoken once after the microphone is acquired, before the first
    /// capture. `None` skips the onboarding line.
    pub greeting: Option<String>,
    pub call_highlight: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            language: "es-ES".into(),
            capture_window: Duration::from_millis(5_000),
            greeting: Some(conrumbo_core::messages::MSG_GREETING.to_string()),
            call_highlight: CALL_HIGHLIGHT_DURATION,
        }
    }
}

pub struct ControllerDeps {
    pub mic: Arc<dyn MicSource>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub speaker: Arc<dyn Speaker>,
    pub guide: Arc<dyn GuideService>,
}

struct Inner {
    state: AssistantState,
    turn_id: u64,
    cancel: CancellationToken,
    loop_task: Option<tokio::task::JoinHandle<()>>,
    pending_task: Option<tokio::task::JoinHandle<()>>,
    last_final_transcript: String,
    silence_retries: u32,
    steps: Vec<GuideStep>,
    highlight_until: Option<Instant>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: AssistantState::Idle,
            turn_id: 0,
            cancel: CancellationToken::new(),
            loop_task: None,
            pending_task: None,
            last_final_transcript: String::new(),
            silence_retries: 0,
            steps: Vec::new(),
            highlight_until: None,
        }
    }
}

/// Outcome of processing one utterance.
enum Continuation {
    /// Backend wants another utterance; re-arm capture.
    Listen,
    /// The interaction is over; return to idle.
    Finish,
    /// A newer turn took over; leave state alone.
    Superseded,
}

#[derive(Clone)]
pub struct InteractionController {
    inner: Arc<Mutex<Inner>>,
    deps: Arc<ControllerDeps>,
    opts: Arc<ControllerOptions>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl InteractionController {
    pub fn new(
        deps: ControllerDeps,
        opts: ControllerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(Mutex::new(Inner::default())),
                deps: Arc::new(deps),
                opts: Arc::new(opts),
                events,
            },
            events_rx,
        )
    }

    pub async fn state(&self) -> AssistantState {
        self.inner.lock().await.state
    }

    pub async fn steps(&self) -> Vec<GuideStep> {
        self.inner.lock().await.steps.clone()
    }

    pub async fn call_highlight_active(&self) -> bool {
        let mut inner = self.inner.lock().await;
        prune_highlight(&mut inner);
        inner.highlight_until.is_some()
    }

    /// Begin a hands-free session. A no-op while one is already active.
    pub async fn start(&self) {
        let (turn_id, cancel) = {
            let mut inner = self.inner.lock().await;
            if inner.state.is_active() {
                log::debug!("start ignored: session already active");
                return;
            }
            inner.turn_id = inner.turn_id.wrapping_add(1);
            inner.cancel = CancellationToken::new();
            inner.silence_retries = 0;
            inner.last_final_transcript.clear();
            inner.state = AssistantState::RequestingPermission;
            (inner.turn_id, inner.cancel.clone())
        };
        self.emit(ControllerEvent::StateChanged {
            from: AssistantState::Idle,
            to: AssistantState::RequestingPermission,
        });

        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller.run_turn(turn_id, cancel).await;
        });

        let mut inner = self.inner.lock().await;
        if inner.turn_id == turn_id {
            inner.loop_task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Stop everything and return to idle. Reachable from every state; the
    /// state flips before any cleanup runs so callers observe idle
    /// immediately.
    pub async fn stop(&self) {
        let (loop_task, pending_task, from) = {
            let mut inner = self.inner.lock().await;
            inner.cancel.cancel();
            inner.turn_id = inner.turn_id.wrapping_add(1);
            let from = inner.state;
            inner.state = AssistantState::Idle;
            (inner.loop_task.take(), inner.pending_task.take(), from)
        };

        if let Some(task) = loop_task {
            task.abort();
        }
        if let Some(task) = pending_task {
            task.abort();
        }
        self.deps.speaker.stop();
        self.deps.mic.release().await;

        if from.is_active() {
            self.emit(ControllerEvent::StateChanged {
                from,
                to: AssistantState::Idle,
            });
            self.emit_status(MSG_MIC_STOPPED);
        }
    }

    /// Feed an utterance directly, bypassing capture. The latest utterance
    /// always wins: whatever was in flight gets cancelled first.
    pub async fn submit_utterance(&self, text: &str) {
        let text = normalize_utterance(text);
        if text.is_empty() {
            return;
        }

        let (turn_id, cancel, loop_task, pending_task) = {
            let mut inner = self.inner.lock().await;
            inner.cancel.cancel();
            inner.turn_id = inner.turn_id.wrapping_add(1);
            inner.cancel = CancellationToken::new();
            (
                inner.turn_id,
                inner.cancel.clone(),
                inner.loop_task.take(),
                inner.pending_task.take(),
            )
        };
        if let Some(task) = loop_task {
            task.abort();
        }
        if let Some(task) = pending_task {
            task.abort();
        }
        self.deps.speaker.stop();

        self.emit(ControllerEvent::FinalTranscript(text.clone()));
        if contains_call_keyword(&text) {
            self.activate_call_highlight().await;
        }

        let controller = self.clone();
        let cancel_for_task = cancel.clone();
        let task = tokio::spawn(async move {
            match controller
                .process_utterance(turn_id, &cancel_for_task, &text)
                .await
            {
                Continuation::Listen => {
                    controller.run_capture_loop(turn_id, cancel_for_task).await;
                }
                Continuation::Finish => controller.finish_turn(turn_id).await,
                Continuation::Superseded => {}
            }
        });

        let mut inner = self.inner.lock().await;
        if inner.turn_id == turn_id {
            inner.pending_task = Some(task);
        } else {
            task.abort();
        }
    }

    async fn run_turn(&self, turn_id: u64, cancel: CancellationToken) {
        self.emit_status(MSG_PREPARING_MIC);
        let acquired = tokio::select! {
            _ = cancel.cancelled() => return,
            res = self.deps.mic.acquire() => res,
        };
        if let Err(e) = acquired {
            log::warn!("microphone acquisition failed: {e:#}");
            self.emit_status(user_facing_audio_error(&format!("{e:#}")));
            self.finish_turn(turn_id).await;
            return;
        }

        // Wake the voice output while the mic settles; best effort.
        if let Err(e) = self.deps.speaker.warm_up().await {
            log::warn!("speaker warm up failed: {e:#}");
        }

        if let Some(greeting) = self.opts.greeting.clone() {
            if !self.set_state(turn_id, AssistantState::Speaking).await {
                return;
            }
            let spoken = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.deps.speaker.speak(&greeting, &self.opts.language) => res,
            };
            if let Err(e) = spoken {
                log::warn!("greeting playback failed: {e:#}");
            }
        }

        self.run_capture_loop(turn_id, cancel).await;
    }

    async fn run_capture_loop(&self, turn_id: u64, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            // Capture one window.
            if !self.set_state(turn_id, AssistantState::Capturing).await {
                return;
            }
            self.emit_status(MSG_RECORDING);
            let audio = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.deps.mic.capture(self.opts.capture_window) => match res {
                    Ok(audio) => audio,
                    Err(e) => {
                        log::warn!("capture failed: {e:#}");
                        self.emit_status(user_facing_audio_error(&format!("{e:#}")));
                        self.finish_turn(turn_id).await;
                        return;
                    }
                },
            };
            if audio.samples.is_empty() {
                self.emit_status(MSG_NO_AUDIO);
                self.finish_turn(turn_id).await;
                return;
            }

            // Transcribe it.
            if !self.set_state(turn_id, AssistantState::Transcribing).await {
                return;
            }
            self.emit_status(MSG_TRANSCRIBING);
            let t0 = Instant::now();
            let transcript = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.deps.recognizer.transcribe(&audio, &self.opts.language) => match res {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!("transcription failed: {e:#}");
                        let raw = format!("{e:#}");
                        if raw.contains("unsupported recognizer")
                            || raw.contains("recognizer not available")
                        {
                            self.emit_status(MSG_SR_UNSUPPORTED);
                        } else {
                            self.emit_status(MSG_STT_FAILED);
                        }
                        self.finish_turn(turn_id).await;
                        return;
                    }
                },
            };
            log::debug!(
                "transcription finished in {}ms via {}",
                ms(t0.elapsed()),
                transcript.recognizer
            );

            let text = normalize_utterance(&transcript.text);

            // Silence: retry capture a bounded number of times, then hand
            // control back to the user.
            if text.is_empty() {
                let give_up = {
                    let mut inner = self.inner.lock().await;
                    if inner.turn_id != turn_id {
                        return;
                    }
                    if inner.silence_retries < MAX_SILENCE_RETRIES {
                        inner.silence_retries += 1;
                        false
                    } else {
                        true
                    }
                };
                if !give_up {
                    self.emit_status(MSG_SILENCE_RETRY);
                    continue;
                }

                if self.set_state(turn_id, AssistantState::Speaking).await {
                    let spoken = tokio::select! {
                        _ = cancel.cancelled() => return,
                        res = self.deps.speaker.speak(MSG_RETRY_PROMPT_SPOKEN, &self.opts.language) => res,
                    };
                    if let Err(e) = spoken {
                        log::warn!("retry prompt playback failed: {e:#}");
                    }
                }
                self.emit_status(MSG_RESTART_PROMPT);
                self.finish_turn(turn_id).await;
                return;
            }

            // An utterance identical to the previous final one is recognizer
            // echo; listen again without consuming a retry.
            {
                let mut inner = self.inner.lock().await;
                if inner.turn_id != turn_id {
                    return;
                }
                inner.silence_retries = 0;
                if inner.last_final_transcript == text {
                    log::debug!("duplicate final transcript suppressed");
                    continue;
                }
                inner.last_final_transcript = text.clone();
            }

            self.emit(ControllerEvent::FinalTranscript(text.clone()));
            if contains_call_keyword(&text) {
                self.activate_call_highlight().await;
            }

            match self.process_utterance(turn_id, &cancel, &text).await {
                Continuation::Listen => continue,
                Continuation::Finish => {
                    self.finish_turn(turn_id).await;
                    return;
                }
                Continuation::Superseded => return,
            }
        }
    }

    /// Ask the backend for the next instruction, render it, speak it, and
    /// decide whether to keep listening.
    async fn process_utterance(
        &self,
        turn_id: u64,
        cancel: &CancellationToken,
        text: &str,
    ) -> Continuation {
        if !self.set_state(turn_id, AssistantState::Understanding).await {
            return Continuation::Superseded;
        }
        self.emit_status(MSG_PROCESSING);
        // Anything still being spoken answers an older utterance.
        self.deps.speaker.stop();

        let t0 = Instant::now();
        let step = tokio::select! {
            _ = cancel.cancelled() => return Continuation::Superseded,
            res = self.deps.guide.guide(text, &self.opts.language) => match res {
                Ok(step) => step,
                Err(e) => {
                    log::warn!("guide request failed: {e:#}");
                    self.emit_status(error_status(&e.to_string()));
                    return Continuation::Finish;
                }
            },
        };
        log::debug!("guide answered in {}ms", ms(t0.elapsed()));

        {
            let mut inner = self.inner.lock().await;
            if inner.turn_id != turn_id {
                return Continuation::Superseded;
            }
            inner.steps.push(step.clone());
            if inner.steps.len() > STEP_LOG_CAPACITY {
                let overflow = inner.steps.len() - STEP_LOG_CAPACITY;
                inner.steps.drain(..overflow);
            }
        }
        self.emit(ControllerEvent::StepReady(step.clone()));

        if !step.speech.is_empty() {
            if !self.set_state(turn_id, AssistantState::Speaking).await {
                return Continuation::Superseded;
            }
            let spoken = tokio::select! {
                _ = cancel.cancelled() => return Continuation::Superseded,
                res = self.deps.speaker.speak(&step.speech, &self.opts.language) => res,
            };
            if let Err(e) = spoken {
                log::warn!("instruction playback failed: {e:#}");
                self.emit_status(MSG_SPEECH_FAILED);
            }
        }

        if step.continue_listening {
            self.emit_status(MSG_INSTRUCTION_READY);
            Continuation::Listen
        } else {
            self.emit_status(MSG_PROTOCOL_COMPLETE);
            self.emit(ControllerEvent::LoopEnded);
            Continuation::Finish
        }
    }

    /// Transition state for the given turn; `false` means the turn is stale
    /// and its task should unwind without side effects.
    async fn set_state(&self, turn_id: u64, to: AssistantState) -> bool {
        let from = {
            let mut inner = self.inner.lock().await;
            if inner.turn_id != turn_id {
                return false;
            }
            let from = inner.state;
            inner.state = to;
            from
        };
        if from != to {
            self.emit(ControllerEvent::StateChanged { from, to });
        }
        true
    }

    async fn finish_turn(&self, turn_id: u64) {
        let from = {
            let mut inner = self.inner.lock().await;
            if inner.turn_id != turn_id {
                return;
            }
            let from = inner.state;
            inner.state = AssistantState::Idle;
            from
        };
        if from.is_active() {
            self.emit(ControllerEvent::StateChanged {
                from,
                to: AssistantState::Idle,
            });
        }
        self.deps.mic.release().await;
    }

    async fn activate_call_highlight(&self) {
        let duration = self.opts.call_highlight;
        {
            let mut inner = self.inner.lock().await;
            inner.highlight_until = Some(Instant::now() + duration);
        }
        self.emit(ControllerEvent::CallHighlight(duration));
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, text: impl Into<String>) {
        self.emit(ControllerEvent::Status(text.into()));
    }
}

fn prune_highlight(inner: &mut Inner) {
    if let Some(until) = inner.highlight_until {
        if Instant::now() >= until {
            inner.highlight_until = None;
        }
    }
}

fn ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{AudioInput, Transcript};
    use anyhow::anyhow;
    use conrumbo_core::messages::{MSG_SILENCE_RETRY, MSG_STT_FAILED};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn audio() -> AudioInput {
        AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.1; 160],
        }
    }

    fn step(number: u32, speech: &str, continue_listening: bool) -> GuideStep {
        GuideStep {
            number: Some(number),
            title: None,
            text: format!("instruccion {number}"),
            speech: speech.to_string(),
            total_steps: None,
            continue_listening,
        }
    }

    struct FakeMic {
        captures: StdMutex<VecDeque<anyhow::Result<AudioInput>>>,
        acquire_error: StdMutex<Option<anyhow::Error>>,
        capture_delay: StdMutex<Duration>,
        speaking: Arc<AtomicBool>,
        overlap: Arc<AtomicBool>,
        released: AtomicBool,
        capture_calls: AtomicUsize,
    }

    impl FakeMic {
        fn new(speaking: &Arc<AtomicBool>, overlap: &Arc<AtomicBool>) -> Arc<Self> {
            Arc::new(Self {
                captures: StdMutex::new(VecDeque::new()),
                acquire_error: StdMutex::new(None),
                capture_delay: StdMutex::new(Duration::ZERO),
                speaking: speaking.clone(),
                overlap: overlap.clone(),
                released: AtomicBool::new(false),
                capture_calls: AtomicUsize::new(0),
            })
        }

        fn script_captures(&self, n: usize) {
            let mut captures = self.captures.lock().unwrap();
            for _ in 0..n {
                captures.push_back(Ok(audio()));
            }
        }

        fn script_capture(&self, result: anyhow::Result<AudioInput>) {
            self.captures.lock().unwrap().push_back(result);
        }

        fn fail_acquire(&self, message: &str) {
            *self.acquire_error.lock().unwrap() = Some(anyhow!("{message}"));
        }

        fn set_capture_delay(&self, delay: Duration) {
            *self.capture_delay.lock().unwrap() = delay;
        }
    }

    #[async_trait::async_trait]
    impl MicSource for FakeMic {
        async fn acquire(&self) -> anyhow::Result<()> {
            match self.acquire_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn capture(&self, _window: Duration) -> anyhow::Result<AudioInput> {
            if self.speaking.load(Ordering::SeqCst) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            self.capture_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.capture_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.captures
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("capture script exhausted")))
        }

        async fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct FakeRecognizer {
        transcripts: StdMutex<VecDeque<anyhow::Result<String>>>,
        calls: AtomicUsize,
    }

    impl FakeRecognizer {
        fn scripted(texts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                transcripts: StdMutex::new(texts.iter().map(|t| Ok(t.to_string())).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn script_text(&self, text: &str) {
            self.transcripts.lock().unwrap().push_back(Ok(text.to_string()));
        }

        fn script_error(&self, message: &str) {
            self.transcripts
                .lock()
                .unwrap()
                .push_back(Err(anyhow!("{message}")));
        }
    }

    #[async_trait::async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        async fn transcribe(
            &self,
            _audio: &AudioInput,
            _language: &str,
        ) -> anyhow::Result<Transcript> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .transcripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("transcript script exhausted")));
            next.map(|text| Transcript {
                text,
                recognizer: "fake".into(),
            })
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct FakeSpeaker {
        spoken: StdMutex<Vec<String>>,
        delay: StdMutex<Duration>,
        fail: AtomicBool,
        speaking: Arc<AtomicBool>,
    }

    impl FakeSpeaker {
        fn new(speaking: &Arc<AtomicBool>) -> Arc<Self> {
            Arc::new(Self {
                spoken: StdMutex::new(Vec::new()),
                delay: StdMutex::new(Duration::ZERO),
                fail: AtomicBool::new(false),
                speaking: speaking.clone(),
            })
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }
    }

    #[async_trait::async_trait]
    impl Speaker for FakeSpeaker {
        async fn speak(&self, text: &str, _language: &str) -> anyhow::Result<()> {
            self.speaking.store(true, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.spoken.lock().unwrap().push(text.to_string());
            self.speaking.store(false, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("playback device lost");
            }
            Ok(())
        }

        fn stop(&self) {
            self.speaking.store(false, Ordering::SeqCst);
        }
    }

    struct FakeGuide {
        steps: StdMutex<VecDeque<anyhow::Result<GuideStep>>>,
        queries: StdMutex<Vec<String>>,
        delay: StdMutex<Duration>,
    }

    impl FakeGuide {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                steps: StdMutex::new(VecDeque::new()),
                queries: StdMutex::new(Vec::new()),
                delay: StdMutex::new(Duration::ZERO),
            })
        }

        fn script(&self, result: anyhow::Result<GuideStep>) {
            self.steps.lock().unwrap().push_back(result);
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }

        fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = delay;
        }
    }

    #[async_trait::async_trait]
    impl GuideService for FakeGuide {
        async fn guide(&self, query: &str, _language: &str) -> anyhow::Result<GuideStep> {
            self.queries.lock().unwrap().push(query.to_string());
            let next = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("guide script exhausted")));
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            next
        }
    }

    struct Rig {
        mic: Arc<FakeMic>,
        recognizer: Arc<FakeRecognizer>,
        speaker: Arc<FakeSpeaker>,
        guide: Arc<FakeGuide>,
        overlap: Arc<AtomicBool>,
    }

    impl Rig {
        /// One good capture per scripted transcript; everything else empty.
        fn new(transcripts: &[&str]) -> Self {
            let speaking = Arc::new(AtomicBool::new(false));
            let overlap = Arc::new(AtomicBool::new(false));
            let mic = FakeMic::new(&speaking, &overlap);
            mic.script_captures(transcripts.len());
            Self {
                mic,
                recognizer: FakeRecognizer::scripted(transcripts),
                speaker: FakeSpeaker::new(&speaking),
                guide: FakeGuide::new(),
                overlap,
            }
        }

        fn build(
            &self,
            opts: ControllerOptions,
        ) -> (
            InteractionController,
            mpsc::UnboundedReceiver<ControllerEvent>,
        ) {
            InteractionController::new(
                ControllerDeps {
                    mic: self.mic.clone(),
                    recognizer: self.recognizer.clone(),
                    speaker: self.speaker.clone(),
                    guide: self.guide.clone(),
                },
                opts,
            )
        }
    }

    fn quiet_opts() -> ControllerOptions {
        ControllerOptions {
            greeting: None,
            ..ControllerOptions::default()
        }
    }

    async fn wait_for_state(controller: &InteractionController, want: AssistantState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if controller.state().await == want {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {want:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait for idle, then a beat so trailing events and cleanup land.
    async fn wait_for_idle(controller: &InteractionController) {
        wait_for_state(controller, AssistantState::Idle).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[ControllerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn steps_ready(events: &[ControllerEvent]) -> Vec<GuideStep> {
        events
            .iter()
            .filter_map(|e| match e {
                ControllerEvent::StepReady(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn completes_loop_and_idles_on_final_step() {
        let rig = Rig::new(&["hay un incendio en la cocina"]);
        rig.guide.script(Ok(step(1, "manten la calma", false)));
        let opts = ControllerOptions {
            greeting: Some("Hola".into()),
            ..ControllerOptions::default()
        };
        let (controller, mut rx) = rig.build(opts);

        controller.start().await;
        wait_for_idle(&controller).await;

        assert_eq!(rig.guide.queries(), vec!["hay un incendio en la cocina"]);
        assert_eq!(rig.speaker.spoken(), vec!["Hola", "manten la calma"]);
        let events = drain_events(&mut rx);
        assert_eq!(steps_ready(&events).len(), 1);
        assert!(events.contains(&ControllerEvent::LoopEnded));
        assert!(statuses(&events).contains(&MSG_PROTOCOL_COMPLETE.to_string()));
        assert!(!rig.overlap.load(Ordering::SeqCst));
        assert!(rig.mic.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn resumes_listening_when_step_asks_for_more() {
        let rig = Rig::new(&["me he cortado", "la herida es profunda"]);
        rig.guide.script(Ok(step(1, "presiona la herida", true)));
        rig.guide.script(Ok(step(2, "busca un panuelo limpio", false)));
        rig.speaker.set_delay(Duration::from_millis(30));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        assert_eq!(
            rig.guide.queries(),
            vec!["me he cortado", "la herida es profunda"]
        );
        let events = drain_events(&mut rx);
        assert_eq!(steps_ready(&events).len(), 2);
        let status = statuses(&events);
        assert!(status.contains(&MSG_INSTRUCTION_READY.to_string()));
        assert!(status.contains(&MSG_PROTOCOL_COMPLETE.to_string()));
        assert!(!rig.overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn two_silent_windows_retry_then_third_prompts_restart() {
        let rig = Rig::new(&["", "", ""]);
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        let status = statuses(&drain_events(&mut rx));
        let retries = status
            .iter()
            .filter(|s| s.as_str() == MSG_SILENCE_RETRY)
            .count();
        assert_eq!(retries, 2);
        assert!(status.contains(&MSG_RESTART_PROMPT.to_string()));
        assert!(
            rig.speaker
                .spoken()
                .contains(&MSG_RETRY_PROMPT_SPOKEN.to_string())
        );
        assert!(rig.guide.queries().is_empty());
        assert_eq!(rig.mic.capture_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn repeated_final_transcript_is_ignored() {
        let rig = Rig::new(&["hola", "hola", "no respira"]);
        rig.guide.script(Ok(step(1, "", true)));
        rig.guide.script(Ok(step(2, "", false)));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        assert_eq!(rig.guide.queries(), vec!["hola", "no respira"]);
        let finals: Vec<_> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ControllerEvent::FinalTranscript(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(finals, vec!["hola", "no respira"]);
    }

    #[tokio::test]
    async fn stop_while_capturing_idles_immediately() {
        let rig = Rig::new(&[]);
        rig.mic.script_captures(1);
        rig.mic.set_capture_delay(Duration::from_secs(1));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_state(&controller, AssistantState::Capturing).await;

        let t0 = Instant::now();
        controller.stop().await;
        assert!(t0.elapsed() < Duration::from_millis(250));
        assert_eq!(controller.state().await, AssistantState::Idle);
        assert!(rig.mic.released.load(Ordering::SeqCst));
        assert!(statuses(&drain_events(&mut rx)).contains(&MSG_MIC_STOPPED.to_string()));
    }

    #[tokio::test]
    async fn newer_utterance_cancels_inflight_request() {
        let rig = Rig::new(&[]);
        rig.guide.script(Ok(step(1, "primera", false)));
        rig.guide.script(Ok(step(2, "segunda", false)));
        rig.guide.set_delay(Duration::from_millis(300));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.submit_utterance("hay humo").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        rig.guide.set_delay(Duration::ZERO);
        controller.submit_utterance("ya no hay humo").await;
        wait_for_idle(&controller).await;

        assert_eq!(rig.guide.queries(), vec!["hay humo", "ya no hay humo"]);
        let steps = steps_ready(&drain_events(&mut rx));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].number, Some(2));
        assert_eq!(rig.speaker.spoken(), vec!["segunda"]);
        assert_eq!(controller.steps().await.len(), 1);
    }

    #[tokio::test]
    async fn call_keyword_highlights_and_expires() {
        let rig = Rig::new(&[]);
        rig.guide.script(Ok(step(1, "", false)));
        let opts = ControllerOptions {
            call_highlight: Duration::from_millis(80),
            ..quiet_opts()
        };
        let (controller, mut rx) = rig.build(opts);

        controller.submit_utterance("hay que llamar a una ambulancia").await;
        assert!(controller.call_highlight_active().await);

        wait_for_idle(&controller).await;
        let events = drain_events(&mut rx);
        assert!(events.contains(&ControllerEvent::CallHighlight(Duration::from_millis(80))));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!controller.call_highlight_active().await);
    }

    #[tokio::test]
    async fn call_highlight_resets_on_retrigger() {
        let rig = Rig::new(&[]);
        rig.guide.script(Ok(step(1, "", false)));
        rig.guide.script(Ok(step(2, "", false)));
        let opts = ControllerOptions {
            call_highlight: Duration::from_millis(200),
            ..quiet_opts()
        };
        let (controller, _rx) = rig.build(opts);

        controller.submit_utterance("avisa a emergencia").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        controller.submit_utterance("llamar ahora mismo").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(
            controller.call_highlight_active().await,
            "re-trigger must restart the window"
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!controller.call_highlight_active().await);
    }

    #[test]
    fn default_highlight_window_is_ten_seconds() {
        assert_eq!(CALL_HIGHLIGHT_DURATION, Duration::from_secs(10));
        assert_eq!(
            ControllerOptions::default().call_highlight,
            CALL_HIGHLIGHT_DURATION
        );
    }

    #[tokio::test]
    async fn step_log_keeps_only_recent_entries() {
        let utterances: Vec<String> = (1..=12).map(|i| format!("frase numero {i}")).collect();
        let refs: Vec<&str> = utterances.iter().map(String::as_str).collect();
        let rig = Rig::new(&refs);
        for i in 1..=12u32 {
            rig.guide.script(Ok(step(i, "", i != 12)));
        }
        let (controller, _rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        let steps = controller.steps().await;
        assert_eq!(steps.len(), STEP_LOG_CAPACITY);
        assert_eq!(steps[0].number, Some(5));
        assert_eq!(steps[7].number, Some(12));
    }

    #[tokio::test]
    async fn start_is_idempotent_while_active() {
        let rig = Rig::new(&[]);
        rig.mic.script_captures(1);
        rig.mic.set_capture_delay(Duration::from_millis(400));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_state(&controller, AssistantState::Capturing).await;
        controller.start().await;
        assert_eq!(controller.state().await, AssistantState::Capturing);

        let requesting = drain_events(&mut rx)
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ControllerEvent::StateChanged {
                        to: AssistantState::RequestingPermission,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(requesting, 1);
        controller.stop().await;
    }

    #[tokio::test]
    async fn empty_capture_surfaces_no_audio_and_idles() {
        let rig = Rig::new(&[]);
        rig.mic.script_capture(Ok(AudioInput {
            sample_rate_hz: 16_000,
            samples: Vec::new(),
        }));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        assert!(statuses(&drain_events(&mut rx)).contains(&MSG_NO_AUDIO.to_string()));
        assert_eq!(rig.recognizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mic_denial_maps_to_permission_guidance() {
        let rig = Rig::new(&[]);
        rig.mic.fail_acquire("Worker(build stream: access denied)");
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        let status = statuses(&drain_events(&mut rx));
        assert!(status.iter().any(|s| s.contains("permisos")), "{status:?}");
    }

    #[tokio::test]
    async fn recognizer_failure_is_not_fatal() {
        let rig = Rig::new(&[]);
        rig.mic.script_captures(2);
        rig.recognizer.script_error("stt request failed: status=500");
        rig.recognizer.script_text("me duele el pecho");
        rig.guide.script(Ok(step(1, "", false)));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;
        assert!(statuses(&drain_events(&mut rx)).contains(&MSG_STT_FAILED.to_string()));

        controller.start().await;
        wait_for_idle(&controller).await;
        assert_eq!(rig.guide.queries(), vec!["me duele el pecho"]);
    }

    #[tokio::test]
    async fn missing_recognizer_has_specific_status() {
        let rig = Rig::new(&[]);
        rig.mic.script_captures(1);
        rig.recognizer.script_error("unsupported recognizer: local");
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        assert!(statuses(&drain_events(&mut rx)).contains(&MSG_SR_UNSUPPORTED.to_string()));
    }

    #[tokio::test]
    async fn guide_failure_surfaces_error_status() {
        let rig = Rig::new(&["no puedo respirar bien"]);
        rig.guide.script(Err(anyhow!("guide failed: status=502")));
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        let status = statuses(&drain_events(&mut rx));
        assert!(status.contains(&"Error: guide failed: status=502".to_string()));
        assert_eq!(controller.state().await, AssistantState::Idle);
    }

    #[tokio::test]
    async fn speech_failure_does_not_break_the_loop() {
        let rig = Rig::new(&["primera frase", "segunda frase"]);
        rig.guide.script(Ok(step(1, "paso uno", true)));
        rig.guide.script(Ok(step(2, "paso dos", false)));
        rig.speaker.fail.store(true, Ordering::SeqCst);
        let (controller, mut rx) = rig.build(quiet_opts());

        controller.start().await;
        wait_for_idle(&controller).await;

        let status = statuses(&drain_events(&mut rx));
        assert!(status.contains(&MSG_SPEECH_FAILED.to_string()));
        assert!(status.contains(&MSG_PROTOCOL_COMPLETE.to_string()));
        assert_eq!(rig.guide.queries().len(), 2);
    }
}
