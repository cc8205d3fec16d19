//! Voice capture and playback around the conversation loop.
//!
//! Speech is an external capability: the engine behind [`SpeechEngine`] does
//! the actual recognition and synthesis, while [`VoiceIo`] owns the capture
//! state machine and delivers typed transcripts over a channel instead of
//! nested callbacks.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const CAPTURE_LOCALE: &str = "en-US";
const PLAYBACK_RATE: f32 = 1.0;
const PLAYBACK_PITCH: f32 = 1.0;

/// A recognized utterance, typed at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub locale: String,
    pub high_quality: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Inactive,
    Capturing,
}

/// Terminal event of one capture session. Constructed by engine
/// implementations, consumed by the adapter.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recognized(Transcript),
    /// Capture ended naturally without a recognized utterance.
    Ended,
    Failed(String),
}

/// Capability seam for the platform speech services. Capture is
/// single-utterance and non-continuous: the engine pushes exactly one
/// terminal [`CaptureOutcome`] per started session into the channel it is
/// handed.
pub trait SpeechEngine: Send + Sync {
    fn start_capture(&self, locale: &str, events: mpsc::Sender<CaptureOutcome>);
    fn stop_capture(&self);
    fn voices(&self) -> Vec<Voice>;
    fn speak(&self, text: &str, voice: Option<&Voice>, rate: f32, pitch: f32);
    fn cancel_playback(&self);
}

/// Engine used when no platform speech service is wired up: capture ends
/// immediately and playback is skipped.
pub struct DisabledSpeech;

impl SpeechEngine for DisabledSpeech {
    fn start_capture(&self, _locale: &str, events: mpsc::Sender<CaptureOutcome>) {
        let _ = events.try_send(CaptureOutcome::Ended);
    }

    fn stop_capture(&self) {}

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn speak(&self, text: &str, _voice: Option<&Voice>, _rate: f32, _pitch: f32) {
        debug!("Speech playback unavailable; skipping {} char(s)", text.len());
    }

    fn cancel_playback(&self) {}
}

/// Picks the playback voice: the first one that is either tagged
/// higher-quality or matches the capture locale's language; `None` falls
/// back to the engine default.
pub fn select_voice(voices: &[Voice], locale: &str) -> Option<Voice> {
    let lang = locale.split('-').next().unwrap_or(locale);
    voices
        .iter()
        .find(|v| v.high_quality || v.locale.starts_with(lang))
        .cloned()
}

struct VoiceInner {
    engine: Box<dyn SpeechEngine>,
    state: Mutex<CaptureState>,
    transcripts: mpsc::Sender<Transcript>,
}

/// Adapter between the speech engine and the orchestrator. Cloneable handle;
/// one capture session at a time.
#[derive(Clone)]
pub struct VoiceIo {
    inner: Arc<VoiceInner>,
}

impl VoiceIo {
    pub fn new(engine: Box<dyn SpeechEngine>) -> (Self, mpsc::Receiver<Transcript>) {
        let (transcripts, rx) = mpsc::channel(8);
        let inner = Arc::new(VoiceInner {
            engine,
            state: Mutex::new(CaptureState::Inactive),
            transcripts,
        });
        (Self { inner }, rx)
    }

    pub fn capture_state(&self) -> CaptureState {
        *self.inner.state.lock().unwrap()
    }

    /// Starts a single-utterance capture. Returns `false` when a session is
    /// already active. The first recognized transcript is forwarded on the
    /// transcript channel and the session deactivates; an error or a natural
    /// end deactivates without forwarding.
    pub fn start_capture(&self) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == CaptureState::Capturing {
                return false;
            }
            *state = CaptureState::Capturing;
        }

        let (events_tx, mut events_rx) = mpsc::channel(1);
        self.inner.engine.start_capture(CAPTURE_LOCALE, events_tx);

        let io = self.clone();
        tokio::spawn(async move {
            let outcome = events_rx.recv().await;
            *io.inner.state.lock().unwrap() = CaptureState::Inactive;
            match outcome {
                Some(CaptureOutcome::Recognized(transcript)) => {
                    debug!(
                        "Recognized {} char(s) in {}",
                        transcript.text.len(),
                        transcript.locale
                    );
                    if io.inner.transcripts.send(transcript).await.is_err() {
                        warn!("Transcript receiver dropped; discarding utterance");
                    }
                }
                Some(CaptureOutcome::Failed(reason)) => {
                    warn!("Speech capture failed: {reason}");
                }
                Some(CaptureOutcome::Ended) | None => {
                    debug!("Speech capture ended without a result");
                }
            }
        });
        true
    }

    /// Asks the engine to end the active capture session early.
    pub fn stop_capture(&self) {
        self.inner.engine.stop_capture();
    }

    /// Fire-and-forget playback: cancels anything in progress, then speaks
    /// at neutral rate and pitch with the preferred voice.
    pub fn speak(&self, text: &str) {
        self.inner.engine.cancel_playback();
        let voices = self.inner.engine.voices();
        let voice = select_voice(&voices, CAPTURE_LOCALE);
        if let Some(voice) = &voice {
            debug!("Speaking with voice {}", voice.name);
        }
        self.inner.engine.speak(text, voice.as_ref(), PLAYBACK_RATE, PLAYBACK_PITCH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedState {
        outcomes: VecDeque<CaptureOutcome>,
        held_sessions: Vec<mpsc::Sender<CaptureOutcome>>,
        spoken: Vec<(String, Option<String>, f32, f32)>,
        cancelled: usize,
    }

    /// Engine double: delivers queued outcomes on start, or holds the
    /// session open until `stop_capture` when nothing is queued.
    #[derive(Clone, Default)]
    struct ScriptedEngine {
        state: Arc<Mutex<ScriptedState>>,
        voices: Arc<Vec<Voice>>,
    }

    impl ScriptedEngine {
        fn with_outcome(outcome: CaptureOutcome) -> Self {
            let engine = Self::default();
            engine.state.lock().unwrap().outcomes.push_back(outcome);
            engine
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn start_capture(&self, _locale: &str, events: mpsc::Sender<CaptureOutcome>) {
            let mut state = self.state.lock().unwrap();
            match state.outcomes.pop_front() {
                Some(outcome) => {
                    let _ = events.try_send(outcome);
                }
                None => state.held_sessions.push(events),
            }
        }

        fn stop_capture(&self) {
            let mut state = self.state.lock().unwrap();
            for session in state.held_sessions.drain(..) {
                let _ = session.try_send(CaptureOutcome::Ended);
            }
        }

        fn voices(&self) -> Vec<Voice> {
            self.voices.as_ref().clone()
        }

        fn speak(&self, text: &str, voice: Option<&Voice>, rate: f32, pitch: f32) {
            self.state.lock().unwrap().spoken.push((
                text.to_string(),
                voice.map(|v| v.name.clone()),
                rate,
                pitch,
            ));
        }

        fn cancel_playback(&self) {
            self.state.lock().unwrap().cancelled += 1;
        }
    }

    fn transcript(text: &str) -> Transcript {
        Transcript { text: text.to_string(), locale: CAPTURE_LOCALE.to_string() }
    }

    #[tokio::test]
    async fn capture_forwards_transcript_then_deactivates() {
        let engine = ScriptedEngine::with_outcome(CaptureOutcome::Recognized(transcript("draw a cat")));
        let (voice, mut rx) = VoiceIo::new(Box::new(engine));

        assert!(voice.start_capture());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.text, "draw a cat");
        assert_eq!(voice.capture_state(), CaptureState::Inactive);
    }

    #[tokio::test]
    async fn only_one_capture_session_at_a_time() {
        let engine = ScriptedEngine::default();
        let (voice, mut rx) = VoiceIo::new(Box::new(engine));

        assert!(voice.start_capture());
        assert_eq!(voice.capture_state(), CaptureState::Capturing);
        assert!(!voice.start_capture());

        voice.stop_capture();
        while voice.capture_state() == CaptureState::Capturing {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_capture_forwards_nothing() {
        let engine = ScriptedEngine::with_outcome(CaptureOutcome::Failed("mic missing".into()));
        let (voice, mut rx) = VoiceIo::new(Box::new(engine));

        assert!(voice.start_capture());
        while voice.capture_state() == CaptureState::Capturing {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());
        // Capture can start again after a failure.
        assert!(voice.start_capture());
    }

    #[tokio::test]
    async fn speak_cancels_then_uses_preferred_voice_at_neutral_settings() {
        let engine = ScriptedEngine {
            voices: Arc::new(vec![
                Voice { name: "de".into(), locale: "de-DE".into(), high_quality: false },
                Voice { name: "premium-hi".into(), locale: "hi-IN".into(), high_quality: true },
            ]),
            ..ScriptedEngine::default()
        };
        let state = engine.state.clone();
        let (voice, _rx) = VoiceIo::new(Box::new(engine));

        voice.speak("Hi there!");

        let state = state.lock().unwrap();
        assert_eq!(state.cancelled, 1);
        assert_eq!(
            state.spoken,
            vec![("Hi there!".to_string(), Some("premium-hi".to_string()), 1.0, 1.0)]
        );
    }

    #[test]
    fn voice_selection_prefers_quality_or_locale_in_listed_order() {
        let voices = vec![
            Voice { name: "de".into(), locale: "de-DE".into(), high_quality: false },
            Voice { name: "uk-english".into(), locale: "en-GB".into(), high_quality: false },
            Voice { name: "premium-hi".into(), locale: "hi-IN".into(), high_quality: true },
        ];
        assert_eq!(select_voice(&voices, "en-US").unwrap().name, "uk-english");

        let no_match = vec![Voice { name: "de".into(), locale: "de-DE".into(), high_quality: false }];
        assert_eq!(select_voice(&no_match, "en-US"), None);
        assert_eq!(select_voice(&[], "en-US"), None);
    }
}
