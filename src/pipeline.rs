//! Number → speech → decode → playback, with every collaborator injected.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::{PlaybackError, PlaybackHandle};
use crate::codec::{self, DecodeError, DecodedAudioBuffer, PcmFormat};
use crate::config::Config;
use crate::speech::{ApiKey, SpeechError, SpeechGenerator};

const NUMBER_PLACEHOLDER: &str = "{number}";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

impl PipelineError {
    /// True when the user should supply a different API key.
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, PipelineError::Speech(e) if e.is_credential_problem())
    }
}

/// What was played for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Spoken {
    pub phrase: String,
    pub frame_count: usize,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

/// One speaking session: credential, wire format and output are fixed for
/// its lifetime.
pub struct SpeakerSession {
    generator: Arc<dyn SpeechGenerator>,
    key: ApiKey,
    format: PcmFormat,
    phrase_template: String,
    playback: PlaybackHandle,
}

impl SpeakerSession {
    pub fn new(
        generator: Arc<dyn SpeechGenerator>,
        key: ApiKey,
        format: PcmFormat,
        phrase_template: impl Into<String>,
        playback: PlaybackHandle,
    ) -> Self {
        Self {
            generator,
            key,
            format,
            phrase_template: phrase_template.into(),
            playback,
        }
    }

    pub fn from_config(
        config: &Config,
        generator: Arc<dyn SpeechGenerator>,
        key: ApiKey,
        playback: PlaybackHandle,
    ) -> Self {
        Self::new(
            generator,
            key,
            PcmFormat::new(config.sample_rate, config.channels),
            config.phrase_template,
            playback,
        )
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Text sent to the service for `number`.
    pub fn phrase_for(&self, number: &str) -> String {
        if self.phrase_template.contains(NUMBER_PLACEHOLDER) {
            self.phrase_template.replace(NUMBER_PLACEHOLDER, number)
        } else {
            format!("{} {}", self.phrase_template, number)
        }
    }

    /// Fetch and decode speech for `number` without playing it.
    pub async fn synthesize(&self, number: &str) -> Result<DecodedAudioBuffer, PipelineError> {
        let phrase = self.phrase_for(number);
        log::info!("Synthesizing: {}", phrase);

        let encoded = self.generator.generate(&phrase, &self.key).await?;
        let buffer = codec::decode_audio(&encoded, self.format)?;

        log::info!(
            "Decoded {} frames @ {} Hz, {} ch",
            buffer.frame_count(),
            buffer.sample_rate(),
            buffer.channel_count()
        );
        Ok(buffer)
    }

    /// Synthesize `number` and wait for playback to finish.
    pub async fn speak(&self, number: &str) -> Result<Spoken, PipelineError> {
        let buffer = self.synthesize(number).await?;
        let spoken = Spoken {
            phrase: self.phrase_for(number),
            frame_count: buffer.frame_count(),
            sample_rate: buffer.sample_rate(),
            duration_secs: buffer.duration_secs(),
        };
        self.playback.play(buffer).await?;
        Ok(spoken)
    }

    /// Like [`speak`](Self::speak), but gives up as soon as `cancel` completes.
    ///
    /// Returns `None` when cancelled; the in-flight request is dropped.
    pub async fn speak_until<C>(&self, number: &str, cancel: C) -> Option<Result<Spoken, PipelineError>>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            result = self.speak(number) => Some(result),
            _ = cancel => {
                log::info!("Request for {} cancelled", number);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSystem, PlaybackDriver};
    use async_trait::async_trait;

    struct Fixed(Result<&'static str, fn() -> SpeechError>);

    #[async_trait]
    impl SpeechGenerator for Fixed {
        async fn generate(&self, _text: &str, _key: &ApiKey) -> Result<String, SpeechError> {
            match &self.0 {
                Ok(audio) => Ok(audio.to_string()),
                Err(make) => Err(make()),
            }
        }
    }

    /// Never answers, like a service that hangs.
    struct Stalled;

    #[async_trait]
    impl SpeechGenerator for Stalled {
        async fn generate(&self, _text: &str, _key: &ApiKey) -> Result<String, SpeechError> {
            std::future::pending().await
        }
    }

    struct Discard;

    impl PlaybackDriver for Discard {
        fn render(&mut self, _buffer: &DecodedAudioBuffer) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn build_session(generator: impl SpeechGenerator + 'static, template: &str) -> (AudioSystem, SpeakerSession) {
        let system = AudioSystem::start_with(|| Ok(Box::new(Discard) as Box<dyn PlaybackDriver>)).unwrap();
        let session = SpeakerSession::new(
            Arc::new(generator),
            ApiKey::new("test"),
            PcmFormat::new(24000, 1),
            template,
            system.handle().unwrap(),
        );
        (system, session)
    }

    #[test]
    fn test_phrase_template() {
        let (_system, session) = build_session(Fixed(Ok("")), "Comanda numarul {number}");
        assert_eq!(session.phrase_for("42"), "Comanda numarul 42");

        let (_system, session) = build_session(Fixed(Ok("")), "Number");
        assert_eq!(session.phrase_for("7"), "Number 7");
    }

    #[tokio::test]
    async fn test_speak_reports_clip() {
        let (_system, session) = build_session(Fixed(Ok("AAB/AA==")), "Comanda numarul {number}");
        let spoken = session.speak("12").await.unwrap();
        assert_eq!(spoken.phrase, "Comanda numarul 12");
        assert_eq!(spoken.frame_count, 2);
        assert_eq!(spoken.sample_rate, 24000);
    }

    #[tokio::test]
    async fn test_credential_errors_are_distinguishable() {
        let (_system, session) = build_session(
            Fixed(Err(|| SpeechError::InvalidCredential("API key not valid".into()))),
            "{number}",
        );
        let err = session.speak("1").await.unwrap_err();
        assert!(err.is_credential_problem());

        let (_system, session) = build_session(Fixed(Err(|| SpeechError::NoAudio)), "{number}");
        let err = session.speak("1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Speech(SpeechError::NoAudio)));
        assert!(!err.is_credential_problem());
    }

    #[tokio::test]
    async fn test_malformed_audio_surfaces_decode_error() {
        let (_system, session) = build_session(Fixed(Ok("@@@@")), "{number}");
        let err = session.synthesize("1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(DecodeError::MalformedBase64(_))));
    }

    #[tokio::test]
    async fn test_speak_until_cancels_hung_request() {
        let (_system, session) = build_session(Stalled, "{number}");
        let cancel = tokio::time::sleep(std::time::Duration::from_millis(20));
        assert!(session.speak_until("3", cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_speak_until_finishes_without_cancel() {
        let (_system, session) = build_session(Fixed(Ok("AAB/AA==")), "{number}");
        let spoken = session
            .speak_until("4", std::future::pending())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spoken.frame_count, 2);
    }
}
