//! Narration: speech synthesis to a per-call audio file, then local playback.

use async_trait::async_trait;
use regex::Regex;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::ProviderConfig;
use crate::config::{ModelsConfig, NarrationConfig};
use crate::error::NarrationError;

/// Placeholder in player arguments replaced by the audio file path.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Result of one narration attempt.
#[derive(Debug)]
pub enum NarrationOutcome {
    /// Narration was not requested, is disabled, or there was nothing to say.
    Skipped,
    /// Audio was written to `path` and playback is running in the background.
    Started { path: PathBuf },
    /// Audio was written to `path` and played to completion.
    Played { path: PathBuf },
    /// Synthesis, writing or playback failed.
    Failed(NarrationError),
}

impl NarrationOutcome {
    /// Whether audio was produced for this narration.
    pub fn is_spoken(&self) -> bool {
        matches!(self, Self::Started { .. } | Self::Played { .. })
    }

    /// Audio file written for this narration, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Started { path } | Self::Played { path } => Some(path),
            Self::Skipped | Self::Failed(_) => None,
        }
    }
}

impl fmt::Display for NarrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Started { path } => write!(f, "playing {}", path.display()),
            Self::Played { path } => write!(f, "played {}", path.display()),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Synthesizes speech and streams the encoded audio into `out`.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Returns the number of bytes written.
    async fn synthesize(
        &self,
        text: &str,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, NarrationError>;
}

/// Plays an audio file on the local output device.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, path: &Path) -> Result<(), NarrationError>;
}

/// Speech synthesis through the OpenAI `audio/speech` endpoint.
pub struct OpenAISpeech {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
    instructions: String,
    response_format: String,
}

impl OpenAISpeech {
    pub fn new(provider: &ProviderConfig, models: &ModelsConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: format!("{}/audio/speech", provider.api_base.trim_end_matches('/')),
            api_key: provider.api_key.clone(),
            model: models.speech_model.clone(),
            voice: models.voice.clone(),
            instructions: models.speech_instructions.clone(),
            response_format: models.response_format.clone(),
        }
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "instructions": self.instructions,
            "response_format": self.response_format,
        })
    }
}

#[async_trait]
impl SpeechBackend for OpenAISpeech {
    async fn synthesize(
        &self,
        text: &str,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, NarrationError> {
        let mut response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.payload(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NarrationError::Speech(format!("{}: {}", status, body.trim())));
        }

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        Ok(written)
    }
}

/// Plays audio by running an external program.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Player from configuration, falling back to the platform default.
    pub fn from_config(config: &NarrationConfig) -> Self {
        if config.player.trim().is_empty() {
            Self::platform_default()
        } else {
            Self::new(config.player.clone(), config.player_args.clone())
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("afplay", Vec::new())
        } else if cfg!(target_os = "windows") {
            Self::new(
                "powershell",
                vec![
                    "-NoProfile".to_string(),
                    "-Command".to_string(),
                    format!("(New-Object Media.SoundPlayer '{}').PlaySync()", PATH_PLACEHOLDER),
                ],
            )
        } else {
            Self::new("aplay", vec!["-q".to_string()])
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for `path`: placeholders are substituted, otherwise the path is appended.
    fn command_args(&self, path: &Path) -> Vec<OsString> {
        let path_str = path.to_string_lossy();
        let mut substituted = false;

        let mut args: Vec<OsString> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(PATH_PLACEHOLDER) {
                    substituted = true;
                    OsString::from(arg.replace(PATH_PLACEHOLDER, &path_str))
                } else {
                    OsString::from(arg)
                }
            })
            .collect();

        if !substituted {
            args.push(path.as_os_str().to_owned());
        }
        args
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, path: &Path) -> Result<(), NarrationError> {
        let output = tokio::process::Command::new(&self.program)
            .args(self.command_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| NarrationError::Playback(format!("Failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NarrationError::Playback(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Speaks text through a [`SpeechBackend`] and an [`AudioPlayer`].
pub struct Narrator {
    speech: Arc<dyn SpeechBackend>,
    player: Arc<dyn AudioPlayer>,
    config: NarrationConfig,
    extension: String,
    /// Background playback tasks.
    playbacks: Mutex<JoinSet<()>>,
    /// Files whose background playback has not finished yet.
    pending: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Narrator {
    /// `extension` names the audio files and should match the requested encoding.
    pub fn new(
        speech: Arc<dyn SpeechBackend>,
        player: Arc<dyn AudioPlayer>,
        config: NarrationConfig,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            speech,
            player,
            config,
            extension: extension.into(),
            playbacks: Mutex::new(JoinSet::new()),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Synthesize `text`, write it to a fresh file and play it.
    ///
    /// Never fails: errors are logged and returned as [`NarrationOutcome::Failed`].
    pub async fn narrate(&self, text: &str) -> NarrationOutcome {
        if !self.config.enabled {
            return NarrationOutcome::Skipped;
        }

        let spoken = speech_text(text);
        if spoken.is_empty() {
            debug!("Nothing to narrate after cleaning text");
            return NarrationOutcome::Skipped;
        }

        let path = self.output_path();
        match self.write_audio(&spoken, &path).await {
            Ok(bytes) => info!(path = %path.display(), bytes, "Audio file created. Playing now..."),
            Err(e) => {
                warn!(error = %e, "Narration synthesis failed");
                remove_audio(&path).await;
                return NarrationOutcome::Failed(e);
            }
        }

        if self.config.wait_for_playback {
            match play_audio(self.player.as_ref(), &path, self.config.keep_audio).await {
                Ok(()) => NarrationOutcome::Played { path },
                Err(e) => NarrationOutcome::Failed(e),
            }
        } else {
            self.spawn_playback(path.clone());
            NarrationOutcome::Started { path }
        }
    }

    /// Stop background playback. Unless `keep_audio` is set, files whose
    /// playback was cut short are removed.
    pub async fn shutdown(&self) {
        let mut playbacks = std::mem::take(&mut *lock(&self.playbacks));
        playbacks.shutdown().await;

        if self.config.keep_audio {
            return;
        }
        let leftover: Vec<PathBuf> = lock(&self.pending).drain().collect();
        for path in leftover {
            remove_audio(&path).await;
        }
    }

    fn spawn_playback(&self, path: PathBuf) {
        let player = Arc::clone(&self.player);
        let pending = Arc::clone(&self.pending);
        let keep_audio = self.config.keep_audio;

        lock(&self.pending).insert(path.clone());

        let mut playbacks = lock(&self.playbacks);
        while playbacks.try_join_next().is_some() {}
        playbacks.spawn(async move {
            let _ = play_audio(player.as_ref(), &path, keep_audio).await;
            lock(&pending).remove(&path);
        });
    }

    fn output_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("narration-{}.{}", Uuid::new_v4(), self.extension))
    }

    async fn write_audio(&self, text: &str, path: &Path) -> Result<u64, NarrationError> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::File::create(path).await?;
        let bytes = self.speech.synthesize(text, &mut file).await?;
        file.flush().await?;

        if bytes == 0 {
            return Err(NarrationError::Speech("empty audio stream".to_string()));
        }
        Ok(bytes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn play_audio(
    player: &dyn AudioPlayer,
    path: &Path,
    keep_audio: bool,
) -> Result<(), NarrationError> {
    let result = player.play(path).await;
    match &result {
        Ok(()) => info!(path = %path.display(), "Audio played successfully."),
        Err(e) => warn!(path = %path.display(), error = %e, "Error playing audio"),
    }

    if !keep_audio {
        remove_audio(path).await;
    }
    result
}

async fn remove_audio(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove audio file");
        }
    }
}

/// Model reasoning tags whose content is never spoken.
const REASONING_TAGS: &str = "thinking|think|reflection|reflect|reasoning|scratchpad";

static REASONING_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?is)<(?:{tags})\b[^>]*>.*?</(?:{tags})>",
        tags = REASONING_TAGS
    ))
    .unwrap()
});
static REASONING_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)</?(?:{tags})\b[^>]*>", tags = REASONING_TAGS)).unwrap()
});
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*#+\s*").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Prepare completion text for speech: drop reasoning blocks and stray
/// reasoning tags, markdown markers, collapse whitespace. Other angle
/// brackets are kept.
pub fn speech_text(text: &str) -> String {
    let result = REASONING_BLOCK_RE.replace_all(text, "");
    let result = REASONING_TAG_RE.replace_all(&result, "");
    let result = HEADING_RE.replace_all(&result, "");
    let result = result.replace('*', "");
    WS_RE.replace_all(&result, " ").trim().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Writes a fixed payload and records every text it was asked to speak.
    #[derive(Default)]
    pub(crate) struct FakeSpeech {
        pub spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechBackend for FakeSpeech {
        async fn synthesize(
            &self,
            text: &str,
            out: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, NarrationError> {
            self.spoken.lock().unwrap().push(text.to_string());
            let audio = b"RIFF0000WAVEfmt ";
            out.write_all(audio).await?;
            Ok(audio.len() as u64)
        }
    }

    pub(crate) struct FailingSpeech;

    #[async_trait]
    impl SpeechBackend for FailingSpeech {
        async fn synthesize(
            &self,
            _text: &str,
            out: &mut (dyn AsyncWrite + Unpin + Send),
        ) -> Result<u64, NarrationError> {
            out.write_all(b"partial").await?;
            Err(NarrationError::Speech("429 Too Many Requests".to_string()))
        }
    }

    /// Records played paths and whether the file existed at play time.
    #[derive(Default)]
    pub(crate) struct RecordingPlayer {
        pub played: Mutex<Vec<(PathBuf, bool)>>,
    }

    #[async_trait]
    impl AudioPlayer for RecordingPlayer {
        async fn play(&self, path: &Path) -> Result<(), NarrationError> {
            self.played
                .lock()
                .unwrap()
                .push((path.to_path_buf(), path.exists()));
            Ok(())
        }
    }

    struct StalledPlayer;

    #[async_trait]
    impl AudioPlayer for StalledPlayer {
        async fn play(&self, _path: &Path) -> Result<(), NarrationError> {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok(())
        }
    }

    struct BrokenPlayer;

    #[async_trait]
    impl AudioPlayer for BrokenPlayer {
        async fn play(&self, _path: &Path) -> Result<(), NarrationError> {
            Err(NarrationError::Playback("no audio device".to_string()))
        }
    }

    pub(crate) fn narration_config(dir: &Path) -> NarrationConfig {
        NarrationConfig {
            enabled: true,
            output_dir: dir.to_path_buf(),
            player: String::new(),
            player_args: Vec::new(),
            wait_for_playback: true,
            keep_audio: true,
        }
    }

    fn audio_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[test]
    fn test_speech_text_strips_markup() {
        let input = "## Summary\n<thinking>plan</thinking> Both value **effort**,\n\n but *differently*.";
        assert_eq!(speech_text(input), "Summary Both value effort, but differently.");
    }

    #[test]
    fn test_speech_text_keeps_comparisons() {
        assert_eq!(speech_text("1<2 and 3>2"), "1<2 and 3>2");
        assert_eq!(speech_text("use <b>bold</b> here"), "use <b>bold</b> here");
    }

    #[test]
    fn test_speech_text_drops_stray_reasoning_tags() {
        assert_eq!(speech_text("</think>Harmony <Reflection matters."), "Harmony <Reflection matters.");
        assert_eq!(speech_text("<reflection note=\"x\">\nhidden\n</reflection>Shown"), "Shown");
    }

    #[test]
    fn test_speech_text_plain() {
        assert_eq!(speech_text("  No markup here.  "), "No markup here.");
        assert_eq!(speech_text(" ** "), "");
    }

    #[test]
    fn test_command_args_append_path() {
        let player = CommandPlayer::new("aplay", vec!["-q".to_string()]);
        let args = player.command_args(Path::new("/tmp/a.wav"));
        assert_eq!(args, vec![OsString::from("-q"), OsString::from("/tmp/a.wav")]);
    }

    #[test]
    fn test_command_args_placeholder() {
        let player = CommandPlayer::new(
            "sh",
            vec!["-c".to_string(), "play '{path}' >/dev/null".to_string()],
        );
        let args = player.command_args(Path::new("/tmp/a.wav"));
        assert_eq!(
            args,
            vec![OsString::from("-c"), OsString::from("play '/tmp/a.wav' >/dev/null")]
        );
    }

    #[test]
    fn test_player_from_config() {
        let mut config = NarrationConfig::default();
        assert!(!CommandPlayer::from_config(&config).program().is_empty());

        config.player = "mpv".to_string();
        assert_eq!(CommandPlayer::from_config(&config).program(), "mpv");
    }

    #[test]
    fn test_speech_endpoint_and_payload() {
        let provider = ProviderConfig::new("https://api.example.com/v1/", "sk-test");
        let speech = OpenAISpeech::new(&provider, &ModelsConfig::default(), reqwest::Client::new());

        assert_eq!(speech.endpoint, "https://api.example.com/v1/audio/speech");
        let payload = speech.payload("hello");
        assert_eq!(payload["model"], "gpt-4o-mini-tts");
        assert_eq!(payload["voice"], "ash");
        assert_eq!(payload["input"], "hello");
        assert_eq!(payload["instructions"], "Speak clearly and authoritatively.");
        assert_eq!(payload["response_format"], "wav");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_player_exit_status() {
        let ok = CommandPlayer::new("true", Vec::new());
        assert!(ok.play(Path::new("/tmp/unused.wav")).await.is_ok());

        let failing = CommandPlayer::new("false", Vec::new());
        let err = failing.play(Path::new("/tmp/unused.wav")).await.unwrap_err();
        assert!(matches!(err, NarrationError::Playback(_)));
    }

    #[tokio::test]
    async fn test_command_player_missing_program() {
        let player = CommandPlayer::new("culturelens-no-such-player", Vec::new());
        let err = player.play(Path::new("a.wav")).await.unwrap_err();
        assert!(matches!(err, NarrationError::Playback(_)));
    }

    #[tokio::test]
    async fn test_narrate_writes_and_plays() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(FakeSpeech::default());
        let player = Arc::new(RecordingPlayer::default());
        let narrator = Narrator::new(
            speech.clone(),
            player.clone(),
            narration_config(dir.path()),
            "wav",
        );

        let outcome = narrator.narrate("**Hello** world").await;

        let path = outcome.path().unwrap().to_path_buf();
        assert!(matches!(outcome, NarrationOutcome::Played { .. }));
        assert_eq!(path.extension().unwrap(), "wav");
        assert_eq!(std::fs::read(&path).unwrap(), b"RIFF0000WAVEfmt ");
        assert_eq!(*speech.spoken.lock().unwrap(), vec!["Hello world".to_string()]);
        assert_eq!(*player.played.lock().unwrap(), vec![(path, true)]);
    }

    #[tokio::test]
    async fn test_each_narration_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(
            Arc::new(FakeSpeech::default()),
            Arc::new(RecordingPlayer::default()),
            narration_config(dir.path()),
            "wav",
        );

        let first = narrator.narrate("one").await;
        let second = narrator.narrate("two").await;

        assert_ne!(first.path(), second.path());
        assert_eq!(audio_files(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_audio_removed_after_playback() {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(RecordingPlayer::default());
        let mut config = narration_config(dir.path());
        config.keep_audio = false;
        let narrator = Narrator::new(Arc::new(FakeSpeech::default()), player.clone(), config, "wav");

        let outcome = narrator.narrate("bye").await;

        assert!(outcome.is_spoken());
        assert!(player.played.lock().unwrap()[0].1);
        assert!(audio_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_narration_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(FakeSpeech::default());
        let mut config = narration_config(dir.path());
        config.enabled = false;
        let narrator = Narrator::new(speech.clone(), Arc::new(RecordingPlayer::default()), config, "wav");

        assert!(matches!(narrator.narrate("hi").await, NarrationOutcome::Skipped));
        assert!(speech.spoken.lock().unwrap().is_empty());
        assert!(audio_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(
            Arc::new(FakeSpeech::default()),
            Arc::new(RecordingPlayer::default()),
            narration_config(dir.path()),
            "wav",
        );

        assert!(matches!(narrator.narrate("  \n ").await, NarrationOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_reported_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(RecordingPlayer::default());
        let narrator = Narrator::new(
            Arc::new(FailingSpeech),
            player.clone(),
            narration_config(dir.path()),
            "wav",
        );

        let outcome = narrator.narrate("hello").await;

        assert!(matches!(outcome, NarrationOutcome::Failed(NarrationError::Speech(_))));
        assert!(!outcome.is_spoken());
        assert!(player.played.lock().unwrap().is_empty());
        assert!(audio_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_playback_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(
            Arc::new(FakeSpeech::default()),
            Arc::new(BrokenPlayer),
            narration_config(dir.path()),
            "wav",
        );

        let outcome = narrator.narrate("hello").await;
        assert!(matches!(outcome, NarrationOutcome::Failed(NarrationError::Playback(_))));
    }

    #[tokio::test]
    async fn test_background_playback_returns_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = narration_config(dir.path());
        config.wait_for_playback = false;
        let narrator = Narrator::new(
            Arc::new(FakeSpeech::default()),
            Arc::new(BrokenPlayer),
            config,
            "wav",
        );

        let outcome = narrator.narrate("hello").await;
        assert!(matches!(outcome, NarrationOutcome::Started { .. }));
        assert_eq!(outcome.to_string(), format!("playing {}", outcome.path().unwrap().display()));
    }

    #[tokio::test]
    async fn test_shutdown_removes_unfinished_audio() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = narration_config(dir.path());
        config.wait_for_playback = false;
        config.keep_audio = false;
        let narrator = Narrator::new(Arc::new(FakeSpeech::default()), Arc::new(StalledPlayer), config, "wav");

        let outcome = narrator.narrate("still talking").await;
        assert!(matches!(outcome, NarrationOutcome::Started { .. }));
        assert_eq!(audio_files(dir.path()).len(), 1);

        narrator.shutdown().await;
        assert!(audio_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_keeps_audio_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = narration_config(dir.path());
        config.wait_for_playback = false;
        let narrator = Narrator::new(Arc::new(FakeSpeech::default()), Arc::new(StalledPlayer), config, "wav");

        narrator.narrate("still talking").await;
        narrator.shutdown().await;
        assert_eq!(audio_files(dir.path()).len(), 1);
    }
}
