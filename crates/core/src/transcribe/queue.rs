//! Single-worker transcription queue.
//!
//! One task at a time touches the GPU. Requests carry a priority; the worker
//! always pops the most urgent pending request.

use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{broadcast, oneshot, Mutex, Notify};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::subtitle::SrtFile;

use super::types::{
    Transcript, TranscribeError, TranscribePriority, TranscriptRefiner, TranscriptionBackend,
};

struct Task {
    video_path: PathBuf,
    language: String,
    priority: TranscribePriority,
    /// FIFO tiebreak within a priority class.
    sequence: u64,
    reply: oneshot::Sender<Result<String, TranscribeError>>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Task {}
impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: invert so the lowest (priority, sequence)
        // pops first.
        (other.priority, other.sequence).cmp(&(self.priority, self.sequence))
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct TranscribeQueueConfig {
    /// Cue confidence below this triggers the refiner.
    pub min_confidence: f32,
    pub audio_extract_timeout: Duration,
}

impl Default for TranscribeQueueConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            audio_extract_timeout: Duration::from_secs(300),
        }
    }
}

/// The transcription queue handle.
pub struct TranscribeQueue {
    config: TranscribeQueueConfig,
    backend: Arc<dyn TranscriptionBackend>,
    refiner: Option<Arc<dyn TranscriptRefiner>>,
    heap: Mutex<BinaryHeap<Task>>,
    notify: Notify,
    sequence: std::sync::atomic::AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl TranscribeQueue {
    pub fn new(
        config: TranscribeQueueConfig,
        backend: Arc<dyn TranscriptionBackend>,
        refiner: Option<Arc<dyn TranscriptRefiner>>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            backend,
            refiner,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            sequence: std::sync::atomic::AtomicU64::new(0),
            shutdown_tx,
        })
    }

    /// Spawn the single worker task.
    pub fn start(self: Arc<Self>) {
        let queue = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(backend = queue.backend.name(), "transcription worker started");
            loop {
                let task = {
                    let mut heap = queue.heap.lock().await;
                    heap.pop()
                };
                match task {
                    Some(task) => queue.process(task).await,
                    None => {
                        tokio::select! {
                            _ = queue.notify.notified() => {}
                            _ = shutdown_rx.recv() => {
                                info!("transcription worker stopped");
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Enqueue a transcription and wait for its SRT.
    pub async fn submit(
        &self,
        video_path: PathBuf,
        language: String,
        priority: TranscribePriority,
    ) -> Result<String, TranscribeError> {
        let (reply, rx) = oneshot::channel();
        let sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        {
            let mut heap = self.heap.lock().await;
            heap.push(Task {
                video_path,
                language,
                priority,
                sequence,
                reply,
            });
        }
        self.notify.notify_one();
        rx.await.map_err(|_| TranscribeError::QueueClosed)?
    }

    pub async fn depth(&self) -> usize {
        self.heap.lock().await.len()
    }

    async fn process(&self, task: Task) {
        debug!(path = %task.video_path.display(), "transcription started");
        let result = self.run(&task.video_path, &task.language).await;
        crate::metrics::TRANSCRIPTIONS
            .with_label_values(&[if result.is_ok() { "success" } else { "error" }])
            .inc();
        if task.reply.send(result).is_err() {
            warn!("transcription requester went away");
        }
    }

    async fn run(&self, video: &Path, language: &str) -> Result<String, TranscribeError> {
        if !self.backend.is_available().await {
            return Err(TranscribeError::NotAvailable);
        }

        let wav = extract_audio(video, self.config.audio_extract_timeout).await?;
        let outcome = self.backend.transcribe(&wav, language).await;
        // The WAV is scratch space; drop it on every exit path.
        let _ = tokio::fs::remove_file(&wav).await;
        let transcript = outcome?;

        self.apply_refinement(transcript, language).await
    }

    /// Re-run low-confidence cues through the refiner, if one is wired.
    async fn apply_refinement(
        &self,
        transcript: Transcript,
        language: &str,
    ) -> Result<String, TranscribeError> {
        let (Some(confidences), Some(refiner)) = (&transcript.confidences, &self.refiner) else {
            return Ok(transcript.srt);
        };

        let mut file = SrtFile::parse(&transcript.srt)
            .map_err(|e| TranscribeError::Backend(format!("unparseable transcript: {e}")))?;
        for (cue, confidence) in file.cues.iter_mut().zip(confidences.iter()) {
            if *confidence < self.config.min_confidence {
                if let Some(better) = refiner.refine_line(&cue.text, language).await {
                    debug!(confidence, "low-confidence cue refined");
                    cue.text = better;
                }
            }
        }
        Ok(file.serialize())
    }
}

/// Pipe the primary audio stream to a 16 kHz mono WAV for the model.
async fn extract_audio(video: &Path, extract_timeout: Duration) -> Result<PathBuf, TranscribeError> {
    let wav = std::env::temp_dir().join(format!("sublarr-audio-{}.wav", uuid::Uuid::new_v4()));
    let run = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(video)
        .args(["-map", "0:a:0", "-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
        .arg(&wav)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let output = match timeout(extract_timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let _ = tokio::fs::remove_file(&wav).await;
            return Err(TranscribeError::AudioExtraction(e.to_string()));
        }
        Err(_) => {
            let _ = tokio::fs::remove_file(&wav).await;
            return Err(TranscribeError::Timeout);
        }
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&wav).await;
        return Err(TranscribeError::AudioExtraction(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(wav)
}
