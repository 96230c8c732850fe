use std::any::Any;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use persona_contracts::characters::{Character, CharacterId, ImagePayload, NormalizedProfile};
use persona_contracts::events::EventWriter;
use serde_json::{json, Value};

use crate::gallery::{CharacterPatch, GalleryStore, PatchOutcome};
use crate::gemini::error_chain_text;
use crate::portrait::{ImageProvider, ImageRequest};
use crate::profile::{generate_normalized_profile, ProfileProvider, ProfileRequest};

pub const DEFAULT_FAILURE_MESSAGE: &str = "캐릭터 생성 중 오류가 발생했습니다. 다시 시도해 주세요.";
const FAILURE_MESSAGE_MAX_CHARS: usize = 512;
const WORKER_CHECK_INTERVAL: Duration = Duration::from_millis(50);

pub type RequestId = u64;

/// Where one submission stands. `ImageFailed` is terminal for the portrait
/// only; the request itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    ProfilePending,
    ProfileFailed { message: String },
    ProfileReady { character_id: CharacterId },
    ImagePending { character_id: CharacterId },
    Complete { character_id: CharacterId },
    ImageFailed { character_id: CharacterId, reason: String },
}

impl RequestState {
    pub fn character_id(&self) -> Option<CharacterId> {
        match self {
            Self::ProfilePending | Self::ProfileFailed { .. } => None,
            Self::ProfileReady { character_id }
            | Self::ImagePending { character_id }
            | Self::Complete { character_id }
            | Self::ImageFailed { character_id, .. } => Some(*character_id),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::ProfileFailed { .. } | Self::Complete { .. } | Self::ImageFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationUpdate {
    CharacterAdded {
        request: RequestId,
        character_id: CharacterId,
    },
    ProfileFailed {
        request: RequestId,
        message: String,
    },
    ImageReady {
        request: RequestId,
        character_id: CharacterId,
    },
    ImageFailed {
        request: RequestId,
        character_id: CharacterId,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WorkerKey {
    Profile(RequestId),
    Image(RequestId, CharacterId),
}

enum WorkerMessage {
    Profile {
        request: RequestId,
        result: Result<NormalizedProfile>,
    },
    Image {
        request: RequestId,
        character_id: CharacterId,
        result: Result<ImagePayload>,
    },
}

/// Two-stage character generation over a session gallery.
///
/// Each stage runs on its own worker thread and reports back over a channel;
/// completions are applied on the owning thread by [`poll`](Self::poll),
/// [`wait`](Self::wait) or [`settle`](Self::settle). Portraits are patched by
/// record identity, so completions may arrive in any order. A worker that
/// stops without replying is reaped and counts as a failure of its stage.
pub struct GenerationOrchestrator {
    profiles: Arc<dyn ProfileProvider>,
    images: Arc<dyn ImageProvider>,
    text_model: String,
    image_model: String,
    events: EventWriter,
    gallery: GalleryStore,
    busy: bool,
    error: Option<String>,
    latest_request: Option<RequestId>,
    next_request: RequestId,
    requests: BTreeMap<RequestId, RequestState>,
    workers: BTreeMap<WorkerKey, JoinHandle<()>>,
    updates: Vec<GenerationUpdate>,
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerMessage>,
}

impl GenerationOrchestrator {
    pub fn new(
        profiles: Arc<dyn ProfileProvider>,
        images: Arc<dyn ImageProvider>,
        text_model: impl Into<String>,
        image_model: impl Into<String>,
        events: EventWriter,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            profiles,
            images,
            text_model: text_model.into(),
            image_model: image_model.into(),
            events,
            gallery: GalleryStore::new(),
            busy: false,
            error: None,
            latest_request: None,
            next_request: 1,
            requests: BTreeMap::new(),
            workers: BTreeMap::new(),
            updates: Vec::new(),
            sender,
            receiver,
        }
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    /// True while the profile stage of the latest submission is running.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn request_state(&self, request: RequestId) -> Option<&RequestState> {
        self.requests.get(&request)
    }

    pub fn in_flight(&self) -> usize {
        self.workers.len()
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    /// Starts a generation. The profile stage runs in the background; the
    /// caller learns the outcome from later updates.
    pub fn submit(&mut self, prompt: &str) -> Result<RequestId> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("character prompt is empty");
        }

        let request = self.next_request;
        self.next_request += 1;
        self.latest_request = Some(request);
        self.busy = true;
        self.error = None;
        self.requests.insert(request, RequestState::ProfilePending);
        self.log(
            "generation_requested",
            json!({
                "request": request,
                "prompt": prompt,
                "model": self.text_model,
            }),
        );

        let provider = Arc::clone(&self.profiles);
        let sender = self.sender.clone();
        let profile_request = ProfileRequest {
            model: self.text_model.clone(),
            prompt: prompt.to_string(),
        };
        let spawned = thread::Builder::new()
            .name("persona-profile".to_string())
            .spawn(move || {
                let result = generate_normalized_profile(provider.as_ref(), &profile_request);
                let _ = sender.send(WorkerMessage::Profile { request, result });
            });
        match spawned {
            Ok(handle) => {
                self.workers.insert(WorkerKey::Profile(request), handle);
            }
            Err(err) => self.apply_profile(
                request,
                Err(anyhow::Error::new(err).context("profile worker spawn failed")),
            ),
        }
        Ok(request)
    }

    /// Applies every completion already delivered, without blocking.
    pub fn poll(&mut self) -> Vec<GenerationUpdate> {
        self.drain();
        self.reap_finished_workers();
        std::mem::take(&mut self.updates)
    }

    /// Blocks up to `timeout` for the next completion when nothing is ready.
    pub fn wait(&mut self, timeout: Duration) -> Vec<GenerationUpdate> {
        let deadline = Instant::now() + timeout;
        while self.updates.is_empty() && !self.workers.is_empty() {
            if !self.receive_until(deadline) {
                break;
            }
        }
        self.poll()
    }

    /// Applies completions until no work is outstanding or `timeout` passes.
    pub fn settle(&mut self, timeout: Duration) -> Vec<GenerationUpdate> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain();
            self.reap_finished_workers();
            if self.workers.is_empty() || !self.receive_until(deadline) {
                break;
            }
        }
        std::mem::take(&mut self.updates)
    }

    fn drain(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            self.apply(message);
        }
    }

    /// Receives at most one completion, checking on dead workers between
    /// short waits. Returns false once `deadline` has passed.
    fn receive_until(&mut self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match self.receiver.recv_timeout(remaining.min(WORKER_CHECK_INTERVAL)) {
            Ok(message) => self.apply(message),
            Err(_) => self.reap_finished_workers(),
        }
        true
    }

    fn reap_finished_workers(&mut self) {
        let finished = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| *key)
            .collect::<Vec<WorkerKey>>();
        if finished.is_empty() {
            return;
        }
        let mut stopped = Vec::with_capacity(finished.len());
        for key in finished {
            if let Some(handle) = self.workers.remove(&key) {
                let reason = match handle.join() {
                    Ok(()) => "exited without a result".to_string(),
                    Err(payload) => format!("panicked: {}", panic_text(payload.as_ref())),
                };
                stopped.push((key, reason));
            }
        }
        // Replies sent before a worker exited are already queued.
        self.drain();

        for (key, reason) in stopped {
            match key {
                WorkerKey::Profile(request) => {
                    if self.requests.get(&request) == Some(&RequestState::ProfilePending) {
                        self.log(
                            "worker_lost",
                            json!({ "request": request, "stage": "profile", "reason": reason }),
                        );
                        self.apply_profile(request, Err(anyhow!("profile worker {reason}")));
                    }
                }
                WorkerKey::Image(request, character_id) => {
                    let pending = RequestState::ImagePending { character_id };
                    if self.requests.get(&request) == Some(&pending) {
                        self.log(
                            "worker_lost",
                            json!({ "request": request, "stage": "image", "reason": reason }),
                        );
                        self.apply_image(
                            request,
                            character_id,
                            Err(anyhow!("image worker {reason}")),
                        );
                    }
                }
            }
        }
    }

    fn apply(&mut self, message: WorkerMessage) {
        let key = match &message {
            WorkerMessage::Profile { request, .. } => WorkerKey::Profile(*request),
            WorkerMessage::Image {
                request,
                character_id,
                ..
            } => WorkerKey::Image(*request, *character_id),
        };
        self.workers.remove(&key);
        match message {
            WorkerMessage::Profile { request, result } => self.apply_profile(request, result),
            WorkerMessage::Image {
                request,
                character_id,
                result,
            } => self.apply_image(request, character_id, result),
        }
    }

    fn apply_profile(&mut self, request: RequestId, result: Result<NormalizedProfile>) {
        if self.latest_request == Some(request) {
            self.busy = false;
        }
        let NormalizedProfile { profile, warnings } = match result {
            Ok(normalized) => normalized,
            Err(err) => return self.fail_profile(request, &err),
        };
        for warning in warnings {
            self.log(
                "profile_warning",
                json!({ "request": request, "warning": warning }),
            );
        }
        self.log(
            "profile_generated",
            json!({
                "request": request,
                "name": profile.name,
                "title": profile.title,
            }),
        );

        let character = Character::from_profile(
            CharacterId::new(),
            profile,
            chrono::Utc::now().timestamp_millis(),
        );
        let character_id = character.id;
        let visual_prompt = character.visual_prompt.clone();
        if let Err(err) = self.gallery.prepend(character) {
            return self.fail_profile(request, &err);
        }
        self.requests
            .insert(request, RequestState::ProfileReady { character_id });
        self.log(
            "character_added",
            json!({
                "request": request,
                "character_id": character_id.to_string(),
                "gallery_len": self.gallery.len(),
            }),
        );
        self.updates.push(GenerationUpdate::CharacterAdded {
            request,
            character_id,
        });
        self.start_image(request, character_id, &visual_prompt);
    }

    fn fail_profile(&mut self, request: RequestId, err: &anyhow::Error) {
        let message = failure_message(err);
        self.log(
            "profile_failed",
            json!({ "request": request, "error": message }),
        );
        self.error = Some(message.clone());
        self.requests.insert(
            request,
            RequestState::ProfileFailed {
                message: message.clone(),
            },
        );
        self.updates
            .push(GenerationUpdate::ProfileFailed { request, message });
    }

    fn start_image(&mut self, request: RequestId, character_id: CharacterId, visual_prompt: &str) {
        let image_request = ImageRequest::portrait(&self.image_model, visual_prompt);
        self.log(
            "image_started",
            json!({
                "request": request,
                "character_id": character_id.to_string(),
                "model": image_request.model,
                "prompt": image_request.prompt,
            }),
        );

        let provider = Arc::clone(&self.images);
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name("persona-image".to_string())
            .spawn(move || {
                let result = provider
                    .generate_image(&image_request)
                    .with_context(|| format!("{} image generation failed", provider.name()));
                let _ = sender.send(WorkerMessage::Image {
                    request,
                    character_id,
                    result,
                });
            });
        match spawned {
            Ok(handle) => {
                self.workers
                    .insert(WorkerKey::Image(request, character_id), handle);
                self.requests
                    .insert(request, RequestState::ImagePending { character_id });
            }
            Err(err) => self.apply_image(
                request,
                character_id,
                Err(anyhow::Error::new(err).context("image worker spawn failed")),
            ),
        }
    }

    /// Portrait outcomes never touch the user-facing error.
    fn apply_image(
        &mut self,
        request: RequestId,
        character_id: CharacterId,
        result: Result<ImagePayload>,
    ) {
        let reason = match result {
            Ok(image) => {
                let patch = CharacterPatch {
                    image_url: image.to_data_url(),
                };
                match self.gallery.patch_by_id(character_id, patch) {
                    PatchOutcome::Applied => {
                        self.requests
                            .insert(request, RequestState::Complete { character_id });
                        self.log(
                            "image_generated",
                            json!({
                                "request": request,
                                "character_id": character_id.to_string(),
                                "mime_type": image.mime_type,
                            }),
                        );
                        self.updates.push(GenerationUpdate::ImageReady {
                            request,
                            character_id,
                        });
                        return;
                    }
                    outcome => {
                        let reason = format!("portrait patch skipped ({outcome:?})");
                        self.log(
                            "image_patch_skipped",
                            json!({
                                "request": request,
                                "character_id": character_id.to_string(),
                                "reason": reason,
                            }),
                        );
                        reason
                    }
                }
            }
            Err(err) => {
                let reason = error_chain_text(&err, FAILURE_MESSAGE_MAX_CHARS);
                self.log(
                    "image_failed",
                    json!({
                        "request": request,
                        "character_id": character_id.to_string(),
                        "error": reason,
                    }),
                );
                reason
            }
        };
        self.requests.insert(
            request,
            RequestState::ImageFailed {
                character_id,
                reason: reason.clone(),
            },
        );
        self.updates.push(GenerationUpdate::ImageFailed {
            request,
            character_id,
            reason,
        });
    }

    fn log(&self, event_type: &str, payload: Value) {
        let payload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("persona: failed to record {event_type} event: {err:#}");
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Display text for a failed profile stage.
pub fn failure_message(err: &anyhow::Error) -> String {
    let text = error_chain_text(err, FAILURE_MESSAGE_MAX_CHARS);
    if text.is_empty() {
        DEFAULT_FAILURE_MESSAGE.to_string()
    } else {
        text
    }
}
