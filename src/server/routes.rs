use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use super::{ApiError, AppContext, StatusMessage};
use crate::audio::{wav_stream_header, ReferenceAudio};
use crate::synthesis::{SynthesisRequestBuilder, SynthesisStream, VoiceSource};
use crate::TtsError;

const PCM_CONTENT_TYPE: &str = "application/octet-stream";
const SAMPLE_RATE_HEADER: HeaderName = HeaderName::from_static("x-sample-rate");

#[derive(Serialize)]
pub(super) struct ModelList {
    object: &'static str,
    data: Vec<ModelCard>,
}

#[derive(Serialize)]
struct ModelCard {
    id: String,
    object: &'static str,
    created: u64,
    owned_by: &'static str,
}

pub(super) async fn list_models(State(ctx): State<Arc<AppContext>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![ModelCard {
            id: ctx.synthesizer().model_id().to_string(),
            object: "model",
            created: 0,
            owned_by: "local",
        }],
    })
}

/// OpenAI-compatible speech request.
#[derive(Debug, Deserialize)]
pub(super) struct SpeechRequest {
    #[serde(default)]
    model: String,
    input: String,
    #[serde(default)]
    response_format: String,
    #[serde(default = "default_speed")]
    speed: f32,
    /// A registered speaker id; anything else falls back to the default voice.
    #[serde(default)]
    voice: Option<String>,
}

fn default_speed() -> f32 {
    1.0
}

pub(super) async fn speech(
    State(ctx): State<Arc<AppContext>>,
    payload: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if !payload.model.is_empty() && payload.model != ctx.synthesizer().model_id() {
        log::debug!("Ignoring requested model '{}'", payload.model);
    }

    let registered = payload
        .voice
        .as_deref()
        .and_then(|id| ctx.synthesizer().store().get(id).ok());
    let profile = match registered {
        Some(profile) => profile,
        None => ctx
            .default_voice()
            .cloned()
            .ok_or_else(|| TtsError::Config("no default voice configured".to_string()))?,
    };

    let request = SynthesisRequestBuilder::default()
        .text(payload.input)
        .voice(VoiceSource::Profile(profile))
        .speed(payload.speed)
        .build()?;
    let stream = ctx.synthesizer().synthesize(request).await?;

    if payload.response_format == "pcm" {
        return Ok(pcm_response(stream));
    }
    if !matches!(payload.response_format.as_str(), "" | "wav") {
        log::debug!(
            "Unsupported response_format '{}', sending wav",
            payload.response_format
        );
    }

    let header_chunk = wav_stream_header(stream.sample_rate())?;
    let body = tokio_stream::once(Ok::<_, TtsError>(header_chunk)).chain(stream.into_pcm16());
    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "attachment; filename=output.wav"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct SftForm {
    tts_text: String,
    spk_id: String,
}

/// Synthesize with a registered speaker; streams raw 16-bit PCM.
pub(super) async fn inference_sft(
    State(ctx): State<Arc<AppContext>>,
    form: Result<Form<SftForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let request = SynthesisRequestBuilder::default()
        .text(form.tts_text)
        .voice(VoiceSource::Speaker(form.spk_id))
        .build()?;
    let stream = ctx.synthesizer().synthesize(request).await?;
    Ok(pcm_response(stream))
}

/// Synthesize with an uploaded reference clip; streams raw 16-bit PCM.
pub(super) async fn inference_zero_shot(
    State(ctx): State<Arc<AppContext>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut upload = UploadForm::read(multipart).await?;
    let tts_text = upload.take_text("tts_text")?;
    let prompt_text = upload.take_text("prompt_text")?;
    let prompt_wav = upload.take_file("prompt_wav")?;

    let reference = tokio::task::spawn_blocking(move || ReferenceAudio::from_wav_bytes(&prompt_wav))
        .await
        .map_err(task_failed)??;

    let request = SynthesisRequestBuilder::default()
        .text(tts_text)
        .voice(VoiceSource::Inline {
            reference: Arc::new(reference),
            transcript: prompt_text,
        })
        .build()?;
    let stream = ctx.synthesizer().synthesize(request).await?;
    Ok(pcm_response(stream))
}

/// Register a speaker from an uploaded clip, transcribing it when no text is given.
pub(super) async fn add_speaker(
    State(ctx): State<Arc<AppContext>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let mut upload = UploadForm::read(multipart).await?;
    let spk_id = upload.take_text("spk_id")?;
    let prompt_text = upload.take_optional_text("prompt_text");
    let prompt_wav = upload.take_file("prompt_wav")?;

    let task_ctx = ctx.clone();
    let id = spk_id.clone();
    tokio::task::spawn_blocking(move || -> Result<(), TtsError> {
        // removed on drop, whichever way this returns
        let mut staged = tempfile::NamedTempFile::new_in(task_ctx.staging_dir())?;
        staged.write_all(&prompt_wav)?;
        staged.flush()?;

        task_ctx
            .synthesizer()
            .store()
            .add_from_file(&id, staged.path(), prompt_text.as_deref())?;
        task_ctx.persist_speakers();
        Ok(())
    })
    .await
    .map_err(task_failed)??;

    Ok(Json(StatusMessage::success(format!(
        "Speaker {spk_id} added successfully"
    ))))
}

#[derive(Debug, Deserialize)]
pub(super) struct SpeakerForm {
    spk_id: String,
}

pub(super) async fn remove_speaker(
    State(ctx): State<Arc<AppContext>>,
    form: Result<Form<SpeakerForm>, FormRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Form(form) = form.map_err(|e| ApiError::bad_request(e.body_text()))?;
    ctx.synthesizer().store().remove(&form.spk_id)?;

    let task_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || task_ctx.persist_speakers())
        .await
        .map_err(task_failed)?;

    Ok(Json(StatusMessage::success(format!(
        "Speaker {} removed successfully",
        form.spk_id
    ))))
}

pub(super) async fn get_speakers(State(ctx): State<Arc<AppContext>>) -> Json<Vec<String>> {
    Json(ctx.synthesizer().store().list())
}

/// Raw PCM carries no header, so the sample rate travels in `x-sample-rate`.
fn pcm_response(stream: SynthesisStream) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(PCM_CONTENT_TYPE)),
            (SAMPLE_RATE_HEADER, HeaderValue::from(stream.sample_rate())),
        ],
        Body::from_stream(stream.into_pcm16()),
    )
        .into_response()
}

fn task_failed(err: tokio::task::JoinError) -> ApiError {
    log::error!("Request task failed: {err}");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "request task failed")
}

/// Text fields and file contents of a multipart form.
struct UploadForm {
    texts: HashMap<String, String>,
    files: HashMap<String, Bytes>,
}

impl UploadForm {
    async fn read(multipart: Result<Multipart, MultipartRejection>) -> Result<Self, ApiError> {
        let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
        let mut form = Self {
            texts: HashMap::new(),
            files: HashMap::new(),
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if field.file_name().is_some() {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.files.insert(name, data);
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                form.texts.insert(name, text);
            }
        }
        Ok(form)
    }

    fn take_text(&mut self, name: &str) -> Result<String, ApiError> {
        self.texts
            .remove(name)
            .ok_or_else(|| ApiError::bad_request(format!("missing form field '{name}'")))
    }

    fn take_optional_text(&mut self, name: &str) -> Option<String> {
        self.texts.remove(name).filter(|t| !t.trim().is_empty())
    }

    fn take_file(&mut self, name: &str) -> Result<Bytes, ApiError> {
        self.files
            .remove(name)
            .ok_or_else(|| ApiError::bad_request(format!("missing file field '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::server::router;
    use crate::speakers::SpeakerStore;
    use crate::synthesis::Synthesizer;
    use crate::testing::{
        frontend, reference_clip, tone, wav_bytes, StubModel, StubTranscriber, STUB_SAMPLE_RATE,
    };

    const BOUNDARY: &str = "tts-test-boundary";

    fn context(staging: &Path) -> AppContext {
        let frontend = frontend();
        let store = Arc::new(SpeakerStore::new(
            frontend.clone(),
            Arc::new(StubTranscriber::new("今天天氣真好")),
        ));
        let default_voice = store
            .prepare("default", reference_clip(), Some("在密碼學中，加密是將明文資訊改變為難以讀取的密文內容。"))
            .unwrap();
        let synthesizer = Synthesizer::new(Arc::new(StubModel::new()), frontend, store);
        AppContext::new(synthesizer)
            .with_default_voice(Arc::new(default_voice))
            .with_staging_dir(staging.to_path_buf())
    }

    fn app(ctx: AppContext) -> (Arc<AppContext>, axum::Router) {
        let ctx = Arc::new(ctx);
        (ctx.clone(), router(ctx))
    }

    fn multipart(texts: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in texts {
            write!(
                body,
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .unwrap();
        }
        if let Some((name, data)) = file {
            write!(
                body,
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"prompt.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .unwrap();
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        write!(body, "--{BOUNDARY}--\r\n").unwrap();

        Request::post("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn with_uri(mut request: Request<Body>, uri: &str) -> Request<Body> {
        *request.uri_mut() = uri.parse().unwrap();
        request
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn prompt_wav() -> Vec<u8> {
        wav_bytes(&tone(8000, 0.5), 16000)
    }

    async fn add_voice(router: &axum::Router, id: &str) -> Response {
        let wav = prompt_wav();
        let request = multipart(
            &[("spk_id", id), ("prompt_text", "今天天氣真好")],
            Some(("prompt_wav", &wav)),
        );
        router
            .clone()
            .oneshot(with_uri(request, "/add_speaker"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn models_lists_the_loaded_model() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));

        for uri in ["/models", "/v1/models"] {
            let response = router
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let body = json(response).await;
            assert_eq!(body["object"], "list");
            assert_eq!(body["data"][0]["id"], "stub-voice");
            assert_eq!(body["data"][0]["owned_by"], "local");
        }
    }

    #[tokio::test]
    async fn speaker_lifecycle_over_http() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));

        let response = add_voice(&router, "voiceA").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Speaker voiceA added successfully");

        let response = router
            .clone()
            .oneshot(Request::get("/get_speakers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json(response).await, serde_json::json!(["voiceA"]));

        let response = router
            .clone()
            .oneshot(form("/inference_sft", "tts_text=明天也很好&spk_id=voiceA"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[&SAMPLE_RATE_HEADER],
            STUB_SAMPLE_RATE.to_string().as_str()
        );
        let pcm = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(pcm.len(), 2 * 160 * 2);

        let response = router
            .clone()
            .oneshot(form("/remove_speaker", "spk_id=voiceA"))
            .await
            .unwrap();
        assert_eq!(
            json(response).await["message"],
            "Speaker voiceA removed successfully"
        );

        let response = router
            .clone()
            .oneshot(form("/inference_sft", "tts_text=明天也很好&spk_id=voiceA"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["status"], "error");
        assert!(std::fs::read_dir(staging.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn sft_accepts_query_parameters() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));
        add_voice(&router, "voiceA").await;

        let response = router
            .oneshot(
                Request::get("/inference_sft?tts_text=%E5%A5%BD&spk_id=voiceA")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn corrupted_upload_is_rejected_and_cleaned_up() {
        let staging = tempfile::tempdir().unwrap();
        let (ctx, router) = app(context(staging.path()));

        let request = multipart(
            &[("spk_id", "voiceA")],
            Some(("prompt_wav", b"RIFF\x10\x00\x00\x00WAVEjunk".as_slice())),
        );
        let response = router
            .oneshot(with_uri(request, "/add_speaker"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid reference audio"));
        assert!(ctx.synthesizer().store().is_empty());
        assert!(std::fs::read_dir(staging.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn add_speaker_transcribes_when_text_missing() {
        let staging = tempfile::tempdir().unwrap();
        let (ctx, router) = app(context(staging.path()));
        let wav = prompt_wav();
        let request = multipart(&[("spk_id", "voiceB")], Some(("prompt_wav", &wav)));

        let response = router
            .oneshot(with_uri(request, "/add_speaker"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let profile = ctx.synthesizer().store().get("voiceB").unwrap();
        assert_eq!(profile.transcript, "今天天氣真好");
    }

    #[tokio::test]
    async fn zero_shot_streams_pcm_and_rejects_empty_text() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));
        let wav = prompt_wav();

        let request = multipart(
            &[("tts_text", "明天也很好"), ("prompt_text", "今天天氣真好")],
            Some(("prompt_wav", &wav)),
        );
        let response = router
            .clone()
            .oneshot(with_uri(request, "/inference_zero_shot"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pcm = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!pcm.is_empty());

        let request = multipart(
            &[("tts_text", ""), ("prompt_text", "今天天氣真好")],
            Some(("prompt_wav", &wav)),
        );
        let response = router
            .oneshot(with_uri(request, "/inference_zero_shot"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = json(response).await["message"].as_str().unwrap().to_string();
        assert!(message.starts_with("Invalid input"));
    }

    #[tokio::test]
    async fn speech_returns_streamed_wav() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));

        let speech = |uri: &str| {
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"input": "今天天氣真好", "voice": "alloy"}"#))
                .unwrap()
        };

        let prefixed = router
            .clone()
            .oneshot(speech("/v1/audio/speech"))
            .await
            .unwrap();
        assert_eq!(prefixed.status(), StatusCode::OK);

        let response = router.oneshot(speech("/audio/speech")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=output.wav"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        let data_pos = bytes.windows(4).position(|w| w == b"data").unwrap();
        assert_eq!(bytes.len(), data_pos + 8 + 2 * 160 * 2);
    }

    #[tokio::test]
    async fn removing_unknown_speaker_is_not_found() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));

        let response = router
            .oneshot(form("/remove_speaker", "spk_id=nobody"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("nobody"));
    }

    #[tokio::test]
    async fn zero_shot_rejects_corrupt_prompt_audio() {
        let staging = tempfile::tempdir().unwrap();
        let (_, router) = app(context(staging.path()));

        let request = multipart(
            &[("tts_text", "明天也很好"), ("prompt_text", "今天天氣真好")],
            Some(("prompt_wav", b"not a wav at all".as_slice())),
        );
        let response = router
            .oneshot(with_uri(request, "/inference_zero_shot"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid reference audio"));
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_configured() {
        let staging = tempfile::tempdir().unwrap();
        let ctx = context(staging.path()).with_api_key(Some("secret".to_string()));
        let (_, router) = app(ctx);

        let response = router
            .clone()
            .oneshot(Request::get("/get_speakers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::get("/get_speakers")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn speaker_changes_are_written_to_the_cache() {
        let staging = tempfile::tempdir().unwrap();
        let cache = staging.path().join("cache").join("speakers.zip");
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        let ctx = context(staging.path()).with_speaker_cache(cache.clone());
        let (ctx, router) = app(ctx);

        add_voice(&router, "voiceA").await;
        assert!(cache.exists());

        let store = SpeakerStore::new(frontend(), Arc::new(StubTranscriber::new("")));
        assert_eq!(store.load(&cache).unwrap(), 1);
        assert_eq!(
            store.get("voiceA").unwrap(),
            ctx.synthesizer().store().get("voiceA").unwrap()
        );
    }
}
