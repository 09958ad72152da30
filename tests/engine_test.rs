//! End-to-end engine tests against a mocked provider and a capturing
//! chat transport. No API keys or network access required.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imago::{
    ChatOutbound, Engine, ImageMessage, IncomingImage, ManualClock, Settings, TextMessage,
};
use serde_json::json;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String),
    Image(Vec<u8>),
}

#[derive(Default)]
struct CapturingOutbound {
    sent: Mutex<Vec<Sent>>,
}

impl CapturingOutbound {
    async fn messages(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    async fn texts(&self) -> Vec<String> {
        self.messages()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Sent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    async fn images(&self) -> Vec<Vec<u8>> {
        self.messages()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Sent::Image(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatOutbound for CapturingOutbound {
    async fn send_text(&self, _target: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().await.push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_image(&self, _target: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.sent.lock().await.push(Sent::Image(bytes.to_vec()));
        Ok(())
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        8,
        8,
        image::Rgb([200, 30, 60]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn test_settings(server: &MockServer) -> Settings {
    let mut settings = Settings::default();
    settings.api.base_url = server.uri();
    settings.api.model = "test-model".to_string();
    settings.translate.enable = false;
    for policy in [
        &mut settings.retry.generate,
        &mut settings.retry.edit,
        &mut settings.retry.analysis,
    ] {
        policy.initial_delay_ms = 1;
        policy.max_delay_ms = 2;
    }
    settings
}

fn engine(server: &MockServer, temp: &TempDir) -> Engine {
    Engine::new(
        test_settings(server),
        "test-key".to_string(),
        None,
        temp.path().to_path_buf(),
    )
    .unwrap()
}

fn text_msg(content: &str) -> TextMessage {
    TextMessage {
        chat_id: "room".to_string(),
        sender_id: "alice".to_string(),
        content: content.to_string(),
    }
}

fn image_msg(bytes: &[u8]) -> ImageMessage {
    ImageMessage {
        chat_id: "room".to_string(),
        sender_id: "alice".to_string(),
        image: IncomingImage::Base64(BASE64.encode(bytes)),
    }
}

fn image_response(bytes: &[u8]) -> serde_json::Value {
    json!({
        "candidates": [{
            "finishReason": "STOP",
            "content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": BASE64.encode(bytes)}}
            ]}
        }]
    })
}

const GENERATE_PATH: &str = "/v1beta/models/test-model:generateContent";

#[tokio::test]
async fn test_generate_sends_exactly_one_image_and_no_text() {
    let server = MockServer::start().await;
    let generated = png_bytes();
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&generated)))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    let consumed = !engine
        .handle_text(&out, &text_msg("/imagine a red bicycle"))
        .await;
    assert!(consumed);

    // One image delivery, zero text sends (no duplicate confirmations).
    assert_eq!(out.images().await, vec![generated]);
    assert!(out.texts().await.is_empty());
}

#[tokio::test]
async fn test_generate_then_edit_reuses_cached_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&png_bytes())))
        .expect(2)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/imagine a red bicycle"))
        .await;
    engine
        .handle_text(&out, &text_msg("/edit make it blue"))
        .await;

    // Two images delivered; the edit announced progress and, being the
    // first edit turn, sent the session guidance.
    assert_eq!(out.images().await.len(), 2);
    let texts = out.texts().await;
    assert!(texts.iter().any(|t| t.contains("Editing the image")));
    assert!(texts.iter().any(|t| t.contains("/end")));
}

#[tokio::test]
async fn test_edit_without_any_image_sends_guidance_and_skips_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/edit make it blue"))
        .await;

    let texts = out.texts().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("No recent image"));
}

#[tokio::test]
async fn test_empty_prompt_gets_usage_hint() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/imagine")).await;

    let texts = out.texts().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("/imagine"));
}

#[tokio::test]
async fn test_unknown_text_falls_through() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    let fall_through = engine.handle_text(&out, &text_msg("hello there")).await;
    assert!(fall_through);
    assert!(out.messages().await.is_empty());
}

#[tokio::test]
async fn test_safety_refusal_reaches_the_user_localized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/imagine something dubious"))
        .await;

    let texts = out.texts().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("safety"));
    assert!(out.images().await.is_empty());
}

#[tokio::test]
async fn test_blocked_prompt_names_the_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/imagine nope")).await;

    let texts = out.texts().await;
    assert!(texts[0].contains("PROHIBITED_CONTENT"));
}

#[tokio::test]
async fn test_transport_failure_becomes_one_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/imagine a cat")).await;

    let texts = out.texts().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("too frequent"));
}

#[tokio::test]
async fn test_merge_two_phase_flow() {
    let server = MockServer::start().await;
    let merged = png_bytes();
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&merged)))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/merge put the cat in the landscape"))
        .await;
    assert!(out.texts().await[0].contains("first image"));

    // First image: acknowledged, no provider call yet.
    let consumed = !engine.handle_image(&out, &image_msg(b"image-a")).await;
    assert!(consumed);
    assert!(out
        .texts()
        .await
        .iter()
        .any(|t| t.contains("send the second")));
    assert!(out.images().await.is_empty());

    // Second image completes the merge.
    let consumed = !engine.handle_image(&out, &image_msg(b"image-b")).await;
    assert!(consumed);
    assert_eq!(out.images().await, vec![merged]);

    // All merge waiting state is gone: the next image is not claimed.
    let fall_through = engine.handle_image(&out, &image_msg(b"image-c")).await;
    assert!(fall_through);
}

#[tokio::test]
async fn test_merge_failure_still_clears_waiting_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"finishReason": "IMAGE_SAFETY"}]
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/merge blend them")).await;
    engine.handle_image(&out, &image_msg(b"image-a")).await;
    engine.handle_image(&out, &image_msg(b"image-b")).await;

    assert!(out.texts().await.iter().any(|t| t.contains("Merge failed")));
    // Whether success or failure, the two-phase state is cleared.
    let fall_through = engine.handle_image(&out, &image_msg(b"image-c")).await;
    assert!(fall_through);
}

#[tokio::test]
async fn test_reverse_flow_returns_prompt_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "a watercolor fox in a forest"}]}
            }]
        })))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/reverse")).await;
    engine.handle_image(&out, &image_msg(&png_bytes())).await;

    let texts = out.texts().await;
    assert!(texts.iter().any(|t| t.contains("watercolor fox")));
}

#[tokio::test]
async fn test_analysis_then_follow_up_within_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "it is a lighthouse"}]}
            }]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/describe")).await;
    engine.handle_image(&out, &image_msg(&png_bytes())).await;
    engine
        .handle_text(&out, &text_msg("/followup what color is it"))
        .await;

    let texts = out.texts().await;
    assert_eq!(
        texts
            .iter()
            .filter(|t| t.contains("it is a lighthouse"))
            .count(),
        2
    );
    // Analysis replies advertise the follow-up window.
    assert!(texts.iter().any(|t| t.contains("/followup")));
}

#[tokio::test]
async fn test_follow_up_without_prior_analysis() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/followup what is it"))
        .await;

    let texts = out.texts().await;
    assert!(texts[0].contains("No recent image analysis"));
}

#[tokio::test]
async fn test_waiting_flow_expires_lazily_at_image_arrival() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());
    let engine = Engine::with_clock(
        test_settings(&server),
        "test-key".to_string(),
        None,
        temp.path().to_path_buf(),
        clock.clone(),
    )
    .unwrap();
    let out = CapturingOutbound::default();

    engine.handle_text(&out, &text_msg("/reverse")).await;
    clock.advance(Duration::from_secs(181));

    let consumed = !engine.handle_image(&out, &image_msg(b"too-late")).await;
    assert!(consumed);
    let texts = out.texts().await;
    assert!(texts.last().unwrap().contains("too late"));

    // The expired expectation is discarded: the next image falls through.
    let fall_through = engine.handle_image(&out, &image_msg(b"later")).await;
    assert!(fall_through);
}

#[tokio::test]
async fn test_end_session_clears_state() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&png_bytes())))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/imagine a red bicycle"))
        .await;
    engine.handle_text(&out, &text_msg("/end")).await;

    assert!(out.texts().await.iter().any(|t| t.contains("Session ended")));

    // The cached image is gone, so an edit now asks for an image.
    engine.handle_text(&out, &text_msg("/edit recolor")).await;
    assert!(out
        .texts()
        .await
        .iter()
        .any(|t| t.contains("No recent image")));
}

#[tokio::test]
async fn test_uploaded_image_is_editable_without_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&png_bytes())))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    // An unsolicited image upload is cached and passes through.
    let fall_through = engine.handle_image(&out, &image_msg(&png_bytes())).await;
    assert!(fall_through);

    engine
        .handle_text(&out, &text_msg("/edit brighten it"))
        .await;
    assert_eq!(out.images().await.len(), 1);
}

#[tokio::test]
async fn test_inbound_image_path_is_normalized() {
    let server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    let upload = temp.path().join("upload.png");
    std::fs::write(&upload, png_bytes()).unwrap();

    let message = ImageMessage {
        chat_id: "room".to_string(),
        sender_id: "alice".to_string(),
        image: IncomingImage::Path(PathBuf::from(&upload)),
    };
    // Cached only; no pending flow.
    assert!(engine.handle_image(&out, &message).await);
}

#[tokio::test]
async fn test_reference_edit_flow() {
    let server = MockServer::start().await;
    let edited = png_bytes();
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&edited)))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let engine = engine(&server, &temp);
    let out = CapturingOutbound::default();

    engine
        .handle_text(&out, &text_msg("/reference put it on a beach"))
        .await;
    assert!(out.texts().await[0].contains("reference image"));

    engine.handle_image(&out, &image_msg(&png_bytes())).await;
    assert_eq!(out.images().await, vec![edited]);
}
