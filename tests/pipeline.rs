//! Offline integration tests for the extraction pipeline.
//!
//! The rasteriser and the model client are replaced with in-process stubs, so
//! these run without pdfium, network access or API keys.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_docextract::pipeline::provider::FIRST_PASS_MODEL;
use edgequake_docextract::prompts::FIRST_PASS_PROMPT;
use edgequake_docextract::{
    DocumentExtractor, ExtractError, ExtractionInput, ExtractionProgressCallback, ExtractionStage,
    ExtractorConfig, MediaType, ModelClient, PageSelection, ProviderKind, ProviderRequest,
    Rasterizer,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Page `i` is 40×30 white with a black (i+2)×3 block at (5, 4).
fn page_image(i: usize) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(40, 30, WHITE);
    for x in 5..5 + i as u32 + 2 {
        for y in 4..7 {
            img.put_pixel(x, y, BLACK);
        }
    }
    img
}

struct FakeRasterizer(usize);

impl Rasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _bytes: &[u8],
        _scale: f32,
        _font: Option<&str>,
    ) -> Result<Vec<DynamicImage>, ExtractError> {
        Ok((0..self.0)
            .map(|i| DynamicImage::ImageRgba8(page_image(i)))
            .collect())
    }
}

struct BrokenRasterizer;

impl Rasterizer for BrokenRasterizer {
    fn rasterize(
        &self,
        _bytes: &[u8],
        _scale: f32,
        _font: Option<&str>,
    ) -> Result<Vec<DynamicImage>, ExtractError> {
        Err(ExtractError::RasterisationFailed {
            detail: "trailer not found".into(),
        })
    }
}

/// Page 1 of 3 is a zero-sized image, which no encoder accepts.
struct ZeroSizedPageRasterizer;

impl Rasterizer for ZeroSizedPageRasterizer {
    fn rasterize(
        &self,
        _bytes: &[u8],
        _scale: f32,
        _font: Option<&str>,
    ) -> Result<Vec<DynamicImage>, ExtractError> {
        Ok(vec![
            DynamicImage::ImageRgba8(page_image(0)),
            DynamicImage::ImageRgba8(RgbaImage::new(0, 0)),
            DynamicImage::ImageRgba8(page_image(1)),
        ])
    }
}

/// Replies with queued texts wrapped in the provider's envelope and records
/// every request. Flags overlapping calls.
#[derive(Default)]
struct StubClient {
    replies: Mutex<VecDeque<Result<String, ExtractError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    in_flight: AtomicBool,
    overlapped: AtomicBool,
}

impl StubClient {
    fn replying(replies: &[&str]) -> Arc<Self> {
        let client = Self::default();
        *client.replies.lock().unwrap() = replies.iter().map(|r| Ok(r.to_string())).collect();
        Arc::new(client)
    }

    fn failing(err: ExtractError) -> Arc<Self> {
        let client = Self::default();
        client.replies.lock().unwrap().push_back(Err(err));
        Arc::new(client)
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for StubClient {
    async fn call(&self, request: &ProviderRequest) -> Result<Value, ExtractError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()));
        self.in_flight.store(false, Ordering::SeqCst);

        let text = reply?;
        Ok(match request.provider {
            ProviderKind::OpenAi => json!({"choices": [{"message": {"content": text}}]}),
            ProviderKind::Anthropic => json!({"content": [{"type": "text", "text": text}]}),
        })
    }
}

#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<ExtractionStage>>,
    pages: Mutex<Option<usize>>,
    calls: Mutex<Vec<(usize, usize)>>,
    completed: Mutex<Option<bool>>,
}

impl ExtractionProgressCallback for Recorder {
    fn on_stage(&self, stage: ExtractionStage) {
        self.stages.lock().unwrap().push(stage);
    }
    fn on_pages_ready(&self, page_count: usize) {
        *self.pages.lock().unwrap() = Some(page_count);
    }
    fn on_model_call(&self, pass: usize, total_passes: usize) {
        self.calls.lock().unwrap().push((pass, total_passes));
    }
    fn on_complete(&self, success: bool) {
        *self.completed.lock().unwrap() = Some(success);
    }
}

fn config(model: &str) -> ExtractorConfig {
    ExtractorConfig::builder()
        .api_key("test-key")
        .model(model)
        .build()
        .unwrap()
}

fn extractor(
    config: ExtractorConfig,
    client: Arc<StubClient>,
    rasterizer: Arc<dyn Rasterizer>,
) -> DocumentExtractor {
    DocumentExtractor::new(config)
        .unwrap()
        .with_client(client)
        .with_rasterizer(rasterizer)
}

/// Shared sink for formatted tracing output.
#[derive(Clone, Default)]
struct TraceBuffer(Arc<Mutex<Vec<u8>>>);

impl TraceBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for TraceBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn pdf_input(prompt: &str) -> ExtractionInput {
    ExtractionInput::new(b"%PDF-1.7 stub".to_vec(), MediaType::Pdf, prompt)
}

fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Decode the base64 images of an Anthropic request body, in order.
fn anthropic_images(body: &Value) -> Vec<(String, DynamicImage)> {
    body["messages"][0]["content"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|b| b["type"] == "image")
        .map(|b| {
            let bytes = STANDARD.decode(b["source"]["data"].as_str().unwrap()).unwrap();
            (
                b["source"]["media_type"].as_str().unwrap().to_string(),
                image::load_from_memory(&bytes).unwrap(),
            )
        })
        .collect()
}

fn anthropic_text(body: &Value) -> String {
    body["messages"][0]["content"]
        .as_array()
        .unwrap()
        .iter()
        .rev()
        .find(|b| b["type"] == "text")
        .and_then(|b| b["text"].as_str())
        .unwrap()
        .to_string()
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_pdf_with_fenced_reply() {
    let client = StubClient::replying(&["```json\n{\"total\":\"42\"}\n```"]);
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(2)),
    );

    let value = ex.extract(pdf_input("total")).await.unwrap();
    assert_eq!(value, json!({"total": "42"}));

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let parts = requests[0].body["messages"][1]["content"].as_array().unwrap();
    assert_eq!(parts.len(), 2, "one image part per page");
    for part in parts {
        let url = part["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"), "{url}");
    }
}

#[tokio::test]
async fn pages_are_cropped_and_sent_in_order() {
    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("claude-3-opus-20240229"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(3)),
    );

    ex.extract(pdf_input("anything")).await.unwrap();

    let images = anthropic_images(&client.requests()[0].body);
    let dims: Vec<(u32, u32)> = images.iter().map(|(_, i)| (i.width(), i.height())).collect();
    assert_eq!(dims, vec![(2, 3), (3, 3), (4, 3)]);
    assert!(images.iter().all(|(mime, _)| mime == "image/png"));
}

#[tokio::test]
async fn stats_count_only_pages_that_were_sent() {
    let client = StubClient::replying(&["{}"]);
    let recorder = Arc::new(Recorder::default());
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .model("claude-3-opus-20240229")
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let ex = extractor(config, Arc::clone(&client), Arc::new(ZeroSizedPageRasterizer));

    let out = ex.extract_detailed(pdf_input("anything")).await.unwrap();

    let images = anthropic_images(&client.requests()[0].body);
    assert_eq!(images.len(), 2);
    assert_eq!(out.stats.page_count, images.len());
    assert_eq!(*recorder.pages.lock().unwrap(), Some(3));
}

#[tokio::test]
async fn page_selection_first_and_last() {
    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("claude-3-haiku-20240307"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(5)),
    );

    let out = ex
        .extract_detailed(pdf_input("x").pages(PageSelection::FirstAndLast))
        .await
        .unwrap();
    assert_eq!(out.stats.page_count, 2);

    let widths: Vec<u32> = anthropic_images(&client.requests()[0].body)
        .iter()
        .map(|(_, i)| i.width())
        .collect();
    assert_eq!(widths, vec![2, 6]);
}

#[tokio::test]
async fn single_page_first_and_last_sends_page_twice() {
    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("claude-3-haiku-20240307"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(1)),
    );

    ex.extract(pdf_input("x").pages(PageSelection::FirstAndLast))
        .await
        .unwrap();
    assert_eq!(anthropic_images(&client.requests()[0].body).len(), 2);
}

#[tokio::test]
async fn image_input_from_data_uri() {
    let mut img = RgbaImage::from_pixel(50, 40, WHITE);
    for x in 10..20 {
        for y in 5..15 {
            img.put_pixel(x, y, Rgba([200, 10, 10, 255]));
        }
    }
    let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(&img)));

    let client = StubClient::replying(&["{merchant: 'ACME', total: '9.99',}"]);
    let ex = extractor(
        config("claude-3-sonnet-20240229"),
        Arc::clone(&client),
        Arc::new(BrokenRasterizer),
    );

    let value = ex
        .extract(ExtractionInput::new(data_uri, MediaType::Png, "merchant and total"))
        .await
        .unwrap();
    assert_eq!(value, json!({"merchant": "ACME", "total": "9.99"}));

    let images = anthropic_images(&client.requests()[0].body);
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].0, "image/png");
    assert_eq!((images[0].1.width(), images[0].1.height()), (10, 10));
}

#[tokio::test]
async fn jpg_input_is_presented_as_jpeg() {
    let img = page_image(0);
    let mut jpg = Vec::new();
    DynamicImage::ImageRgba8(img)
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut jpg), ImageFormat::Jpeg)
        .unwrap();

    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("claude-3-haiku-20240307"),
        Arc::clone(&client),
        Arc::new(BrokenRasterizer),
    );
    ex.extract(ExtractionInput::new(jpg, MediaType::Jpg, "x"))
        .await
        .unwrap();

    let body = &client.requests()[0].body;
    assert_eq!(
        body["messages"][0]["content"][0]["source"]["media_type"],
        "image/jpeg"
    );
}

// ── Two-pass ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_pass_issues_two_sequential_calls() {
    let first = "Invoice 7\nTotal: 42 EUR\nDue: 2024-03-01";
    let client = StubClient::replying(&[first, "{\"total\": \"42\"}"]);
    let recorder = Arc::new(Recorder::default());
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .model("claude-3-opus-20240229")
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let ex = extractor(config, Arc::clone(&client), Arc::new(FakeRasterizer(2)));

    let out = ex
        .extract_detailed(pdf_input("total").multiple_passes(true))
        .await
        .unwrap();
    assert_eq!(out.data, json!({"total": "42"}));
    assert_eq!(out.first_pass_text.as_deref(), Some(first));
    assert_eq!(out.stats.model_calls, 2);

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert!(!client.overlapped.load(Ordering::SeqCst), "calls overlapped");

    // First pass: fixed model, open-ended prompt before the images.
    assert_eq!(requests[0].model, FIRST_PASS_MODEL);
    let first_blocks = requests[0].body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(first_blocks[0]["text"], FIRST_PASS_PROMPT);
    assert_eq!(anthropic_images(&requests[0].body).len(), 2);

    // Second pass: configured model, prompt prefixed by the first output.
    assert_eq!(requests[1].model, "claude-3-opus-20240229");
    let text = anthropic_text(&requests[1].body);
    assert!(text.starts_with(first), "got: {text}");
    assert!(text.contains("Find: total"), "got: {text}");

    assert_eq!(*recorder.calls.lock().unwrap(), vec![(1, 2), (2, 2)]);
}

#[tokio::test]
async fn config_default_enables_two_pass() {
    let client = StubClient::replying(&["notes", "{}"]);
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .model("claude-3-haiku-20240307")
        .multiple_passes(true)
        .build()
        .unwrap();
    let ex = extractor(config, Arc::clone(&client), Arc::new(FakeRasterizer(1)));

    ex.extract(pdf_input("x")).await.unwrap();
    assert_eq!(client.requests().len(), 2);

    // A per-call override wins over the config default.
    let client = StubClient::replying(&["{}"]);
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .model("claude-3-haiku-20240307")
        .multiple_passes(true)
        .build()
        .unwrap();
    let ex = extractor(config, Arc::clone(&client), Arc::new(FakeRasterizer(1)));
    ex.extract(pdf_input("x").multiple_passes(false)).await.unwrap();
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn openai_two_pass_runs_single_call() {
    let client = StubClient::replying(&["{\"a\": \"1\"}"]);
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(1)),
    );

    let out = ex
        .extract_detailed(pdf_input("a").multiple_passes(true))
        .await
        .unwrap();
    assert_eq!(out.stats.model_calls, 1);
    assert!(out.first_pass_text.is_none());
    assert_eq!(client.requests().len(), 1);
}

// ── Degradation and failure ──────────────────────────────────────────────────

#[tokio::test]
async fn rasterisation_failure_still_calls_model_without_images() {
    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(BrokenRasterizer),
    );

    let out = ex.extract_detailed(pdf_input("x")).await.unwrap();
    assert_eq!(out.data, json!({}));
    assert_eq!(out.stats.page_count, 0);

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let parts = requests[0].body["messages"][1]["content"].as_array().unwrap();
    assert!(parts.is_empty());
}

#[tokio::test]
async fn empty_model_reply_is_empty_object() {
    let client = StubClient::replying(&[""]);
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(1)),
    );
    assert_eq!(ex.extract(pdf_input("x")).await.unwrap(), json!({}));
}

#[tokio::test]
async fn model_error_propagates_once() {
    let client = StubClient::failing(ExtractError::RateLimitExceeded {
        provider: "openai".into(),
        retry_after_secs: Some(5),
    });
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(1)),
    );

    let err = ex.extract(pdf_input("x")).await.unwrap_err();
    assert!(matches!(err, ExtractError::RateLimitExceeded { .. }), "{err}");
    assert_eq!(client.requests().len(), 1, "no retry");
}

#[tokio::test]
async fn invalid_base64_fails_before_any_call() {
    let client = StubClient::replying(&["{}"]);
    let ex = extractor(
        config("gpt-4-turbo"),
        Arc::clone(&client),
        Arc::new(FakeRasterizer(1)),
    );

    let err = ex
        .extract(ExtractionInput::new("data:image/png;base64,@@@", MediaType::Png, "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::InvalidBase64 { .. }), "{err}");
    assert!(client.requests().is_empty());
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stages_are_reported_in_order() {
    let recorder = Arc::new(Recorder::default());
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let ex = extractor(
        config,
        StubClient::replying(&["{}"]),
        Arc::new(FakeRasterizer(3)),
    );

    ex.extract(pdf_input("x")).await.unwrap();

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            ExtractionStage::ReceivingInput,
            ExtractionStage::Paginating,
            ExtractionStage::Cropping,
            ExtractionStage::Requesting,
            ExtractionStage::ParsingResult,
            ExtractionStage::Done,
        ]
    );
    assert_eq!(*recorder.pages.lock().unwrap(), Some(3));
    assert_eq!(*recorder.calls.lock().unwrap(), vec![(1, 1)]);
    assert_eq!(*recorder.completed.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn malformed_output_reports_failed_stage() {
    let recorder = Arc::new(Recorder::default());
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let ex = extractor(
        config,
        StubClient::replying(&["I could not find a total on this page."]),
        Arc::new(FakeRasterizer(1)),
    );

    let err = ex.extract(pdf_input("total")).await.unwrap_err();
    assert!(matches!(err, ExtractError::MalformedModelOutput { .. }), "{err}");

    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(
        &stages[stages.len() - 2..],
        &[ExtractionStage::ParsingResult, ExtractionStage::Failed]
    );
    assert_eq!(*recorder.completed.lock().unwrap(), Some(false));
}

// ── Debug mode and sync wrapper ─────────────────────────────────────────────

/// Two-pass Anthropic run through `extract_sync`, with tracing captured.
fn sync_run_with_traces(debug: bool) -> (Result<Value, ExtractError>, String) {
    let client = StubClient::replying(&["Invoice 7 total 42", "{\"total\":\"42\"}"]);
    let config = ExtractorConfig::builder()
        .api_key("test-key")
        .model("claude-3-opus-20240229")
        .debug(debug)
        .build()
        .unwrap();
    let ex = extractor(config, Arc::clone(&client), Arc::new(FakeRasterizer(2)));

    let buffer = TraceBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, || {
        ex.extract_sync(pdf_input("total").multiple_passes(true))
    });

    assert_eq!(client.requests().len(), 2);
    (result, buffer.contents())
}

#[test]
fn debug_mode_traces_stages_without_changing_result() {
    let (plain, quiet_log) = sync_run_with_traces(false);
    let (traced, debug_log) = sync_run_with_traces(true);

    assert_eq!(plain.unwrap(), json!({"total": "42"}));
    assert_eq!(traced.unwrap(), json!({"total": "42"}));

    for needle in [
        "Document: 13 bytes of application/pdf",
        "Page count: 2",
        "Image 2 (",
        "data:image/png;base64,",
        "Prompt: total",
        "First pass output: Invoice 7 total 42",
        "Raw model output: {\"total\":\"42\"}",
        "Cleaned model output: {\"total\":\"42\"}",
    ] {
        assert!(debug_log.contains(needle), "missing {needle:?} in:\n{debug_log}");
        assert!(!quiet_log.contains(needle), "unexpected {needle:?} in:\n{quiet_log}");
    }
}

// ── File output ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_to_file_writes_pretty_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/result.json");

    let ex = extractor(
        config("gpt-4-turbo"),
        StubClient::replying(&["{\"id\": \"INV-7\"}"]),
        Arc::new(FakeRasterizer(1)),
    );
    let stats = ex.extract_to_file(pdf_input("id"), &path).await.unwrap();
    assert_eq!(stats.page_count, 1);

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, json!({"id": "INV-7"}));
    assert!(!path.with_extension("json.tmp").exists());
}
