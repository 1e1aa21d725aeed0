//! End-to-end tests for the coding pipeline.
//!
//! Providers are replaced by in-process implementations of the public
//! `Embedder`, `CompletionModel` and `TokenCounter` traits, so these tests
//! exercise extraction, routing, chunking, ranking and writing without any
//! network access.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Local;
use concept_coder::chunk::ChunkParams;
use concept_coder::completion::CompletionModel;
use concept_coder::config::ResultFormat;
use concept_coder::embedding::Embedder;
use concept_coder::error::{CoderError, Result, Service};
use concept_coder::models::{
    AnalysisMode, AnalysisResult, Concept, FileStatus, Payload, PromptSpec, RoutePath,
};
use concept_coder::pipeline::{CodingPipeline, RunSettings};
use concept_coder::progress::NoProgress;
use concept_coder::routing::{RoutingPolicy, TokenCounter};
use concept_coder::writer::{create_writer, write_summary, OutputNames, ResultWriter};
use tempfile::TempDir;

// ─── Test providers ─────────────────────────────────────────────────

const VOCAB: [&str; 4] = ["trust", "money", "family", "weather"];

/// Embeds a text as keyword counts over a tiny vocabulary.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Keyword embedder that remembers every batch it was asked to embed.
#[derive(Clone, Default)]
struct RecordingEmbedder {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingEmbedder {
    /// The query is embedded on its own, after every chunk batch.
    fn last_query(&self) -> String {
        let calls = self.calls.lock().unwrap();
        let last = calls.last().expect("embedder was never called");
        assert_eq!(last.len(), 1);
        last[0].clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.lock().unwrap().push(texts.to_vec());
        KeywordEmbedder.embed(texts).await
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(CoderError::upstream(
            Service::Embedding,
            "HTTP 401: invalid api key",
        ))
    }
}

/// Records every prompt it receives and answers with a fixed code.
#[derive(Clone, Default)]
struct RecordingModel {
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CompletionModel for RecordingModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("present; the speaker relies on others".to_string())
    }
}

/// One token per whitespace-separated word.
struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Keeps results in memory for inspection.
#[derive(Default)]
struct CollectingWriter {
    results: Vec<AnalysisResult>,
}

impl ResultWriter for CollectingWriter {
    fn write(&mut self, result: &AnalysisResult) -> Result<()> {
        self.results.push(result.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

const WEATHER: &str =
    "The weather was cold and grey all week, and the rain did not stop until Sunday evening.";
const NEIGHBOURS: &str =
    "She said she could trust her neighbours completely, and that trust grew over many years.";

fn settings() -> RunSettings {
    RunSettings {
        threshold: 0.5,
        max_chunks: 5,
        chunking: ChunkParams::new(120, 20),
        embedding_batch_size: 2,
        repair_encoding: true,
    }
}

fn pipeline(model: Option<RecordingModel>) -> CodingPipeline {
    CodingPipeline::new(
        settings(),
        Box::new(KeywordEmbedder),
        model.map(|m| Box::new(m) as Box<dyn CompletionModel>),
        RoutingPolicy::new(50, Box::new(WordCounter)),
    )
}

fn concept() -> Concept {
    Concept::new("Trust", "Reliance on trust between people")
}

fn prompt() -> PromptSpec {
    PromptSpec {
        system_message: "You are a qualitative coder.".to_string(),
        user_message: "Decide whether the document shows the concept.".to_string(),
        output_format: "present or absent".to_string(),
        explanations: false,
    }
}

/// A document well over the 50-word budget, one paragraph per chunk.
fn long_document(paragraphs: &[&str]) -> String {
    paragraphs.join("\n\n")
}

fn write_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

// ─── Coding ─────────────────────────────────────────────────────────

#[tokio::test]
async fn small_document_is_sent_whole() {
    let tmp = TempDir::new().unwrap();
    let file = write_file(&tmp, "note.txt", "Trust is low in this village.");
    let model = RecordingModel::default();
    let mut writer = CollectingWriter::default();

    let report = pipeline(Some(model.clone()))
        .run(
            &[file],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(
        report.files[0].status,
        FileStatus::Coded {
            route: RoutePath::Direct
        }
    );
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    let sent = model.prompts.lock().unwrap()[0].clone();
    assert!(sent.starts_with("You are a qualitative coder.\n"));
    assert!(sent.contains("The concept 'Trust' is described as follows"));
    assert!(sent.ends_with("Trust is low in this village."));

    assert_eq!(writer.results.len(), 1);
    assert_eq!(writer.results[0].route, RoutePath::Direct);
    assert_eq!(
        writer.results[0].payload,
        Payload::Completion("present; the speaker relies on others".to_string())
    );
}

#[tokio::test]
async fn large_document_sends_only_relevant_chunks() {
    let tmp = TempDir::new().unwrap();
    let text = long_document(&[WEATHER, WEATHER, NEIGHBOURS, WEATHER, WEATHER]);
    let file = write_file(&tmp, "interview.txt", &text);
    let model = RecordingModel::default();
    let mut writer = CollectingWriter::default();

    let report = pipeline(Some(model.clone()))
        .run(
            &[file],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(
        report.files[0].status,
        FileStatus::Coded {
            route: RoutePath::Retrieve
        }
    );
    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Here are the relevant chunks from the text:"));
    assert!(prompts[0].contains("neighbours"));
    assert!(!prompts[0].contains("rain"));
}

#[tokio::test]
async fn nothing_relevant_skips_the_model() {
    let tmp = TempDir::new().unwrap();
    let text = long_document(&[WEATHER, WEATHER, WEATHER, WEATHER, WEATHER]);
    let file = write_file(&tmp, "weather.txt", &text);
    let model = RecordingModel::default();
    let mut writer = CollectingWriter::default();

    let report = pipeline(Some(model.clone()))
        .run(
            &[file],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(
        report.files[0].status,
        FileStatus::NoRelevantContent {
            route: RoutePath::Retrieve
        }
    );
    assert_eq!(report.no_relevant_content(), 1);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    assert_eq!(writer.results[0].payload, Payload::NoRelevantContent);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn retrieval_mode_returns_ranked_evidence_without_a_model() {
    let tmp = TempDir::new().unwrap();
    let short = write_file(&tmp, "short.txt", NEIGHBOURS);
    let long = write_file(
        &tmp,
        "long.txt",
        &long_document(&[WEATHER, NEIGHBOURS, WEATHER, WEATHER]),
    );
    let mut writer = CollectingWriter::default();

    let report = pipeline(None)
        .run(
            &[short, long],
            &concept(),
            &PromptSpec::default(),
            AnalysisMode::Retrieval,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    for result in &writer.results {
        assert_eq!(result.route, RoutePath::Retrieve);
        let Payload::Evidence(evidence) = &result.payload else {
            panic!("expected evidence, got {:?}", result.payload);
        };
        assert_eq!(evidence.len(), 1);
        assert!(evidence[0].chunk.text.contains("neighbours"));
        assert!(evidence[0].score >= 0.5 && evidence[0].score <= 1.0);
    }
}

#[tokio::test]
async fn threshold_one_keeps_only_exact_matches() {
    let tmp = TempDir::new().unwrap();
    let file = write_file(&tmp, "long.txt", &long_document(&[WEATHER, NEIGHBOURS]));
    let mut strict = settings();
    strict.threshold = 1.0;
    let pipeline = CodingPipeline::new(
        strict,
        Box::new(KeywordEmbedder),
        None,
        RoutingPolicy::new(50, Box::new(WordCounter)),
    );
    let mut writer = CollectingWriter::default();

    let report = pipeline
        .run(
            &[file],
            &Concept::new("Trust", "money"),
            &PromptSpec::default(),
            AnalysisMode::Retrieval,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.no_relevant_content(), 1);
}

#[tokio::test]
async fn each_mode_queries_with_its_own_text() {
    let tmp = TempDir::new().unwrap();
    let file = write_file(
        &tmp,
        "interview.txt",
        &long_document(&[WEATHER, WEATHER, NEIGHBOURS, WEATHER, WEATHER]),
    );
    let concept = concept();

    let coding_embedder = RecordingEmbedder::default();
    let coding = CodingPipeline::new(
        settings(),
        Box::new(coding_embedder.clone()),
        Some(Box::new(RecordingModel::default()) as Box<dyn CompletionModel>),
        RoutingPolicy::new(50, Box::new(WordCounter)),
    );
    coding
        .run(
            &[file.clone()],
            &concept,
            &prompt(),
            AnalysisMode::Coding,
            &mut CollectingWriter::default(),
            &NoProgress,
        )
        .await
        .unwrap();
    let query = coding_embedder.last_query();
    assert!(query.starts_with("You are a qualitative coder.\n"));
    assert!(query.contains("The concept 'Trust' is described as follows"));

    let retrieval_embedder = RecordingEmbedder::default();
    let retrieval = CodingPipeline::new(
        settings(),
        Box::new(retrieval_embedder.clone()),
        None,
        RoutingPolicy::new(50, Box::new(WordCounter)),
    );
    retrieval
        .run(
            &[file],
            &concept,
            &prompt(),
            AnalysisMode::Retrieval,
            &mut CollectingWriter::default(),
            &NoProgress,
        )
        .await
        .unwrap();
    assert_eq!(retrieval_embedder.last_query(), concept.description);
}

// ─── Failures and cancellation ──────────────────────────────────────

#[tokio::test]
async fn one_bad_file_does_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let bad = write_file(&tmp, "slides.pptx", "binary");
    let good = write_file(&tmp, "note.txt", "Trust matters.");
    let model = RecordingModel::default();
    let mut writer = CollectingWriter::default();

    let report = pipeline(Some(model.clone()))
        .run(
            &[bad, good],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.files.len(), 2);
    match &report.files[0].status {
        FileStatus::Failed { kind, .. } => assert_eq!(kind, "unsupported_format"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(
        report.files[1].status,
        FileStatus::Coded {
            route: RoutePath::Direct
        }
    );
    assert_eq!(writer.results.len(), 1);
}

#[tokio::test]
async fn provider_errors_are_recorded_per_file() {
    let tmp = TempDir::new().unwrap();
    let a = write_file(&tmp, "a.txt", NEIGHBOURS);
    let b = write_file(&tmp, "b.txt", WEATHER);
    let pipeline = CodingPipeline::new(
        settings(),
        Box::new(FailingEmbedder),
        None,
        RoutingPolicy::new(50, Box::new(WordCounter)),
    );
    let mut writer = CollectingWriter::default();

    let report = pipeline
        .run(
            &[a, b],
            &concept(),
            &PromptSpec::default(),
            AnalysisMode::Retrieval,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.failed(), 2);
    assert!(writer.results.is_empty());
    match &report.files[1].status {
        FileStatus::Failed { kind, message } => {
            assert_eq!(kind, "upstream");
            assert!(message.contains("invalid api key"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_run_skips_remaining_files() {
    let tmp = TempDir::new().unwrap();
    let a = write_file(&tmp, "a.txt", "Trust.");
    let b = write_file(&tmp, "b.txt", "More trust.");
    let model = RecordingModel::default();
    let cancel = Arc::new(AtomicBool::new(true));
    let mut writer = CollectingWriter::default();

    let report = pipeline(Some(model.clone()))
        .with_cancel_flag(cancel)
        .run(
            &[a, b],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await
        .unwrap();

    assert_eq!(report.skipped(), 2);
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_level_errors_fail_before_any_file() {
    let tmp = TempDir::new().unwrap();
    let file = write_file(&tmp, "a.txt", "Trust.");
    let mut writer = CollectingWriter::default();

    let no_files = pipeline(Some(RecordingModel::default()))
        .run(
            &[],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await;
    assert!(matches!(no_files, Err(CoderError::Configuration(_))));

    let no_model = pipeline(None)
        .run(
            &[file.clone()],
            &concept(),
            &prompt(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await;
    assert!(matches!(no_model, Err(CoderError::Configuration(_))));

    let no_prompt = pipeline(Some(RecordingModel::default()))
        .run(
            &[file],
            &concept(),
            &PromptSpec::default(),
            AnalysisMode::Coding,
            &mut writer,
            &NoProgress,
        )
        .await;
    assert!(matches!(no_prompt, Err(CoderError::Configuration(_))));
    assert!(writer.results.is_empty());
}

// ─── Writers ────────────────────────────────────────────────────────

#[tokio::test]
async fn coding_run_writes_results_and_summary() {
    let tmp = TempDir::new().unwrap();
    let input = TempDir::new().unwrap();
    let file = write_file(&input, "note.txt", "Trust is low.");
    let bad = write_file(&input, "deck.pptx", "binary");
    let concept = Concept::new("Social support", "Help from family and trust in others");
    let names = OutputNames::new(tmp.path(), &concept, Local::now());
    let mut writer = create_writer(
        ResultFormat::Text,
        AnalysisMode::Coding,
        names.clone(),
        &concept.name,
    );

    let report = pipeline(Some(RecordingModel::default()))
        .run(
            &[file, bad],
            &concept,
            &prompt(),
            AnalysisMode::Coding,
            writer.as_mut(),
            &NoProgress,
        )
        .await
        .unwrap();
    let results = writer.finish().unwrap().unwrap();
    let summary = write_summary(&names, &report).unwrap();

    let name = results.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("Social_support_llm_results_"));
    let text = fs::read_to_string(&results).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains(" - note.txt - present; the speaker relies on others"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["counts"]["total"], 2);
    assert_eq!(json["counts"]["succeeded"], 1);
    assert_eq!(json["counts"]["failed"], 1);
    assert_eq!(json["files"][1]["status"], "failed");
}

#[tokio::test]
async fn retrieval_run_writes_csv_rows() {
    let tmp = TempDir::new().unwrap();
    let input = TempDir::new().unwrap();
    let file = write_file(
        &input,
        "long.txt",
        &long_document(&[WEATHER, NEIGHBOURS, WEATHER]),
    );
    let names = OutputNames::new(tmp.path(), &concept(), Local::now());
    let mut writer = create_writer(
        ResultFormat::Tabular,
        AnalysisMode::Retrieval,
        names,
        "Trust",
    );

    pipeline(None)
        .run(
            &[file],
            &concept(),
            &PromptSpec::default(),
            AnalysisMode::Retrieval,
            writer.as_mut(),
            &NoProgress,
        )
        .await
        .unwrap();
    let path = writer.finish().unwrap().unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, ["file", "text_chunk", "score"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "long.txt");
    assert!(rows[0][1].contains("neighbours"));
}
