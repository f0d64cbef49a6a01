//! Deterministic collaborators for driving the loop in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use arag_core::llm::OutputSchema;
use arag_core::{
    Document, Generator, RagError, Result, SearchBackend, SearchMode, SearchRequest, WebResult,
    WebSearch,
};
use async_trait::async_trait;
use serde_json::{Value, json};

/// What the generator was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Rewrite,
    Answer,
    GradeAnswer,
    Grounding,
}

/// A generator that answers from a script and records every call.
///
/// Answer grades are consumed in order; once the queue is empty the last
/// configured default is repeated.
pub struct ScriptedGenerator {
    rewrite: Option<String>,
    answer: Option<String>,
    grades: Mutex<VecDeque<Option<Value>>>,
    default_grade: Option<Value>,
    grounding: Option<bool>,
    calls: Mutex<Vec<Call>>,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self {
            rewrite: None,
            answer: Some("scripted answer".to_string()),
            grades: Mutex::new(VecDeque::new()),
            default_grade: Some(grade(0.9, true)),
            grounding: Some(false),
            calls: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

pub fn grade(relevance: f64, sufficient: bool) -> Value {
    json!({"relevance": relevance, "uses_citations": true, "sufficient": sufficient})
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to query rewrites with `text`.
    pub fn rewriting_to(mut self, text: &str) -> Self {
        self.rewrite = Some(text.to_string());
        self
    }

    /// Fail every answer generation call.
    pub fn failing_answers(mut self) -> Self {
        self.answer = None;
        self
    }

    /// Queue answer grades; `None` makes that grading call fail.
    pub fn with_grades(self, grades: Vec<Option<Value>>) -> Self {
        *self.grades.lock().unwrap() = grades.into();
        self
    }

    /// Grade used once the queue is exhausted; `None` fails every call.
    pub fn with_default_grade(mut self, grade: Option<Value>) -> Self {
        self.default_grade = grade;
        self
    }

    /// Grounding verdict; `None` fails every call.
    pub fn with_grounding(mut self, hallucination: Option<bool>) -> Self {
        self.grounding = hallucination;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn record(&self, call: Call, prompt: &str) {
        self.calls.lock().unwrap().push(call);
        self.prompts.lock().unwrap().push(prompt.to_string());
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Return only the query") {
            self.record(Call::Rewrite, prompt);
            return self.rewrite.clone().ok_or_else(|| RagError::generation("no rewrite scripted"));
        }
        self.record(Call::Answer, prompt);
        self.answer.clone().ok_or_else(|| RagError::generation("answer model down"))
    }

    async fn complete_structured(&self, prompt: &str, schema: &OutputSchema) -> Result<Value> {
        match schema.name {
            "answer_grade" => {
                self.record(Call::GradeAnswer, prompt);
                let next = self.grades.lock().unwrap().pop_front();
                next.unwrap_or_else(|| self.default_grade.clone())
                    .ok_or_else(|| RagError::generation("grader down"))
            }
            "grounding_grade" => {
                self.record(Call::Grounding, prompt);
                self.grounding
                    .map(|h| json!({ "hallucination": h }))
                    .ok_or_else(|| RagError::generation("grounding checker down"))
            }
            other => Err(RagError::generation(format!("unexpected schema {other}"))),
        }
    }
}

/// A backend replaying queued result lists per mode.
///
/// Each call pops the next list for its mode; the last list repeats.
pub struct ScriptedBackend {
    dense: Mutex<VecDeque<Vec<Document>>>,
    lexical: Mutex<VecDeque<Vec<Document>>>,
    failing: bool,
    queries: Mutex<Vec<(SearchMode, String)>>,
}

impl ScriptedBackend {
    pub fn rounds(dense: Vec<Vec<Document>>, lexical: Vec<Vec<Document>>) -> Self {
        Self {
            dense: Mutex::new(dense.into()),
            lexical: Mutex::new(lexical.into()),
            failing: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(dense: Vec<Document>, lexical: Vec<Document>) -> Self {
        Self::rounds(vec![dense], vec![lexical])
    }

    pub fn empty() -> Self {
        Self::fixed(Vec::new(), Vec::new())
    }

    pub fn failing() -> Self {
        Self { failing: true, ..Self::empty() }
    }

    pub fn queries(&self) -> Vec<(SearchMode, String)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn next(queue: &Mutex<VecDeque<Vec<Document>>>) -> Vec<Document> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 { queue.pop_front().unwrap_or_default() } else { queue.front().cloned().unwrap_or_default() }
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<Document>> {
        self.queries.lock().unwrap().push((request.mode, request.query.to_string()));
        if self.failing {
            return Err(RagError::RetrievalUnavailable {
                backend: "scripted".to_string(),
                message: "index offline".to_string(),
            });
        }
        Ok(match request.mode {
            SearchMode::Dense => Self::next(&self.dense),
            SearchMode::Lexical => Self::next(&self.lexical),
        })
    }
}

/// A web search returning fixed results.
pub struct ScriptedWeb {
    results: Option<Vec<WebResult>>,
    calls: AtomicUsize,
}

impl ScriptedWeb {
    pub fn returning(results: Vec<WebResult>) -> Self {
        Self { results: Some(results), calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { results: None, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for ScriptedWeb {
    fn name(&self) -> &str {
        "scripted-web"
    }

    async fn search(&self, _query: &str) -> Result<Vec<WebResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.clone().ok_or_else(|| RagError::WebSearchUnavailable {
            provider: "scripted-web".to_string(),
            message: "rate limited".to_string(),
        })
    }
}

pub fn doc(source: &str, page: i64, score: f64) -> Document {
    Document::new(format!("passage from {source} page {page}"), source, page, score)
}

/// Three documents that clear every evidence threshold.
pub fn strong_docs() -> Vec<Document> {
    vec![doc("guide.pdf", 1, 0.9), doc("guide.pdf", 2, 0.8), doc("faq.pdf", 4, 0.7)]
}

/// Documents that never clear the coverage floor.
pub fn weak_docs() -> Vec<Document> {
    vec![doc("misc.pdf", 7, 0.1), doc("misc.pdf", 8, 0.05)]
}

pub fn web_result(url: &str, score: f64) -> WebResult {
    WebResult { url: url.to_string(), content: format!("web page {url}"), score: Some(score) }
}
