use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use super::parse::{parse_rerank_scores, parse_sub_questions};
use super::provider::{Embedder, QueryDecomposer, RerankCandidate, RerankOutcome, Reranker};
use super::types::{ChatCompletionResponse, ChatMessage, ChatRequest, EmbeddingResponse};
use crate::core::config::LlmSettings;
use crate::core::errors::RetrievalError;
use crate::query::QueryType;

/// Client for any server speaking the OpenAI `/v1/embeddings` and
/// `/v1/chat/completions` dialect (LM Studio, llama.cpp server, vLLM, OpenAI).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    client: Client,
    api_key: Option<String>,
    embedding_model: String,
    rerank_model: String,
    decompose_model: String,
    embed_batch_size: usize,
}

impl OpenAiCompatClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(RetrievalError::internal)?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            embedding_model: settings.embedding_model.clone(),
            rerank_model: settings.rerank_model.clone(),
            decompose_model: settings
                .decompose_model
                .clone()
                .unwrap_or_else(|| settings.rerank_model.clone()),
            embed_batch_size: settings.embed_batch_size.max(1),
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, String> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(format!("{path} returned {status}: {text}"));
        }
        Ok(res)
    }

    pub async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, RetrievalError> {
        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let res = self
            .post("/v1/chat/completions", &body)
            .await
            .map_err(RetrievalError::Internal)?;
        let payload: ChatCompletionResponse = res.json().await.map_err(RetrievalError::malformed)?;

        payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RetrievalError::MalformedResponse("chat response had no choices".to_string()))
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let body = json!({
            "model": self.embedding_model,
            "input": inputs,
        });

        let res = self
            .post("/v1/embeddings", &body)
            .await
            .map_err(|e| RetrievalError::vector(format!("embedding request failed: {e}")))?;
        let payload: EmbeddingResponse = res.json().await.map_err(RetrievalError::malformed)?;

        if payload.data.len() != inputs.len() {
            return Err(RetrievalError::MalformedResponse(format!(
                "requested {} embeddings, received {}",
                inputs.len(),
                payload.data.len()
            )));
        }

        let mut items = payload.data;
        if items.iter().all(|item| item.index.is_some()) {
            items.sort_by_key(|item| item.index);
        }
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

fn rerank_instruction(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Error => {
            "The user is debugging an error. Favour passages that explain its cause or show a fix, \
             especially ones quoting the same error text, code or stack frame."
        }
        QueryType::Howto => {
            "The user wants to accomplish a task. Favour concrete instructions and worked examples \
             over background material."
        }
        QueryType::Concept => {
            "The user wants to understand an idea. Favour passages that explain how and why it \
             works over passages that merely mention it."
        }
        QueryType::CodeLookup => {
            "The user is looking for specific code. Favour passages containing the definition or a \
             direct usage of the referenced identifier."
        }
        QueryType::ApiReference => {
            "The user is looking up an API. Favour reference entries documenting the signature and \
             return value of the named symbol."
        }
        QueryType::General => "Favour passages that directly answer the question.",
    }
}

fn rerank_prompt(query: &str, query_type: QueryType, candidates: &[RerankCandidate]) -> String {
    let mut prompt = format!("Question: {query}\n\nCandidates:\n");
    for (index, candidate) in candidates.iter().enumerate() {
        let heading = match &candidate.section {
            Some(section) if !section.is_empty() => format!("{} / {}", candidate.title, section),
            _ => candidate.title.clone(),
        };
        prompt.push_str(&format!(
            "\n[{index}] ({}) {heading}\n{}\n",
            candidate.content_type, candidate.preview
        ));
    }
    prompt.push_str(&format!(
        "\n{}\nRate every candidate's relevance to the question from 0.0 to 1.0. \
         Respond with ONLY a JSON array of {} objects like {{\"index\": 0, \"score\": 0.7}}.",
        rerank_instruction(query_type),
        candidates.len()
    ));
    prompt
}

#[async_trait]
impl Embedder for OpenAiCompatClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embed_batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Reranker for OpenAiCompatClient {
    async fn score(
        &self,
        query: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
    ) -> Result<RerankOutcome, RetrievalError> {
        if candidates.is_empty() {
            return Ok(RerankOutcome { scores: Vec::new() });
        }

        let request = ChatRequest::new(vec![
            ChatMessage::system("You grade documentation passages for a search engine."),
            ChatMessage::user(rerank_prompt(query, query_type, candidates)),
        ])
        .temperature(0.0);

        let content = self
            .chat(request, &self.rerank_model)
            .await
            .map_err(|e| RetrievalError::RerankFailure(e.to_string()))?;
        parse_rerank_scores(&content, candidates.len())
    }
}

#[async_trait]
impl QueryDecomposer for OpenAiCompatClient {
    async fn decompose(&self, query: &str) -> Result<Vec<String>, RetrievalError> {
        let prompt = format!(
            "Split the question below into 2 to 4 self-contained sub-questions that can each be \
             answered from documentation on their own.\n\nQuestion: \"{query}\"\n\n\
             Respond with ONLY a JSON array of strings. No explanation."
        );
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .temperature(0.2)
            .max_tokens(400);

        let content = self.chat(request, &self.decompose_model).await?;
        parse_sub_questions(&content)
    }
}
