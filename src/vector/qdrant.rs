//! Qdrant embedding index over the REST API.
//!
//! Point ids are UUIDs derived from the chunk id (see
//! [`identity::point_uuid`]); the full chunk is stored as payload together
//! with top-level `chunk_id` and `orphaned` keys used for filtering.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{check_upsert_input, EmbeddingIndex, VectorFilter};
use crate::core::config::QdrantSettings;
use crate::core::errors::RetrievalError;
use crate::ingest::identity;
use crate::models::{Chunk, SearchResult};

const SCROLL_PAGE_SIZE: usize = 256;
const INDEXED_KEYWORD_FIELDS: [&str; 3] = ["project", "content_type", "url"];

#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    batch_size: usize,
    max_retries: usize,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f64,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollPage {
    points: Vec<ScrollRecord>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollRecord {
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantIndex {
    /// Connect and make sure the collection and its payload indexes exist.
    pub async fn connect(settings: &QdrantSettings) -> Result<Self, RetrievalError> {
        let index = Self::new(settings)?;
        index.ensure_collection().await?;
        Ok(index)
    }

    pub fn new(settings: &QdrantSettings) -> Result<Self, RetrievalError> {
        if !(settings.url.starts_with("http://") || settings.url.starts_with("https://")) {
            return Err(RetrievalError::Config(
                "Qdrant url must be an http(s) URL".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key.trim())
                    .map_err(|_| RetrievalError::Config("invalid Qdrant API key".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(RetrievalError::internal)?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            collection: settings.collection.clone(),
            dimension: settings.dimension,
            batch_size: settings.batch_size.max(1),
            max_retries: settings.max_retries.max(1),
        })
    }

    async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(RetrievalError::vector)?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                tracing::info!(
                    "Creating Qdrant collection {} (dim {})",
                    self.collection,
                    self.dimension
                );
                self.call(
                    Method::PUT,
                    "",
                    Some(json!({
                        "vectors": { "size": self.dimension, "distance": "Cosine" }
                    })),
                )
                .await?;
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(RetrievalError::vector(format!(
                    "collection lookup failed ({status}): {body}"
                )));
            }
        }

        for field in INDEXED_KEYWORD_FIELDS {
            self.call(
                Method::PUT,
                "/index?wait=true",
                Some(json!({ "field_name": field, "field_schema": "keyword" })),
            )
            .await?;
        }
        self.call(
            Method::PUT,
            "/index?wait=true",
            Some(json!({ "field_name": "orphaned", "field_schema": "bool" })),
        )
        .await?;

        Ok(())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RetrievalError> {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let mut attempt = 0usize;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(RetrievalError::malformed);
                    }
                    let text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::vector(format!(
                        "Qdrant {method} {path} failed ({status}): {text}"
                    )));
                }
                Err(err) => {
                    if (err.is_connect() || err.is_timeout()) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::vector(err));
                }
            }
        }
    }

    async fn scroll_urls(&self, filter: Value) -> Result<Vec<String>, RetrievalError> {
        let mut urls = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": filter,
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": ["url"],
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let value = self.call(Method::POST, "/points/scroll", Some(body)).await?;
            let page: QdrantResponse<ScrollPage> =
                serde_json::from_value(value).map_err(RetrievalError::malformed)?;

            urls.extend(page.result.points.into_iter().filter_map(|point| {
                point
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }));

            match page.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        urls.sort();
        urls.dedup();
        Ok(urls)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(200 * (1 << capped))
}

fn match_value(key: &str, value: Value) -> Value {
    json!({ "key": key, "match": { "value": value } })
}

pub(crate) fn build_filter(filter: &VectorFilter, exclude_orphaned: bool) -> Value {
    let mut must = Vec::new();
    if let Some(project) = &filter.project {
        must.push(match_value("project", json!(project)));
    }
    if let Some(content_type) = filter.content_type {
        must.push(match_value("content_type", json!(content_type.as_str())));
    }
    if let Some(url) = &filter.url {
        must.push(match_value("url", json!(url)));
    }

    let mut out = Map::new();
    out.insert("must".to_string(), Value::Array(must));
    if exclude_orphaned {
        out.insert(
            "must_not".to_string(),
            json!([match_value("orphaned", json!(true))]),
        );
    }
    Value::Object(out)
}

pub(crate) fn chunk_to_payload(chunk: &Chunk) -> Result<Value, RetrievalError> {
    let mut payload = serde_json::to_value(chunk).map_err(RetrievalError::internal)?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("chunk_id".to_string(), json!(chunk.id));
        obj.insert("orphaned".to_string(), json!(chunk.metadata.orphaned));
    }
    Ok(payload)
}

pub(crate) fn payload_to_chunk(payload: Value) -> Result<Chunk, RetrievalError> {
    let orphaned = payload
        .get("orphaned")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut chunk: Chunk = serde_json::from_value(payload).map_err(RetrievalError::malformed)?;
    chunk.metadata.orphaned = orphaned;
    Ok(chunk)
}

#[async_trait]
impl EmbeddingIndex for QdrantIndex {
    async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RetrievalError> {
        check_upsert_input(chunks, embeddings, Some(self.dimension))?;

        for (chunk_batch, embedding_batch) in chunks
            .chunks(self.batch_size)
            .zip(embeddings.chunks(self.batch_size))
        {
            let points = chunk_batch
                .iter()
                .zip(embedding_batch)
                .map(|(chunk, embedding)| {
                    Ok(json!({
                        "id": identity::point_uuid(&chunk.id).to_string(),
                        "vector": embedding,
                        "payload": chunk_to_payload(chunk)?,
                    }))
                })
                .collect::<Result<Vec<Value>, RetrievalError>>()?;

            self.call(
                Method::PUT,
                "/points?wait=true",
                Some(json!({ "points": points })),
            )
            .await?;
        }

        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let body = json!({
            "vector": embedding,
            "limit": limit.max(1),
            "filter": build_filter(filter, true),
            "with_payload": true,
        });

        let value = self.call(Method::POST, "/points/search", Some(body)).await?;
        let response: QdrantResponse<Vec<ScoredPoint>> =
            serde_json::from_value(value).map_err(RetrievalError::malformed)?;

        response
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload.ok_or_else(|| {
                    RetrievalError::MalformedResponse("search hit without payload".to_string())
                })?;
                Ok(SearchResult {
                    chunk: payload_to_chunk(payload)?,
                    score: point.score,
                })
            })
            .collect()
    }

    async fn delete_by_url(&self, url: &str) -> Result<(), RetrievalError> {
        let filter = VectorFilter {
            url: Some(url.to_string()),
            ..Default::default()
        };
        self.call(
            Method::POST,
            "/points/delete?wait=true",
            Some(json!({ "filter": build_filter(&filter, false) })),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_project(&self, project: &str) -> Result<(), RetrievalError> {
        self.call(
            Method::POST,
            "/points/delete?wait=true",
            Some(json!({ "filter": build_filter(&VectorFilter::project(project), false) })),
        )
        .await?;
        Ok(())
    }

    async fn get_urls_for_project(&self, project: &str) -> Result<Vec<String>, RetrievalError> {
        self.scroll_urls(build_filter(&VectorFilter::project(project), false))
            .await
    }

    async fn mark_orphaned(&self, urls: &[String], orphaned: bool) -> Result<(), RetrievalError> {
        if urls.is_empty() {
            return Ok(());
        }

        self.call(
            Method::POST,
            "/points/payload?wait=true",
            Some(json!({
                "payload": { "orphaned": orphaned },
                "filter": { "must": [ { "key": "url", "match": { "any": urls } } ] },
            })),
        )
        .await?;
        Ok(())
    }
}
