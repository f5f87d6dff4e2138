mod common;

use std::sync::atomic::Ordering;

use doc_retriever::core::config::RetrievalSettings;
use doc_retriever::ingest::IngestOutcome;
use doc_retriever::lexical::LexicalIndex;
use doc_retriever::{HybridRetriever, RetrieveOptions};

use common::{fixture, page};

#[tokio::test]
async fn recrawl_skips_unchanged_pages_and_orphans_removed_ones() {
    let fx = fixture().await;
    let intro = page("acme", "https://docs/intro", "Intro", "Welcome aboard.\n\nQuickstart steps.");
    let legacy = page("acme", "https://docs/legacy", "Legacy", "Legacy quickstart notes.");

    fx.ingestor.ingest_page(&intro).await.unwrap();
    fx.ingestor.ingest_page(&legacy).await.unwrap();
    let embeds_after_first_crawl = fx.embedder.calls.load(Ordering::SeqCst);

    // Second crawl: intro unchanged, legacy gone.
    let outcome = fx.ingestor.ingest_page(&intro).await.unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Unchanged {
            url: "https://docs/intro".to_string()
        }
    );
    assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), embeds_after_first_crawl);

    let report = fx
        .ingestor
        .reconcile_crawl("acme", &["https://docs/intro".to_string()])
        .await
        .unwrap();
    assert_eq!(report.orphaned, vec!["https://docs/legacy".to_string()]);

    let retriever = HybridRetriever::new(
        fx.lexical.clone(),
        fx.vector.clone(),
        fx.embedder.clone(),
        RetrievalSettings::default(),
    );
    let result = retriever
        .retrieve("quickstart", RetrieveOptions::new("acme"))
        .await
        .unwrap();
    assert!(!result.chunks.is_empty());
    assert!(result
        .chunks
        .iter()
        .all(|r| r.chunk.url == "https://docs/intro"));
}

#[tokio::test]
async fn edited_page_replaces_old_chunks_in_both_indices() {
    let fx = fixture().await;
    let url = "https://docs/api";
    fx.ingestor
        .ingest_page(&page("acme", url, "API", "Old intro.\n\nOld endpoint list.\n\nOld footer."))
        .await
        .unwrap();
    let outcome = fx
        .ingestor
        .ingest_page(&page("acme", url, "API", "New endpoint list."))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        IngestOutcome::Indexed {
            url: url.to_string(),
            chunks: 1
        }
    );
    assert_eq!(fx.lexical.count(Some("acme")).await.unwrap(), 1);
    assert_eq!(fx.vector.count().await.unwrap(), 1);
    assert_eq!(
        fx.lexical.get_page_hash(url).await.unwrap().unwrap().chunk_count,
        1
    );
}

#[tokio::test]
async fn deleting_a_project_leaves_others_alone() {
    let fx = fixture().await;
    fx.ingestor
        .ingest_page(&page("acme", "https://docs/a", "A", "alpha"))
        .await
        .unwrap();
    fx.ingestor
        .ingest_page(&page("beta", "https://beta/a", "A", "alpha"))
        .await
        .unwrap();

    fx.ingestor.delete_project("acme").await.unwrap();

    assert_eq!(fx.lexical.count(Some("acme")).await.unwrap(), 0);
    assert_eq!(fx.lexical.count(Some("beta")).await.unwrap(), 1);
    assert_eq!(fx.vector.count().await.unwrap(), 1);
    assert!(fx.lexical.get_page_hash("https://docs/a").await.unwrap().is_none());
    assert!(fx.lexical.get_page_hash("https://beta/a").await.unwrap().is_some());
}
