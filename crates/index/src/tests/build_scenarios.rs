use super::fixtures::*;
use crate::builder::BuildOutcome;
use crate::embeddings::{EmbeddingProvider, MockProvider};
use crate::store::BUILD_LOCK_KEY;
use crate::version::POINTER_KEY;
use std::sync::atomic::Ordering;
use newsdex_core::AppError;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_incremental_build_appends_after_existing_rows() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    let seed = seed_catalog(&catalog, 511).await;

    let builder = mock_builder(catalog.clone(), ten_new_documents());
    let report = builder.build_at(&build_options(), build_time()).await.unwrap();

    assert_eq!(report.fetched, 10);
    assert_eq!(report.accepted, 10);
    assert_eq!(report.fragments, 16);
    assert_eq!(report.rows_before, 511);
    assert_eq!(report.rows_after, 527);

    let BuildOutcome::Published { manifest } = &report.outcome else {
        panic!("expected a published version, got {:?}", report.outcome);
    };
    assert_eq!(manifest.row_count, 527);
    assert_eq!(manifest.dim, Some(DIM));
    assert_eq!(manifest.parent_version, Some(seed.version));
    assert!(manifest.version > seed.version);
    assert_eq!(catalog.current_version().unwrap(), Some(manifest.version));

    let loaded = catalog.load_current().unwrap();
    let snapshot = &loaded.snapshot;
    assert_eq!(snapshot.vectors.len(), 527);
    assert_eq!(snapshot.metadata.len(), 527);

    // old rows are untouched
    let before = catalog.load_version(seed.version).unwrap().snapshot;
    assert_eq!(&snapshot.metadata.rows()[..511], before.metadata.rows());
    assert_eq!(
        &snapshot.vectors.as_slice()[..511 * DIM],
        before.vectors.as_slice()
    );

    // new rows occupy 511..=526 in ingestion order
    let new_rows = &snapshot.metadata.rows()[511..];
    let order: Vec<(String, u32)> = new_rows
        .iter()
        .map(|r| (r.document_id.clone(), r.fragment_sequence))
        .collect();
    let mut expected = Vec::new();
    for i in 0..10 {
        let fragments = if i < 6 { 2 } else { 1 };
        for seq in 0..fragments {
            expected.push((format!("news-{:02}", i), seq));
        }
    }
    assert_eq!(order, expected);
    for (offset, record) in new_rows.iter().enumerate() {
        assert_eq!(record.row_index, 511 + offset);
    }
}

#[tokio::test]
async fn test_rows_align_with_their_embeddings() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    seed_catalog(&catalog, 40).await;

    mock_builder(catalog.clone(), ten_new_documents())
        .build_at(&build_options(), build_time())
        .await
        .unwrap();

    let snapshot = catalog.load_current().unwrap().snapshot;
    let embedder = MockProvider::new(DIM);
    for record in snapshot.metadata.iter() {
        let expected = embedder.embed(&record.text).await.unwrap();
        assert_eq!(
            snapshot.vectors.row(record.row_index).unwrap(),
            expected.as_slice(),
            "row {} is not the embedding of its own text",
            record.row_index
        );
    }
}

#[tokio::test]
async fn test_builds_are_deterministic() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let mut manifests = Vec::new();
    for dir in [&first, &second] {
        let catalog = fs_catalog(dir.path());
        seed_catalog(&catalog, 25).await;
        let report = mock_builder(catalog, ten_new_documents())
            .build_at(&build_options(), build_time())
            .await
            .unwrap();
        let BuildOutcome::Published { manifest } = report.outcome else {
            panic!("expected a published version");
        };
        manifests.push(manifest);
    }

    assert_eq!(manifests[0].version, manifests[1].version);
    assert_eq!(manifests[0].vector_sha256, manifests[1].vector_sha256);
    assert_eq!(manifests[0].metadata_sha256, manifests[1].metadata_sha256);
}

#[tokio::test]
async fn test_empty_delta_leaves_pointer_untouched() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    seed_catalog(&catalog, 12).await;

    let builder = mock_builder(catalog.clone(), ten_new_documents());
    builder.build_at(&build_options(), build_time()).await.unwrap();

    let pointer_before = catalog.store().get(POINTER_KEY).unwrap();
    let versions_before = catalog.list_versions().unwrap();

    let report = builder.build_at(&build_options(), build_time()).await.unwrap();
    assert_eq!(report.outcome, BuildOutcome::NoNewDocuments);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.rows_before, report.rows_after);

    assert_eq!(catalog.store().get(POINTER_KEY).unwrap(), pointer_before);
    assert_eq!(catalog.list_versions().unwrap(), versions_before);
}

#[tokio::test]
async fn test_limit_resumes_from_watermark() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    let builder = mock_builder(catalog.clone(), ten_new_documents());

    let mut options = build_options();
    options.limit = Some(4);

    let mut seen = 0;
    for _ in 0..3 {
        let report = builder.build_at(&options, build_time()).await.unwrap();
        seen += report.fetched;
    }
    assert_eq!(seen, 10);

    let snapshot = catalog.load_current().unwrap().snapshot;
    assert_eq!(snapshot.len(), 16);
    assert_eq!(snapshot.metadata.document_count(), 10);
    let versions = catalog.list_versions().unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_dimension_change_is_refused() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    let seed = seed_catalog(&catalog, 8).await;

    let builder = builder_with(
        catalog.clone(),
        ten_new_documents(),
        Arc::new(MockProvider::new(64)),
    );
    let err = builder
        .build_at(&build_options(), build_time())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::DimensionMismatch {
            expected: DIM,
            actual: 64
        }
    ));
    assert!(err.is_invariant_violation());
    assert_eq!(catalog.current_version().unwrap(), Some(seed.version));
}

#[tokio::test]
async fn test_concurrent_build_is_rejected() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    let embedder = Arc::new(GatedEmbedder::new(DIM));
    let builder = Arc::new(builder_with(
        catalog.clone(),
        ten_new_documents(),
        embedder.clone(),
    ));

    let first = {
        let builder = builder.clone();
        tokio::spawn(async move { builder.build_at(&build_options(), build_time()).await })
    };
    embedder.started.notified().await;

    let second = builder.build_at(&build_options(), build_time()).await;
    assert!(matches!(second, Err(AppError::BuildInProgress)));

    embedder.release.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.rows_after, 16);
    assert_eq!(catalog.list_versions().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_builder_on_same_store_is_rejected() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(GatedEmbedder::new(DIM));
    let first = Arc::new(builder_with(
        fs_catalog(dir.path()),
        ten_new_documents(),
        embedder.clone(),
    ));
    // a separate catalog and store over the same directory, as a second process would have
    let second = mock_builder(fs_catalog(dir.path()), ten_new_documents());

    let running = {
        let first = first.clone();
        tokio::spawn(async move { first.build_at(&build_options(), build_time()).await })
    };
    embedder.started.notified().await;
    assert!(dir.path().join(BUILD_LOCK_KEY).exists());

    let rejected = second.build_at(&build_options(), build_time()).await;
    assert!(matches!(rejected, Err(AppError::BuildInProgress)));

    embedder.release.notify_one();
    let report = running.await.unwrap().unwrap();
    assert!(report.version.is_some());
    assert!(!dir.path().join(BUILD_LOCK_KEY).exists());

    // the lock is free again once the first run has finished
    let after = second.build_at(&build_options(), build_time()).await.unwrap();
    assert_eq!(after.outcome, BuildOutcome::NoNewDocuments);
}

#[tokio::test]
async fn test_lock_released_after_failed_build() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    seed_catalog(&catalog, 8).await;

    let err = builder_with(catalog.clone(), ten_new_documents(), Arc::new(MockProvider::new(64)))
        .build_at(&build_options(), build_time())
        .await
        .unwrap_err();
    assert!(err.is_invariant_violation());
    assert!(!dir.path().join(BUILD_LOCK_KEY).exists());
}

#[tokio::test]
async fn test_full_rebuild_reindexes_from_row_zero() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    let seed = seed_catalog(&catalog, 30).await;

    // a new embedding dimension is only accepted on a full rebuild
    let builder = builder_with(
        catalog.clone(),
        ten_new_documents(),
        Arc::new(MockProvider::new(64)),
    );
    let mut options = build_options();
    options.full_rebuild = true;
    let report = builder.build_at(&options, build_time()).await.unwrap();

    assert_eq!(report.watermark, None);
    assert_eq!(report.fetched, 10);
    assert_eq!(report.rows_before, 0);
    assert_eq!(report.rows_after, 16);

    let BuildOutcome::Published { manifest } = &report.outcome else {
        panic!("expected a published version, got {:?}", report.outcome);
    };
    assert_eq!(manifest.parent_version, Some(seed.version));
    assert!(manifest.version > seed.version);
    assert_eq!(manifest.row_count, 16);
    assert_eq!(manifest.dim, Some(64));
    assert_eq!(catalog.current_version().unwrap(), Some(manifest.version));

    let snapshot = catalog.load_current().unwrap().snapshot;
    assert_eq!(snapshot.vectors.len(), 16);
    for (i, record) in snapshot.metadata.iter().enumerate() {
        assert_eq!(record.row_index, i);
        assert!(record.document_id.starts_with("news-"));
    }

    // the seed version is still intact for rollback
    let old = catalog.load_version(seed.version).unwrap().snapshot;
    assert_eq!(old.len(), 30);
    assert_eq!(old.vectors.dimension(), Some(DIM));
}

#[tokio::test]
async fn test_embedding_error_mid_run_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    seed_catalog(&catalog, 12).await;
    let pointer_before = catalog.store().get(POINTER_KEY).unwrap();
    let versions_before = catalog.list_versions().unwrap();

    let embedder = Arc::new(FailingEmbedder::new(DIM, 2, EmbedFault::Error));
    let err = builder_with(catalog.clone(), ten_new_documents(), embedder.clone())
        .build_at(&build_options(), build_time())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Embedding(_)));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(catalog.store().get(POINTER_KEY).unwrap(), pointer_before);
    assert_eq!(catalog.list_versions().unwrap(), versions_before);
}

#[tokio::test]
async fn test_short_embedding_batch_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let catalog = fs_catalog(dir.path());
    seed_catalog(&catalog, 12).await;
    let pointer_before = catalog.store().get(POINTER_KEY).unwrap();
    let versions_before = catalog.list_versions().unwrap();

    let embedder = Arc::new(FailingEmbedder::new(DIM, 1, EmbedFault::ShortBatch));
    let err = builder_with(catalog.clone(), ten_new_documents(), embedder)
        .build_at(&build_options(), build_time())
        .await
        .unwrap_err();

    let AppError::Embedding(message) = &err else {
        panic!("expected an embedding error, got {:?}", err);
    };
    assert!(message.contains("4 vectors for a batch of 5"));
    assert_eq!(catalog.store().get(POINTER_KEY).unwrap(), pointer_before);
    assert_eq!(catalog.list_versions().unwrap(), versions_before);
}
