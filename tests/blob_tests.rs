//! Blob operation tests.

mod common;

use azurite_fs::storage::{Access, Backoff, LockedFile, RetryPolicy};
use azurite_fs::{ErrorCode, DEFAULT_CONTENT_TYPE};
use common::TestAccount;
use futures_util::future::join_all;
use futures_util::poll;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_constructing_blob_touches_nothing() {
    let account = TestAccount::new();
    let blob = account.blob("untouched", "a/b/c.txt").unwrap();

    assert!(!blob.exists().await);
    assert!(!account.blob_root().exists());
    assert!(!account.container("untouched").unwrap().exists().await);
}

#[tokio::test]
async fn test_upload_and_download_blob() {
    let account = TestAccount::new();
    let mut blob = account.blob("blobcontainer", "dir/testblob.txt").unwrap();
    let content = b"Hello, Azure Blob Storage!";

    blob.upload_from_bytes(content).await.unwrap();
    assert!(blob.exists().await);

    // Chunk size is 7 in tests, so this streams in several pieces.
    let body = blob.download_to_bytes().await.unwrap();
    assert_eq!(&body[..], content);

    // Download refreshes attributes as a side effect.
    assert_eq!(blob.properties().content_length, content.len() as u64);
    assert_eq!(
        blob.properties().content_type.as_deref(),
        Some(DEFAULT_CONTENT_TYPE)
    );
}

#[tokio::test]
async fn test_fetch_attributes_reports_length() {
    let account = TestAccount::new();
    let mut blob = account.blob("props", "sized.bin").unwrap();
    blob.upload_from_bytes(&vec![7u8; 4096]).await.unwrap();

    let mut fresh = account.blob("props", "sized.bin").unwrap();
    fresh.fetch_attributes().await.unwrap();
    assert_eq!(fresh.properties().content_length, 4096);
    assert!(fresh.properties().etag.is_some());
    assert!(fresh.properties().last_modified.is_some());
    assert!(fresh.metadata().is_empty());
    assert!(!fresh.metadata_path().exists());
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let account = TestAccount::new();
    let mut blob = account.blob("missing", "nothing.txt").unwrap();

    let err = blob.fetch_attributes().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);

    let err = blob.download_to_bytes().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
    assert!(err.message.contains("missing/nothing.txt"));

    let err = blob.delete().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
    assert!(!blob.delete_if_exists().await.unwrap());

    blob.metadata_mut().insert("k".into(), "v".into());
    let err = blob.set_metadata().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BlobNotFound);
}

#[tokio::test]
async fn test_set_metadata_merges_with_persisted_keys() {
    let account = TestAccount::new();
    let mut writer = account.blob("meta", "doc.txt").unwrap();
    writer.upload_from_bytes(b"doc").await.unwrap();
    writer.metadata_mut().insert("owner".into(), "alice".into());
    writer.metadata_mut().insert("stage".into(), "draft".into());
    writer.set_metadata().await.unwrap();
    assert!(writer.metadata_path().exists());

    // A second instance that never fetched only knows about its own key.
    let mut other = account.blob("meta", "doc.txt").unwrap();
    other.metadata_mut().insert("stage".into(), "final".into());
    other.set_metadata().await.unwrap();

    let mut reader = account.blob("meta", "doc.txt").unwrap();
    reader.fetch_attributes().await.unwrap();
    let expected: HashMap<String, String> = [
        ("owner".to_string(), "alice".to_string()),
        ("stage".to_string(), "final".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(reader.metadata(), &expected);
    assert_eq!(other.metadata(), &expected);
}

#[tokio::test]
async fn test_set_properties_only_touches_content_type() {
    let account = TestAccount::new();
    let mut blob = account.blob("typed", "page.html").unwrap();
    blob.upload_from_bytes(b"<html></html>").await.unwrap();
    blob.metadata_mut().insert("lang".into(), "en".into());
    blob.set_metadata().await.unwrap();

    let mut typed = account.blob("typed", "page.html").unwrap();
    typed.properties_mut().content_type = Some("text/html".into());
    typed.set_properties().await.unwrap();

    let mut reader = account.blob("typed", "page.html").unwrap();
    reader.fetch_attributes().await.unwrap();
    assert_eq!(reader.properties().content_type.as_deref(), Some("text/html"));
    assert_eq!(reader.metadata().get("lang").map(String::as_str), Some("en"));
}

#[tokio::test]
async fn test_overwrite_keeps_metadata() {
    let account = TestAccount::new();
    let mut blob = account.blob("overwrite", "a.txt").unwrap();
    blob.upload_from_bytes(b"first version").await.unwrap();
    blob.metadata_mut().insert("keep".into(), "me".into());
    blob.set_metadata().await.unwrap();

    blob.upload_from_bytes(b"v2").await.unwrap();
    blob.fetch_attributes().await.unwrap();

    assert_eq!(blob.properties().content_length, 2);
    assert_eq!(blob.metadata().get("keep").map(String::as_str), Some("me"));
    assert_eq!(&blob.download_to_bytes().await.unwrap()[..], b"v2");
}

#[tokio::test]
async fn test_delete_removes_content_and_metadata() {
    let account = TestAccount::new();
    let mut blob = account.blob("deletecontainer", "nested/deleteblob.txt").unwrap();
    blob.upload_from_bytes(b"content").await.unwrap();
    blob.metadata_mut().insert("a".into(), "b".into());
    blob.set_metadata().await.unwrap();

    blob.delete().await.unwrap();

    assert!(!blob.exists().await);
    assert!(!blob.content_path().exists());
    assert!(!blob.metadata_path().exists());
}

#[tokio::test]
async fn test_upload_range_and_stream_and_file() {
    let account = TestAccount::new();
    let mut blob = account.blob("uploads", "range.bin").unwrap();

    blob.upload_from_bytes_range(b"0123456789", 2, 5).await.unwrap();
    assert_eq!(&blob.download_to_bytes().await.unwrap()[..], b"23456");

    let err = blob
        .upload_from_bytes_range(b"0123", 3, 5)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OutOfRangeInput);

    let mut stream = &b"streamed body"[..];
    let written = blob.upload_from_stream(&mut stream).await.unwrap();
    assert_eq!(written, 13);

    let local = account.dir.path().join("local.txt");
    tokio::fs::write(&local, b"from a file").await.unwrap();
    blob.upload_from_file(&local).await.unwrap();

    let out = account.dir.path().join("out/copy.txt");
    blob.download_to_file(&out).await.unwrap();
    assert_eq!(tokio::fs::read(&out).await.unwrap(), b"from a file");
}

#[tokio::test]
async fn test_download_range() {
    let account = TestAccount::new();
    let mut blob = account.blob("ranges", "abc.txt").unwrap();
    blob.upload_from_bytes(b"abcdefghij").await.unwrap();

    assert_eq!(&blob.download_range(2, 3).await.unwrap()[..], b"cde");
    assert_eq!(&blob.download_range(8, 100).await.unwrap()[..], b"ij");
    assert!(blob.download_range(10, 1).await.unwrap().is_empty());

    let err = blob.download_range(11, 1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OutOfRangeInput);
}

#[tokio::test]
async fn test_locked_blob_reports_busy() {
    let account = TestAccount::new();
    let mut blob = account.blob("locks", "held.bin").unwrap();
    blob.upload_from_bytes(b"held").await.unwrap();

    let holder = LockedFile::try_open(blob.content_path(), Access::Write)
        .await
        .unwrap();

    let err = blob.upload_from_bytes(b"blocked").await.unwrap_err();
    assert!(err.is_busy());
    assert_eq!(err.code, ErrorCode::ServerBusy);
    assert_eq!(err.path.as_deref(), Some(blob.content_path()));

    let err = blob.download_to_bytes().await.unwrap_err();
    assert!(err.is_busy());

    drop(holder);
    assert_eq!(&blob.download_to_bytes().await.unwrap()[..], b"held");
}

#[tokio::test]
async fn test_metadata_lock_contention_reports_busy() {
    let account = TestAccount::new();
    let mut blob = account.blob("locks", "meta.bin").unwrap();
    blob.upload_from_bytes(b"x").await.unwrap();
    blob.metadata_mut().insert("a".into(), "1".into());
    blob.set_metadata().await.unwrap();

    let holder = LockedFile::try_open(blob.metadata_path(), Access::Write)
        .await
        .unwrap();
    blob.metadata_mut().insert("b".into(), "2".into());
    let err = blob.set_metadata().await.unwrap_err();
    assert!(err.is_busy());

    drop(holder);
    blob.set_metadata().await.unwrap();
    blob.fetch_attributes().await.unwrap();
    assert_eq!(blob.metadata().len(), 2);
}

#[tokio::test]
async fn test_concurrent_metadata_writers_all_land() {
    let account = TestAccount::new();
    let mut blob = account.blob("concurrent", "shared.txt").unwrap();
    blob.upload_from_bytes(b"shared").await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let mut writer = account.blob("concurrent", "shared.txt").unwrap();
            tokio::spawn(async move {
                writer
                    .metadata_mut()
                    .insert(format!("writer{}", i), i.to_string());
                // Each writer retries independently; give them a real budget.
                for _ in 0..50 {
                    match writer.set_metadata().await {
                        Ok(()) => return,
                        Err(err) if err.is_busy() => continue,
                        Err(err) => panic!("unexpected error: {}", err),
                    }
                }
                panic!("writer {} never acquired the metadata lock", i);
            })
        })
        .collect();
    for result in join_all(tasks).await {
        result.unwrap();
    }

    blob.fetch_attributes().await.unwrap();
    assert_eq!(blob.metadata().len(), 8);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let account = TestAccount::new();
    assert_eq!(
        account.blob("ok-container", "../escape").unwrap_err().code,
        ErrorCode::InvalidResourceName
    );
    assert_eq!(
        account.blob("Bad_Container", "x").unwrap_err().code,
        ErrorCode::InvalidResourceName
    );
}

#[tokio::test]
async fn test_cancelled_operations_leave_blob_intact() {
    let account = TestAccount::with_lock_retry(RetryPolicy::new(
        1000,
        Backoff::Fixed(Duration::from_millis(10)),
    ));
    let mut blob = account.blob("cancel", "doc.txt").unwrap();
    blob.upload_from_bytes(b"body").await.unwrap();
    blob.metadata_mut().insert("k".into(), "v".into());
    blob.set_metadata().await.unwrap();

    let meta_holder = LockedFile::try_open(blob.metadata_path(), Access::Write)
        .await
        .unwrap();
    blob.metadata_mut().insert("k".into(), "changed".into());
    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_millis(50), blob.set_metadata()).await;
    assert!(result.is_err());
    // Far below the ten seconds the retry budget would take.
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(meta_holder);

    let content_holder = LockedFile::try_open(blob.content_path(), Access::Write)
        .await
        .unwrap();
    let result = tokio::time::timeout(Duration::from_millis(50), blob.download_to_bytes()).await;
    assert!(result.is_err());
    drop(content_holder);

    let mut reader = account.blob("cancel", "doc.txt").unwrap();
    assert_eq!(&reader.download_to_bytes().await.unwrap()[..], b"body");
    let expected: HashMap<String, String> = [("k".to_string(), "v".to_string())]
        .into_iter()
        .collect();
    assert_eq!(reader.metadata(), &expected);
}

#[tokio::test]
async fn test_interrupted_metadata_update_keeps_previous_keys() {
    let account = TestAccount::with_lock_retry(RetryPolicy::new(
        20,
        Backoff::Fixed(Duration::from_millis(5)),
    ));
    let mut blob = account.blob("interrupt", "doc.txt").unwrap();
    blob.upload_from_bytes(b"body").await.unwrap();
    blob.metadata_mut().insert("k".into(), "v".into());
    blob.set_metadata().await.unwrap();

    for polls in 1..30 {
        let mut writer = account.blob("interrupt", "doc.txt").unwrap();
        writer
            .metadata_mut()
            .insert(format!("n{}", polls), "x".into());
        {
            let mut update = Box::pin(writer.set_metadata());
            for _ in 0..polls {
                if poll!(&mut update).is_ready() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        let mut reader = account.blob("interrupt", "doc.txt").unwrap();
        reader.fetch_attributes().await.unwrap();
        assert_eq!(
            reader.metadata().get("k").map(String::as_str),
            Some("v"),
            "metadata lost after {} polls",
            polls
        );
    }
}

#[tokio::test]
async fn test_shorter_record_replaces_longer_one() {
    let account = TestAccount::new();
    let mut blob = account.blob("typed", "shrink.bin").unwrap();
    blob.upload_from_bytes(b"x").await.unwrap();

    blob.properties_mut().content_type =
        Some("application/vnd.example.very-long-content-type+json".into());
    blob.set_properties().await.unwrap();
    blob.properties_mut().content_type = Some("a/b".into());
    blob.set_properties().await.unwrap();

    let mut reader = account.blob("typed", "shrink.bin").unwrap();
    reader.fetch_attributes().await.unwrap();
    assert_eq!(reader.properties().content_type.as_deref(), Some("a/b"));
    assert!(reader.metadata().is_empty());
}
