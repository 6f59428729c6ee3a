//! Container operation tests.

mod common;

use azurite_fs::ErrorCode;
use common::TestAccount;

#[tokio::test]
async fn test_create_and_delete_container() {
    let account = TestAccount::new();
    let container = account.container("testcontainer").unwrap();

    assert!(!container.exists().await);
    container.create().await.unwrap();
    assert!(container.exists().await);

    let err = container.create().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ContainerAlreadyExists);
    assert!(!container.create_if_not_exists().await.unwrap());

    assert_eq!(account.list_containers().await.unwrap(), vec!["testcontainer"]);

    container.delete().await.unwrap();
    assert!(!container.exists().await);

    let err = container.delete().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ContainerNotFound);
    assert!(!container.delete_if_exists().await.unwrap());
}

#[tokio::test]
async fn test_delete_container_removes_blobs() {
    let account = TestAccount::new();
    let container = account.container("doomed").unwrap();
    let mut blob = container.blob("a/b.txt").unwrap();
    blob.upload_from_bytes(b"b").await.unwrap();
    blob.metadata_mut().insert("k".into(), "v".into());
    blob.set_metadata().await.unwrap();

    // Uploading created the container implicitly.
    assert!(container.exists().await);
    assert!(container.delete_if_exists().await.unwrap());
    assert!(!blob.exists().await);
    assert!(!blob.metadata_path().exists());
}

#[tokio::test]
async fn test_list_blobs() {
    let account = TestAccount::new();
    let container = account.container("listing").unwrap();
    container.create().await.unwrap();
    assert!(container.list_blobs(None).await.unwrap().is_empty());

    for name in ["b.txt", "a/one.txt", "a/two.txt", "logs/2024/01.log"] {
        let mut blob = container.blob(name).unwrap();
        blob.upload_from_bytes(name.as_bytes()).await.unwrap();
        blob.metadata_mut().insert("name".into(), name.into());
        blob.set_metadata().await.unwrap();
    }

    assert_eq!(
        container.list_blobs(None).await.unwrap(),
        vec!["a/one.txt", "a/two.txt", "b.txt", "logs/2024/01.log"]
    );
    assert_eq!(
        container.list_blobs(Some("a/")).await.unwrap(),
        vec!["a/one.txt", "a/two.txt"]
    );
    assert!(container.list_blobs(Some("zzz")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_blobs_in_missing_container() {
    let account = TestAccount::new();
    let err = account
        .container("nowhere")
        .unwrap()
        .list_blobs(None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ContainerNotFound);
}

#[tokio::test]
async fn test_container_paths_and_names() {
    let account = TestAccount::new();
    let container = account.container("images").unwrap();

    assert_eq!(container.path(), account.blob_root().join("images"));
    assert_eq!(
        container.content_path("a/b.png"),
        account.blob_root().join("images").join("a").join("b.png")
    );
    assert_eq!(
        container.uri(),
        "http://127.0.0.1:10000/devstoreaccount1/images"
    );

    for bad in ["ab", "UPPER", "under_score", "double--hyphen", "-leading"] {
        let err = account.container(bad).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidResourceName, "{}", bad);
    }
    assert!(container.blob(".meta/sneaky").is_err());
}
