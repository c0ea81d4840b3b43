mod common;

use acm_general::db::MemoryStore;
use acm_general::error::AppError;
use acm_general::models::sig::{Sig, SigFields, SigUpdate, MAX_SIG_ID_LENGTH};
use uuid::Uuid;

use common::{register, sig};

fn fields(id: &str, founder: Uuid) -> SigFields {
    SigFields {
        id: Some(id.to_owned()),
        founder: Some(founder),
        description: Some("Capture the flag practice".to_owned()),
        ..SigFields::default()
    }
}

#[tokio::test]
async fn chair_defaults_to_the_founder() {
    let store = MemoryStore::new();
    let founder = register("founder@mst.edu", &store).await;

    let sig = Sig::create_sig(fields("security", founder.id), &store)
        .await
        .unwrap();
    assert_eq!(sig.id, "security");
    assert_eq!(sig.founder_id, founder.id);
    assert_eq!(sig.chair_id, founder.id);
    assert!(sig.is_active);
}

#[tokio::test]
async fn every_missing_field_is_reported() {
    let store = MemoryStore::new();
    let err = Sig::create_sig(SigFields::default(), &store)
        .await
        .unwrap_err();

    match err {
        AppError::Validation(errors) => {
            assert!(errors.contains("id"));
            assert!(errors.contains("founder"));
            assert!(errors.contains("description"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn ids_are_short_and_unique() {
    let store = MemoryStore::new();
    let founder = register("founder@mst.edu", &store).await;

    let long_id = "x".repeat(MAX_SIG_ID_LENGTH + 1);
    let err = Sig::create_sig(fields(&long_id, founder.id), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    Sig::create_sig(fields("security", founder.id), &store)
        .await
        .unwrap();
    let err = Sig::create_sig(fields("security", founder.id), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn founder_and_chair_must_exist() {
    let store = MemoryStore::new();
    let founder = register("founder@mst.edu", &store).await;

    let err = Sig::create_sig(fields("ghosts", Uuid::new_v4()), &store)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(errors) => assert!(errors.contains("founder")),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = Sig::create_sig(
        SigFields {
            chair: Some(Uuid::new_v4()),
            ..fields("ghosts", founder.id)
        },
        &store,
    )
    .await
    .unwrap_err();
    match err {
        AppError::Validation(errors) => {
            assert!(errors.contains("chair"));
            assert!(!errors.contains("founder"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn chairs_can_be_handed_over() {
    let store = MemoryStore::new();
    let security = sig("security", &store).await;
    let successor = register("successor@mst.edu", &store).await;

    let updated = Sig::set_chair(&security.id, successor.id, &store)
        .await
        .unwrap();
    assert_eq!(updated.chair_id, successor.id);
    assert_eq!(updated.founder_id, security.founder_id);

    let err = Sig::set_chair(&security.id, Uuid::new_v4(), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(
        Sig::get_by_id("security", &store).await.unwrap().chair_id,
        successor.id
    );
}

#[tokio::test]
async fn inactive_sigs_are_filtered_out() {
    let store = MemoryStore::new();
    sig("security", &store).await;
    sig("gamedev", &store).await;

    Sig::update(
        "gamedev",
        SigUpdate {
            is_active: Some(false),
            ..SigUpdate::default()
        },
        &store,
    )
    .await
    .unwrap();

    let active: Vec<String> = Sig::all(Some(true), &store)
        .await
        .unwrap()
        .into_iter()
        .map(|sig| sig.id)
        .collect();
    assert_eq!(active, vec!["security".to_owned()]);
    assert_eq!(Sig::all(None, &store).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_sigs_are_not_found() {
    let store = MemoryStore::new();
    let err = Sig::get_by_id("nope", &store).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = Sig::update("nope", SigUpdate::default(), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
