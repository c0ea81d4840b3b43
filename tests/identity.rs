mod common;

use acm_general::db::{MemoryStore, SigRepository, UserRepository};
use acm_general::error::AppError;
use acm_general::models::sig::{Sig, SigFields};
use acm_general::models::user::{
    EmailDomains, RegistrationFields, User, UserFilter, UserUpdate, MAX_NAME_LENGTH,
};

use common::{domains, fields, register, DOMAIN};

#[tokio::test]
async fn registration_normalizes_and_locks_the_password() {
    let store = MemoryStore::new();
    let user = User::register("  Jane.Doe@MST.EDU ", fields("Jane", "Doe"), &domains(), &store)
        .await
        .unwrap();

    assert_eq!(user.email, "Jane.Doe@mst.edu");
    assert_eq!(user.full_name(), "Jane Doe");
    assert_eq!(user.short_name(), "Jane.Doe@mst.edu");
    assert!(user.password_hash.is_none());
    assert!(!user.is_staff);
    assert!(!user.is_superuser);
    assert!(user.can_authenticate());
    assert_eq!(
        User::login_is_valid("Jane.Doe@mst.edu", "", &store).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn outside_domains_are_refused() {
    let store = MemoryStore::new();
    let err = User::register("someone@gmail.com", fields("Some", "One"), &domains(), &store)
        .await
        .unwrap_err();

    match err {
        AppError::Validation(errors) => assert!(errors.contains("email")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.users(&UserFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_domain_setting_is_a_configuration_error() {
    let store = MemoryStore::new();
    let err = User::register(
        &format!("jm@{DOMAIN}"),
        fields("Joe", "Miner"),
        &EmailDomains::unconfigured(),
        &store,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn emails_can_only_register_once() {
    let store = MemoryStore::new();
    register("jm@mst.edu", &store).await;

    let err = User::register("JM@mst.edu", fields("Joe", "Again"), &domains(), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn superusers_are_staff_and_may_use_a_password() {
    let store = MemoryStore::new();
    let admin = User::create_superuser(
        "admin@mst.edu",
        fields("Ada", "Admin"),
        Some("hunter22"),
        &domains(),
        &store,
    )
    .await
    .unwrap();

    assert!(admin.is_staff);
    assert!(admin.is_superuser);
    assert!(admin.is_admin());

    let logged_in = User::login_is_valid("ADMIN@mst.edu", "hunter22", &store)
        .await
        .unwrap();
    assert_eq!(logged_in.map(|user| user.id), Some(admin.id));
    assert_eq!(
        User::login_is_valid("admin@mst.edu", "wrong", &store).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn superusers_cannot_switch_off_their_flags() {
    let store = MemoryStore::new();
    let err = User::create_superuser(
        "admin@mst.edu",
        RegistrationFields {
            is_staff: Some(false),
            is_superuser: Some(false),
            ..fields("Ada", "Admin")
        },
        None,
        &domains(),
        &store,
    )
    .await
    .unwrap_err();

    match err {
        AppError::Validation(errors) => {
            assert!(errors.contains("is_staff"));
            assert!(errors.contains("is_superuser"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.user_by_email("admin@mst.edu").await.unwrap().is_none());
}

#[tokio::test]
async fn repeat_provider_logins_reuse_the_account() {
    let store = MemoryStore::new();
    let first = User::oauth_provision("Grace@MST.edu", "Grace", "Hopper", &domains(), &store)
        .await
        .unwrap();
    let second = User::oauth_provision("grace@mst.edu", "G", "H", &domains(), &store)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.first_name, "Grace");
    assert_eq!(store.users(&UserFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn provider_logins_respect_the_domain_list() {
    let store = MemoryStore::new();
    let err = User::oauth_provision("grace@navy.mil", "Grace", "Hopper", &domains(), &store)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn deactivated_users_cannot_log_in() {
    let store = MemoryStore::new();
    let user = register("jm@mst.edu", &store).await;
    User::update(
        user.id,
        UserUpdate {
            is_active: Some(false),
            ..UserUpdate::default()
        },
        &domains(),
        &store,
    )
    .await
    .unwrap();

    assert_eq!(User::authenticate("jm@mst.edu", &store).await.unwrap(), None);
    assert_eq!(
        User::lookup_by_id(&user.id.to_string(), &store).await.unwrap(),
        None
    );
    assert_eq!(User::lookup_by_id("not-a-uuid", &store).await.unwrap(), None);
}

#[tokio::test]
async fn changing_email_keeps_it_unique_and_allowed() {
    let store = MemoryStore::new();
    let first = register("first@mst.edu", &store).await;
    register("second@mst.edu", &store).await;

    let taken = User::update(
        first.id,
        UserUpdate {
            email: Some("Second@MST.EDU".to_owned()),
            ..UserUpdate::default()
        },
        &domains(),
        &store,
    )
    .await
    .unwrap_err();
    assert!(matches!(taken, AppError::Conflict(_)));

    let outside = User::update(
        first.id,
        UserUpdate {
            email: Some("first@gmail.com".to_owned()),
            ..UserUpdate::default()
        },
        &domains(),
        &store,
    )
    .await
    .unwrap_err();
    assert!(matches!(outside, AppError::Validation(_)));

    let renamed = User::update(
        first.id,
        UserUpdate {
            email: Some("renamed@MST.EDU".to_owned()),
            ..UserUpdate::default()
        },
        &domains(),
        &store,
    )
    .await
    .unwrap();
    assert_eq!(renamed.email, "renamed@mst.edu");
}

#[tokio::test]
async fn users_filter_by_role() {
    let store = MemoryStore::new();
    register("member@mst.edu", &store).await;
    User::create_superuser("admin@mst.edu", fields("Ada", "Admin"), None, &domains(), &store)
        .await
        .unwrap();

    let staff = User::all(
        &UserFilter {
            is_staff: Some(true),
            ..UserFilter::default()
        },
        &store,
    )
    .await
    .unwrap();
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0].email, "admin@mst.edu");
}

#[tokio::test]
async fn founders_cannot_be_deleted() {
    let store = MemoryStore::new();
    let founder = register("founder@mst.edu", &store).await;
    Sig::create_sig(
        SigFields {
            id: Some("web".to_owned()),
            founder: Some(founder.id),
            description: Some("Web development".to_owned()),
            ..SigFields::default()
        },
        &store,
    )
    .await
    .unwrap();

    let err = User::delete(founder.id, &store).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(store.sig_by_id("web").await.unwrap().is_some());

    let bystander = register("bystander@mst.edu", &store).await;
    User::delete(bystander.id, &store).await.unwrap();
    assert!(store.user_by_id(bystander.id).await.unwrap().is_none());
}

#[tokio::test]
async fn names_must_fit_their_columns() {
    let store = MemoryStore::new();
    let long = "x".repeat(MAX_NAME_LENGTH + 1);

    let err = User::register("long@mst.edu", fields(&long, "Doe"), &domains(), &store)
        .await
        .unwrap_err();
    match err {
        AppError::Validation(errors) => assert!(errors.contains("first_name")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.user_by_email("long@mst.edu").await.unwrap().is_none());

    let user = register("short@mst.edu", &store).await;
    let err = User::update(
        user.id,
        UserUpdate {
            last_name: Some(long.clone()),
            ..UserUpdate::default()
        },
        &domains(),
        &store,
    )
    .await
    .unwrap_err();
    match err {
        AppError::Validation(errors) => assert!(errors.contains("last_name")),
        other => panic!("unexpected error: {other:?}"),
    }

    let provisioned = User::oauth_provision("wordy@mst.edu", &long, "Doe", &domains(), &store)
        .await
        .unwrap();
    assert_eq!(provisioned.first_name.chars().count(), MAX_NAME_LENGTH);
}
