mod common;

use std::sync::Arc;

use acm_general::db::{PaymentRepository, UserRepository};
use acm_general::gateway::{GatewayError, PaymentGateway};
use acm_general::models::membership::{
    purchase_membership, purchase_outcome, purchase_product, MembershipType, PurchaseError,
    PurchaseRequest, MEMBERSHIP_PAGE,
};
use acm_general::error::AppError;
use acm_general::models::money::{Money, NewProduct, Product, ProductUpdate, Transaction};
use acm_general::outcome::Outcome;
use axum::http::StatusCode;
use time::{Duration, OffsetDateTime};

use common::{membership_store, register, FakeGateway, SEMESTER_COST, SIG_ID, YEAR_COST};

fn request<'a>(user: &'a acm_general::models::user::User, token: &'a str) -> PurchaseRequest<'a> {
    PurchaseRequest {
        user: Some(user),
        token: Some(token),
    }
}

fn gateway(fake: &Arc<FakeGateway>) -> Option<&dyn PaymentGateway> {
    Some(fake.as_ref() as &dyn PaymentGateway)
}

#[tokio::test]
async fn buying_a_semester_extends_from_now() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1"]));

    let before = OffsetDateTime::now_utc();
    let receipt = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap();
    let after = OffsetDateTime::now_utc();

    let expiration = receipt.user.membership_expiration.unwrap();
    assert!(expiration >= before + Duration::weeks(24));
    assert!(expiration <= after + Duration::weeks(24));
    assert_eq!(
        store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
        Some(expiration)
    );

    assert_eq!(receipt.transaction.cost, Money::from_cents(SEMESTER_COST));
    assert_eq!(receipt.transaction.charge_id.as_deref(), Some("ch_1"));
    assert_eq!(receipt.transaction.customer_id.as_deref(), Some("cus_test"));
    assert_eq!(receipt.transaction.user_id, Some(buyer.id));
    assert_eq!(receipt.transaction.sig_id, SIG_ID);
    assert_eq!(
        Transaction::with_token("tok_1", &store).await.unwrap(),
        receipt.transaction
    );

    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, Money::from_cents(SEMESTER_COST));
    assert_eq!(requests[0].currency, "usd");
    assert_eq!(requests[0].source, "tok_1");
}

#[tokio::test]
async fn renewals_stack_on_remaining_time() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1", "ch_2"]));

    let first = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap();
    let second = purchase_membership(request(&first.user, "tok_2"), "year", gateway(&fake), &store)
        .await
        .unwrap();

    assert_eq!(
        second.user.membership_expiration,
        first
            .user
            .membership_expiration
            .map(|expiration| expiration + Duration::weeks(52))
    );
    assert_eq!(second.transaction.cost, Money::from_cents(YEAR_COST));
    assert_eq!(store.transactions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn a_token_is_only_charged_once() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1", "ch_2"]));

    let first = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap();
    let replay = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap_err();

    assert!(matches!(replay, PurchaseError::TokenAlreadyUsed));
    assert_eq!(fake.calls(), 1);
    assert_eq!(store.transactions().await.unwrap().len(), 1);
    assert_eq!(
        store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
        first.user.membership_expiration
    );

    let outcome = purchase_outcome(&Err(replay), MEMBERSHIP_PAGE);
    assert_eq!(outcome.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn a_charge_is_only_recorded_once() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_same", "ch_same"]));

    let first = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap();
    let err = purchase_membership(request(&buyer, "tok_2"), "semester", gateway(&fake), &store)
        .await
        .unwrap_err();

    match &err {
        PurchaseError::ReconciliationRequired { charge_id, .. } => assert_eq!(charge_id, "ch_same"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_server_error());
    assert_eq!(store.transactions().await.unwrap().len(), 1);
    assert_eq!(
        store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
        first.user.membership_expiration
    );

    match purchase_outcome(&Err(err), MEMBERSHIP_PAGE) {
        Outcome::ServerError { message, .. } => assert!(message.contains("ch_same")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn declined_cards_change_nothing() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::failing(GatewayError::Card(
        "Your card was declined.".to_owned(),
    )));

    let result = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store).await;
    assert!(matches!(
        result,
        Err(PurchaseError::Gateway(GatewayError::Card(_)))
    ));
    assert!(store.transactions().await.unwrap().is_empty());
    assert_eq!(
        store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
        None
    );

    match purchase_outcome(&result, MEMBERSHIP_PAGE) {
        Outcome::Redirect {
            target,
            flash: Some(flash),
        } => {
            assert_eq!(target, MEMBERSHIP_PAGE);
            assert!(flash.message.contains("declined"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn gateway_credential_and_api_failures_are_server_errors_that_change_nothing() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;

    for (error, status) in [
        (
            GatewayError::Authentication("Invalid API Key provided".to_owned()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            GatewayError::Api("unexpected status 500".to_owned()),
            StatusCode::BAD_GATEWAY,
        ),
    ] {
        let fake = Arc::new(FakeGateway::failing(error));
        let result =
            purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store).await;

        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, PurchaseError::Gateway(_)));
        assert!(err.is_server_error());
        assert_eq!(fake.calls(), 1);
        match purchase_outcome(&result, MEMBERSHIP_PAGE) {
            Outcome::ServerError {
                status: actual,
                message,
            } => {
                assert_eq!(actual, status);
                assert!(!message.contains("API Key"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.transactions().await.unwrap().is_empty());
        assert_eq!(
            store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
            None
        );
    }
}

#[tokio::test]
async fn unreachable_gateways_ask_the_buyer_to_retry() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::failing(GatewayError::Connection(
        "timed out".to_owned(),
    )));

    let result = purchase_membership(request(&buyer, "tok_1"), "year", gateway(&fake), &store).await;
    let err = result.as_ref().unwrap_err();
    assert!(!err.is_server_error());
    assert!(matches!(
        purchase_outcome(&result, MEMBERSHIP_PAGE),
        Outcome::Redirect { .. }
    ));
    assert!(store.transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_requests_never_reach_the_gateway() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1"]));

    let anonymous = PurchaseRequest {
        user: None,
        token: Some("tok_1"),
    };
    assert!(matches!(
        purchase_membership(anonymous, "semester", gateway(&fake), &store).await,
        Err(PurchaseError::NotAuthenticated)
    ));

    let tokenless = PurchaseRequest {
        user: Some(&buyer),
        token: Some("  "),
    };
    assert!(matches!(
        purchase_membership(tokenless, "semester", gateway(&fake), &store).await,
        Err(PurchaseError::MissingToken)
    ));

    assert!(matches!(
        purchase_membership(request(&buyer, "tok_1"), "lifetime", gateway(&fake), &store).await,
        Err(PurchaseError::UnknownMembershipType(name)) if name == "lifetime"
    ));

    assert!(matches!(
        purchase_membership(request(&buyer, "tok_1"), "semester", None, &store).await,
        Err(PurchaseError::MisconfiguredGateway)
    ));

    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn unseeded_memberships_are_a_server_problem() {
    let store = acm_general::db::MemoryStore::new();
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1"]));

    let err = purchase_membership(request(&buyer, "tok_1"), "semester", gateway(&fake), &store)
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::ProductMissing(_)));
    assert!(err.is_server_error());
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn products_are_recorded_without_touching_membership() {
    let (store, products) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1"]));
    let year = products
        .iter()
        .find(|product| product.tag == "membership-year")
        .unwrap();

    let receipt = purchase_product(request(&buyer, "tok_1"), year.id, gateway(&fake), &store)
        .await
        .unwrap();
    assert_eq!(receipt.transaction.cost, Money::from_cents(YEAR_COST));
    assert_eq!(receipt.user.membership_expiration, None);
    assert_eq!(
        store.user_by_id(buyer.id).await.unwrap().unwrap().membership_expiration,
        None
    );

    match purchase_outcome(&Ok(receipt), MEMBERSHIP_PAGE) {
        Outcome::Redirect { target, flash } => {
            assert_eq!(target, "/");
            assert!(flash.unwrap().message.contains("Year Membership"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_products_are_not_found() {
    let (store, _) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1"]));

    let result = purchase_product(
        request(&buyer, "tok_1"),
        uuid::Uuid::new_v4(),
        gateway(&fake),
        &store,
    )
    .await;
    assert!(matches!(result, Err(PurchaseError::UnknownProduct(_))));
    assert_eq!(
        purchase_outcome(&result, MEMBERSHIP_PAGE).status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn seeding_keeps_existing_prices() {
    let (store, first) = membership_store().await;
    let second = MembershipType::seed(
        SIG_ID,
        [Money::from_cents(1), Money::from_cents(2)],
        &store,
    )
    .await
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.products().await.unwrap().len(), 2);
    assert_eq!(store.categories().await.unwrap().len(), 1);
}

#[tokio::test]
async fn products_must_fit_in_the_ledger() {
    let (store, products) = membership_store().await;
    let template = &products[0];

    let err = Product::create(
        NewProduct {
            tag: "t-shirt".to_owned(),
            name: "T-Shirt".to_owned(),
            cost: Money::from_cents(1500),
            description: "x".repeat(501),
            category_id: template.category_id,
            sig_id: template.sig_id.clone(),
        },
        &store,
    )
    .await
    .unwrap_err();
    match err {
        AppError::Validation(errors) => assert!(errors.contains("description")),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = Product::update(
        template.id,
        ProductUpdate {
            description: Some("x".repeat(501)),
            ..ProductUpdate::default()
        },
        &store,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn purchases_the_ledger_would_refuse_are_never_charged() {
    let (store, products) = membership_store().await;
    let buyer = register("buyer@mst.edu", &store).await;
    let fake = Arc::new(FakeGateway::charging(&["ch_1", "ch_2"]));
    let template = &products[0];
    // written straight to the store, as older rows might have been
    let oversized = store
        .insert_product(NewProduct {
            tag: "banquet".to_owned(),
            name: "Banquet Ticket".to_owned(),
            cost: Money::from_cents(1000),
            description: "x".repeat(501),
            category_id: template.category_id,
            sig_id: template.sig_id.clone(),
        })
        .await
        .unwrap();

    let result = purchase_product(request(&buyer, "tok_1"), oversized.id, gateway(&fake), &store).await;
    assert!(matches!(
        result,
        Err(PurchaseError::Store(AppError::Validation(_)))
    ));

    let long_token = "t".repeat(101);
    let result =
        purchase_membership(request(&buyer, &long_token), "semester", gateway(&fake), &store).await;
    assert!(matches!(
        result,
        Err(PurchaseError::Store(AppError::Validation(_)))
    ));
    assert_eq!(
        purchase_outcome(&result, MEMBERSHIP_PAGE).status(),
        StatusCode::BAD_REQUEST
    );

    assert_eq!(fake.calls(), 0);
    assert!(store.transactions().await.unwrap().is_empty());
}
