//! Escrow state machine tests
//!
//! Database-backed tests are ignored by default and run against
//! TEST_DATABASE_URL; transition guards that need no database are tested
//! directly.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use couponbay_server::coupon::{CouponService, CouponStatus};
use couponbay_server::escrow::{sweep_tick, EscrowService, PaymentStatus};
use couponbay_server::models::User;
use couponbay_server::notification::NotificationService;
use couponbay_server::reputation::ReputationService;

/// Helper to create a test database pool
async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/couponbay_test".to_string());

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn escrow_service(pool: &PgPool) -> EscrowService {
    escrow_service_with_window(pool, 15)
}

fn escrow_service_with_window(pool: &PgPool, verification_window_minutes: i64) -> EscrowService {
    EscrowService::new(
        pool.clone(),
        CouponService::new(pool.clone()),
        ReputationService::new(pool.clone()),
        NotificationService::new(pool.clone()),
        verification_window_minutes,
    )
}

async fn insert_user(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, name) VALUES ($1, $2, 'Test User')")
        .bind(id)
        .bind(format!("{}@example.com", id))
        .execute(pool)
        .await
        .expect("Failed to insert user");
    id
}

async fn insert_approved_coupon(pool: &PgPool, seller_id: Uuid, price: i64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO coupons (id, seller_id, title, code, price, status, expiry_date)
        VALUES ($1, $2, 'Test coupon', 'TESTCODE', $3, 'approved', $4)
        "#,
    )
    .bind(id)
    .bind(seller_id)
    .bind(price)
    .bind(Utc::now() + Duration::days(7))
    .execute(pool)
    .await
    .expect("Failed to insert coupon");
    id
}

async fn seller_reputation(pool: &PgPool, seller_id: Uuid) -> (i32, i32, bool) {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(seller_id)
        .fetch_one(pool)
        .await
        .expect("Failed to read seller reputation");
    (user.trust_score, user.warnings_count, user.is_banned)
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_purchase_then_confirm_releases_funds() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 10000).await;

    let (tx, coupon) = escrow.create_purchase(buyer, coupon_id).await.unwrap();
    assert_eq!(tx.payment_status, PaymentStatus::Holding);
    assert_eq!(tx.amount, 10000);
    assert_eq!(coupon.code, "TESTCODE");
    assert!(tx.completed_at.is_none());

    let released = escrow.confirm(tx.id, buyer).await.unwrap();
    assert_eq!(released.payment_status, PaymentStatus::Released);
    assert!(released.buyer_confirmed);
    assert!(released.completed_at.is_some());

    // Coupon finalized as sold
    let (status, is_sold): (CouponStatus, bool) =
        sqlx::query_as("SELECT status, is_sold FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, CouponStatus::Sold);
    assert!(is_sold);

    // Seller rewarded, capped at 100
    let (trust, warnings, banned) = seller_reputation(&pool, seller).await;
    assert_eq!(trust, 100);
    assert_eq!(warnings, 0);
    assert!(!banned);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_dispute_then_confirm_never_double_applies() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();

    let refunded = escrow.dispute(tx.id, buyer, "Code did not work").await.unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    assert_eq!(refunded.dispute_reason.as_deref(), Some("Code did not work"));

    // The losing side of the race gets an explicit status error
    let err = escrow.confirm(tx.id, buyer).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATUS");

    // Coupon reverted to its pre-purchase state
    let (status, is_sold, coupon_buyer): (CouponStatus, bool, Option<Uuid>) =
        sqlx::query_as("SELECT status, is_sold, buyer_id FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, CouponStatus::Approved);
    assert!(!is_sold);
    assert_eq!(coupon_buyer, None);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_auto_confirm_on_terminal_transaction_is_noop() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();
    escrow.confirm(tx.id, buyer).await.unwrap();

    // Sweep racing a buyer action tolerates the loss silently
    let result = escrow.auto_confirm(tx.id).await.unwrap();
    assert!(result.is_none());

    // Trust was rewarded exactly once
    let (trust, _, _) = seller_reputation(&pool, seller).await;
    assert_eq!(trust, 100);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_confirm_by_wrong_actor_is_forbidden() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let stranger = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();

    let err = escrow.confirm(tx.id, stranger).await.unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");

    let err = escrow.dispute(tx.id, stranger, "bad").await.unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_dispute_requires_reason() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();

    let err = escrow.dispute(tx.id, buyer, "   ").await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Transaction untouched
    let current = escrow.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(current.payment_status, PaymentStatus::Holding);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_second_purchase_of_same_coupon_rejected() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let other_buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    escrow.create_purchase(buyer, coupon_id).await.unwrap();

    // The coupon is reserved, so the precondition chain reports sold
    let err = escrow
        .create_purchase(other_buyer, coupon_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "COUPON_ALREADY_SOLD");
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_three_disputes_ban_seller() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let seller = insert_user(&pool).await;

    // First dispute: trust 100 -> 50, one warning, no ban
    let buyer1 = insert_user(&pool).await;
    let coupon1 = insert_approved_coupon(&pool, seller, 10000).await;
    let (tx1, _) = escrow.create_purchase(buyer1, coupon1).await.unwrap();
    escrow.dispute(tx1.id, buyer1, "not working").await.unwrap();

    let (trust, warnings, banned) = seller_reputation(&pool, seller).await;
    assert_eq!((trust, warnings, banned), (50, 1, false));

    // Second dispute: trust 50 -> 0, two warnings, still no ban (the ban
    // rule sees the pre-penalty score)
    let buyer2 = insert_user(&pool).await;
    let coupon2 = insert_approved_coupon(&pool, seller, 10000).await;
    let (tx2, _) = escrow.create_purchase(buyer2, coupon2).await.unwrap();
    escrow.dispute(tx2.id, buyer2, "invalid code").await.unwrap();

    let (trust, warnings, banned) = seller_reputation(&pool, seller).await;
    assert_eq!((trust, warnings, banned), (0, 2, false));

    // Third dispute crosses the warning threshold
    let buyer3 = insert_user(&pool).await;
    let coupon3 = insert_approved_coupon(&pool, seller, 10000).await;
    let (tx3, _) = escrow.create_purchase(buyer3, coupon3).await.unwrap();
    escrow.dispute(tx3.id, buyer3, "expired code").await.unwrap();

    let (trust, warnings, banned) = seller_reputation(&pool, seller).await;
    assert_eq!((trust, warnings, banned), (0, 3, true));

    // Exactly one ban notification was created
    let (ban_notices,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND kind = 'ban'",
    )
    .bind(seller)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(ban_notices, 1);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_completed_at_set_iff_terminal() {
    let pool = setup_test_db().await;
    let escrow = escrow_service(&pool);

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;

    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();
    assert!(tx.payment_status.is_active());
    assert!(tx.completed_at.is_none());

    let released = escrow.confirm(tx.id, buyer).await.unwrap();
    assert!(released.payment_status.is_terminal());
    assert!(released.completed_at.is_some());

    // Invariant over the whole table
    let (violations,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM transactions
        WHERE (completed_at IS NOT NULL)
            != (payment_status IN ('released', 'completed', 'refunded', 'failed'))
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(violations, 0);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_sweep_warns_expiring_purchase_once() {
    let pool = setup_test_db().await;
    // A 3-minute window puts the purchase inside a 5-minute lookahead
    // without expiring it during the test.
    let escrow = escrow_service_with_window(&pool, 3);
    let notifications = NotificationService::new(pool.clone());

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;
    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();

    let mut warned = HashSet::new();
    sweep_tick(&escrow, 5, &mut warned).await.unwrap();
    sweep_tick(&escrow, 5, &mut warned).await.unwrap();

    // Two ticks over the same window emit exactly one warning
    let warnings: Vec<_> = notifications
        .list_for_user(buyer)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == "expiry_warning")
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warned.contains(&tx.id));

    // Warning only; the window has not lapsed
    let tx = escrow.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.payment_status, PaymentStatus::Holding);
}

#[tokio::test]
#[ignore] // Requires database setup
async fn test_sweep_auto_confirms_expired_purchase() {
    let pool = setup_test_db().await;
    // Zero-minute window: the purchase is past its deadline immediately.
    let escrow = escrow_service_with_window(&pool, 0);
    let notifications = NotificationService::new(pool.clone());

    let buyer = insert_user(&pool).await;
    let seller = insert_user(&pool).await;
    let coupon_id = insert_approved_coupon(&pool, seller, 5000).await;
    let (tx, _) = escrow.create_purchase(buyer, coupon_id).await.unwrap();

    let mut warned = HashSet::new();
    sweep_tick(&escrow, 5, &mut warned).await.unwrap();

    // Released without a buyer confirmation
    let released = escrow.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(released.payment_status, PaymentStatus::Released);
    assert!(!released.buyer_confirmed);
    assert!(released.completed_at.is_some());

    let (status, is_sold): (CouponStatus, bool) =
        sqlx::query_as("SELECT status, is_sold FROM coupons WHERE id = $1")
            .bind(coupon_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, CouponStatus::Sold);
    assert!(is_sold);

    // A second tick is a no-op on the now-terminal transaction
    sweep_tick(&escrow, 5, &mut warned).await.unwrap();
    let auto_confirms: Vec<_> = notifications
        .list_for_user(buyer)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == "auto_confirm")
        .collect();
    assert_eq!(auto_confirms.len(), 1);
}
