use crate::{
    catalog::Catalog,
    config::{Config, CorsConfig, DatabaseConfig, LifecycleConfig, SchedulerConfig, StorageConfig},
    db::{
        memory::MemoryStore,
        models::{
            catalog::{Event, EventCreateDBRequest, EventStatus, TicketType, TicketTypeCreateDBRequest, User, UserCreateDBRequest},
            discounts::{Coupon, CouponCreateDBRequest, Voucher, VoucherCreateDBRequest},
            points::{PointEntry, PointEntryCreateDBRequest, PointSource},
            transactions::Transaction,
        },
        store::{Store, UnitBudget},
    },
    lifecycle::TransactionLifecycle,
    metrics::LifecycleMetrics,
    notifications::{
        mailer::{MailError, Mailer, OutgoingEmail},
        Notifier,
    },
    storage::InMemoryProofStorage,
    types::{DiscountType, EventId, Idr, Role, TicketTypeId, TransactionId, UserId},
    AppState,
};
use async_trait::async_trait;
use axum_test::{TestRequest, TestServer};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use prometheus::{Encoder, Registry, TextEncoder};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use uuid::Uuid;

pub const TEST_BUDGET: UnitBudget = UnitBudget::new(Duration::from_secs(5), Duration::from_secs(10));

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig::Memory,
        storage: StorageConfig::Memory,
        scheduler: SchedulerConfig {
            enabled: false,
            ..Default::default()
        },
        cors: CorsConfig {
            allowed_origins: vec![],
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    }
}

/// Records every email instead of sending it
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().expect("mailer lock poisoned").push(email.clone());
        Ok(())
    }
}

/// Fails every delivery
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), MailError> {
        Err(MailError::Transport("connection refused".to_string()))
    }
}

/// A lifecycle wired to in-memory collaborators that tests can inspect
pub struct TestHarness {
    pub store: MemoryStore,
    pub lifecycle: TransactionLifecycle,
    pub catalog: Catalog,
    pub mailer: RecordingMailer,
    pub proofs: InMemoryProofStorage,
    pub registry: Registry,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_lifecycle_config(LifecycleConfig::default())
    }

    pub fn with_lifecycle_config(config: LifecycleConfig) -> Self {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::default();
        let proofs = InMemoryProofStorage::default();
        let registry = Registry::new();
        let metrics = LifecycleMetrics::new(&registry).expect("Failed to register metrics");

        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let notifier = Notifier::new(shared.clone(), Arc::new(mailer.clone()), TEST_BUDGET, 3, 100);
        let catalog = Catalog::new(shared.clone(), TEST_BUDGET);
        let lifecycle = TransactionLifecycle::builder()
            .store(shared)
            .config(config)
            .notifier(notifier)
            .proofs(Arc::new(proofs.clone()))
            .metrics(metrics)
            .build();

        Self {
            store,
            lifecycle,
            catalog,
            mailer,
            proofs,
            registry,
        }
    }

    /// Wait for background email deliveries to finish
    pub async fn settle_outbox(&self) {
        for _ in 0..200 {
            let mut unit = self.store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
            // Looking a day ahead also counts rows whose delivery is in flight
            let horizon = Utc::now() + ChronoDuration::days(1);
            if unit
                .pending_notifications(100, horizon)
                .await
                .expect("Failed to read outbox")
                .is_empty()
            {
                return;
            }
            drop(unit);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("notification outbox did not settle");
    }

    pub fn render_metrics(&self) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .expect("Failed to encode metrics");
        String::from_utf8(buffer).expect("Metrics are not UTF-8")
    }
}

pub fn create_test_app() -> (TestServer, TestHarness) {
    let harness = TestHarness::new();
    let state = AppState::builder()
        .config(create_test_config())
        .lifecycle(harness.lifecycle.clone())
        .catalog(harness.catalog.clone())
        .build();
    let router = crate::build_router(state, None).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, harness)
}

pub fn add_auth_headers(user: &User) -> [(String, String); 2] {
    let config = create_test_config().auth.proxy_header;
    [
        (config.user_header, user.id.to_string()),
        (config.role_header, user.role.to_string()),
    ]
}

pub fn as_user(request: TestRequest, user: &User) -> TestRequest {
    add_auth_headers(user)
        .into_iter()
        .fold(request, |request, (name, value)| request.add_header(name, value))
}

pub async fn create_test_user(store: &dyn Store, role: Role) -> User {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let id = Uuid::new_v4();
    let user = unit
        .insert_user(&UserCreateDBRequest {
            name: format!("Test {role} {}", id.simple()),
            email: format!("user_{}@example.com", id.simple()),
            role,
        })
        .await
        .expect("Failed to create test user");
    unit.commit().await.expect("Failed to commit");
    user
}

pub async fn create_test_event(store: &dyn Store, organizer_id: UserId) -> Event {
    create_test_event_with_status(store, organizer_id, EventStatus::Published).await
}

pub async fn create_test_event_with_status(store: &dyn Store, organizer_id: UserId, status: EventStatus) -> Event {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let starts_at = Utc::now() + ChronoDuration::days(30);
    let event = unit
        .insert_event(&EventCreateDBRequest {
            organizer_id,
            title: format!("Test Event {}", Uuid::new_v4().simple()),
            category: "music".to_string(),
            starts_at,
            ends_at: starts_at + ChronoDuration::hours(4),
            base_price_idr: 100_000,
            status,
        })
        .await
        .expect("Failed to create test event");
    unit.commit().await.expect("Failed to commit");
    event
}

pub async fn create_test_ticket_type(store: &dyn Store, event_id: EventId, price_idr: Idr, seats: i32) -> TicketType {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let ticket_type = unit
        .insert_ticket_type(&TicketTypeCreateDBRequest {
            event_id,
            name: "Regular".to_string(),
            price_idr,
            total_seats: seats,
        })
        .await
        .expect("Failed to create test ticket type");
    unit.commit().await.expect("Failed to commit");
    ticket_type
}

/// Active voucher valid from yesterday until next week
pub async fn create_test_voucher(
    store: &dyn Store,
    event: &Event,
    code: &str,
    discount_type: DiscountType,
    discount_value: Idr,
    max_uses: Option<i32>,
) -> Voucher {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let voucher = unit
        .insert_voucher(&VoucherCreateDBRequest {
            event_id: event.id,
            organizer_id: event.organizer_id,
            code: code.to_string(),
            discount_type,
            discount_value,
            starts_at: Utc::now() - ChronoDuration::days(1),
            ends_at: Utc::now() + ChronoDuration::days(7),
            max_uses,
        })
        .await
        .expect("Failed to create test voucher");
    unit.commit().await.expect("Failed to commit");
    voucher
}

pub async fn create_test_coupon(
    store: &dyn Store,
    user_id: UserId,
    code: &str,
    discount_type: DiscountType,
    discount_value: Idr,
) -> Coupon {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let coupon = unit
        .insert_coupon(&CouponCreateDBRequest {
            user_id,
            code: code.to_string(),
            discount_type,
            discount_value,
            expires_at: Utc::now() + ChronoDuration::days(90),
        })
        .await
        .expect("Failed to create test coupon");
    unit.commit().await.expect("Failed to commit");
    coupon
}

/// Append a REFERRAL_REWARD entry and move the cached balance by the same amount,
/// even when the entry is already expired
pub async fn grant_test_points(store: &dyn Store, user_id: UserId, delta: Idr, expires_at: Option<DateTime<Utc>>) -> PointEntry {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    let entry = unit
        .insert_point_entry(&PointEntryCreateDBRequest {
            user_id,
            delta,
            source: PointSource::ReferralReward,
            expires_at,
            transaction_id: None,
        })
        .await
        .expect("Failed to grant test points");
    unit.adjust_cached_points_balance(user_id, delta)
        .await
        .expect("Failed to adjust cached balance");
    unit.commit().await.expect("Failed to commit");
    entry
}

pub async fn ticket_seats(store: &dyn Store, id: TicketTypeId) -> i32 {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    unit.ticket_types(&[id]).await.expect("Failed to load ticket type")[0].available_seats
}

pub async fn load_transaction(store: &dyn Store, id: TransactionId) -> Transaction {
    let mut unit = store.begin(TEST_BUDGET).await.expect("Failed to begin unit");
    unit.transaction(id)
        .await
        .expect("Failed to load transaction")
        .expect("Transaction missing")
}
