//! Organizer-side management of events, ticket types and vouchers.
//!
//! Events start as DRAFT. A draft can be edited, given ticket types and deleted; publishing
//! freezes the event and its ticket types and opens it for sale. Vouchers stay editable
//! after publishing so promotions can be tuned while tickets sell.

use crate::{
    db::{
        errors::DbError,
        models::{
            catalog::{
                Event, EventCreateDBRequest, EventStatus, EventUpdateDBRequest, TicketType, TicketTypeCreateDBRequest,
                TicketTypeUpdateDBRequest,
            },
            discounts::{Voucher, VoucherCreateDBRequest, VoucherUpdateDBRequest},
        },
        store::{Store, UnitBudget, UnitOfWork},
    },
    errors::{Error, Result},
    types::{DiscountType, EventId, Idr, TicketTypeId, UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

/// Name of the ticket type created alongside an event that declares default seats
pub const DEFAULT_TICKET_TYPE: &str = "General Admission";

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub base_price_idr: Idr,
    /// Seats for a default ticket type priced at the base price
    pub default_seats: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewTicketType {
    pub name: String,
    pub price_idr: Idr,
    pub total_seats: i32,
}

#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Idr,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct EventDetails {
    pub event: Event,
    pub ticket_types: Vec<TicketType>,
}

fn non_blank(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn validate_window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<()> {
    if ends_at <= starts_at {
        return Err(Error::bad_request("End time must be after start time"));
    }
    Ok(())
}

fn validate_price(price: Idr) -> Result<()> {
    if price < 0 {
        return Err(Error::bad_request("Price must not be negative"));
    }
    Ok(())
}

fn validate_seats(seats: i32) -> Result<()> {
    if seats <= 0 {
        return Err(Error::bad_request("Seats must be greater than zero"));
    }
    Ok(())
}

fn validate_discount(discount_type: DiscountType, value: Idr) -> Result<()> {
    if value <= 0 {
        return Err(Error::bad_request("Discount value must be greater than zero"));
    }
    if discount_type == DiscountType::Percent && value > 100 {
        return Err(Error::bad_request("Percent discounts cannot exceed 100"));
    }
    Ok(())
}

fn validate_max_uses(max_uses: Option<i32>) -> Result<()> {
    if max_uses.is_some_and(|max| max < 0) {
        return Err(Error::bad_request("Max uses must not be negative"));
    }
    Ok(())
}

fn frozen(event: &Event) -> Error {
    Error::conflict(format!("Event {} is published and can no longer be edited", event.id))
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
    budget: UnitBudget,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, budget: UnitBudget) -> Self {
        Self { store, budget }
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(self.store.begin(self.budget).await?)
    }

    /// Lock an event the organizer owns
    async fn owned_event(unit: &mut dyn UnitOfWork, organizer_id: UserId, event_id: EventId) -> Result<Event> {
        let event = unit
            .lock_event(event_id)
            .await?
            .ok_or_else(|| Error::not_found("Event", event_id))?;
        if event.organizer_id != organizer_id {
            return Err(Error::Forbidden {
                message: format!("Event {event_id} belongs to another organizer"),
            });
        }
        Ok(event)
    }

    /// Lock an owned event that is still a draft
    async fn draft_event(unit: &mut dyn UnitOfWork, organizer_id: UserId, event_id: EventId) -> Result<Event> {
        let event = Self::owned_event(unit, organizer_id, event_id).await?;
        if event.status != EventStatus::Draft {
            return Err(frozen(&event));
        }
        Ok(event)
    }

    async fn load_ticket_type(unit: &mut dyn UnitOfWork, id: TicketTypeId) -> Result<TicketType> {
        unit.ticket_types(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("Ticket type", id))
    }

    // ----- events -----

    /// Create a DRAFT event, with a default ticket type when seats are given
    #[instrument(skip(self, request), fields(title = %request.title), err)]
    pub async fn create_event(&self, organizer_id: UserId, request: NewEvent) -> Result<EventDetails> {
        let title = non_blank("Title", &request.title)?;
        let category = non_blank("Category", &request.category)?;
        validate_window(request.starts_at, request.ends_at)?;
        validate_price(request.base_price_idr)?;
        if let Some(seats) = request.default_seats {
            validate_seats(seats)?;
        }

        let mut unit = self.begin().await?;
        unit.user(organizer_id)
            .await?
            .ok_or_else(|| Error::not_found("User", organizer_id))?;
        let event = unit
            .insert_event(&EventCreateDBRequest {
                organizer_id,
                title,
                category,
                starts_at: request.starts_at,
                ends_at: request.ends_at,
                base_price_idr: request.base_price_idr,
                status: EventStatus::Draft,
            })
            .await?;

        let mut ticket_types = Vec::new();
        if let Some(total_seats) = request.default_seats {
            let ticket_type = unit
                .insert_ticket_type(&TicketTypeCreateDBRequest {
                    event_id: event.id,
                    name: DEFAULT_TICKET_TYPE.to_string(),
                    price_idr: event.base_price_idr,
                    total_seats,
                })
                .await?;
            ticket_types.push(ticket_type);
        }
        unit.commit().await?;

        info!(event_id = %event.id, %organizer_id, "Draft event created");
        Ok(EventDetails { event, ticket_types })
    }

    #[instrument(skip(self, changes), err)]
    pub async fn update_event(&self, organizer_id: UserId, event_id: EventId, changes: EventUpdateDBRequest) -> Result<Event> {
        let mut unit = self.begin().await?;
        let event = Self::draft_event(unit.as_mut(), organizer_id, event_id).await?;

        let changes = EventUpdateDBRequest {
            title: changes.title.as_deref().map(|title| non_blank("Title", title)).transpose()?,
            category: changes
                .category
                .as_deref()
                .map(|category| non_blank("Category", category))
                .transpose()?,
            ..changes
        };
        validate_window(
            changes.starts_at.unwrap_or(event.starts_at),
            changes.ends_at.unwrap_or(event.ends_at),
        )?;
        if let Some(price) = changes.base_price_idr {
            validate_price(price)?;
        }

        let event = unit.update_event(event_id, &changes).await?;
        unit.commit().await?;
        Ok(event)
    }

    /// Open a draft for sale. It needs at least one ticket type.
    #[instrument(skip(self), err)]
    pub async fn publish_event(&self, organizer_id: UserId, event_id: EventId) -> Result<EventDetails> {
        let mut unit = self.begin().await?;
        let event = Self::draft_event(unit.as_mut(), organizer_id, event_id).await?;
        let ticket_types = unit.event_ticket_types(event_id).await?;
        if ticket_types.is_empty() {
            return Err(Error::bad_request(format!("Event {event_id} has no ticket types to sell")));
        }
        if !unit
            .set_event_status_if(event_id, EventStatus::Draft, EventStatus::Published)
            .await?
        {
            return Err(frozen(&event));
        }
        unit.commit().await?;

        info!(%event_id, ticket_types = ticket_types.len(), "Event published");
        Ok(EventDetails {
            event: Event {
                status: EventStatus::Published,
                ..event
            },
            ticket_types,
        })
    }

    /// Delete a draft together with its ticket types and vouchers
    #[instrument(skip(self), err)]
    pub async fn delete_event(&self, organizer_id: UserId, event_id: EventId) -> Result<()> {
        let mut unit = self.begin().await?;
        let event = Self::draft_event(unit.as_mut(), organizer_id, event_id).await?;
        if !unit.delete_draft_event(event_id).await? {
            return Err(frozen(&event));
        }
        unit.commit().await?;
        info!(%event_id, "Draft event deleted");
        Ok(())
    }

    // ----- ticket types -----

    #[instrument(skip(self, request), err)]
    pub async fn create_ticket_type(&self, organizer_id: UserId, event_id: EventId, request: NewTicketType) -> Result<TicketType> {
        let name = non_blank("Name", &request.name)?;
        validate_price(request.price_idr)?;
        validate_seats(request.total_seats)?;

        let mut unit = self.begin().await?;
        Self::draft_event(unit.as_mut(), organizer_id, event_id).await?;
        let ticket_type = unit
            .insert_ticket_type(&TicketTypeCreateDBRequest {
                event_id,
                name,
                price_idr: request.price_idr,
                total_seats: request.total_seats,
            })
            .await?;
        unit.commit().await?;
        Ok(ticket_type)
    }

    /// Edit a draft's ticket type. A new seat count resets availability, drafts having no sales.
    #[instrument(skip(self, changes), err)]
    pub async fn update_ticket_type(
        &self,
        organizer_id: UserId,
        id: TicketTypeId,
        changes: TicketTypeUpdateDBRequest,
    ) -> Result<TicketType> {
        let changes = TicketTypeUpdateDBRequest {
            name: changes.name.as_deref().map(|name| non_blank("Name", name)).transpose()?,
            ..changes
        };
        if let Some(price) = changes.price_idr {
            validate_price(price)?;
        }
        if let Some(seats) = changes.total_seats {
            validate_seats(seats)?;
        }

        let mut unit = self.begin().await?;
        let ticket_type = Self::load_ticket_type(unit.as_mut(), id).await?;
        Self::draft_event(unit.as_mut(), organizer_id, ticket_type.event_id).await?;
        let ticket_type = unit.update_ticket_type(id, &changes).await?;
        unit.commit().await?;
        Ok(ticket_type)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_ticket_type(&self, organizer_id: UserId, id: TicketTypeId) -> Result<()> {
        let mut unit = self.begin().await?;
        let ticket_type = Self::load_ticket_type(unit.as_mut(), id).await?;
        Self::draft_event(unit.as_mut(), organizer_id, ticket_type.event_id).await?;
        if !unit.delete_ticket_type(id).await? {
            return Err(Error::not_found("Ticket type", id));
        }
        unit.commit().await?;
        Ok(())
    }

    // ----- vouchers -----

    #[instrument(skip(self, request), fields(code = %request.code), err)]
    pub async fn create_voucher(&self, organizer_id: UserId, event_id: EventId, request: NewVoucher) -> Result<Voucher> {
        let code = non_blank("Code", &request.code)?;
        validate_discount(request.discount_type, request.discount_value)?;
        validate_window(request.starts_at, request.ends_at)?;
        validate_max_uses(request.max_uses)?;

        let mut unit = self.begin().await?;
        Self::owned_event(unit.as_mut(), organizer_id, event_id).await?;
        let voucher = unit
            .insert_voucher(&VoucherCreateDBRequest {
                event_id,
                organizer_id,
                code,
                discount_type: request.discount_type,
                discount_value: request.discount_value,
                starts_at: request.starts_at,
                ends_at: request.ends_at,
                max_uses: request.max_uses,
            })
            .await
            .map_err(|e| match e {
                DbError::UniqueViolation { .. } => {
                    Error::conflict(format!("Voucher code {} already exists for this event", request.code.trim()))
                }
                other => other.into(),
            })?;
        unit.commit().await?;

        info!(voucher_id = %voucher.id, %event_id, "Voucher created");
        Ok(voucher)
    }

    /// Edit a voucher. The cap cannot drop below the uses already counted.
    #[instrument(skip(self, changes), err)]
    pub async fn update_voucher(&self, organizer_id: UserId, id: VoucherId, changes: VoucherUpdateDBRequest) -> Result<Voucher> {
        let mut unit = self.begin().await?;
        let voucher = unit.voucher(id).await?.ok_or_else(|| Error::not_found("Voucher", id))?;
        Self::owned_event(unit.as_mut(), organizer_id, voucher.event_id).await?;

        validate_discount(
            changes.discount_type.unwrap_or(voucher.discount_type),
            changes.discount_value.unwrap_or(voucher.discount_value),
        )?;
        validate_window(
            changes.starts_at.unwrap_or(voucher.starts_at),
            changes.ends_at.unwrap_or(voucher.ends_at),
        )?;
        let max_uses = changes.max_uses.unwrap_or(voucher.max_uses);
        validate_max_uses(max_uses)?;

        let cap_below_usage = || Error::conflict(format!("Voucher {id} has already been used more often than the new cap allows"));
        if max_uses.is_some_and(|max| max < voucher.used_count) {
            return Err(cap_below_usage());
        }
        let voucher = unit.update_voucher(id, &changes).await.map_err(|e| match e {
            DbError::CheckViolation { constraint, .. } if constraint == "vouchers_usage_check" => cap_below_usage(),
            other => other.into(),
        })?;
        unit.commit().await?;
        Ok(voucher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lifecycle::NewTransaction,
        ledger::inventory::ItemRequest,
        test_utils::{create_test_event, create_test_ticket_type, create_test_user, create_test_voucher, TestHarness, TEST_BUDGET},
        types::Role,
    };
    use chrono::Duration as ChronoDuration;

    fn new_event(default_seats: Option<i32>) -> NewEvent {
        let starts_at = Utc::now() + ChronoDuration::days(14);
        NewEvent {
            title: "  Jazz Night  ".to_string(),
            category: "Music".to_string(),
            starts_at,
            ends_at: starts_at + ChronoDuration::hours(4),
            base_price_idr: 250_000,
            default_seats,
        }
    }

    fn new_voucher(code: &str) -> NewVoucher {
        let now = Utc::now();
        NewVoucher {
            code: code.to_string(),
            discount_type: DiscountType::Percent,
            discount_value: 10,
            starts_at: now - ChronoDuration::days(1),
            ends_at: now + ChronoDuration::days(7),
            max_uses: Some(5),
        }
    }

    #[test_log::test(tokio::test)]
    async fn new_events_are_drafts_with_a_default_ticket_type() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;

        let details = harness.catalog.create_event(organizer.id, new_event(Some(50))).await.unwrap();
        assert_eq!(details.event.status, EventStatus::Draft);
        assert_eq!(details.event.title, "Jazz Night");
        assert_eq!(details.ticket_types.len(), 1);
        assert_eq!(details.ticket_types[0].name, DEFAULT_TICKET_TYPE);
        assert_eq!(details.ticket_types[0].price_idr, 250_000);
        assert_eq!(details.ticket_types[0].available_seats, 50);

        let bare = harness.catalog.create_event(organizer.id, new_event(None)).await.unwrap();
        assert!(bare.ticket_types.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn event_input_is_validated() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let catalog = &harness.catalog;

        let backwards = NewEvent {
            ends_at: Utc::now(),
            ..new_event(None)
        };
        assert!(matches!(catalog.create_event(organizer.id, backwards).await, Err(Error::BadRequest { .. })));
        let untitled = NewEvent {
            title: "   ".to_string(),
            ..new_event(None)
        };
        assert!(matches!(catalog.create_event(organizer.id, untitled).await, Err(Error::BadRequest { .. })));
        let negative = NewEvent {
            base_price_idr: -1,
            ..new_event(None)
        };
        assert!(matches!(catalog.create_event(organizer.id, negative).await, Err(Error::BadRequest { .. })));
        assert!(matches!(
            catalog.create_event(organizer.id, new_event(Some(0))).await,
            Err(Error::BadRequest { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn drafts_are_editable_until_published() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let catalog = &harness.catalog;
        let draft = catalog.create_event(organizer.id, new_event(Some(10))).await.unwrap();
        let event_id = draft.event.id;
        let general = draft.ticket_types[0].id;

        let renamed = catalog
            .update_event(
                organizer.id,
                event_id,
                EventUpdateDBRequest {
                    title: Some("Late Jazz Night".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.title, "Late Jazz Night");
        assert_eq!(renamed.category, "Music");

        let vip = catalog
            .create_ticket_type(
                organizer.id,
                event_id,
                NewTicketType {
                    name: "VIP".to_string(),
                    price_idr: 750_000,
                    total_seats: 5,
                },
            )
            .await
            .unwrap();
        let resized = catalog
            .update_ticket_type(
                organizer.id,
                general,
                TicketTypeUpdateDBRequest {
                    total_seats: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!((resized.total_seats, resized.available_seats), (20, 20));
        catalog.delete_ticket_type(organizer.id, vip.id).await.unwrap();

        let published = catalog.publish_event(organizer.id, event_id).await.unwrap();
        assert_eq!(published.event.status, EventStatus::Published);
        assert_eq!(published.ticket_types.len(), 1);

        assert!(matches!(
            catalog
                .update_event(
                    organizer.id,
                    event_id,
                    EventUpdateDBRequest {
                        title: Some("Too late".to_string()),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            catalog
                .update_ticket_type(
                    organizer.id,
                    general,
                    TicketTypeUpdateDBRequest {
                        price_idr: Some(1),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(catalog.delete_ticket_type(organizer.id, general).await, Err(Error::Conflict { .. })));
        assert!(matches!(catalog.delete_event(organizer.id, event_id).await, Err(Error::Conflict { .. })));
        assert!(matches!(catalog.publish_event(organizer.id, event_id).await, Err(Error::Conflict { .. })));

        let mut unit = harness.store.begin(TEST_BUDGET).await.unwrap();
        let stored = unit.event(event_id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Late Jazz Night");
        assert_eq!(stored.status, EventStatus::Published);
    }

    #[test_log::test(tokio::test)]
    async fn publishing_needs_a_ticket_type_and_opens_sales() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let customer = create_test_user(&harness.store, Role::Customer).await;
        let catalog = &harness.catalog;
        let draft = catalog.create_event(organizer.id, new_event(None)).await.unwrap();
        let event_id = draft.event.id;

        assert!(matches!(catalog.publish_event(organizer.id, event_id).await, Err(Error::BadRequest { .. })));

        let seats = catalog
            .create_ticket_type(
                organizer.id,
                event_id,
                NewTicketType {
                    name: "Standing".to_string(),
                    price_idr: 100_000,
                    total_seats: 3,
                },
            )
            .await
            .unwrap();
        let purchase = NewTransaction {
            event_id,
            items: vec![ItemRequest {
                ticket_type_id: seats.id,
                quantity: 1,
            }],
            voucher_code: None,
            coupon_code: None,
            points_used: None,
        };
        assert!(matches!(
            harness.lifecycle.create(customer.id, purchase.clone()).await,
            Err(Error::BadRequest { .. })
        ));

        catalog.publish_event(organizer.id, event_id).await.unwrap();
        let details = harness.lifecycle.create(customer.id, purchase).await.unwrap();
        assert_eq!(details.transaction.subtotal_idr, 100_000);
    }

    #[test_log::test(tokio::test)]
    async fn only_the_owner_manages_an_event() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let rival = create_test_user(&harness.store, Role::Organizer).await;
        let catalog = &harness.catalog;
        let draft = catalog.create_event(organizer.id, new_event(Some(10))).await.unwrap();
        let event_id = draft.event.id;

        assert!(matches!(
            catalog.update_event(rival.id, event_id, EventUpdateDBRequest::default()).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(catalog.publish_event(rival.id, event_id).await, Err(Error::Forbidden { .. })));
        assert!(matches!(catalog.delete_event(rival.id, event_id).await, Err(Error::Forbidden { .. })));
        assert!(matches!(
            catalog.delete_ticket_type(rival.id, draft.ticket_types[0].id).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            catalog.create_voucher(rival.id, event_id, new_voucher("RIVAL")).await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(
            catalog.publish_event(organizer.id, uuid::Uuid::new_v4()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn deleting_a_draft_removes_its_catalog() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let catalog = &harness.catalog;
        let draft = catalog.create_event(organizer.id, new_event(Some(10))).await.unwrap();
        let voucher = catalog.create_voucher(organizer.id, draft.event.id, new_voucher("EARLY")).await.unwrap();

        catalog.delete_event(organizer.id, draft.event.id).await.unwrap();

        let mut unit = harness.store.begin(TEST_BUDGET).await.unwrap();
        assert!(unit.event(draft.event.id).await.unwrap().is_none());
        assert!(unit.ticket_types(&[draft.ticket_types[0].id]).await.unwrap().is_empty());
        assert!(unit.voucher(voucher.id).await.unwrap().is_none());
        drop(unit);

        assert!(matches!(catalog.delete_event(organizer.id, draft.event.id).await, Err(Error::NotFound { .. })));
    }

    #[test_log::test(tokio::test)]
    async fn vouchers_stay_editable_after_publishing() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        let catalog = &harness.catalog;

        let voucher = catalog.create_voucher(organizer.id, event.id, new_voucher("  SPRING ")).await.unwrap();
        assert_eq!(voucher.code, "SPRING");
        assert!(matches!(
            catalog.create_voucher(organizer.id, event.id, new_voucher("spring")).await,
            Err(Error::Conflict { .. })
        ));

        let paused = catalog
            .update_voucher(
                organizer.id,
                voucher.id,
                VoucherUpdateDBRequest {
                    discount_value: Some(25),
                    max_uses: Some(None),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paused.discount_value, 25);
        assert_eq!(paused.max_uses, None);
        assert!(!paused.is_active);

        assert!(matches!(
            catalog
                .update_voucher(
                    organizer.id,
                    voucher.id,
                    VoucherUpdateDBRequest {
                        discount_value: Some(150),
                        ..Default::default()
                    },
                )
                .await,
            Err(Error::BadRequest { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn voucher_input_is_validated() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        let catalog = &harness.catalog;

        for request in [
            NewVoucher {
                code: " ".to_string(),
                ..new_voucher("X")
            },
            NewVoucher {
                discount_value: 0,
                ..new_voucher("ZERO")
            },
            NewVoucher {
                max_uses: Some(-1),
                ..new_voucher("NEG")
            },
            NewVoucher {
                ends_at: Utc::now() - ChronoDuration::days(2),
                ..new_voucher("BACKWARDS")
            },
        ] {
            assert!(matches!(
                catalog.create_voucher(organizer.id, event.id, request).await,
                Err(Error::BadRequest { .. })
            ));
        }
    }

    #[test_log::test(tokio::test)]
    async fn voucher_cap_cannot_drop_below_usage() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let event = create_test_event(&harness.store, organizer.id).await;
        let voucher = create_test_voucher(&harness.store, &event, "USED", DiscountType::Amount, 5_000, Some(5)).await;

        let mut unit = harness.store.begin(TEST_BUDGET).await.unwrap();
        assert!(unit.increment_voucher_usage(voucher.id).await.unwrap());
        assert!(unit.increment_voucher_usage(voucher.id).await.unwrap());
        unit.commit().await.unwrap();

        let lower = |max| VoucherUpdateDBRequest {
            max_uses: Some(Some(max)),
            ..Default::default()
        };
        assert!(matches!(
            harness.catalog.update_voucher(organizer.id, voucher.id, lower(1)).await,
            Err(Error::Conflict { .. })
        ));
        let trimmed = harness.catalog.update_voucher(organizer.id, voucher.id, lower(2)).await.unwrap();
        assert_eq!((trimmed.max_uses, trimmed.used_count), (Some(2), 2));
    }

    #[test_log::test(tokio::test)]
    async fn ticket_input_is_validated() {
        let harness = TestHarness::new();
        let organizer = create_test_user(&harness.store, Role::Organizer).await;
        let draft = harness.catalog.create_event(organizer.id, new_event(None)).await.unwrap();
        let published = create_test_event(&harness.store, organizer.id).await;
        let sold = create_test_ticket_type(&harness.store, published.id, 10_000, 5).await;

        let bad = NewTicketType {
            name: "Free".to_string(),
            price_idr: 0,
            total_seats: 0,
        };
        assert!(matches!(
            harness.catalog.create_ticket_type(organizer.id, draft.event.id, bad).await,
            Err(Error::BadRequest { .. })
        ));
        let extra = NewTicketType {
            name: "Late entry".to_string(),
            price_idr: 5_000,
            total_seats: 5,
        };
        assert!(matches!(
            harness.catalog.create_ticket_type(organizer.id, published.id, extra).await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            harness.catalog.delete_ticket_type(organizer.id, sold.id).await,
            Err(Error::Conflict { .. })
        ));
    }
}
