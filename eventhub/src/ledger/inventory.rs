//! Seat inventory per ticket type.
//!
//! `available_seats` only moves through conditional decrements on reserve and plain
//! increments on release; the store refuses anything that would leave `0..=total_seats`.

use crate::{
    db::{
        models::{catalog::TicketType, transactions::TransactionItem, transactions::TransactionItemCreateDBRequest},
        store::UnitOfWork,
    },
    errors::{Error, Result},
    types::{EventId, Idr, TicketTypeId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// One requested line of a purchase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ItemRequest {
    #[schema(value_type = String, format = "uuid")]
    pub ticket_type_id: TicketTypeId,
    pub quantity: i32,
}

/// Result of a successful reservation: priced lines ready to persist
#[derive(Debug, Clone)]
pub struct Reservation {
    pub subtotal: Idr,
    pub items: Vec<TransactionItemCreateDBRequest>,
}

pub struct Inventory<'u> {
    unit: &'u mut dyn UnitOfWork,
}

impl<'u> Inventory<'u> {
    pub fn new(unit: &'u mut dyn UnitOfWork) -> Self {
        Self { unit }
    }

    /// Read-only pre-flight check. Never sufficient on its own to hold seats.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn check_availability(&mut self, items: &[ItemRequest]) -> Result<Vec<TicketType>> {
        validate_items(items)?;
        let ticket_types = self.load(None, items).await?;
        for item in items {
            ensure_available(&ticket_types[&item.ticket_type_id], item.quantity)?;
        }

        Ok(items.iter().map(|item| ticket_types[&item.ticket_type_id].clone()).collect())
    }

    /// Price and hold seats for `items` at current prices.
    ///
    /// Every item is validated before the first decrement. A decrement that matches no row
    /// means a concurrent buyer took the seats; the caller must drop the unit so earlier
    /// decrements in this call are rolled back.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn reserve(&mut self, event_id: EventId, items: &[ItemRequest]) -> Result<Reservation> {
        validate_items(items)?;
        let ticket_types = self.load(Some(event_id), items).await?;

        let mut subtotal: Idr = 0;
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let ticket_type = &ticket_types[&item.ticket_type_id];
            ensure_available(ticket_type, item.quantity)?;
            subtotal += ticket_type.price_idr * Idr::from(item.quantity);
            priced.push(TransactionItemCreateDBRequest {
                ticket_type_id: ticket_type.id,
                quantity: item.quantity,
                unit_price_idr: ticket_type.price_idr,
            });
        }

        for item in &priced {
            if !self.unit.decrement_available_seats(item.ticket_type_id, item.quantity).await? {
                return Err(Error::SeatsNoLongerAvailable {
                    ticket_type_id: item.ticket_type_id,
                });
            }
        }

        debug!(subtotal, "Reserved seats");
        Ok(Reservation { subtotal, items: priced })
    }

    /// Give back the seats held by `items`. Must run at most once per transaction.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn release(&mut self, items: &[TransactionItem]) -> Result<()> {
        for item in items {
            if !self.unit.increment_available_seats(item.ticket_type_id, item.quantity).await? {
                return Err(Error::not_found("Ticket type", item.ticket_type_id));
            }
        }
        Ok(())
    }

    async fn load(&mut self, event_id: Option<EventId>, items: &[ItemRequest]) -> Result<HashMap<TicketTypeId, TicketType>> {
        let mut ids: Vec<TicketTypeId> = items.iter().map(|item| item.ticket_type_id).collect();
        ids.sort();
        ids.dedup();

        let ticket_types: HashMap<_, _> = self
            .unit
            .ticket_types(&ids)
            .await?
            .into_iter()
            .map(|ticket_type| (ticket_type.id, ticket_type))
            .collect();

        for id in &ids {
            match ticket_types.get(id) {
                Some(ticket_type) if event_id.map_or(true, |event_id| ticket_type.event_id == event_id) => {}
                _ => return Err(Error::not_found("Ticket type", id)),
            }
        }
        Ok(ticket_types)
    }
}

fn validate_items(items: &[ItemRequest]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::bad_request("At least one ticket item is required"));
    }
    if let Some(item) = items.iter().find(|item| item.quantity <= 0) {
        return Err(Error::bad_request(format!(
            "Quantity for ticket type {} must be positive",
            item.ticket_type_id
        )));
    }
    Ok(())
}

fn ensure_available(ticket_type: &TicketType, quantity: i32) -> Result<()> {
    if ticket_type.available_seats < quantity {
        return Err(Error::InsufficientSeats {
            ticket_type_id: ticket_type.id,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{memory::MemoryStore, store::Store},
        test_utils::{create_test_event, create_test_ticket_type, create_test_user, TEST_BUDGET},
        types::Role,
    };
    use uuid::Uuid;

    async fn available(store: &MemoryStore, id: TicketTypeId) -> i32 {
        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        unit.ticket_types(&[id]).await.unwrap()[0].available_seats
    }

    #[test_log::test(tokio::test)]
    async fn reserve_prices_at_current_price_and_decrements() {
        let store = MemoryStore::new();
        let organizer = create_test_user(&store, Role::Organizer).await;
        let event = create_test_event(&store, organizer.id).await;
        let regular = create_test_ticket_type(&store, event.id, 100_000, 10).await;
        let vip = create_test_ticket_type(&store, event.id, 250_000, 2).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let reservation = Inventory::new(unit.as_mut())
            .reserve(
                event.id,
                &[
                    ItemRequest {
                        ticket_type_id: regular.id,
                        quantity: 2,
                    },
                    ItemRequest {
                        ticket_type_id: vip.id,
                        quantity: 1,
                    },
                ],
            )
            .await
            .unwrap();
        unit.commit().await.unwrap();

        assert_eq!(reservation.subtotal, 450_000);
        assert_eq!(reservation.items.len(), 2);
        assert_eq!(reservation.items[1].unit_price_idr, 250_000);
        assert_eq!(available(&store, regular.id).await, 8);
        assert_eq!(available(&store, vip.id).await, 1);
    }

    #[test_log::test(tokio::test)]
    async fn reserve_fails_before_mutating_when_any_item_is_short() {
        let store = MemoryStore::new();
        let organizer = create_test_user(&store, Role::Organizer).await;
        let event = create_test_event(&store, organizer.id).await;
        let plenty = create_test_ticket_type(&store, event.id, 100_000, 10).await;
        let scarce = create_test_ticket_type(&store, event.id, 100_000, 1).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let err = Inventory::new(unit.as_mut())
            .reserve(
                event.id,
                &[
                    ItemRequest {
                        ticket_type_id: plenty.id,
                        quantity: 3,
                    },
                    ItemRequest {
                        ticket_type_id: scarce.id,
                        quantity: 2,
                    },
                ],
            )
            .await
            .unwrap_err();
        drop(unit);

        assert!(matches!(err, Error::InsufficientSeats { ticket_type_id } if ticket_type_id == scarce.id));
        assert_eq!(available(&store, plenty.id).await, 10);
    }

    #[test_log::test(tokio::test)]
    async fn lost_decrement_reports_seats_no_longer_available() {
        let store = MemoryStore::new();
        let organizer = create_test_user(&store, Role::Organizer).await;
        let event = create_test_event(&store, organizer.id).await;
        let ticket_type = create_test_ticket_type(&store, event.id, 100_000, 3).await;

        // Each line passes the pre-check on its own, together they overdraw
        let line = ItemRequest {
            ticket_type_id: ticket_type.id,
            quantity: 2,
        };
        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let err = Inventory::new(unit.as_mut()).reserve(event.id, &[line, line]).await.unwrap_err();
        drop(unit);

        assert!(matches!(err, Error::SeatsNoLongerAvailable { .. }));
        assert_eq!(available(&store, ticket_type.id).await, 3);
    }

    #[test_log::test(tokio::test)]
    async fn ticket_types_of_other_events_are_not_found() {
        let store = MemoryStore::new();
        let organizer = create_test_user(&store, Role::Organizer).await;
        let event = create_test_event(&store, organizer.id).await;
        let other_event = create_test_event(&store, organizer.id).await;
        let foreign = create_test_ticket_type(&store, other_event.id, 100_000, 3).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let err = Inventory::new(unit.as_mut())
            .reserve(
                event.id,
                &[ItemRequest {
                    ticket_type_id: foreign.id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let err = Inventory::new(unit.as_mut())
            .check_availability(&[ItemRequest {
                ticket_type_id: Uuid::new_v4(),
                quantity: 1,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn malformed_items_are_rejected() {
        let store = MemoryStore::new();
        let mut unit = store.begin(TEST_BUDGET).await.unwrap();

        let err = Inventory::new(unit.as_mut()).check_availability(&[]).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        let err = Inventory::new(unit.as_mut())
            .check_availability(&[ItemRequest {
                ticket_type_id: Uuid::new_v4(),
                quantity: 0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn check_availability_has_no_side_effects() {
        let store = MemoryStore::new();
        let organizer = create_test_user(&store, Role::Organizer).await;
        let event = create_test_event(&store, organizer.id).await;
        let ticket_type = create_test_ticket_type(&store, event.id, 100_000, 2).await;

        let mut unit = store.begin(TEST_BUDGET).await.unwrap();
        let mut inventory = Inventory::new(unit.as_mut());
        let item = ItemRequest {
            ticket_type_id: ticket_type.id,
            quantity: 2,
        };
        inventory.check_availability(&[item]).await.unwrap();
        inventory.check_availability(&[item]).await.unwrap();
        let err = inventory
            .check_availability(&[ItemRequest { quantity: 3, ..item }])
            .await
            .unwrap_err();
        assert!(err.is_seat_exhaustion());
    }
}
