//! The tracking-event ingestion pipeline.
//!
//! Single entry point `apply`: dedup against the persisted log, persist the
//! event and rederive shipment state in one transaction, then emit to the
//! bus post-commit.

use chrono::Utc;
use metrics::counter;
use sea_orm::{EntityTrait, Set, TransactionTrait};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::adapters::CanonicalEvent;
use crate::catalog::derive_state;
use crate::db::DbPool;
use crate::entities::tracking_source::{self, SourceType};
use crate::entities::{shipment, tracking_event};
use crate::errors::ServiceError;
use crate::events::{BusEvent, EventSender, ShipmentSnapshot};
use crate::stores::{EventStore, ShipmentStore};

/// Three-valued outcome of an Apply. Duplicates are a normal, non-fatal
/// result, not an error.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Created(tracking_event::Model),
    Duplicate,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ShipmentNotFound,
    TrackingDisabled,
    UnknownSource,
}

impl ApplyOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, ApplyOutcome::Created(_))
    }
}

/// The ingestion pipeline. All event writes in the system flow through
/// here.
#[derive(Clone)]
pub struct TrackingPipeline {
    db: DbPool,
    events: EventStore,
    shipments: ShipmentStore,
    bus: EventSender,
}

impl TrackingPipeline {
    pub fn new(db: DbPool, events: EventStore, shipments: ShipmentStore, bus: EventSender) -> Self {
        Self {
            db,
            events,
            shipments,
            bus,
        }
    }

    /// Applies one canonical event to a shipment.
    ///
    /// The event insert and the derived-state update share a transaction;
    /// the bus emit happens after commit and never rolls the write back.
    #[instrument(skip(self, canonical), fields(code = %canonical.event_code))]
    pub async fn apply(
        &self,
        shipment_id: Uuid,
        canonical: CanonicalEvent,
        source_id: i32,
    ) -> Result<ApplyOutcome, ServiceError> {
        let sources = self.source_directory().await?;
        let Some(source) = sources.get(&source_id).cloned() else {
            counter!("cargotrack_apply_rejected_total").increment(1);
            return Ok(ApplyOutcome::Rejected(RejectReason::UnknownSource));
        };

        let Some(current) = self.shipments.by_id(shipment_id).await? else {
            counter!("cargotrack_apply_rejected_total").increment(1);
            return Ok(ApplyOutcome::Rejected(RejectReason::ShipmentNotFound));
        };

        // Manual entry bypasses the tracking switch; external sources honor it.
        if !current.tracking_enabled && source.source_type != SourceType::Manual {
            counter!("cargotrack_apply_rejected_total").increment(1);
            return Ok(ApplyOutcome::Rejected(RejectReason::TrackingDisabled));
        }

        let txn = self.db.begin().await?;

        // Dedup runs inside the transaction so concurrent identical applies
        // serialize on the store.
        let candidates = self
            .events
            .duplicate_candidates(&txn, shipment_id, &canonical.event_code, canonical.event_datetime)
            .await?;
        if self.is_duplicate(&canonical, source.priority, &candidates, &sources) {
            txn.rollback().await?;
            counter!("cargotrack_apply_duplicate_total").increment(1);
            debug!(%shipment_id, "duplicate event skipped");
            return Ok(ApplyOutcome::Duplicate);
        }

        let event = self
            .events
            .insert_on(&txn, build_event_row(shipment_id, canonical, source_id))
            .await?;

        let log = self.events.all_for_shipment(&txn, shipment_id).await?;
        let derived = derive_state(&log);
        let updated = self
            .shipments
            .apply_derived_state(&txn, current, &derived)
            .await?;

        txn.commit().await?;
        counter!("cargotrack_apply_created_total").increment(1);

        self.bus.emit(BusEvent {
            shipment_id,
            customer_id: updated.customer_id,
            awb_number: updated.awb_number.clone(),
            event: event.clone(),
            snapshot: ShipmentSnapshot::from(&updated),
        });

        Ok(ApplyOutcome::Created(event))
    }

    /// Duplicate rule: same code inside the window, and either matching
    /// external ids, no external id on either side, or — when both ids are
    /// present but differ — an existing event from an equal-or-higher
    /// priority source.
    fn is_duplicate(
        &self,
        candidate: &CanonicalEvent,
        candidate_priority: i32,
        window: &[tracking_event::Model],
        sources: &HashMap<i32, tracking_source::Model>,
    ) -> bool {
        for existing in window {
            match (&existing.external_event_id, &candidate.external_event_id) {
                (Some(a), Some(b)) => {
                    if a == b {
                        return true;
                    }
                    // Distinct upstream ids in the same bucket: the source
                    // priority table decides which one speaks for the
                    // logical event.
                    let existing_priority = existing
                        .source_id
                        .and_then(|id| sources.get(&id))
                        .map(|s| s.priority)
                        .unwrap_or(i32::MAX);
                    if existing_priority <= candidate_priority {
                        return true;
                    }
                }
                (None, None) => return true,
                _ => {}
            }
        }
        false
    }

    async fn source_directory(
        &self,
    ) -> Result<HashMap<i32, tracking_source::Model>, ServiceError> {
        let rows = tracking_source::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|s| (s.id, s)).collect())
    }
}

fn build_event_row(
    shipment_id: Uuid,
    canonical: CanonicalEvent,
    source_id: i32,
) -> tracking_event::ActiveModel {
    tracking_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        shipment_id: Set(shipment_id),
        event_code: Set(canonical.event_code),
        description: Set(canonical.description),
        category: Set(canonical.category),
        location_name: Set(canonical.location_name),
        location_country: Set(canonical.location_country),
        location_city: Set(canonical.location_city),
        airport_code: Set(canonical.airport_code),
        event_datetime: Set(canonical.event_datetime),
        event_timezone: Set(canonical.event_timezone),
        is_milestone: Set(canonical.is_milestone),
        is_exception: Set(canonical.is_exception),
        is_critical: Set(canonical.is_critical),
        severity: Set(canonical.severity),
        source_id: Set(Some(source_id)),
        external_event_id: Set(canonical.external_event_id),
        source_reference: Set(canonical.source_reference),
        latitude: Set(canonical.latitude),
        longitude: Set(canonical.longitude),
        temperature_celsius: Set(canonical.temperature_celsius),
        humidity_percent: Set(canonical.humidity_percent),
        additional_info: Set(canonical.additional_info),
        customer_visible: Set(canonical.customer_visible),
        processed: Set(true),
        notification_sent: Set(false),
        created_at: Set(Utc::now()),
    }
}
