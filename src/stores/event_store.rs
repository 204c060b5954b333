use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::tracking_event::{self, EventCategory};
use crate::errors::ServiceError;

/// Dedup window: two events with the same code on the same shipment within
/// this span are candidates for the same logical event.
pub const DEDUP_WINDOW_SECS: i64 = 300;

/// Filters for event range queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub category: Option<EventCategory>,
    pub milestones_only: bool,
    pub exceptions_only: bool,
    pub customer_visible_only: bool,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: u64,
    pub offset: u64,
}

impl EventFilter {
    pub fn recent(limit: u64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// Aggregate counts over a date range.
#[derive(Debug, Clone, Serialize)]
pub struct EventStatistics {
    pub total_events: u64,
    pub milestones: u64,
    pub exceptions: u64,
    pub critical: u64,
    pub notifications_sent: u64,
}

/// Store for the append-only canonical event log.
#[derive(Clone)]
pub struct EventStore {
    db: DbPool,
}

impl EventStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Inserts an event on the given connection. Callers run this inside the
    /// transaction that also updates the shipment's derived state.
    pub async fn insert_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        event: tracking_event::ActiveModel,
    ) -> Result<tracking_event::Model, ServiceError> {
        Ok(event.insert(conn).await?)
    }

    /// Events on the same shipment with the same code inside the dedup
    /// window around `at`. The caller applies the external-id and source
    /// priority rules on the result.
    pub async fn duplicate_candidates<C: ConnectionTrait>(
        &self,
        conn: &C,
        shipment_id: Uuid,
        event_code: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<tracking_event::Model>, ServiceError> {
        let window = Duration::seconds(DEDUP_WINDOW_SECS);
        let rows = tracking_event::Entity::find()
            .filter(tracking_event::Column::ShipmentId.eq(shipment_id))
            .filter(tracking_event::Column::EventCode.eq(event_code))
            .filter(tracking_event::Column::EventDatetime.gt(at - window))
            .filter(tracking_event::Column::EventDatetime.lt(at + window))
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// The full event log of one shipment, unordered storage but returned in
    /// derivation order `(event_datetime, created_at)`.
    pub async fn all_for_shipment<C: ConnectionTrait>(
        &self,
        conn: &C,
        shipment_id: Uuid,
    ) -> Result<Vec<tracking_event::Model>, ServiceError> {
        let rows = tracking_event::Entity::find()
            .filter(tracking_event::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(tracking_event::Column::EventDatetime)
            .order_by_asc(tracking_event::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(rows)
    }

    /// Filtered, paginated range query over one shipment's events, newest
    /// first.
    #[instrument(skip(self))]
    pub async fn events_for_shipment(
        &self,
        shipment_id: Uuid,
        filter: &EventFilter,
    ) -> Result<Vec<tracking_event::Model>, ServiceError> {
        let mut query = tracking_event::Entity::find()
            .filter(tracking_event::Column::ShipmentId.eq(shipment_id));

        if let Some(category) = filter.category {
            query = query.filter(tracking_event::Column::Category.eq(category));
        }
        if filter.milestones_only {
            query = query.filter(tracking_event::Column::IsMilestone.eq(true));
        }
        if filter.exceptions_only {
            query = query.filter(tracking_event::Column::IsException.eq(true));
        }
        if filter.customer_visible_only {
            query = query.filter(tracking_event::Column::CustomerVisible.eq(true));
        }
        if let Some(from) = filter.date_from {
            query = query.filter(tracking_event::Column::EventDatetime.gte(from));
        }
        if let Some(to) = filter.date_to {
            query = query.filter(tracking_event::Column::EventDatetime.lt(to));
        }

        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let rows = query
            .order_by_desc(tracking_event::Column::EventDatetime)
            .order_by_desc(tracking_event::Column::CreatedAt)
            .offset(filter.offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Cross-source lookup by upstream identifier, for reconciliation.
    pub async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Vec<tracking_event::Model>, ServiceError> {
        let rows = tracking_event::Entity::find()
            .filter(tracking_event::Column::ExternalEventId.eq(external_event_id))
            .order_by_asc(tracking_event::Column::EventDatetime)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    pub async fn count_for_shipment(&self, shipment_id: Uuid) -> Result<u64, ServiceError> {
        let count = tracking_event::Entity::find()
            .filter(tracking_event::Column::ShipmentId.eq(shipment_id))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    /// Whether any persisted event flags an exception. Upstream refresh
    /// failures never contribute here.
    pub async fn has_exceptions(&self, shipment_id: Uuid) -> Result<bool, ServiceError> {
        let count = tracking_event::Entity::find()
            .filter(tracking_event::Column::ShipmentId.eq(shipment_id))
            .filter(tracking_event::Column::IsException.eq(true))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    #[instrument(skip(self))]
    pub async fn statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EventStatistics, ServiceError> {
        let in_range = || {
            tracking_event::Entity::find()
                .filter(tracking_event::Column::EventDatetime.gte(from))
                .filter(tracking_event::Column::EventDatetime.lt(to))
        };

        let total_events = in_range().count(&self.db).await?;
        let milestones = in_range()
            .filter(tracking_event::Column::IsMilestone.eq(true))
            .count(&self.db)
            .await?;
        let exceptions = in_range()
            .filter(tracking_event::Column::IsException.eq(true))
            .count(&self.db)
            .await?;
        let critical = in_range()
            .filter(tracking_event::Column::IsCritical.eq(true))
            .count(&self.db)
            .await?;
        let notifications_sent = in_range()
            .filter(tracking_event::Column::NotificationSent.eq(true))
            .count(&self.db)
            .await?;

        Ok(EventStatistics {
            total_events,
            milestones,
            exceptions,
            critical,
            notifications_sent,
        })
    }

    /// Events not yet marked as notified, oldest first. Sweeper input.
    pub async fn pending_notification(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<tracking_event::Model>, ServiceError> {
        let rows = tracking_event::Entity::find()
            .filter(tracking_event::Column::NotificationSent.eq(false))
            .filter(tracking_event::Column::CreatedAt.gte(since))
            .order_by_asc(tracking_event::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Flags an event as fully notified. The only mutation the log permits.
    pub async fn mark_notification_sent(&self, event_id: Uuid) -> Result<(), ServiceError> {
        let event = tracking_event::Entity::find_by_id(event_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("event {}", event_id)))?;
        let mut active: tracking_event::ActiveModel = event.into();
        active.notification_sent = Set(true);
        active.update(&self.db).await?;
        Ok(())
    }
}
