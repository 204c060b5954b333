use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::tracking_subscription::{self, DeliveryMethodKind};
use crate::errors::ServiceError;

/// Store for notification subscriptions.
#[derive(Clone)]
pub struct SubscriptionStore {
    db: DbPool,
}

/// Input for subscription creation; the unique key is
/// `(shipment_id, subscriber_id, method)`.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub shipment_id: Uuid,
    pub subscriber_id: Uuid,
    pub method: DeliveryMethodKind,
    pub endpoint: String,
    pub on_milestone: bool,
    pub on_exception: bool,
    pub on_location_update: bool,
    pub on_all_events: bool,
}

impl SubscriptionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<tracking_subscription::Model>, ServiceError> {
        Ok(tracking_subscription::Entity::find_by_id(id)
            .one(&self.db)
            .await?)
    }

    /// Active subscriptions on a shipment; the dispatcher filters them
    /// against the event's classification.
    pub async fn active_for_shipment(
        &self,
        shipment_id: Uuid,
    ) -> Result<Vec<tracking_subscription::Model>, ServiceError> {
        let rows = tracking_subscription::Entity::find()
            .filter(tracking_subscription::Column::ShipmentId.eq(shipment_id))
            .filter(tracking_subscription::Column::Active.eq(true))
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    /// Creates a subscription, or reactivates and updates the existing row
    /// for the same `(shipment, subscriber, method)` triple.
    pub async fn upsert(
        &self,
        new: NewSubscription,
    ) -> Result<tracking_subscription::Model, ServiceError> {
        let existing = tracking_subscription::Entity::find()
            .filter(tracking_subscription::Column::ShipmentId.eq(new.shipment_id))
            .filter(tracking_subscription::Column::SubscriberId.eq(new.subscriber_id))
            .filter(tracking_subscription::Column::Method.eq(new.method))
            .one(&self.db)
            .await?;

        let now = Utc::now();
        if let Some(model) = existing {
            let mut active: tracking_subscription::ActiveModel = model.into();
            active.endpoint = Set(new.endpoint);
            active.on_milestone = Set(new.on_milestone);
            active.on_exception = Set(new.on_exception);
            active.on_location_update = Set(new.on_location_update);
            active.on_all_events = Set(new.on_all_events);
            active.active = Set(true);
            active.updated_at = Set(now);
            return Ok(active.update(&self.db).await?);
        }

        let row = tracking_subscription::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipment_id: Set(new.shipment_id),
            subscriber_id: Set(new.subscriber_id),
            method: Set(new.method),
            endpoint: Set(new.endpoint),
            on_milestone: Set(new.on_milestone),
            on_exception: Set(new.on_exception),
            on_location_update: Set(new.on_location_update),
            on_all_events: Set(new.on_all_events),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(row.insert(&self.db).await?)
    }

    /// Deactivates a subscription. Rows are never hard-deleted.
    pub async fn deactivate(&self, id: Uuid) -> Result<(), ServiceError> {
        let model = self
            .by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("subscription {}", id)))?;
        let mut active: tracking_subscription::ActiveModel = model.into();
        active.active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }
}
