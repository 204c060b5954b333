use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::instrument;
use uuid::Uuid;

use crate::catalog::DerivedState;
use crate::db::DbPool;
use crate::entities::shipment::{self, ShipmentStatus};
use crate::errors::ServiceError;

/// Store for shipment aggregates and their derived tracking state.
#[derive(Clone)]
pub struct ShipmentStore {
    db: DbPool,
}

impl ShipmentStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn by_id(&self, id: Uuid) -> Result<Option<shipment::Model>, ServiceError> {
        Ok(shipment::Entity::find_by_id(id).one(&self.db).await?)
    }

    pub async fn by_id_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<shipment::Model>, ServiceError> {
        Ok(shipment::Entity::find_by_id(id).one(conn).await?)
    }

    pub async fn by_awb(&self, awb_number: &str) -> Result<Option<shipment::Model>, ServiceError> {
        let found = shipment::Entity::find()
            .filter(shipment::Column::AwbNumber.eq(awb_number))
            .one(&self.db)
            .await?;
        Ok(found)
    }

    /// Creates a shipment aggregate. Intake lives outside the tracking core;
    /// this entry point serves it and the test harnesses.
    pub async fn create(
        &self,
        shipment: shipment::ActiveModel,
    ) -> Result<shipment::Model, ServiceError> {
        Ok(shipment.insert(&self.db).await?)
    }

    /// Shipments due for a tracking refresh at `now`, at most `limit`.
    ///
    /// Terminal and tracking-disabled shipments never qualify; the
    /// per-shipment frequency check runs on the loaded rows since it
    /// compares two of their own columns.
    #[instrument(skip(self))]
    pub async fn due_for_poll(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<shipment::Model>, ServiceError> {
        let candidates = shipment::Entity::find()
            .filter(shipment::Column::TrackingEnabled.eq(true))
            .filter(shipment::Column::CurrentStatus.is_not_in([
                ShipmentStatus::Delivered,
                ShipmentStatus::Cancelled,
            ]))
            .order_by_asc(shipment::Column::LastTrackedAt)
            .all(&self.db)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|s| s.is_due_for_poll(now))
            .take(limit as usize)
            .collect())
    }

    /// Stamps the poll cursor. Called once per selected shipment per tick,
    /// success or failure.
    pub async fn touch_last_tracked(
        &self,
        shipment_id: Uuid,
        tick_time: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let Some(model) = self.by_id(shipment_id).await? else {
            return Ok(());
        };
        let mut active: shipment::ActiveModel = model.into();
        active.last_tracked_at = Set(Some(tick_time));
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    /// Applies freshly derived state inside the caller's transaction.
    ///
    /// `CANCELLED` is sticky: derivation never overwrites an administrative
    /// cancellation.
    pub async fn apply_derived_state<C: ConnectionTrait>(
        &self,
        conn: &C,
        current: shipment::Model,
        derived: &DerivedState,
    ) -> Result<shipment::Model, ServiceError> {
        if current.current_status == ShipmentStatus::Cancelled {
            return Ok(current);
        }

        let mut active: shipment::ActiveModel = current.into();
        if let Some(status) = derived.status {
            active.current_status = Set(status);
        }
        if let Some(location) = &derived.location {
            active.current_location = Set(Some(location.clone()));
        }
        active.delivery_date = Set(derived.delivery_date);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    /// Administrative cancel. The only path to `CANCELLED`.
    pub async fn cancel(&self, shipment_id: Uuid) -> Result<shipment::Model, ServiceError> {
        let model = self
            .by_id(shipment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("shipment {}", shipment_id)))?;
        let mut active: shipment::ActiveModel = model.into();
        active.current_status = Set(ShipmentStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.db).await?)
    }

    /// Paginated shipments of one customer, most recently updated first.
    pub async fn owned_by(
        &self,
        customer_id: Uuid,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<shipment::Model>, u64), ServiceError> {
        let base = shipment::Entity::find()
            .filter(shipment::Column::CustomerId.eq(customer_id));

        let total = base.clone().count(&self.db).await?;
        let rows = base
            .order_by_desc(shipment::Column::UpdatedAt)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok((rows, total))
    }
}
