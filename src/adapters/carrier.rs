use async_trait::async_trait;

use crate::entities::shipment;
use crate::entities::tracking_source::SourceType;

use super::{AdapterError, CanonicalEvent, SourceAdapter};

/// Carrier API integration stub. Returns no data and never fails; the real
/// integration slots in behind the same trait.
pub struct CarrierAdapter;

#[async_trait]
impl SourceAdapter for CarrierAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Carrier
    }

    async fn fetch(
        &self,
        _shipment: &shipment::Model,
    ) -> Result<Vec<CanonicalEvent>, AdapterError> {
        Ok(Vec::new())
    }
}
