use async_trait::async_trait;

use crate::entities::shipment;
use crate::entities::tracking_source::SourceType;

use super::{AdapterError, CanonicalEvent, SourceAdapter};

/// Customs API integration stub. Returns no data and never fails.
pub struct CustomsAdapter;

#[async_trait]
impl SourceAdapter for CustomsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Customs
    }

    async fn fetch(
        &self,
        _shipment: &shipment::Model,
    ) -> Result<Vec<CanonicalEvent>, AdapterError> {
        Ok(Vec::new())
    }
}
