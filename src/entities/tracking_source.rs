use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    #[sea_orm(string_value = "INDUSTRY_FEED")]
    IndustryFeed,
    #[sea_orm(string_value = "CARRIER")]
    Carrier,
    #[sea_orm(string_value = "CUSTOMS")]
    Customs,
    #[sea_orm(string_value = "GROUND_HANDLER")]
    GroundHandler,
    #[sea_orm(string_value = "MANUAL")]
    Manual,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::IndustryFeed => "INDUSTRY_FEED",
            SourceType::Carrier => "CARRIER",
            SourceType::Customs => "CUSTOMS",
            SourceType::GroundHandler => "GROUND_HANDLER",
            SourceType::Manual => "MANUAL",
        };
        write!(f, "{}", s)
    }
}

/// Upstream data source reference row. Priority is read from here by the
/// ingestion pipeline; lower number wins when two sources supply the same
/// logical event.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tracking_sources")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub source_type: SourceType,
    pub priority: i32,
    pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
