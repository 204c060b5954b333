use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Logistics journey phase a milestone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneCategory {
    #[sea_orm(string_value = "PICKUP")]
    Pickup,
    #[sea_orm(string_value = "DEPARTURE")]
    Departure,
    #[sea_orm(string_value = "TRANSIT")]
    Transit,
    #[sea_orm(string_value = "ARRIVAL")]
    Arrival,
    #[sea_orm(string_value = "CUSTOMS")]
    Customs,
    #[sea_orm(string_value = "DELIVERY")]
    Delivery,
}

/// Milestone catalog row. Static reference data seeded at bootstrap and
/// read-only afterwards.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "milestones")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub category: MilestoneCategory,
    pub sequence_order: i32,
    pub is_critical: bool,
    pub expected_duration_hours: Option<i32>,
    pub sla_hours: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
