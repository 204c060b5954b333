pub mod milestone;
pub mod notification_delivery;
pub mod shipment;
pub mod tracking_event;
pub mod tracking_source;
pub mod tracking_subscription;

pub use milestone::Entity as Milestone;
pub use notification_delivery::Entity as NotificationDelivery;
pub use shipment::Entity as Shipment;
pub use tracking_event::Entity as TrackingEvent;
pub use tracking_source::Entity as TrackingSource;
pub use tracking_subscription::Entity as TrackingSubscription;
