//! Repository layer for data access

pub mod campaigns;
pub mod events;
pub mod reports;
pub mod subscribers;

// Re-export concrete repository implementations with simple names
pub use campaigns::PgCampaignRepository;
pub use events::PgDeliveryEventRepository;
pub use reports::PgDeliveryReportRepository;
pub use subscribers::PgSubscriberRepository;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use events::DeliveryEventRepository;
pub use reports::DeliveryReportRepository;
pub use subscribers::SubscriberRepository;
