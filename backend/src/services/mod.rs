pub mod counts;
pub mod fetcher;
pub mod notification_service;
pub mod pubsub;
pub mod reconcile;
pub mod short_classifier;
pub mod sync;
pub mod youtube_api;

pub use counts::CountRecomputer;
pub use fetcher::PaginatedFetcher;
pub use pubsub::{HubClient, ReqwestHubClient, SubscriptionManager};
pub use reconcile::{ReconcileStats, ReconciliationEngine};
pub use short_classifier::ShortClassifier;
pub use sync::{SyncOrchestrator, SyncReport, SyncStatus, SyncTrigger, VideoRefresh};
pub use youtube_api::{YouTubeApi, YouTubeDataClient};
