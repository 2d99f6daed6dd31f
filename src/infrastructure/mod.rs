pub mod api;
pub mod event_bus;
pub mod http_client_factory;
pub mod persistence;

pub use event_bus::{EventBus, EventHandler, SubscriptionHandle};
