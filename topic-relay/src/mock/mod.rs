//! In-memory stand-ins for the broker and the store. Don't use these for any
//! real-life purpose; they never free what they record.

mod broker;
mod error;
mod store;

pub use broker::{MockBroker, MockLink};
pub use error::MockError;
pub use store::{MockConnection, MockHashStore, MockWrite};
