//! Turn event protocol and fan-out.
//!
//! Every observable step of a turn is published as one [`CouncilEvent`] on
//! the [`EventBus`]. Transports subscribe and serialize; the pipeline never
//! waits on a consumer and never fails because nobody is listening.

mod bus;
mod types;

pub use bus::{EventBus, SharedEventBus, EVENT_CAPACITY};
pub use types::{CouncilEvent, EventPayload};
