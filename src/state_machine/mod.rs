// State machine module for the payment pipeline
//
// Two lifecycles: the business-level PayOrder and the per-attempt ChannelRequest.
// Transition tables are pure functions over the status variants; the machines
// pair them with conditional writes through the persistence stores.

pub mod channel_request_state_machine;
pub mod errors;
pub mod events;
pub mod pay_order_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use channel_request_state_machine::ChannelRequestStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{ChannelRequestEvent, PayOrderEvent};
pub use pay_order_state_machine::PayOrderStateMachine;
pub use states::{ChannelRequestStatus, PayOrderStatus};
