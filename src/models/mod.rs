//! # Data Models
//!
//! The two persisted entities of the payment pipeline.
//!
//! - [`PayOrder`] - one per accepted business payment intent
//! - [`ChannelRequest`] - one per outbound interaction series of an order

pub mod channel_request;
pub mod pay_order;

pub use channel_request::{ChannelRequest, NewChannelRequest, RequestType};
pub use pay_order::{
    generate_pay_order_no, AccountingEntry, NewPayOrder, PayOrder, PayOrderTimestamps,
};
