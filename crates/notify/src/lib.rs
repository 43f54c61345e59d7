//! Outbound SMS delivery.
//!
//! The workflow never talks to a provider directly: jobs are written to the
//! outbox and the dispatcher hands each one to an [`SmsGateway`].

pub mod sms;

pub use sms::{
    gateway_from_config, HttpSmsGateway, NoopSmsGateway, RecordingSmsGateway, SmsError,
    SmsGateway, SmsMessage, SmsReceipt,
};
