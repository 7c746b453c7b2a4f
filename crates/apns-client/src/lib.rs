//! Client for Apple's legacy binary Push Notification Service.
//!
//! # Purpose
//! Streams framed push notifications over a persistent client-authenticated
//! TLS connection, tracks the in-flight window APNs never acknowledges, and
//! correlates the single asynchronous error frame the gateway emits before
//! hanging up, requeueing everything the server discarded unread.
//!
//! # Design notes
//! The engine is three cooperating tasks per connection (sender, error-frame
//! reader, limbo manager) joined by bounded channels; reconnection walks an
//! exponential backoff and the accepted tail of the stream survives via
//! requeue, giving at-least-once delivery for everything the gateway took.

mod client;
mod config;
mod feedback;
mod ids;
mod pool;

pub use client::{BadNotification, Client, FailureReason};
pub use config::{
    Config, PRODUCTION_FEEDBACK_GATEWAY, PRODUCTION_GATEWAY, SANDBOX_FEEDBACK_GATEWAY,
    SANDBOX_GATEWAY,
};
pub use feedback::FeedbackSession;
pub use ids::IdAllocator;
pub use pool::ConnectionPool;

pub use apns_transport::{CertificateSource, Connection, ConnectionConfig};
pub use apns_wire::{
    Alert, AlertDictionary, ErrorFrame, FeedbackRecord, Notification, Payload, Status,
};
