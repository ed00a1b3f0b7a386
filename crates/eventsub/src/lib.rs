//! Twitch EventSub subscriptions and webhook verification
//!
//! - `types`: subscription model as Helix returns it, and the create request
//! - `helix`: the `SubscriptionApi` seam and its Helix implementation
//! - `reconcile`: one-shot diff of desired vs. active subscriptions
//! - `webhook`: HMAC signature check and message-type model for inbound calls
//!
//! Reconciliation run:
//! 1. List active subscriptions
//! 2. Delete those in a terminal failure state
//! 3. List again for a clean baseline
//! 4. Diff against the desired list
//! 5. Refresh the app token if the platform no longer accepts it
//! 6. Create each missing subscription

pub mod error;
pub mod helix;
pub mod reconcile;
pub mod types;
pub mod webhook;

pub use error::{Error, Result};
pub use helix::{BoxFuture, HelixClient, SubscriptionApi};
pub use reconcile::{
    CredentialCheck, Operation, ReconcileFailure, ReconcileReport, Reconciler, SubscriptionTarget,
    load_desired, spawn_reconcile_task,
};
pub use types::{CreateSubscription, Subscription, SubscriptionStatus, build_subscription};
pub use webhook::{EnvelopeHeaders, MessageType, compute_signature, verify};
