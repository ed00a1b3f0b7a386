//! Subscription reconciliation
//!
//! Brings the platform's EventSub subscriptions in line with the static
//! desired list. The platform is the only source of truth: nothing about
//! subscriptions is kept locally between runs.
//!
//! A run is best-effort. Failing to list aborts the run (there is nothing to
//! diff against) and so does failing to validate or refresh the token, but a
//! single failed delete or create is logged, recorded in the report and the
//! loop moves on to the next item.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use tracing::{debug, error, info, warn};
use twitch_auth::TokenManager;

use crate::error::{Error, Result};
use crate::helix::{BoxFuture, SubscriptionApi};
use crate::types::{Subscription, build_subscription};

/// Token checks the reconciler performs before creating subscriptions.
pub trait CredentialCheck: Send + Sync {
    fn is_token_valid(&self) -> BoxFuture<'_, Result<bool>>;
    fn refresh_token(&self) -> BoxFuture<'_, Result<()>>;
    /// Make sure some usable token is stored, returning `true` if one had to
    /// be requested.
    fn ensure_token(&self) -> BoxFuture<'_, Result<bool>>;
}

impl CredentialCheck for TokenManager {
    fn is_token_valid(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(TokenManager::is_token_valid(self).await?) })
    }

    fn refresh_token(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            TokenManager::refresh_token(self).await?;
            Ok(())
        })
    }

    fn ensure_token(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.ensure_valid_token().await?) })
    }
}

/// Where created subscriptions deliver, and for which channel.
#[derive(Debug, Clone)]
pub struct SubscriptionTarget {
    pub channel_id: String,
    pub callback_url: String,
    pub secret: Secret<String>,
}

/// Which call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Delete,
    Create,
}

/// A delete or create that did not go through.
#[derive(Debug)]
pub struct ReconcileFailure {
    pub operation: Operation,
    /// Subscription id for deletes, subscription type for creates
    pub target: String,
    pub error: Error,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Ids of deleted failed subscriptions
    pub deleted: Vec<String>,
    /// Types of newly created subscriptions
    pub created: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
    pub token_refreshed: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Desired-vs-active diff and repair.
pub struct Reconciler {
    api: Arc<dyn SubscriptionApi>,
    credentials: Arc<dyn CredentialCheck>,
    target: SubscriptionTarget,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn SubscriptionApi>,
        credentials: Arc<dyn CredentialCheck>,
        target: SubscriptionTarget,
    ) -> Self {
        Self {
            api,
            credentials,
            target,
        }
    }

    /// Load the desired list from `desired_path`, bootstrap the token and
    /// run one pass. Listing needs a token, so a missing or expired one is
    /// replaced up front.
    pub async fn check(&self, desired_path: &Path) -> Result<ReconcileReport> {
        let desired = load_desired(desired_path).await?;
        let bootstrapped = self.credentials.ensure_token().await?;
        let mut report = self.run(&desired).await?;
        report.token_refreshed |= bootstrapped;
        Ok(report)
    }

    /// Run one reconciliation pass against `desired` subscription types.
    pub async fn run(&self, desired: &[String]) -> Result<ReconcileReport> {
        info!(desired = desired.len(), "checking subscriptions");
        let mut report = ReconcileReport::default();

        let active = self.api.list().await?;
        for sub in active.iter().filter(|s| s.status.is_terminal_failure()) {
            match self.api.delete(&sub.id).await {
                Ok(()) => {
                    info!(
                        id = %sub.id,
                        kind = %sub.kind,
                        status = ?sub.status,
                        "deleted failed subscription"
                    );
                    report.deleted.push(sub.id.clone());
                }
                Err(e) => {
                    warn!(id = %sub.id, kind = %sub.kind, error = %e, "failed to delete subscription");
                    report.failures.push(ReconcileFailure {
                        operation: Operation::Delete,
                        target: sub.id.clone(),
                        error: e,
                    });
                }
            }
        }

        let active = self.api.list().await?;
        let missing = missing_types(desired, &active);
        debug!(active = active.len(), missing = missing.len(), "computed subscription diff");

        if !self.credentials.is_token_valid().await? {
            warn!("app access token invalid, refreshing before creating subscriptions");
            self.credentials.refresh_token().await?;
            report.token_refreshed = true;
        }

        for kind in missing {
            info!(kind = %kind, "missing subscription");
            let request = build_subscription(
                &kind,
                &self.target.channel_id,
                &self.target.callback_url,
                self.target.secret.expose(),
            );
            match self.api.create(&request).await {
                Ok(created) => {
                    info!(kind = %kind, id = %created.id, status = ?created.status, "subscription requested");
                    report.created.push(kind);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to create subscription");
                    report.failures.push(ReconcileFailure {
                        operation: Operation::Create,
                        target: kind,
                        error: e,
                    });
                }
            }
        }

        info!(
            deleted = report.deleted.len(),
            created = report.created.len(),
            failures = report.failures.len(),
            token_refreshed = report.token_refreshed,
            "subscription check complete"
        );
        Ok(report)
    }
}

/// Desired types with no active subscription, in desired-list order,
/// duplicates dropped.
fn missing_types(desired: &[String], active: &[Subscription]) -> Vec<String> {
    let active: HashSet<&str> = active.iter().map(|s| s.kind.as_str()).collect();
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for kind in desired {
        if !active.contains(kind.as_str()) && seen.insert(kind.as_str()) {
            missing.push(kind.clone());
        }
    }
    missing
}

/// Read the desired subscription list: a JSON array of type strings.
pub async fn load_desired(path: &Path) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Desired(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Desired(format!("parsing {}: {e}", path.display())))
}

/// Spawn a task that re-runs reconciliation every `interval`.
///
/// The first tick is skipped because startup already ran a pass. The desired
/// list is re-read on each tick so edits take effect without a restart.
pub fn spawn_reconcile_task(
    reconciler: Arc<Reconciler>,
    desired_path: PathBuf,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.check(&desired_path).await {
                error!(error = %e, "scheduled subscription check failed");
            }
        }
    })
}
