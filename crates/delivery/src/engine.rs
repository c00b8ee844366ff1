//! Delivery engine: resolves eligible campaigns, checks the client's rolling
//! budget, picks ads first-fit and records one impression per delivered ad.

use crate::locks::ClientLocks;
use crate::policy::{sort_for_delivery, Budget, FirstFit};
use crate::vast;
use chrono::{DateTime, Utc};
use serde::Serialize;
use spotline_core::config::DeliveryConfig;
use spotline_core::{Ad, Impression, SpotlineError, SpotlineResult};
use spotline_store::{CampaignStore, ImpressionLedger};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one ad request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Delivered ads, in delivery order. Each has a recorded impression.
    pub ads: Vec<Ad>,
    /// Seconds already consumed in the window when the request started.
    pub consumed_secs: i64,
    /// Seconds left after this selection.
    pub remaining_secs: i64,
}

impl Selection {
    pub fn delivered_secs(&self) -> i64 {
        self.ads.iter().map(|a| i64::from(a.duration_secs)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ads.is_empty()
    }
}

/// A client's position inside the rolling window.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BudgetStatus {
    pub client_id: String,
    pub cap_secs: i64,
    pub window_secs: i64,
    pub consumed_secs: i64,
    pub remaining_secs: i64,
}

/// Ad selection and rate-limited delivery over any campaign store and ledger.
pub struct DeliveryEngine<C, L> {
    campaigns: Arc<C>,
    ledger: Arc<L>,
    config: DeliveryConfig,
    locks: ClientLocks,
}

fn require_client(client_id: &str) -> SpotlineResult<&str> {
    let client_id = client_id.trim();
    if client_id.is_empty() {
        return Err(SpotlineError::Validation("client id is required".into()));
    }
    Ok(client_id)
}

impl<C, L> DeliveryEngine<C, L>
where
    C: CampaignStore,
    L: ImpressionLedger,
{
    pub fn new(campaigns: Arc<C>, ledger: Arc<L>, config: DeliveryConfig) -> Self {
        info!(
            cap_secs = config.hourly_cap_secs,
            window_secs = config.window_secs,
            "Delivery engine initialized"
        );
        Self {
            campaigns,
            ledger,
            config,
            locks: ClientLocks::new(),
        }
    }

    /// Select ads for `client_id` in `region` as of now.
    pub async fn select(&self, client_id: &str, region: &str) -> SpotlineResult<Selection> {
        self.select_at(client_id, region, Utc::now()).await
    }

    /// Select and render the VAST response as of now.
    pub async fn serve(&self, client_id: &str, region: &str) -> SpotlineResult<String> {
        let selection = self.select(client_id, region).await?;
        vast::render(&selection.ads)
    }

    /// Select ads for `client_id` in `region` as of `now`.
    ///
    /// The budget read, the first-fit walk and the impression writes run
    /// under the client's lock, so concurrent requests for one client see
    /// each other's impressions. An ad is delivered only once its impression
    /// is stored; if the write fails the ad is dropped, its seconds are not
    /// spent and the walk moves on.
    pub async fn select_at(&self, client_id: &str, region: &str, now: DateTime<Utc>) -> SpotlineResult<Selection> {
        let client_id = require_client(client_id)?;
        metrics::counter!("delivery.requests").increment(1);

        let mut campaigns = self.campaigns.get_active_campaigns(region, now).await?;
        sort_for_delivery(&mut campaigns);

        let _guard = self.locks.acquire(client_id).await;

        let since = now - self.config.window();
        let consumed = self.ledger.sum_duration_since(client_id, since).await?;
        let budget = Budget::new(self.config.hourly_cap_secs, consumed);
        if budget.is_exhausted() {
            metrics::counter!("delivery.budget_exhausted").increment(1);
            debug!(client_id, consumed_secs = consumed, "Budget exhausted, serving empty response");
            return Ok(Selection {
                ads: Vec::new(),
                consumed_secs: consumed,
                remaining_secs: budget.remaining(),
            });
        }

        let mut walk = FirstFit::new(&campaigns, budget);
        let mut delivered = Vec::new();
        while let Some(ad) = walk.next_candidate() {
            let impression = Impression::for_delivery(client_id, ad, now);
            match self.ledger.record_impression(&impression).await {
                Ok(()) => {
                    walk.commit(ad);
                    delivered.push(ad.clone());
                }
                Err(e) => {
                    metrics::counter!("delivery.ledger_write_failures").increment(1);
                    warn!(
                        error = %e,
                        client_id,
                        ad_id = %ad.id,
                        "Impression write failed, dropping ad from response"
                    );
                }
            }
        }

        metrics::counter!("delivery.ads_selected").increment(delivered.len() as u64);
        metrics::counter!("delivery.ads_skipped_over_budget").increment(walk.skipped() as u64);
        let remaining = walk.budget().remaining();
        info!(
            client_id,
            region,
            campaigns = campaigns.len(),
            delivered = delivered.len(),
            consumed_secs = consumed,
            remaining_secs = remaining,
            "Ad selection complete"
        );

        Ok(Selection {
            ads: delivered,
            consumed_secs: consumed,
            remaining_secs: remaining,
        })
    }

    /// Budget position for `client_id` as of `now`. Read-only.
    pub async fn budget_at(&self, client_id: &str, now: DateTime<Utc>) -> SpotlineResult<BudgetStatus> {
        let client_id = require_client(client_id)?;
        let consumed = self
            .ledger
            .sum_duration_since(client_id, now - self.config.window())
            .await?;
        Ok(BudgetStatus {
            client_id: client_id.to_string(),
            cap_secs: self.config.hourly_cap_secs,
            window_secs: self.config.window_secs,
            consumed_secs: consumed,
            remaining_secs: (self.config.hourly_cap_secs - consumed).max(0),
        })
    }

    pub async fn budget(&self, client_id: &str) -> SpotlineResult<BudgetStatus> {
        self.budget_at(client_id, Utc::now()).await
    }
}
