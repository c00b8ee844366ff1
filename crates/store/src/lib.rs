//! Persistent state for the ad server: campaigns with their ads, the
//! unassigned creative pool, and the append-only impression ledger.
//!
//! Two backends share the same contracts: an in-process DashMap store for
//! development and tests, and SQLite through sqlx for durable deployments.

#![warn(clippy::unwrap_used)]

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use spotline_core::config::{DeliveryConfig, StoreBackend, StoreConfig};
use spotline_core::types::new_id;
use spotline_core::{Ad, Campaign, Impression, SpotlineError, SpotlineResult};
use std::future::Future;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Campaigns, their ads, and the creative pool.
pub trait CampaignStore: Send + Sync {
    /// Persist a new campaign and its ads in one unit. Assigns the campaign
    /// id and any missing ad ids. Returns the stored campaign.
    fn create_campaign(&self, campaign: Campaign) -> impl Future<Output = SpotlineResult<Campaign>> + Send;

    /// Replace name, window, region and the full ad list of an existing campaign.
    fn update_campaign(&self, campaign: Campaign) -> impl Future<Output = SpotlineResult<Campaign>> + Send;

    /// Remove a campaign and every ad it owns.
    fn delete_campaign(&self, id: &str) -> impl Future<Output = SpotlineResult<()>> + Send;

    fn get_campaign(&self, id: &str) -> impl Future<Output = SpotlineResult<Campaign>> + Send;

    /// Every campaign with its ads, newest start first.
    fn list_campaigns(&self) -> impl Future<Output = SpotlineResult<Vec<Campaign>>> + Send;

    /// Campaigns whose window contains `as_of` (inclusive both ends) and that
    /// target `region` or `"*"`. Ordered by creation time, then id; ads in
    /// list order.
    fn get_active_campaigns(
        &self,
        region: &str,
        as_of: DateTime<Utc>,
    ) -> impl Future<Output = SpotlineResult<Vec<Campaign>>> + Send;

    /// Ads not attached to any campaign, ordered by media URL.
    fn get_available_ads(&self) -> impl Future<Output = SpotlineResult<Vec<Ad>>> + Send;

    fn get_available_ad_by_media_url(&self, media_url: &str) -> impl Future<Output = SpotlineResult<Ad>> + Send;

    /// Add pool ads whose media URL is not already in the pool. Returns how
    /// many were inserted.
    fn seed_available_ads(&self, ads: Vec<Ad>) -> impl Future<Output = SpotlineResult<usize>> + Send;
}

/// Append-only record of delivered ads, read back by the rate limiter.
pub trait ImpressionLedger: Send + Sync {
    fn record_impression(&self, impression: &Impression) -> impl Future<Output = SpotlineResult<()>> + Send;

    /// Total seconds delivered to `client_id` with `timestamp > since`; 0 when none.
    fn sum_duration_since(&self, client_id: &str, since: DateTime<Utc>) -> impl Future<Output = SpotlineResult<i64>> + Send;

    /// Impressions for `client_id` with `timestamp > since`, oldest first.
    fn list_impressions_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = SpotlineResult<Vec<Impression>>> + Send;
}

/// Identity filling and validation shared by both backends.
pub(crate) fn prepare_for_create(mut campaign: Campaign, limits: &DeliveryConfig) -> SpotlineResult<Campaign> {
    if campaign.id.trim().is_empty() {
        campaign.id = new_id();
    }
    campaign.created_at = Utc::now();
    campaign.assign_ad_identities();
    campaign.validate(limits)?;
    Ok(campaign)
}

pub(crate) fn prepare_for_update(mut campaign: Campaign, limits: &DeliveryConfig) -> SpotlineResult<Campaign> {
    if campaign.id.trim().is_empty() {
        return Err(SpotlineError::Validation("campaign id is required for update".into()));
    }
    campaign.assign_ad_identities();
    campaign.validate(limits)?;
    Ok(campaign)
}

pub(crate) fn prepare_pool_ads(ads: Vec<Ad>, limits: &DeliveryConfig) -> SpotlineResult<Vec<Ad>> {
    ads.into_iter()
        .map(|mut ad| {
            if ad.id.trim().is_empty() {
                ad.id = new_id();
            }
            ad.campaign_id = None;
            ad.validate(limits)?;
            Ok(ad)
        })
        .collect()
}

/// Backend chosen at startup from [`StoreConfig`].
pub enum AnyStore {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl AnyStore {
    pub async fn open(config: &StoreConfig, limits: DeliveryConfig) -> SpotlineResult<Self> {
        match config.backend {
            StoreBackend::Memory => Ok(AnyStore::Memory(MemoryStore::new(limits))),
            StoreBackend::Sqlite => Ok(AnyStore::Sqlite(SqliteStore::connect(config, limits).await?)),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            AnyStore::Memory(_) => StoreBackend::Memory,
            AnyStore::Sqlite(_) => StoreBackend::Sqlite,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyStore::Memory($store) => $call.await,
            AnyStore::Sqlite($store) => $call.await,
        }
    };
}

impl CampaignStore for AnyStore {
    async fn create_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        dispatch!(self, s => s.create_campaign(campaign))
    }

    async fn update_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        dispatch!(self, s => s.update_campaign(campaign))
    }

    async fn delete_campaign(&self, id: &str) -> SpotlineResult<()> {
        dispatch!(self, s => s.delete_campaign(id))
    }

    async fn get_campaign(&self, id: &str) -> SpotlineResult<Campaign> {
        dispatch!(self, s => s.get_campaign(id))
    }

    async fn list_campaigns(&self) -> SpotlineResult<Vec<Campaign>> {
        dispatch!(self, s => s.list_campaigns())
    }

    async fn get_active_campaigns(&self, region: &str, as_of: DateTime<Utc>) -> SpotlineResult<Vec<Campaign>> {
        dispatch!(self, s => s.get_active_campaigns(region, as_of))
    }

    async fn get_available_ads(&self) -> SpotlineResult<Vec<Ad>> {
        dispatch!(self, s => s.get_available_ads())
    }

    async fn get_available_ad_by_media_url(&self, media_url: &str) -> SpotlineResult<Ad> {
        dispatch!(self, s => s.get_available_ad_by_media_url(media_url))
    }

    async fn seed_available_ads(&self, ads: Vec<Ad>) -> SpotlineResult<usize> {
        dispatch!(self, s => s.seed_available_ads(ads))
    }
}

impl ImpressionLedger for AnyStore {
    async fn record_impression(&self, impression: &Impression) -> SpotlineResult<()> {
        dispatch!(self, s => s.record_impression(impression))
    }

    async fn sum_duration_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<i64> {
        dispatch!(self, s => s.sum_duration_since(client_id, since))
    }

    async fn list_impressions_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<Vec<Impression>> {
        dispatch!(self, s => s.list_impressions_since(client_id, since))
    }
}
