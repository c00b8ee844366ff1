//! In-memory store backed by DashMap.
//!
//! Each campaign entry owns its ads, so a create, update or delete touches a
//! single map entry and is all-or-nothing by construction. Writes that add
//! ads are serialized so the ad id uniqueness check and the insert cannot
//! interleave. Data is lost on restart; use [`crate::SqliteStore`] for
//! durability.

use crate::{prepare_for_create, prepare_for_update, prepare_pool_ads, CampaignStore, ImpressionLedger};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use spotline_core::config::DeliveryConfig;
use spotline_core::{Ad, Campaign, Impression, SpotlineError, SpotlineResult};
use tracing::{debug, info};

/// Thread-safe in-memory store for campaigns, the creative pool and impressions.
pub struct MemoryStore {
    campaigns: DashMap<String, Campaign>,
    pool: DashMap<String, Ad>,
    /// client id -> impressions in insertion order
    impressions: DashMap<String, Vec<Impression>>,
    writes: Mutex<()>,
    limits: DeliveryConfig,
}

impl MemoryStore {
    pub fn new(limits: DeliveryConfig) -> Self {
        info!("Campaign store initialized (in-memory, development mode)");
        Self {
            campaigns: DashMap::new(),
            pool: DashMap::new(),
            impressions: DashMap::new(),
            writes: Mutex::new(()),
            limits,
        }
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    /// Ad ids are unique across every campaign and the pool. `owner` is the
    /// campaign being rewritten, whose current ads do not count.
    fn ensure_ad_ids_free(&self, owner: Option<&str>, ads: &[Ad]) -> SpotlineResult<()> {
        for ad in ads {
            let in_pool = self.pool.iter().any(|p| p.id == ad.id);
            let in_campaign = self
                .campaigns
                .iter()
                .any(|c| Some(c.id.as_str()) != owner && c.ads.iter().any(|a| a.id == ad.id));
            if in_pool || in_campaign {
                return Err(SpotlineError::Conflict(format!("ad id '{}' is already in use", ad.id)));
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DeliveryConfig::default())
    }
}

fn by_delivery_order(a: &Campaign, b: &Campaign) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

impl CampaignStore for MemoryStore {
    async fn create_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        let campaign = prepare_for_create(campaign, &self.limits)?;
        let _writes = self.writes.lock();
        if self.campaigns.contains_key(&campaign.id) {
            return Err(SpotlineError::Conflict(format!("campaign '{}' already exists", campaign.id)));
        }
        self.ensure_ad_ids_free(None, &campaign.ads)?;
        self.campaigns.insert(campaign.id.clone(), campaign.clone());
        metrics::counter!("store.campaigns.created").increment(1);
        info!(campaign_id = %campaign.id, ads = campaign.ads.len(), "Campaign created");
        Ok(campaign)
    }

    async fn update_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        let mut campaign = prepare_for_update(campaign, &self.limits)?;
        let _writes = self.writes.lock();
        if !self.campaigns.contains_key(&campaign.id) {
            return Err(SpotlineError::NotFound(format!("campaign '{}'", campaign.id)));
        }
        self.ensure_ad_ids_free(Some(&campaign.id), &campaign.ads)?;
        let mut entry = self
            .campaigns
            .get_mut(&campaign.id)
            .ok_or_else(|| SpotlineError::NotFound(format!("campaign '{}'", campaign.id)))?;
        campaign.created_at = entry.created_at;
        *entry = campaign.clone();
        metrics::counter!("store.campaigns.updated").increment(1);
        info!(campaign_id = %campaign.id, ads = campaign.ads.len(), "Campaign updated");
        Ok(campaign)
    }

    async fn delete_campaign(&self, id: &str) -> SpotlineResult<()> {
        match self.campaigns.remove(id) {
            Some(_) => {
                metrics::counter!("store.campaigns.deleted").increment(1);
                info!(campaign_id = %id, "Campaign deleted");
                Ok(())
            }
            None => Err(SpotlineError::NotFound(format!("campaign '{id}'"))),
        }
    }

    async fn get_campaign(&self, id: &str) -> SpotlineResult<Campaign> {
        self.campaigns
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| SpotlineError::NotFound(format!("campaign '{id}'")))
    }

    async fn list_campaigns(&self) -> SpotlineResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(campaigns)
    }

    async fn get_active_campaigns(&self, region: &str, as_of: DateTime<Utc>) -> SpotlineResult<Vec<Campaign>> {
        let mut active: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| r.value().is_active_at(as_of) && r.value().targets(region))
            .map(|r| r.value().clone())
            .collect();
        active.sort_by(by_delivery_order);
        debug!(region, count = active.len(), "Active campaigns resolved");
        Ok(active)
    }

    async fn get_available_ads(&self) -> SpotlineResult<Vec<Ad>> {
        let mut ads: Vec<Ad> = self.pool.iter().map(|r| r.value().clone()).collect();
        ads.sort_by(|a, b| a.media_url.cmp(&b.media_url));
        Ok(ads)
    }

    async fn get_available_ad_by_media_url(&self, media_url: &str) -> SpotlineResult<Ad> {
        self.pool
            .get(media_url)
            .map(|r| r.value().clone())
            .ok_or_else(|| SpotlineError::NotFound(format!("no available ad with media url '{media_url}'")))
    }

    async fn seed_available_ads(&self, ads: Vec<Ad>) -> SpotlineResult<usize> {
        let ads = prepare_pool_ads(ads, &self.limits)?;
        let _writes = self.writes.lock();
        // Only ads that will actually be inserted claim their id.
        let mut fresh: Vec<Ad> = Vec::with_capacity(ads.len());
        for ad in ads {
            if self.pool.contains_key(&ad.media_url) || fresh.iter().any(|f| f.media_url == ad.media_url) {
                continue;
            }
            if fresh.iter().any(|f| f.id == ad.id) {
                return Err(SpotlineError::Conflict(format!("ad id '{}' is already in use", ad.id)));
            }
            fresh.push(ad);
        }
        self.ensure_ad_ids_free(None, &fresh)?;

        let mut inserted = 0;
        for ad in fresh {
            // pool is keyed by media url
            if let Entry::Vacant(slot) = self.pool.entry(ad.media_url.clone()) {
                slot.insert(ad);
                inserted += 1;
            }
        }
        info!(inserted, "Available ad pool seeded");
        Ok(inserted)
    }
}

impl ImpressionLedger for MemoryStore {
    async fn record_impression(&self, impression: &Impression) -> SpotlineResult<()> {
        let mut rows = self.impressions.entry(impression.client_id.clone()).or_default();
        if rows.iter().any(|i| i.id == impression.id) {
            return Err(SpotlineError::Conflict(format!("impression '{}' already recorded", impression.id)));
        }
        rows.push(impression.clone());
        Ok(())
    }

    async fn sum_duration_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<i64> {
        Ok(self
            .impressions
            .get(client_id)
            .map(|rows| {
                rows.iter()
                    .filter(|i| i.timestamp > since)
                    .map(|i| i64::from(i.duration_secs))
                    .sum()
            })
            .unwrap_or(0))
    }

    async fn list_impressions_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<Vec<Impression>> {
        let mut rows: Vec<Impression> = self
            .impressions
            .get(client_id)
            .map(|rows| rows.iter().filter(|i| i.timestamp > since).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(rows)
    }
}
