use crate::config::DeliveryConfig;
use crate::error::{SpotlineError, SpotlineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Region code that matches every requested region, including an empty one.
pub const ANY_REGION: &str = "*";

/// A time- and region-scoped advertising unit owning an ordered list of ads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Empty until the store assigns one on create.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `"*"` for every region, otherwise an exact region (DMA) code.
    #[serde(alias = "target_dma")]
    pub region: String,
    #[serde(default)]
    pub ads: Vec<Ad>,
    /// Stamped by the store on create; used as the delivery-order tie-break.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A playable video creative. `campaign_id == None` means the ad sits in the
/// unassigned creative pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    pub media_url: String,
    #[serde(alias = "duration_seconds")]
    pub duration_secs: u32,
    pub creative_id: String,
}

/// Durable record that an ad was delivered to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impression {
    pub id: String,
    pub client_id: String,
    pub ad_id: String,
    pub duration_secs: u32,
    pub timestamp: DateTime<Utc>,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl Campaign {
    /// True when `at` falls inside `[start_time, end_time]`, both ends inclusive.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at <= self.end_time
    }

    /// `"*"` campaigns match any region; others need an exact match. An empty
    /// requested region only matches `"*"` campaigns.
    pub fn targets(&self, region: &str) -> bool {
        self.region == ANY_REGION || (!region.is_empty() && self.region == region)
    }

    /// Fill missing ad identities and point every ad at this campaign.
    pub fn assign_ad_identities(&mut self) {
        for ad in &mut self.ads {
            if ad.id.trim().is_empty() {
                ad.id = new_id();
            }
            ad.campaign_id = Some(self.id.clone());
        }
    }

    /// Authoring-time checks applied before any write.
    pub fn validate(&self, limits: &DeliveryConfig) -> SpotlineResult<()> {
        if self.name.trim().is_empty() {
            return Err(SpotlineError::Validation("campaign name is required".into()));
        }
        if self.region.trim().is_empty() {
            return Err(SpotlineError::Validation("campaign region is required".into()));
        }
        if self.start_time >= self.end_time {
            return Err(SpotlineError::Validation(format!(
                "campaign window is empty or inverted: start {} is not before end {}",
                self.start_time, self.end_time
            )));
        }
        let mut seen = HashSet::with_capacity(self.ads.len());
        for ad in &self.ads {
            ad.validate(limits)?;
            if !seen.insert(ad.id.as_str()) {
                return Err(SpotlineError::Validation(format!("duplicate ad id '{}'", ad.id)));
            }
        }
        Ok(())
    }
}

impl Ad {
    pub fn validate(&self, limits: &DeliveryConfig) -> SpotlineResult<()> {
        if self.media_url.trim().is_empty() {
            return Err(SpotlineError::Validation("ad media_url is required".into()));
        }
        if self.creative_id.trim().is_empty() {
            return Err(SpotlineError::Validation("ad creative_id is required".into()));
        }
        if self.duration_secs == 0 || self.duration_secs > limits.max_ad_duration_secs {
            return Err(SpotlineError::Validation(format!(
                "ad duration {}s must be between 1 and {} seconds",
                self.duration_secs, limits.max_ad_duration_secs
            )));
        }
        Ok(())
    }
}

impl Impression {
    /// Build the ledger entry for delivering `ad` to `client_id` at `at`.
    pub fn for_delivery(client_id: &str, ad: &Ad, at: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            client_id: client_id.to_string(),
            ad_id: ad.id.clone(),
            duration_secs: ad.duration_secs,
            timestamp: at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ad(duration_secs: u32) -> Ad {
        Ad {
            id: String::new(),
            campaign_id: None,
            media_url: "https://cdn.example.com/spot.mp4".into(),
            duration_secs,
            creative_id: "creative-1".into(),
        }
    }

    fn campaign(region: &str) -> Campaign {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        Campaign {
            id: "c-1".into(),
            name: "Spring".into(),
            start_time: start,
            end_time: start + Duration::days(30),
            region: region.into(),
            ads: vec![ad(15), ad(30)],
            created_at: start,
        }
    }

    #[test]
    fn test_window_is_inclusive_at_both_ends() {
        let c = campaign("*");
        assert!(c.is_active_at(c.start_time));
        assert!(c.is_active_at(c.end_time));
        assert!(!c.is_active_at(c.start_time - Duration::seconds(1)));
        assert!(!c.is_active_at(c.end_time + Duration::seconds(1)));
    }

    #[test]
    fn test_region_targeting() {
        let wildcard = campaign("*");
        assert!(wildcard.targets("10"));
        assert!(wildcard.targets(""));

        let dma = campaign("10");
        assert!(dma.targets("10"));
        assert!(!dma.targets("100"));
        assert!(!dma.targets(""));
    }

    #[test]
    fn test_assign_ad_identities() {
        let mut c = campaign("*");
        c.ads[1].id = "keep-me".into();
        c.assign_ad_identities();
        assert!(!c.ads[0].id.is_empty());
        assert_eq!(c.ads[1].id, "keep-me");
        assert!(c.ads.iter().all(|a| a.campaign_id.as_deref() == Some("c-1")));
    }

    #[test]
    fn test_validation_rejects_bad_campaigns() {
        let limits = DeliveryConfig::default();
        let mut c = campaign("*");
        c.assign_ad_identities();
        assert!(c.validate(&limits).is_ok());

        let mut inverted = c.clone();
        inverted.end_time = inverted.start_time;
        assert!(matches!(inverted.validate(&limits), Err(SpotlineError::Validation(_))));

        let mut zero = c.clone();
        zero.ads[0].duration_secs = 0;
        assert!(zero.validate(&limits).is_err());

        let mut too_long = c.clone();
        too_long.ads[0].duration_secs = 3600;
        assert!(too_long.validate(&limits).is_err());

        let mut no_region = c.clone();
        no_region.region = "  ".into();
        assert!(no_region.validate(&limits).is_err());

        let mut dup = c.clone();
        dup.ads[1].id = dup.ads[0].id.clone();
        assert!(dup.validate(&limits).is_err());
    }

    #[test]
    fn test_campaign_json_accepts_legacy_field_names() {
        let json = r#"{
            "name": "Legacy",
            "start_time": "2026-03-01T00:00:00Z",
            "end_time": "2026-03-02T00:00:00Z",
            "target_dma": "10",
            "ads": [{"media_url": "https://cdn/x.mp4", "duration_seconds": 15, "creative_id": "cr"}]
        }"#;
        let c: Campaign = serde_json::from_str(json).unwrap();
        assert!(c.id.is_empty());
        assert_eq!(c.region, "10");
        assert_eq!(c.ads[0].duration_secs, 15);
        assert!(c.ads[0].campaign_id.is_none());
    }
}
