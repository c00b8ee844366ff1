//! First-fit ad selection against a per-client seconds budget.
//!
//! Campaigns are walked in delivery order and ads in list order. An ad is a
//! candidate when its duration fits the remaining budget; an ad that does not
//! fit is skipped and the walk continues, so shorter ads further on can still
//! fill the gap. The walk ends as soon as the budget reaches zero.
//!
//! This is a first-fit approximation, not an optimal packing: the output is
//! reproducible for a given store state rather than maximally full.

use spotline_core::{Ad, Campaign};
use std::cmp::Ordering;

/// Seconds a client may still receive in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    remaining: i64,
}

impl Budget {
    pub fn new(cap_secs: i64, consumed_secs: i64) -> Self {
        Self {
            remaining: cap_secs - consumed_secs,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    pub fn fits(&self, ad: &Ad) -> bool {
        i64::from(ad.duration_secs) <= self.remaining
    }

    fn spend(&mut self, ad: &Ad) {
        self.remaining -= i64::from(ad.duration_secs);
    }
}

/// Explicit delivery order: oldest campaign first, id as the tie-break.
pub fn delivery_order(a: &Campaign, b: &Campaign) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_delivery(campaigns: &mut [Campaign]) {
    campaigns.sort_by(delivery_order);
}

/// Incremental first-fit walk.
///
/// [`FirstFit::next_candidate`] yields the next ad that fits; the caller
/// decides whether it is actually delivered and only then calls
/// [`FirstFit::commit`]. An ad that is never committed costs nothing.
pub struct FirstFit<'a> {
    ads: Box<dyn Iterator<Item = &'a Ad> + Send + 'a>,
    budget: Budget,
    skipped: usize,
}

impl<'a> FirstFit<'a> {
    pub fn new(campaigns: &'a [Campaign], budget: Budget) -> Self {
        Self {
            ads: Box::new(campaigns.iter().flat_map(|c| c.ads.iter())),
            budget,
            skipped: 0,
        }
    }

    pub fn next_candidate(&mut self) -> Option<&'a Ad> {
        while !self.budget.is_exhausted() {
            let ad = self.ads.next()?;
            if self.budget.fits(ad) {
                return Some(ad);
            }
            self.skipped += 1;
        }
        None
    }

    pub fn commit(&mut self, ad: &Ad) {
        self.budget.spend(ad);
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Ads passed over because they were longer than the remaining budget.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ad(id: &str, duration_secs: u32) -> Ad {
        Ad {
            id: id.into(),
            campaign_id: None,
            media_url: format!("https://cdn.example.com/{id}.mp4"),
            duration_secs,
            creative_id: format!("cr-{id}"),
        }
    }

    fn campaign(id: &str, created_offset_secs: i64, ads: Vec<Ad>) -> Campaign {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Campaign {
            id: id.into(),
            name: id.into(),
            start_time: base,
            end_time: base + Duration::days(1),
            region: "*".into(),
            ads,
            created_at: base + Duration::seconds(created_offset_secs),
        }
    }

    /// Walk to the end, accepting every candidate.
    fn select<'a>(campaigns: &'a [Campaign], budget: Budget) -> Vec<&'a Ad> {
        let mut walk = FirstFit::new(campaigns, budget);
        let mut picked = Vec::new();
        while let Some(ad) = walk.next_candidate() {
            walk.commit(ad);
            picked.push(ad);
        }
        picked
    }

    fn ids(ads: &[&Ad]) -> Vec<String> {
        ads.iter().map(|a| a.id.clone()).collect()
    }

    #[test]
    fn test_picks_in_campaign_then_list_order() {
        let campaigns = vec![
            campaign("a", 0, vec![ad("a1", 15)]),
            campaign("b", 1, vec![ad("b1", 20)]),
        ];
        let picked = select(&campaigns, Budget::new(300, 0));
        assert_eq!(ids(&picked), vec!["a1", "b1"]);
    }

    #[test]
    fn test_long_ad_is_skipped_not_terminal() {
        let campaigns = vec![campaign("a", 0, vec![ad("long", 280), ad("short", 30), ad("mid", 200)])];
        let picked = select(&campaigns, Budget::new(300, 35));
        // 265 left: 280 does not fit, 30 does, then 200 fits into 235.
        assert_eq!(ids(&picked), vec!["short", "mid"]);
    }

    #[test]
    fn test_exhausted_budget_selects_nothing() {
        let campaigns = vec![campaign("a", 0, vec![ad("a1", 1)])];
        assert!(select(&campaigns, Budget::new(300, 300)).is_empty());
        assert!(select(&campaigns, Budget::new(300, 450)).is_empty());
        assert!(Budget::new(300, 450).is_exhausted());
    }

    #[test]
    fn test_walk_stops_once_budget_hits_zero() {
        let campaigns = vec![
            campaign("a", 0, vec![ad("a1", 100), ad("a2", 200)]),
            campaign("b", 1, vec![ad("b1", 0)]),
        ];
        let mut walk = FirstFit::new(&campaigns, Budget::new(300, 0));
        let first = walk.next_candidate().unwrap();
        walk.commit(first);
        let second = walk.next_candidate().unwrap();
        walk.commit(second);
        assert!(walk.budget().is_exhausted());
        // A zero-length ad would fit, but the walk has already ended.
        assert!(walk.next_candidate().is_none());
    }

    #[test]
    fn test_uncommitted_candidate_keeps_budget() {
        let campaigns = vec![campaign("a", 0, vec![ad("a1", 200), ad("a2", 200)])];
        let mut walk = FirstFit::new(&campaigns, Budget::new(300, 0));
        let dropped = walk.next_candidate().unwrap();
        assert_eq!(dropped.id, "a1");
        // a1 was never committed, so a2 still fits.
        let next = walk.next_candidate().unwrap();
        assert_eq!(next.id, "a2");
        walk.commit(next);
        assert_eq!(walk.budget().remaining(), 100);
    }

    #[test]
    fn test_skipped_counter() {
        let campaigns = vec![campaign("a", 0, vec![ad("x", 290), ad("y", 10), ad("z", 20)])];
        let mut walk = FirstFit::new(&campaigns, Budget::new(300, 280));
        while let Some(ad) = walk.next_candidate() {
            walk.commit(ad);
        }
        assert_eq!(walk.skipped(), 2);
        assert_eq!(walk.budget().remaining(), 10);
    }

    #[test]
    fn test_sort_for_delivery_uses_creation_then_id() {
        let mut campaigns = vec![
            campaign("late", 10, vec![]),
            campaign("b", 0, vec![]),
            campaign("a", 0, vec![]),
        ];
        sort_for_delivery(&mut campaigns);
        let order: Vec<&str> = campaigns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "late"]);
    }

    #[test]
    fn test_randomized_selection_never_exceeds_budget() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..500 {
            let campaigns: Vec<Campaign> = (0..rng.gen_range(0..5))
                .map(|c| {
                    let ads = (0..rng.gen_range(0..6))
                        .map(|i| ad(&format!("{c}-{i}"), rng.gen_range(1..=320)))
                        .collect();
                    campaign(&format!("c{c}"), c, ads)
                })
                .collect();
            let consumed = rng.gen_range(0..=360);
            let cap = 300;

            let mut walk = FirstFit::new(&campaigns, Budget::new(cap, consumed));
            let mut total = 0i64;
            while let Some(ad) = walk.next_candidate() {
                let before = walk.budget().remaining();
                assert!(i64::from(ad.duration_secs) <= before);
                walk.commit(ad);
                total += i64::from(ad.duration_secs);
            }
            if consumed >= cap {
                assert_eq!(total, 0);
            }
            assert!(total <= (cap - consumed).max(0));
        }
    }
}
