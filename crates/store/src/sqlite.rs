//! SQLite store through sqlx.
//!
//! Layout: `campaigns`, `ads` (nullable `campaign_id`, cascade on delete) and
//! `impressions` indexed on `(client_id, ts_ns)`. Timestamps are Unix
//! nanoseconds, the full precision of `DateTime<Utc>`, so range predicates
//! compare integers and agree with in-memory comparisons. Ad ids are unique
//! across campaigns and the pool; a clash is a `Conflict`.

use crate::{prepare_for_create, prepare_for_update, prepare_pool_ads, CampaignStore, ImpressionLedger};
use chrono::{DateTime, TimeZone, Utc};
use spotline_core::config::{DeliveryConfig, StoreConfig};
use spotline_core::{Ad, Campaign, Impression, SpotlineError, SpotlineResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        start_ns    INTEGER NOT NULL,
        end_ns      INTEGER NOT NULL,
        region      TEXT NOT NULL,
        created_ns  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ads (
        id            TEXT PRIMARY KEY,
        campaign_id   TEXT REFERENCES campaigns(id) ON DELETE CASCADE,
        media_url     TEXT NOT NULL,
        duration_secs INTEGER NOT NULL,
        creative_id   TEXT NOT NULL,
        position      INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS impressions (
        id            TEXT PRIMARY KEY,
        client_id     TEXT NOT NULL,
        ad_id         TEXT NOT NULL,
        duration_secs INTEGER NOT NULL,
        ts_ns         INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_impressions_client_ts ON impressions(client_id, ts_ns)",
    "CREATE INDEX IF NOT EXISTS idx_ads_campaign ON ads(campaign_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_window ON campaigns(start_ns, end_ns)",
];

fn persistence(e: sqlx::Error) -> SpotlineError {
    SpotlineError::Persistence(e.to_string())
}

/// Unique-key violations mean the caller reused an id; everything else is a
/// storage failure.
fn write_error(what: &str, e: sqlx::Error) -> SpotlineError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            SpotlineError::Conflict(format!("{what} is already in use"))
        }
        _ => persistence(e),
    }
}

fn to_ns(t: DateTime<Utc>) -> SpotlineResult<i64> {
    t.timestamp_nanos_opt()
        .ok_or_else(|| SpotlineError::Validation(format!("timestamp {t} is outside the storable range")))
}

fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

fn to_secs(raw: i64) -> SpotlineResult<u32> {
    u32::try_from(raw).map_err(|_| SpotlineError::Persistence(format!("stored duration {raw} is out of range")))
}

/// One row of the campaigns LEFT JOIN ads query.
#[derive(Debug, sqlx::FromRow)]
struct CampaignAdRow {
    id: String,
    name: String,
    start_ns: i64,
    end_ns: i64,
    region: String,
    created_ns: i64,
    ad_id: Option<String>,
    media_url: Option<String>,
    duration_secs: Option<i64>,
    creative_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct AdRow {
    id: String,
    campaign_id: Option<String>,
    media_url: String,
    duration_secs: i64,
    creative_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ImpressionRow {
    id: String,
    client_id: String,
    ad_id: String,
    duration_secs: i64,
    ts_ns: i64,
}

impl TryFrom<AdRow> for Ad {
    type Error = SpotlineError;

    fn try_from(r: AdRow) -> SpotlineResult<Self> {
        Ok(Ad {
            id: r.id,
            campaign_id: r.campaign_id,
            media_url: r.media_url,
            duration_secs: to_secs(r.duration_secs)?,
            creative_id: r.creative_id,
        })
    }
}

impl TryFrom<ImpressionRow> for Impression {
    type Error = SpotlineError;

    fn try_from(r: ImpressionRow) -> SpotlineResult<Self> {
        Ok(Impression {
            id: r.id,
            client_id: r.client_id,
            ad_id: r.ad_id,
            duration_secs: to_secs(r.duration_secs)?,
            timestamp: from_ns(r.ts_ns),
        })
    }
}

/// Fold ordered join rows into campaigns. Rows of one campaign must be adjacent.
fn group_rows(rows: Vec<CampaignAdRow>) -> SpotlineResult<Vec<Campaign>> {
    let mut campaigns: Vec<Campaign> = Vec::new();
    for row in rows {
        if campaigns.last().map(|c| c.id != row.id).unwrap_or(true) {
            campaigns.push(Campaign {
                id: row.id.clone(),
                name: row.name,
                start_time: from_ns(row.start_ns),
                end_time: from_ns(row.end_ns),
                region: row.region,
                ads: Vec::new(),
                created_at: from_ns(row.created_ns),
            });
        }
        if let (Some(ad_id), Some(media_url), Some(duration_secs), Some(creative_id)) =
            (row.ad_id, row.media_url, row.duration_secs, row.creative_id)
        {
            if let Some(campaign) = campaigns.last_mut() {
                campaign.ads.push(Ad {
                    id: ad_id,
                    campaign_id: Some(row.id),
                    media_url,
                    duration_secs: to_secs(duration_secs)?,
                    creative_id,
                });
            }
        }
    }
    Ok(campaigns)
}

const CAMPAIGN_SELECT: &str = r#"
    SELECT c.id, c.name, c.start_ns, c.end_ns, c.region, c.created_ns,
           a.id AS ad_id, a.media_url, a.duration_secs, a.creative_id
    FROM campaigns c
    LEFT JOIN ads a ON a.campaign_id = c.id
"#;

/// Durable campaign store and impression ledger on SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
    limits: DeliveryConfig,
}

impl SqliteStore {
    /// Open (creating if missing) the database named by `config.database_url`
    /// and apply the schema.
    pub async fn connect(config: &StoreConfig, limits: DeliveryConfig) -> SpotlineResult<Self> {
        let in_memory = config.database_url.contains(":memory:") || config.database_url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(persistence)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its connection, so it
        // gets exactly one that is never recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };
        let pool = pool_options.connect_with(options).await.map_err(persistence)?;

        let store = Self { pool, limits };
        store.init_schema().await?;
        info!(url = %config.database_url, in_memory, "SQLite campaign store ready");
        Ok(store)
    }

    /// Private in-memory database, mainly for tests.
    pub async fn in_memory(limits: DeliveryConfig) -> SpotlineResult<Self> {
        let config = StoreConfig {
            database_url: "sqlite::memory:".to_string(),
            ..StoreConfig::default()
        };
        Self::connect(&config, limits).await
    }

    async fn init_schema(&self) -> SpotlineResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(persistence)?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert_ads(tx: &mut Transaction<'_, Sqlite>, campaign: &Campaign) -> SpotlineResult<()> {
        for (position, ad) in campaign.ads.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ads (id, campaign_id, media_url, duration_secs, creative_id, position) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&ad.id)
            .bind(&campaign.id)
            .bind(&ad.media_url)
            .bind(i64::from(ad.duration_secs))
            .bind(&ad.creative_id)
            .bind(position as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| write_error(&format!("ad id '{}'", ad.id), e))?;
        }
        Ok(())
    }
}

impl CampaignStore for SqliteStore {
    async fn create_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        let campaign = prepare_for_create(campaign, &self.limits)?;
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM campaigns WHERE id = ?")
            .bind(&campaign.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(persistence)?;
        if exists.is_some() {
            return Err(SpotlineError::Conflict(format!("campaign '{}' already exists", campaign.id)));
        }

        sqlx::query(
            "INSERT INTO campaigns (id, name, start_ns, end_ns, region, created_ns) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.name)
        .bind(to_ns(campaign.start_time)?)
        .bind(to_ns(campaign.end_time)?)
        .bind(&campaign.region)
        .bind(to_ns(campaign.created_at)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(&format!("campaign id '{}'", campaign.id), e))?;

        Self::insert_ads(&mut tx, &campaign).await?;
        tx.commit().await.map_err(persistence)?;

        metrics::counter!("store.campaigns.created").increment(1);
        info!(campaign_id = %campaign.id, ads = campaign.ads.len(), "Campaign created");
        self.get_campaign(&campaign.id).await
    }

    async fn update_campaign(&self, campaign: Campaign) -> SpotlineResult<Campaign> {
        let campaign = prepare_for_update(campaign, &self.limits)?;
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let updated = sqlx::query("UPDATE campaigns SET name = ?, start_ns = ?, end_ns = ?, region = ? WHERE id = ?")
            .bind(&campaign.name)
            .bind(to_ns(campaign.start_time)?)
            .bind(to_ns(campaign.end_time)?)
            .bind(&campaign.region)
            .bind(&campaign.id)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;
        if updated.rows_affected() == 0 {
            return Err(SpotlineError::NotFound(format!("campaign '{}'", campaign.id)));
        }

        sqlx::query("DELETE FROM ads WHERE campaign_id = ?")
            .bind(&campaign.id)
            .execute(&mut *tx)
            .await
            .map_err(persistence)?;
        Self::insert_ads(&mut tx, &campaign).await?;
        tx.commit().await.map_err(persistence)?;

        metrics::counter!("store.campaigns.updated").increment(1);
        info!(campaign_id = %campaign.id, ads = campaign.ads.len(), "Campaign updated");
        self.get_campaign(&campaign.id).await
    }

    async fn delete_campaign(&self, id: &str) -> SpotlineResult<()> {
        let deleted = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(persistence)?;
        if deleted.rows_affected() == 0 {
            return Err(SpotlineError::NotFound(format!("campaign '{id}'")));
        }
        metrics::counter!("store.campaigns.deleted").increment(1);
        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> SpotlineResult<Campaign> {
        let query = format!("{CAMPAIGN_SELECT} WHERE c.id = ? ORDER BY a.position");
        let rows: Vec<CampaignAdRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        group_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| SpotlineError::NotFound(format!("campaign '{id}'")))
    }

    async fn list_campaigns(&self) -> SpotlineResult<Vec<Campaign>> {
        let query = format!("{CAMPAIGN_SELECT} ORDER BY c.start_ns DESC, c.id, a.position");
        let rows: Vec<CampaignAdRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        group_rows(rows)
    }

    async fn get_active_campaigns(&self, region: &str, as_of: DateTime<Utc>) -> SpotlineResult<Vec<Campaign>> {
        let query = format!(
            "{CAMPAIGN_SELECT} \
             WHERE ? BETWEEN c.start_ns AND c.end_ns AND (c.region = '*' OR c.region = ?) \
             ORDER BY c.created_ns, c.id, a.position"
        );
        let rows: Vec<CampaignAdRow> = sqlx::query_as(&query)
            .bind(to_ns(as_of)?)
            .bind(region)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence)?;
        let campaigns = group_rows(rows)?;
        debug!(region, count = campaigns.len(), "Active campaigns resolved");
        Ok(campaigns)
    }

    async fn get_available_ads(&self) -> SpotlineResult<Vec<Ad>> {
        let rows: Vec<AdRow> = sqlx::query_as(
            "SELECT id, campaign_id, media_url, duration_secs, creative_id \
             FROM ads WHERE campaign_id IS NULL ORDER BY media_url",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(Ad::try_from).collect()
    }

    async fn get_available_ad_by_media_url(&self, media_url: &str) -> SpotlineResult<Ad> {
        let row: Option<AdRow> = sqlx::query_as(
            "SELECT id, campaign_id, media_url, duration_secs, creative_id \
             FROM ads WHERE media_url = ? AND campaign_id IS NULL LIMIT 1",
        )
        .bind(media_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence)?;
        row.map(Ad::try_from)
            .transpose()?
            .ok_or_else(|| SpotlineError::NotFound(format!("no available ad with media url '{media_url}'")))
    }

    async fn seed_available_ads(&self, ads: Vec<Ad>) -> SpotlineResult<usize> {
        let ads = prepare_pool_ads(ads, &self.limits)?;
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        let mut inserted = 0;
        for ad in ads {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM ads WHERE media_url = ? AND campaign_id IS NULL)",
            )
            .bind(&ad.media_url)
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence)?;
            if exists {
                continue;
            }
            sqlx::query(
                "INSERT INTO ads (id, campaign_id, media_url, duration_secs, creative_id, position) \
                 VALUES (?, NULL, ?, ?, ?, 0)",
            )
            .bind(&ad.id)
            .bind(&ad.media_url)
            .bind(i64::from(ad.duration_secs))
            .bind(&ad.creative_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(&format!("ad id '{}'", ad.id), e))?;
            inserted += 1;
        }
        tx.commit().await.map_err(persistence)?;
        info!(inserted, "Available ad pool seeded");
        Ok(inserted)
    }
}

impl ImpressionLedger for SqliteStore {
    async fn record_impression(&self, impression: &Impression) -> SpotlineResult<()> {
        sqlx::query("INSERT INTO impressions (id, client_id, ad_id, duration_secs, ts_ns) VALUES (?, ?, ?, ?, ?)")
            .bind(&impression.id)
            .bind(&impression.client_id)
            .bind(&impression.ad_id)
            .bind(i64::from(impression.duration_secs))
            .bind(to_ns(impression.timestamp)?)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(&format!("impression id '{}'", impression.id), e))?;
        Ok(())
    }

    async fn sum_duration_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<i64> {
        sqlx::query_scalar("SELECT COALESCE(SUM(duration_secs), 0) FROM impressions WHERE client_id = ? AND ts_ns > ?")
            .bind(client_id)
            .bind(to_ns(since)?)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence)
    }

    async fn list_impressions_since(&self, client_id: &str, since: DateTime<Utc>) -> SpotlineResult<Vec<Impression>> {
        let rows: Vec<ImpressionRow> = sqlx::query_as(
            "SELECT id, client_id, ad_id, duration_secs, ts_ns FROM impressions \
             WHERE client_id = ? AND ts_ns > ? ORDER BY ts_ns, id",
        )
        .bind(client_id)
        .bind(to_ns(since)?)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;
        rows.into_iter().map(Impression::try_from).collect()
    }
}
