use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::error;

use crate::crawler::models::{ActiveListing, ComplexDailyStats, ComplexInfo, Record, Transaction};
use crate::storage::{RecordSink, WriteReport};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS complex_info (
        complex_id       TEXT NOT NULL,
        name             TEXT NOT NULL,
        district         TEXT,
        area             TEXT,
        built_year       INT,
        tags             TEXT[] NOT NULL DEFAULT '{}',
        building_type    TEXT,
        management_fee   TEXT,
        prop_manager     TEXT,
        prop_developer   TEXT,
        num_of_buildings INT,
        num_of_units     INT,
        latitude         DOUBLE PRECISION,
        longitude        DOUBLE PRECISION,
        scraped_at       TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS complex_info_complex_id_key
         ON complex_info (complex_id)",
    "CREATE INDEX IF NOT EXISTS complex_info_district_area_idx
         ON complex_info (district, area)",
    r#"
    CREATE TABLE IF NOT EXISTS complex_daily_stats (
        date           TIMESTAMPTZ NOT NULL,
        complex_id     TEXT NOT NULL,
        name           TEXT NOT NULL,
        for_rent       INT NOT NULL,
        on_sale_count  INT NOT NULL,
        deal_in_90days INT NOT NULL,
        ask_avg_price  BIGINT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS complex_daily_stats_date_complex_id_key
         ON complex_daily_stats (date, complex_id)",
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        house_id       BIGINT NOT NULL,
        date           TIMESTAMPTZ NOT NULL,
        room_type      TEXT NOT NULL,
        total_area     DOUBLE PRECISION NOT NULL,
        towards        TEXT NOT NULL,
        decoration     TEXT NOT NULL,
        floor_location TEXT NOT NULL,
        building_type  TEXT NOT NULL,
        deal_avg_price BIGINT NOT NULL,
        deal_total_wan BIGINT NOT NULL,
        ask_total_wan  BIGINT NOT NULL,
        days_on_market INT NOT NULL,
        complex_id     TEXT NOT NULL,
        complex_name   TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS transactions_house_id_key
         ON transactions (house_id)",
    r#"
    CREATE TABLE IF NOT EXISTS active_listings (
        house_id       BIGINT NOT NULL,
        date           TIMESTAMPTZ NOT NULL,
        description    TEXT NOT NULL,
        room_type      TEXT NOT NULL,
        total_area     DOUBLE PRECISION NOT NULL,
        towards        TEXT NOT NULL,
        decoration     TEXT NOT NULL,
        floor_location TEXT NOT NULL,
        building_type  TEXT NOT NULL,
        tenure_status  SMALLINT NOT NULL,
        ask_total_wan  BIGINT NOT NULL,
        ask_avg_price  BIGINT NOT NULL,
        followers      INT NOT NULL,
        days_listed    INT NOT NULL,
        complex_id     TEXT NOT NULL,
        complex_name   TEXT NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS active_listings_house_id_key
         ON active_listings (house_id)",
];

pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// One-time table and index setup. Unique indexes are what turns
    /// re-crawled records into duplicate-key rejections downstream.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_complex_info(&self, info: &ComplexInfo) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO complex_info (
                complex_id, name, district, area, built_year, tags,
                building_type, management_fee, prop_manager, prop_developer,
                num_of_buildings, num_of_units, latitude, longitude
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (complex_id) DO NOTHING
            "#,
        )
        .bind(&info.complex_id)
        .bind(&info.name)
        .bind(&info.district)
        .bind(&info.area)
        .bind(info.built_year)
        .bind(&info.tags)
        .bind(&info.building_type)
        .bind(&info.management_fee)
        .bind(&info.prop_manager)
        .bind(&info.prop_developer)
        .bind(info.num_of_buildings)
        .bind(info.num_of_units)
        .bind(info.latitude)
        .bind(info.longitude)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_daily_stats(&self, stats: &ComplexDailyStats) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO complex_daily_stats (
                date, complex_id, name, for_rent, on_sale_count,
                deal_in_90days, ask_avg_price
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (date, complex_id) DO NOTHING
            "#,
        )
        .bind(stats.date.with_timezone(&Utc))
        .bind(&stats.complex_id)
        .bind(&stats.name)
        .bind(stats.for_rent)
        .bind(stats.on_sale_count)
        .bind(stats.deal_in_90days)
        .bind(stats.ask_avg_price)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_transaction(&self, t: &Transaction) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                house_id, date, room_type, total_area, towards, decoration,
                floor_location, building_type, deal_avg_price, deal_total_wan,
                ask_total_wan, days_on_market, complex_id, complex_name
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (house_id) DO NOTHING
            "#,
        )
        .bind(t.house_id)
        .bind(t.date.with_timezone(&Utc))
        .bind(&t.room_type)
        .bind(t.total_area)
        .bind(&t.towards)
        .bind(&t.decoration)
        .bind(&t.floor_location)
        .bind(&t.building_type)
        .bind(t.deal_avg_price)
        .bind(t.deal_total_wan)
        .bind(t.ask_total_wan)
        .bind(t.days_on_market)
        .bind(&t.complex_id)
        .bind(&t.complex_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_listing(&self, l: &ActiveListing) -> sqlx::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO active_listings (
                house_id, date, description, room_type, total_area, towards,
                decoration, floor_location, building_type, tenure_status,
                ask_total_wan, ask_avg_price, followers, days_listed,
                complex_id, complex_name
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            ON CONFLICT (house_id) DO NOTHING
            "#,
        )
        .bind(l.house_id)
        .bind(l.date.with_timezone(&Utc))
        .bind(&l.description)
        .bind(&l.room_type)
        .bind(l.total_area)
        .bind(&l.towards)
        .bind(&l.decoration)
        .bind(&l.floor_location)
        .bind(&l.building_type)
        .bind(l.tenure_status)
        .bind(l.ask_total_wan)
        .bind(l.ask_avg_price)
        .bind(l.followers)
        .bind(l.days_listed)
        .bind(&l.complex_id)
        .bind(&l.complex_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordSink for Storage {
    /// Records are executed independently (no wrapping transaction) so one
    /// hard failure cannot sink the rest of the batch. `ON CONFLICT DO
    /// NOTHING` turns duplicate keys into a zero row count, which is counted
    /// as an intentional duplicate rather than an error.
    async fn insert_batch(
        &self,
        destination: &str,
        records: &[Record],
    ) -> Result<WriteReport> {
        let mut report = WriteReport::default();
        for record in records {
            let outcome = match record {
                Record::ComplexInfo(info) => self.insert_complex_info(info).await,
                Record::DailyStats(stats) => self.insert_daily_stats(stats).await,
                Record::Transaction(t) => self.insert_transaction(t).await,
                Record::Listing(l) => self.insert_listing(l).await,
            };
            match outcome {
                Ok(1) => report.inserted += 1,
                Ok(_) => report.duplicates += 1,
                Err(e) => {
                    error!(destination, error = %e, "record insert failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}
