//! Postgres-backed [`SeasonStore`]
//!
//! Each telemetry category lives in its own table sharing one shape:
//! `(player_tag, temporal_key)` unique, `observed_at`, `manually_edited` and
//! one BIGINT column per metric. Writes lock the existing row, resolve it
//! through [`crate::guard`] and write back in the same transaction.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, SeasonError};
use crate::guard::{self, Resolution};
use crate::models::{
    Baseline, Category, ManualEdit, MergePolicy, Metrics, Player, PlayerScore, PlayerTag,
    RosterMember, RosterSync, SeasonWindow, TelemetryRecord, TemporalKey, UpsertOutcome,
};
use crate::store::{PurgeCounts, SeasonStore};

const SCORE_COLUMNS: &str = "player_tag, season_month, donation_points, trophy_points, war_points, \
     cwl_points, capital_points, clan_games_points, donation_penalty, war_penalty, capital_penalty, \
     cwl_penalty, clan_games_penalty, inactivity_penalty, total_penalties, total_points, last_updated";

fn table(category: Category) -> &'static str {
    match category {
        Category::Donation => "donation_snapshots",
        Category::Trophy => "trophy_snapshots",
        Category::WeeklyTrophy => "weekly_trophies",
        Category::War => "war_participations",
        Category::CapitalRaid => "capital_raid_weekends",
        Category::Cwl => "cwl_rounds",
        Category::ClanGames => "clan_games_points",
    }
}

fn metric_columns(category: Category) -> Vec<&'static str> {
    category.metrics().iter().map(|m| m.column()).collect()
}

fn select_sql(category: Category) -> String {
    format!(
        "SELECT player_tag, temporal_key, observed_at, manually_edited, {} FROM {}",
        metric_columns(category).join(", "),
        table(category)
    )
}

/// Insert-or-merge statement applying each metric's merge policy on conflict.
/// Protected rows are left untouched even if they appeared after the lock was taken.
fn upsert_sql(category: Category) -> String {
    let name = table(category);
    let columns = metric_columns(category);
    let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("${}", i + 5)).collect();
    let merges: Vec<String> = category
        .metrics()
        .iter()
        .map(|metric| {
            let column = metric.column();
            match metric.merge_policy() {
                MergePolicy::MonotonicMax => {
                    format!("{column} = GREATEST({name}.{column}, EXCLUDED.{column})")
                }
                MergePolicy::LastWriteWins => format!("{column} = EXCLUDED.{column}"),
            }
        })
        .collect();
    format!(
        "INSERT INTO {name} (player_tag, temporal_key, observed_at, manually_edited, {}) \
         VALUES ($1, $2, $3, $4, {}) \
         ON CONFLICT (player_tag, temporal_key) DO UPDATE SET \
         observed_at = GREATEST({name}.observed_at, EXCLUDED.observed_at), {} \
         WHERE {name}.manually_edited = FALSE",
        columns.join(", "),
        placeholders.join(", "),
        merges.join(", ")
    )
}

/// Outright write used by manual edits
fn edit_sql(category: Category) -> String {
    let name = table(category);
    let columns = metric_columns(category);
    let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("${}", i + 5)).collect();
    let assignments: Vec<String> =
        columns.iter().map(|column| format!("{column} = EXCLUDED.{column}")).collect();
    format!(
        "INSERT INTO {name} (player_tag, temporal_key, observed_at, manually_edited, {}) \
         VALUES ($1, $2, $3, $4, {}) \
         ON CONFLICT (player_tag, temporal_key) DO UPDATE SET \
         observed_at = EXCLUDED.observed_at, manually_edited = EXCLUDED.manually_edited, {}",
        columns.join(", "),
        placeholders.join(", "),
        assignments.join(", ")
    )
}

fn decode_record(category: Category, row: &PgRow) -> Result<TelemetryRecord> {
    let player_tag: String = row.try_get("player_tag")?;
    let key: String = row.try_get("temporal_key")?;
    let mut metrics = Metrics::new();
    for metric in category.metrics() {
        metrics.set(*metric, row.try_get::<i64, _>(metric.column())?);
    }
    let record = TelemetryRecord {
        category,
        key: category.parse_key(&key)?,
        player_tag: PlayerTag::new(&player_tag),
        observed_at: row.try_get("observed_at")?,
        metrics,
        manually_edited: row.try_get("manually_edited")?,
    };
    record.validate()?;
    Ok(record)
}

/// Decode rows, skipping the ones that fail to decode
fn decode_records(category: Category, rows: Vec<PgRow>) -> Vec<TelemetryRecord> {
    rows.iter()
        .filter_map(|row| match decode_record(category, row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping malformed {} row: {}", category, e);
                None
            }
        })
        .collect()
}

fn decode_player(row: &PgRow) -> Result<Player> {
    let player_tag: String = row.try_get("player_tag")?;
    Ok(Player {
        player_tag: PlayerTag::new(&player_tag),
        player_name: row.try_get("player_name")?,
        joined_at: row.try_get("joined_at")?,
        last_seen: row.try_get("last_seen")?,
        is_active: row.try_get("is_active")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_baseline(row: &PgRow) -> Result<Baseline> {
    let player_tag: String = row.try_get("player_tag")?;
    Ok(Baseline {
        player_tag: PlayerTag::new(&player_tag),
        donated: row.try_get("donated")?,
        received: row.try_get("received")?,
        clan_games: row.try_get("clan_games")?,
        baseline_at: row.try_get("baseline_at")?,
    })
}

fn decode_score(row: &PgRow) -> Result<PlayerScore> {
    let player_tag: String = row.try_get("player_tag")?;
    Ok(PlayerScore {
        player_tag: PlayerTag::new(&player_tag),
        season_month: row.try_get("season_month")?,
        donation_points: row.try_get("donation_points")?,
        trophy_points: row.try_get("trophy_points")?,
        war_points: row.try_get("war_points")?,
        cwl_points: row.try_get("cwl_points")?,
        capital_points: row.try_get("capital_points")?,
        clan_games_points: row.try_get("clan_games_points")?,
        donation_penalty: row.try_get("donation_penalty")?,
        war_penalty: row.try_get("war_penalty")?,
        capital_penalty: row.try_get("capital_penalty")?,
        cwl_penalty: row.try_get("cwl_penalty")?,
        clan_games_penalty: row.try_get("clan_games_penalty")?,
        inactivity_penalty: row.try_get("inactivity_penalty")?,
        total_penalties: row.try_get("total_penalties")?,
        total_points: row.try_get("total_points")?,
        last_updated: row.try_get("last_updated")?,
    })
}

async fn lock_record(
    tx: &mut Transaction<'_, Postgres>,
    category: Category,
    player_tag: &PlayerTag,
    key: &TemporalKey,
) -> Result<Option<TelemetryRecord>> {
    let sql = format!(
        "{} WHERE player_tag = $1 AND temporal_key = $2 FOR UPDATE",
        select_sql(category)
    );
    let row = sqlx::query(&sql)
        .bind(player_tag.as_str())
        .bind(key.encode())
        .fetch_optional(&mut **tx)
        .await?;
    row.map(|row| decode_record(category, &row)).transpose()
}

async fn write_record(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    record: &TelemetryRecord,
) -> Result<u64> {
    let mut query = sqlx::query(sql)
        .bind(record.player_tag.as_str())
        .bind(record.key.encode())
        .bind(record.observed_at)
        .bind(record.manually_edited);
    for metric in record.category.metrics() {
        query = query.bind(record.metric(*metric));
    }
    Ok(query.execute(&mut **tx).await?.rows_affected())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("Connected to season database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl SeasonStore for PgStore {
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Season database migrations applied");
        Ok(())
    }

    async fn sync_roster(&self, members: &[RosterMember], now: DateTime<Utc>) -> Result<RosterSync> {
        let mut tx = self.pool.begin().await?;
        let mut sync = RosterSync::default();

        let rows = sqlx::query("SELECT player_tag, is_active FROM players FOR UPDATE")
            .fetch_all(&mut *tx)
            .await?;
        let mut known = std::collections::BTreeMap::new();
        for row in &rows {
            let tag: String = row.try_get("player_tag")?;
            let active: bool = row.try_get("is_active")?;
            known.insert(PlayerTag::new(&tag), active);
        }

        let present: BTreeSet<&PlayerTag> = members.iter().map(|m| &m.player_tag).collect();
        for member in members {
            match known.get(&member.player_tag) {
                Some(true) => {
                    sqlx::query(
                        "UPDATE players SET player_name = $2, updated_at = $3 WHERE player_tag = $1",
                    )
                    .bind(member.player_tag.as_str())
                    .bind(&member.player_name)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
                Some(false) => {
                    sqlx::query(
                        "UPDATE players SET player_name = $2, is_active = TRUE, joined_at = $3, \
                         updated_at = $3 WHERE player_tag = $1",
                    )
                    .bind(member.player_tag.as_str())
                    .bind(&member.player_name)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    sync.reactivated.push(member.player_tag.clone());
                }
                None => {
                    sqlx::query(
                        "INSERT INTO players (player_tag, player_name, joined_at, last_seen, is_active, updated_at) \
                         VALUES ($1, $2, $3, NULL, TRUE, $3)",
                    )
                    .bind(member.player_tag.as_str())
                    .bind(&member.player_name)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    sync.added.push(member.player_tag.clone());
                }
            }
        }

        for (tag, active) in &known {
            if *active && !present.contains(tag) {
                sqlx::query("UPDATE players SET is_active = FALSE, updated_at = $2 WHERE player_tag = $1")
                    .bind(tag.as_str())
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                sync.departed.push(tag.clone());
            }
        }

        let active: i64 = sqlx::query("SELECT COUNT(*) AS active FROM players WHERE is_active")
            .fetch_one(&mut *tx)
            .await?
            .try_get("active")?;
        sync.active_count = active as usize;

        tx.commit().await?;
        Ok(sync)
    }

    async fn players(&self) -> Result<Vec<Player>> {
        let rows = sqlx::query(
            "SELECT player_tag, player_name, joined_at, last_seen, is_active, updated_at \
             FROM players ORDER BY player_tag",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_player).collect()
    }

    async fn player(&self, player_tag: &PlayerTag) -> Result<Option<Player>> {
        let row = sqlx::query(
            "SELECT player_tag, player_name, joined_at, last_seen, is_active, updated_at \
             FROM players WHERE player_tag = $1",
        )
        .bind(player_tag.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_player).transpose()
    }

    async fn touch_last_seen(&self, player_tag: &PlayerTag, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE players SET last_seen = GREATEST(COALESCE(last_seen, $2), $2) WHERE player_tag = $1",
        )
        .bind(player_tag.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SeasonError::PlayerNotFound { player_tag: player_tag.to_string() });
        }
        Ok(())
    }

    async fn purge_player(&self, player_tag: &PlayerTag) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = PurgeCounts::default();

        for category in Category::ALL {
            let sql = format!("DELETE FROM {} WHERE player_tag = $1", table(category));
            let deleted = sqlx::query(&sql).bind(player_tag.as_str()).execute(&mut *tx).await?;
            counts.add_telemetry(category, deleted.rows_affected());
        }
        counts.scores = sqlx::query("DELETE FROM player_scores WHERE player_tag = $1")
            .bind(player_tag.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.baselines = sqlx::query("DELETE FROM baselines WHERE player_tag = $1")
            .bind(player_tag.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.players = sqlx::query("DELETE FROM players WHERE player_tag = $1")
            .bind(player_tag.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        debug!("Purged {} rows for {}", counts.total(), player_tag);
        Ok(counts)
    }

    async fn upsert(&self, record: TelemetryRecord) -> Result<UpsertOutcome> {
        let category = record.category;
        let mut tx = self.pool.begin().await?;
        let existing = lock_record(&mut tx, category, &record.player_tag, &record.key).await?;
        let resolution = guard::resolve_upsert(existing, record)?;
        let outcome = resolution.outcome();
        if let Resolution::Insert(resolved) | Resolution::Update(resolved) = &resolution {
            write_record(&mut tx, &upsert_sql(category), resolved).await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<TelemetryRecord> {
        let mut tx = self.pool.begin().await?;
        let existing = lock_record(&mut tx, edit.category, &edit.player_tag, &edit.key).await?;
        let edited = guard::apply_edit(existing, edit)?;
        write_record(&mut tx, &edit_sql(edit.category), &edited).await?;
        tx.commit().await?;
        Ok(edited)
    }

    async fn record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<Option<TelemetryRecord>> {
        let sql = format!("{} WHERE player_tag = $1 AND temporal_key = $2", select_sql(category));
        let row = sqlx::query(&sql)
            .bind(player_tag.as_str())
            .bind(key.encode())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_record(category, &row)).transpose()
    }

    async fn query_by_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>> {
        let sql = format!("{} WHERE observed_at >= $1 ORDER BY player_tag, temporal_key", select_sql(category));
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;
        Ok(decode_records(category, rows))
    }

    async fn latest_for_player(
        &self,
        category: Category,
        player_tag: &PlayerTag,
    ) -> Result<Option<TelemetryRecord>> {
        let sql = format!(
            "{} WHERE player_tag = $1 ORDER BY observed_at DESC, temporal_key DESC LIMIT 1",
            select_sql(category)
        );
        let row = sqlx::query(&sql).bind(player_tag.as_str()).fetch_optional(&self.pool).await?;
        row.map(|row| decode_record(category, &row)).transpose()
    }

    async fn delete_record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE player_tag = $1 AND temporal_key = $2", table(category));
        let result = sqlx::query(&sql)
            .bind(player_tag.as_str())
            .bind(key.encode())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_key(&self, category: Category, key: &TemporalKey) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE temporal_key = $1", table(category));
        let result = sqlx::query(&sql).bind(key.encode()).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn purge_categories(&self, categories: &[Category]) -> Result<PurgeCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = PurgeCounts::default();
        for category in categories {
            let sql = format!("DELETE FROM {}", table(*category));
            let deleted = sqlx::query(&sql).execute(&mut *tx).await?;
            counts.add_telemetry(*category, deleted.rows_affected());
        }
        tx.commit().await?;
        Ok(counts)
    }

    async fn baselines(&self) -> Result<Vec<Baseline>> {
        let rows = sqlx::query(
            "SELECT player_tag, donated, received, clan_games, baseline_at FROM baselines ORDER BY player_tag",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_baseline).collect()
    }

    async fn baseline(&self, player_tag: &PlayerTag) -> Result<Option<Baseline>> {
        let row = sqlx::query(
            "SELECT player_tag, donated, received, clan_games, baseline_at FROM baselines WHERE player_tag = $1",
        )
        .bind(player_tag.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_baseline).transpose()
    }

    async fn put_baseline(&self, baseline: &Baseline) -> Result<()> {
        sqlx::query(
            "INSERT INTO baselines (player_tag, donated, received, clan_games, baseline_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (player_tag) DO UPDATE SET donated = EXCLUDED.donated, \
             received = EXCLUDED.received, clan_games = EXCLUDED.clan_games, baseline_at = EXCLUDED.baseline_at",
        )
        .bind(baseline.player_tag.as_str())
        .bind(baseline.donated)
        .bind(baseline.received)
        .bind(baseline.clan_games)
        .bind(baseline.baseline_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_window(&self) -> Result<Option<SeasonWindow>> {
        let row = sqlx::query("SELECT started_at, label FROM season_windows ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(SeasonWindow {
                started_at: row.try_get("started_at")?,
                label: row.try_get("label")?,
            })),
            None => Ok(None),
        }
    }

    async fn open_window(&self, window: &SeasonWindow) -> Result<()> {
        sqlx::query("INSERT INTO season_windows (started_at, label) VALUES ($1, $2)")
            .bind(window.started_at)
            .bind(&window.label)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scores(&self, season_month: &str) -> Result<Vec<PlayerScore>> {
        let sql = format!(
            "SELECT {SCORE_COLUMNS} FROM player_scores WHERE season_month = $1 ORDER BY player_tag"
        );
        let rows = sqlx::query(&sql).bind(season_month).fetch_all(&self.pool).await?;
        rows.iter().map(decode_score).collect()
    }

    async fn replace_scores(&self, season_month: &str, scores: &[PlayerScore]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM player_scores WHERE season_month = $1")
            .bind(season_month)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "INSERT INTO player_scores ({SCORE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        for score in scores {
            sqlx::query(&sql)
                .bind(score.player_tag.as_str())
                .bind(season_month)
                .bind(score.donation_points)
                .bind(score.trophy_points)
                .bind(score.war_points)
                .bind(score.cwl_points)
                .bind(score.capital_points)
                .bind(score.clan_games_points)
                .bind(score.donation_penalty)
                .bind(score.war_penalty)
                .bind(score.capital_penalty)
                .bind(score.cwl_penalty)
                .bind(score.clan_games_penalty)
                .bind(score.inactivity_penalty)
                .bind(score.total_penalties)
                .bind(score.total_points)
                .bind(score.last_updated)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(scores.len())
    }

    async fn archive_scores(&self, season_month: &str, label: &str) -> Result<usize> {
        let sql = format!(
            "INSERT INTO player_score_archives (archive_label, {SCORE_COLUMNS}) \
             SELECT $2, {SCORE_COLUMNS} FROM player_scores WHERE season_month = $1"
        );
        let result = sqlx::query(&sql).bind(season_month).bind(label).execute(&self.pool).await?;
        info!("Archived {} score rows as {}", result.rows_affected(), label);
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_merges_per_metric_policy() {
        let sql = upsert_sql(Category::War);
        assert!(sql.contains("INSERT INTO war_participations"));
        assert!(sql.contains("stars = GREATEST(war_participations.stars, EXCLUDED.stars)"));
        assert!(sql.contains("WHERE war_participations.manually_edited = FALSE"));

        let sql = upsert_sql(Category::Donation);
        assert!(sql.contains("donations_given = EXCLUDED.donations_given"));
        assert!(sql.contains("VALUES ($1, $2, $3, $4, $5, $6)"));
    }

    #[test]
    fn test_edit_sql_overwrites_and_sets_flag() {
        let sql = edit_sql(Category::CapitalRaid);
        assert!(sql.contains("manually_edited = EXCLUDED.manually_edited"));
        assert!(sql.contains("capital_destroyed = EXCLUDED.capital_destroyed"));
        assert!(!sql.contains("GREATEST(capital"));
    }

    #[test]
    fn test_every_category_has_its_own_table() {
        let tables: BTreeSet<&str> = Category::ALL.iter().map(|c| table(*c)).collect();
        assert_eq!(tables.len(), Category::ALL.len());
        assert_eq!(
            select_sql(Category::Cwl),
            "SELECT player_tag, temporal_key, observed_at, manually_edited, stars, attacks_used FROM cwl_rounds"
        );
    }
}
