//! End-to-end season scenarios against the in-memory store

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use crate::baseline::{BaselinePolicy, BaselineTracker, FirstSightBaseline};
use crate::memory::MemoryStore;
use crate::models::{
    Baseline, Category, ManualEdit, Metric, Metrics, Player, PlayerScore, PlayerTag,
    SeasonContext, SeasonWindow, TelemetryRecord, TemporalKey, UpsertOutcome,
};
use crate::rules::RuleSet;
use crate::scoring::ScoringEngine;
use crate::season::SeasonLifecycle;
use crate::store::SeasonStore;

fn season_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    season_start() + Duration::days(20)
}

fn context() -> SeasonContext {
    SeasonContext::new(
        SeasonWindow { started_at: season_start(), label: "Season 2025-09-01".to_string() },
        now(),
    )
}

fn observed() -> DateTime<Utc> {
    season_start() + Duration::days(5)
}

async fn clan(tags: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for tag in tags {
        add_player(&store, tag, now() - Duration::days(60)).await;
    }
    store
}

async fn add_player(store: &MemoryStore, tag: &str, joined_at: DateTime<Utc>) {
    store
        .insert_player(Player {
            player_tag: PlayerTag::new(tag),
            player_name: tag.to_string(),
            joined_at,
            last_seen: Some(now()),
            is_active: true,
            updated_at: joined_at,
        })
        .await;
}

async fn put(store: &MemoryStore, category: Category, tag: &str, key: TemporalKey, metrics: Metrics) {
    store
        .upsert(TelemetryRecord::observed(category, PlayerTag::new(tag), key, observed(), metrics))
        .await
        .unwrap();
}

fn donations(given: i64, received: i64) -> Metrics {
    Metrics::new().with(Metric::DonationsGiven, given).with(Metric::DonationsReceived, received)
}

fn day(d: u32) -> TemporalKey {
    TemporalKey::Date(NaiveDate::from_ymd_opt(2025, 9, d).unwrap())
}

fn round(n: u32) -> TemporalKey {
    TemporalKey::CwlRound { season: "2025-09".to_string(), round: n }
}

async fn score_of(store: &MemoryStore, tag: &str) -> PlayerScore {
    store
        .scores(&context().season_month)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.player_tag.as_str() == tag)
        .unwrap()
}

async fn run(store: Arc<MemoryStore>) {
    let engine = ScoringEngine::new(store, RuleSet::tiered()).unwrap();
    let report = engine.execute(&context()).await.unwrap();
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_donation_delta_against_baseline_ranks_second() {
    let store = clan(&["P", "X1", "X2", "X3", "X4"]).await;
    store
        .put_baseline(&Baseline {
            player_tag: PlayerTag::new("P"),
            donated: 100,
            received: 50,
            clan_games: 0,
            baseline_at: season_start(),
        })
        .await
        .unwrap();
    put(&store, Category::Donation, "P", day(20), donations(180, 50)).await;
    put(&store, Category::Donation, "X1", day(20), donations(900, 1000)).await;
    put(&store, Category::Donation, "X2", day(20), donations(70, 0)).await;
    put(&store, Category::Donation, "X3", day(20), donations(40, 0)).await;
    put(&store, Category::Donation, "X4", day(20), donations(10, 0)).await;

    run(store.clone()).await;

    // Second by amount (4), first by balance +80 (5)
    let p = score_of(&store, "P").await;
    assert_eq!(p.donation_points, 4 + 5);
    let x1 = score_of(&store, "X1").await;
    assert_eq!(x1.donation_points, 5);
    assert_eq!(x1.donation_penalty, 0);
}

#[tokio::test]
async fn test_low_capital_weekend_costs_three() {
    let store = clan(&["Q", "Y"]).await;
    let raid = |destroyed: i64| {
        Metrics::new().with(Metric::CapitalDestroyed, destroyed).with(Metric::AttacksUsed, 6)
    };
    put(&store, Category::CapitalRaid, "Y", day(5), raid(25_000)).await;
    put(&store, Category::CapitalRaid, "Y", day(12), raid(22_000)).await;
    put(&store, Category::CapitalRaid, "Y", day(19), raid(21_000)).await;
    put(&store, Category::CapitalRaid, "Q", day(12), raid(4_000)).await;

    run(store.clone()).await;

    assert_eq!(score_of(&store, "Q").await.capital_penalty, -3);
    assert_eq!(score_of(&store, "Y").await.capital_penalty, 0);
}

#[tokio::test]
async fn test_only_completed_cwl_rounds_penalize() {
    let store = clan(&["R", "S"]).await;
    let attack = |stars: i64, attacks: i64| {
        Metrics::new().with(Metric::Stars, stars).with(Metric::AttacksUsed, attacks)
    };
    put(&store, Category::Cwl, "S", round(3), attack(3, 1)).await;
    put(&store, Category::Cwl, "R", round(3), attack(0, 0)).await;
    put(&store, Category::Cwl, "S", round(4), attack(0, 0)).await;
    put(&store, Category::Cwl, "R", round(4), attack(0, 0)).await;

    run(store.clone()).await;

    assert_eq!(score_of(&store, "R").await.cwl_penalty, -8);
    assert_eq!(score_of(&store, "S").await.cwl_penalty, 0);
}

#[tokio::test]
async fn test_reset_leaves_zeroed_scores_and_new_window() {
    let store = clan(&["A", "B"]).await;
    put(&store, Category::Donation, "A", day(20), donations(500, 20)).await;
    run(store.clone()).await;
    assert!(score_of(&store, "A").await.total_points > 0);

    let baselines = BaselineTracker::new(store.clone(), FirstSightBaseline::FirstObserved);
    let lifecycle = SeasonLifecycle::new(store.clone(), baselines, context().window);
    let report = lifecycle.reset_season(BaselinePolicy::CarryForward, None, now()).await.unwrap();
    assert_eq!(report.players_reset, 2);

    let scores = store.scores(&context().season_month).await.unwrap();
    assert_eq!(scores.len(), 2);
    for score in &scores {
        assert_eq!(*score, PlayerScore::zeroed(score.player_tag.clone(), &context().season_month, now()));
    }
    let window = lifecycle.current_window().await.unwrap();
    assert_eq!(window.started_at, now());

    // Next run only sees telemetry observed after the reset
    let engine = ScoringEngine::new(store.clone(), RuleSet::tiered()).unwrap();
    engine.execute(&lifecycle.current_context(now()).await.unwrap()).await.unwrap();
    assert_eq!(score_of(&store, "A").await.donation_points, 0);
}

#[tokio::test]
async fn test_rookies_are_never_penalized() {
    let store = clan(&["VET"]).await;
    add_player(&store, "NEW", now() - Duration::days(3)).await;
    let war = Metrics::new().with(Metric::Stars, 0).with(Metric::AttacksUsed, 0);
    let key = TemporalKey::War("20250906T0800_XYZ".to_string());
    put(&store, Category::War, "VET", key.clone(), war.clone()).await;
    put(&store, Category::War, "NEW", key, war).await;

    run(store.clone()).await;

    assert_eq!(score_of(&store, "VET").await.war_penalty, -2);
    let rookie = score_of(&store, "NEW").await;
    assert_eq!(rookie.total_penalties, 0);
}

#[tokio::test]
async fn test_manual_override_survives_ingestion_and_drives_scores() {
    let store = clan(&["A", "B"]).await;
    let key = TemporalKey::War("20250906T0800_XYZ".to_string());
    let war = |stars: i64| Metrics::new().with(Metric::Stars, stars).with(Metric::AttacksUsed, 2);
    put(&store, Category::War, "A", key.clone(), war(2)).await;
    put(&store, Category::War, "B", key.clone(), war(4)).await;

    store
        .apply_manual_edit(&ManualEdit {
            category: Category::War,
            player_tag: PlayerTag::new("A"),
            key: key.clone(),
            metrics: war(6),
            protect: true,
            edited_at: now(),
        })
        .await
        .unwrap();

    let outcome = store
        .upsert(TelemetryRecord::observed(Category::War, PlayerTag::new("A"), key.clone(), now(), war(3)))
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Skipped);
    let stored = store.record(Category::War, &PlayerTag::new("A"), &key).await.unwrap().unwrap();
    assert_eq!(stored.metric(Metric::Stars), 6);
    assert!(stored.manually_edited);

    run(store.clone()).await;
    // 15 for top stars, 5 for top average
    assert_eq!(score_of(&store, "A").await.war_points, 20);
    assert_eq!(score_of(&store, "B").await.war_points, 14 + 4);
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let store = clan(&["ALF", "MID", "ZED"]).await;
    for tag in ["ZED", "ALF", "MID"] {
        put(
            &store,
            Category::Trophy,
            tag,
            TemporalKey::Month("2025-09".to_string()),
            Metrics::new().with(Metric::Trophies, 5000),
        )
        .await;
    }

    run(store.clone()).await;
    let first = store.scores(&context().season_month).await.unwrap();
    run(store.clone()).await;
    let second = store.scores(&context().season_month).await.unwrap();
    assert_eq!(first, second);

    let alf = first.iter().find(|s| s.player_tag.as_str() == "ALF").unwrap();
    let zed = first.iter().find(|s| s.player_tag.as_str() == "ZED").unwrap();
    assert_eq!(alf.trophy_points, 15);
    assert_eq!(zed.trophy_points, 13);
}
