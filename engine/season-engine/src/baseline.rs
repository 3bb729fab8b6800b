//! Baseline tracking for counters the game resets on its own schedule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{Baseline, Category, Counter, Metric, PlayerTag};
use crate::store::SeasonStore;

/// How a season reset treats existing baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Keep the current checkpoints
    Preserve,
    /// Checkpoint every active player at their current raw counters
    CarryForward,
    /// Zero every active player's donation checkpoints. The clan games
    /// counter is a lifetime achievement value, so its checkpoint is carried
    /// forward instead.
    HardZero,
}

/// Baseline created for a player seen for the first time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstSightBaseline {
    FirstObserved,
    Zero,
}

/// Raw values of the baseline-tracked counters at one observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCounters {
    pub donated: i64,
    pub received: i64,
    pub clan_games: i64,
}

/// Progress since the checkpoint, clamped at zero when the counter was reset upstream
pub fn season_delta(raw: i64, baseline: i64) -> i64 {
    (raw - baseline).max(0)
}

pub struct BaselineTracker {
    store: Arc<dyn SeasonStore>,
    first_sight: FirstSightBaseline,
}

impl BaselineTracker {
    pub fn new(store: Arc<dyn SeasonStore>, first_sight: FirstSightBaseline) -> Self {
        Self { store, first_sight }
    }

    /// Stored baseline for `player_tag`, created from `observed` if absent
    pub async fn get_baseline(
        &self,
        player_tag: &PlayerTag,
        observed: RawCounters,
        at: DateTime<Utc>,
    ) -> Result<Baseline> {
        if let Some(existing) = self.store.baseline(player_tag).await? {
            return Ok(existing);
        }

        let baseline = match self.first_sight {
            FirstSightBaseline::FirstObserved => Baseline {
                player_tag: player_tag.clone(),
                donated: observed.donated,
                received: observed.received,
                clan_games: observed.clan_games,
                baseline_at: at,
            },
            FirstSightBaseline::Zero => Baseline::zero(player_tag.clone(), at),
        };
        self.store.put_baseline(&baseline).await?;
        debug!("Created baseline for {}: {:?}", player_tag, baseline);
        Ok(baseline)
    }

    pub async fn season_delta_for(
        &self,
        player_tag: &PlayerTag,
        raw: i64,
        counter: Counter,
    ) -> Result<i64> {
        let baseline = self.store.baseline(player_tag).await?;
        Ok(season_delta(raw, baseline.map_or(0, |b| b.counter(counter))))
    }

    /// Latest raw counters stored for a player
    pub async fn current_raw(&self, player_tag: &PlayerTag) -> Result<RawCounters> {
        let donation = self.store.latest_for_player(Category::Donation, player_tag).await?;
        let clan_games = self.store.latest_for_player(Category::ClanGames, player_tag).await?;
        Ok(RawCounters {
            donated: donation.as_ref().map_or(0, |r| r.metric(Metric::DonationsGiven)),
            received: donation.as_ref().map_or(0, |r| r.metric(Metric::DonationsReceived)),
            clan_games: clan_games.map_or(0, |r| r.metric(Metric::ClanGamesPoints)),
        })
    }

    /// Re-checkpoint every active player. Returns the number of baselines written.
    pub async fn reset_all_baselines(
        &self,
        policy: BaselinePolicy,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        if policy == BaselinePolicy::Preserve {
            info!("Baselines preserved");
            return Ok(0);
        }

        let mut written = 0;
        for player in self.store.players().await?.into_iter().filter(|p| p.is_active) {
            let baseline = match policy {
                BaselinePolicy::CarryForward => {
                    let raw = self.current_raw(&player.player_tag).await?;
                    Baseline {
                        player_tag: player.player_tag.clone(),
                        donated: raw.donated,
                        received: raw.received,
                        clan_games: raw.clan_games,
                        baseline_at: at,
                    }
                }
                _ => {
                    let raw = self.current_raw(&player.player_tag).await?;
                    let clan_games = if raw.clan_games > 0 {
                        raw.clan_games
                    } else {
                        self.store.baseline(&player.player_tag).await?.map_or(0, |b| b.clan_games)
                    };
                    Baseline { clan_games, ..Baseline::zero(player.player_tag.clone(), at) }
                }
            };
            self.store.put_baseline(&baseline).await?;
            written += 1;
        }

        info!("Reset {} baselines with policy {:?}", written, policy);
        Ok(written)
    }
}
