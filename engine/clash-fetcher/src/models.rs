use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Achievement whose lifetime value tracks clan games points
pub const CLAN_GAMES_ACHIEVEMENT: &str = "Games Champion";

/// `GET /clans/{tag}`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClanResponse {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub member_list: Vec<ClanMember>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClanMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub trophies: i64,
    #[serde(default)]
    pub donations: i64,
    #[serde(default)]
    pub donations_received: i64,
}

/// `GET /players/{tag}`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub trophies: i64,
    #[serde(default)]
    pub donations: i64,
    #[serde(default)]
    pub donations_received: i64,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
}

impl PlayerProfile {
    /// Lifetime clan games points, zero when the achievement is absent
    pub fn clan_games_total(&self) -> i64 {
        self.achievements
            .iter()
            .find(|a| a.name == CLAN_GAMES_ACHIEVEMENT)
            .map_or(0, |a| a.value)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Achievement {
    pub name: String,
    #[serde(default)]
    pub value: i64,
}

/// `GET /clans/{tag}/currentwar`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWar {
    pub state: String,
    #[serde(default)]
    pub war_type: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub preparation_start_time: Option<String>,
    #[serde(default)]
    pub clan: Option<WarClan>,
}

impl CurrentWar {
    pub fn is_in_war(&self) -> bool {
        self.state != "notInWar"
    }

    pub fn is_cwl(&self) -> bool {
        self.war_type.as_deref() == Some("cwl")
    }

    pub fn started(&self) -> Option<&str> {
        self.start_time.as_deref().or(self.preparation_start_time.as_deref())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WarClan {
    pub tag: String,
    #[serde(default)]
    pub members: Vec<WarMember>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WarMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub attacks: Vec<WarAttack>,
}

impl WarMember {
    pub fn stars(&self) -> i64 {
        self.attacks.iter().map(|a| a.stars).sum()
    }

    pub fn attacks_used(&self) -> i64 {
        self.attacks.len() as i64
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WarAttack {
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub destruction_percentage: f64,
}

/// `GET /clans/{tag}/warlog`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WarLog {
    #[serde(default)]
    pub items: Vec<WarLogEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WarLogEntry {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl WarLogEntry {
    pub fn is_finished(&self) -> bool {
        matches!(self.result.as_deref(), Some("win" | "lose" | "tie"))
    }
}

/// `GET /clans/{tag}/capitalraidseasons`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CapitalRaidSeasons {
    #[serde(default)]
    pub items: Vec<CapitalRaidSeason>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CapitalRaidSeason {
    #[serde(default)]
    pub state: Option<String>,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub members: Vec<CapitalRaidMember>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CapitalRaidMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub attack_count: i64,
    #[serde(default)]
    pub capital_resources_looted: i64,
}

/// `GET /clans/{tag}/currentwar/leaguegroup`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LeagueGroup {
    #[serde(default)]
    pub state: Option<String>,
    pub season: String,
    #[serde(default)]
    pub rounds: Vec<LeagueRound>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeagueRound {
    #[serde(default)]
    pub war_tags: Vec<String>,
}

impl LeagueRound {
    /// War tags already scheduled; the API pads unscheduled slots with `#0`
    pub fn scheduled_wars(&self) -> impl Iterator<Item = &str> {
        self.war_tags.iter().map(String::as_str).filter(|tag| *tag != "#0" && !tag.is_empty())
    }
}

/// `GET /clanwarleagues/wars/{warTag}`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeagueWar {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    pub clan: WarClan,
    pub opponent: WarClan,
}

impl LeagueWar {
    /// Our side of the war, whichever slot it occupies
    pub fn side(&self, clan_tag: &str) -> Option<&WarClan> {
        let wanted = clan_tag.trim_start_matches('#');
        [&self.clan, &self.opponent]
            .into_iter()
            .find(|side| side.tag.trim_start_matches('#').eq_ignore_ascii_case(wanted))
    }
}

/// Events emitted by the fetcher service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetcherEvent {
    /// Ingestion and scoring finished
    UpdateCompleted {
        players: usize,
        records: usize,
        timestamp: DateTime<Utc>,
    },

    /// Data fetch failed
    FetchFailed {
        endpoint: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_profile_fixture() {
        let profile: PlayerProfile = serde_json::from_str(
            r##"{
                "tag": "#2PP",
                "name": "alpha",
                "trophies": 5120,
                "donations": 812,
                "donationsReceived": 240,
                "achievements": [
                    {"name": "Friend in Need", "value": 91000},
                    {"name": "Games Champion", "value": 42000}
                ]
            }"##,
        )
        .unwrap();
        assert_eq!(profile.donations_received, 240);
        assert_eq!(profile.clan_games_total(), 42000);
    }

    #[test]
    fn test_current_war_fixture() {
        let war: CurrentWar = serde_json::from_str(
            r##"{
                "state": "inWar",
                "warType": "regular",
                "preparationStartTime": "20250903T080000.000Z",
                "startTime": "20250904T080000.000Z",
                "clan": {
                    "tag": "#2PQ8RYL",
                    "members": [
                        {"tag": "#A", "name": "a", "attacks": [{"stars": 3, "destructionPercentage": 100.0}, {"stars": 2}]},
                        {"tag": "#B", "name": "b"}
                    ]
                }
            }"##,
        )
        .unwrap();
        assert!(war.is_in_war());
        assert!(!war.is_cwl());
        assert_eq!(war.started(), Some("20250904T080000.000Z"));
        let members = &war.clan.as_ref().unwrap().members;
        assert_eq!((members[0].stars(), members[0].attacks_used()), (5, 2));
        assert_eq!(members[1].attacks_used(), 0);
    }

    #[test]
    fn test_not_in_war_has_no_clan() {
        let war: CurrentWar = serde_json::from_str(r#"{"state": "notInWar"}"#).unwrap();
        assert!(!war.is_in_war());
        assert!(war.clan.is_none());
    }

    #[test]
    fn test_league_group_skips_unscheduled_wars() {
        let group: LeagueGroup = serde_json::from_str(
            r##"{
                "state": "inWar",
                "season": "2025-09",
                "rounds": [
                    {"warTags": ["#8Q1", "#8Q2"]},
                    {"warTags": ["#0", "#0"]}
                ]
            }"##,
        )
        .unwrap();
        assert_eq!(group.rounds[0].scheduled_wars().count(), 2);
        assert_eq!(group.rounds[1].scheduled_wars().count(), 0);
    }

    #[test]
    fn test_league_war_side_lookup() {
        let war: LeagueWar = serde_json::from_str(
            r##"{
                "startTime": "20250905T080000.000Z",
                "clan": {"tag": "#OTHER", "members": []},
                "opponent": {"tag": "#2PQ8RYL", "members": [{"tag": "#A", "name": "a"}]}
            }"##,
        )
        .unwrap();
        assert_eq!(war.side("2PQ8RYL").map(|s| s.members.len()), Some(1));
        assert!(war.side("NOPE").is_none());
    }
}
