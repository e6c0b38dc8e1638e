//! Roster reconciliation
//!
//! The session learns about players from two unsynchronized sources: push
//! events, which are fast but lossy, and periodic polls of the backend,
//! which are slow but authoritative. This module merges both streams into
//! one deduplicated roster. A player is keyed by server id when known and
//! by nickname otherwise, and entries are updated in place so handles stay
//! stable for the interface. Players seen only through push events are
//! never dropped just because a poll snapshot omits them.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::PlayerJoined;

/// A locally generated stable handle for one roster entry
///
/// Handles identify a player for the lifetime of the session even while
/// the server-assigned id is still unknown; two entries never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerHandle(Uuid);

impl PlayerHandle {
    /// Creates a fresh handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One reconciled roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Locally generated handle, stable for the session
    pub handle: PlayerHandle,
    /// Server-assigned id, once known
    pub id: Option<u64>,
    /// Display name
    pub nickname: String,
    /// Reference to the player's chosen avatar
    pub avatar: Option<String>,
    /// Team assignment, in team mode
    pub team_name: Option<String>,
}

/// A roster entry as returned by the backend's player listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Server-assigned player id
    #[serde(default, alias = "playerId", alias = "player_id")]
    pub id: Option<u64>,
    /// Display name
    #[serde(alias = "name", alias = "playerName", alias = "player_name")]
    pub nickname: String,
    /// Reference to the player's chosen avatar
    #[serde(default, alias = "avatarId", alias = "avatar_id")]
    pub avatar: Option<String>,
    /// Team assignment, in team mode
    #[serde(default, alias = "teamName", alias = "team")]
    pub team_name: Option<String>,
}

/// A team derived from the current roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Team {
    /// Team name as reported by the backend
    pub name: String,
    /// Nicknames of the current members, in roster order
    pub members: Vec<String>,
}

/// The deduplicated set of players currently known to the session
///
/// Entries only ever accumulate; there is no notion of a player leaving in
/// the core, matching the backend, which never removes players from its
/// listing mid-session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    /// Creates an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current entries in insertion order
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Returns the number of known players
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Returns whether no players are known yet
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Finds the entry matching a server id or, failing that, a nickname
    fn position_of(&self, id: Option<u64>, nickname: Option<&str>) -> Option<usize> {
        if let Some(id) = id {
            if let Some(index) = self
                .players
                .iter()
                .position(|player| player.id == Some(id))
            {
                return Some(index);
            }
        }
        nickname.and_then(|nickname| {
            self.players
                .iter()
                .position(|player| player.nickname == nickname)
        })
    }

    /// Merges identity fields into an existing entry
    ///
    /// Known fields are never cleared by an update that omits them.
    fn merge_into(
        player: &mut Player,
        id: Option<u64>,
        nickname: Option<&str>,
        avatar: Option<&str>,
        team_name: Option<&str>,
    ) {
        if player.id.is_none() {
            player.id = id;
        }
        if let Some(nickname) = nickname {
            if player.nickname.is_empty() {
                player.nickname = nickname.to_owned();
            }
        }
        if let Some(avatar) = avatar {
            player.avatar = Some(avatar.to_owned());
        }
        if let Some(team_name) = team_name {
            player.team_name = Some(team_name.to_owned());
        }
    }

    fn upsert(
        &mut self,
        id: Option<u64>,
        nickname: Option<&str>,
        avatar: Option<&str>,
        team_name: Option<&str>,
    ) -> Option<&Player> {
        if id.is_none() && nickname.is_none() {
            tracing::debug!("ignoring roster update without id or nickname");
            return None;
        }

        let index = match self.position_of(id, nickname) {
            Some(index) => index,
            None => {
                self.players.push(Player {
                    handle: PlayerHandle::new(),
                    id: None,
                    nickname: String::new(),
                    avatar: None,
                    team_name: None,
                });
                self.players.len() - 1
            }
        };
        Self::merge_into(&mut self.players[index], id, nickname, avatar, team_name);
        Some(&self.players[index])
    }

    /// Applies a join event received over the push channel
    ///
    /// Returns the entry the event was merged into, or `None` when the
    /// event carried neither an id nor a nickname and had to be dropped.
    pub fn apply_join(&mut self, joined: &PlayerJoined) -> Option<&Player> {
        self.upsert(
            joined.id,
            joined.nickname.as_deref(),
            joined.avatar.as_deref(),
            joined.team_name.as_deref(),
        )
    }

    /// Applies an authoritative poll snapshot
    ///
    /// Every listed player is merged in; players absent from the snapshot
    /// are kept, since push events can race ahead of the backend's listing.
    pub fn apply_snapshot(&mut self, snapshot: &[PlayerSnapshot]) {
        for entry in snapshot {
            self.upsert(
                entry.id,
                Some(entry.nickname.as_str()),
                entry.avatar.as_deref(),
                entry.team_name.as_deref(),
            );
        }
    }

    /// Resolves a player's team by server id
    pub fn team_of(&self, player_id: u64) -> Option<String> {
        self.players
            .iter()
            .find(|player| player.id == Some(player_id))
            .and_then(|player| player.team_name.clone())
    }

    /// Groups the current roster into teams, sorted by team name
    ///
    /// Players without a team assignment are not listed.
    pub fn teams(&self) -> Vec<Team> {
        self.players
            .iter()
            .filter_map(|player| {
                player
                    .team_name
                    .clone()
                    .map(|team| (team, player.nickname.clone()))
            })
            .into_group_map()
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, members)| Team { name, members })
            .collect()
    }
}
