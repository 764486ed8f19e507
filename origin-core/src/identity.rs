//! Identity registry for users known in the current room.
//!
//! Two views are kept side by side: the index view, filled from the room's
//! "users" packet and keyed by the room-local index, and the name view, which
//! maps usernames to their appearance for outfit capture. Both are read from
//! the behavior tasks while packet handlers populate them, so each sits behind
//! its own `RwLock`.

use crate::protocol::{RoomEntity, RoomUser};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Wrapper placed before the raw figure in an outfit code.
pub const OUTFIT_PREFIX: &str = "@l@D@Y";
/// Wrapper placed after a male figure.
pub const MALE_SUFFIX: &str = "@E@AM@JH@AH@R@@";
/// Wrapper placed after a female figure.
pub const FEMALE_SUFFIX: &str = "@E@AF@JH@AH@R@@";

/// Avatar gender as reported by the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    /// Parse the room's gender code ("m"/"f", any case).
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "m" | "M" => Gender::Male,
            "f" | "F" => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}

/// A user's avatar as needed for outfit capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appearance {
    pub figure: String,
    pub gender: Gender,
}

impl Appearance {
    pub fn new(figure: impl Into<String>, gender: Gender) -> Self {
        Self {
            figure: figure.into(),
            gender,
        }
    }

    /// Wrap the figure in the gender-specific outfit code.
    ///
    /// Unknown gender passes the raw figure through unchanged.
    pub fn outfit_code(&self) -> String {
        match self.gender {
            Gender::Male => format!("{OUTFIT_PREFIX}{}{MALE_SUFFIX}", self.figure),
            Gender::Female => format!("{OUTFIT_PREFIX}{}{FEMALE_SUFFIX}", self.figure),
            Gender::Unknown => self.figure.clone(),
        }
    }
}

/// A player known by room-local index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub index: i32,
    pub name: String,
    pub figure: String,
    pub gender: Gender,
}

impl From<&RoomUser> for UserIdentity {
    fn from(user: &RoomUser) -> Self {
        Self {
            index: user.index,
            name: user.name.clone(),
            figure: user.figure.clone(),
            gender: Gender::parse(&user.gender),
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_index: RwLock<HashMap<i32, UserIdentity>>,
    by_name: RwLock<HashMap<String, Appearance>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every player record of a "users" packet.
    ///
    /// Returns the identities whose index was not known before.
    pub async fn upsert_from_room_entity_list(&self, users: &[RoomUser]) -> Vec<UserIdentity> {
        let mut by_index = self.by_index.write().await;
        let mut by_name = self.by_name.write().await;
        let mut added = Vec::new();

        for user in users.iter().filter(|u| u.is_player()) {
            let identity = UserIdentity::from(user);
            by_name.insert(
                identity.name.clone(),
                Appearance::new(&identity.figure, identity.gender),
            );
            if by_index.insert(identity.index, identity.clone()).is_none() {
                added.push(identity);
            }
        }

        added
    }

    /// Record appearances from a room-manager "entities added" batch.
    pub async fn record_appearances(&self, entities: &[RoomEntity]) {
        let mut by_name = self.by_name.write().await;
        for entity in entities {
            by_name.insert(
                entity.name.clone(),
                Appearance::new(&entity.figure, Gender::parse(&entity.gender)),
            );
        }
    }

    /// Evict one index. The name view keeps the appearance.
    pub async fn remove_by_index(&self, index: i32) -> Option<UserIdentity> {
        self.by_index.write().await.remove(&index)
    }

    pub async fn lookup_by_index(&self, index: i32) -> Option<String> {
        self.by_index
            .read()
            .await
            .get(&index)
            .map(|identity| identity.name.clone())
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<Appearance> {
        self.by_name.read().await.get(name).cloned()
    }

    /// Usernames of the index view, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_index
            .read()
            .await
            .values()
            .map(|identity| identity.name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.by_index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_index.read().await.is_empty()
    }

    /// Clear both views. Both write locks are held together so no reader
    /// observes one view cleared and the other stale.
    pub async fn reset_all(&self) {
        let mut by_index = self.by_index.write().await;
        let mut by_name = self.by_name.write().await;
        by_index.clear();
        by_name.clear();
    }
}
