//! Room document and the seat rules applied to it.
//!
//! Every mutation here is a pure function of the current room. The server runs
//! them inside a document transaction; a client may run the same call against
//! its last snapshot to update its view before the server confirms.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::RuleViolation;
use crate::{Millis, RoomId, UserId};

/// Seat reserved for the host
pub const HOST_SEAT: usize = 0;
pub const DEFAULT_SEAT_COUNT: usize = 10;
pub const MAX_SEAT_COUNT: usize = 20;
/// Ban expiry used for bans without a duration
pub const PERMANENT_BAN: Millis = Millis::MAX;

/// Tuning knob read by the client-side mini-games.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    #[default]
    Classic,
    Generous,
    Stingy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Admin,
    Member,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub index: usize,
    pub occupant: Option<Occupant>,
    pub muted: bool,
    pub locked: bool,
    /// Diamond value of gifts received while seated
    pub gift_value: u64,
}

impl Seat {
    fn empty(index: usize) -> Self {
        Self {
            index,
            occupant: None,
            muted: false,
            locked: false,
            gift_value: 0,
        }
    }

    fn is_held_by(&self, user_id: &str) -> bool {
        self.occupant.as_ref().is_some_and(|o| o.user_id == user_id)
    }
}

/// Result of a successful take: where the occupant came from and went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatMove {
    pub from: Option<usize>,
    pub to: usize,
}

/// Partial update of the room's settings; `None` fields stay as they are.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RoomSettings {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub luck_percent: Option<u8>,
    #[serde(default)]
    pub game_mode: Option<GameMode>,
    #[serde(default)]
    pub ai_host_enabled: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub title: String,
    pub host_id: UserId,
    pub seats: Vec<Seat>,
    /// user id -> ban expiry
    #[serde(default)]
    pub bans: BTreeMap<UserId, Millis>,
    #[serde(default)]
    pub admins: BTreeSet<UserId>,
    /// user id -> diamonds spent on gifts in this room
    #[serde(default)]
    pub contributors: BTreeMap<UserId, u64>,
    #[serde(default)]
    pub wealth: f64,
    pub luck_percent: u8,
    #[serde(default)]
    pub game_mode: GameMode,
    #[serde(default)]
    pub ai_host_enabled: bool,
    pub created_at: Millis,
}

impl Room {
    /// New room with the host already on the host seat.
    pub fn new(
        id: RoomId,
        title: String,
        host: Occupant,
        seat_count: usize,
        now: Millis,
    ) -> Result<Self, RuleViolation> {
        if seat_count == 0 || seat_count > MAX_SEAT_COUNT {
            return Err(RuleViolation::InvalidSetting(format!(
                "seat count must be between 1 and {MAX_SEAT_COUNT}"
            )));
        }
        let mut seats: Vec<Seat> = (0..seat_count).map(Seat::empty).collect();
        let host_id = host.user_id.clone();
        seats[HOST_SEAT].occupant = Some(host);
        Ok(Self {
            id,
            title,
            host_id,
            seats,
            bans: BTreeMap::new(),
            admins: BTreeSet::new(),
            contributors: BTreeMap::new(),
            wealth: 0.0,
            luck_percent: 50,
            game_mode: GameMode::Classic,
            ai_host_enabled: false,
            created_at: now,
        })
    }

    pub fn role_of(&self, user_id: &str) -> Role {
        if self.host_id == user_id {
            Role::Host
        } else if self.admins.contains(user_id) {
            Role::Admin
        } else {
            Role::Member
        }
    }

    pub fn is_moderator(&self, user_id: &str) -> bool {
        self.role_of(user_id) != Role::Member
    }

    pub fn seat_of(&self, user_id: &str) -> Option<usize> {
        self.seats.iter().position(|s| s.is_held_by(user_id))
    }

    pub fn occupied_count(&self) -> usize {
        self.seats.iter().filter(|s| s.occupant.is_some()).count()
    }

    fn check_index(&self, index: usize) -> Result<(), RuleViolation> {
        if index >= self.seats.len() {
            return Err(RuleViolation::SeatOutOfRange {
                index,
                seat_count: self.seats.len(),
            });
        }
        Ok(())
    }

    fn require_moderator(&self, actor: &str) -> Result<(), RuleViolation> {
        if self.is_moderator(actor) {
            Ok(())
        } else {
            Err(RuleViolation::NotPermitted("host or admin only".to_string()))
        }
    }

    /// Checks that `actor` may act against `target`: not themselves, not the
    /// host, and admins only against members.
    fn require_authority_over(&self, actor: &str, target: &str) -> Result<(), RuleViolation> {
        if actor == target {
            return Err(RuleViolation::SelfTarget);
        }
        self.require_moderator(actor)?;
        match (self.role_of(actor), self.role_of(target)) {
            (_, Role::Host) => Err(RuleViolation::NotPermitted("cannot act against the host".to_string())),
            (Role::Admin, Role::Admin) => Err(RuleViolation::NotPermitted(
                "admins cannot act against other admins".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Expiry of a ban still in force at `now`.
    pub fn active_ban(&self, user_id: &str, now: Millis) -> Option<Millis> {
        self.bans.get(user_id).copied().filter(|until| *until > now)
    }

    pub fn check_entry(&self, user_id: &str, now: Millis) -> Result<(), RuleViolation> {
        match self.active_ban(user_id, now) {
            Some(until) => Err(RuleViolation::Banned { until }),
            None => Ok(()),
        }
    }

    /// Seat `actor` on `index`, vacating their previous seat.
    ///
    /// Moving keeps the occupant's gift value and mute flag. Moderators may sit
    /// on locked seats; only the host may sit on the host seat.
    pub fn take_seat(&mut self, actor: Occupant, index: usize) -> Result<SeatMove, RuleViolation> {
        self.check_index(index)?;
        let from = self.seat_of(&actor.user_id);
        if from == Some(index) {
            return Ok(SeatMove { from, to: index });
        }
        if index == HOST_SEAT && actor.user_id != self.host_id {
            return Err(RuleViolation::HostSeatReserved);
        }
        let target = &self.seats[index];
        if target.occupant.is_some() {
            return Err(RuleViolation::SeatOccupied(index));
        }
        if target.locked && !self.is_moderator(&actor.user_id) {
            return Err(RuleViolation::SeatLocked(index));
        }

        let (gift_value, muted) = match from {
            Some(prev) => {
                let seat = &mut self.seats[prev];
                let carried = (seat.gift_value, seat.muted);
                seat.occupant = None;
                seat.gift_value = 0;
                seat.muted = false;
                carried
            },
            None => (0, false),
        };

        let seat = &mut self.seats[index];
        seat.occupant = Some(actor);
        seat.gift_value = gift_value;
        seat.muted = muted;
        Ok(SeatMove { from, to: index })
    }

    /// Clear whatever seat `user_id` holds.
    pub fn vacate(&mut self, user_id: &str) -> Option<usize> {
        let index = self.seat_of(user_id)?;
        let seat = &mut self.seats[index];
        seat.occupant = None;
        seat.gift_value = 0;
        seat.muted = false;
        Some(index)
    }

    pub fn leave_seat(&mut self, user_id: &str) -> Result<usize, RuleViolation> {
        self.vacate(user_id).ok_or(RuleViolation::NotSeated)
    }

    pub fn kick(&mut self, actor: &str, target: &str) -> Result<usize, RuleViolation> {
        self.require_authority_over(actor, target)?;
        self.vacate(target).ok_or(RuleViolation::NotSeated)
    }

    /// Occupants toggle their own seat; anything else needs a moderator, and
    /// admins cannot touch the host's seat.
    pub fn set_muted(&mut self, actor: &str, index: usize, muted: bool) -> Result<(), RuleViolation> {
        self.check_index(index)?;
        let seat = &self.seats[index];
        if !seat.is_held_by(actor) {
            self.require_moderator(actor)?;
            if seat.is_held_by(&self.host_id) {
                return Err(RuleViolation::NotPermitted("cannot act against the host".to_string()));
            }
        }
        self.seats[index].muted = muted;
        Ok(())
    }

    pub fn set_locked(&mut self, actor: &str, index: usize, locked: bool) -> Result<(), RuleViolation> {
        self.check_index(index)?;
        self.require_moderator(actor)?;
        self.seats[index].locked = locked;
        Ok(())
    }

    /// Ban `target` until `until`; they lose their seat and admin rights.
    pub fn ban(&mut self, actor: &str, target: &str, until: Millis) -> Result<Option<usize>, RuleViolation> {
        self.require_authority_over(actor, target)?;
        self.bans.insert(target.to_string(), until);
        self.admins.remove(target);
        Ok(self.vacate(target))
    }

    pub fn unban(&mut self, actor: &str, target: &str) -> Result<bool, RuleViolation> {
        self.require_moderator(actor)?;
        Ok(self.bans.remove(target).is_some())
    }

    pub fn set_admin(&mut self, actor: &str, target: &str, admin: bool) -> Result<(), RuleViolation> {
        if self.role_of(actor) != Role::Host {
            return Err(RuleViolation::NotPermitted("host only".to_string()));
        }
        if target == self.host_id {
            return Err(RuleViolation::SelfTarget);
        }
        if admin {
            self.admins.insert(target.to_string());
        } else {
            self.admins.remove(target);
        }
        Ok(())
    }

    pub fn update_settings(&mut self, actor: &str, settings: RoomSettings) -> Result<(), RuleViolation> {
        self.require_moderator(actor)?;
        if let Some(luck) = settings.luck_percent {
            if luck > 100 {
                return Err(RuleViolation::InvalidSetting("luck percent must be 0-100".to_string()));
            }
        }
        if let Some(title) = &settings.title {
            if title.trim().is_empty() {
                return Err(RuleViolation::InvalidSetting("title must not be empty".to_string()));
            }
        }

        if let Some(title) = settings.title {
            self.title = title.trim().to_string();
        }
        if let Some(luck) = settings.luck_percent {
            self.luck_percent = luck;
        }
        if let Some(mode) = settings.game_mode {
            self.game_mode = mode;
        }
        if let Some(enabled) = settings.ai_host_enabled {
            self.ai_host_enabled = enabled;
        }
        Ok(())
    }

    /// Book a gift of `unit_value` diamonds to each recipient.
    ///
    /// All recipients are checked before anything is written, so a rejected
    /// gift leaves the room unchanged.
    pub fn record_gift(&mut self, sender: &str, recipients: &[UserId], unit_value: u64) -> Result<u64, RuleViolation> {
        if recipients.is_empty() || unit_value == 0 {
            return Err(RuleViolation::InvalidQuantity);
        }
        let mut seen = BTreeSet::new();
        let mut indices = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if recipient == sender {
                return Err(RuleViolation::SelfTarget);
            }
            if !seen.insert(recipient.as_str()) {
                return Err(RuleViolation::DuplicateRecipient(recipient.clone()));
            }
            let index = self
                .seat_of(recipient)
                .ok_or_else(|| RuleViolation::RecipientNotSeated(recipient.clone()))?;
            indices.push(index);
        }

        let total = unit_value
            .checked_mul(recipients.len() as u64)
            .ok_or(RuleViolation::InvalidQuantity)?;
        for index in indices {
            let seat = &mut self.seats[index];
            seat.gift_value = seat.gift_value.saturating_add(unit_value);
        }
        let entry = self.contributors.entry(sender.to_string()).or_insert(0);
        *entry = entry.saturating_add(total);
        self.wealth += total as f64;
        Ok(total)
    }
}
