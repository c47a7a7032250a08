//! The rank ladder: single source of rank ordering, XP thresholds, tiers and
//! category roles. No other module compares rank names directly.

use crate::capability::{CapabilityFlags, Tier};
use crate::error::{Result, RosterError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Rank
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub name: String,
    pub xp: u64,
    pub tier: Tier,
    /// Grouping roles held alongside the rank role at the external source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

impl Rank {
    pub fn new(name: &str, xp: u64, tier: Tier, categories: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            xp,
            tier,
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// RoleCorrection
// ---------------------------------------------------------------------------

/// Roles to remove and add at the external source to make a member hold
/// exactly one ladder rank and its categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCorrection {
    pub remove: BTreeSet<String>,
    pub add: BTreeSet<String>,
}

impl RoleCorrection {
    /// Roles the member holds after the correction is applied to `roles`.
    pub fn applied_to(&self, roles: &BTreeSet<String>) -> BTreeSet<String> {
        roles
            .iter()
            .filter(|r| !self.remove.contains(*r))
            .cloned()
            .chain(self.add.iter().cloned())
            .collect()
    }

    pub fn is_noop_for(&self, roles: &BTreeSet<String>) -> bool {
        &self.applied_to(roles) == roles
    }
}

// ---------------------------------------------------------------------------
// RankLadder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankLadder {
    ranks: Vec<Rank>,
}

const ENLISTED: &[&str] = &["Enlisted", "Enlisted Personnel"];
const NCO: &[&str] = &["Non-Commissioned Officers", "Enlisted Personnel"];
const SNCO: &[&str] = &["Senior Non-Commissioned Officers", "Enlisted Personnel"];
const COMPANY: &[&str] = &["Commissioned Officers", "Company Grade Officers"];
const FIELD: &[&str] = &["Commissioned Officers", "Field Grade Officers"];
const GENERAL: &[&str] = &["Commissioned Officers", "General Grade Officers"];

impl Default for RankLadder {
    fn default() -> Self {
        use Tier::*;
        let ranks = vec![
            Rank::new("Citizen", 0, Member, &[]),
            Rank::new("Airman Basic", 1, Member, ENLISTED),
            Rank::new("Airman", 10, Member, ENLISTED),
            Rank::new("Airman First Class", 25, Member, ENLISTED),
            Rank::new("Senior Airman", 50, Recruiter, ENLISTED),
            Rank::new("Staff Sergeant", 100, Instructor, NCO),
            Rank::new("Technical Sergeant", 175, Instructor, NCO),
            Rank::new("Master Sergeant", 300, Senior, NCO),
            Rank::new("First Sergeant", 500, Senior, NCO),
            Rank::new("Senior Master Sergeant", 750, Senior, NCO),
            Rank::new("Senior First Sergeant", 1000, Senior, NCO),
            Rank::new("Chief Master Sergeant", 1300, Senior, SNCO),
            Rank::new("Chief First Sergeant", 1600, Senior, SNCO),
            Rank::new("Command Chief Master Sergeant", 2000, Senior, SNCO),
            Rank::new("Senior Enlisted Leader", 2500, Senior, SNCO),
            Rank::new("Chief Senior Enlisted Leader", 3000, Senior, SNCO),
            Rank::new("Chief Master Sergeant of the Air Force", 3500, Senior, SNCO),
            Rank::new("Second Lieutenant", 4000, Officer, COMPANY),
            Rank::new("First Lieutenant", 4500, Officer, COMPANY),
            Rank::new("Captain", 5000, Officer, COMPANY),
            Rank::new("Major", 6000, Officer, FIELD),
            Rank::new("Lieutenant Colonel", 7000, Officer, FIELD),
            Rank::new("Colonel", 8000, Officer, FIELD),
            Rank::new("Brigadier General", 9000, Officer, GENERAL),
            Rank::new("Major General", 10000, Officer, GENERAL),
            Rank::new("Lieutenant General", 11000, Officer, GENERAL),
            Rank::new("General", 12000, Officer, GENERAL),
            Rank::new("General of the Air Force", 15000, Officer, GENERAL),
        ];
        Self { ranks }
    }
}

impl RankLadder {
    /// Build a ladder and check its invariants.
    pub fn new(ranks: Vec<Rank>) -> Result<Self> {
        let ladder = Self { ranks };
        ladder.validate()?;
        Ok(ladder)
    }

    /// Non-empty, unique names, strictly increasing thresholds, and
    /// non-decreasing tiers.
    pub fn validate(&self) -> Result<()> {
        if self.ranks.is_empty() {
            return Err(RosterError::InvalidConfig("ladder has no ranks".into()));
        }
        let mut seen = BTreeSet::new();
        for rank in &self.ranks {
            if !seen.insert(rank.name.as_str()) {
                return Err(RosterError::InvalidConfig(format!(
                    "duplicate rank '{}'",
                    rank.name
                )));
            }
        }
        for pair in self.ranks.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if hi.xp <= lo.xp {
                return Err(RosterError::InvalidConfig(format!(
                    "threshold of '{}' ({}) must exceed '{}' ({})",
                    hi.name, hi.xp, lo.name, lo.xp
                )));
            }
            if hi.tier < lo.tier {
                return Err(RosterError::InvalidConfig(format!(
                    "tier of '{}' ({}) is below '{}' ({})",
                    hi.name, hi.tier, lo.name, lo.tier
                )));
            }
        }
        Ok(())
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn lowest(&self) -> &Rank {
        &self.ranks[0]
    }

    pub fn get(&self, name: &str) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.ranks.iter().position(|r| r.name == name)
    }

    /// `RankOf(name)`: position in ladder order.
    pub fn rank_of(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| RosterError::RankNotFound(name.to_string()))
    }

    pub fn rank(&self, name: &str) -> Result<&Rank> {
        self.get(name)
            .ok_or_else(|| RosterError::RankNotFound(name.to_string()))
    }

    /// `ThresholdFor(name)`.
    pub fn threshold_for(&self, name: &str) -> Result<u64> {
        Ok(self.rank(name)?.xp)
    }

    pub fn tier_of(&self, name: &str) -> Result<Tier> {
        Ok(self.rank(name)?.tier)
    }

    pub fn categories_of(&self, name: &str) -> Result<&[String]> {
        Ok(&self.rank(name)?.categories)
    }

    /// `CapabilityDeriver(rank)`.
    pub fn capabilities_for(&self, name: &str) -> Result<CapabilityFlags> {
        Ok(CapabilityFlags::for_tier(self.tier_of(name)?))
    }

    /// The rank immediately above `name`, if any.
    pub fn next_above(&self, name: &str) -> Result<Option<&Rank>> {
        let i = self.rank_of(name)?;
        Ok(self.ranks.get(i + 1))
    }

    /// `RankFromXP(xp)`: highest-threshold rank whose threshold is at or
    /// below `xp`; the lowest rank when `xp` is below every threshold.
    pub fn rank_from_xp(&self, xp: u64) -> &Rank {
        self.ranks
            .iter()
            .rev()
            .find(|r| r.xp <= xp)
            .unwrap_or_else(|| self.lowest())
    }

    /// `RankFromXP` restricted to ranks at or below `ceiling`.
    pub fn rank_from_xp_capped(&self, xp: u64, ceiling: &str) -> Result<&Rank> {
        let cap = self.rank_of(ceiling)?;
        Ok(self.ranks[..=cap]
            .iter()
            .rev()
            .find(|r| r.xp <= xp)
            .unwrap_or_else(|| self.lowest()))
    }

    /// The observed role with the highest ladder index; the lowest rank when
    /// no role names a rank.
    pub fn highest_observed<'a, I>(&self, roles: I) -> &Rank
    where
        I: IntoIterator<Item = &'a String>,
    {
        roles
            .into_iter()
            .filter_map(|r| self.index_of(r))
            .max()
            .map(|i| &self.ranks[i])
            .unwrap_or_else(|| self.lowest())
    }

    /// Every rank name and category name. These are the roles a correction
    /// removes before adding the target rank's roles.
    pub fn managed_roles(&self) -> BTreeSet<String> {
        self.ranks
            .iter()
            .flat_map(|r| std::iter::once(&r.name).chain(r.categories.iter()))
            .cloned()
            .collect()
    }

    /// Roles the member should hold for `target`: the rank role plus its
    /// categories.
    pub fn roles_for(&self, target: &str) -> Result<BTreeSet<String>> {
        let rank = self.rank(target)?;
        Ok(std::iter::once(rank.name.clone())
            .chain(rank.categories.iter().cloned())
            .collect())
    }

    /// Remove every managed role the member holds, add `target` and its
    /// categories. Roles outside the ladder are left alone.
    pub fn correction_for(
        &self,
        current: &BTreeSet<String>,
        target: &str,
    ) -> Result<RoleCorrection> {
        let add = self.roles_for(target)?;
        let managed = self.managed_roles();
        let remove = current
            .iter()
            .filter(|r| managed.contains(*r) && !add.contains(*r))
            .cloned()
            .collect();
        let add = add.into_iter().filter(|r| !current.contains(r)).collect();
        Ok(RoleCorrection { remove, add })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
