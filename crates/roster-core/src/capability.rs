//! Capability tiers and the flags derived from them.
//!
//! A rank's tier is the only input to [`CapabilityFlags::for_tier`]. Flags are
//! cumulative: officer implies senior implies instructor implies recruiter.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Member,
    Recruiter,
    Instructor,
    Senior,
    Officer,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[
            Tier::Member,
            Tier::Recruiter,
            Tier::Instructor,
            Tier::Senior,
            Tier::Officer,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Member => "member",
            Tier::Recruiter => "recruiter",
            Tier::Instructor => "instructor",
            Tier::Senior => "senior",
            Tier::Officer => "officer",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A single permission used to gate workflow transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Recruiter,
    Instructor,
    Senior,
    Officer,
}

impl Capability {
    /// The lowest tier at which this capability turns on.
    pub fn min_tier(self) -> Tier {
        match self {
            Capability::Recruiter => Tier::Recruiter,
            Capability::Instructor => Tier::Instructor,
            Capability::Senior => Tier::Senior,
            Capability::Officer => Tier::Officer,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.min_tier().as_str()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CapabilityFlags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub recruiter: bool,
    pub instructor: bool,
    pub senior: bool,
    pub officer: bool,
}

impl CapabilityFlags {
    /// Pure tier-cutoff derivation. Every flag whose cutoff is at or below
    /// `tier` is set.
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            recruiter: tier >= Capability::Recruiter.min_tier(),
            instructor: tier >= Capability::Instructor.min_tier(),
            senior: tier >= Capability::Senior.min_tier(),
            officer: tier >= Capability::Officer.min_tier(),
        }
    }

    pub fn has(&self, cap: Capability) -> bool {
        match cap {
            Capability::Recruiter => self.recruiter,
            Capability::Instructor => self.instructor,
            Capability::Senior => self.senior,
            Capability::Officer => self.officer,
        }
    }

    /// True if every flag set in `other` is also set here.
    pub fn contains(&self, other: &CapabilityFlags) -> bool {
        (!other.recruiter || self.recruiter)
            && (!other.instructor || self.instructor)
            && (!other.senior || self.senior)
            && (!other.officer || self.officer)
    }

    /// True if the implication chain officer ⇒ senior ⇒ instructor ⇒ recruiter
    /// holds.
    pub fn is_monotonic(&self) -> bool {
        (!self.officer || self.senior)
            && (!self.senior || self.instructor)
            && (!self.instructor || self.recruiter)
    }

    pub fn labels(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.recruiter {
            out.push("recruiter");
        }
        if self.instructor {
            out.push("instructor");
        }
        if self.senior {
            out.push("senior");
        }
        if self.officer {
            out.push("officer");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ActorContext
// ---------------------------------------------------------------------------

/// Supplies the calling actor's identity and capabilities for gating a
/// workflow transition.
pub trait ActorContext {
    fn actor_id(&self) -> &str;
    fn capabilities(&self) -> CapabilityFlags;

    fn require(&self, cap: Capability, action: &str) -> crate::Result<()> {
        if self.capabilities().has(cap) {
            Ok(())
        } else {
            Err(crate::RosterError::Unauthorized {
                action: action.to_string(),
                required: cap.to_string(),
            })
        }
    }
}

/// Plain actor value, used for the reconciler's `system` identity and by
/// callers that resolve capabilities themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub capabilities: CapabilityFlags,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "system";

    pub fn new(id: impl Into<String>, capabilities: CapabilityFlags) -> Self {
        Self {
            id: id.into(),
            capabilities,
        }
    }

    /// The reconciler's identity. Holds every capability.
    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ID, CapabilityFlags::for_tier(Tier::Officer))
    }
}

impl ActorContext for Actor {
    fn actor_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(Tier::Member < Tier::Recruiter);
        assert!(Tier::Senior < Tier::Officer);
    }

    #[test]
    fn officer_implies_every_flag() {
        let flags = CapabilityFlags::for_tier(Tier::Officer);
        assert!(flags.recruiter && flags.instructor && flags.senior && flags.officer);
    }

    #[test]
    fn member_has_no_flags() {
        assert_eq!(
            CapabilityFlags::for_tier(Tier::Member),
            CapabilityFlags::default()
        );
    }

    #[test]
    fn flags_monotonic_across_tiers() {
        for a in Tier::all() {
            assert!(CapabilityFlags::for_tier(*a).is_monotonic());
            for b in Tier::all() {
                if a >= b {
                    let hi = CapabilityFlags::for_tier(*a);
                    let lo = CapabilityFlags::for_tier(*b);
                    assert!(hi.contains(&lo), "{a} should contain {b}");
                }
            }
        }
    }

    #[test]
    fn require_names_the_missing_capability() {
        let actor = Actor::new("42", CapabilityFlags::for_tier(Tier::Instructor));
        assert!(actor.require(Capability::Instructor, "submit").is_ok());
        let err = actor.require(Capability::Officer, "approve").unwrap_err();
        assert_eq!(err.to_string(), "'approve' requires officer capability");
    }

    #[test]
    fn labels_follow_flags() {
        let flags = CapabilityFlags::for_tier(Tier::Senior);
        assert_eq!(flags.labels(), vec!["recruiter", "instructor", "senior"]);
    }
}
