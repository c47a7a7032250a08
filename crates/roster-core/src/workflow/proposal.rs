//! Per-kind request payloads and their creation-time validation.

use crate::config::WorkflowConfig;
use crate::error::{Result, RosterError};
use crate::ladder::RankLadder;
use crate::member::MemberRecord;
use crate::paths::validate_member_id;
use crate::workflow::types::WorkflowKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Promotion / Demotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionProposal {
    /// Filled from the subject's record at creation.
    #[serde(default)]
    pub current_rank: String,
    pub target_rank: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemotionProposal {
    #[serde(default)]
    pub previous_rank: String,
    pub target_rank: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// DisciplinaryAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisciplinaryGrade {
    Warning,
    Violation,
    ViolationII,
    Demotion,
}

impl DisciplinaryGrade {
    pub fn level(self) -> u8 {
        match self {
            DisciplinaryGrade::Warning => 1,
            DisciplinaryGrade::Violation => 2,
            DisciplinaryGrade::ViolationII => 3,
            DisciplinaryGrade::Demotion => 4,
        }
    }

    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            1 => Ok(DisciplinaryGrade::Warning),
            2 => Ok(DisciplinaryGrade::Violation),
            3 => Ok(DisciplinaryGrade::ViolationII),
            4 => Ok(DisciplinaryGrade::Demotion),
            _ => Err(RosterError::InvalidProposal(format!(
                "disciplinary grade must be 1-4, got {level}"
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DisciplinaryGrade::Warning => "Warning",
            DisciplinaryGrade::Violation => "Violation",
            DisciplinaryGrade::ViolationII => "Violation II",
            DisciplinaryGrade::Demotion => "Demotion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisciplinaryProposal {
    pub grade: DisciplinaryGrade,
    pub reason: String,
    #[serde(default)]
    pub xp_deduction: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demotion_rank: Option<String>,
}

impl DisciplinaryProposal {
    /// Grade 3 at or above the configured deduction and every grade 4 wait
    /// for an officer.
    pub fn needs_officer(&self, settings: &WorkflowConfig) -> bool {
        match self.grade {
            DisciplinaryGrade::Warning | DisciplinaryGrade::Violation => false,
            DisciplinaryGrade::ViolationII => {
                self.xp_deduction >= settings.disciplinary_approval_xp
            }
            DisciplinaryGrade::Demotion => true,
        }
    }
}

// ---------------------------------------------------------------------------
// TrainingCredit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingType {
    BasicTraining,
    Training,
    Event,
    Raid,
}

impl TrainingType {
    pub fn as_str(self) -> &'static str {
        match self {
            TrainingType::BasicTraining => "basic_training",
            TrainingType::Training => "training",
            TrainingType::Event => "event",
            TrainingType::Raid => "raid",
        }
    }
}

impl fmt::Display for TrainingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrainingType {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic_training" => Ok(TrainingType::BasicTraining),
            "training" => Ok(TrainingType::Training),
            "event" => Ok(TrainingType::Event),
            "raid" => Ok(TrainingType::Raid),
            _ => Err(RosterError::InvalidProposal(format!(
                "unknown training type '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingProposal {
    pub training_type: TrainingType,
    pub trainees: Vec<String>,
    pub xp_amount: u64,
    /// XP actually granted per trainee, set at the approving transition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub final_xp: BTreeMap<String, u64>,
}

impl TrainingProposal {
    pub fn uniform_grants(&self) -> BTreeMap<String, u64> {
        self.trainees
            .iter()
            .map(|t| (t.clone(), self.xp_amount))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RecruitmentPlacement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruitmentProposal {
    pub recruit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recruit_username: Option<String>,
    /// Rank the recruit is placed at. Defaults to the ladder's lowest.
    #[serde(default)]
    pub recruit_rank: String,
    pub target_unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_unit: Option<String>,
}

// ---------------------------------------------------------------------------
// PerformanceReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFlag {
    Red,
    Yellow,
    Blue,
    Green,
}

impl ReportFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportFlag::Red => "red",
            ReportFlag::Yellow => "yellow",
            ReportFlag::Blue => "blue",
            ReportFlag::Green => "green",
        }
    }
}

impl fmt::Display for ReportFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportFlag {
    type Err = RosterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "red" => Ok(ReportFlag::Red),
            "yellow" => Ok(ReportFlag::Yellow),
            "blue" => Ok(ReportFlag::Blue),
            "green" => Ok(ReportFlag::Green),
            _ => Err(RosterError::InvalidProposal(format!(
                "unknown report flag '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportScores {
    pub communication: u8,
    pub discipline: u8,
    pub teamwork: u8,
    pub leadership_potential: u8,
    pub technical_skill: u8,
}

impl ReportScores {
    fn values(&self) -> [(&'static str, u8); 5] {
        [
            ("communication", self.communication),
            ("discipline", self.discipline),
            ("teamwork", self.teamwork),
            ("leadership_potential", self.leadership_potential),
            ("technical_skill", self.technical_skill),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in self.values() {
            if !(1..=5).contains(&v) {
                return Err(RosterError::InvalidProposal(format!(
                    "score '{name}' must be 1-5, got {v}"
                )));
            }
        }
        Ok(())
    }

    pub fn mean(&self) -> f64 {
        let sum: u32 = self.values().iter().map(|(_, v)| u32::from(*v)).sum();
        f64::from(sum) / 5.0
    }
}

/// XP granted to the report's subject. Awards only accumulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAward {
    pub actor: String,
    pub amount: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReportProposal {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub scores: ReportScores,
    #[serde(default)]
    pub calculated_score: f64,
    #[serde(default)]
    pub strengths: String,
    #[serde(default)]
    pub weaknesses: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<ReportFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub senior_remarks: Option<String>,
    #[serde(default)]
    pub xp_awards: Vec<XpAward>,
}

impl PerformanceReportProposal {
    pub fn total_awarded(&self) -> u64 {
        self.xp_awards.iter().map(|a| a.amount).sum()
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proposal {
    Promotion(PromotionProposal),
    Demotion(DemotionProposal),
    DisciplinaryAction(DisciplinaryProposal),
    TrainingCredit(TrainingProposal),
    RecruitmentPlacement(RecruitmentProposal),
    PerformanceReport(PerformanceReportProposal),
}

/// What creation-time validation may consult.
pub struct ProposalContext<'a> {
    pub subject: Option<&'a MemberRecord>,
    pub ladder: &'a RankLadder,
    pub settings: &'a WorkflowConfig,
}

impl ProposalContext<'_> {
    fn subject(&self) -> Result<&MemberRecord> {
        self.subject.ok_or_else(|| {
            RosterError::InvalidProposal("subject member has no record yet; run sync".into())
        })
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RosterError::InvalidProposal(format!("{field} is required")));
    }
    Ok(())
}

impl Proposal {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Proposal::Promotion(_) => WorkflowKind::Promotion,
            Proposal::Demotion(_) => WorkflowKind::Demotion,
            Proposal::DisciplinaryAction(_) => WorkflowKind::DisciplinaryAction,
            Proposal::TrainingCredit(_) => WorkflowKind::TrainingCredit,
            Proposal::RecruitmentPlacement(_) => WorkflowKind::RecruitmentPlacement,
            Proposal::PerformanceReport(_) => WorkflowKind::PerformanceReport,
        }
    }

    /// Validate the payload for a new request and fill derived fields.
    pub fn prepare(&mut self, ctx: &ProposalContext<'_>) -> Result<()> {
        match self {
            Proposal::Promotion(p) => {
                let subject = ctx.subject()?;
                require_text("reason", &p.reason)?;
                let target = ctx.ladder.rank_of(&p.target_rank)?;
                let current = ctx.ladder.rank_of(&subject.canonical_rank)?;
                if target <= current {
                    return Err(RosterError::InvalidProposal(format!(
                        "promotion target '{}' is not above current rank '{}'",
                        p.target_rank, subject.canonical_rank
                    )));
                }
                p.current_rank = subject.canonical_rank.clone();
            }
            Proposal::Demotion(p) => {
                let subject = ctx.subject()?;
                require_text("reason", &p.reason)?;
                let target = ctx.ladder.rank_of(&p.target_rank)?;
                let current = ctx.ladder.rank_of(&subject.canonical_rank)?;
                if target >= current {
                    return Err(RosterError::InvalidProposal(format!(
                        "demotion target '{}' is not below current rank '{}'",
                        p.target_rank, subject.canonical_rank
                    )));
                }
                p.previous_rank = subject.canonical_rank.clone();
            }
            Proposal::DisciplinaryAction(p) => {
                let subject = ctx.subject()?;
                require_text("reason", &p.reason)?;
                match p.grade {
                    DisciplinaryGrade::Warning => {
                        p.xp_deduction = 0;
                        p.demotion_rank = None;
                    }
                    DisciplinaryGrade::Violation => {
                        p.xp_deduction = ctx.settings.violation_xp;
                        p.demotion_rank = None;
                    }
                    DisciplinaryGrade::ViolationII => {
                        if p.xp_deduction == 0 {
                            return Err(RosterError::InvalidProposal(
                                "grade 3 requires an XP deduction".into(),
                            ));
                        }
                        p.demotion_rank = None;
                    }
                    DisciplinaryGrade::Demotion => {
                        let rank = p.demotion_rank.as_deref().ok_or_else(|| {
                            RosterError::InvalidProposal("grade 4 requires a demotion rank".into())
                        })?;
                        let target = ctx.ladder.rank_of(rank)?;
                        let current = ctx.ladder.rank_of(&subject.canonical_rank)?;
                        if target >= current {
                            return Err(RosterError::InvalidProposal(format!(
                                "demotion rank '{rank}' is not below current rank '{}'",
                                subject.canonical_rank
                            )));
                        }
                    }
                }
            }
            Proposal::TrainingCredit(p) => {
                if p.trainees.is_empty() {
                    return Err(RosterError::InvalidProposal(
                        "training needs at least one trainee".into(),
                    ));
                }
                let mut seen = BTreeSet::new();
                for t in &p.trainees {
                    validate_member_id(t)?;
                    if !seen.insert(t.as_str()) {
                        return Err(RosterError::InvalidProposal(format!(
                            "trainee '{t}' listed twice"
                        )));
                    }
                }
                if p.xp_amount == 0 {
                    return Err(RosterError::InvalidProposal(
                        "training XP amount must be at least 1".into(),
                    ));
                }
                p.final_xp.clear();
            }
            Proposal::RecruitmentPlacement(p) => {
                validate_member_id(&p.recruit_id)?;
                require_text("target unit", &p.target_unit)?;
                if p.recruit_rank.is_empty() {
                    p.recruit_rank = ctx.ladder.lowest().name.clone();
                } else {
                    ctx.ladder.rank(&p.recruit_rank)?;
                }
                p.final_unit = None;
            }
            Proposal::PerformanceReport(p) => {
                ctx.subject()?;
                if p.period_end < p.period_start {
                    return Err(RosterError::InvalidProposal(
                        "report period ends before it starts".into(),
                    ));
                }
                p.scores.validate()?;
                p.calculated_score = p.scores.mean();
                p.flag = None;
                p.senior_remarks = None;
                p.xp_awards.clear();
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
