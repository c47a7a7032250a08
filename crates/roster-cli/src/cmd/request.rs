use crate::output::{list_or_none, print_json, print_table};
use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use roster_core::workflow::{
    ActionKind, DemotionProposal, DisciplinaryGrade, DisciplinaryProposal,
    PerformanceReportProposal, PromotionProposal, Proposal, RecruitmentProposal, ReportFlag,
    ReportScores, StageAction, TrainingProposal, TrainingType, WorkflowKind, WorkflowRequest,
    WorkflowState,
};
use roster_core::{Roster, Submission};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct Submitter {
    /// Member id of the acting member (`system` for operator overrides)
    #[arg(long = "as", value_name = "MEMBER_ID")]
    actor: String,

    /// Free-text note stored on the stage event
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
pub enum RequestSubcommand {
    /// Propose promoting a member
    Promote {
        member: String,
        /// Target rank
        #[arg(long)]
        to: String,
        #[arg(long)]
        reason: String,
        #[command(flatten)]
        by: Submitter,
    },

    /// Demote a member (officers only)
    Demote {
        member: String,
        /// Target rank
        #[arg(long)]
        to: String,
        #[arg(long)]
        reason: String,
        #[command(flatten)]
        by: Submitter,
    },

    /// File a disciplinary action (grade 1 warning .. 4 demotion)
    Discipline {
        member: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        grade: u8,
        #[arg(long)]
        reason: String,
        /// XP to deduct (grade 3)
        #[arg(long, default_value = "0")]
        xp: u64,
        /// Rank to demote to (grade 4)
        #[arg(long)]
        demote_to: Option<String>,
        #[command(flatten)]
        by: Submitter,
    },

    /// Credit trainees for a training session you ran
    Train {
        /// basic_training, training, event or raid
        #[arg(long = "type", default_value = "training")]
        training_type: TrainingType,
        /// XP per trainee
        #[arg(long)]
        xp: u64,
        #[arg(required = true)]
        trainees: Vec<String>,
        #[command(flatten)]
        by: Submitter,
    },

    /// Propose placing a recruit in a unit
    Recruit {
        recruit: String,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        username: Option<String>,
        /// Rank to place the recruit at (default: lowest rank)
        #[arg(long)]
        rank: Option<String>,
        #[arg(long)]
        position: Option<String>,
        #[command(flatten)]
        by: Submitter,
    },

    /// Draft a performance report
    Report {
        member: String,
        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Last day of the period (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        /// communication,discipline,teamwork,leadership,technical (each 1-5)
        #[arg(long)]
        scores: String,
        #[arg(long, default_value = "")]
        strengths: String,
        #[arg(long, default_value = "")]
        weaknesses: String,
        #[arg(long, default_value = "")]
        remarks: String,
        #[command(flatten)]
        by: Submitter,
    },

    /// Apply a stage action (approve, reject, bump_up, veto, review, ...)
    Act {
        /// Request id or unique id prefix
        id: String,
        action: ActionKind,
        /// Rejection reason
        #[arg(long)]
        reason: Option<String>,
        /// Alternate unit when accepting a rejected recruitment
        #[arg(long)]
        unit: Option<String>,
        /// Report flag for review: red, yellow, blue or green
        #[arg(long)]
        flag: Option<ReportFlag>,
        /// Reviewer remarks
        #[arg(long)]
        remarks: Option<String>,
        /// XP for award_xp
        #[arg(long)]
        amount: Option<u64>,
        /// MEMBER=XP for distribute (repeatable)
        #[arg(long)]
        grant: Vec<String>,
        #[command(flatten)]
        by: Submitter,
    },

    /// Show one request with its stage history
    Show { id: String },

    /// List requests
    List {
        #[arg(long)]
        kind: Option<WorkflowKind>,
        #[arg(long)]
        state: Option<WorkflowState>,
        /// Include automatic rank-change records
        #[arg(long)]
        all: bool,
    },

    /// Open requests the given member can act on
    Pending {
        #[arg(long = "as", value_name = "MEMBER_ID")]
        actor: String,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: RequestSubcommand, json: bool) -> anyhow::Result<()> {
    let roster = super::open(root)?;
    match subcmd {
        RequestSubcommand::Promote {
            member,
            to,
            reason,
            by,
        } => {
            let proposal = Proposal::Promotion(PromotionProposal {
                current_rank: String::new(),
                target_rank: to,
                reason,
            });
            submit(&roster, by, &member, proposal, json)
        }
        RequestSubcommand::Demote {
            member,
            to,
            reason,
            by,
        } => {
            let proposal = Proposal::Demotion(DemotionProposal {
                previous_rank: String::new(),
                target_rank: to,
                reason,
            });
            submit(&roster, by, &member, proposal, json)
        }
        RequestSubcommand::Discipline {
            member,
            grade,
            reason,
            xp,
            demote_to,
            by,
        } => {
            let proposal = Proposal::DisciplinaryAction(DisciplinaryProposal {
                grade: DisciplinaryGrade::from_level(grade)?,
                reason,
                xp_deduction: xp,
                demotion_rank: demote_to,
            });
            submit(&roster, by, &member, proposal, json)
        }
        RequestSubcommand::Train {
            training_type,
            xp,
            trainees,
            by,
        } => {
            let proposal = Proposal::TrainingCredit(TrainingProposal {
                training_type,
                trainees,
                xp_amount: xp,
                final_xp: BTreeMap::new(),
            });
            let instructor = by.actor.clone();
            submit(&roster, by, &instructor, proposal, json)
        }
        RequestSubcommand::Recruit {
            recruit,
            unit,
            username,
            rank,
            position,
            by,
        } => {
            let proposal = Proposal::RecruitmentPlacement(RecruitmentProposal {
                recruit_id: recruit.clone(),
                recruit_username: username,
                recruit_rank: rank.unwrap_or_default(),
                target_unit: unit,
                position,
                alternate_unit: None,
                final_unit: None,
            });
            submit(&roster, by, &recruit, proposal, json)
        }
        RequestSubcommand::Report {
            member,
            from,
            to,
            scores,
            strengths,
            weaknesses,
            remarks,
            by,
        } => {
            let proposal = Proposal::PerformanceReport(PerformanceReportProposal {
                period_start: from,
                period_end: to,
                scores: parse_scores(&scores)?,
                calculated_score: 0.0,
                strengths,
                weaknesses,
                remarks,
                flag: None,
                senior_remarks: None,
                xp_awards: Vec::new(),
            });
            submit(&roster, by, &member, proposal, json)
        }
        RequestSubcommand::Act {
            id,
            action,
            reason,
            unit,
            flag,
            remarks,
            amount,
            grant,
            by,
        } => {
            let action = match action {
                ActionKind::Create => bail!("requests are opened with their own subcommands"),
                ActionKind::Submit => StageAction::Submit,
                ActionKind::Approve => StageAction::Approve,
                ActionKind::Reject => StageAction::Reject {
                    reason: reason.unwrap_or_default(),
                },
                ActionKind::BumpUp => StageAction::BumpUp,
                ActionKind::BumpBack => StageAction::BumpBack,
                ActionKind::Veto => StageAction::Veto,
                ActionKind::AcceptRejection => StageAction::AcceptRejection {
                    alternate_unit: unit.unwrap_or_default(),
                },
                ActionKind::FinalReject => StageAction::FinalReject,
                ActionKind::Review => StageAction::Review {
                    flag: flag.context("review needs --flag")?,
                    remarks: remarks.unwrap_or_default(),
                },
                ActionKind::Finalize => StageAction::Finalize,
                ActionKind::Hold => StageAction::Hold,
                ActionKind::Release => StageAction::Release,
                ActionKind::AwardXp => StageAction::AwardXp {
                    amount: amount.context("award_xp needs --amount")?,
                },
                ActionKind::Distribute => StageAction::Distribute {
                    assignments: parse_grants(&grant)?,
                },
            };
            let done = roster
                .act(&by.actor, &id, action, by.notes)
                .with_context(|| format!("failed to act on request '{id}'"))?;
            print_submission(&done, json)
        }
        RequestSubcommand::Show { id } => show(&roster, &id, json),
        RequestSubcommand::List { kind, state, all } => list(&roster, kind, state, all, json),
        RequestSubcommand::Pending { actor } => pending(&roster, &actor, json),
    }
}

fn submit(
    roster: &Roster,
    by: Submitter,
    subject: &str,
    proposal: Proposal,
    json: bool,
) -> anyhow::Result<()> {
    let kind = proposal.kind();
    let done = roster
        .submit(&by.actor, subject, proposal, by.notes)
        .with_context(|| format!("failed to open {kind} request for '{subject}'"))?;
    print_submission(&done, json)
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

fn parse_scores(raw: &str) -> anyhow::Result<ReportScores> {
    let values = raw
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<u8>()
                .with_context(|| format!("score '{s}' is not a number"))
        })
        .collect::<anyhow::Result<Vec<u8>>>()?;
    let &[communication, discipline, teamwork, leadership_potential, technical_skill] =
        values.as_slice()
    else {
        bail!("--scores needs exactly five comma-separated values, got {}", values.len());
    };
    Ok(ReportScores {
        communication,
        discipline,
        teamwork,
        leadership_potential,
        technical_skill,
    })
}

fn parse_grants(raw: &[String]) -> anyhow::Result<BTreeMap<String, u64>> {
    raw.iter()
        .map(|g| {
            let (member, xp) = g
                .split_once('=')
                .with_context(|| format!("grant '{g}' must look like MEMBER=XP"))?;
            let xp = xp
                .parse::<u64>()
                .with_context(|| format!("grant '{g}' has a non-numeric amount"))?;
            Ok((member.to_string(), xp))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn describe(proposal: &Proposal) -> String {
    match proposal {
        Proposal::Promotion(p) => format!("{} -> {}: {}", p.current_rank, p.target_rank, p.reason),
        Proposal::Demotion(p) => format!("{} -> {}: {}", p.previous_rank, p.target_rank, p.reason),
        Proposal::DisciplinaryAction(p) => {
            let mut s = format!("grade {} ({})", p.grade.level(), p.grade.label());
            if p.xp_deduction > 0 {
                s.push_str(&format!(", -{} XP", p.xp_deduction));
            }
            if let Some(rank) = &p.demotion_rank {
                s.push_str(&format!(", demote to {rank}"));
            }
            format!("{s}: {}", p.reason)
        }
        Proposal::TrainingCredit(p) => format!(
            "{}, {} XP each to {}",
            p.training_type,
            p.xp_amount,
            p.trainees.join(", ")
        ),
        Proposal::RecruitmentPlacement(p) => {
            let unit = p.final_unit.as_deref().unwrap_or(&p.target_unit);
            format!("{} at {} to {unit}", p.recruit_id, p.recruit_rank)
        }
        Proposal::PerformanceReport(p) => {
            let mut s = format!(
                "{} to {}, score {:.1}",
                p.period_start, p.period_end, p.calculated_score
            );
            if let Some(flag) = p.flag {
                s.push_str(&format!(", flag {flag}"));
            }
            if !p.xp_awards.is_empty() {
                s.push_str(&format!(", {} XP awarded", p.total_awarded()));
            }
            s
        }
    }
}

fn print_submission(done: &Submission, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(done);
    }
    let r = &done.request;
    println!(
        "{} {} for {}: {}",
        r.kind,
        r.short_id(),
        r.subject,
        r.state
    );
    println!("  {}", describe(&r.proposal));
    if let Some(reason) = r.rejection_reason() {
        println!("  rejected: {reason}");
    }
    for effect in &done.effects {
        println!("  applied: {}", serde_json::to_string(effect)?);
    }
    if !done.deferred.is_empty() {
        println!(
            "  not yet applied at the source (retried on next sync): {}",
            done.deferred.join(", ")
        );
    }
    if !done.skipped.is_empty() {
        println!("  skipped, no member record: {}", done.skipped.join(", "));
    }
    Ok(())
}

fn show(roster: &Roster, id: &str, json: bool) -> anyhow::Result<()> {
    let r = roster
        .request(id)
        .with_context(|| format!("request '{id}' not found"))?;
    if json {
        return print_json(&r);
    }

    println!("Request:  {} ({})", r.id, r.kind);
    println!("Subject:  {}", r.subject);
    println!("Opened:   {} by {}", r.created_at.format("%Y-%m-%d %H:%M"), r.created_by);
    println!("State:    {}", r.state);
    if let Some(prev) = r.previous_state {
        println!("Held in:  {prev}");
    }
    println!("Proposal: {}", describe(&r.proposal));
    println!();
    print_history(&r);
    Ok(())
}

fn print_history(r: &WorkflowRequest) {
    let rows = r
        .history
        .iter()
        .map(|e| {
            vec![
                e.at.format("%Y-%m-%d %H:%M").to_string(),
                e.actor.clone(),
                e.action.to_string(),
                e.from.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                e.to.to_string(),
                e.notes.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["AT", "ACTOR", "ACTION", "FROM", "TO", "NOTES"], rows, "No history.");
}

fn list(
    roster: &Roster,
    kind: Option<WorkflowKind>,
    state: Option<WorkflowState>,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let requests: Vec<WorkflowRequest> = roster
        .requests(kind, state)
        .context("failed to list requests")?
        .into_iter()
        .filter(|r| all || !r.automatic)
        .collect();

    if json {
        return print_json(&requests);
    }
    let rows = requests
        .iter()
        .map(|r| {
            vec![
                r.short_id(),
                r.kind.to_string(),
                r.subject.clone(),
                r.state.to_string(),
                r.created_by.clone(),
                r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "KIND", "SUBJECT", "STATE", "BY", "UPDATED"],
        rows,
        "No requests.",
    );
    Ok(())
}

fn pending(roster: &Roster, actor: &str, json: bool) -> anyhow::Result<()> {
    let items = roster
        .pending_for(actor)
        .with_context(|| format!("failed to list pending requests for '{actor}'"))?;

    if json {
        let value: Vec<serde_json::Value> = items
            .iter()
            .map(|(r, actions)| serde_json::json!({ "request": r, "actions": actions }))
            .collect();
        return print_json(&value);
    }
    let rows = items
        .iter()
        .map(|(r, actions)| {
            let names: Vec<&str> = actions.iter().map(|a| a.as_str()).collect();
            vec![
                r.short_id(),
                r.kind.to_string(),
                r.subject.clone(),
                r.state.to_string(),
                list_or_none(&names),
            ]
        })
        .collect();
    print_table(
        &["ID", "KIND", "SUBJECT", "STATE", "ACTIONS"],
        rows,
        "Nothing waiting on you.",
    );
    Ok(())
}
