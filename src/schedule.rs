// src/schedule.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

use crate::hours::{aggregate, compare_to_budget, BudgetVerdict};
use crate::roster::{EmployeeId, ShiftGrid, DAYS_PER_WEEK};
use crate::store::{BudgetStore, Clock, EmployeeDirectory, ScheduleFilter, ScheduleStore, StoreError};

pub type ScheduleId = String;

// --- Roles and actors ---

/// Closed set of roles the session collaborator can hand us. Role
/// gating goes through the capability predicates below, never through
/// scattered string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    StationManager,
    DutyManager,
    Supervisor,
    Agent,
}

impl Role {
    /// Unknown role strings map to the read-only Agent role, so an
    /// unrecognized role can never pass a capability gate.
    pub fn parse(raw: &str) -> Role {
        match raw.trim() {
            "station_manager" => Role::StationManager,
            "duty_manager" => Role::DutyManager,
            "supervisor" => Role::Supervisor,
            _ => Role::Agent,
        }
    }

    pub fn can_submit_schedule(self) -> bool {
        matches!(self, Role::StationManager | Role::DutyManager)
    }

    pub fn can_review_schedule(self) -> bool {
        matches!(self, Role::StationManager)
    }

    pub fn can_close_flight(self) -> bool {
        matches!(
            self,
            Role::StationManager | Role::DutyManager | Role::Supervisor
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::StationManager => "station_manager",
            Role::DutyManager => "duty_manager",
            Role::Supervisor => "supervisor",
            Role::Agent => "agent",
        };
        f.write_str(name)
    }
}

/// Current actor, threaded explicitly into every lifecycle and registry
/// call. No ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub username: String,
    pub role: Role,
}

// --- Schedule documents ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleStatus::Draft => "draft",
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Approved => "approved",
            ScheduleStatus::Rejected => "rejected",
            ScheduleStatus::Returned => "returned",
        };
        f.write_str(name)
    }
}

/// The submittable/approvable unit: one submission cycle of a weekly
/// grid. Grid, totals, and budget are snapshots taken at submission
/// time; later budget edits never change an existing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub airline: String,
    pub department: String,
    /// Calendar day-of-month labels for Mon..Sun, display only.
    pub day_numbers: [String; DAYS_PER_WEEK],
    pub grid: ShiftGrid,
    pub totals: HashMap<EmployeeId, Decimal>,
    pub airline_weekly_hours: Decimal,
    /// Budget snapshot at submission; None when no budget is configured
    /// for the airline/department.
    pub budget_hours: Option<Decimal>,
    pub status: ScheduleStatus,
    pub created_by: String,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub review_notes: Option<String>,
    pub handled_at: Option<DateTime<Utc>>,
    /// Audit links between a returned cycle and its resubmission.
    pub resubmitted_from: Option<ScheduleId>,
    pub resubmitted_as: Option<ScheduleId>,
}

impl Schedule {
    pub fn budget_verdict(&self) -> Option<BudgetVerdict> {
        self.budget_hours
            .map(|budget| compare_to_budget(self.airline_weekly_hours, budget))
    }

    /// Creators always see their own documents. Station managers see
    /// everything except other people's drafts; everyone else sees
    /// approved schedules only.
    pub fn visible_to(&self, actor: &Actor) -> bool {
        if self.created_by == actor.id {
            return true;
        }
        match actor.role {
            Role::StationManager => self.status != ScheduleStatus::Draft,
            _ => self.status == ScheduleStatus::Approved,
        }
    }
}

/// Input to a submission or draft save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub airline: String,
    pub department: String,
    #[serde(default)]
    pub day_numbers: [String; DAYS_PER_WEEK],
    pub grid: ShiftGrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Return { notes: String },
}

impl ReviewAction {
    fn label(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Return { .. } => "return",
        }
    }
}

/// Listing request from the caller; visibility scoping on top of it is
/// the service's job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleQuery {
    pub status: Option<ScheduleStatus>,
    #[serde(default)]
    pub mine: bool,
}

// --- Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("shift grid has no rows")]
    EmptyGrid,
    #[error("row {row} has no employee assigned")]
    UnassignedRow { row: usize },
    #[error("employee {employee_id} appears more than once in the grid")]
    DuplicateEmployee { employee_id: String },
    #[error("employee {employee_id} not found in the directory")]
    UnknownEmployee { employee_id: String },
    #[error("employee {employee_id} is inactive and cannot be scheduled")]
    InactiveEmployee { employee_id: String },
    #[error("role {role} is not authorized to {action}")]
    NotAuthorized { role: Role, action: &'static str },
    #[error("schedule {schedule_id} not found")]
    NotFound { schedule_id: String },
    #[error("cannot {action} a schedule in status {status}")]
    InvalidTransition {
        status: ScheduleStatus,
        action: &'static str,
    },
    #[error("returning a schedule requires review notes")]
    MissingReviewNotes,
    #[error("only the original creator may resubmit a returned schedule")]
    NotCreator,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// --- Lifecycle service ---

pub struct ScheduleService {
    directory: Arc<dyn EmployeeDirectory>,
    schedules: Arc<dyn ScheduleStore>,
    budgets: Arc<dyn BudgetStore>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(
        directory: Arc<dyn EmployeeDirectory>,
        schedules: Arc<dyn ScheduleStore>,
        budgets: Arc<dyn BudgetStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            schedules,
            budgets,
            clock,
        }
    }

    /// Submits a new schedule cycle: validates the draft, snapshots
    /// grid/totals/budget, and stores it as pending.
    pub async fn submit(
        &self,
        actor: &Actor,
        draft: ScheduleDraft,
    ) -> Result<Schedule, ScheduleError> {
        if !actor.role.can_submit_schedule() {
            warn!(
                "{} ({}) attempted to submit a schedule",
                actor.username, actor.role
            );
            return Err(ScheduleError::NotAuthorized {
                role: actor.role,
                action: "submit a schedule",
            });
        }
        self.create_cycle(actor, draft, ScheduleStatus::Pending, None)
            .await
    }

    /// Same snapshot as a submission, but stored as a draft with no
    /// reviewer visibility.
    pub async fn save_draft(
        &self,
        actor: &Actor,
        draft: ScheduleDraft,
    ) -> Result<Schedule, ScheduleError> {
        if !actor.role.can_submit_schedule() {
            warn!(
                "{} ({}) attempted to save a schedule draft",
                actor.username, actor.role
            );
            return Err(ScheduleError::NotAuthorized {
                role: actor.role,
                action: "save a schedule draft",
            });
        }
        self.create_cycle(actor, draft, ScheduleStatus::Draft, None)
            .await
    }

    async fn create_cycle(
        &self,
        actor: &Actor,
        draft: ScheduleDraft,
        status: ScheduleStatus,
        resubmitted_from: Option<ScheduleId>,
    ) -> Result<Schedule, ScheduleError> {
        if draft.airline.trim().is_empty() {
            return Err(ScheduleError::MissingField { field: "airline" });
        }
        if draft.department.trim().is_empty() {
            return Err(ScheduleError::MissingField {
                field: "department",
            });
        }
        self.validate_grid(&draft.grid).await?;

        let hours = aggregate(&draft.grid);
        let budget_hours = self
            .budgets
            .get_budget(&draft.airline, &draft.department)
            .await?;

        let schedule = Schedule {
            id: crate::store::new_document_id(),
            airline: draft.airline,
            department: draft.department,
            day_numbers: draft.day_numbers,
            grid: draft.grid,
            totals: hours.totals,
            airline_weekly_hours: hours.airline_weekly_hours,
            budget_hours,
            status,
            created_by: actor.id.clone(),
            created_by_name: actor.username.clone(),
            created_at: self.clock.now(),
            reviewed_by: None,
            review_notes: None,
            handled_at: None,
            resubmitted_from,
            resubmitted_as: None,
        };
        self.schedules.create_schedule(schedule.clone()).await?;
        info!(
            "Schedule {} created as {} for {}/{} by {} ({}h against budget {:?})",
            schedule.id,
            schedule.status,
            schedule.airline,
            schedule.department,
            actor.username,
            schedule.airline_weekly_hours,
            schedule.budget_hours,
        );
        if let Some(BudgetVerdict::Over { excess }) = schedule.budget_verdict() {
            warn!(
                "Schedule {} is {}h over the weekly budget for {}/{}",
                schedule.id, excess, schedule.airline, schedule.department
            );
        }
        Ok(schedule)
    }

    /// A submitted grid must have every row assigned to a distinct,
    /// active employee.
    async fn validate_grid(&self, grid: &ShiftGrid) -> Result<(), ScheduleError> {
        if grid.rows.is_empty() {
            return Err(ScheduleError::EmptyGrid);
        }
        let mut seen: Vec<&str> = Vec::with_capacity(grid.rows.len());
        for (row_index, row) in grid.rows.iter().enumerate() {
            if row.employee_id.is_empty() {
                return Err(ScheduleError::UnassignedRow { row: row_index });
            }
            if seen.contains(&row.employee_id.as_str()) {
                return Err(ScheduleError::DuplicateEmployee {
                    employee_id: row.employee_id.clone(),
                });
            }
            seen.push(&row.employee_id);

            let employee = self
                .directory
                .find_employee(&row.employee_id)
                .await?
                .ok_or_else(|| ScheduleError::UnknownEmployee {
                    employee_id: row.employee_id.clone(),
                })?;
            if !employee.active {
                return Err(ScheduleError::InactiveEmployee {
                    employee_id: row.employee_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Station-manager decision on a pending schedule. Permission and
    /// state guards run before anything is written, so a failed attempt
    /// leaves the document untouched.
    pub async fn review(
        &self,
        actor: &Actor,
        schedule_id: &str,
        action: ReviewAction,
    ) -> Result<Schedule, ScheduleError> {
        if !actor.role.can_review_schedule() {
            warn!(
                "{} ({}) attempted to {} schedule {}",
                actor.username,
                actor.role,
                action.label(),
                schedule_id
            );
            return Err(ScheduleError::NotAuthorized {
                role: actor.role,
                action: "review a schedule",
            });
        }

        let mut schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound {
                schedule_id: schedule_id.to_string(),
            })?;
        if schedule.status != ScheduleStatus::Pending {
            return Err(ScheduleError::InvalidTransition {
                status: schedule.status,
                action: action.label(),
            });
        }

        let (next_status, notes) = match action {
            ReviewAction::Approve => (ScheduleStatus::Approved, None),
            ReviewAction::Reject => (ScheduleStatus::Rejected, None),
            ReviewAction::Return { notes } => {
                if notes.trim().is_empty() {
                    return Err(ScheduleError::MissingReviewNotes);
                }
                (ScheduleStatus::Returned, Some(notes))
            }
        };

        schedule.status = next_status;
        schedule.reviewed_by = Some(actor.username.clone());
        schedule.review_notes = notes;
        schedule.handled_at = Some(self.clock.now());
        self.schedules.update_schedule(schedule.clone()).await?;
        info!(
            "Schedule {} {} by {}",
            schedule.id, schedule.status, actor.username
        );
        Ok(schedule)
    }

    /// Creates a new pending cycle seeded from a returned schedule. The
    /// returned document stays in its state permanently; only the audit
    /// pointer to the new cycle is written onto it.
    pub async fn resubmit(
        &self,
        actor: &Actor,
        returned_id: &str,
        edited_grid: Option<ShiftGrid>,
    ) -> Result<Schedule, ScheduleError> {
        if !actor.role.can_submit_schedule() {
            return Err(ScheduleError::NotAuthorized {
                role: actor.role,
                action: "resubmit a schedule",
            });
        }

        let mut original = self
            .schedules
            .get_schedule(returned_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound {
                schedule_id: returned_id.to_string(),
            })?;
        if original.status != ScheduleStatus::Returned {
            return Err(ScheduleError::InvalidTransition {
                status: original.status,
                action: "resubmit",
            });
        }
        if original.created_by != actor.id {
            warn!(
                "{} attempted to resubmit schedule {} created by {}",
                actor.username, original.id, original.created_by_name
            );
            return Err(ScheduleError::NotCreator);
        }

        let draft = ScheduleDraft {
            airline: original.airline.clone(),
            department: original.department.clone(),
            day_numbers: original.day_numbers.clone(),
            grid: edited_grid.unwrap_or_else(|| original.grid.clone()),
        };
        let fresh = self
            .create_cycle(actor, draft, ScheduleStatus::Pending, Some(original.id.clone()))
            .await?;

        original.resubmitted_as = Some(fresh.id.clone());
        self.schedules.update_schedule(original).await?;
        Ok(fresh)
    }

    pub async fn get_for(&self, actor: &Actor, schedule_id: &str) -> Result<Schedule, ScheduleError> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound {
                schedule_id: schedule_id.to_string(),
            })?;
        // Invisible documents read as absent rather than forbidden.
        if !schedule.visible_to(actor) {
            return Err(ScheduleError::NotFound {
                schedule_id: schedule_id.to_string(),
            });
        }
        Ok(schedule)
    }

    /// Role-scoped listing, creation time descending.
    pub async fn list_for(
        &self,
        actor: &Actor,
        query: ScheduleQuery,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let filter = ScheduleFilter {
            status: query.status,
            created_by: if query.mine {
                Some(actor.id.clone())
            } else {
                None
            },
        };
        let schedules = self.schedules.list_schedules(filter).await?;
        Ok(schedules
            .into_iter()
            .filter(|s| s.visible_to(actor))
            .collect())
    }
}
