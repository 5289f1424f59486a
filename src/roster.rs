// src/roster.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// --- Constants ---

pub const SLOTS_PER_DAY: usize = 2;
pub const DAYS_PER_WEEK: usize = 7;

/// Sentinel stored in a slot's `start` field to mark a full day off.
pub const DAY_OFF: &str = "OFF";

pub type EmployeeId = String;

// --- Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("row index {row} is out of range (grid has {rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },
    #[error("slot index {slot} is out of range (max {max})")]
    SlotOutOfRange { slot: usize, max: usize },
}

// --- Grid model ---

/// Weekday column of the grid, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridDay {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl GridDay {
    pub const ALL: [GridDay; DAYS_PER_WEEK] = [
        GridDay::Mon,
        GridDay::Tue,
        GridDay::Wed,
        GridDay::Thu,
        GridDay::Fri,
        GridDay::Sat,
        GridDay::Sun,
    ];

    pub fn index(self) -> usize {
        match self {
            GridDay::Mon => 0,
            GridDay::Tue => 1,
            GridDay::Wed => 2,
            GridDay::Thu => 3,
            GridDay::Fri => 4,
            GridDay::Sat => 5,
            GridDay::Sun => 6,
        }
    }
}

/// Which field of a slot a cell edit targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotField {
    Start,
    End,
}

/// One contiguous work interval within a day. Free text is accepted at
/// entry time; aggregation treats anything unparsable as non-working.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSlot {
    pub start: String,
    pub end: String,
}

impl ShiftSlot {
    pub fn is_day_off(&self) -> bool {
        self.start == DAY_OFF
    }

    pub fn is_blank(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }

    pub fn clear(&mut self) {
        self.start.clear();
        self.end.clear();
    }
}

/// Up to a split shift for one employee on one calendar day. An empty
/// second slot means a single shift or a day off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAssignment {
    pub slots: [ShiftSlot; SLOTS_PER_DAY],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRow {
    /// Empty while the row is an unselected blank in the editor. A
    /// submitted grid must have every row assigned.
    pub employee_id: EmployeeId,
    pub days: [DayAssignment; DAYS_PER_WEEK],
}

/// One week's shift assignments for a set of employees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftGrid {
    pub rows: Vec<ShiftRow>,
}

impl Default for ShiftGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl ShiftGrid {
    /// A fresh grid starts with a single blank row.
    pub fn new() -> Self {
        Self {
            rows: vec![ShiftRow::default()],
        }
    }

    /// Appends a blank row. Rows are never removed once present.
    pub fn add_row(&mut self) -> &mut ShiftRow {
        self.rows.push(ShiftRow::default());
        self.rows.last_mut().unwrap()
    }

    pub fn set_employee(&mut self, row: usize, employee_id: &str) -> Result<(), GridError> {
        let rows = self.rows.len();
        let row_ref = self
            .rows
            .get_mut(row)
            .ok_or(GridError::RowOutOfRange { row, rows })?;
        row_ref.employee_id = employee_id.trim().to_string();
        Ok(())
    }

    /// Applies one cell edit and returns the day's resulting assignment.
    ///
    /// The raw value is trimmed and upper-cased before storage so time
    /// codes and the OFF sentinel compare case-insensitively. Writing
    /// OFF into a `start` field marks the whole day off: slot 0 becomes
    /// `{OFF, ""}` and slot 1 is cleared, regardless of which slot was
    /// being edited. An OFF day cannot carry a second shift.
    pub fn set_slot(
        &mut self,
        row: usize,
        day: GridDay,
        slot: usize,
        field: SlotField,
        raw_value: &str,
    ) -> Result<&DayAssignment, GridError> {
        let rows = self.rows.len();
        let row_ref = self
            .rows
            .get_mut(row)
            .ok_or(GridError::RowOutOfRange { row, rows })?;
        if slot >= SLOTS_PER_DAY {
            return Err(GridError::SlotOutOfRange {
                slot,
                max: SLOTS_PER_DAY - 1,
            });
        }

        let value = raw_value.trim().to_uppercase();
        let assignment = &mut row_ref.days[day.index()];

        if field == SlotField::Start && value == DAY_OFF {
            assignment.slots[0] = ShiftSlot {
                start: DAY_OFF.to_string(),
                end: String::new(),
            };
            assignment.slots[1].clear();
            debug!("Row {} {:?} marked as day off", row, day);
        } else {
            match field {
                SlotField::Start => assignment.slots[slot].start = value,
                SlotField::End => assignment.slots[slot].end = value,
            }
        }

        Ok(&row_ref.days[day.index()])
    }

    /// Employee ids assigned so far, in row order, blanks skipped.
    pub fn assigned_employee_ids(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| !r.employee_id.is_empty())
            .map(|r| r.employee_id.as_str())
            .collect()
    }
}
