// src/hours.rs
use chrono::{NaiveTime, Timelike};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::roster::{EmployeeId, ShiftGrid, ShiftSlot, DAY_OFF};

const MINUTES_PER_DAY: i64 = 24 * 60;

// --- Time-of-day parsing ---

/// Parses a grid cell into a time of day. Accepts `HH:MM` and the
/// compact `HHMM` ramp shorthand. Empty cells, the OFF sentinel, and
/// anything else unparsable yield `None` — never an error, the cell
/// simply contributes no hours.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(DAY_OFF) {
        return None;
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H%M"))
        .ok()
}

fn minutes_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Wall-clock hours one slot contributes. An end before the start
/// crosses midnight (+24h) — ramp operations run through the night.
pub fn slot_hours(slot: &ShiftSlot) -> Decimal {
    let Some(start) = parse_time_of_day(&slot.start) else {
        return Decimal::ZERO;
    };
    let Some(end) = parse_time_of_day(&slot.end) else {
        return Decimal::ZERO;
    };

    let mut span = minutes_of_day(end) - minutes_of_day(start);
    if span < 0 {
        span += MINUTES_PER_DAY;
    }
    Decimal::from(span) / dec!(60)
}

// --- Weekly aggregation ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyHours {
    /// Weekly total per employee, over all 14 slot instances of the row.
    pub totals: HashMap<EmployeeId, Decimal>,
    /// Sum of all totals; a grid is always single-airline/department.
    pub airline_weekly_hours: Decimal,
}

/// Pure aggregation of a grid into weekly hour totals. Rows without an
/// assigned employee contribute nothing.
pub fn aggregate(grid: &ShiftGrid) -> WeeklyHours {
    let mut totals: HashMap<EmployeeId, Decimal> = HashMap::new();
    let mut airline_weekly_hours = Decimal::ZERO;

    for row in &grid.rows {
        if row.employee_id.is_empty() {
            continue;
        }
        let mut week_total = Decimal::ZERO;
        for day in &row.days {
            for slot in &day.slots {
                week_total += slot_hours(slot);
            }
        }
        *totals.entry(row.employee_id.clone()).or_insert(Decimal::ZERO) += week_total;
        airline_weekly_hours += week_total;
    }

    WeeklyHours {
        totals,
        airline_weekly_hours,
    }
}

// --- Budget comparison ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum BudgetVerdict {
    Within { remaining: Decimal },
    Over { excess: Decimal },
}

/// Boundary inclusive: hours equal to the budget are within budget.
pub fn compare_to_budget(hours: Decimal, budget_hours: Decimal) -> BudgetVerdict {
    if hours > budget_hours {
        BudgetVerdict::Over {
            excess: hours - budget_hours,
        }
    } else {
        BudgetVerdict::Within {
            remaining: budget_hours - hours,
        }
    }
}
