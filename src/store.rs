// src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::debug;

use crate::schedule::{Schedule, ScheduleStatus};
use crate::wchr::{WchrFlight, WchrReport};

// --- Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {id} not found in {collection}")]
    DocumentNotFound { collection: &'static str, id: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}

// --- Clock ---

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests.
#[derive(Clone)]
pub struct ManualClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(datetime_str: &str) -> Self {
        let dt = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Failed to parse datetime string in ManualClock::new");
        Self {
            current_time: Arc::new(Mutex::new(dt.and_utc())),
        }
    }

    pub fn set_time(&self, datetime_str: &str) {
        *self.current_time.lock().unwrap() =
            NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
                .expect("Failed to parse datetime string in ManualClock::set_time")
                .and_utc();
    }

    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock().unwrap() += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.lock().unwrap()
    }
}

// --- Document ids ---

/// Random alphanumeric document id for the in-memory stores.
pub fn new_document_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

// --- Employee directory ---

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub department: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn list_active_employees(&self) -> Result<Vec<Employee>, StoreError>;
    async fn find_employee(&self, id: &str) -> Result<Option<Employee>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    employees: Arc<Mutex<HashMap<String, Employee>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, employee: Employee) {
        self.employees
            .lock()
            .unwrap()
            .insert(employee.id.clone(), employee);
    }

    pub fn len(&self) -> usize {
        self.employees.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryDirectory {
    async fn list_active_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let mut employees: Vec<Employee> = self
            .employees
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.active)
            .cloned()
            .collect();
        employees.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(employees)
    }

    async fn find_employee(&self, id: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.employees.lock().unwrap().get(id).cloned())
    }
}

// --- Schedule store ---

#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub created_by: Option<String>,
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StoreError>;
    /// Whole-document write; the underlying store's single-document
    /// atomicity is all the lifecycle relies on.
    async fn update_schedule(&self, schedule: Schedule) -> Result<(), StoreError>;
    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, StoreError>;
    /// Results are ordered by creation time descending.
    async fn list_schedules(&self, filter: ScheduleFilter) -> Result<Vec<Schedule>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryScheduleStore {
    schedules: Arc<Mutex<HashMap<String, Schedule>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
        debug!("Storing schedule {}", schedule.id);
        self.schedules
            .lock()
            .unwrap()
            .insert(schedule.id.clone(), schedule);
        Ok(())
    }

    async fn update_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
        let mut guard = self.schedules.lock().unwrap();
        if !guard.contains_key(&schedule.id) {
            return Err(StoreError::DocumentNotFound {
                collection: "schedules",
                id: schedule.id.clone(),
            });
        }
        guard.insert(schedule.id.clone(), schedule);
        Ok(())
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.lock().unwrap().get(id).cloned())
    }

    async fn list_schedules(&self, filter: ScheduleFilter) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules: Vec<Schedule> = self
            .schedules
            .lock()
            .unwrap()
            .values()
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .filter(|s| {
                filter
                    .created_by
                    .as_deref()
                    .map_or(true, |creator| s.created_by == creator)
            })
            .cloned()
            .collect();
        schedules.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(schedules)
    }
}

// --- Airline budgets ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirlineBudget {
    pub airline: String,
    pub department: String,
    pub budget_hours: Decimal,
}

#[async_trait]
pub trait BudgetStore: Send + Sync {
    async fn get_budget(
        &self,
        airline: &str,
        department: &str,
    ) -> Result<Option<Decimal>, StoreError>;
    async fn set_budget(&self, budget: AirlineBudget) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryBudgetStore {
    budgets: Arc<Mutex<HashMap<(String, String), Decimal>>>,
}

impl InMemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetStore for InMemoryBudgetStore {
    async fn get_budget(
        &self,
        airline: &str,
        department: &str,
    ) -> Result<Option<Decimal>, StoreError> {
        Ok(self
            .budgets
            .lock()
            .unwrap()
            .get(&(airline.to_string(), department.to_string()))
            .copied())
    }

    async fn set_budget(&self, budget: AirlineBudget) -> Result<(), StoreError> {
        self.budgets.lock().unwrap().insert(
            (budget.airline.clone(), budget.department.clone()),
            budget.budget_hours,
        );
        Ok(())
    }
}

// --- WCHR flights ---

#[async_trait]
pub trait FlightStore: Send + Sync {
    async fn get_flight(&self, flight_key: &str) -> Result<Option<WchrFlight>, StoreError>;
    /// Document-per-flight-key upsert; last writer wins.
    async fn upsert_flight(&self, flight: WchrFlight) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryFlightStore {
    flights: Arc<Mutex<HashMap<String, WchrFlight>>>,
}

impl InMemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlightStore for InMemoryFlightStore {
    async fn get_flight(&self, flight_key: &str) -> Result<Option<WchrFlight>, StoreError> {
        Ok(self.flights.lock().unwrap().get(flight_key).cloned())
    }

    async fn upsert_flight(&self, flight: WchrFlight) -> Result<(), StoreError> {
        self.flights
            .lock()
            .unwrap()
            .insert(flight.flight_key.clone(), flight);
        Ok(())
    }
}

// --- WCHR reports ---

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Creates the report and returns the new document id.
    async fn create_report(&self, report: WchrReport) -> Result<String, StoreError>;
    /// Second phase of report creation: patches the display id onto an
    /// already-durable document.
    async fn set_report_id(
        &self,
        document_id: &str,
        report_id: &str,
    ) -> Result<WchrReport, StoreError>;
    async fn get_report(&self, document_id: &str) -> Result<Option<WchrReport>, StoreError>;
    async fn list_reports_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WchrReport>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryReportStore {
    reports: Arc<Mutex<HashMap<String, WchrReport>>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn create_report(&self, mut report: WchrReport) -> Result<String, StoreError> {
        let document_id = new_document_id();
        report.document_id = document_id.clone();
        self.reports
            .lock()
            .unwrap()
            .insert(document_id.clone(), report);
        Ok(document_id)
    }

    async fn set_report_id(
        &self,
        document_id: &str,
        report_id: &str,
    ) -> Result<WchrReport, StoreError> {
        let mut guard = self.reports.lock().unwrap();
        let report = guard
            .get_mut(document_id)
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: "wch_reports",
                id: document_id.to_string(),
            })?;
        report.report_id = Some(report_id.to_string());
        Ok(report.clone())
    }

    async fn get_report(&self, document_id: &str) -> Result<Option<WchrReport>, StoreError> {
        Ok(self.reports.lock().unwrap().get(document_id).cloned())
    }

    async fn list_reports_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WchrReport>, StoreError> {
        let mut reports: Vec<WchrReport> = self
            .reports
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.submitted_at >= from && r.submitted_at < to)
            .cloned()
            .collect();
        reports.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(reports)
    }
}
