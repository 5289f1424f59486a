// src/wchr.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::schedule::{Actor, Role};
use crate::store::{Clock, FlightStore, ReportStore, StoreError};

// --- Flight identity ---

const UNKNOWN_TOKEN: &str = "UNK";
const UNKNOWN_DATE_TOKEN: &str = "unknown-date";

/// Deterministic flight identity: `{airline}-{flightNumber}-{isoDate}`.
/// The flight number is trimmed and stripped of internal whitespace;
/// the date contributes its calendar day only. Missing inputs fall back
/// to fixed tokens so a key is always producible.
pub fn flight_key(airline: &str, flight_number: &str, flight_date: Option<NaiveDate>) -> String {
    let airline = airline.trim();
    let airline = if airline.is_empty() {
        UNKNOWN_TOKEN
    } else {
        airline
    };

    let number: String = flight_number.split_whitespace().collect();
    let number = if number.is_empty() {
        UNKNOWN_TOKEN.to_string()
    } else {
        number
    };

    let date = match flight_date {
        Some(day) => day.format("%Y-%m-%d").to_string(),
        None => UNKNOWN_DATE_TOKEN.to_string(),
    };

    format!("{}-{}-{}", airline, number, date)
}

/// Human-readable report id: `WCHR-{YYYYMMDD}-{last 6 chars of the
/// document id, uppercased}`. Display only; uniqueness comes from the
/// underlying document id.
pub fn report_id(document_id: &str, submission_date: NaiveDate) -> String {
    let chars = document_id.chars().count();
    let tail: String = document_id
        .chars()
        .skip(chars.saturating_sub(6))
        .collect();
    format!(
        "WCHR-{}-{}",
        submission_date.format("%Y%m%d"),
        tail.to_uppercase()
    )
}

// --- Documents ---

/// Document-per-flight-key closure record. Absence of a record means
/// the flight is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WchrFlight {
    pub flight_key: String,
    pub airline: String,
    pub flight_number: String,
    pub flight_date: Option<NaiveDate>,
    pub origin: String,
    pub destination: String,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
}

/// Mobility-assistance level of the passenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WchType {
    Wchr,
    Wchs,
    Wchc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportStatus {
    New,
    Late,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportStatus::New => "NEW",
            ReportStatus::Late => "LATE",
        })
    }
}

/// One passenger wheelchair-assistance report. The status is fixed
/// permanently at creation; later flight closures never revise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WchrReport {
    pub document_id: String,
    /// Display id, patched in after the document is durably created.
    pub report_id: Option<String>,
    pub employee_id: String,
    pub submitted_at: DateTime<Utc>,
    pub passenger_name: String,
    pub airline: String,
    pub flight_number: String,
    pub flight_date: Option<NaiveDate>,
    pub origin: String,
    pub destination: String,
    pub seat: String,
    pub gate: String,
    pub pnr: String,
    pub wch_type: WchType,
    pub status: ReportStatus,
    pub flight_key: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightClosure {
    pub airline: String,
    pub flight_number: String,
    pub flight_date: Option<NaiveDate>,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub passenger_name: String,
    pub airline: String,
    pub flight_number: String,
    pub flight_date: Option<NaiveDate>,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub seat: String,
    #[serde(default)]
    pub gate: String,
    #[serde(default)]
    pub pnr: String,
    pub wch_type: WchType,
    pub image_url: Option<String>,
}

/// One row of the day's flight board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightBoardEntry {
    pub flight_key: String,
    pub airline: String,
    pub flight_number: String,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub report_count: usize,
    pub late_count: usize,
}

// --- Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WchrError {
    #[error("role {role} is not authorized to close flights")]
    NotAuthorized { role: Role },
    #[error("flight {flight_key} not found")]
    FlightNotFound { flight_key: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

// --- Service ---

pub struct WchrService {
    flights: Arc<dyn FlightStore>,
    reports: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
}

impl WchrService {
    pub fn new(
        flights: Arc<dyn FlightStore>,
        reports: Arc<dyn ReportStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            flights,
            reports,
            clock,
        }
    }

    /// Idempotent closure upsert: the first call creates the flight
    /// record, a repeat call refreshes closed_at/closed_by. Last writer
    /// wins on the single flight document.
    pub async fn close_flight(
        &self,
        actor: &Actor,
        request: FlightClosure,
    ) -> Result<WchrFlight, WchrError> {
        if !actor.role.can_close_flight() {
            warn!(
                "{} ({}) attempted to close flight {} {}",
                actor.username, actor.role, request.airline, request.flight_number
            );
            return Err(WchrError::NotAuthorized { role: actor.role });
        }

        let key = flight_key(&request.airline, &request.flight_number, request.flight_date);
        let mut flight = self
            .flights
            .get_flight(&key)
            .await?
            .unwrap_or_else(|| WchrFlight {
                flight_key: key.clone(),
                airline: request.airline.trim().to_string(),
                flight_number: request.flight_number.split_whitespace().collect(),
                flight_date: request.flight_date,
                origin: request.origin.clone(),
                destination: request.destination.clone(),
                closed_at: None,
                closed_by: None,
            });
        flight.closed_at = Some(self.clock.now());
        flight.closed_by = Some(actor.username.clone());
        self.flights.upsert_flight(flight.clone()).await?;
        info!("Flight {} closed by {}", key, actor.username);
        Ok(flight)
    }

    /// Closed iff a record exists and carries a closure timestamp.
    pub async fn is_closed(&self, flight_key: &str) -> Result<bool, WchrError> {
        let closed = self
            .flights
            .get_flight(flight_key)
            .await?
            .map_or(false, |f| f.closed_at.is_some());
        debug!("Flight {} closed: {}", flight_key, closed);
        Ok(closed)
    }

    pub async fn get_flight(&self, flight_key: &str) -> Result<WchrFlight, WchrError> {
        self.flights
            .get_flight(flight_key)
            .await?
            .ok_or_else(|| WchrError::FlightNotFound {
                flight_key: flight_key.to_string(),
            })
    }

    /// Creates a report with a one-shot NEW/LATE classification, then
    /// patches the display id onto the durable document (two-phase).
    ///
    /// The closure check and the report write are two separate
    /// single-document operations: a closure landing between them
    /// leaves this report NEW. Accepted race; statuses are never
    /// revised after creation.
    pub async fn submit_report(
        &self,
        actor: &Actor,
        submission: ReportSubmission,
    ) -> Result<WchrReport, WchrError> {
        let key = flight_key(
            &submission.airline,
            &submission.flight_number,
            submission.flight_date,
        );
        let status = if self.is_closed(&key).await? {
            ReportStatus::Late
        } else {
            ReportStatus::New
        };
        let submitted_at = self.clock.now();

        let report = WchrReport {
            document_id: String::new(),
            report_id: None,
            employee_id: actor.id.clone(),
            submitted_at,
            passenger_name: submission.passenger_name,
            airline: submission.airline,
            flight_number: submission.flight_number,
            flight_date: submission.flight_date,
            origin: submission.origin,
            destination: submission.destination,
            seat: submission.seat,
            gate: submission.gate,
            pnr: submission.pnr,
            wch_type: submission.wch_type,
            status,
            flight_key: key.clone(),
            image_url: submission.image_url,
        };
        let document_id = self.reports.create_report(report).await?;
        let display_id = report_id(&document_id, submitted_at.date_naive());
        let report = self.reports.set_report_id(&document_id, &display_id).await?;
        info!(
            "Report {} ({}) recorded as {} on flight {}",
            display_id, document_id, report.status, key
        );
        Ok(report)
    }

    pub async fn get_report(&self, document_id: &str) -> Result<WchrReport, WchrError> {
        self.reports
            .get_report(document_id)
            .await?
            .ok_or_else(|| WchrError::Store(StoreError::DocumentNotFound {
                collection: "wch_reports",
                id: document_id.to_string(),
            }))
    }

    /// The day's flights: reports submitted within the calendar day,
    /// grouped per flight key, with the flight's closure state.
    pub async fn day_board(&self, day: NaiveDate) -> Result<Vec<FlightBoardEntry>, WchrError> {
        let from = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        let to = day
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
        let (Some(from), Some(to)) = (from, to) else {
            return Ok(Vec::new());
        };

        let reports = self.reports.list_reports_between(from, to).await?;
        let mut grouped: BTreeMap<String, Vec<WchrReport>> = BTreeMap::new();
        for report in reports {
            grouped.entry(report.flight_key.clone()).or_default().push(report);
        }

        let mut board = Vec::with_capacity(grouped.len());
        for (key, reports) in grouped {
            let flight = self.flights.get_flight(&key).await?;
            let first = &reports[0];
            board.push(FlightBoardEntry {
                flight_key: key,
                airline: first.airline.clone(),
                flight_number: first.flight_number.clone(),
                closed: flight.as_ref().is_some_and(|f| f.closed_at.is_some()),
                closed_at: flight.and_then(|f| f.closed_at),
                report_count: reports.len(),
                late_count: reports
                    .iter()
                    .filter(|r| r.status == ReportStatus::Late)
                    .count(),
            });
        }
        Ok(board)
    }
}

// --- Tests ---

#[cfg(test)]
mod wchr_service_tests {
    use super::*;
    use crate::store::{InMemoryFlightStore, InMemoryReportStore, ManualClock};
    use chrono::Duration;

    fn station_manager() -> Actor {
        Actor {
            id: "emp-100".to_string(),
            username: "svea".to_string(),
            role: Role::StationManager,
        }
    }

    fn agent() -> Actor {
        Actor {
            id: "emp-200".to_string(),
            username: "jonas".to_string(),
            role: Role::Agent,
        }
    }

    fn service_with_clock(clock: ManualClock) -> WchrService {
        WchrService::new(
            Arc::new(InMemoryFlightStore::new()),
            Arc::new(InMemoryReportStore::new()),
            Arc::new(clock),
        )
    }

    fn closure(airline: &str, number: &str, date: Option<NaiveDate>) -> FlightClosure {
        FlightClosure {
            airline: airline.to_string(),
            flight_number: number.to_string(),
            flight_date: date,
            origin: "ARN".to_string(),
            destination: "UME".to_string(),
        }
    }

    fn submission(airline: &str, number: &str, date: Option<NaiveDate>) -> ReportSubmission {
        ReportSubmission {
            passenger_name: "A. Lindgren".to_string(),
            airline: airline.to_string(),
            flight_number: number.to_string(),
            flight_date: date,
            origin: "ARN".to_string(),
            destination: "UME".to_string(),
            seat: "12C".to_string(),
            gate: "14".to_string(),
            pnr: "X9K2LM".to_string(),
            wch_type: WchType::Wchr,
            image_url: None,
        }
    }

    fn jan8() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 8).unwrap()
    }

    #[test]
    fn flight_key_trims_and_strips_whitespace() {
        assert_eq!(flight_key("SY", " 204 ", Some(jan8())), "SY-204-2026-01-08");
        assert_eq!(flight_key("SY", "2 0 4", Some(jan8())), "SY-204-2026-01-08");
    }

    #[test]
    fn flight_key_falls_back_on_missing_inputs() {
        assert_eq!(flight_key("", "204", Some(jan8())), "UNK-204-2026-01-08");
        assert_eq!(flight_key("SY", "  ", Some(jan8())), "SY-UNK-2026-01-08");
        assert_eq!(flight_key("SY", "204", None), "SY-204-unknown-date");
    }

    #[test]
    fn report_id_uses_date_and_uppercased_document_tail() {
        assert_eq!(report_id("abc123xyz789", jan8()), "WCHR-20260108-XYZ789");
        // Short ids use whatever tail exists.
        assert_eq!(report_id("ab1", jan8()), "WCHR-20260108-AB1");
    }

    #[tokio::test]
    async fn closing_requires_an_authorized_role() {
        let service = service_with_clock(ManualClock::new("2026-01-08 10:00:00"));
        let err = service
            .close_flight(&agent(), closure("SY", "204", Some(jan8())))
            .await
            .unwrap_err();
        assert_eq!(err, WchrError::NotAuthorized { role: Role::Agent });
        assert!(!service.is_closed("SY-204-2026-01-08").await.unwrap());
    }

    #[tokio::test]
    async fn closing_is_idempotent_and_refreshes_the_timestamp() {
        let clock = ManualClock::new("2026-01-08 10:00:00");
        let service = service_with_clock(clock.clone());
        let manager = station_manager();

        let first = service
            .close_flight(&manager, closure("SY", "204", Some(jan8())))
            .await
            .unwrap();
        assert!(service.is_closed(&first.flight_key).await.unwrap());

        clock.advance(Duration::minutes(5));
        let supervisor = Actor {
            id: "emp-300".to_string(),
            username: "malin".to_string(),
            role: Role::Supervisor,
        };
        let second = service
            .close_flight(&supervisor, closure("SY", "204", Some(jan8())))
            .await
            .unwrap();

        assert_eq!(second.flight_key, first.flight_key);
        assert!(second.closed_at > first.closed_at);
        assert_eq!(second.closed_by.as_deref(), Some("malin"));
    }

    #[tokio::test]
    async fn absent_flight_record_means_open() {
        let service = service_with_clock(ManualClock::new("2026-01-08 10:00:00"));
        assert!(!service.is_closed("SY-204-2026-01-08").await.unwrap());
        assert_eq!(
            service.get_flight("SY-204-2026-01-08").await.unwrap_err(),
            WchrError::FlightNotFound {
                flight_key: "SY-204-2026-01-08".to_string()
            }
        );
    }

    #[tokio::test]
    async fn report_before_closure_is_new_and_stays_new() {
        let clock = ManualClock::new("2026-01-08 09:00:00");
        let service = service_with_clock(clock.clone());

        let report = service
            .submit_report(&agent(), submission("SY", "204", Some(jan8())))
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::New);

        // Flight closes one second later; the stored status is frozen.
        clock.advance(Duration::seconds(1));
        service
            .close_flight(&station_manager(), closure("SY", "204", Some(jan8())))
            .await
            .unwrap();

        let reloaded = service.get_report(&report.document_id).await.unwrap();
        assert_eq!(reloaded.status, ReportStatus::New);
    }

    #[tokio::test]
    async fn report_after_closure_is_late() {
        let clock = ManualClock::new("2026-01-08 09:00:00");
        let service = service_with_clock(clock.clone());

        service
            .close_flight(&station_manager(), closure("SY", "204", Some(jan8())))
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));

        let report = service
            .submit_report(&agent(), submission("SY", "204", Some(jan8())))
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Late);
        assert_eq!(report.flight_key, "SY-204-2026-01-08");
    }

    #[tokio::test]
    async fn report_gets_a_display_id_after_creation() {
        let service = service_with_clock(ManualClock::new("2026-01-08 09:00:00"));
        let report = service
            .submit_report(&agent(), submission("SY", "204", Some(jan8())))
            .await
            .unwrap();

        let display_id = report.report_id.expect("display id patched in");
        assert!(display_id.starts_with("WCHR-20260108-"));
        assert_eq!(display_id.len(), "WCHR-20260108-".len() + 6);
        assert_eq!(
            display_id,
            report_id(&report.document_id, jan8()),
        );
    }

    #[tokio::test]
    async fn day_board_groups_reports_per_flight() {
        let clock = ManualClock::new("2026-01-08 09:00:00");
        let service = service_with_clock(clock.clone());
        let manager = station_manager();

        service
            .close_flight(&manager, closure("SY", "204", Some(jan8())))
            .await
            .unwrap();
        clock.advance(Duration::minutes(1));

        service
            .submit_report(&agent(), submission("SY", "204", Some(jan8())))
            .await
            .unwrap();
        service
            .submit_report(&agent(), submission("DY", "4355", Some(jan8())))
            .await
            .unwrap();

        // A report from the previous day stays off the board.
        clock.set_time("2026-01-07 22:00:00");
        service
            .submit_report(&agent(), submission("SK", "10", Some(jan8())))
            .await
            .unwrap();

        let board = service.day_board(jan8()).await.unwrap();
        assert_eq!(board.len(), 2);

        let sy = board
            .iter()
            .find(|entry| entry.flight_key == "SY-204-2026-01-08")
            .unwrap();
        assert!(sy.closed);
        assert_eq!(sy.report_count, 1);
        assert_eq!(sy.late_count, 1);

        let dy = board
            .iter()
            .find(|entry| entry.flight_key == "DY-4355-2026-01-08")
            .unwrap();
        assert!(!dy.closed);
        assert_eq!(dy.late_count, 0);
    }
}
