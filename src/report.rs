use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{Program, ShortlistStatus};
use crate::programs::{ProgramProfile, ProgramProfiles};
use crate::query::{Degrade, QueryExecutor, RowExt};

/// A column of a single-row aggregate and the report path it fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub column: &'static str,
    pub path: &'static str,
}

const fn field(column: &'static str, path: &'static str) -> Field {
    Field { column, path }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// First row only; every listed column is written as a number, with SQL
    /// NULL and missing columns read as 0. Default 0.
    Counts(Vec<Field>),
    /// The whole row set is stored as a list. Default `[]`.
    Rows { path: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub label: String,
    pub sql: String,
    pub shape: Shape,
}

impl ReportEntry {
    fn counts(label: impl Into<String>, sql: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
            shape: Shape::Counts(fields),
        }
    }

    fn rows(label: impl Into<String>, sql: impl Into<String>, path: &'static str) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
            shape: Shape::Rows { path },
        }
    }
}

/// The fixed battery of independent queries behind one program's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTemplate {
    pub program: Program,
    pub entries: Vec<ReportEntry>,
}

impl ReportTemplate {
    pub fn for_profile(profile: &ProgramProfile) -> Self {
        let entries = match profile.program {
            Program::Pgp => pgp_entries(profile),
            Program::Phd | Program::Ephd | Program::Emba => standard_entries(profile),
        };
        Self {
            program: profile.program,
            entries,
        }
    }

    /// The report every entry would produce if all of its queries failed.
    pub fn defaults(&self) -> Value {
        let mut root = Value::Object(Map::new());
        for entry in &self.entries {
            match &entry.shape {
                Shape::Counts(fields) => {
                    for field in fields {
                        set_path(&mut root, field.path, Value::from(0));
                    }
                }
                Shape::Rows { path } => set_path(&mut root, path, Value::Array(Vec::new())),
            }
        }
        root
    }
}

fn pgp_entries(profile: &ProgramProfile) -> Vec<ReportEntry> {
    let applications = profile.table("application");
    let slots = profile.table("slot");
    let registered = profile.table("registered");
    let (todays_bookings, qualifier) = profile.todays_bookings();

    vec![
        ReportEntry::counts(
            "PGP accept/reject",
            format!(
                "SELECT \
                 COUNT(CASE WHEN commitment_payment = 1 THEN 1 END) AS total_accepted, \
                 COUNT(CASE WHEN cancellation_request = 1 THEN 1 END) AS total_rejected \
                 FROM {applications}"
            ),
            vec![
                field("total_accepted", "phase3.total_accepted"),
                field("total_rejected", "phase3.total_rejected"),
            ],
        ),
        ReportEntry::counts(
            "PGP fee payments",
            "SELECT \
             SUM(CASE WHEN transaction_payment_type = 'commitment' THEN 1 ELSE 0 END) AS commitment_fee_paid, \
             SUM(CASE WHEN transaction_payment_type = 'term' THEN 1 ELSE 0 END) AS term_fee_paid \
             FROM iim_payment",
            vec![
                field("commitment_fee_paid", "phase3.commitment_fee_paid"),
                field("term_fee_paid", "phase3.term_fee_paid"),
            ],
        ),
        ReportEntry::counts(
            "PGP acceptance forms",
            format!(
                "SELECT SUM(CASE WHEN acceptance_form_submitted = 1 THEN 1 ELSE 0 END) \
                 AS acceptance_form_submitted FROM {applications}"
            ),
            vec![field("acceptance_form_submitted", "phase3.acceptance_form_submitted")],
        ),
        ReportEntry::counts(
            "PGP withdrawals",
            format!("SELECT COUNT(*) AS total_withdrawals FROM {}", profile.table("withdraw")),
            vec![field("total_withdrawals", "withdrawals.total_withdrawals")],
        ),
        ReportEntry::counts(
            "PGP slots today",
            format!(
                "SELECT COUNT(*) AS today_total_slots FROM {slots} \
                 WHERE DATE(slot_date) = CURDATE()"
            ),
            vec![field("today_total_slots", "phase2b.today_total_slots")],
        ),
        ReportEntry::counts(
            "PGP students today",
            format!("SELECT COUNT(*) AS today_total_students {todays_bookings}"),
            vec![field("today_total_students", "phase2b.today_total_students")],
        ),
        ReportEntry::counts(
            "PGP attendance today",
            format!(
                "SELECT {} {todays_bookings}",
                profile.attendance.breakdown(
                    qualifier,
                    ["present_students", "absent_students", "pending_students"]
                )
            ),
            vec![
                field("present_students", "phase2b.present_students"),
                field("absent_students", "phase2b.absent_students"),
                field("pending_students", "phase2b.pending_students"),
            ],
        ),
        ReportEntry::counts(
            "PGP consent forms",
            "SELECT SUM(check1 + check2 + check3 + check4) AS total_consent_checks, \
             COUNT(*) AS total_consent_requests FROM iim_consent_form",
            vec![
                field("total_consent_requests", "phase2a.total_consent_requests"),
                field("total_consent_checks", "phase2a.total_consent_checks"),
            ],
        ),
        ReportEntry::counts(
            "PGP verification reasons",
            format!(
                "SELECT \
                 SUM(CASE WHEN reason = 'reopen' THEN 1 ELSE 0 END) AS reopen, \
                 SUM(CASE WHEN reason = 'resubmitted' THEN 1 ELSE 0 END) AS resubmitted, \
                 SUM(CASE WHEN reason = 'auto_submitted' THEN 1 ELSE 0 END) AS auto_submitted \
                 FROM {}",
                profile.table("verification")
            ),
            vec![
                field("reopen", "verificationDetails.reopen"),
                field("resubmitted", "verificationDetails.resubmitted"),
                field("auto_submitted", "verificationDetails.auto_submitted"),
            ],
        ),
        ReportEntry::counts(
            "PGP application stats",
            format!(
                "SELECT COUNT(*) AS total_applications, \
                 SUM(CASE WHEN final_submit = 1 THEN 1 ELSE 0 END) AS form_submitted, \
                 SUM(CASE WHEN reopen = 1 THEN 1 ELSE 0 END) AS reopened, \
                 SUM(CASE WHEN resubmitted = 1 THEN 1 ELSE 0 END) AS resubmitted, \
                 SUM(CASE WHEN resubmitted = 0 THEN 1 ELSE 0 END) AS not_resubmitted \
                 FROM {applications}"
            ),
            vec![
                field("form_submitted", "phase1.form_submitted"),
                field("total_applications", "phase1.total_applications"),
                field("reopened", "phase1.reopened"),
                field("resubmitted", "phase1.resubmitted"),
                field("not_resubmitted", "phase1.not_resubmitted"),
            ],
        ),
        ReportEntry::counts(
            "PGP registrations",
            format!("SELECT COUNT(*) AS registered_students FROM {registered}"),
            vec![field("registered_students", "phase1.registered_students")],
        ),
        shortlisted_entry(profile, "phase1.shortlisted_students"),
    ]
}

fn standard_entries(profile: &ProgramProfile) -> Vec<ReportEntry> {
    let label = profile.program.label();
    let applications = profile.table("application");
    let slots = profile.table("slot");
    let bookings = profile.table("slot_student");
    let (todays_bookings, qualifier) = profile.todays_bookings();

    let mut entries = vec![
        ReportEntry::counts(
            format!("{label} commitment fee"),
            format!(
                "SELECT COUNT(*) AS commitment_fee_paid FROM {applications} \
                 WHERE commitment_payment = 1"
            ),
            vec![field("commitment_fee_paid", "phase3.commitment_fee_paid")],
        ),
        ReportEntry::counts(
            format!("{label} slots today"),
            format!(
                "SELECT COUNT(*) AS today_total_slots FROM {slots} \
                 WHERE DATE(slot_date) = CURDATE()"
            ),
            vec![field("today_total_slots", "phase2.today_total_slots")],
        ),
        ReportEntry::counts(
            format!("{label} students today"),
            format!("SELECT COUNT(*) AS today_total_students {todays_bookings}"),
            vec![field("today_total_students", "phase2.today_total_students")],
        ),
        ReportEntry::counts(
            format!("{label} attendance today"),
            format!(
                "SELECT {} {todays_bookings}",
                profile.attendance.breakdown(
                    qualifier,
                    ["present_students", "absent_students", "pending_students"]
                )
            ),
            vec![
                field("present_students", "phase2.present_students"),
                field("absent_students", "phase2.absent_students"),
                field("pending_students", "phase2.pending_students"),
            ],
        ),
        ReportEntry::counts(
            format!("{label} total slots"),
            format!("SELECT COUNT(*) AS total_slots FROM {slots}"),
            vec![field("total_slots", "phase2.total_slots")],
        ),
        ReportEntry::counts(
            format!("{label} attendance totals"),
            format!(
                "SELECT COUNT(*) AS total_students, {} FROM {bookings}",
                profile
                    .attendance
                    .breakdown("", ["total_present", "total_absent", "total_pending"])
            ),
            vec![
                field("total_students", "phase2.total_students"),
                field("total_present", "phase2.total_present"),
                field("total_absent", "phase2.total_absent"),
                field("total_pending", "phase2.total_pending"),
            ],
        ),
        ReportEntry::counts(
            format!("{label} registrations"),
            format!(
                "SELECT COUNT(*) AS total_registrations FROM {}",
                profile.table("registered")
            ),
            vec![field("total_registrations", "phase1.total_registrations")],
        ),
        shortlisted_entry(profile, "phase1.shortlisted_students"),
        ReportEntry::counts(
            format!("{label} applications"),
            format!(
                "SELECT COUNT(*) AS total_applications, \
                 SUM(CASE WHEN final_submit = 1 THEN 1 ELSE 0 END) AS submitted_applications \
                 FROM {applications}"
            ),
            vec![
                field("total_applications", "phase1.total_applications"),
                field("submitted_applications", "phase1.submitted_applications"),
            ],
        ),
    ];

    if let Some(area) = profile.area_column {
        entries.push(ReportEntry::rows(
            format!("{label} area-wise applications"),
            format!(
                "SELECT {area}, COUNT(*) AS application_count FROM {applications} \
                 WHERE final_submit = 1 GROUP BY {area}"
            ),
            "phase1.area_wise_applications",
        ));
    }

    entries
}

fn shortlisted_entry(profile: &ProgramProfile, path: &'static str) -> ReportEntry {
    ReportEntry::counts(
        format!("{} shortlisted", profile.program.label()),
        format!(
            "SELECT COUNT(*) AS shortlisted_students FROM {} WHERE shortlist_status = '{}'",
            profile.table("registered"),
            ShortlistStatus::Shortlisted.as_str()
        ),
        vec![field("shortlisted_students", path)],
    )
}

/// Writes `value` at a dotted path, creating intermediate objects.
fn set_path(root: &mut Value, path: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    match path.split_once('.') {
        Some((head, rest)) => set_path(&mut root[head], rest, value),
        None => root[path] = value,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramReport {
    pub program: Program,
    pub data: Value,
    /// Labels of entries that fell back to their defaults.
    #[serde(skip)]
    pub degraded: Vec<String>,
}

#[derive(Clone)]
pub struct ReportAssembler {
    executor: QueryExecutor,
    profiles: ProgramProfiles,
}

impl ReportAssembler {
    pub fn new(executor: QueryExecutor, profiles: ProgramProfiles) -> Self {
        Self { executor, profiles }
    }

    pub fn template(&self, program: Program) -> ReportTemplate {
        ReportTemplate::for_profile(&self.profiles.get(program))
    }

    /// Runs the program's battery in order. A failing entry leaves its paths
    /// at their defaults; the others are unaffected.
    pub async fn build(&self, program: Program) -> ProgramReport {
        let template = self.template(program);
        let mut data = template.defaults();
        let mut degraded = Vec::new();

        for entry in &template.entries {
            let result = self.executor.fetch_all(&entry.sql, &[]).await;
            if result.is_err() {
                degraded.push(entry.label.clone());
            }
            let rows = result.or_default_logged(&entry.label);

            match &entry.shape {
                Shape::Counts(fields) => {
                    let Some(row) = rows.first() else {
                        continue;
                    };
                    for field in fields {
                        set_path(&mut data, field.path, Value::from(row.count(field.column)));
                    }
                }
                Shape::Rows { path } => {
                    let list = rows.into_iter().map(Value::Object).collect();
                    set_path(&mut data, path, Value::Array(list));
                }
            }
        }

        debug!(
            program = program.label(),
            entries = template.entries.len(),
            degraded = degraded.len(),
            "assembled program report"
        );

        ProgramReport {
            program,
            data,
            degraded,
        }
    }

    pub async fn home_summary(&self) -> HomeSummary {
        let mut shares = Vec::new();

        for program in Program::ALL {
            let sql = format!(
                "SELECT COUNT(*) AS total_applications, \
                 COUNT(CASE WHEN commitment_payment = 1 THEN 1 END) AS admitted, \
                 COUNT(CASE WHEN final_submit = 1 AND commitment_payment = 0 THEN 1 END) AS under_review \
                 FROM {}",
                program.table("application")
            );
            let context = format!("{} home summary", program.label());
            let Some(row) = self.executor.safe_fetch_one(&sql, &[], &context).await else {
                continue;
            };
            shares.push(ProgramShare {
                program,
                applications: row.count("total_applications"),
                admitted: row.count("admitted"),
                under_review: row.count("under_review"),
                percentage: 0,
            });
        }

        HomeSummary::from_shares(shares)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickStats {
    pub total_applications: i64,
    pub total_admitted: i64,
    pub total_under_review: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramShare {
    pub program: Program,
    pub applications: i64,
    pub admitted: i64,
    pub under_review: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSummary {
    pub quick_stats: QuickStats,
    pub program_stats: Vec<ProgramShare>,
}

impl HomeSummary {
    fn from_shares(mut shares: Vec<ProgramShare>) -> Self {
        let quick_stats = QuickStats {
            total_applications: shares.iter().map(|share| share.applications).sum(),
            total_admitted: shares.iter().map(|share| share.admitted).sum(),
            total_under_review: shares.iter().map(|share| share.under_review).sum(),
        };

        let total = quick_stats.total_applications;
        for share in &mut shares {
            share.percentage = if total > 0 {
                ((share.applications as f64 / total as f64) * 100.0).round() as i64
            } else {
                0
            };
        }

        Self {
            quick_stats,
            program_stats: shares,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::AttendanceSource;
    use crate::query::fake::FakeSource;
    use serde_json::json;

    fn assembler(fake: FakeSource) -> ReportAssembler {
        ReportAssembler::new(fake.into_executor(), ProgramProfiles::default())
    }

    /// Answers every statement with a single row carrying no columns, the way
    /// an empty database answers bare aggregates once NULLs are dropped.
    fn empty_store() -> FakeSource {
        FakeSource::new()
            .rows("GROUP BY", vec![])
            .rows("SELECT", vec![json!({})])
    }

    fn numeric_leaves(value: &Value, out: &mut Vec<i64>) {
        match value {
            Value::Object(map) => map.values().for_each(|v| numeric_leaves(v, out)),
            Value::Array(items) => items.iter().for_each(|v| numeric_leaves(v, out)),
            Value::Number(n) => out.push(n.as_i64().unwrap_or(-1)),
            _ => {}
        }
    }

    #[tokio::test]
    async fn every_program_declares_its_sections() {
        let expected: [(Program, &[&str]); 4] = [
            (
                Program::Pgp,
                &["phase1", "phase2a", "phase2b", "phase3", "verificationDetails", "withdrawals"],
            ),
            (Program::Phd, &["phase1", "phase2", "phase3"]),
            (Program::Ephd, &["phase1", "phase2", "phase3"]),
            (Program::Emba, &["phase1", "phase2", "phase3"]),
        ];
        let assembler = assembler(empty_store());

        for (program, sections) in expected {
            let report = assembler.build(program).await;
            let mut keys: Vec<&str> = report
                .data
                .as_object()
                .expect("report is an object")
                .keys()
                .map(String::as_str)
                .collect();
            keys.sort_unstable();
            let mut sections = sections.to_vec();
            sections.sort_unstable();
            assert_eq!(keys, sections, "sections for {program}");

            let mut leaves = Vec::new();
            numeric_leaves(&report.data, &mut leaves);
            assert!(!leaves.is_empty());
            assert!(leaves.iter().all(|n| *n >= 0), "negative leaf in {program}");
        }
    }

    #[tokio::test]
    async fn empty_store_yields_the_default_report() {
        let assembler = assembler(empty_store());
        for program in Program::ALL {
            let report = assembler.build(program).await;
            assert_eq!(report.data, assembler.template(program).defaults());
            assert!(report.degraded.is_empty());
        }
    }

    #[tokio::test]
    async fn unreachable_store_still_yields_defaults() {
        let assembler = assembler(FakeSource::new());
        let report = assembler.build(Program::Emba).await;
        assert_eq!(report.data, assembler.template(Program::Emba).defaults());
        assert_eq!(
            report.degraded.len(),
            assembler.template(Program::Emba).entries.len()
        );
        assert_eq!(report.data["phase1"]["area_wise_applications"], json!([]));
    }

    #[tokio::test]
    async fn phd_commitment_fee_is_counted() {
        let fake = FakeSource::new()
            .rows(
                "FROM iim_phd_application WHERE commitment_payment = 1",
                vec![json!({ "commitment_fee_paid": 1 })],
            )
            .rows(
                "AS submitted_applications FROM iim_phd_application",
                vec![json!({ "total_applications": 3, "submitted_applications": 2 })],
            );
        let report = assembler(fake).build(Program::Phd).await;

        assert_eq!(report.data["phase3"]["commitment_fee_paid"], json!(1));
        assert_eq!(report.data["phase1"]["total_applications"], json!(3));
        assert_eq!(report.data["phase1"]["submitted_applications"], json!(2));
    }

    #[tokio::test]
    async fn emba_attendance_totals_use_status_column() {
        let fake = FakeSource::new().rows(
            "COUNT(CASE WHEN status = 'pending' THEN 1 END) AS total_pending FROM iim_emba_slot_student",
            vec![json!({
                "total_students": 4,
                "total_present": 2,
                "total_absent": 1,
                "total_pending": 1
            })],
        );
        let report = assembler(fake).build(Program::Emba).await;
        let phase2 = &report.data["phase2"];

        assert_eq!(phase2["total_present"], json!(2));
        assert_eq!(phase2["total_absent"], json!(1));
        assert_eq!(phase2["total_pending"], json!(1));
        assert_eq!(phase2["total_students"], json!(4));
    }

    #[tokio::test]
    async fn phd_attendance_reads_nullable_flag() {
        let fake = FakeSource::new().rows(
            "COUNT(CASE WHEN attendance IS NULL THEN 1 END) AS total_pending FROM iim_phd_slot_student",
            vec![json!({
                "total_students": 3,
                "total_present": 1,
                "total_absent": 1,
                "total_pending": 1
            })],
        );
        let report = assembler(fake).build(Program::Phd).await;
        assert_eq!(report.data["phase2"]["total_pending"], json!(1));
    }

    #[tokio::test]
    async fn configured_attendance_source_changes_the_query() {
        let mut profiles = ProgramProfiles::default();
        profiles.set_attendance(Program::Phd, AttendanceSource::StatusColumn);
        let fake = FakeSource::new().rows(
            "status = 'present' THEN 1 END) AS total_present",
            vec![json!({ "total_students": 5, "total_present": 5 })],
        );
        let assembler = ReportAssembler::new(fake.into_executor(), profiles);

        let report = assembler.build(Program::Phd).await;
        assert_eq!(report.data["phase2"]["total_present"], json!(5));
    }

    #[tokio::test]
    async fn one_failing_entry_does_not_disturb_the_rest() {
        let fake = FakeSource::new()
            .fail("FROM iim_emba_registered WHERE", "Unknown column 'shortlist_status'")
            .rows(
                "AS total_registrations FROM iim_emba_registered",
                vec![json!({ "total_registrations": 9 })],
            )
            .rows(
                "WHERE commitment_payment = 1",
                vec![json!({ "commitment_fee_paid": 4 })],
            )
            .rows(
                "GROUP BY specialization_area",
                vec![
                    json!({ "specialization_area": "Finance", "application_count": 2 }),
                    json!({ "specialization_area": "Strategy", "application_count": 1 }),
                ],
            );
        let report = assembler(fake).build(Program::Emba).await;

        assert_eq!(report.data["phase1"]["shortlisted_students"], json!(0));
        assert_eq!(report.data["phase1"]["total_registrations"], json!(9));
        assert_eq!(report.data["phase3"]["commitment_fee_paid"], json!(4));
        assert_eq!(
            report.data["phase1"]["area_wise_applications"][1]["specialization_area"],
            json!("Strategy")
        );
        assert!(report.degraded.contains(&"EMBA shortlisted".to_string()));
    }

    #[tokio::test]
    async fn null_sums_normalise_to_zero() {
        let fake = FakeSource::new().rows(
            "FROM iim_payment",
            vec![json!({ "commitment_fee_paid": null, "term_fee_paid": "3" })],
        );
        let report = assembler(fake).build(Program::Pgp).await;
        assert_eq!(report.data["phase3"]["commitment_fee_paid"], json!(0));
        assert_eq!(report.data["phase3"]["term_fee_paid"], json!(3));
    }

    #[tokio::test]
    async fn home_summary_skips_failed_programs_and_rounds_shares() {
        let fake = FakeSource::new()
            .rows(
                "FROM iim_pgpmci_application",
                vec![json!({ "total_applications": 2, "admitted": 1, "under_review": 1 })],
            )
            .rows(
                "FROM iim_phd_application",
                vec![json!({ "total_applications": 1, "admitted": 0, "under_review": 1 })],
            )
            .fail("FROM iim_ephd_application", "Table 'iim_ephd_application' doesn't exist")
            .rows(
                "FROM iim_emba_application",
                vec![json!({ "total_applications": 0, "admitted": null, "under_review": null })],
            );
        let summary = assembler(fake).home_summary().await;

        assert_eq!(summary.quick_stats.total_applications, 3);
        assert_eq!(summary.quick_stats.total_admitted, 1);
        assert_eq!(summary.quick_stats.total_under_review, 2);
        let programs: Vec<Program> = summary.program_stats.iter().map(|s| s.program).collect();
        assert_eq!(programs, vec![Program::Pgp, Program::Phd, Program::Emba]);
        assert_eq!(summary.program_stats[0].percentage, 67);
        assert_eq!(summary.program_stats[1].percentage, 33);
        assert_eq!(summary.program_stats[2].percentage, 0);

        let json = serde_json::to_value(&summary).expect("serializes");
        assert_eq!(json["quickStats"]["totalUnderReview"], json!(2));
        assert_eq!(json["programStats"][0]["under_review"], json!(1));
    }

    #[test]
    fn set_path_creates_nested_objects() {
        let mut root = json!({});
        set_path(&mut root, "phase2.total_slots", json!(3));
        set_path(&mut root, "phase2.total_students", json!(5));
        assert_eq!(root, json!({ "phase2": { "total_slots": 3, "total_students": 5 } }));
    }
}
