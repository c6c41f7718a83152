use std::str::FromStr;

use thiserror::Error;

use crate::models::Program;

/// How a program's `slot_student` table records presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceSource {
    /// `status ENUM('pending', 'present', 'absent')`
    StatusColumn,
    /// Nullable boolean `attendance`; NULL means not yet marked.
    AttendanceFlag,
}

impl AttendanceSource {
    pub fn column(self) -> &'static str {
        match self {
            AttendanceSource::StatusColumn => "status",
            AttendanceSource::AttendanceFlag => "attendance",
        }
    }

    pub fn present(self, qualifier: &str) -> String {
        match self {
            AttendanceSource::StatusColumn => format!("{qualifier}status = 'present'"),
            AttendanceSource::AttendanceFlag => format!("{qualifier}attendance = 1"),
        }
    }

    pub fn absent(self, qualifier: &str) -> String {
        match self {
            AttendanceSource::StatusColumn => format!("{qualifier}status = 'absent'"),
            AttendanceSource::AttendanceFlag => format!("{qualifier}attendance = 0"),
        }
    }

    pub fn pending(self, qualifier: &str) -> String {
        match self {
            AttendanceSource::StatusColumn => format!("{qualifier}status = 'pending'"),
            AttendanceSource::AttendanceFlag => format!("{qualifier}attendance IS NULL"),
        }
    }

    /// `COUNT(CASE ..)` projections for present/absent/pending, labelled with
    /// the given aliases.
    pub fn breakdown(self, qualifier: &str, labels: [&str; 3]) -> String {
        let [present, absent, pending] = labels;
        format!(
            "COUNT(CASE WHEN {} THEN 1 END) AS {present}, \
             COUNT(CASE WHEN {} THEN 1 END) AS {absent}, \
             COUNT(CASE WHEN {} THEN 1 END) AS {pending}",
            self.present(qualifier),
            self.absent(qualifier),
            self.pending(qualifier),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attendance source `{0}`; expected `status` or `flag`")]
pub struct UnknownAttendanceSource(pub String);

impl FromStr for AttendanceSource {
    type Err = UnknownAttendanceSource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "status" | "enum" => Ok(AttendanceSource::StatusColumn),
            "flag" | "attendance" | "boolean" => Ok(AttendanceSource::AttendanceFlag),
            _ => Err(UnknownAttendanceSource(value.to_string())),
        }
    }
}

/// Which date decides whether a slot booking counts as "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDayScope {
    /// The booking row's own `added_at`.
    BookedToday,
    /// The date of the slot the booking belongs to.
    SlotToday,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramProfile {
    pub program: Program,
    pub attendance: AttendanceSource,
    pub day_scope: SlotDayScope,
    /// Column grouped for `area_wise_applications`, when the program has one.
    pub area_column: Option<&'static str>,
}

impl ProgramProfile {
    pub fn standard(program: Program) -> Self {
        match program {
            Program::Pgp => Self {
                program,
                attendance: AttendanceSource::StatusColumn,
                day_scope: SlotDayScope::BookedToday,
                area_column: None,
            },
            Program::Phd | Program::Ephd => Self {
                program,
                attendance: AttendanceSource::AttendanceFlag,
                day_scope: SlotDayScope::SlotToday,
                area_column: Some("research_area"),
            },
            Program::Emba => Self {
                program,
                attendance: AttendanceSource::StatusColumn,
                day_scope: SlotDayScope::BookedToday,
                area_column: Some("specialization_area"),
            },
        }
    }

    pub fn with_attendance(mut self, attendance: AttendanceSource) -> Self {
        self.attendance = attendance;
        self
    }

    pub fn table(&self, suffix: &str) -> String {
        self.program.table(suffix)
    }

    /// Every table the program's report reads, with the columns it expects.
    pub fn required_columns(&self) -> Vec<(String, Vec<&'static str>)> {
        let mut applications = vec!["final_submit", "commitment_payment"];
        if self.program == Program::Pgp {
            applications.extend([
                "reopen",
                "resubmitted",
                "cancellation_request",
                "acceptance_form_submitted",
            ]);
        }
        applications.extend(self.area_column);

        let booking_day = match self.day_scope {
            SlotDayScope::BookedToday => "added_at",
            SlotDayScope::SlotToday => "slot_id",
        };

        let mut tables = vec![
            (self.table("application"), applications),
            (self.table("registered"), vec!["shortlist_status"]),
            (self.table("slot"), vec!["id", "slot_date"]),
            (
                self.table("slot_student"),
                vec![self.attendance.column(), booking_day],
            ),
        ];
        if self.program == Program::Pgp {
            tables.push((self.table("verification"), vec!["reason"]));
            tables.push((self.table("withdraw"), Vec::new()));
            tables.push(("iim_payment".to_string(), vec!["transaction_payment_type"]));
            tables.push((
                "iim_consent_form".to_string(),
                vec!["check1", "check2", "check3", "check4"],
            ));
        }
        tables
    }

    /// `FROM .. WHERE ..` selecting today's slot bookings, plus the column
    /// qualifier to use for the booking table.
    pub fn todays_bookings(&self) -> (String, &'static str) {
        let bookings = self.table("slot_student");
        match self.day_scope {
            SlotDayScope::BookedToday => (
                format!("FROM {bookings} WHERE DATE(added_at) = CURDATE()"),
                "",
            ),
            SlotDayScope::SlotToday => (
                format!(
                    "FROM {bookings} ss JOIN {slots} s ON ss.slot_id = s.id \
                     WHERE DATE(s.slot_date) = CURDATE()",
                    slots = self.table("slot"),
                ),
                "ss.",
            ),
        }
    }
}

/// Per-program table conventions, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramProfiles {
    profiles: Vec<ProgramProfile>,
}

impl Default for ProgramProfiles {
    fn default() -> Self {
        Self {
            profiles: Program::ALL.into_iter().map(ProgramProfile::standard).collect(),
        }
    }
}

impl ProgramProfiles {
    pub fn get(&self, program: Program) -> ProgramProfile {
        self.profiles
            .iter()
            .find(|profile| profile.program == program)
            .cloned()
            .unwrap_or_else(|| ProgramProfile::standard(program))
    }

    pub fn set_attendance(&mut self, program: Program, attendance: AttendanceSource) {
        let updated = self.get(program).with_attendance(attendance);
        self.profiles.retain(|profile| profile.program != program);
        self.profiles.push(updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_source_treats_null_as_pending() {
        let source = AttendanceSource::AttendanceFlag;
        assert_eq!(source.present("ss."), "ss.attendance = 1");
        assert_eq!(source.pending(""), "attendance IS NULL");
    }

    #[test]
    fn breakdown_labels_each_bucket() {
        let sql = AttendanceSource::StatusColumn
            .breakdown("", ["total_present", "total_absent", "total_pending"]);
        assert!(sql.contains("status = 'present' THEN 1 END) AS total_present"));
        assert!(sql.contains("status = 'absent' THEN 1 END) AS total_absent"));
        assert!(sql.contains("status = 'pending' THEN 1 END) AS total_pending"));
    }

    #[test]
    fn defaults_follow_table_families() {
        let profiles = ProgramProfiles::default();
        assert_eq!(profiles.get(Program::Phd).attendance, AttendanceSource::AttendanceFlag);
        assert_eq!(profiles.get(Program::Emba).attendance, AttendanceSource::StatusColumn);
        assert_eq!(profiles.get(Program::Pgp).area_column, None);
    }

    #[test]
    fn attendance_can_be_overridden_per_program() {
        let mut profiles = ProgramProfiles::default();
        profiles.set_attendance(Program::Phd, AttendanceSource::StatusColumn);
        assert_eq!(profiles.get(Program::Phd).attendance, AttendanceSource::StatusColumn);
        assert_eq!(profiles.get(Program::Ephd).attendance, AttendanceSource::AttendanceFlag);
    }

    #[test]
    fn slot_scope_joins_the_slot_table() {
        let (from, qualifier) = ProgramProfile::standard(Program::Phd).todays_bookings();
        assert!(from.contains("JOIN iim_phd_slot s ON ss.slot_id = s.id"));
        assert_eq!(qualifier, "ss.");

        let (from, qualifier) = ProgramProfile::standard(Program::Emba).todays_bookings();
        assert!(from.contains("FROM iim_emba_slot_student WHERE DATE(added_at)"));
        assert_eq!(qualifier, "");
    }

    #[test]
    fn required_columns_track_profile_choices() {
        let phd = ProgramProfile::standard(Program::Phd).required_columns();
        let (_, bookings) = phd
            .iter()
            .find(|(table, _)| table == "iim_phd_slot_student")
            .expect("bookings table listed");
        assert_eq!(bookings, &vec!["attendance", "slot_id"]);
        assert!(phd
            .iter()
            .any(|(table, columns)| table == "iim_phd_application" && columns.contains(&"research_area")));

        let pgp = ProgramProfile::standard(Program::Pgp).required_columns();
        assert_eq!(pgp.len(), 8);
        assert!(pgp.iter().any(|(table, _)| table == "iim_consent_form"));
    }

    #[test]
    fn parses_attendance_source_names() {
        assert_eq!("flag".parse::<AttendanceSource>(), Ok(AttendanceSource::AttendanceFlag));
        assert_eq!("Status".parse::<AttendanceSource>(), Ok(AttendanceSource::StatusColumn));
        assert!("bool?".parse::<AttendanceSource>().is_err());
    }
}
