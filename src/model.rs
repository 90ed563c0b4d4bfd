use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How the parent described their relation to the student on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRelationKind {
    Mother,
    Father,
    Tutoress,
    Tutor,
    None,
}

impl ParentRelationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mother" => Some(Self::Mother),
            "father" => Some(Self::Father),
            "tutoress" => Some(Self::Tutoress),
            "tutor" => Some(Self::Tutor),
            "none" => Some(Self::None),
            _ => Option::None,
        }
    }

    /// The permanent records keep only a two-value relation taxonomy.
    pub fn reduced(self) -> &'static str {
        match self {
            Self::Mother | Self::Father => "parent",
            _ => "tutor",
        }
    }

    /// Gender inferred when creating a parent person. Loses the
    /// tutor/tutoress distinction; kept for parity with the records schema.
    pub fn inferred_gender(self) -> &'static str {
        match self {
            Self::Mother | Self::Tutoress => "F",
            _ => "M",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateParent {
    pub relation: ParentRelationKind,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: String,
    pub job: String,
}

/// A program or administrative group a student can be assigned to.
#[derive(Debug, Clone)]
pub struct PlacementRef {
    pub id: String,
    pub title: String,
}

impl PlacementRef {
    /// Stable group label. Includes the id so later title edits still land
    /// in the same bucket.
    pub fn group_label(&self) -> String {
        format!("{} {}", self.id, self.title)
    }
}

#[derive(Debug, Clone)]
pub struct PlacementRating {
    pub placement_id: String,
    pub rating: i64,
}

/// Which bucket the administrator assigned the student to. The variant must
/// match the session kind; program-based sessions additionally carry the
/// student's own preference ranking.
#[derive(Debug, Clone)]
pub enum Placement {
    Program {
        placement: PlacementRef,
        ratings: Vec<PlacementRating>,
    },
    Section {
        placement: PlacementRef,
    },
}

impl Placement {
    pub fn placement(&self) -> &PlacementRef {
        match self {
            Self::Program { placement, .. } => placement,
            Self::Section { placement } => placement,
        }
    }
}

/// Immutable read model of one approved registration record. Collected by
/// the web form and reviewed by an administrator before migration.
#[derive(Debug, Clone)]
pub struct CandidateRegistration {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub school: String,
    pub school_class: i64,
    pub school_year: i64,
    pub section: String,
    pub payment: i64,
    pub payed: bool,
    pub chosen: bool,
    pub home_address: Option<String>,
    pub placement: Option<Placement>,
    pub parents: Vec<CandidateParent>,
}

impl CandidateRegistration {
    pub fn display(&self) -> String {
        format!("<{}> {} {}", self.id, self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "winter" => Some(Self::Winter),
            "spring" => Some(Self::Spring),
            "summer" => Some(Self::Summer),
            "autumn" => Some(Self::Autumn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Winter => "winter",
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Autumn => "autumn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    ProgramBased,
    SectionBased,
}

/// The target session, resolved once by the caller and passed down. No
/// lazily initialized globals.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: String,
    pub year: i64,
    pub season: Season,
    pub begin: NaiveDate,
    pub kind: SessionKind,
}

impl SessionContext {
    /// Backdated "last used" marker seeded on contact methods the migration
    /// creates. Not a true last-contact time.
    pub fn stale_since(&self) -> NaiveDate {
        self.begin - chrono::Duration::days(10)
    }
}

/// An existing person in the permanent records, as seen by the migration.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub school_class: Option<i64>,
    pub school_year: Option<i64>,
    pub main_address: Option<String>,
}

impl Person {
    pub fn display(&self) -> String {
        format!("<{}> {} {}", self.id, self.first_name, self.last_name)
    }
}

/// Per-record outcome surfaced to the operator. Soft failures become
/// diagnostics; only repository failures abort the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// Identity resolution found nobody; the record was skipped whole.
    Ignored { candidate: String },
    /// The record (or one field update) was skipped for the given reason.
    Error { candidate: String, reason: String },
    /// A new row was written into the permanent records.
    Created { entity: String, reference: String },
    /// A name-alike person already exists; a new parent was created anyway.
    PossibleDuplicate { existing: String, student: String },
    Warning { candidate: String, reason: String },
}
