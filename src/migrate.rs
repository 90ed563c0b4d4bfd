use std::collections::HashMap;

use anyhow::bail;
use rusqlite::Connection;

use crate::model::{
    CandidateParent, CandidateRegistration, Diagnostic, ParentRelationKind, Person, Placement,
    SessionContext, SessionKind,
};
use crate::repo::Records;

/// Maps a registration-form section name to the canonical subject-area
/// abbreviation used by the permanent records.
fn section_abbreviation(section: &str) -> Option<&'static str> {
    match section {
        "Bio" => Some("BCH"),
        "Che" => Some("CHE"),
        "Eko" => Some("EKO"),
        "Fil" => Some("FIL"),
        "Fiz" => Some("FIA"),
        "Inf" => Some("INF"),
        "Ist" => Some("IST"),
        "Mat" => Some("MAT"),
        "Muz" => Some("MUZ"),
        _ => None,
    }
}

/// Migrates a batch of approved registrations into the permanent records.
///
/// Runs inside one all-or-nothing transaction: per-record problems become
/// diagnostics and the record is skipped, while any repository failure
/// propagates and rolls the whole batch back. Candidates are processed
/// strictly in order because later records may reuse persons or groups
/// created by earlier ones.
pub fn migrate_batch(
    conn: &Connection,
    session: &SessionContext,
    batch: &[CandidateRegistration],
) -> anyhow::Result<Vec<Diagnostic>> {
    let tx = conn.unchecked_transaction()?;
    let mut diags = Vec::new();
    {
        let records = Records::new(&tx);
        let groups = ensure_groups(&records, session, batch)?;
        for candidate in batch {
            if !candidate.chosen {
                continue;
            }
            migrate_one(&records, session, &groups, candidate, &mut diags)?;
        }
    }
    tx.commit()?;
    Ok(diags)
}

/// Builds (or reuses) one group per distinct placement in the batch, keyed
/// by placement id. Done once per run, not per record.
fn ensure_groups(
    records: &Records<'_>,
    session: &SessionContext,
    batch: &[CandidateRegistration],
) -> anyhow::Result<HashMap<String, String>> {
    let mut groups = HashMap::new();
    for candidate in batch {
        if !candidate.chosen {
            continue;
        }
        let Some(placement) = candidate.placement.as_ref().map(Placement::placement) else {
            continue;
        };
        if groups.contains_key(&placement.id) {
            continue;
        }
        let group_id = records.find_or_create_group(&session.id, &placement.group_label())?;
        groups.insert(placement.id.clone(), group_id);
    }
    Ok(groups)
}

fn migrate_one(
    records: &Records<'_>,
    session: &SessionContext,
    groups: &HashMap<String, String>,
    candidate: &CandidateRegistration,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    let Some(student) = records.find_person(
        &candidate.first_name,
        &candidate.last_name,
        &candidate.email,
    )?
    else {
        diags.push(Diagnostic::Ignored {
            candidate: candidate.display(),
        });
        return Ok(());
    };

    ensure_phone(records, session, &student, &candidate.phone_number, diags)?;
    ensure_email(records, session, &student, &candidate.email, diags)?;
    ensure_parents(records, session, &student, &candidate.parents, diags)?;
    update_school_year(
        records,
        &student,
        candidate.school_year,
        candidate.school_class,
        candidate,
        diags,
    )?;
    if student.main_address.is_none() {
        diags.push(Diagnostic::Warning {
            candidate: candidate.display(),
            reason: "no home address on record".to_string(),
        });
    }
    ensure_participation(records, session, groups, &student, candidate, diags)?;
    Ok(())
}

fn ensure_phone(
    records: &Records<'_>,
    session: &SessionContext,
    owner: &Person,
    number: &str,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    if number.is_empty() {
        return Ok(());
    }
    if records.find_phone(&owner.id, number)?.is_some() {
        return Ok(());
    }
    records.create_phone(&owner.id, number, session.stale_since())?;
    diags.push(Diagnostic::Created {
        entity: "phone".to_string(),
        reference: format!("{} {}", owner.display(), number),
    });
    Ok(())
}

fn ensure_email(
    records: &Records<'_>,
    session: &SessionContext,
    owner: &Person,
    address: &str,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    if address.is_empty() {
        return Ok(());
    }
    if records.find_email(&owner.id, address)?.is_some() {
        return Ok(());
    }
    records.create_email(&owner.id, address, session.stale_since())?;
    diags.push(Diagnostic::Created {
        entity: "email".to_string(),
        reference: format!("{} {}", owner.display(), address),
    });
    Ok(())
}

/// Resolves or creates each declared parent, their relation to the student,
/// their employer record, and their contact methods.
fn ensure_parents(
    records: &Records<'_>,
    session: &SessionContext,
    student: &Person,
    parents: &[CandidateParent],
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    // Evaluated once per student: a student with no known parents goes
    // through the conservative create-with-duplicate-warning path for every
    // declared parent.
    let had_parents = records.has_parents(&student.id)?;

    for info in parents {
        if info.relation == ParentRelationKind::None {
            continue;
        }

        let parent = if had_parents {
            match records.find_parent_of(&student.id, &info.first_name, &info.last_name)? {
                Some(parent) => parent,
                None => create_parent(records, student, info, diags)?,
            }
        } else {
            // Never merge across family boundaries without operator
            // confirmation: warn about every name-alike person, then create
            // a fresh one regardless.
            for existing in records.find_persons_by_name(&info.first_name, &info.last_name)? {
                diags.push(Diagnostic::PossibleDuplicate {
                    existing: existing.display(),
                    student: student.display(),
                });
            }
            create_parent(records, student, info, diags)?
        };

        if !info.job.is_empty() && !records.has_institution(&parent.id)? {
            records.create_institution(&parent.id, &info.job)?;
        }
        if !info.phone_number.is_empty() {
            ensure_phone(records, session, &parent, &info.phone_number, diags)?;
        }
        if !info.email.is_empty() {
            ensure_email(records, session, &parent, &info.email, diags)?;
        }
    }
    Ok(())
}

fn create_parent(
    records: &Records<'_>,
    student: &Person,
    info: &CandidateParent,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<Person> {
    let parent = records.create_person(
        &info.first_name,
        &info.last_name,
        info.relation.inferred_gender(),
    )?;
    records.create_family_relation(&student.id, &parent.id, info.relation.reduced())?;
    diags.push(Diagnostic::Created {
        entity: "parent".to_string(),
        reference: format!("{} of {}", parent.display(), student.display()),
    });
    Ok(parent)
}

/// Applies the monotonic grade-progress rule. The cohort offset
/// (school_year - school_class) must agree between the record and the
/// incoming data; a regression never overwrites a record that is already
/// current or ahead.
fn update_school_year(
    records: &Records<'_>,
    student: &Person,
    new_year: i64,
    new_class: i64,
    candidate: &CandidateRegistration,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    let (Some(class), Some(year)) = (student.school_class, student.school_year) else {
        diags.push(Diagnostic::Error {
            candidate: candidate.display(),
            reason: "no school class/year on record".to_string(),
        });
        return Ok(());
    };
    if new_year - new_class != year - class {
        diags.push(Diagnostic::Error {
            candidate: candidate.display(),
            reason: format!(
                "school class/year mismatch: record {}/{}, form {}/{}",
                class, year, new_class, new_year
            ),
        });
    } else if new_class > class {
        records.update_school_progress(&student.id, new_class, new_year)?;
    }
    Ok(())
}

/// Links the student's subject-area enrollment to the session, once.
fn ensure_participation(
    records: &Records<'_>,
    session: &SessionContext,
    groups: &HashMap<String, String>,
    student: &Person,
    candidate: &CandidateRegistration,
    diags: &mut Vec<Diagnostic>,
) -> anyhow::Result<()> {
    let placement = match (&candidate.placement, session.kind) {
        (Some(Placement::Program { placement, .. }), SessionKind::ProgramBased) => placement,
        (Some(Placement::Section { placement }), SessionKind::SectionBased) => placement,
        (Some(_), _) => {
            diags.push(Diagnostic::Error {
                candidate: candidate.display(),
                reason: "assigned placement does not match session kind".to_string(),
            });
            return Ok(());
        }
        (None, _) => {
            diags.push(Diagnostic::Error {
                candidate: candidate.display(),
                reason: "no placement assigned".to_string(),
            });
            return Ok(());
        }
    };

    let Some(abbreviation) = section_abbreviation(&candidate.section) else {
        diags.push(Diagnostic::Error {
            candidate: candidate.display(),
            reason: format!("unknown section {}", candidate.section),
        });
        return Ok(());
    };
    let Some(academic_id) = records.find_academic(&student.id, abbreviation)? else {
        diags.push(Diagnostic::Error {
            candidate: candidate.display(),
            reason: format!("no {} enrollment on record", abbreviation),
        });
        return Ok(());
    };

    // Re-running the batch must not duplicate the link.
    if records
        .find_participation(&academic_id, &session.id)?
        .is_some()
    {
        return Ok(());
    }

    let Some(group_id) = groups.get(&placement.id) else {
        bail!("no group built for placement {}", placement.id);
    };
    records.create_participation(&academic_id, &session.id, group_id, candidate.payment)?;
    diags.push(Diagnostic::Created {
        entity: "participation".to_string(),
        reference: format!("{} -> {}", student.display(), placement.group_label()),
    });
    Ok(())
}
