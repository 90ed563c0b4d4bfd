use std::collections::HashSet;

use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrate;
use crate::model::{
    CandidateParent, CandidateRegistration, ParentRelationKind, Placement, PlacementRating,
    PlacementRef, Season, SessionContext, SessionKind,
};

fn load_session(conn: &Connection, session_id: &str) -> anyhow::Result<Option<SessionContext>> {
    let row = conn
        .query_row(
            "SELECT year, season, begin_date, program_based FROM sessions WHERE id = ?",
            [session_id],
            |r| {
                let year: i64 = r.get(0)?;
                let season: String = r.get(1)?;
                let begin: String = r.get(2)?;
                let program_based: i64 = r.get(3)?;
                Ok((year, season, begin, program_based))
            },
        )
        .optional()?;
    let Some((year, season, begin, program_based)) = row else {
        return Ok(None);
    };
    let season = Season::parse(&season)
        .with_context(|| format!("session {} has bad season {}", session_id, season))?;
    let begin = NaiveDate::parse_from_str(&begin, "%Y-%m-%d")
        .with_context(|| format!("session {} has bad begin date {}", session_id, begin))?;
    Ok(Some(SessionContext {
        id: session_id.to_string(),
        year,
        season,
        begin,
        kind: if program_based != 0 {
            SessionKind::ProgramBased
        } else {
            SessionKind::SectionBased
        },
    }))
}

fn load_parents(conn: &Connection, registration_id: &str) -> anyhow::Result<Vec<CandidateParent>> {
    let mut stmt = conn.prepare(
        "SELECT relation, first_name, last_name, phone_number, email, job
         FROM registration_parents WHERE registration_id = ?
         ORDER BY last_name, first_name",
    )?;
    let rows = stmt.query_map([registration_id], |r| {
        let relation: String = r.get(0)?;
        let first_name: String = r.get(1)?;
        let last_name: String = r.get(2)?;
        let phone_number: String = r.get(3)?;
        let email: String = r.get(4)?;
        let job: String = r.get(5)?;
        Ok((relation, first_name, last_name, phone_number, email, job))
    })?;

    let mut parents = Vec::new();
    for row in rows {
        let (relation, first_name, last_name, phone_number, email, job) = row?;
        let relation = ParentRelationKind::parse(&relation)
            .with_context(|| format!("bad parent relation {} on {}", relation, registration_id))?;
        parents.push(CandidateParent {
            relation,
            first_name,
            last_name,
            phone_number,
            email,
            job,
        });
    }
    Ok(parents)
}

fn load_ratings(
    conn: &Connection,
    registration_id: &str,
) -> anyhow::Result<Vec<PlacementRating>> {
    let mut stmt = conn.prepare(
        "SELECT placement_id, rating FROM placement_ratings
         WHERE registration_id = ? ORDER BY rating DESC",
    )?;
    let ratings = stmt
        .query_map([registration_id], |r| {
            Ok(PlacementRating {
                placement_id: r.get(0)?,
                rating: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ratings)
}

/// Builds the ordered read model the migration consumes. Candidates come
/// out in the admin list order (last name, first name).
fn load_batch(
    conn: &Connection,
    kind: SessionKind,
    only_ids: Option<&HashSet<String>>,
) -> anyhow::Result<Vec<CandidateRegistration>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.first_name, r.last_name, r.email, r.phone_number,
                r.school, r.school_class, r.school_year, r.section,
                r.payment, r.payed, r.chosen, r.home_address,
                r.placement_id, p.title
         FROM registrations r
         LEFT JOIN placements p ON p.id = r.placement_id
         ORDER BY r.last_name, r.first_name",
    )?;
    #[allow(clippy::type_complexity)]
    let rows = stmt.query_map([], |r| {
        let id: String = r.get(0)?;
        let first_name: String = r.get(1)?;
        let last_name: String = r.get(2)?;
        let email: String = r.get(3)?;
        let phone_number: String = r.get(4)?;
        let school: String = r.get(5)?;
        let school_class: i64 = r.get(6)?;
        let school_year: i64 = r.get(7)?;
        let section: String = r.get(8)?;
        let payment: i64 = r.get(9)?;
        let payed: i64 = r.get(10)?;
        let chosen: i64 = r.get(11)?;
        let home_address: Option<String> = r.get(12)?;
        let placement_id: Option<String> = r.get(13)?;
        let placement_title: Option<String> = r.get(14)?;
        Ok((
            id,
            first_name,
            last_name,
            email,
            phone_number,
            school,
            school_class,
            school_year,
            section,
            payment,
            payed,
            chosen,
            home_address,
            placement_id.zip(placement_title),
        ))
    })?;

    let mut batch = Vec::new();
    for row in rows {
        let (
            id,
            first_name,
            last_name,
            email,
            phone_number,
            school,
            school_class,
            school_year,
            section,
            payment,
            payed,
            chosen,
            home_address,
            placement_ref,
        ) = row?;
        if let Some(only) = only_ids {
            if !only.contains(&id) {
                continue;
            }
        }

        let placement = match placement_ref {
            Some((placement_id, title)) => {
                let placement = PlacementRef {
                    id: placement_id,
                    title,
                };
                Some(match kind {
                    SessionKind::ProgramBased => Placement::Program {
                        ratings: load_ratings(conn, &id)?,
                        placement,
                    },
                    SessionKind::SectionBased => Placement::Section { placement },
                })
            }
            None => None,
        };
        let parents = load_parents(conn, &id)?;

        batch.push(CandidateRegistration {
            id,
            first_name,
            last_name,
            email,
            phone_number,
            school,
            school_class,
            school_year,
            section,
            payment,
            payed: payed != 0,
            chosen: chosen != 0,
            home_address,
            placement,
            parents,
        });
    }
    Ok(batch)
}

/// Runs the batch migration for one session. Per-record problems come back
/// as diagnostics; any repository failure means nothing was committed.
fn handle_migration_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session_id) = req.params.get("sessionId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing sessionId", None);
    };
    let only_ids: Option<HashSet<String>> = req
        .params
        .get("registrationIds")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        });

    let session = match load_session(conn, session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "session_load_failed", e.to_string(), None),
    };
    let batch = match load_batch(conn, session.kind, only_ids.as_ref()) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "batch_load_failed", e.to_string(), None),
    };

    match migrate::migrate_batch(conn, &session, &batch) {
        Ok(diagnostics) => ok(
            &req.id,
            json!({
                "candidates": batch.len(),
                "diagnostics": diagnostics
            }),
        ),
        // The transaction already rolled back; no diagnostics are
        // meaningful because nothing committed.
        Err(e) => err(
            &req.id,
            "migration_failed",
            e.to_string(),
            Some(json!({ "sessionId": session_id })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.run" => Some(handle_migration_run(state, req)),
        _ => None,
    }
}
