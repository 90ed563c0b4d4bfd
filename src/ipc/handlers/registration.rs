use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::ParentRelationKind;

/// Creates the placement rows (session programs, or administrative groups
/// for section-based sessions) the form offers. Stands in for the old
/// spreadsheet import.
fn handle_placements_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(items) = req.params.get("placements").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing placements", None);
    };

    let mut imported = Vec::new();
    for item in items {
        let Some(title) = item.get("title").and_then(|v| v.as_str()) else {
            return err(&req.id, "bad_params", "placement without title", None);
        };
        let description = item.get("description").and_then(|v| v.as_str());
        let placement_id = Uuid::new_v4().to_string();
        let res = conn.execute(
            "INSERT INTO placements(id, title, description) VALUES(?, ?, ?)
             ON CONFLICT(title) DO UPDATE SET description = excluded.description",
            (&placement_id, title, description),
        );
        if let Err(e) = res {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "placements" })),
            );
        }
        let resolved_id: Result<String, _> = conn.query_row(
            "SELECT id FROM placements WHERE title = ?",
            [title],
            |r| r.get(0),
        );
        match resolved_id {
            Ok(id) => imported.push(json!({ "id": id, "title": title })),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(
        &req.id,
        json!({ "imported": imported.len(), "placements": imported }),
    )
}

/// Stores one validated registration record with its parent sub-records and
/// optional program preference ratings. Validation happened upstream; this
/// only rejects structurally broken payloads.
fn handle_registration_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p = &req.params;

    let required = [
        "firstName",
        "lastName",
        "email",
        "phoneNumber",
        "school",
        "section",
    ];
    for key in required {
        if p.get(key).and_then(|v| v.as_str()).is_none() {
            return err(&req.id, "bad_params", format!("missing {}", key), None);
        }
    }
    let school_class = p.get("schoolClass").and_then(|v| v.as_i64());
    let school_year = p.get("schoolYear").and_then(|v| v.as_i64());
    let payment = p.get("payment").and_then(|v| v.as_i64());
    let (Some(school_class), Some(school_year), Some(payment)) =
        (school_class, school_year, payment)
    else {
        return err(
            &req.id,
            "bad_params",
            "missing schoolClass/schoolYear/payment",
            None,
        );
    };

    let parents: Vec<&serde_json::Value> = p
        .get("parents")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    for parent in &parents {
        let relation = parent.get("relation").and_then(|v| v.as_str());
        if relation.and_then(ParentRelationKind::parse).is_none() {
            return err(
                &req.id,
                "bad_params",
                "parent relation must be one of mother/father/tutoress/tutor/none",
                None,
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let registration_id = Uuid::new_v4().to_string();
    let res = tx.execute(
        "INSERT INTO registrations(
           id, first_name, last_name, email, phone_number, school,
           school_class, school_year, section, payment, home_address,
           comment, commit_timestamp
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &registration_id,
            p.get("firstName").and_then(|v| v.as_str()),
            p.get("lastName").and_then(|v| v.as_str()),
            p.get("email").and_then(|v| v.as_str()),
            p.get("phoneNumber").and_then(|v| v.as_str()),
            p.get("school").and_then(|v| v.as_str()),
            school_class,
            school_year,
            p.get("section").and_then(|v| v.as_str()),
            payment,
            p.get("homeAddress").and_then(|v| v.as_str()),
            p.get("comment").and_then(|v| v.as_str()),
            Utc::now().to_rfc3339(),
        ),
    );
    if let Err(e) = res {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        );
    }

    for parent in &parents {
        let res = tx.execute(
            "INSERT INTO registration_parents(
               id, registration_id, relation, first_name, last_name,
               phone_number, email, job
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &registration_id,
                parent.get("relation").and_then(|v| v.as_str()),
                parent.get("firstName").and_then(|v| v.as_str()).unwrap_or(""),
                parent.get("lastName").and_then(|v| v.as_str()).unwrap_or(""),
                parent.get("phoneNumber").and_then(|v| v.as_str()).unwrap_or(""),
                parent.get("email").and_then(|v| v.as_str()).unwrap_or(""),
                parent.get("job").and_then(|v| v.as_str()).unwrap_or(""),
            ),
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "registration_parents" })),
            );
        }
    }

    if let Some(ratings) = p.get("ratings").and_then(|v| v.as_array()) {
        for rating in ratings {
            let placement_id = rating.get("placementId").and_then(|v| v.as_str());
            let value = rating.get("rating").and_then(|v| v.as_i64());
            let (Some(placement_id), Some(value)) = (placement_id, value) else {
                let _ = tx.rollback();
                return err(&req.id, "bad_params", "rating without placementId/rating", None);
            };
            let res = tx.execute(
                "INSERT INTO placement_ratings(id, registration_id, placement_id, rating, comment)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &registration_id,
                    placement_id,
                    value,
                    rating.get("comment").and_then(|v| v.as_str()),
                ),
            );
            if let Err(e) = res {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "placement_ratings" })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "registrationId": registration_id }))
}

fn handle_registration_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "registrations": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT r.id, r.first_name, r.last_name, r.email, r.section,
                r.school_class, r.school_year, r.payment, r.payed, r.chosen,
                p.title
         FROM registrations r
         LEFT JOIN placements p ON p.id = r.placement_id
         ORDER BY r.last_name, r.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            let email: String = row.get(3)?;
            let section: String = row.get(4)?;
            let school_class: i64 = row.get(5)?;
            let school_year: i64 = row.get(6)?;
            let payment: i64 = row.get(7)?;
            let payed: i64 = row.get(8)?;
            let chosen: i64 = row.get(9)?;
            let placement: Option<String> = row.get(10)?;
            Ok(json!({
                "id": id,
                "firstName": first,
                "lastName": last,
                "email": email,
                "section": section,
                "schoolClass": school_class,
                "schoolYear": school_year,
                "payment": payment,
                "payed": payed != 0,
                "chosen": chosen != 0,
                "placement": placement
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(registrations) => ok(&req.id, json!({ "registrations": registrations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Administrator review: mark a record chosen/payed and assign a placement.
fn handle_registration_choose(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(registration_id) = req.params.get("registrationId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing registrationId", None);
    };
    let chosen = req
        .params
        .get("chosen")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let payed = req.params.get("payed").and_then(|v| v.as_bool());
    let placement_id = req.params.get("placementId").and_then(|v| v.as_str());

    let res = conn.execute(
        "UPDATE registrations SET
           chosen = ?,
           payed = COALESCE(?, payed),
           placement_id = COALESCE(?, placement_id)
         WHERE id = ?",
        (
            chosen as i64,
            payed.map(|v| v as i64),
            placement_id,
            registration_id,
        ),
    );
    match res {
        Ok(0) => err(&req.id, "not_found", "registration not found", None),
        Ok(_) => ok(&req.id, json!({ "registrationId": registration_id })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "placements.import" => Some(handle_placements_import(state, req)),
        "registration.submit" => Some(handle_registration_submit(state, req)),
        "registration.list" => Some(handle_registration_list(state, req)),
        "registration.choose" => Some(handle_registration_choose(state, req)),
        _ => None,
    }
}
