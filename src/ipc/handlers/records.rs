use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn string_list(params: &serde_json::Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Seeds one person into the permanent records, with optional contacts and
/// subject-area enrollments. This is operator tooling; the migration itself
/// never calls it.
fn handle_human_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = req.params.get("firstName").and_then(|v| v.as_str());
    let last_name = req.params.get("lastName").and_then(|v| v.as_str());
    let (Some(first_name), Some(last_name)) = (first_name, last_name) else {
        return err(&req.id, "bad_params", "missing firstName/lastName", None);
    };
    let gender = req
        .params
        .get("gender")
        .and_then(|v| v.as_str())
        .unwrap_or("F");
    let school_class = req.params.get("schoolClass").and_then(|v| v.as_i64());
    let school_year = req.params.get("schoolYear").and_then(|v| v.as_i64());
    let main_address = req.params.get("mainAddress").and_then(|v| v.as_str());

    let human_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO humans(id, first_name, last_name, gender, school_class, school_year, main_address)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &human_id,
            first_name,
            last_name,
            gender,
            school_class,
            school_year,
            main_address,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "humans" })),
        );
    }

    for address in string_list(&req.params, "emails") {
        if let Err(e) = conn.execute(
            "INSERT INTO emails(id, human_id, address, last_time_used) VALUES(?, ?, ?, NULL)",
            (Uuid::new_v4().to_string(), &human_id, &address),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "emails" })),
            );
        }
    }
    for number in string_list(&req.params, "phones") {
        if let Err(e) = conn.execute(
            "INSERT INTO phones(id, human_id, number, last_time_used) VALUES(?, ?, ?, NULL)",
            (Uuid::new_v4().to_string(), &human_id, &number),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "phones" })),
            );
        }
    }
    for section in string_list(&req.params, "academics") {
        if let Err(e) = conn.execute(
            "INSERT INTO academics(id, human_id, section) VALUES(?, ?, ?)",
            (Uuid::new_v4().to_string(), &human_id, &section),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "academics" })),
            );
        }
    }

    ok(&req.id, json!({ "humanId": human_id }))
}

/// Everything the operator (and the integration tests) need to see about
/// one person after a migration run.
fn handle_human_inspect(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(human_id) = req.params.get("humanId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing humanId", None);
    };

    let human = match conn
        .query_row(
            "SELECT first_name, last_name, gender, school_class, school_year, main_address
             FROM humans WHERE id = ?",
            [human_id],
            |r| {
                let first: String = r.get(0)?;
                let last: String = r.get(1)?;
                let gender: String = r.get(2)?;
                let school_class: Option<i64> = r.get(3)?;
                let school_year: Option<i64> = r.get(4)?;
                let main_address: Option<String> = r.get(5)?;
                Ok(json!({
                    "firstName": first,
                    "lastName": last,
                    "gender": gender,
                    "schoolClass": school_class,
                    "schoolYear": school_year,
                    "mainAddress": main_address
                }))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "human not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let collect = |sql: &str,
                   map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value>|
     -> Result<Vec<serde_json::Value>, rusqlite::Error> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([human_id], map)?;
        rows.collect()
    };

    let phones = collect(
        "SELECT number, last_time_used FROM phones WHERE human_id = ? ORDER BY number",
        |r| {
            let number: String = r.get(0)?;
            let last_time_used: Option<String> = r.get(1)?;
            Ok(json!({ "number": number, "lastTimeUsed": last_time_used }))
        },
    );
    let emails = collect(
        "SELECT address, last_time_used FROM emails WHERE human_id = ? ORDER BY address",
        |r| {
            let address: String = r.get(0)?;
            let last_time_used: Option<String> = r.get(1)?;
            Ok(json!({ "address": address, "lastTimeUsed": last_time_used }))
        },
    );
    let parents = collect(
        "SELECT h.id, h.first_name, h.last_name, h.gender, r.relation_type
         FROM parent_relations r JOIN humans h ON h.id = r.parent_id
         WHERE r.child_id = ? ORDER BY h.last_name, h.first_name",
        |r| {
            let id: String = r.get(0)?;
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            let gender: String = r.get(3)?;
            let relation_type: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "firstName": first,
                "lastName": last,
                "gender": gender,
                "relationType": relation_type
            }))
        },
    );
    let institutions = collect(
        "SELECT title FROM institutions WHERE human_id = ? ORDER BY title",
        |r| {
            let title: String = r.get(0)?;
            Ok(json!(title))
        },
    );
    let academics = collect(
        "SELECT id, section FROM academics WHERE human_id = ? ORDER BY section",
        |r| {
            let id: String = r.get(0)?;
            let section: String = r.get(1)?;
            Ok(json!({ "id": id, "section": section }))
        },
    );
    let participations = collect(
        "SELECT p.session_id, g.label, p.payment
         FROM participations p
         JOIN academics a ON a.id = p.academic_id
         JOIN session_groups g ON g.id = p.group_id
         WHERE a.human_id = ? ORDER BY g.label",
        |r| {
            let session_id: String = r.get(0)?;
            let label: String = r.get(1)?;
            let payment: i64 = r.get(2)?;
            Ok(json!({
                "sessionId": session_id,
                "groupLabel": label,
                "payment": payment
            }))
        },
    );

    match (phones, emails, parents, institutions, academics, participations) {
        (Ok(phones), Ok(emails), Ok(parents), Ok(institutions), Ok(academics), Ok(participations)) => {
            ok(
                &req.id,
                json!({
                    "human": human,
                    "phones": phones,
                    "emails": emails,
                    "parents": parents,
                    "institutions": institutions,
                    "academics": academics,
                    "participations": participations
                }),
            )
        }
        _ => err(&req.id, "db_query_failed", "failed to load related rows", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.human.create" => Some(handle_human_create(state, req)),
        "records.human.inspect" => Some(handle_human_inspect(state, req)),
        _ => None,
    }
}
