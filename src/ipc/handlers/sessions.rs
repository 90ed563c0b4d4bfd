use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Season;

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing year", None);
    };
    let Some(season) = req
        .params
        .get("season")
        .and_then(|v| v.as_str())
        .and_then(Season::parse)
    else {
        return err(
            &req.id,
            "bad_params",
            "season must be one of winter/spring/summer/autumn",
            None,
        );
    };
    let begin = req
        .params
        .get("begin")
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let Some(begin) = begin else {
        return err(&req.id, "bad_params", "begin must be YYYY-MM-DD", None);
    };
    let program_based = req
        .params
        .get("programBased")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let session_id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO sessions(id, year, season, begin_date, program_based)
         VALUES(?, ?, ?, ?, ?)",
        (
            &session_id,
            year,
            season.as_str(),
            begin.format("%Y-%m-%d").to_string(),
            program_based as i64,
        ),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "sessionId": session_id })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        ),
    }
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sessions": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year, season, begin_date, program_based FROM sessions
         ORDER BY year, season",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let year: i64 = row.get(1)?;
            let season: String = row.get(2)?;
            let begin: String = row.get(3)?;
            let program_based: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "year": year,
                "season": season,
                "begin": begin,
                "programBased": program_based != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        _ => None,
    }
}
