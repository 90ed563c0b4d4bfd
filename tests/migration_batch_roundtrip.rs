use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_sessregd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sessregd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn chosen_candidate_is_migrated_and_unchosen_one_is_left_alone() {
    let workspace = temp_dir("sessreg-batch");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.create",
        json!({
            "year": 2011,
            "season": "autumn",
            "begin": "2011-10-28",
            "programBased": true
        }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "placements.import",
        json!({ "placements": [{ "title": "Robotika" }] }),
    );
    let robotika_id = imported
        .pointer("/placements/0/id")
        .and_then(|v| v.as_str())
        .expect("placement id")
        .to_string();

    // Ona already lives in the permanent records; Jonas does not, but he
    // is never chosen so it must not matter.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.human.create",
        json!({
            "firstName": "Ona",
            "lastName": "Onaitė",
            "gender": "F",
            "schoolClass": 9,
            "schoolYear": 2010,
            "mainAddress": "Gedimino pr. 1, Vilnius",
            "emails": ["ona@example.com"],
            "academics": ["MAT"]
        }),
    );
    let ona_id = created
        .get("humanId")
        .and_then(|v| v.as_str())
        .expect("humanId")
        .to_string();

    let ona_reg = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "registration.submit",
        json!({
            "firstName": "Ona",
            "lastName": "Onaitė",
            "email": "Ona@Example.com",
            "phoneNumber": "+37060000000",
            "school": "Vilniaus licėjus",
            "schoolClass": 10,
            "schoolYear": 2011,
            "section": "Mat",
            "payment": 100,
            "parents": [
                {
                    "relation": "mother",
                    "firstName": "Rasa",
                    "lastName": "Onaitienė",
                    "phoneNumber": "+37061111111",
                    "email": "rasa@example.com",
                    "job": "gydytoja"
                }
            ]
        }),
    );
    let ona_reg_id = ona_reg
        .get("registrationId")
        .and_then(|v| v.as_str())
        .expect("registrationId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "registration.submit",
        json!({
            "firstName": "Jonas",
            "lastName": "Jonaitis",
            "email": "jonas@example.com",
            "phoneNumber": "+37062222222",
            "school": "Kauno gimnazija",
            "schoolClass": 11,
            "schoolYear": 2011,
            "section": "Fiz",
            "payment": 100
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "registration.choose",
        json!({
            "registrationId": ona_reg_id,
            "chosen": true,
            "payed": true,
            "placementId": robotika_id
        }),
    );

    let run = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "migration.run",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(run.get("candidates").and_then(|v| v.as_i64()), Some(2));
    let diagnostics = run
        .get("diagnostics")
        .and_then(|v| v.as_array())
        .expect("diagnostics array");
    // The unchosen Jonas produces nothing at all, not even an "ignored".
    for diag in diagnostics {
        let text = diag.to_string();
        assert!(!text.contains("Jonas"), "unexpected diagnostic: {}", text);
    }
    let created_kinds: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.get("kind").and_then(|v| v.as_str()) == Some("created"))
        .filter_map(|d| d.get("entity").and_then(|v| v.as_str()))
        .collect();
    assert!(created_kinds.contains(&"phone"), "{:?}", created_kinds);
    assert!(created_kinds.contains(&"parent"), "{:?}", created_kinds);
    assert!(
        created_kinds.contains(&"participation"),
        "{:?}",
        created_kinds
    );

    let inspected = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "records.human.inspect",
        json!({ "humanId": ona_id }),
    );
    // School progress moved forward one class and one year together.
    assert_eq!(
        inspected.pointer("/human/schoolClass").and_then(|v| v.as_i64()),
        Some(10)
    );
    assert_eq!(
        inspected.pointer("/human/schoolYear").and_then(|v| v.as_i64()),
        Some(2011)
    );
    // New contacts get the backdated staleness marker (begin - 10 days).
    assert_eq!(
        inspected.pointer("/phones/0/number").and_then(|v| v.as_str()),
        Some("+37060000000")
    );
    assert_eq!(
        inspected
            .pointer("/phones/0/lastTimeUsed")
            .and_then(|v| v.as_str()),
        Some("2011-10-18")
    );
    // The email matched case-insensitively, so no second row appeared.
    assert_eq!(
        inspected.get("emails").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    assert_eq!(
        inspected.pointer("/parents/0/firstName").and_then(|v| v.as_str()),
        Some("Rasa")
    );
    assert_eq!(
        inspected.pointer("/parents/0/gender").and_then(|v| v.as_str()),
        Some("F")
    );
    assert_eq!(
        inspected
            .pointer("/parents/0/relationType")
            .and_then(|v| v.as_str()),
        Some("parent")
    );
    let participations = inspected
        .get("participations")
        .and_then(|v| v.as_array())
        .expect("participations array");
    assert_eq!(participations.len(), 1);
    assert_eq!(
        participations[0].get("sessionId").and_then(|v| v.as_str()),
        Some(session_id.as_str())
    );
    assert_eq!(
        participations[0].get("groupLabel").and_then(|v| v.as_str()),
        Some(format!("{} Robotika", robotika_id).as_str())
    );
    assert_eq!(
        participations[0].get("payment").and_then(|v| v.as_i64()),
        Some(100)
    );
}
