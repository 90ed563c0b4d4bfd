use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("sessreg.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Creates every table idempotently. The records side mirrors the permanent
/// contacts/academics database the migration writes into; the registration
/// side holds what the (external) web form collected.
pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS humans(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            school_class INTEGER,
            school_year INTEGER,
            main_address TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_humans_name ON humans(first_name, last_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS phones(
            id TEXT PRIMARY KEY,
            human_id TEXT NOT NULL,
            number TEXT NOT NULL,
            last_time_used TEXT,
            FOREIGN KEY(human_id) REFERENCES humans(id),
            UNIQUE(human_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS emails(
            id TEXT PRIMARY KEY,
            human_id TEXT NOT NULL,
            address TEXT NOT NULL,
            last_time_used TEXT,
            FOREIGN KEY(human_id) REFERENCES humans(id),
            UNIQUE(human_id, address)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emails_address ON emails(address)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_relations(
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            FOREIGN KEY(child_id) REFERENCES humans(id),
            FOREIGN KEY(parent_id) REFERENCES humans(id),
            UNIQUE(child_id, parent_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_relations_child ON parent_relations(child_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            human_id TEXT NOT NULL,
            title TEXT NOT NULL,
            FOREIGN KEY(human_id) REFERENCES humans(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academics(
            id TEXT PRIMARY KEY,
            human_id TEXT NOT NULL,
            section TEXT NOT NULL,
            FOREIGN KEY(human_id) REFERENCES humans(id),
            UNIQUE(human_id, section)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            season TEXT NOT NULL,
            begin_date TEXT NOT NULL,
            program_based INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_groups(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            label TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            UNIQUE(session_id, label)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS participations(
            id TEXT PRIMARY KEY,
            academic_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            payment INTEGER NOT NULL,
            FOREIGN KEY(academic_id) REFERENCES academics(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(group_id) REFERENCES session_groups(id),
            UNIQUE(academic_id, session_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS placements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL UNIQUE,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            school TEXT NOT NULL,
            school_class INTEGER NOT NULL,
            school_year INTEGER NOT NULL,
            section TEXT NOT NULL,
            placement_id TEXT,
            payment INTEGER NOT NULL,
            payed INTEGER NOT NULL DEFAULT 0,
            chosen INTEGER NOT NULL DEFAULT 0,
            home_address TEXT,
            comment TEXT,
            commit_timestamp TEXT NOT NULL,
            FOREIGN KEY(placement_id) REFERENCES placements(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_name ON registrations(last_name, first_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registration_parents(
            id TEXT PRIMARY KEY,
            registration_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            email TEXT NOT NULL,
            job TEXT NOT NULL,
            FOREIGN KEY(registration_id) REFERENCES registrations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registration_parents_reg ON registration_parents(registration_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS placement_ratings(
            id TEXT PRIMARY KEY,
            registration_id TEXT NOT NULL,
            placement_id TEXT NOT NULL,
            rating INTEGER NOT NULL,
            comment TEXT,
            FOREIGN KEY(registration_id) REFERENCES registrations(id),
            FOREIGN KEY(placement_id) REFERENCES placements(id),
            UNIQUE(registration_id, placement_id)
        )",
        [],
    )?;

    Ok(())
}
