use anyhow::bail;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::model::Person;

/// Handle on the permanent contacts/academics records, scoped to the batch
/// transaction. Every mutation the migration performs goes through here.
pub struct Records<'c> {
    conn: &'c Connection,
}

const PERSON_COLUMNS: &str =
    "id, first_name, last_name, gender, school_class, school_year, main_address";

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        gender: row.get(3)?,
        school_class: row.get(4)?,
        school_year: row.get(5)?,
        main_address: row.get(6)?,
    })
}

impl<'c> Records<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Records { conn }
    }

    /// Identity lookup: exact first/last name, case-insensitive email match
    /// against the person's own email contacts. More than one matching
    /// person is a data-integrity problem and fails the whole batch rather
    /// than guessing "first match wins".
    pub fn find_person(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> anyhow::Result<Option<Person>> {
        let sql = format!(
            "SELECT DISTINCT h.{} FROM humans h
             JOIN emails e ON e.human_id = h.id
             WHERE h.first_name = ?1 AND h.last_name = ?2
               AND lower(e.address) = lower(?3)",
            PERSON_COLUMNS.replace(", ", ", h.")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let matches = stmt
            .query_map((first_name, last_name, email), person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            n => bail!(
                "ambiguous identity: {} persons match {} {} <{}>",
                n,
                first_name,
                last_name,
                email
            ),
        }
    }

    /// Lookup scoped to the student's own parent set.
    pub fn find_parent_of(
        &self,
        child_id: &str,
        first_name: &str,
        last_name: &str,
    ) -> anyhow::Result<Option<Person>> {
        let sql = format!(
            "SELECT h.{} FROM humans h
             JOIN parent_relations r ON r.parent_id = h.id
             WHERE r.child_id = ?1 AND h.first_name = ?2 AND h.last_name = ?3",
            PERSON_COLUMNS.replace(", ", ", h.")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let matches = stmt
            .query_map((child_id, first_name, last_name), person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            n => bail!(
                "student {} has {} parents named {} {}",
                child_id,
                n,
                first_name,
                last_name
            ),
        }
    }

    pub fn find_persons_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> anyhow::Result<Vec<Person>> {
        let sql = format!(
            "SELECT {} FROM humans WHERE first_name = ?1 AND last_name = ?2 ORDER BY id",
            PERSON_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let persons = stmt
            .query_map((first_name, last_name), person_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(persons)
    }

    pub fn create_person(
        &self,
        first_name: &str,
        last_name: &str,
        gender: &str,
    ) -> anyhow::Result<Person> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO humans(id, first_name, last_name, gender) VALUES(?, ?, ?, ?)",
            (&id, first_name, last_name, gender),
        )?;
        Ok(Person {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            gender: gender.to_string(),
            school_class: None,
            school_year: None,
            main_address: None,
        })
    }

    pub fn has_parents(&self, child_id: &str) -> anyhow::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM parent_relations WHERE child_id = ?",
            [child_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn create_family_relation(
        &self,
        child_id: &str,
        parent_id: &str,
        relation_type: &str,
    ) -> anyhow::Result<()> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO parent_relations(id, child_id, parent_id, relation_type)
             VALUES(?, ?, ?, ?)",
            (&id, child_id, parent_id, relation_type),
        )?;
        Ok(())
    }

    // Contact dedup is scoped to the owner. A phone number or email shared
    // by unrelated people (siblings, a family landline) must not suppress
    // creation for the second owner.
    pub fn find_phone(&self, owner_id: &str, number: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM phones WHERE human_id = ? AND number = ?",
                (owner_id, number),
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn create_phone(
        &self,
        owner_id: &str,
        number: &str,
        last_time_used: NaiveDate,
    ) -> anyhow::Result<()> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO phones(id, human_id, number, last_time_used) VALUES(?, ?, ?, ?)",
            (&id, owner_id, number, last_time_used.format("%Y-%m-%d").to_string()),
        )?;
        Ok(())
    }

    pub fn find_email(&self, owner_id: &str, address: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM emails WHERE human_id = ? AND lower(address) = lower(?)",
                (owner_id, address),
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn create_email(
        &self,
        owner_id: &str,
        address: &str,
        last_time_used: NaiveDate,
    ) -> anyhow::Result<()> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO emails(id, human_id, address, last_time_used) VALUES(?, ?, ?, ?)",
            (&id, owner_id, address, last_time_used.format("%Y-%m-%d").to_string()),
        )?;
        Ok(())
    }

    pub fn has_institution(&self, human_id: &str) -> anyhow::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM institutions WHERE human_id = ?",
            [human_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn create_institution(&self, human_id: &str, title: &str) -> anyhow::Result<()> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO institutions(id, human_id, title) VALUES(?, ?, ?)",
            (&id, human_id, title),
        )?;
        Ok(())
    }

    /// The person's pre-existing enrollment in a subject area.
    pub fn find_academic(&self, human_id: &str, section: &str) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM academics WHERE human_id = ? AND section = ?",
                (human_id, section),
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn find_or_create_group(&self, session_id: &str, label: &str) -> anyhow::Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM session_groups WHERE session_id = ? AND label = ?",
                (session_id, label),
                |r| r.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO session_groups(id, session_id, label) VALUES(?, ?, ?)",
            (&id, session_id, label),
        )?;
        Ok(id)
    }

    pub fn find_participation(
        &self,
        academic_id: &str,
        session_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM participations WHERE academic_id = ? AND session_id = ?",
                (academic_id, session_id),
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn create_participation(
        &self,
        academic_id: &str,
        session_id: &str,
        group_id: &str,
        payment: i64,
    ) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO participations(id, academic_id, session_id, group_id, payment)
             VALUES(?, ?, ?, ?, ?)",
            (&id, academic_id, session_id, group_id, payment),
        )?;
        Ok(id)
    }

    /// Both fields move together; callers enforce the monotonic rule.
    pub fn update_school_progress(
        &self,
        human_id: &str,
        school_class: i64,
        school_year: i64,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE humans SET school_class = ?, school_year = ? WHERE id = ?",
            (school_class, school_year, human_id),
        )?;
        Ok(())
    }
}
