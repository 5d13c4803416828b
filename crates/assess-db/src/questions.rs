//! The ordered question list.

use crate::StoreError;
use assess_types::Question;
use rusqlite::{params, Connection};

/// Lists active questions in presentation order.
pub fn list_questions(conn: &Connection) -> Result<Vec<Question>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT question_id, text FROM questions
         WHERE active = 1
         ORDER BY position ASC, id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Question {
            id: row.get(0)?,
            text: row.get(1)?,
        })
    })?;

    let mut questions = Vec::new();
    for row in rows {
        questions.push(row?);
    }
    Ok(questions)
}

/// Seeds the question table when it is empty.
///
/// Returns the number of inserted questions; an already populated table is
/// left untouched and yields 0.
pub fn seed_questions(conn: &Connection, questions: &[Question]) -> Result<usize, StoreError> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    for (position, question) in questions.iter().enumerate() {
        if question.id.trim().is_empty() || question.text.trim().is_empty() {
            return Err(StoreError::Invalid(format!(
                "question at position {} has an empty id or text",
                position
            )));
        }
        tx.execute(
            "INSERT INTO questions (question_id, text, position) VALUES (?1, ?2, ?3)",
            params![question.id, question.text, position as i64],
        )?;
    }
    tx.commit()?;

    tracing::info!(count = questions.len(), "seeded question list");
    Ok(questions.len())
}

/// Looks up a single active question.
pub fn get_question(conn: &Connection, question_id: &str) -> Result<Question, StoreError> {
    list_questions(conn)?
        .into_iter()
        .find(|q| q.id == question_id)
        .ok_or_else(|| StoreError::NotFound(question_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;

    #[test]
    fn seed_only_once_and_keep_order() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let seed = vec![
            Question::new("q1", "¿Qué sabes de IA?"),
            Question::new("q2", "¿Cómo la usas en tu trabajo?"),
        ];
        assert_eq!(seed_questions(&conn, &seed).unwrap(), 2);
        assert_eq!(seed_questions(&conn, &seed[..1]).unwrap(), 0);

        let listed = list_questions(&conn).unwrap();
        assert_eq!(listed, seed);
        assert_eq!(get_question(&conn, "q2").unwrap().text, seed[1].text);
        assert!(matches!(
            get_question(&conn, "q9"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn seed_rejects_blank_questions() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let err = seed_questions(&conn, &[Question::new("q1", "  ")]).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(list_questions(&conn).unwrap().is_empty());
    }
}
