use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{info, warn};

use crate::error::Error;
use crate::models::student::Student;

/// Subject registry: CRUD over enrolled students plus ownership of their
/// reference images on disk.
///
/// Label IDs are assigned as `max(existing) + 1` (0 for an empty registry)
/// inside an IMMEDIATE transaction, so concurrent registrations can never
/// hand out the same label.
pub struct StudentRegistry {
    conn: Arc<Mutex<Connection>>,
    images_dir: PathBuf,
}

impl StudentRegistry {
    pub fn new(conn: Arc<Mutex<Connection>>, images_dir: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&images_dir)?;
        Ok(Self { conn, images_dir })
    }

    pub fn register(&self, name: &str, department: &str, image: &[u8], mime: &str) -> Result<Student, Error> {
        let name = name.trim();
        let department = department.trim();
        if name.is_empty() {
            return Err(Error::Validation("student name is required".to_string()));
        }
        if department.is_empty() {
            return Err(Error::Validation("department is required".to_string()));
        }
        if image.is_empty() {
            return Err(Error::Validation("student image is required".to_string()));
        }

        let filename = format!(
            "{}_{}.{}",
            sanitize_name(name),
            Utc::now().timestamp_millis(),
            image_extension(mime)
        );
        let final_path = self.images_dir.join(&filename);
        let tmp_path = self.images_dir.join(format!("{filename}.tmp"));

        // Image bytes go to a temp path first; the row references the final
        // path and the rename only happens once the row is committed.
        fs::write(&tmp_path, image)?;

        let mut conn = self.conn.lock();
        let student = match insert_student(&mut conn, name, department, &final_path) {
            Ok(student) => student,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            let _ = conn.execute("DELETE FROM students WHERE id = ?1", [student.id]);
            return Err(Error::Storage(format!(
                "failed to persist image {}: {e}",
                final_path.display()
            )));
        }

        info!("registered student {} with label ID {}", student.name, student.label_id);
        Ok(student)
    }

    pub fn list(&self) -> Result<Vec<Student>, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, department, image_path, label_id, created_at FROM students ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_student)?;
        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }

    pub fn find(&self, id: i64) -> Result<Student, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, department, image_path, label_id, created_at FROM students WHERE id = ?1",
        )?;
        stmt.query_row([id], row_to_student)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("student not found with ID {id}")))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Student, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, department, image_path, label_id, created_at FROM students WHERE name = ?1",
        )?;
        stmt.query_row([name], row_to_student)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("student not found with name '{name}'")))
    }

    pub fn find_by_label(&self, label_id: i32) -> Result<Student, Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, department, image_path, label_id, created_at FROM students WHERE label_id = ?1",
        )?;
        stmt.query_row([label_id], row_to_student)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("student not found with label ID {label_id}")))
    }

    /// Deletes the row, then the image artifact. A missing artifact is not
    /// an error.
    pub fn delete(&self, id: i64) -> Result<(), Error> {
        let student = self.find(id)?;
        {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM students WHERE id = ?1", [id])?;
        }
        match fs::remove_file(&student.image_path) {
            Ok(()) => info!("deleted student image {}", student.image_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to delete image {}: {e}",
                    student.image_path
                )))
            }
        }
        info!("deleted student {}", student.name);
        Ok(())
    }
}

fn insert_student(
    conn: &mut Connection,
    name: &str,
    department: &str,
    image_path: &Path,
) -> Result<Student, Error> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let exists: bool =
        tx.query_row("SELECT EXISTS(SELECT 1 FROM students WHERE name = ?1)", [name], |r| r.get(0))?;
    if exists {
        return Err(Error::Conflict(format!("student with name '{name}' already exists")));
    }
    let label_id: i32 =
        tx.query_row("SELECT COALESCE(MAX(label_id) + 1, 0) FROM students", [], |r| r.get(0))?;
    let created_at = Utc::now().timestamp();
    tx.execute(
        "INSERT INTO students (name, department, image_path, label_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![name, department, image_path.to_string_lossy(), label_id, created_at],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(Student {
        id,
        name: name.to_string(),
        department: department.to_string(),
        image_path: image_path.to_string_lossy().into_owned(),
        label_id,
        created_at,
    })
}

fn row_to_student(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get("id")?,
        name: row.get("name")?,
        department: row.get("department")?,
        image_path: row.get("image_path")?,
        label_id: row.get("label_id")?,
        created_at: row.get("created_at")?,
    })
}

/// Image filenames embed the student name; everything outside `[A-Za-z0-9]`
/// becomes `_` so the name can never traverse out of the images directory.
pub fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

fn image_extension(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        other => {
            if !other.is_empty() && other != "image/jpeg" && other != "image/jpg" {
                warn!("unrecognized image MIME type '{other}', storing as jpg");
            }
            "jpg"
        }
    }
}
