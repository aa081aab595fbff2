use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, Transaction,
};
use thiserror::Error;
use tokio::sync::{Mutex as CourseLock, OwnedMutexGuard};

use shared::domain::{CourseId, RegistrationState, StudentId, WaitlistSeq};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness invariant lost a race. Expected under concurrency; the
    /// caller decides what it means for the operation at hand.
    #[error("unique constraint violated")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Internal(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict,
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err),
            _ => Self::Internal(err),
        }
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    course_locks: Arc<Mutex<HashMap<i64, Arc<CourseLock<()>>>>>,
}

#[derive(Debug, Clone)]
pub struct CourseRow {
    pub course_id: CourseId,
    pub course_name: String,
    pub course_code: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub capacity: i64,
}

#[derive(Debug, Clone)]
pub struct CourseOccupancyRow {
    pub course: CourseRow,
    pub enrolled_count: i64,
    pub waitlist_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub course_name: String,
    pub course_code: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub capacity: i64,
}

#[derive(Debug, Clone)]
pub struct EnrolledCourseRow {
    pub course_id: CourseId,
    pub course_name: String,
    pub course_code: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct WaitlistEntryRow {
    pub seq: WaitlistSeq,
    pub student_id: StudentId,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(StoreError::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            course_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn create_student(&self, username: &str) -> Result<StudentId, StoreError> {
        let rec = sqlx::query(
            "INSERT INTO students (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(StudentId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT username FROM students WHERE id = ?")
            .bind(student_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Negative capacities are clamped to 0 (which admits unconditionally).
    pub async fn create_course(&self, course: &NewCourse) -> Result<CourseId, StoreError> {
        let capacity = course.capacity.max(0);
        let rec = sqlx::query(
            "INSERT INTO courses (course_name, course_code, course_start_date, course_end_date, description, capacity)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&course.course_name)
        .bind(&course.course_code)
        .bind(course.start_date)
        .bind(course.end_date)
        .bind(course.description.as_deref())
        .bind(capacity)
        .fetch_one(&self.pool)
        .await?;
        Ok(CourseId(rec.get::<i64, _>(0)))
    }

    pub async fn course_by_id(&self, course_id: CourseId) -> Result<Option<CourseRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, course_name, course_code, course_start_date, course_end_date, description, capacity
             FROM courses
             WHERE id = ?",
        )
        .bind(course_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| course_row(&r)))
    }

    pub async fn list_courses_with_occupancy(&self) -> Result<Vec<CourseOccupancyRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT
               c.id, c.course_name, c.course_code, c.course_start_date, c.course_end_date,
               c.description, c.capacity,
               (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrolled_count,
               (SELECT COUNT(*) FROM waitlist w WHERE w.course_id = c.id) AS waitlist_count
             FROM courses c
             ORDER BY c.course_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CourseOccupancyRow {
                course: course_row(&r),
                enrolled_count: r.get::<i64, _>(7),
                waitlist_count: r.get::<i64, _>(8),
            })
            .collect())
    }

    pub async fn enrolled_courses_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<EnrolledCourseRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.course_name, c.course_code, e.created_at
             FROM enrollments e
             INNER JOIN courses c ON e.course_id = c.id
             WHERE e.student_id = ?
             ORDER BY c.course_name",
        )
        .bind(student_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| EnrolledCourseRow {
                course_id: CourseId(r.get::<i64, _>(0)),
                course_name: r.get::<String, _>(1),
                course_code: r.get::<String, _>(2),
                enrolled_at: r.get::<DateTime<Utc>, _>(3),
            })
            .collect())
    }

    pub async fn waitlist_standings_for_student(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<(CourseId, i64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT w.course_id,
                    (SELECT COUNT(*) FROM waitlist w2
                     WHERE w2.course_id = w.course_id AND w2.seq <= w.seq) AS position
             FROM waitlist w
             WHERE w.student_id = ?
             ORDER BY w.course_id",
        )
        .bind(student_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (CourseId(r.get::<i64, _>(0)), r.get::<i64, _>(1)))
            .collect())
    }

    /// Opens the exclusive per-course critical section: the course's
    /// admission lock plus a fresh transaction. Returns `None` when no such
    /// course exists. Operations on other courses are unaffected.
    ///
    /// Dropping the returned section without [`CourseSection::commit`] rolls
    /// back every write made inside it.
    pub async fn begin_course(
        &self,
        course_id: CourseId,
    ) -> Result<Option<CourseSection>, StoreError> {
        let lock = {
            let mut locks = self
                .course_locks
                .lock()
                .expect("course lock registry poisoned");
            Arc::clone(locks.entry(course_id.0).or_default())
        };
        let permit = lock.lock_owned().await;

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id, course_name, course_code, course_start_date, course_end_date, description, capacity
             FROM courses
             WHERE id = ?",
        )
        .bind(course_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(CourseSection {
            _permit: permit,
            tx,
            course: course_row(&row),
        }))
    }
}

/// Exclusive critical section over one course. All reads reflect committed
/// state for the course, and no other enroll/cancel for the same course can
/// interleave while this is held.
pub struct CourseSection {
    _permit: OwnedMutexGuard<()>,
    tx: Transaction<'static, Sqlite>,
    course: CourseRow,
}

impl CourseSection {
    pub fn course(&self) -> &CourseRow {
        &self.course
    }

    pub async fn registration_state(
        &mut self,
        student_id: StudentId,
    ) -> Result<RegistrationState, StoreError> {
        let enrolled = sqlx::query("SELECT 1 FROM enrollments WHERE student_id = ? AND course_id = ?")
            .bind(student_id.0)
            .bind(self.course.course_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        if enrolled.is_some() {
            return Ok(RegistrationState::Enrolled);
        }

        let waitlisted = sqlx::query("SELECT seq FROM waitlist WHERE student_id = ? AND course_id = ?")
            .bind(student_id.0)
            .bind(self.course.course_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(match waitlisted {
            Some(r) => RegistrationState::Waitlisted {
                seq: WaitlistSeq(r.get::<i64, _>(0)),
            },
            None => RegistrationState::Absent,
        })
    }

    pub async fn count_enrollments(&mut self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE course_id = ?")
            .bind(self.course.course_id.0)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    pub async fn count_waitlist(&mut self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waitlist WHERE course_id = ?")
            .bind(self.course.course_id.0)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    /// Fails with [`StoreError::Conflict`] when the student already holds an
    /// enrollment for this course.
    pub async fn insert_enrollment(&mut self, student_id: StudentId) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO enrollments (student_id, course_id) VALUES (?, ?)")
            .bind(student_id.0)
            .bind(self.course.course_id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn delete_enrollment(&mut self, student_id: StudentId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM enrollments WHERE student_id = ? AND course_id = ?")
            .bind(student_id.0)
            .bind(self.course.course_id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Appends at the waitlist tail and returns the assigned sequence.
    pub async fn insert_waitlist_entry(
        &mut self,
        student_id: StudentId,
    ) -> Result<WaitlistSeq, StoreError> {
        let rec = sqlx::query(
            "INSERT INTO waitlist (student_id, course_id) VALUES (?, ?) RETURNING seq",
        )
        .bind(student_id.0)
        .bind(self.course.course_id.0)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(WaitlistSeq(rec.get::<i64, _>(0)))
    }

    pub async fn delete_waitlist_entry(
        &mut self,
        student_id: StudentId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM waitlist WHERE student_id = ? AND course_id = ?")
            .bind(student_id.0)
            .bind(self.course.course_id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes and returns the earliest waitlist entry for this course, the
    /// single candidate for promotion when a seat frees.
    pub async fn take_earliest_waitlist_entry(
        &mut self,
    ) -> Result<Option<WaitlistEntryRow>, StoreError> {
        let row = sqlx::query(
            "DELETE FROM waitlist
             WHERE seq = (
                SELECT seq FROM waitlist
                WHERE course_id = ?
                ORDER BY seq ASC
                LIMIT 1
             )
             RETURNING seq, student_id",
        )
        .bind(self.course.course_id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| WaitlistEntryRow {
            seq: WaitlistSeq(r.get::<i64, _>(0)),
            student_id: StudentId(r.get::<i64, _>(1)),
        }))
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn course_row(r: &sqlx::sqlite::SqliteRow) -> CourseRow {
    CourseRow {
        course_id: CourseId(r.get::<i64, _>(0)),
        course_name: r.get::<String, _>(1),
        course_code: r.get::<String, _>(2),
        start_date: r.get::<Option<NaiveDate>, _>(3),
        end_date: r.get::<Option<NaiveDate>, _>(4),
        description: r.get::<Option<String>, _>(5),
        capacity: r.get::<i64, _>(6),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<(), StoreError> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(sqlx::Error::Io(e)))?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
