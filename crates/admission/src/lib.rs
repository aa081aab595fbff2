use shared::{
    domain::{seat_available, CourseId, RegistrationState, StudentId},
    error::AdmissionError,
    protocol::{
        CancelOutcome, CourseSummary, EnrollOutcome, EnrolledCourse, NewCourseRequest,
        StudentSchedule, WaitlistStanding,
    },
};
use storage::{CourseSection, NewCourse, Storage, StoreError};
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Decides enroll-vs-waitlist for one student inside the course's exclusive
/// critical section. The occupancy read and the resulting write commit as one
/// unit; no other request for the same course can observe an intermediate
/// state.
pub async fn enroll(
    ctx: &ApiContext,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<EnrollOutcome, AdmissionError> {
    let ctx = ctx.clone();
    // Detached: a caller that gives up mid-flight cannot abort the critical
    // section. The section either commits fully or rolls back on its own.
    tokio::spawn(async move { enroll_locked(&ctx, student_id, course_id).await })
        .await
        .map_err(|e| AdmissionError::Internal(e.to_string()))?
}

async fn enroll_locked(
    ctx: &ApiContext,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<EnrollOutcome, AdmissionError> {
    let mut section = open_section(ctx, course_id).await?;

    match section
        .registration_state(student_id)
        .await
        .map_err(store_error)?
    {
        RegistrationState::Enrolled => return Err(AdmissionError::AlreadyEnrolled),
        RegistrationState::Waitlisted { .. } => return Err(AdmissionError::AlreadyWaitlisted),
        RegistrationState::Absent => {}
    }

    let capacity = section.course().capacity;
    let enrolled_count = section.count_enrollments().await.map_err(store_error)?;

    if seat_available(capacity, enrolled_count) {
        section
            .insert_enrollment(student_id)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => AdmissionError::AlreadyEnrolled,
                other => store_error(other),
            })?;
        section.commit().await.map_err(store_error)?;
        Ok(EnrollOutcome::Enrolled)
    } else {
        section
            .insert_waitlist_entry(student_id)
            .await
            .map_err(|e| match e {
                StoreError::Conflict => AdmissionError::AlreadyWaitlisted,
                other => store_error(other),
            })?;
        let position = section.count_waitlist().await.map_err(store_error)?;
        section.commit().await.map_err(store_error)?;
        Ok(EnrollOutcome::Waitlisted { position })
    }
}

/// Cancels a student's enrollment or waitlist entry. Freeing a seat and
/// promoting the earliest waitlisted student happen in the same critical
/// section, so a freed seat is never visible to a competing enroll request
/// before the rightful student takes it.
pub async fn cancel(
    ctx: &ApiContext,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<CancelOutcome, AdmissionError> {
    let ctx = ctx.clone();
    tokio::spawn(async move { cancel_locked(&ctx, student_id, course_id).await })
        .await
        .map_err(|e| AdmissionError::Internal(e.to_string()))?
}

async fn cancel_locked(
    ctx: &ApiContext,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<CancelOutcome, AdmissionError> {
    let mut section = open_section(ctx, course_id).await?;

    if section
        .delete_enrollment(student_id)
        .await
        .map_err(store_error)?
    {
        let promoted = section
            .take_earliest_waitlist_entry()
            .await
            .map_err(store_error)?;
        return match promoted {
            Some(entry) => {
                section
                    .insert_enrollment(entry.student_id)
                    .await
                    .map_err(store_error)?;
                section.commit().await.map_err(store_error)?;
                info!(
                    course_id = course_id.0,
                    promoted_student_id = entry.student_id.0,
                    "waitlist promotion"
                );
                Ok(CancelOutcome::CancelledAndPromoted {
                    promoted_student_id: entry.student_id,
                })
            }
            None => {
                section.commit().await.map_err(store_error)?;
                Ok(CancelOutcome::Cancelled)
            }
        };
    }

    if section
        .delete_waitlist_entry(student_id)
        .await
        .map_err(store_error)?
    {
        section.commit().await.map_err(store_error)?;
        return Ok(CancelOutcome::WaitlistRemoved);
    }

    Err(AdmissionError::NotEnrolledOrWaitlisted)
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<StudentId, AdmissionError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AdmissionError::Validation("username is required".into()));
    }
    ctx.storage
        .create_student(username)
        .await
        .map_err(store_error)
}

pub async fn create_course(
    ctx: &ApiContext,
    request: &NewCourseRequest,
) -> Result<CourseId, AdmissionError> {
    let name = request.course_name.trim();
    let code = request.course_code.trim();
    if name.is_empty() {
        return Err(AdmissionError::Validation("course_name is required".into()));
    }
    if code.is_empty() {
        return Err(AdmissionError::Validation("course_code is required".into()));
    }

    ctx.storage
        .create_course(&NewCourse {
            course_name: name.to_string(),
            course_code: code.to_string(),
            start_date: request.start_date,
            end_date: request.end_date,
            description: request.description.clone(),
            capacity: request.capacity,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict => AdmissionError::DuplicateCourseCode,
            other => store_error(other),
        })
}

pub async fn list_courses(ctx: &ApiContext) -> Result<Vec<CourseSummary>, AdmissionError> {
    let rows = ctx
        .storage
        .list_courses_with_occupancy()
        .await
        .map_err(store_error)?;
    Ok(rows
        .into_iter()
        .map(|row| CourseSummary {
            course_id: row.course.course_id,
            course_name: row.course.course_name,
            course_code: row.course.course_code,
            start_date: row.course.start_date,
            end_date: row.course.end_date,
            description: row.course.description,
            capacity: row.course.capacity,
            enrolled_count: row.enrolled_count,
            waitlist_count: row.waitlist_count,
        })
        .collect())
}

pub async fn student_schedule(
    ctx: &ApiContext,
    student_id: StudentId,
) -> Result<StudentSchedule, AdmissionError> {
    let enrolled = ctx
        .storage
        .enrolled_courses_for_student(student_id)
        .await
        .map_err(store_error)?;
    let waitlist = ctx
        .storage
        .waitlist_standings_for_student(student_id)
        .await
        .map_err(store_error)?;

    Ok(StudentSchedule {
        enrolled: enrolled
            .into_iter()
            .map(|row| EnrolledCourse {
                course_id: row.course_id,
                course_name: row.course_name,
                course_code: row.course_code,
                enrolled_at: row.enrolled_at,
            })
            .collect(),
        waitlist: waitlist
            .into_iter()
            .map(|(course_id, position)| WaitlistStanding {
                course_id,
                position,
            })
            .collect(),
    })
}

async fn open_section(
    ctx: &ApiContext,
    course_id: CourseId,
) -> Result<CourseSection, AdmissionError> {
    ctx.storage
        .begin_course(course_id)
        .await
        .map_err(store_error)?
        .ok_or(AdmissionError::CourseNotFound)
}

fn store_error(err: StoreError) -> AdmissionError {
    match err {
        StoreError::Unavailable(source) => AdmissionError::Unavailable(source.to_string()),
        other => AdmissionError::Internal(other.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
