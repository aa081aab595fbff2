use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CourseId, StudentId};

/// Result of an enroll request. Serialized with an `outcome` tag so the HTTP
/// layer can hand it straight to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrollOutcome {
    Enrolled,
    Waitlisted { position: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    CancelledAndPromoted { promoted_student_id: StudentId },
    WaitlistRemoved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseSummary {
    pub course_id: CourseId,
    pub course_name: String,
    pub course_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub capacity: i64,
    pub enrolled_count: i64,
    pub waitlist_count: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewCourseRequest {
    pub course_name: String,
    pub course_code: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capacity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledCourse {
    pub course_id: CourseId,
    pub course_name: String,
    pub course_code: String,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistStanding {
    pub course_id: CourseId,
    pub position: i64,
}

/// Everything one student currently holds: active enrollments plus waitlist
/// positions, one entry per course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSchedule {
    pub enrolled: Vec<EnrolledCourse>,
    pub waitlist: Vec<WaitlistStanding>,
}
