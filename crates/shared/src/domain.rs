use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(StudentId);
id_newtype!(CourseId);
id_newtype!(WaitlistSeq);

/// A student's relationship to a single course. Exactly one of these holds
/// at any time; enroll/cancel are the only transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RegistrationState {
    Absent,
    Enrolled,
    Waitlisted { seq: WaitlistSeq },
}

impl RegistrationState {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Course capacity semantics: 0 admits unconditionally, any positive value
/// bounds the number of simultaneous active enrollments.
pub fn seat_available(capacity: i64, enrolled_count: i64) -> bool {
    capacity == 0 || enrolled_count < capacity
}
