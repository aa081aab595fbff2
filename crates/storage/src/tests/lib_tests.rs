use super::*;

fn course(name: &str, code: &str, capacity: i64) -> NewCourse {
    NewCourse {
        course_name: name.to_string(),
        course_code: code.to_string(),
        start_date: None,
        end_date: None,
        description: None,
        capacity,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("temp root");
    let db_path = temp_root.path().join("nested").join("registrar.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn create_student_is_stable_for_same_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage.create_student("alice").await.expect("student");
    let second = storage.create_student("alice").await.expect("student");
    assert_eq!(first, second);

    let username = storage
        .username_for_student(first)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(username, "alice");
}

#[tokio::test]
async fn stores_course_and_reads_it_back() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let course_id = storage
        .create_course(&course("Systems Programming", "CS3210", 30))
        .await
        .expect("course");

    let row = storage
        .course_by_id(course_id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(row.course_name, "Systems Programming");
    assert_eq!(row.course_code, "CS3210");
    assert_eq!(row.capacity, 30);
}

#[tokio::test]
async fn clamps_negative_capacity_to_zero() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let course_id = storage
        .create_course(&course("Open Seminar", "SEM100", -5))
        .await
        .expect("course");

    let row = storage
        .course_by_id(course_id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(row.capacity, 0);
}

#[tokio::test]
async fn duplicate_course_code_surfaces_conflict() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_course(&course("Algorithms", "CS4500", 10))
        .await
        .expect("course");

    let err = storage
        .create_course(&course("Algorithms Again", "CS4500", 10))
        .await
        .expect_err("should conflict");
    assert!(matches!(err, StoreError::Conflict));
}

#[tokio::test]
async fn begin_course_returns_none_for_missing_course() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let section = storage.begin_course(CourseId(999)).await.expect("begin");
    assert!(section.is_none());
}

#[tokio::test]
async fn registration_state_tracks_enrollment_and_waitlist() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_student("alice").await.expect("student");
    let bob = storage.create_student("bob").await.expect("student");
    let course_id = storage
        .create_course(&course("Databases", "CS4400", 1))
        .await
        .expect("course");

    let mut section = storage
        .begin_course(course_id)
        .await
        .expect("begin")
        .expect("course exists");

    assert!(section
        .registration_state(alice)
        .await
        .expect("state")
        .is_absent());

    section.insert_enrollment(alice).await.expect("enroll");
    assert_eq!(
        section.registration_state(alice).await.expect("state"),
        RegistrationState::Enrolled
    );

    let seq = section.insert_waitlist_entry(bob).await.expect("waitlist");
    assert_eq!(
        section.registration_state(bob).await.expect("state"),
        RegistrationState::Waitlisted { seq }
    );

    section.commit().await.expect("commit");
}

#[tokio::test]
async fn duplicate_enrollment_insert_surfaces_conflict() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_student("alice").await.expect("student");
    let course_id = storage
        .create_course(&course("Networks", "CS3251", 5))
        .await
        .expect("course");

    let mut section = storage
        .begin_course(course_id)
        .await
        .expect("begin")
        .expect("course exists");
    section.insert_enrollment(alice).await.expect("first insert");

    let err = section
        .insert_enrollment(alice)
        .await
        .expect_err("duplicate should conflict");
    assert!(matches!(err, StoreError::Conflict));
}

#[tokio::test]
async fn waitlist_sequence_is_strictly_increasing_and_fifo() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let course_id = storage
        .create_course(&course("Compilers", "CS4410", 1))
        .await
        .expect("course");
    let a = storage.create_student("a").await.expect("student");
    let b = storage.create_student("b").await.expect("student");
    let c = storage.create_student("c").await.expect("student");

    let mut section = storage
        .begin_course(course_id)
        .await
        .expect("begin")
        .expect("course exists");
    let seq_a = section.insert_waitlist_entry(a).await.expect("a");
    let seq_b = section.insert_waitlist_entry(b).await.expect("b");
    let seq_c = section.insert_waitlist_entry(c).await.expect("c");
    assert!(seq_a.0 < seq_b.0);
    assert!(seq_b.0 < seq_c.0);

    let first = section
        .take_earliest_waitlist_entry()
        .await
        .expect("take")
        .expect("entry");
    assert_eq!(first.student_id, a);
    assert_eq!(first.seq, seq_a);

    let second = section
        .take_earliest_waitlist_entry()
        .await
        .expect("take")
        .expect("entry");
    assert_eq!(second.student_id, b);

    section.commit().await.expect("commit");

    let standings = storage
        .waitlist_standings_for_student(c)
        .await
        .expect("standings");
    assert_eq!(standings, vec![(course_id, 1)]);
}

#[tokio::test]
async fn dropping_section_without_commit_rolls_back() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_student("alice").await.expect("student");
    let course_id = storage
        .create_course(&course("Ethics", "PHIL101", 2))
        .await
        .expect("course");

    {
        let mut section = storage
            .begin_course(course_id)
            .await
            .expect("begin")
            .expect("course exists");
        section.insert_enrollment(alice).await.expect("enroll");
        // dropped here without commit
    }

    let mut section = storage
        .begin_course(course_id)
        .await
        .expect("begin")
        .expect("course exists");
    assert_eq!(section.count_enrollments().await.expect("count"), 0);
    assert!(section
        .registration_state(alice)
        .await
        .expect("state")
        .is_absent());
}

#[tokio::test]
async fn occupancy_listing_reports_live_counts() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let full = storage
        .create_course(&course("Popular", "POP100", 1))
        .await
        .expect("course");
    storage
        .create_course(&course("Quiet", "QUIET100", 10))
        .await
        .expect("course");
    let alice = storage.create_student("alice").await.expect("student");
    let bob = storage.create_student("bob").await.expect("student");

    let mut section = storage
        .begin_course(full)
        .await
        .expect("begin")
        .expect("course exists");
    section.insert_enrollment(alice).await.expect("enroll");
    section.insert_waitlist_entry(bob).await.expect("waitlist");
    section.commit().await.expect("commit");

    let listing = storage
        .list_courses_with_occupancy()
        .await
        .expect("listing");
    assert_eq!(listing.len(), 2);

    let popular = listing
        .iter()
        .find(|c| c.course.course_id == full)
        .expect("popular course");
    assert_eq!(popular.enrolled_count, 1);
    assert_eq!(popular.waitlist_count, 1);

    let quiet = listing
        .iter()
        .find(|c| c.course.course_id != full)
        .expect("quiet course");
    assert_eq!(quiet.enrolled_count, 0);
    assert_eq!(quiet.waitlist_count, 0);
}

#[tokio::test]
async fn enrolled_courses_listing_includes_timestamps() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_student("alice").await.expect("student");
    let course_id = storage
        .create_course(&course("Linear Algebra", "MATH220", 0))
        .await
        .expect("course");

    let mut section = storage
        .begin_course(course_id)
        .await
        .expect("begin")
        .expect("course exists");
    section.insert_enrollment(alice).await.expect("enroll");
    section.commit().await.expect("commit");

    let enrolled = storage
        .enrolled_courses_for_student(alice)
        .await
        .expect("enrolled");
    assert_eq!(enrolled.len(), 1);
    assert_eq!(enrolled[0].course_id, course_id);
    assert_eq!(enrolled[0].course_code, "MATH220");
    assert!(enrolled[0].enrolled_at <= Utc::now());
}

#[tokio::test]
async fn sections_for_different_courses_run_concurrently() {
    let temp_root = tempfile::tempdir().expect("temp root");
    let db_path = temp_root.path().join("concurrent.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));
    let storage = Storage::new(&database_url).await.expect("db");

    let left = storage
        .create_course(&course("Left", "LEFT1", 5))
        .await
        .expect("course");
    let right = storage
        .create_course(&course("Right", "RIGHT1", 5))
        .await
        .expect("course");
    let alice = storage.create_student("alice").await.expect("student");

    // Holding the left course's section must not block the right course's.
    let mut left_section = storage
        .begin_course(left)
        .await
        .expect("begin left")
        .expect("left exists");
    left_section.insert_enrollment(alice).await.expect("enroll");

    let right_section = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        storage.begin_course(right),
    )
    .await
    .expect("right section should not block on left lock")
    .expect("begin right")
    .expect("right exists");
    right_section.commit().await.expect("commit right");

    left_section.commit().await.expect("commit left");
}
