use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{StudentRecord, Subject};
use crate::skills::SkillLevel;

/// Which slice of the roster a subject is taught to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScope {
    pub grade: String,
    pub course: Option<String>,
}

impl SubjectScope {
    pub fn new(grade: impl Into<String>, course: Option<&str>) -> Self {
        Self {
            grade: grade.into().trim().to_string(),
            course: course
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty()),
        }
    }
}

impl From<&Subject> for SubjectScope {
    fn from(subject: &Subject) -> Self {
        Self::new(subject.grade.as_str(), subject.course.as_deref())
    }
}

fn course_priority(course_class: &str) -> u8 {
    match course_class.trim().to_ascii_uppercase().as_str() {
        "M" => 0,
        "E" => 1,
        "I" => 2,
        "C" => 3,
        "A" => 4,
        _ => 5,
    }
}

/// Numeric classes first in numeric order, then the rest lexicographically.
fn compare_class(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.trim().cmp(b.trim()),
    }
}

fn same_class(student: &StudentRecord, code: &str) -> bool {
    student.course_class.trim().eq_ignore_ascii_case(code)
}

pub fn filter_for_subject(roster: &[StudentRecord], scope: &SubjectScope) -> Vec<StudentRecord> {
    let mut view: Vec<StudentRecord> = roster
        .iter()
        .filter(|s| s.grade.trim() == scope.grade)
        .cloned()
        .collect();

    if scope.grade == "1" || scope.grade == "2" {
        view.sort_by(|a, b| {
            compare_class(&a.course_class, &b.course_class).then(a.number.cmp(&b.number))
        });
        return view;
    }

    match scope.course.as_deref() {
        None | Some("G") | Some("COMMON") => {
            view.sort_by(|a, b| {
                course_priority(&a.course_class)
                    .cmp(&course_priority(&b.course_class))
                    .then(a.number.cmp(&b.number))
            });
        }
        Some("C") => {
            view.retain(|s| same_class(s, "C") || same_class(s, "A"));
            view.sort_by(|a, b| {
                let a_rank = if same_class(a, "C") { 0 } else { 1 };
                let b_rank = if same_class(b, "C") { 0 } else { 1 };
                a_rank.cmp(&b_rank).then(a.number.cmp(&b.number))
            });
        }
        Some(code) => {
            let wanted = match code {
                "CC" => "C",
                "CA" => "A",
                other => other,
            };
            view.retain(|s| same_class(s, wanted));
            view.sort_by_key(|s| s.number);
        }
    }
    view
}

fn skill_rank(level: Option<&str>) -> u8 {
    match level.map(str::trim) {
        None | Some("") => 5,
        Some(raw) => SkillLevel::parse(raw).map(SkillLevel::rank).unwrap_or(99),
    }
}

/// Orders students by skill level with a total tie-break chain, so missing
/// or malformed levels still produce one deterministic order.
pub fn sort_by_skill_level(
    students: &[StudentRecord],
    levels_by_student_id: &HashMap<String, String>,
) -> Vec<StudentRecord> {
    let mut sorted = students.to_vec();
    sorted.sort_by(|a, b| {
        let a_rank = skill_rank(levels_by_student_id.get(&a.student_id).map(|s| s.as_str()));
        let b_rank = skill_rank(levels_by_student_id.get(&b.student_id).map(|s| s.as_str()));
        a_rank
            .cmp(&b_rank)
            .then_with(|| compare_class(&a.course_class, &b.course_class))
            .then(a.number.cmp(&b.number))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    sorted
}
