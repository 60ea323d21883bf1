//! `Student`: derives a graduation flag from the average of its grades.

use registrar_core::Kind;
use serde::{Deserialize, Serialize};

use crate::derive::{Derivation, Reconcilable};

/// Minimum average grade (inclusive) to graduate.
pub const GRADUATION_THRESHOLD: f64 = 3.0;

/// Marker type for the `Student` kind.
#[derive(Debug, Clone, Copy)]
pub struct Student;

/// Declared state of a student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSpec {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Grades in the order they were recorded.
    #[serde(default)]
    pub grades: Vec<i32>,
}

impl StudentSpec {
    /// Create a spec with the given name and grades.
    pub fn new(name: impl Into<String>, grades: impl Into<Vec<i32>>) -> Self {
        Self {
            name: name.into(),
            grades: grades.into(),
        }
    }
}

/// Derived state of a student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentStatus {
    #[serde(default)]
    pub graduate: bool,
}

impl Kind for Student {
    const KIND: &'static str = "Student";
    const API_VERSION: &'static str = "school.io.gawor.com/v1";

    type Spec = StudentSpec;
    type Status = StudentStatus;
}

/// Arithmetic mean of `grades`, or `None` for an empty slice.
///
/// Summed in `i64` so no realistic number of `i32` grades can overflow.
#[allow(clippy::cast_precision_loss)]
pub fn average_grade(grades: &[i32]) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }
    let sum: i64 = grades.iter().copied().map(i64::from).sum();
    Some(sum as f64 / grades.len() as f64)
}

impl Reconcilable for Student {
    fn derive_status(spec: &StudentSpec) -> Derivation<StudentStatus> {
        match average_grade(&spec.grades) {
            Some(average) => Derivation::Derived(StudentStatus {
                graduate: average >= GRADUATION_THRESHOLD,
            }),
            None => Derivation::undefined("no grades recorded"),
        }
    }

    fn display_name(spec: &StudentSpec) -> Option<&str> {
        Some(spec.name.as_str()).filter(|name| !name.is_empty())
    }
}
