use serde::Serialize;

/// Minimum final grade for approval.
pub const PASS_MARK: f64 = 50.0;
/// Maximum tolerated absence percentage of the subject workload.
pub const MAX_ABSENCE_PERCENT: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeStatus {
    Pending,
    Approved,
    Failed,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Pending => "pending",
            GradeStatus::Approved => "approved",
            GradeStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    InsufficientGrade,
    ExcessiveAbsences,
}

impl FailureReason {
    /// Short tag used in the bulletin's status column.
    pub fn short_label(self) -> &'static str {
        match self {
            FailureReason::InsufficientGrade => "Grade",
            FailureReason::ExcessiveAbsences => "Absences",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub final_grade: Option<f64>,
    pub absence_percentage: f64,
    pub status: GradeStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<FailureReason>,
}

/// Mean of the scores that were actually entered. Missing scores are
/// excluded from the denominator, never padded with zero. All-missing
/// yields None ("no value yet").
pub fn final_grade(scores: [Option<f64>; 3]) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for s in scores.into_iter().flatten() {
        sum += s;
        count += 1;
    }
    if count > 0 {
        Some(sum / count as f64)
    } else {
        None
    }
}

/// Absences as a percentage of the subject workload. A workload of zero
/// hours cannot be divided by; such rows report 0%.
pub fn absence_percentage(absences: i64, workload: i64) -> f64 {
    if workload > 0 {
        100.0 * absences as f64 / workload as f64
    } else {
        0.0
    }
}

pub fn evaluate(scores: [Option<f64>; 3], absences: i64, workload: i64) -> Evaluation {
    let final_grade = final_grade(scores);
    let absence_percentage = absence_percentage(absences, workload);

    let Some(grade) = final_grade else {
        return Evaluation {
            final_grade,
            absence_percentage,
            status: GradeStatus::Pending,
            failure_reasons: Vec::new(),
        };
    };

    let mut failure_reasons = Vec::new();
    if grade < PASS_MARK {
        failure_reasons.push(FailureReason::InsufficientGrade);
    }
    if absence_percentage > MAX_ABSENCE_PERCENT {
        failure_reasons.push(FailureReason::ExcessiveAbsences);
    }

    let status = if failure_reasons.is_empty() {
        GradeStatus::Approved
    } else {
        GradeStatus::Failed
    };

    Evaluation {
        final_grade,
        absence_percentage,
        status,
        failure_reasons,
    }
}
