use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Reserved subject id used to track per-term attendance through the normal
/// mark-entry pipeline. Never counted towards academic totals.
pub const ATTENDANCE_SUBJECT_ID: &str = "term-attendance";

/// Grade assigned when the percentage falls below every configured threshold.
pub const DEFAULT_FAIL_GRADE: &str = "F";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_no: Option<String>,
    /// Legacy per-student attendance fields, kept as the last fallback when an
    /// attendance config is supplied without an override for this student.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_present: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub total_marks: Option<f64>,
    pub theory_max: Option<f64>,
    pub practical_max: Option<f64>,
}

impl Subject {
    pub fn is_attendance(&self) -> bool {
        self.id == ATTENDANCE_SUBJECT_ID
    }

    /// Maximum obtainable marks: `total_marks` when set, otherwise the sum of
    /// the split components (missing components count as 0).
    pub fn max_marks(&self) -> f64 {
        self.total_marks
            .unwrap_or_else(|| self.theory_max.unwrap_or(0.0) + self.practical_max.unwrap_or(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub student_id: String,
    pub subject_id: String,
    pub exam_term_id: String,
    pub obtained_marks: Option<f64>,
    pub theory_marks: Option<f64>,
    pub practical_marks: Option<f64>,
}

impl MarkEntry {
    /// Split components take precedence over `obtained_marks` whenever either
    /// one is present; a missing component scores 0.
    pub fn score(&self) -> Score {
        if self.theory_marks.is_some() || self.practical_marks.is_some() {
            Score::Split {
                theory: self.theory_marks.unwrap_or(0.0),
                practical: self.practical_marks.unwrap_or(0.0),
            }
        } else {
            Score::Total(self.obtained_marks.unwrap_or(0.0))
        }
    }
}

/// A per-subject score, echoed into the result in the shape it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Score {
    Total(f64),
    Split { theory: f64, practical: f64 },
}

impl Score {
    pub fn value(&self) -> f64 {
        match *self {
            Score::Total(v) => v,
            Score::Split { theory, practical } => theory + practical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingRule {
    pub label: String,
    pub min_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceOverride {
    pub present: Option<f64>,
    pub absent: Option<f64>,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceConfig {
    pub total_days: f64,
    #[serde(default)]
    pub students: HashMap<String, AttendanceOverride>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: f64,
    pub total: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student: Student,
    /// subjectId -> score, in sorted key order so serialization is stable.
    pub marks: BTreeMap<String, Score>,
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub grade: String,
    pub rank: usize,
    pub position_suffix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceSummary>,
}

/// English ordinal suffix for a 1-based rank. 11, 12 and 13 take "th"
/// regardless of their last digit.
pub fn ordinal_suffix(rank: usize) -> &'static str {
    match rank % 100 {
        11 | 12 | 13 => "th",
        _ => match rank % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

fn attendance_summary(
    student: &Student,
    config: &AttendanceConfig,
    term_entry: Option<&MarkEntry>,
) -> AttendanceSummary {
    let total = config.total_days;
    let override_row = config.students.get(&student.id);

    // Observed legacy precedence: config override, then the reserved
    // term-attendance mark entry, then the student's stored fields.
    let present = override_row
        .and_then(|o| {
            o.present
                .or_else(|| o.absent.map(|a| (total - a).max(0.0)))
        })
        .or_else(|| term_entry.map(|e| e.score().value()))
        .or(student.attendance_present)
        .unwrap_or(0.0);

    let percentage = override_row
        .and_then(|o| o.percentage)
        .unwrap_or_else(|| if total > 0.0 { present / total * 100.0 } else { 0.0 });

    AttendanceSummary {
        present,
        total,
        percentage,
    }
}

/// Computes the full ranked, graded result set for one exam term.
///
/// Pure and total: no I/O, no mutation of inputs, and no failure modes.
/// Missing marks score 0, a zero total max yields percentage 0, and a
/// percentage below every grading threshold falls back to [`DEFAULT_FAIL_GRADE`].
/// Output is sorted descending by percentage and ranked with competition
/// semantics (ties share a rank, the next distinct percentage takes its
/// 1-based position), so output length always equals the student count.
pub fn calculate_results(
    students: &[Student],
    subjects: &[Subject],
    marks: &[MarkEntry],
    grading_rules: &[GradingRule],
    attendance_config: Option<&AttendanceConfig>,
) -> Vec<StudentResult> {
    // (studentId, subjectId) -> first matching entry. Duplicate entries keep
    // the first occurrence, matching legacy lookup behavior.
    let mut entry_index: HashMap<(&str, &str), &MarkEntry> = HashMap::new();
    for m in marks {
        entry_index
            .entry((m.student_id.as_str(), m.subject_id.as_str()))
            .or_insert(m);
    }

    // Sorted once here so the caller-supplied ordering never matters.
    let mut rules: Vec<&GradingRule> = grading_rules.iter().collect();
    rules.sort_by(|a, b| {
        b.min_percentage
            .partial_cmp(&a.min_percentage)
            .unwrap_or(Ordering::Equal)
    });

    let mut results: Vec<StudentResult> = Vec::with_capacity(students.len());
    for student in students {
        let mut per_subject: BTreeMap<String, Score> = BTreeMap::new();
        let mut total_obtained = 0.0_f64;
        let mut total_max = 0.0_f64;

        for subject in subjects.iter().filter(|s| !s.is_attendance()) {
            let score = entry_index
                .get(&(student.id.as_str(), subject.id.as_str()))
                .map(|e| e.score())
                .unwrap_or(Score::Total(0.0));
            total_obtained += score.value();
            total_max += subject.max_marks();
            per_subject.insert(subject.id.clone(), score);
        }

        let percentage = if total_max > 0.0 {
            total_obtained / total_max * 100.0
        } else {
            0.0
        };

        let grade = rules
            .iter()
            .find(|r| percentage >= r.min_percentage)
            .map(|r| r.label.clone())
            .unwrap_or_else(|| DEFAULT_FAIL_GRADE.to_string());

        let attendance = attendance_config.map(|config| {
            let term_entry = entry_index
                .get(&(student.id.as_str(), ATTENDANCE_SUBJECT_ID))
                .copied();
            attendance_summary(student, config, term_entry)
        });

        results.push(StudentResult {
            student: student.clone(),
            marks: per_subject,
            total_obtained,
            total_max,
            percentage,
            grade,
            rank: 0,
            position_suffix: String::new(),
            attendance,
        });
    }

    // Stable sort keeps input order among equal percentages.
    results.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
    });

    let mut prev_percentage = f64::NAN;
    let mut prev_rank = 0_usize;
    for (i, result) in results.iter_mut().enumerate() {
        let rank = if result.percentage == prev_percentage {
            prev_rank
        } else {
            i + 1
        };
        prev_percentage = result.percentage;
        prev_rank = rank;
        result.rank = rank;
        result.position_suffix = ordinal_suffix(rank).to_string();
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str) -> Student {
        Student {
            id: id.to_string(),
            display_name: format!("Student {}", id),
            roll_no: None,
            attendance_present: None,
            attendance_total: None,
        }
    }

    fn subject(id: &str, total: f64) -> Subject {
        Subject {
            id: id.to_string(),
            name: id.to_uppercase(),
            total_marks: Some(total),
            theory_max: None,
            practical_max: None,
        }
    }

    fn mark(student_id: &str, subject_id: &str, obtained: f64) -> MarkEntry {
        MarkEntry {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            exam_term_id: "t1".to_string(),
            obtained_marks: Some(obtained),
            theory_marks: None,
            practical_marks: None,
        }
    }

    fn rules(pairs: &[(&str, f64)]) -> Vec<GradingRule> {
        pairs
            .iter()
            .map(|(label, min)| GradingRule {
                label: label.to_string(),
                min_percentage: *min,
            })
            .collect()
    }

    #[test]
    fn example_scenario_ranks_and_grades() {
        let students = vec![student("s1"), student("s2"), student("s3")];
        let subjects = vec![subject("math", 100.0), subject("eng", 100.0)];
        let marks = vec![
            mark("s1", "math", 90.0),
            mark("s1", "eng", 85.0),
            mark("s2", "math", 70.0),
            mark("s2", "eng", 70.0),
            mark("s3", "math", 40.0),
            mark("s3", "eng", 30.0),
        ];
        let scale = rules(&[("A", 80.0), ("B", 60.0), ("F", 0.0)]);

        let results = calculate_results(&students, &subjects, &marks, &scale, None);
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].student.id, "s1");
        assert!((results[0].percentage - 87.5).abs() < 1e-9);
        assert_eq!(results[0].grade, "A");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].position_suffix, "st");

        assert_eq!(results[1].student.id, "s2");
        assert_eq!(results[1].grade, "B");
        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].position_suffix, "nd");

        assert_eq!(results[2].student.id, "s3");
        assert_eq!(results[2].grade, "F");
        assert_eq!(results[2].rank, 3);
        assert_eq!(results[2].position_suffix, "rd");
    }

    #[test]
    fn percentage_is_exact_ratio_of_totals() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 80.0), subject("sci", 40.0)];
        let marks = vec![mark("s1", "math", 55.0), mark("s1", "sci", 17.0)];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].total_obtained, 72.0);
        assert_eq!(results[0].total_max, 120.0);
        assert!((results[0].percentage - (72.0 / 120.0 * 100.0)).abs() < 1e-12);
    }

    #[test]
    fn zero_total_max_guards_division() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 0.0)];
        let results = calculate_results(&students, &subjects, &[], &rules(&[("F", 0.0)]), None);
        assert_eq!(results[0].percentage, 0.0);
        assert!(!results[0].percentage.is_nan());

        // Empty subject list behaves the same way.
        let results = calculate_results(&students, &[], &[], &rules(&[("F", 0.0)]), None);
        assert_eq!(results[0].percentage, 0.0);
    }

    #[test]
    fn tied_percentages_share_rank_with_gap() {
        let students = vec![student("a"), student("b"), student("c")];
        let subjects = vec![subject("math", 100.0)];
        let marks = vec![
            mark("a", "math", 75.0),
            mark("b", "math", 75.0),
            mark("c", "math", 60.0),
        ];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 1);
        assert_eq!(results[2].rank, 3);
        // Stable sort keeps tied students in input order.
        assert_eq!(results[0].student.id, "a");
        assert_eq!(results[1].student.id, "b");
    }

    #[test]
    fn ordinal_suffix_boundaries() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(4), "th");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
        assert_eq!(ordinal_suffix(22), "nd");
        assert_eq!(ordinal_suffix(111), "th");
        assert_eq!(ordinal_suffix(101), "st");
    }

    #[test]
    fn grade_thresholds_are_inclusive_lower_bounds() {
        let students = vec![student("s1"), student("s2")];
        let subjects = vec![subject("math", 1000.0)];
        let marks = vec![mark("s1", "math", 900.0), mark("s2", "math", 899.0)];
        // Deliberately unsorted scale; the calculator orders it itself.
        let scale = rules(&[("F", 0.0), ("A", 90.0), ("B", 70.0)]);

        let results = calculate_results(&students, &subjects, &marks, &scale, None);
        let by_id = |id: &str| results.iter().find(|r| r.student.id == id).unwrap();
        assert_eq!(by_id("s1").grade, "A");
        assert_eq!(by_id("s2").grade, "B");
    }

    #[test]
    fn falls_back_to_f_when_no_rule_matches() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 100.0)];
        let marks = vec![mark("s1", "math", 10.0)];
        let scale = rules(&[("A", 90.0), ("B", 70.0)]);

        let results = calculate_results(&students, &subjects, &marks, &scale, None);
        assert_eq!(results[0].grade, DEFAULT_FAIL_GRADE);
    }

    #[test]
    fn split_components_take_precedence_over_obtained() {
        let students = vec![student("s1")];
        let subjects = vec![Subject {
            id: "phy".to_string(),
            name: "Physics".to_string(),
            total_marks: Some(100.0),
            theory_max: Some(70.0),
            practical_max: Some(30.0),
        }];
        let marks = vec![MarkEntry {
            student_id: "s1".to_string(),
            subject_id: "phy".to_string(),
            exam_term_id: "t1".to_string(),
            obtained_marks: Some(99.0),
            theory_marks: Some(30.0),
            practical_marks: None,
        }];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].total_obtained, 30.0);
        assert_eq!(
            results[0].marks.get("phy"),
            Some(&Score::Split {
                theory: 30.0,
                practical: 0.0
            })
        );
    }

    #[test]
    fn subject_max_falls_back_to_split_sum() {
        let subjects = vec![Subject {
            id: "chem".to_string(),
            name: "Chemistry".to_string(),
            total_marks: None,
            theory_max: Some(60.0),
            practical_max: Some(40.0),
        }];
        let students = vec![student("s1")];
        let results = calculate_results(&students, &subjects, &[], &rules(&[("F", 0.0)]), None);
        assert_eq!(results[0].total_max, 100.0);
    }

    #[test]
    fn duplicate_entries_use_first_match() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 100.0)];
        let marks = vec![mark("s1", "math", 40.0), mark("s1", "math", 90.0)];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].total_obtained, 40.0);
    }

    #[test]
    fn attendance_subject_is_excluded_from_totals() {
        let students = vec![student("s1")];
        let subjects = vec![
            subject("math", 100.0),
            subject(ATTENDANCE_SUBJECT_ID, 180.0),
        ];
        let marks = vec![
            mark("s1", "math", 50.0),
            mark("s1", ATTENDANCE_SUBJECT_ID, 170.0),
        ];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].total_max, 100.0);
        assert_eq!(results[0].total_obtained, 50.0);
        assert!(!results[0].marks.contains_key(ATTENDANCE_SUBJECT_ID));
    }

    #[test]
    fn attendance_precedence_override_then_mark_then_stored() {
        let mut with_stored = student("s1");
        with_stored.attendance_present = Some(100.0);
        let students = vec![with_stored];
        let subjects = vec![subject("math", 100.0)];
        let marks = vec![
            mark("s1", "math", 50.0),
            mark("s1", ATTENDANCE_SUBJECT_ID, 150.0),
        ];
        let scale = rules(&[("P", 0.0)]);

        // Override present wins over both fallbacks.
        let mut config = AttendanceConfig {
            total_days: 200.0,
            students: HashMap::new(),
        };
        config.students.insert(
            "s1".to_string(),
            AttendanceOverride {
                present: Some(180.0),
                absent: None,
                percentage: None,
            },
        );
        let results = calculate_results(&students, &subjects, &marks, &scale, Some(&config));
        let att = results[0].attendance.unwrap();
        assert_eq!(att.present, 180.0);
        assert_eq!(att.total, 200.0);
        assert!((att.percentage - 90.0).abs() < 1e-12);

        // No override: the term-attendance mark entry is next.
        let config = AttendanceConfig {
            total_days: 200.0,
            students: HashMap::new(),
        };
        let results = calculate_results(&students, &subjects, &marks, &scale, Some(&config));
        assert_eq!(results[0].attendance.unwrap().present, 150.0);

        // No override, no mark entry: stored student fields.
        let marks_no_att = vec![mark("s1", "math", 50.0)];
        let results =
            calculate_results(&students, &subjects, &marks_no_att, &scale, Some(&config));
        assert_eq!(results[0].attendance.unwrap().present, 100.0);
    }

    #[test]
    fn attendance_absent_derives_present_and_explicit_percentage_wins() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 100.0)];
        let mut config = AttendanceConfig {
            total_days: 180.0,
            students: HashMap::new(),
        };
        config.students.insert(
            "s1".to_string(),
            AttendanceOverride {
                present: None,
                absent: Some(20.0),
                percentage: Some(88.0),
            },
        );

        let results = calculate_results(&students, &subjects, &[], &rules(&[("F", 0.0)]), Some(&config));
        let att = results[0].attendance.unwrap();
        assert_eq!(att.present, 160.0);
        assert_eq!(att.percentage, 88.0);
    }

    #[test]
    fn attendance_is_none_without_config() {
        let students = vec![student("s1")];
        let results = calculate_results(&students, &[], &[], &rules(&[("F", 0.0)]), None);
        assert!(results[0].attendance.is_none());
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let students = vec![student("b"), student("a")];
        let subjects = vec![subject("math", 100.0), subject("eng", 50.0)];
        let marks = vec![
            mark("a", "math", 80.0),
            mark("a", "eng", 40.0),
            mark("b", "math", 80.0),
            mark("b", "eng", 40.0),
        ];
        let scale = rules(&[("A", 80.0), ("F", 0.0)]);

        let first = calculate_results(&students, &subjects, &marks, &scale, None);
        let second = calculate_results(&students, &subjects, &marks, &scale, None);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn missing_entries_score_zero() {
        let students = vec![student("s1")];
        let subjects = vec![subject("math", 100.0), subject("eng", 100.0)];
        let marks = vec![mark("s1", "math", 60.0)];

        let results = calculate_results(&students, &subjects, &marks, &rules(&[("P", 0.0)]), None);
        assert_eq!(results[0].marks.get("eng"), Some(&Score::Total(0.0)));
        assert_eq!(results[0].total_obtained, 60.0);
        assert_eq!(results[0].total_max, 200.0);
    }
}
