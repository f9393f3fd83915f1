//! Danger scoring for user-submitted risk reports.

use shared::DangerLevel;

/// Weight of each report category. Unknown categories add nothing.
pub const CATEGORY_WEIGHTS: &[(&str, i32)] = &[
    ("좁은 길목", 1),
    ("보도블럭 파손", 2),
    ("쓰레기 무단 투기", 2),
    ("CCTV 부재", 2),
    ("가로등 부재", 2),
    ("기타", 1),
];

/// Weight of each keyword found in the free-text reason.
pub const KEYWORD_WEIGHTS: &[(&str, i32)] = &[
    ("위험", 3),
    ("폭행", 3),
    ("공포", 3),
    ("불안", 2),
    ("사고", 2),
    ("어둡다", 2),
    ("불빛 없음", 2),
    ("혼자", 1),
    ("조용하다", 1),
    ("사람 없음", 1),
    ("소름", 1),
    ("위협", 1),
    ("불쾌감", 1),
    ("낯선 사람", 1),
    ("범죄", 2),
];

const HIGH_THRESHOLD: i32 = 6;
const MEDIUM_THRESHOLD: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DangerAssessment {
    pub score: i32,
    pub level: DangerLevel,
}

pub fn level_for(score: i32) -> DangerLevel {
    if score >= HIGH_THRESHOLD {
        DangerLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        DangerLevel::Medium
    } else {
        DangerLevel::Low
    }
}

pub fn category_weight(category: &str) -> i32 {
    let category = category.trim();
    CATEGORY_WEIGHTS
        .iter()
        .find(|(name, _)| *name == category)
        .map_or(0, |(_, weight)| *weight)
}

/// Sum of the weights of every keyword contained in `reason`, each counted
/// once however often it appears.
pub fn keyword_score(reason: &str) -> i32 {
    let reason = reason.to_lowercase();
    KEYWORD_WEIGHTS
        .iter()
        .filter(|(keyword, _)| reason.contains(&keyword.to_lowercase()))
        .map(|(_, weight)| weight)
        .sum()
}

pub fn assess(reason: &str, category: Option<&str>) -> DangerAssessment {
    let score = category.map_or(0, category_weight) + keyword_score(reason);
    DangerAssessment {
        score,
        level: level_for(score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streetlight_report_is_medium() {
        let assessment = assess("가로등이 없어서 어둡다", Some("가로등 부재"));
        assert_eq!(assessment.score, 4);
        assert_eq!(assessment.level, DangerLevel::Medium);
    }

    #[test]
    fn test_keywords_counted_once() {
        assert_eq!(keyword_score("위험 위험 위험"), 3);
        assert_eq!(keyword_score("밤에 혼자 걷기 무섭고 폭행 사건도 있었다"), 4);
    }

    #[test]
    fn test_unknown_category_adds_nothing() {
        assert_eq!(category_weight("미확인"), 0);
        assert_eq!(assess("평범한 길", Some("미확인")).level, DangerLevel::Low);
        assert_eq!(assess("평범한 길", None).score, 0);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for(2), DangerLevel::Low);
        assert_eq!(level_for(3), DangerLevel::Medium);
        assert_eq!(level_for(5), DangerLevel::Medium);
        assert_eq!(level_for(6), DangerLevel::High);
    }

    #[test]
    fn test_high_danger_report() {
        let assessment = assess("사람 없음, 불빛 없음, 범죄 위험", Some("CCTV 부재"));
        // 2 + (1 + 2 + 2 + 3)
        assert_eq!(assessment.score, 10);
        assert_eq!(assessment.level, DangerLevel::High);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_assess_is_pure(reason in ".{0,40}", category in proptest::option::of("[가-힣 ]{0,8}")) {
                let a = assess(&reason, category.as_deref());
                let b = assess(&reason, category.as_deref());
                prop_assert_eq!(a, b);
                prop_assert!(a.score >= 0);
                prop_assert_eq!(a.level, level_for(a.score));
            }
        }
    }
}
