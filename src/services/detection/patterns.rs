// Pattern Rule Table
// One lexical matcher per detectable category, with base risk and placeholder.
// Placeholders are ASCII tags so masked output never re-matches a rule.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::models::Category;

/// How a rule finds its spans.
#[derive(Debug)]
pub enum Matcher {
    /// Every non-overlapping regex match is a span.
    Pattern(Regex),
    /// Hangul-run based name matcher, see `entity_detector::match_person_names`.
    PersonName,
}

#[derive(Debug)]
pub struct PatternRule {
    pub category: Category,
    pub matcher: Matcher,
    pub base_risk: u8,
    pub placeholder: &'static str,
}

/// Common single-syllable Korean surnames.
pub(crate) const SURNAMES: &str = "김이박최정강조윤장임한오서신권황안송류유홍전고문양손배백허남심노하곽성차주우구민나진지엄채원천방공현함변염여추도소석선설마길연위표명기반왕금옥육인맹제모탁국";

/// Titles and honorifics that may directly follow a name.
pub(crate) const NAME_TITLES: &[&str] = &[
    "선생님", "간호사", "환자", "의사", "박사", "교수", "원장", "씨", "님",
];

/// Postpositions that may follow a bare name inside the same Hangul run.
pub(crate) const NAME_PARTICLES: &[&str] = &[
    "에게서", "에게", "께서", "에서", "이가", "은", "는", "이", "가", "을", "를", "의", "와", "과", "도", "께",
];

/// Bare three-syllable words that look like names but are vocabulary.
pub(crate) const NAME_STOPWORDS: &[&str] = &[
    "고혈압", "심장병", "뇌졸중", "조현병", "우울증", "백혈병", "당뇨병", "뇌종양", "혈액암", "유방암", "대장암",
    "췌장암", "이번주", "이번달", "오늘은", "정도로", "진료실", "진찰실", "안녕히", "한번더", "최근에", "지금은",
    "김치를", "선생님", "간호사", "장기간", "한국어", "주치의", "신경과", "정신과", "정형외과", "소아과",
];

pub const CONDITION_VOCABULARY: &str =
    "간암|폐암|위암|대장암|유방암|췌장암|뇌종양|혈액암|백혈병|당뇨병?|고혈압|심장병|뇌졸중|치매|파킨슨병|우울증|조현병|양극성장애";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTableError {
    MissingCategory(Category),
    DuplicateCategory(Category),
    RiskOutOfRange(Category, u8),
    PlaceholderRematches { placeholder: &'static str, category: Category },
}

impl std::fmt::Display for RuleTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCategory(c) => write!(f, "no pattern rule for category {}", c),
            Self::DuplicateCategory(c) => write!(f, "more than one pattern rule for category {}", c),
            Self::RiskOutOfRange(c, r) => write!(f, "base risk {} out of range for {}", r, c),
            Self::PlaceholderRematches { placeholder, category } => {
                write!(f, "placeholder {} is matched by the {} rule", placeholder, category)
            }
        }
    }
}

fn pattern(re: &str) -> Matcher {
    Matcher::Pattern(Regex::new(re).expect("pattern rule regex"))
}

fn build_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            category: Category::PersonName,
            matcher: Matcher::PersonName,
            base_risk: 85,
            placeholder: "[PERSON]",
        },
        PatternRule {
            category: Category::Phone,
            matcher: pattern(r"(?:010|011|016|017|018|019)[-\s]?\d{3,4}[-\s]?\d{4}"),
            base_risk: 95,
            placeholder: "[CONTACT]",
        },
        PatternRule {
            category: Category::NationalId,
            matcher: pattern(r"\d{6}[-\s]?[1-4]\d{6}"),
            base_risk: 100,
            placeholder: "[ID_NUMBER]",
        },
        PatternRule {
            category: Category::Facility,
            matcher: pattern(
                r"서울대학교의과대학부속병원|서울대학교병원|서울대병원|삼성서울병원|아산병원|아산의료원|세브란스|연세의료원|고려대병원|고려대학교의료원|[가-힣]+대학교?병원|[가-힣]+병원|[가-힣]+의료원|[가-힣]+보건소",
            ),
            base_risk: 70,
            placeholder: "[HOSPITAL]",
        },
        PatternRule {
            category: Category::Condition,
            matcher: pattern(CONDITION_VOCABULARY),
            base_risk: 60,
            placeholder: "[DISEASE]",
        },
        PatternRule {
            category: Category::Date,
            matcher: pattern(
                r"\d{4}[-./]\d{1,2}[-./]\d{1,2}|\d{4}년\s*\d{1,2}월(?:\s*\d{1,2}일)?|\d{1,2}/\d{1,2}/\d{4}",
            ),
            base_risk: 40,
            placeholder: "[DATE]",
        },
        PatternRule {
            category: Category::Age,
            matcher: pattern(r"\d{1,3}(?:세|살)"),
            base_risk: 30,
            placeholder: "[AGE]",
        },
        PatternRule {
            category: Category::Address,
            matcher: pattern(r"[가-힣]+(?:시|구|군|동|로|길)\s*\d+[-\d]*"),
            base_risk: 50,
            placeholder: "[ADDRESS]",
        },
    ]
}

/// Check the table covers every detectable category exactly once, with risks
/// in range and placeholders that no rule matches.
pub fn validate_rules(rules: &[PatternRule]) -> Result<(), RuleTableError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.category) {
            return Err(RuleTableError::DuplicateCategory(rule.category));
        }
        if rule.base_risk > 100 {
            return Err(RuleTableError::RiskOutOfRange(rule.category, rule.base_risk));
        }
    }
    for category in Category::DETECTABLE {
        if !seen.contains(&category) {
            return Err(RuleTableError::MissingCategory(category));
        }
    }

    for rule in rules {
        for other in rules {
            let rematches = match &other.matcher {
                Matcher::Pattern(re) => re.is_match(rule.placeholder),
                Matcher::PersonName => rule.placeholder.chars().any(|c| SURNAMES.contains(c)),
            };
            if rematches {
                return Err(RuleTableError::PlaceholderRematches {
                    placeholder: rule.placeholder,
                    category: other.category,
                });
            }
        }
    }

    Ok(())
}

/// The static rule table, in application order. Validated once on first use.
pub fn rule_table() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rules = build_rules();
        if let Err(e) = validate_rules(&rules) {
            panic!("invalid pattern rule table: {}", e);
        }
        rules
    })
}

pub fn rule_for(category: Category) -> Option<&'static PatternRule> {
    rule_table().iter().find(|r| r.category == category)
}

/// Placeholder for a category; `[MASKED]` for categories without a rule.
pub fn placeholder_for(category: Category) -> &'static str {
    rule_for(category).map(|r| r.placeholder).unwrap_or("[MASKED]")
}
