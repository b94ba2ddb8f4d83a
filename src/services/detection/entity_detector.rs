// Entity Detector
// Applies every pattern rule to the full text independently and collects raw
// candidates. Rules may overlap; the overlap resolver settles that later.

use regex::Regex;
use std::sync::OnceLock;

use super::patterns::{rule_table, Matcher, NAME_PARTICLES, NAME_STOPWORDS, NAME_TITLES, SURNAMES};
use crate::models::{Candidate, Category};

fn hangul_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[가-힣]+").expect("hangul run regex"))
}

/// Name directly followed by a title ("김철수씨", "박영희 환자" is handled by the bare form).
fn titled_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let re = format!(
            r"^(?P<name>[{}][가-힣]{{1,2}}?)(?:{})",
            SURNAMES,
            NAME_TITLES.join("|")
        );
        Regex::new(&re).expect("titled name regex")
    })
}

/// Standalone surname + two-syllable given name, optionally followed by a particle.
fn bare_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let re = format!(
            r"^(?P<name>[{}][가-힣]{{2}})(?:{})?$",
            SURNAMES,
            NAME_PARTICLES.join("|")
        );
        Regex::new(&re).expect("bare name regex")
    })
}

/// Final syllables that mark a particle or an administrative district rather
/// than a given name ("진단을", "강남구").
fn ends_with_non_name_syllable(name: &str) -> bool {
    name.chars()
        .last()
        .map(|c| "은는이가을를의와과도에로시구군동길읍면리".contains(c))
        .unwrap_or(false)
}

/// Find person-name spans as (start, end) byte offsets.
///
/// Works per Hangul run: a run is a name if it starts with a surname and is
/// either followed by a title, or is exactly three syllables with an optional
/// trailing particle.
pub(crate) fn match_person_names(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();

    for run in hangul_run_re().find_iter(text) {
        let word = run.as_str();

        if NAME_TITLES.iter().any(|t| word.starts_with(t)) {
            continue;
        }

        if let Some(name) = titled_name_re().captures(word).and_then(|c| c.name("name")) {
            spans.push((run.start() + name.start(), run.start() + name.end()));
            continue;
        }

        if let Some(name) = bare_name_re().captures(word).and_then(|c| c.name("name")) {
            let token = name.as_str();
            if ends_with_non_name_syllable(token) || NAME_STOPWORDS.contains(&token) {
                continue;
            }
            spans.push((run.start() + name.start(), run.start() + name.end()));
        }
    }

    spans
}

/// Run every rule over `text`. Candidates are grouped by rule order, then by
/// position within each rule.
pub fn detect(text: &str) -> Vec<Candidate> {
    if text.is_empty() {
        return vec![];
    }

    let mut candidates = Vec::new();
    for rule in rule_table() {
        let spans: Vec<(usize, usize)> = match &rule.matcher {
            Matcher::Pattern(re) => re.find_iter(text).map(|m| (m.start(), m.end())).collect(),
            Matcher::PersonName => match_person_names(text),
        };

        candidates.extend(spans.into_iter().map(|(start, end)| Candidate {
            text: text[start..end].to_string(),
            category: rule.category,
            start,
            end,
            base_risk: rule.base_risk,
        }));
    }

    candidates
}

/// Count candidates per category, in detectable order. Used for debug logging.
pub fn category_histogram(candidates: &[Candidate]) -> Vec<(Category, usize)> {
    Category::DETECTABLE
        .iter()
        .map(|c| (*c, candidates.iter().filter(|x| x.category == *c).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}
