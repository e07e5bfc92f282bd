//! Catalog search over enrichment text
//!
//! Query syntax:
//! - `1990` (any 4-digit term) → only records of that year
//! - `may`, `sep`, `september` → only records of that month
//! - `"red car"` → phrase that must appear in OCR text, description or keywords
//! - anything else → word term scored per field; `term~` or terms of 6+
//!   characters also match words one edit away
//!
//! Field weights: keywords 15, OCR text 10, filename 5, description 2.
//! Phrases score OCR 10, keywords 5, description 2.

use crate::models::Record;

/// Records listed for an empty query
pub const DEFAULT_LISTING: usize = 50;

/// Terms at least this long get typo tolerance without an explicit `~`
const FUZZY_MIN_LEN: usize = 6;

const MONTHS: [(&str, &str); 12] = [
    ("jan", "january"),
    ("feb", "february"),
    ("mar", "march"),
    ("apr", "april"),
    ("may", "may"),
    ("jun", "june"),
    ("jul", "july"),
    ("aug", "august"),
    ("sep", "september"),
    ("oct", "october"),
    ("nov", "november"),
    ("dec", "december"),
];

#[derive(Debug, Clone, Copy)]
enum Field {
    Filename,
    Ocr,
    Description,
    Keywords,
}

impl Field {
    const ALL: [Field; 4] = [Field::Filename, Field::Ocr, Field::Description, Field::Keywords];

    fn term_boost(self) -> u32 {
        match self {
            Field::Filename => 5,
            Field::Ocr => 10,
            Field::Description => 2,
            Field::Keywords => 15,
        }
    }

    fn phrase_boost(self) -> u32 {
        match self {
            Field::Filename => 0,
            Field::Ocr => 10,
            Field::Description => 2,
            Field::Keywords => 5,
        }
    }
}

/// One word term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// Lowercased term text
    pub text: String,
    /// Also match words within edit distance 1
    pub fuzzy: bool,
}

/// Parsed search query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub year: Option<String>,
    /// Two-digit month
    pub month: Option<String>,
    /// Lowercased phrases
    pub phrases: Vec<String>,
    pub terms: Vec<QueryTerm>,
}

impl SearchQuery {
    pub fn parse(input: &str) -> Self {
        let mut query = SearchQuery::default();

        // Quoted phrases first; what is left splits into terms
        let mut rest = String::new();
        for (i, segment) in input.split('"').enumerate() {
            if i % 2 == 1 {
                let phrase = segment.trim().to_lowercase();
                if !phrase.is_empty() {
                    query.phrases.push(phrase);
                }
            } else {
                rest.push(' ');
                rest.push_str(segment);
            }
        }

        for raw in rest.split_whitespace() {
            let lower = raw.to_lowercase();
            if lower.len() == 4 && lower.chars().all(|c| c.is_ascii_digit()) {
                query.year = Some(lower);
                continue;
            }
            if let Some(month) = month_number(&lower) {
                query.month = Some(month);
                continue;
            }

            match lower.strip_suffix('~') {
                Some(stem) if stem.chars().count() > 1 => query.terms.push(QueryTerm {
                    text: stem.to_string(),
                    fuzzy: true,
                }),
                Some(_) => {}
                None => {
                    let fuzzy = lower.chars().count() >= FUZZY_MIN_LEN;
                    query.terms.push(QueryTerm { text: lower, fuzzy });
                }
            }
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.month.is_none() && self.phrases.is_empty() && self.terms.is_empty()
    }
}

fn month_number(term: &str) -> Option<String> {
    MONTHS
        .iter()
        .position(|(abbr, full)| term == *abbr || term == *full || (term == "sept" && *abbr == "sep"))
        .map(|i| format!("{:02}", i + 1))
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub record: &'a Record,
    pub score: u32,
}

/// Rank `records` against `query`
///
/// Ties keep store order.
pub fn search<'a>(records: &'a [Record], query: &SearchQuery) -> Vec<SearchHit<'a>> {
    if query.is_empty() {
        return records
            .iter()
            .take(DEFAULT_LISTING)
            .map(|record| SearchHit { record, score: 0 })
            .collect();
    }

    let mut hits: Vec<SearchHit<'a>> = records
        .iter()
        .filter(|r| query.year.as_deref().map_or(true, |y| r.year == y))
        .filter(|r| {
            query
                .month
                .as_deref()
                .map_or(true, |m| r.month.as_deref() == Some(m))
        })
        .filter_map(|record| score(record, query).map(|score| SearchHit { record, score }))
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits
}

/// Score one record; `None` when it does not match
fn score(record: &Record, query: &SearchQuery) -> Option<u32> {
    if query.phrases.is_empty() && query.terms.is_empty() {
        return Some(0);
    }

    let texts = FieldTexts::of(record);

    let mut phrase_score = 0;
    for phrase in &query.phrases {
        let matched: u32 = Field::ALL
            .iter()
            .filter(|f| f.phrase_boost() > 0 && texts.get(**f).contains(phrase.as_str()))
            .map(|f| f.phrase_boost())
            .sum();
        if matched == 0 {
            return None;
        }
        phrase_score += matched;
    }

    let mut term_score = 0;
    for term in &query.terms {
        for field in Field::ALL {
            if words(texts.get(field)).any(|word| term_matches(term, word)) {
                term_score += field.term_boost();
            }
        }
    }

    match (query.phrases.is_empty(), term_score) {
        // Terms alone need at least one hit
        (true, 0) => None,
        _ => Some(phrase_score + term_score),
    }
}

fn term_matches(term: &QueryTerm, word: &str) -> bool {
    word == term.text || (term.fuzzy && strsim::levenshtein(word, &term.text) <= 1)
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// Lowercased searchable text of a record
struct FieldTexts {
    filename: String,
    ocr: String,
    description: String,
    keywords: String,
}

impl FieldTexts {
    fn of(record: &Record) -> Self {
        let text = |key: &str| {
            record
                .ai_analysis
                .as_ref()
                .map(|a| a.text_field(key).to_lowercase())
                .unwrap_or_default()
        };
        let (ocr, description, keywords) = (
            text("ocr_text"),
            text("visual_description"),
            text("keywords"),
        );
        Self {
            filename: record.filename.to_lowercase(),
            ocr,
            description,
            keywords,
        }
    }

    fn get(&self, field: Field) -> &str {
        match field {
            Field::Filename => &self.filename,
            Field::Ocr => &self.ocr,
            Field::Description => &self.description,
            Field::Keywords => &self.keywords,
        }
    }
}
