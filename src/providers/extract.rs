//! Quote extraction from exchange office pages.
//!
//! Pages are reduced to a [`Document`]: labelled rows (table rows and list
//! items) plus the flattened page text. Each [`Heuristic`] is a pure function
//! from a document and a currency code to buy/sell candidates, and the chain
//! is tried in order until one yields a quote with both sides positive.

use crate::core::{CurrencyCode, FetchError, Quote, QuoteMap};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr, li").expect("Invalid row selector"));
static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("Invalid cell selector"));
static BODY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("Invalid body selector"));

/// A run of digits with optional `.`/`,` separators, optionally signed.
static NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d(?:[\d.,]*\d)?").expect("Invalid regex"));

/// Parses a price token whose separators may follow either locale.
///
/// Grouping separators are stripped first. When both `.` and `,` appear, the
/// last one is the decimal separator. A separator kind that repeats is
/// grouping. A single separator is decimal unless exactly three digits follow
/// it, so `42,0050` and `6107,5` are decimals while `2.650` is 2650.
pub fn parse_number(token: &str) -> Option<Decimal> {
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\'')
        .collect();
    let negative = compact.starts_with('-');
    let digits = compact.trim_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty()
        || !digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    let normalized = match (digits.rfind('.'), digits.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (decimal, grouping) = if dot > comma { ('.', ',') } else { (',', '.') };
            if digits.matches(decimal).count() != 1 {
                return None;
            }
            digits.replace(grouping, "").replace(decimal, ".")
        }
        (Some(idx), None) | (None, Some(idx)) => {
            let separator = if digits.contains('.') { '.' } else { ',' };
            let trailing = digits.len() - idx - 1;
            if digits.matches(separator).count() > 1 || trailing == 3 {
                digits.replace(separator, "")
            } else {
                digits.replace(separator, ".")
            }
        }
        (None, None) => digits.to_string(),
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

fn numbers_in(text: &str) -> Vec<Decimal> {
    NUMBER_REGEX
        .find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Upper-cases and folds Turkish letters so labels compare against
/// [`CurrencyCode::labels`].
fn normalize_label(text: &str) -> String {
    let folded: String = text
        .to_uppercase()
        .chars()
        .map(|c| match c {
            'İ' => 'I',
            'Ş' => 'S',
            'Ğ' => 'G',
            'Ü' => 'U',
            'Ö' => 'O',
            'Ç' => 'C',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    label: String,
    values: Vec<Decimal>,
}

/// A page reduced to what the heuristics look at.
#[derive(Debug, Clone, Default)]
pub struct Document {
    rows: Vec<Row>,
    text: String,
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let html = Html::parse_document(html);
        let mut rows = Vec::new();

        for row in html.select(&ROW_SELECTOR) {
            let cells: Vec<String> = row.select(&CELL_SELECTOR).map(|c| element_text(&c)).collect();
            if let Some((first, rest)) = cells.split_first() {
                rows.push(Row {
                    label: normalize_label(first),
                    values: rest.iter().flat_map(|cell| numbers_in(cell)).collect(),
                });
            } else {
                // List items and other cell-less rows: label runs up to the first digit.
                let text = element_text(&row);
                let split = text.find(|c: char| c.is_ascii_digit()).unwrap_or(text.len());
                let (label, rest) = text.split_at(split);
                rows.push(Row {
                    label: normalize_label(label),
                    values: numbers_in(rest),
                });
            }
        }

        let text = match html.select(&BODY_SELECTOR).next() {
            Some(body) => element_text(&body),
            None => element_text(&html.root_element()),
        };
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        Document { rows, text }
    }
}

/// One step of the extraction chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// Row label equals one of the currency's labels.
    ExactLabel,
    /// Row label contains one of the currency's labels as a word, except as
    /// either side of a cross pair such as `EUR/USD`.
    FuzzyLabel,
    /// A currency label followed by two numbers within `window` characters
    /// anywhere in the page text.
    Proximity { window: usize },
}

impl Heuristic {
    pub fn default_chain(window: usize) -> Vec<Heuristic> {
        vec![
            Heuristic::ExactLabel,
            Heuristic::FuzzyLabel,
            Heuristic::Proximity { window },
        ]
    }

    /// Buy/sell candidates in document order. Candidates are not validated.
    pub fn candidates(&self, document: &Document, code: CurrencyCode) -> Vec<(Decimal, Decimal)> {
        match self {
            Heuristic::ExactLabel => row_candidates(document, |label| {
                code.labels().iter().any(|alias| label == *alias)
            }),
            Heuristic::FuzzyLabel => row_candidates(document, |label| {
                code.labels().iter().any(|alias| contains_word(label, alias))
            }),
            Heuristic::Proximity { window } => proximity_candidates(&document.text, code, *window),
        }
    }
}

fn row_candidates(
    document: &Document,
    matches: impl Fn(&str) -> bool,
) -> Vec<(Decimal, Decimal)> {
    document
        .rows
        .iter()
        .filter(|row| row.values.len() >= 2 && matches(&row.label))
        .map(|row| (row.values[0], row.values[1]))
        .collect()
}

/// True when `text[start..end]` is one side of a pair against another tracked
/// currency, e.g. either side of `EUR/USD`. Pairs against the base such as
/// `EUR/TRY` are not cross pairs.
fn is_cross_pair(text: &str, start: usize, end: usize) -> bool {
    if text[..start].trim_end().ends_with('/') {
        return true;
    }
    let Some(counter) = text[end..].trim_start().strip_prefix('/') else {
        return false;
    };
    let counter: String = counter.trim_start().chars().take(3).collect::<String>().to_uppercase();
    CurrencyCode::ALL.iter().any(|code| code.as_str() == counter)
}

fn contains_word(label: &str, word: &str) -> bool {
    let is_word_char = |c: char| c.is_alphanumeric();
    label.match_indices(word).any(|(start, _)| {
        let end = start + word.len();
        let before = label[..start].chars().next_back();
        let after = label[end..].chars().next();
        let bounded = before.is_none_or(|c| !is_word_char(c)) && after.is_none_or(|c| !is_word_char(c));
        bounded && !is_cross_pair(label, start, end)
    })
}

fn proximity_candidates(text: &str, code: CurrencyCode, window: usize) -> Vec<(Decimal, Decimal)> {
    let alternatives = code
        .labels()
        .iter()
        .map(|label| regex::escape(label))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(pattern) = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")) else {
        return Vec::new();
    };

    pattern
        .find_iter(text)
        .filter(|m| !is_cross_pair(text, m.start(), m.end()))
        .filter_map(|m| {
            let tail: String = text[m.end()..].chars().take(window).collect();
            let mut numbers = numbers_in(&tail).into_iter();
            Some((numbers.next()?, numbers.next()?))
        })
        .collect()
}

/// Runs the chain for every currency. A candidate with a non-positive side is
/// skipped; it only turns into `MalformedQuote` when no currency produced a
/// valid quote at all.
pub fn extract_quotes(document: &Document, chain: &[Heuristic]) -> Result<QuoteMap, FetchError> {
    let mut quotes = QuoteMap::new();
    let mut rejected = Vec::new();

    for code in CurrencyCode::ALL {
        let found = chain.iter().find_map(|heuristic| {
            heuristic
                .candidates(document, code)
                .into_iter()
                .find_map(|(buy, sell)| {
                    let quote = Quote::new(code, buy, sell);
                    if quote.is_none() {
                        rejected.push(format!("{code} buy={buy} sell={sell}"));
                    }
                    quote
                })
                .inspect(|_| debug!(currency = %code, heuristic = ?heuristic, "Matched quote"))
        });
        if let Some(quote) = found {
            quotes.insert(code, quote);
        }
    }

    if quotes.is_empty() {
        if rejected.is_empty() {
            return Err(FetchError::NoQuotesExtracted);
        }
        return Err(FetchError::MalformedQuote(rejected.join(", ")));
    }
    Ok(quotes)
}
