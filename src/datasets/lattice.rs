//! Type narrowing rules used by schema inference.
//!
//! A column starts out as `String` and is narrowed value by value. `String`
//! probes for a date layout, then for a number. Once a column holds a richer
//! type, every non-empty value must keep satisfying it or the column collapses
//! back to `String`. The only widening step is `Int` to `Float`.

use super::DataType;
use chrono::NaiveDate;

/// One element of a date layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// Exactly four digits.
    Year,
    /// Three-letter English month abbreviation, case-insensitive.
    MonthAbbr,
    /// Exactly two digits.
    ZeroMonth,
    /// One or two digits.
    NumMonth,
    ZeroDay,
    NumDay,
    Literal(u8),
}

/// A supported date layout, written in reference-date notation
/// (`2006` year, `Jan`/`01`/`1` month, `02`/`2` day).
#[derive(Debug, PartialEq, Eq)]
pub struct DateLayout {
    layout: &'static str,
    tokens: &'static [Token],
}

/// Supported layouts in match priority order; the first layout that parses wins.
pub static DATE_LAYOUTS: [DateLayout; 4] = [
    DateLayout {
        layout: "2006-Jan-02",
        tokens: &[
            Token::Year,
            Token::Literal(b'-'),
            Token::MonthAbbr,
            Token::Literal(b'-'),
            Token::ZeroDay,
        ],
    },
    DateLayout {
        layout: "01/02/2006",
        tokens: &[
            Token::ZeroMonth,
            Token::Literal(b'/'),
            Token::ZeroDay,
            Token::Literal(b'/'),
            Token::Year,
        ],
    },
    DateLayout {
        layout: "1/02/2006",
        tokens: &[
            Token::NumMonth,
            Token::Literal(b'/'),
            Token::ZeroDay,
            Token::Literal(b'/'),
            Token::Year,
        ],
    },
    DateLayout {
        layout: "1/2/2006",
        tokens: &[
            Token::NumMonth,
            Token::Literal(b'/'),
            Token::NumDay,
            Token::Literal(b'/'),
            Token::Year,
        ],
    },
];

const MONTH_ABBRS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

impl DateLayout {
    pub fn as_str(&self) -> &'static str {
        self.layout
    }

    /// Find a supported layout by its layout string.
    pub fn lookup(layout: &str) -> Option<&'static DateLayout> {
        DATE_LAYOUTS.iter().find(|l| l.layout == layout)
    }

    /// Detect the first supported layout `value` parses with.
    pub fn detect(value: &str) -> Option<&'static DateLayout> {
        DATE_LAYOUTS.iter().find(|l| l.parse(value).is_some())
    }

    /// Parse `value` strictly against this layout. The whole value must be
    /// consumed and the date must exist in the calendar.
    pub fn parse(&self, value: &str) -> Option<NaiveDate> {
        let mut rest = value.as_bytes();
        let (mut year, mut month, mut day) = (None, None, None);

        for token in self.tokens {
            match *token {
                Token::Year => {
                    let (n, tail) = take_digits(rest, 4, 4)?;
                    year = Some(n as i32);
                    rest = tail;
                }
                Token::MonthAbbr => {
                    if rest.len() < 3 {
                        return None;
                    }
                    let word = std::str::from_utf8(&rest[..3]).ok()?.to_ascii_lowercase();
                    let idx = MONTH_ABBRS.iter().position(|m| *m == word)?;
                    month = Some(idx as u32 + 1);
                    rest = &rest[3..];
                }
                Token::ZeroMonth | Token::NumMonth => {
                    let min = if *token == Token::ZeroMonth { 2 } else { 1 };
                    let (n, tail) = take_digits(rest, min, 2)?;
                    month = Some(n);
                    rest = tail;
                }
                Token::ZeroDay | Token::NumDay => {
                    let min = if *token == Token::ZeroDay { 2 } else { 1 };
                    let (n, tail) = take_digits(rest, min, 2)?;
                    day = Some(n);
                    rest = tail;
                }
                Token::Literal(c) => {
                    let (first, tail) = rest.split_first()?;
                    if *first != c {
                        return None;
                    }
                    rest = tail;
                }
            }
        }

        if !rest.is_empty() {
            return None;
        }
        NaiveDate::from_ymd_opt(year?, month?, day?)
    }
}

/// Take between `min` and `max` leading ASCII digits, greedily.
fn take_digits(input: &[u8], min: usize, max: usize) -> Option<(u32, &[u8])> {
    let count = input
        .iter()
        .take(max)
        .take_while(|b| b.is_ascii_digit())
        .count();
    if count < min {
        return None;
    }
    let n = input[..count]
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    Some((n, &input[count..]))
}

fn parses_float(trimmed: &str) -> bool {
    trimmed.parse::<f64>().is_ok()
}

/// Integers may carry a single trailing `.` (e.g. `42.`).
fn parses_int(trimmed: &str) -> bool {
    trimmed
        .strip_suffix('.')
        .unwrap_or(trimmed)
        .parse::<i64>()
        .is_ok()
}

/// Narrow the hypothesized type of a column by one observed value.
///
/// `layout` is the layout a `Date` column already matched; it is ignored for
/// every other type. Returns the new type and, for `Date`, the layout in force.
pub fn narrow(
    value: &str,
    current: DataType,
    layout: Option<&'static DateLayout>,
) -> (DataType, Option<&'static DateLayout>) {
    if value.is_empty() {
        let layout = if current == DataType::Date { layout } else { None };
        return (current, layout);
    }

    match current {
        DataType::Date => {
            let matched = match layout {
                Some(l) => l.parse(value).map(|_| l),
                // A date column without a known layout accepts any supported one.
                None => DateLayout::detect(value),
            };
            match matched {
                Some(l) => (DataType::Date, Some(l)),
                None => (DataType::String, None),
            }
        }
        DataType::Float => {
            if parses_float(value.trim()) {
                (DataType::Float, None)
            } else {
                (DataType::String, None)
            }
        }
        DataType::Int => {
            let trimmed = value.trim();
            if parses_int(trimmed) {
                (DataType::Int, None)
            } else if parses_float(trimmed) {
                (DataType::Float, None)
            } else {
                (DataType::String, None)
            }
        }
        DataType::String => {
            if let Some(l) = DateLayout::detect(value) {
                return (DataType::Date, Some(l));
            }
            let trimmed = value.trim();
            if parses_int(trimmed) {
                (DataType::Int, None)
            } else if parses_float(trimmed) {
                (DataType::Float, None)
            } else {
                (DataType::String, None)
            }
        }
    }
}
