//! MRZ field extraction
//!
//! Splits recognized MRZ lines into named fields using the fixed ICAO 9303
//! layouts and verifies their check digits with the 7-3-1 weighting.

use std::fmt;

use thiserror::Error;

use crate::engine::result::Zone;

/// MRZ document layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentType {
    /// ID card, 3 lines of 30
    Td1,
    /// ID card, 2 lines of 36
    Td2,
    /// Passport, 2 lines of 44
    Td3,
    /// Visa, 2 lines of 44
    MrvA,
    /// Visa, 2 lines of 36
    MrvB,
}

impl DocumentType {
    /// Pick the layout from the line shape and the first character
    pub fn detect(line_count: usize, line_len: usize, first: Option<char>) -> Option<Self> {
        match (line_count, line_len) {
            (3, 30) => Some(DocumentType::Td1),
            (2, 44) if first == Some('P') => Some(DocumentType::Td3),
            (2, 44) => Some(DocumentType::MrvA),
            (2, 36) if first == Some('V') => Some(DocumentType::MrvB),
            (2, 36) => Some(DocumentType::Td2),
            _ => None,
        }
    }

    fn layout(&self) -> &'static [&'static [FieldDef]] {
        match self {
            DocumentType::Td1 => &[TD1_LINE0, TD1_LINE1, TD1_LINE2],
            DocumentType::Td2 => &[TD2_LINE0, TD2_LINE1],
            DocumentType::Td3 => &[TD3_LINE0, TD3_LINE1],
            DocumentType::MrvA => &[MRVA_LINE0, MRVA_LINE1],
            DocumentType::MrvB => &[MRVB_LINE0, MRVB_LINE1],
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentType::Td1 => "TD1",
            DocumentType::Td2 => "TD2",
            DocumentType::Td3 => "TD3",
            DocumentType::MrvA => "MRV-A",
            DocumentType::MrvB => "MRV-B",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 2 or 3 lines, got {0}")]
    LineCount(usize),

    #[error("line {line} has {found} characters, expected {expected}")]
    LengthMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("no MRZ layout has {lines} lines of {length} characters")]
    UnknownLayout { lines: usize, length: usize },

    #[error("field {field} on line {line} is invalid: {value:?}")]
    InvalidField {
        field: &'static str,
        line: usize,
        value: String,
    },
}

/// Allowed characters of a field
#[derive(Debug, Clone, Copy)]
enum CharClass {
    /// `[A-Z0-9<]`
    Any,
    Digit,
    Alpha,
    /// `M`, `F`, `X` or `<`
    Sex,
    /// First character from the set, the rest `Any`
    DocCode(&'static str),
    /// Holder names, split into surname and given names
    Names,
}

impl CharClass {
    fn accepts(&self, value: &str) -> bool {
        let any = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '<';
        match self {
            CharClass::Any | CharClass::Names => value.chars().all(any),
            CharClass::Digit => value.chars().all(|c| c.is_ascii_digit()),
            CharClass::Alpha => value.chars().all(|c| c.is_ascii_uppercase()),
            CharClass::Sex => value.chars().all(|c| matches!(c, 'M' | 'F' | 'X' | '<')),
            CharClass::DocCode(first) => {
                let mut chars = value.chars();
                chars.next().is_some_and(|c| first.contains(c)) && chars.all(any)
            }
        }
    }
}

#[derive(Debug)]
struct FieldDef {
    name: &'static str,
    len: usize,
    class: CharClass,
}

const fn field(name: &'static str, len: usize, class: CharClass) -> FieldDef {
    FieldDef { name, len, class }
}

const TD1_LINE0: &[FieldDef] = &[
    field("doc", 2, CharClass::DocCode("ACI")),
    field("country", 3, CharClass::Alpha),
    field("doc_number", 9, CharClass::Any),
    field("doc_number_hash", 1, CharClass::Digit),
    field("optional_data1", 15, CharClass::Any),
];

const TD1_LINE1: &[FieldDef] = &[
    field("birth_date", 6, CharClass::Digit),
    field("birth_date_hash", 1, CharClass::Digit),
    field("sex", 1, CharClass::Sex),
    field("expiry_date", 6, CharClass::Digit),
    field("expiry_date_hash", 1, CharClass::Digit),
    field("nationality", 3, CharClass::Alpha),
    field("optional_data2", 11, CharClass::Any),
    field("final_hash", 1, CharClass::Digit),
];

const TD1_LINE2: &[FieldDef] = &[field("names", 30, CharClass::Names)];

const TD2_LINE0: &[FieldDef] = &[
    field("doc", 2, CharClass::DocCode("ACI")),
    field("country", 3, CharClass::Alpha),
    field("names", 31, CharClass::Names),
];

const TD2_LINE1: &[FieldDef] = &[
    field("doc_number", 9, CharClass::Any),
    field("doc_number_hash", 1, CharClass::Digit),
    field("nationality", 3, CharClass::Alpha),
    field("birth_date", 6, CharClass::Digit),
    field("birth_date_hash", 1, CharClass::Digit),
    field("sex", 1, CharClass::Sex),
    field("expiry_date", 6, CharClass::Digit),
    field("expiry_date_hash", 1, CharClass::Digit),
    field("optional_data1", 7, CharClass::Any),
    field("final_hash", 1, CharClass::Digit),
];

const TD3_LINE0: &[FieldDef] = &[
    field("doc", 2, CharClass::DocCode("P")),
    field("country", 3, CharClass::Alpha),
    field("names", 39, CharClass::Names),
];

const TD3_LINE1: &[FieldDef] = &[
    field("doc_number", 9, CharClass::Any),
    field("doc_number_hash", 1, CharClass::Digit),
    field("nationality", 3, CharClass::Alpha),
    field("birth_date", 6, CharClass::Digit),
    field("birth_date_hash", 1, CharClass::Digit),
    field("sex", 1, CharClass::Sex),
    field("expiry_date", 6, CharClass::Digit),
    field("expiry_date_hash", 1, CharClass::Digit),
    field("personal_number", 14, CharClass::Any),
    field("personal_number_hash", 1, CharClass::Digit),
    field("final_hash", 1, CharClass::Digit),
];

const MRVA_LINE0: &[FieldDef] = &[
    field("doc", 2, CharClass::DocCode("V")),
    field("country", 3, CharClass::Alpha),
    field("names", 39, CharClass::Names),
];

const MRVA_LINE1: &[FieldDef] = &[
    field("doc_number", 9, CharClass::Any),
    field("doc_number_hash", 1, CharClass::Digit),
    field("nationality", 3, CharClass::Alpha),
    field("birth_date", 6, CharClass::Digit),
    field("birth_date_hash", 1, CharClass::Digit),
    field("sex", 1, CharClass::Sex),
    field("expiry_date", 6, CharClass::Digit),
    field("expiry_date_hash", 1, CharClass::Digit),
    field("optional_data", 16, CharClass::Any),
];

const MRVB_LINE0: &[FieldDef] = &[
    field("doc", 2, CharClass::DocCode("V")),
    field("country", 3, CharClass::Alpha),
    field("names", 31, CharClass::Names),
];

const MRVB_LINE1: &[FieldDef] = &[
    field("doc_number", 9, CharClass::Any),
    field("doc_number_hash", 1, CharClass::Digit),
    field("nationality", 3, CharClass::Alpha),
    field("birth_date", 6, CharClass::Digit),
    field("birth_date_hash", 1, CharClass::Digit),
    field("sex", 1, CharClass::Sex),
    field("expiry_date", 6, CharClass::Digit),
    field("expiry_date_hash", 1, CharClass::Digit),
    field("optional_data", 8, CharClass::Any),
];

/// A check digit and the character ranges it covers, as `(line, start, end)`
struct CheckDef {
    name: &'static str,
    ranges: &'static [(usize, usize, usize)],
    digit: (usize, usize),
}

const fn check(
    name: &'static str,
    ranges: &'static [(usize, usize, usize)],
    digit: (usize, usize),
) -> CheckDef {
    CheckDef { name, ranges, digit }
}

// The composite covers the data fields together with their own check digits
const TD1_CHECKS: &[CheckDef] = &[
    check("doc_number", &[(0, 5, 14)], (0, 14)),
    check("birth_date", &[(1, 0, 6)], (1, 6)),
    check("expiry_date", &[(1, 8, 14)], (1, 14)),
    check(
        "composite",
        &[(0, 5, 30), (1, 0, 7), (1, 8, 15), (1, 18, 29)],
        (1, 29),
    ),
];

const TD2_CHECKS: &[CheckDef] = &[
    check("doc_number", &[(1, 0, 9)], (1, 9)),
    check("birth_date", &[(1, 13, 19)], (1, 19)),
    check("expiry_date", &[(1, 21, 27)], (1, 27)),
    check("composite", &[(1, 0, 10), (1, 13, 20), (1, 21, 35)], (1, 35)),
];

const TD3_CHECKS: &[CheckDef] = &[
    check("doc_number", &[(1, 0, 9)], (1, 9)),
    check("birth_date", &[(1, 13, 19)], (1, 19)),
    check("expiry_date", &[(1, 21, 27)], (1, 27)),
    check("personal_number", &[(1, 28, 42)], (1, 42)),
    check("composite", &[(1, 0, 10), (1, 13, 20), (1, 21, 43)], (1, 43)),
];

const MRV_CHECKS: &[CheckDef] = &[
    check("doc_number", &[(1, 0, 9)], (1, 9)),
    check("birth_date", &[(1, 13, 19)], (1, 19)),
    check("expiry_date", &[(1, 21, 27)], (1, 27)),
];

/// ICAO 9303 check digit: digits count as themselves, `A`..`Z` as 10..35,
/// filler as 0, weighted 7, 3, 1 repeating.
pub fn check_digit(data: impl IntoIterator<Item = u8>) -> u8 {
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let sum: u32 = data
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let value = match c {
                b'0'..=b'9' => u32::from(c - b'0'),
                b'A'..=b'Z' => u32::from(c - b'A') + 10,
                _ => 0,
            };
            value * WEIGHTS[i % 3]
        })
        .sum();
    (sum % 10) as u8
}

/// Outcome of one check digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub expected: u8,
    /// Digit printed in the zone
    pub found: u8,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.expected == self.found
    }
}

/// Fields extracted from one MRZ, in reading order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrzDocument {
    pub doc_type: DocumentType,
    pub fields: Vec<(String, String)>,
    pub lines: Vec<String>,
}

impl MrzDocument {
    /// First field named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn surname(&self) -> Option<&str> {
        self.get("surname")
    }

    pub fn given_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(key, _)| key.starts_with("given_name_"))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Recompute every check digit of the layout, composite last
    pub fn check_digits(&self) -> Vec<CheckResult> {
        let checks = match self.doc_type {
            DocumentType::Td1 => TD1_CHECKS,
            DocumentType::Td2 => TD2_CHECKS,
            DocumentType::Td3 => TD3_CHECKS,
            DocumentType::MrvA | DocumentType::MrvB => MRV_CHECKS,
        };
        checks
            .iter()
            .map(|def| {
                let data = def.ranges.iter().flat_map(|&(line, start, end)| {
                    self.lines[line].as_bytes()[start..end].iter().copied()
                });
                let (line, pos) = def.digit;
                CheckResult {
                    name: def.name,
                    expected: check_digit(data),
                    found: self.lines[line].as_bytes()[pos].wrapping_sub(b'0'),
                }
            })
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.check_digits().iter().all(CheckResult::is_ok)
    }
}

/// Extract the fields of a 2 or 3 line MRZ
pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Result<MrzDocument, ParseError> {
    if !(2..=3).contains(&lines.len()) {
        return Err(ParseError::LineCount(lines.len()));
    }

    let first = lines[0].as_ref();
    let expected = first.len();
    for (index, line) in lines.iter().enumerate().skip(1) {
        let found = line.as_ref().len();
        if found != expected {
            return Err(ParseError::LengthMismatch {
                line: index,
                expected,
                found,
            });
        }
    }

    let doc_type = DocumentType::detect(lines.len(), expected, first.chars().next()).ok_or(
        ParseError::UnknownLayout {
            lines: lines.len(),
            length: expected,
        },
    )?;

    let mut fields = Vec::new();
    for (index, (line, defs)) in lines.iter().zip(doc_type.layout()).enumerate() {
        let line = line.as_ref();
        let mut offset = 0;
        for def in defs.iter() {
            let value = line.get(offset..offset + def.len).unwrap_or_default();
            offset += def.len;
            if value.len() != def.len || !def.class.accepts(value) {
                return Err(ParseError::InvalidField {
                    field: def.name,
                    line: index,
                    value: value.to_string(),
                });
            }

            if let CharClass::Names = def.class {
                push_names(value, &mut fields);
            } else {
                fields.push((def.name.to_string(), value.to_string()));
            }
        }
    }

    Ok(MrzDocument {
        doc_type,
        fields,
        lines: lines.iter().map(|line| line.as_ref().to_string()).collect(),
    })
}

/// Extract the fields of a detected zone
pub fn parse_zone(zone: &Zone) -> Result<MrzDocument, ParseError> {
    parse_lines(&zone.texts())
}

fn push_names(value: &str, fields: &mut Vec<(String, String)>) {
    let names = value.replace('<', " ");
    let mut names = names.split_whitespace();
    if let Some(surname) = names.next() {
        fields.push(("surname".to_string(), surname.to_string()));
    }
    for (i, given) in names.enumerate() {
        fields.push((format!("given_name_{i}"), given.to_string()));
    }
}
