//! Panel label alphabets
//!
//! Three alphabets are recognized: uppercase letters (`A, B, … Z, AA, AB, …`),
//! Roman numerals (`I, II, III, …`) and decimal integers (`1, 2, 3, …`).
//! Each alphabet maps labels to 1-based ordinals and back.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static ROMAN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^M{0,3}(CM|CD|D?C{0,3})(XC|XL|L?X{0,3})(IX|IV|V?I{0,3})$")
        .expect("Invalid roman numeral regex")
});

/// Label alphabet of a figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelAlphabet {
    Letters,
    Roman,
    Numeric,
}

impl fmt::Display for LabelAlphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabelAlphabet::Letters => "letters",
            LabelAlphabet::Roman => "roman",
            LabelAlphabet::Numeric => "numeric",
        };
        f.write_str(name)
    }
}

impl LabelAlphabet {
    /// First symbol of the alphabet
    pub fn first(&self) -> &'static str {
        match self {
            LabelAlphabet::Letters => "A",
            LabelAlphabet::Roman => "I",
            LabelAlphabet::Numeric => "1",
        }
    }

    /// 1-based ordinal of a cleaned label, or None if the label is not in this alphabet
    pub fn ordinal(&self, label: &str) -> Option<usize> {
        match self {
            LabelAlphabet::Letters => letters_to_int(label),
            LabelAlphabet::Roman => roman_to_int(label),
            LabelAlphabet::Numeric => label
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0 && label.chars().all(|c| c.is_ascii_digit())),
        }
    }

    /// Label for a 1-based ordinal
    ///
    /// Roman numerals stop at 3999; letters and integers are unbounded.
    pub fn symbol(&self, ordinal: usize) -> Option<String> {
        if ordinal == 0 {
            return None;
        }
        match self {
            LabelAlphabet::Letters => Some(int_to_letters(ordinal)),
            LabelAlphabet::Roman => int_to_roman(ordinal),
            LabelAlphabet::Numeric => Some(ordinal.to_string()),
        }
    }

    /// Whether the label belongs to this alphabet
    pub fn contains(&self, label: &str) -> bool {
        self.ordinal(label).is_some()
    }

    /// Labels `first..=last` by ordinal
    pub fn sequence(&self, last_ordinal: usize) -> Vec<String> {
        (1..=last_ordinal).filter_map(|n| self.symbol(n)).collect()
    }
}

/// Strip brackets, dots and whitespace; uppercase letters and numerals
///
/// `"(a)"` → `"A"`, `" ii. "` → `"II"`, `"3)"` → `"3"`.
pub fn clean_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '(' | ')' | '.' | ':') && !c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Whether a cleaned label is a well-formed Roman numeral
pub fn is_roman(label: &str) -> bool {
    !label.is_empty() && ROMAN_PATTERN.is_match(label)
}

/// Roman numeral → integer (uppercase, strictly formed)
pub fn roman_to_int(label: &str) -> Option<usize> {
    if !is_roman(label) {
        return None;
    }
    let value = |c: char| match c {
        'I' => 1,
        'V' => 5,
        'X' => 10,
        'L' => 50,
        'C' => 100,
        'D' => 500,
        'M' => 1000,
        _ => 0,
    };
    let digits: Vec<i64> = label.chars().map(value).collect();
    let mut total = 0i64;
    for (i, &d) in digits.iter().enumerate() {
        match digits.get(i + 1) {
            Some(&next) if next > d => total -= d,
            _ => total += d,
        }
    }
    usize::try_from(total).ok()
}

/// Integer → Roman numeral (1..=3999)
pub fn int_to_roman(mut n: usize) -> Option<String> {
    if n == 0 || n > 3999 {
        return None;
    }
    const TABLE: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in TABLE {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    Some(out)
}

// Bijective base-26: A=1 … Z=26, AA=27
fn letters_to_int(label: &str) -> Option<usize> {
    if label.is_empty() || !label.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    label.chars().try_fold(0usize, |acc, c| {
        acc.checked_mul(26)?
            .checked_add(usize::from(c as u8 - b'A') + 1)
    })
}

fn int_to_letters(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}
