//! Two-level identifiers
//!
//! An [`Identifier`] names one member inside one realm. It is rendered in
//! three textual forms:
//!
//! - legacy: `1-11` (decimal member, also the `Display` form)
//! - standard: `17-0:1101` (member as 16-bit hex groups)
//! - file: `17-0_1101` (standard form safe for file and service names)

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Largest member number representable in the standard scheme (48 bits)
pub const MAX_MEMBER: u64 = (1 << 48) - 1;

/// Textual form an identifier was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdForm {
    /// Decimal member number (`1-11`)
    Legacy,
    /// Colon separated hex groups (`17-0:1101`)
    Standard,
    /// Underscore separated hex groups (`17-0_1101`)
    File,
}

impl IdForm {
    /// Whether this form belongs to the new numbering scheme
    #[inline]
    #[must_use]
    pub fn is_renumbered(self) -> bool {
        !matches!(self, Self::Legacy)
    }
}

/// (realm, member) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    realm: u16,
    member: u64,
}

impl Identifier {
    /// Create identifier from raw numbers
    #[inline]
    #[must_use]
    pub const fn new(realm: u16, member: u64) -> Self {
        Self { realm, member }
    }

    /// Realm number
    #[inline]
    #[must_use]
    pub const fn realm(&self) -> u16 {
        self.realm
    }

    /// Member number within the realm
    #[inline]
    #[must_use]
    pub const fn member(&self) -> u64 {
        self.member
    }

    /// Legacy text form, e.g. `1-11`
    #[inline]
    #[must_use]
    pub fn legacy(&self) -> String {
        format!("{}-{}", self.realm, self.member)
    }

    /// Standard text form, e.g. `17-0:1101`
    #[inline]
    #[must_use]
    pub fn standard(&self) -> String {
        format!("{}-{}", self.realm, member_groups(self.member, ':'))
    }

    /// File-safe text form, e.g. `17-0_1101`
    #[inline]
    #[must_use]
    pub fn file_form(&self) -> String {
        format!("{}-{}", self.realm, member_groups(self.member, '_'))
    }

    /// Render in the given form
    #[must_use]
    pub fn render(&self, form: IdForm) -> String {
        match form {
            IdForm::Legacy => self.legacy(),
            IdForm::Standard => self.standard(),
            IdForm::File => self.file_form(),
        }
    }

    /// Parse any of the three forms, reporting which one was used
    ///
    /// # Errors
    /// Returns [`ParseError::InvalidIdentifier`] when the text is not
    /// `<realm>-<member>` or either number is out of range.
    pub fn parse_with_form(input: &str) -> Result<(Self, IdForm), ParseError> {
        let (realm_text, member_text) = input
            .split_once('-')
            .ok_or_else(|| ParseError::invalid(input, "missing '-' separator"))?;

        let realm = parse_decimal(input, realm_text, "realm")?;
        let realm = u16::try_from(realm)
            .map_err(|_| ParseError::invalid(input, "realm exceeds 16 bits"))?;

        let (member, form) = if member_text.contains(':') {
            (parse_groups(input, member_text, ':')?, IdForm::Standard)
        } else if member_text.contains('_') {
            (parse_groups(input, member_text, '_')?, IdForm::File)
        } else {
            (parse_decimal(input, member_text, "member")?, IdForm::Legacy)
        };

        if member > MAX_MEMBER {
            return Err(ParseError::invalid(input, "member exceeds 48 bits"));
        }

        Ok((Self::new(realm, member), form))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.realm, self.member)
    }
}

impl FromStr for Identifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_form(s).map(|(id, _)| id)
    }
}

fn member_groups(member: u64, separator: char) -> String {
    let high = (member >> 32) & 0xffff;
    let mid = (member >> 16) & 0xffff;
    let low = member & 0xffff;
    if high == 0 {
        format!("{mid:x}{separator}{low:x}")
    } else {
        format!("{high:x}{separator}{mid:x}{separator}{low:x}")
    }
}

fn parse_decimal(input: &str, text: &str, what: &str) -> Result<u64, ParseError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::invalid(input, format!("{what} is not a decimal number")));
    }
    text.parse::<u64>()
        .map_err(|e| ParseError::invalid(input, format!("{what}: {e}")))
}

fn parse_groups(input: &str, text: &str, separator: char) -> Result<u64, ParseError> {
    let groups: Vec<&str> = text.split(separator).collect();
    if !(2..=3).contains(&groups.len()) {
        return Err(ParseError::invalid(input, "expected two or three hex groups"));
    }

    let mut member = 0u64;
    for group in groups {
        if group.is_empty() || group.len() > 4 {
            return Err(ParseError::invalid(input, "hex group must have 1 to 4 digits"));
        }
        let value = u64::from_str_radix(group, 16)
            .map_err(|e| ParseError::invalid(input, format!("hex group '{group}': {e}")))?;
        member = (member << 16) | value;
    }
    Ok(member)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_roundtrip() {
        let id: Identifier = "1-11".parse().unwrap();
        assert_eq!(id, Identifier::new(1, 11));
        assert_eq!(id.to_string(), "1-11");
        assert_eq!(id.legacy(), "1-11");
    }

    #[test]
    fn standard_form_omits_zero_high_group() {
        let id = Identifier::new(17, 0x1101);
        assert_eq!(id.standard(), "17-0:1101");
        assert_eq!(id.file_form(), "17-0_1101");
    }

    #[test]
    fn standard_form_with_high_group() {
        let id = Identifier::new(17, 0xffaa_0001_0001);
        assert_eq!(id.standard(), "17-ffaa:1:1");
        assert_eq!(id.file_form(), "17-ffaa_1_1");
    }

    #[test]
    fn parse_reports_form() {
        let (id, form) = Identifier::parse_with_form("17-0:1101").unwrap();
        assert_eq!(id, Identifier::new(17, 0x1101));
        assert_eq!(form, IdForm::Standard);

        let (id, form) = Identifier::parse_with_form("17-ffaa_1_1").unwrap();
        assert_eq!(id, Identifier::new(17, 0xffaa_0001_0001));
        assert_eq!(form, IdForm::File);

        let (_, form) = Identifier::parse_with_form("1-11").unwrap();
        assert_eq!(form, IdForm::Legacy);
        assert!(!form.is_renumbered());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Identifier>().is_err());
        assert!("111".parse::<Identifier>().is_err());
        assert!("a-11".parse::<Identifier>().is_err());
        assert!("1-".parse::<Identifier>().is_err());
        assert!("1-+5".parse::<Identifier>().is_err());
        assert!("70000-1".parse::<Identifier>().is_err());
        assert!("1-0:12345".parse::<Identifier>().is_err());
        assert!("1-1:2:3:4".parse::<Identifier>().is_err());
    }

    #[test]
    fn parse_rejects_member_beyond_48_bits() {
        let result = "1-281474976710656".parse::<Identifier>();
        assert!(matches!(result, Err(ParseError::InvalidIdentifier { .. })));
    }

    #[test]
    fn render_matches_form_helpers() {
        let id = Identifier::new(60, 0x3c01);
        assert_eq!(id.render(IdForm::Legacy), id.legacy());
        assert_eq!(id.render(IdForm::Standard), "60-0:3c01");
        assert_eq!(id.render(IdForm::File), "60-0_3c01");
    }
}
