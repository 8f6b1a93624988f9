//! Service and router names that embed an identifier
//!
//! Legacy names look like `bs1-11-1`: a two-letter service code, the legacy
//! identifier and an instance index. Renumbered names carry the file form of
//! the new identifier instead: `bs17-0_1101-1`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::{MapError, ParseError};
use crate::identifier::{IdForm, Identifier};
use crate::mapper::IdentifierResolver;

/// Parsed service name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    code: String,
    id: Identifier,
    form: IdForm,
    index: String,
}

impl ServiceName {
    /// Two-letter service code (`bs`, `cs`, `br`, ...)
    #[inline]
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Embedded identifier
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.id
    }

    /// Form the identifier was written in
    #[inline]
    #[must_use]
    pub fn form(&self) -> IdForm {
        self.form
    }

    /// Instance index
    #[inline]
    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Same service and index, pointing at `new` in file form
    #[must_use]
    pub fn with_identifier(&self, new: Identifier) -> Self {
        Self {
            code: self.code.clone(),
            id: new,
            form: IdForm::File,
            index: self.index.clone(),
        }
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{}", self.code, self.id.render(self.form), self.index)
    }
}

impl FromStr for ServiceName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_error = || ParseError::NameFormat(s.to_string());

        let code = s.get(..2).ok_or_else(format_error)?;
        if !code.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(format_error());
        }

        let parts: Vec<&str> = s[2..].split('-').collect();
        let [realm, member, index] = parts.as_slice() else {
            return Err(format_error());
        };
        if index.is_empty() {
            return Err(format_error());
        }

        let (id, form) = Identifier::parse_with_form(&format!("{realm}-{member}"))
            .map_err(|_| format_error())?;

        Ok(Self {
            code: code.to_string(),
            id,
            form,
            index: (*index).to_string(),
        })
    }
}

/// Errors while rewriting a service name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// Name did not parse
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Embedded identifier could not be mapped
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Rewrite a legacy service name through `resolver`
///
/// # Errors
/// Returns [`ParseError::NameFormat`] for names that are not
/// `<code><realm>-<member>-<index>`, or the resolver's error.
///
/// # Examples
/// ```
/// # use renum_ident::{rewrite_service_name, IdentifierMapper, MapCache, Memoized, NumberingPlan};
/// let mapper = IdentifierMapper::new(NumberingPlan::default()).unwrap();
/// let mut cache = MapCache::new();
/// let mut resolver = Memoized::new(&mapper, &mut cache);
/// assert_eq!(rewrite_service_name("bs1-11-1", &mut resolver).unwrap(), "bs17-0_1101-1");
/// ```
pub fn rewrite_service_name(
    name: &str,
    resolver: &mut impl IdentifierResolver,
) -> Result<String, RewriteError> {
    let parsed: ServiceName = name.parse()?;
    let new = resolver.resolve(parsed.identifier())?;
    Ok(parsed.with_identifier(new).to_string())
}
