use std::collections::BTreeMap;
use std::fmt;

/// String properties attached to a service registration, e.g. an
/// `instance-id` distinguishing several services of the same type.
pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Clause {
    Equals(String, String),
    Present(String),
    Absent(String),
}

impl Clause {
    fn matches(&self, properties: &Properties) -> bool {
        match self {
            Clause::Equals(key, value) => properties.get(key) == Some(value),
            Clause::Present(key) => properties.contains_key(key),
            Clause::Absent(key) => !properties.contains_key(key),
        }
    }
}

/// A conjunction of property constraints used to select among services (or
/// event sources) registered under the same capability.
///
/// The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PropertyFilter {
    clauses: Vec<Clause>,
}

impl PropertyFilter {
    pub fn any() -> Self {
        Self::default()
    }

    /// Requires `key` to be present with exactly `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push(Clause::Equals(key.into(), value.into()));
        self
    }

    pub fn present(mut self, key: impl Into<String>) -> Self {
        self.clauses.push(Clause::Present(key.into()));
        self
    }

    pub fn absent(mut self, key: impl Into<String>) -> Self {
        self.clauses.push(Clause::Absent(key.into()));
        self
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        self.clauses.iter().all(|clause| clause.matches(properties))
    }
}

impl fmt::Display for PropertyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("(*)");
        }
        f.write_str("(&")?;
        for clause in &self.clauses {
            match clause {
                Clause::Equals(key, value) => write!(f, "({key}={value})")?,
                Clause::Present(key) => write!(f, "({key}=*)")?,
                Clause::Absent(key) => write!(f, "(!({key}=*))")?,
            }
        }
        f.write_str(")")
    }
}

/// Builds a [`Properties`] map from key/value pairs.
pub fn properties<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Properties
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
