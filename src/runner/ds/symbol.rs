use std::fmt;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// A symbol value. Two symbols are the same symbol only if they come from the
/// same `new` call; the description plays no part in identity.
#[derive(Debug, Clone)]
pub struct SymbolData {
    id: Uuid,
    description: String,
}

impl SymbolData {
    pub fn new(description: String) -> Self {
        SymbolData {
            id: Uuid::new_v4(),
            description,
        }
    }

    pub fn new_empty() -> Self {
        SymbolData::new(String::new())
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for SymbolData {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SymbolData {}

impl Hash for SymbolData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Display for SymbolData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_compare_by_identity() {
        let a = SymbolData::new("tag".to_string());
        let b = SymbolData::new("tag".to_string());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.to_string(), "Symbol(tag)");
    }
}
