//! Lookup key (CPF) normalization

/// A normalized lookup key: exactly 11 digits, not all identical
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey(String);

impl LookupKey {
    /// Strip everything but digits and validate the result
    pub fn parse(input: &str) -> Option<Self> {
        let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 11 {
            return None;
        }

        let first = digits.as_bytes()[0];
        if digits.bytes().all(|b| b == first) {
            return None;
        }

        Some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First three digits followed by a mask, for logs
    pub fn masked(&self) -> String {
        format!("{}***", &self.0[..3])
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.masked())
    }
}
