use serde::{Deserialize, Serialize};

/// Option contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn name(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }

    pub fn from_name(name: &str) -> OptionType {
        if name.eq_ignore_ascii_case("put") {
            OptionType::Put
        } else {
            OptionType::Call
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Quote for a single option contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

impl OptionQuote {
    /// Mid price, falling back to last when the book is one-sided or empty.
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_uses_book_when_two_sided() {
        let quote = OptionQuote {
            bid: 4.00,
            ask: 4.10,
            last: 3.50,
        };
        assert!((quote.mid() - 4.05).abs() < 1e-9);
    }

    #[test]
    fn mid_falls_back_to_last() {
        let quote = OptionQuote {
            bid: 0.0,
            ask: 4.10,
            last: 3.50,
        };
        assert!((quote.mid() - 3.50).abs() < 1e-9);
    }
}
