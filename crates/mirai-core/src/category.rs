use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TreasuryError;

/// What a stream or vesting grant pays for. Closed set: decoding any other
/// tag fails with [`TreasuryError::InvalidPaymentCategory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentCategory {
    Contributors,
    Grants,
    Operations,
    Marketing,
    Development,
    Other,
}

impl PaymentCategory {
    pub const ALL: [PaymentCategory; 6] = [
        PaymentCategory::Contributors,
        PaymentCategory::Grants,
        PaymentCategory::Operations,
        PaymentCategory::Marketing,
        PaymentCategory::Development,
        PaymentCategory::Other,
    ];

    pub fn tag(self) -> u8 {
        match self {
            PaymentCategory::Contributors => 0,
            PaymentCategory::Grants => 1,
            PaymentCategory::Operations => 2,
            PaymentCategory::Marketing => 3,
            PaymentCategory::Development => 4,
            PaymentCategory::Other => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentCategory::Contributors => "contributors",
            PaymentCategory::Grants => "grants",
            PaymentCategory::Operations => "operations",
            PaymentCategory::Marketing => "marketing",
            PaymentCategory::Development => "development",
            PaymentCategory::Other => "other",
        }
    }
}

impl TryFrom<u8> for PaymentCategory {
    type Error = TreasuryError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(PaymentCategory::Contributors),
            1 => Ok(PaymentCategory::Grants),
            2 => Ok(PaymentCategory::Operations),
            3 => Ok(PaymentCategory::Marketing),
            4 => Ok(PaymentCategory::Development),
            5 => Ok(PaymentCategory::Other),
            other => Err(TreasuryError::InvalidPaymentCategory(other.to_string())),
        }
    }
}

impl FromStr for PaymentCategory {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        PaymentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| TreasuryError::InvalidPaymentCategory(s.to_string()))
    }
}

impl fmt::Display for PaymentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
