use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Offset added to a household id to form the tag its bills are routed to.
///
/// Requests travel under the household's own id, replies under
/// `id + REPLY_OFFSET`, so the two address spaces never overlap on a shared
/// channel. Household ids must therefore stay strictly below this value.
pub const REPLY_OFFSET: u64 = 1_000_000;

/// Identifier of a household. Zero is reserved for "no sender".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct HouseholdId(NonZeroU32);

impl HouseholdId {
    /// Returns `None` for zero and for ids that would collide with reply tags.
    pub fn new(raw: u32) -> Option<Self> {
        if u64::from(raw) >= REPLY_OFFSET {
            return None;
        }
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Tag under which this household submits settlement requests.
    #[inline]
    pub fn request_tag(self) -> u64 {
        u64::from(self.get())
    }

    /// Tag under which the market addresses this household's bill.
    #[inline]
    pub fn reply_tag(self) -> u64 {
        u64::from(self.get()) + REPLY_OFFSET
    }

    pub fn from_request_tag(tag: u64) -> Option<Self> {
        u32::try_from(tag).ok().and_then(Self::new)
    }

    pub fn from_reply_tag(tag: u64) -> Option<Self> {
        tag.checked_sub(REPLY_OFFSET)
            .and_then(Self::from_request_tag)
    }
}

impl fmt::Display for HouseholdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for HouseholdId {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        HouseholdId::new(value).ok_or_else(|| format!("invalid household id {value}"))
    }
}

impl From<HouseholdId> for u32 {
    fn from(id: HouseholdId) -> Self {
        id.get()
    }
}

/// What a household does with surplus production.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Surplus goes to the anonymous pool for free.
    Give,
    /// Surplus is sold to the market immediately.
    Sell,
    /// Surplus waits in the giveaway queue and is sold at end of turn if unclaimed.
    GiveThenSell,
}

impl Behavior {
    pub const VARIANTS: [Behavior; 3] = [Behavior::Give, Behavior::Sell, Behavior::GiveThenSell];

    pub const fn code(self) -> u8 {
        match self {
            Behavior::Give => 1,
            Behavior::Sell => 2,
            Behavior::GiveThenSell => 3,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Behavior::Give),
            2 => Some(Behavior::Sell),
            3 => Some(Behavior::GiveThenSell),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Behavior::Give => "give",
            Behavior::Sell => "sell",
            Behavior::GiveThenSell => "give_then_sell",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
