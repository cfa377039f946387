/// Pool-found blocks ("rounds") and their lifecycle category.
///
/// A round is stored in `{coin}:blocksPending` as `blockHash:txHash:height` and
/// leaves that set exactly once, for one of the confirmed / orphaned / kicked sets.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundCategory {
    /// Not yet final; left untouched this cycle.
    Pending,
    /// Coinbase confirmed, reward payable.
    Generate,
    /// Block lost to a competing chain.
    Orphan,
    /// The daemon does not know the transaction.
    Kicked,
}

impl RoundCategory {
    /// Maps a `gettransaction` detail category. Anything but `generate` / `orphan`
    /// (e.g. `immature`) keeps the round pending.
    pub fn from_daemon(category: &str) -> Self {
        match category {
            "generate" => RoundCategory::Generate,
            "orphan" => RoundCategory::Orphan,
            _ => RoundCategory::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundCategory::Pending => "pending",
            RoundCategory::Generate => "generate",
            RoundCategory::Orphan => "orphan",
            RoundCategory::Kicked => "kicked",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("malformed round token {0:?}")]
pub struct TokenError(pub String);

/// Decoded `blockHash:txHash:height`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoundToken {
    pub block_hash: String,
    pub tx_hash: String,
    pub height: u64,
}

impl RoundToken {
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RoundToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.block_hash, self.tx_hash, self.height)
    }
}

impl FromStr for RoundToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [block_hash, tx_hash, height] = parts.as_slice() else {
            return Err(TokenError(s.to_string()));
        };
        if block_hash.is_empty() || tx_hash.is_empty() {
            return Err(TokenError(s.to_string()));
        }
        let height = height.parse::<u64>().map_err(|_| TokenError(s.to_string()))?;

        Ok(Self {
            block_hash: block_hash.to_string(),
            tx_hash: tx_hash.to_string(),
            height,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub token: RoundToken,
    /// Exact member string in the pending set; used verbatim for SMOVE.
    pub serialized: String,
    pub category: RoundCategory,
    /// Coinbase value in display units, set for `Generate` rounds.
    pub reward: Option<Decimal>,
    /// Share counts per worker, loaded for orphaned / kicked rounds.
    pub worker_shares: Option<BTreeMap<String, Decimal>>,
    pub can_delete_shares: bool,
}

impl Round {
    pub fn parse(serialized: &str) -> Result<Self, TokenError> {
        let token = serialized.parse::<RoundToken>()?;
        Ok(Self {
            token,
            serialized: serialized.to_string(),
            category: RoundCategory::Pending,
            reward: None,
            worker_shares: None,
            can_delete_shares: false,
        })
    }

    pub fn height(&self) -> u64 {
        self.token.height
    }

    pub fn is_terminal(&self) -> bool {
        self.category != RoundCategory::Pending
    }
}

/// Shares of a round may be deleted only when every other round at the same
/// height is orphaned or kicked. A confirmed, immature or unreadable sibling
/// may still claim the `round{height}` hash.
///
/// `rounds` must be the full set loaded this cycle, pending rounds included.
pub fn can_delete_shares(round: &Round, rounds: &[Round]) -> bool {
    rounds.iter().all(|other| {
        other.serialized == round.serialized
            || other.height() != round.height()
            || matches!(other.category, RoundCategory::Orphan | RoundCategory::Kicked)
    })
}

/// Sets `can_delete_shares` on every orphaned / kicked round.
pub fn mark_deletable(rounds: &mut [Round]) {
    let flags: Vec<bool> = rounds
        .iter()
        .map(|r| {
            matches!(r.category, RoundCategory::Orphan | RoundCategory::Kicked)
                && can_delete_shares(r, rounds)
        })
        .collect();
    for (round, flag) in rounds.iter_mut().zip(flags) {
        round.can_delete_shares = flag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(token: &str, category: RoundCategory) -> Round {
        let mut r = Round::parse(token).unwrap();
        r.category = category;
        r
    }

    #[test]
    fn test_token_parse_and_encode() {
        let token: RoundToken = "00ab:f00d:1200".parse().unwrap();
        assert_eq!(token.block_hash, "00ab");
        assert_eq!(token.tx_hash, "f00d");
        assert_eq!(token.height, 1200);
        assert_eq!(token.encode(), "00ab:f00d:1200");
    }

    #[test]
    fn test_token_rejects_malformed() {
        assert!("abc".parse::<RoundToken>().is_err());
        assert!("a:b".parse::<RoundToken>().is_err());
        assert!("a:b:c".parse::<RoundToken>().is_err());
        assert!("a:b:1:2".parse::<RoundToken>().is_err());
        assert!(":b:1".parse::<RoundToken>().is_err());
        assert!("a:b:-1".parse::<RoundToken>().is_err());
    }

    #[test]
    fn test_round_keeps_serialized_member() {
        let r = Round::parse("h:t:0100").unwrap();
        assert_eq!(r.height(), 100);
        assert_eq!(r.serialized, "h:t:0100");
        assert_eq!(r.category, RoundCategory::Pending);
    }

    #[test]
    fn test_daemon_category_mapping() {
        assert_eq!(RoundCategory::from_daemon("generate"), RoundCategory::Generate);
        assert_eq!(RoundCategory::from_daemon("orphan"), RoundCategory::Orphan);
        assert_eq!(RoundCategory::from_daemon("immature"), RoundCategory::Pending);
        assert_eq!(RoundCategory::from_daemon("receive"), RoundCategory::Pending);
    }

    #[test]
    fn test_kicked_sibling_of_confirmed_round_keeps_shares() {
        let mut rounds = vec![
            round("h1:t1:100", RoundCategory::Generate),
            round("h2:t2:100", RoundCategory::Kicked),
            round("h3:t3:101", RoundCategory::Orphan),
        ];
        mark_deletable(&mut rounds);

        assert!(!rounds[0].can_delete_shares);
        assert!(!rounds[1].can_delete_shares);
        assert!(rounds[2].can_delete_shares);
    }

    #[test]
    fn test_pending_sibling_keeps_shares() {
        let mut rounds = vec![
            round("h1:t1:100", RoundCategory::Pending),
            round("h2:t2:100", RoundCategory::Orphan),
            round("h3:t3:100", RoundCategory::Kicked),
        ];
        mark_deletable(&mut rounds);
        assert!(rounds.iter().all(|r| !r.can_delete_shares));
    }

    #[test]
    fn test_orphan_siblings_may_both_delete() {
        let mut rounds = vec![
            round("h1:t1:100", RoundCategory::Orphan),
            round("h2:t2:100", RoundCategory::Kicked),
        ];
        mark_deletable(&mut rounds);
        assert!(rounds.iter().all(|r| r.can_delete_shares));
    }
}
