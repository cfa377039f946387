/// Round reconciliation against the daemon wallet.
///
/// One ordered batch: a `gettransaction` per round plus a trailing
/// `getaccount(pool address)`. Each reply decides the round's category; rounds
/// still pending are dropped from the cycle.

use serde_json::{json, Value};

use super::context::PoolContext;
use super::round::{mark_deletable, Round, RoundCategory};
use crate::blockchain::daemon::decimal_from_json;
use crate::blockchain::{ChainDaemon, RpcCall, RpcReply};
use crate::error::{CycleError, RPC_INVALID_ADDRESS_OR_KEY};

#[derive(Debug, Default)]
pub struct Classified {
    /// Generate / orphan / kicked rounds, shares-deletion flags set.
    pub rounds: Vec<Round>,
    /// Wallet account owning the pool address; `sendmany` draws from it.
    pub account: String,
}

pub async fn classify(
    ctx: &PoolContext,
    daemon: &dyn ChainDaemon,
    mut rounds: Vec<Round>,
) -> Result<Classified, CycleError> {
    let mut calls: Vec<RpcCall> = rounds
        .iter()
        .map(|r| RpcCall::new("gettransaction", json!([r.token.tx_hash])))
        .collect();
    calls.push(RpcCall::new("getaccount", json!([ctx.address])));

    let replies = daemon.batch(&calls).await.map_err(CycleError::Reconcile)?;
    if replies.len() != calls.len() {
        return Err(CycleError::ReplyCountMismatch { expected: calls.len(), got: replies.len() });
    }

    for (round, reply) in rounds.iter_mut().zip(&replies) {
        classify_round(ctx, round, reply);
    }

    let account = replies
        .last()
        .and_then(RpcReply::value)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    mark_deletable(&mut rounds);
    rounds.retain(Round::is_terminal);

    Ok(Classified { rounds, account })
}

fn classify_round(ctx: &PoolContext, round: &mut Round, reply: &RpcReply) {
    if let Some(err) = &reply.error {
        if err.code == RPC_INVALID_ADDRESS_OR_KEY {
            tracing::warn!(coin = %ctx.coin, "Daemon reports invalid transaction: {}", round.token.tx_hash);
            round.category = RoundCategory::Kicked;
        } else {
            tracing::error!(
                coin = %ctx.coin,
                "Odd error with gettransaction {}: {} ({})",
                round.token.tx_hash,
                err.message,
                err.code
            );
        }
        return;
    }

    let Some(tx) = reply.value() else {
        tracing::error!(coin = %ctx.coin, "gettransaction {} returned no result", round.token.tx_hash);
        return;
    };

    let details = match tx.get("details").and_then(Value::as_array) {
        Some(details) if !details.is_empty() => details,
        _ => {
            tracing::warn!(coin = %ctx.coin, "Daemon reports no details for transaction: {}", round.token.tx_hash);
            round.category = RoundCategory::Kicked;
            return;
        }
    };

    let generation = details
        .iter()
        .find(|d| d.get("address").and_then(Value::as_str) == Some(ctx.address.as_str()))
        .or_else(|| if details.len() == 1 { details.first() } else { None });

    let Some(generation) = generation else {
        tracing::error!(
            coin = %ctx.coin,
            "Missing output details to pool address for transaction {}",
            round.token.tx_hash
        );
        return;
    };

    match generation.get("category").and_then(Value::as_str).map(RoundCategory::from_daemon) {
        Some(RoundCategory::Generate) => {
            let reward = ["amount", "value"]
                .iter()
                .filter_map(|field| generation.get(*field).and_then(decimal_from_json))
                .find(|amount| amount.is_sign_positive() && !amount.is_zero());
            match reward {
                Some(reward) => {
                    round.category = RoundCategory::Generate;
                    round.reward = Some(reward);
                }
                None => tracing::error!(
                    coin = %ctx.coin,
                    "Confirmed generation {} carries no amount, leaving it pending",
                    round.token.tx_hash
                ),
            }
        }
        Some(RoundCategory::Orphan) => round.category = RoundCategory::Orphan,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::scripted::ScriptedDaemon;
    use crate::error::RpcError;
    use crate::payout::context::test_context;
    use rust_decimal_macros::dec;

    fn rounds(tokens: &[&str]) -> Vec<Round> {
        tokens.iter().map(|t| Round::parse(t).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_classify_by_category() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new()
            .with_account(json!("pool"))
            .with_generate("tGen", "poolAddr", dec!(50))
            .with_orphan("tOrph", "poolAddr")
            .with_immature("tImm", "poolAddr");

        let out = classify(
            &ctx,
            &daemon,
            rounds(&["h1:tGen:100", "h2:tOrph:101", "h3:tImm:102", "h4:tGone:103"]),
        )
        .await
        .unwrap();

        assert_eq!(out.account, "pool");
        let cats: Vec<(&str, RoundCategory)> = out
            .rounds
            .iter()
            .map(|r| (r.token.tx_hash.as_str(), r.category))
            .collect();
        assert_eq!(
            cats,
            vec![
                ("tGen", RoundCategory::Generate),
                ("tOrph", RoundCategory::Orphan),
                ("tGone", RoundCategory::Kicked),
            ]
        );
        assert_eq!(out.rounds[0].reward, Some(dec!(50)));
        assert!(out.rounds[1].can_delete_shares);
    }

    #[tokio::test]
    async fn test_immature_sibling_blocks_share_deletion() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new()
            .with_immature("tImm", "poolAddr")
            .with_orphan("tOrph", "poolAddr");

        let out = classify(&ctx, &daemon, rounds(&["h1:tImm:100", "h2:tOrph:100"])).await.unwrap();
        assert_eq!(out.rounds.len(), 1);
        assert_eq!(out.rounds[0].category, RoundCategory::Orphan);
        assert!(!out.rounds[0].can_delete_shares);
    }

    #[tokio::test]
    async fn test_other_rpc_error_keeps_round_pending() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_reply("tErr", RpcReply::err(-1, "database locked"));

        let out = classify(&ctx, &daemon, rounds(&["h:tErr:100"])).await.unwrap();
        assert!(out.rounds.is_empty());
    }

    #[tokio::test]
    async fn test_empty_details_is_kicked() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_details("tEmpty", json!([]));

        let out = classify(&ctx, &daemon, rounds(&["h:tEmpty:100"])).await.unwrap();
        assert_eq!(out.rounds[0].category, RoundCategory::Kicked);
    }

    #[tokio::test]
    async fn test_single_foreign_detail_is_used() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_generate("tGen", "otherAddr", dec!(12.5));

        let out = classify(&ctx, &daemon, rounds(&["h:tGen:100"])).await.unwrap();
        assert_eq!(out.rounds[0].reward, Some(dec!(12.5)));
    }

    #[tokio::test]
    async fn test_no_matching_detail_keeps_pending() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_details(
            "tMulti",
            json!([
                { "address": "x", "category": "generate", "amount": 1 },
                { "address": "y", "category": "generate", "amount": 1 }
            ]),
        );

        let out = classify(&ctx, &daemon, rounds(&["h:tMulti:100"])).await.unwrap();
        assert!(out.rounds.is_empty());
    }

    #[tokio::test]
    async fn test_generate_without_amount_falls_back_to_value() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_details(
            "tGen",
            json!([{ "address": "poolAddr", "category": "generate", "amount": 0, "value": 3.25 }]),
        );

        let out = classify(&ctx, &daemon, rounds(&["h:tGen:100"])).await.unwrap();
        assert_eq!(out.rounds[0].reward, Some(dec!(3.25)));
    }

    #[tokio::test]
    async fn test_null_account_is_empty() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_account(Value::Null);

        let out = classify(&ctx, &daemon, Vec::new()).await.unwrap();
        assert_eq!(out.account, "");
    }

    #[tokio::test]
    async fn test_batch_failure_aborts() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_batch_error(RpcError::Transport("refused".into()));

        let err = classify(&ctx, &daemon, rounds(&["h:t:100"])).await.unwrap_err();
        assert!(matches!(err, CycleError::Reconcile(_)));
    }

    #[tokio::test]
    async fn test_short_reply_aborts() {
        let ctx = test_context(8, dec!(0.1));
        let daemon = ScriptedDaemon::new().with_truncated_batch(1);

        let err = classify(&ctx, &daemon, rounds(&["h:t:100"])).await.unwrap_err();
        assert!(matches!(err, CycleError::ReplyCountMismatch { expected: 2, got: 1 }));
    }
}
