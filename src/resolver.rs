//! First-is-First conflict resolver
//!
//! Adjudicates a block claimed through two different sats. Chain order is the
//! only tiebreak authority: confirmed height first, then transaction position
//! inside the block, then inscription index inside the transaction.
//!
//! ## Rules (first match wins)
//!
//! 1. Neither side names an inscription: `NEITHER`.
//! 2. One side names none: the other side wins.
//! 3. Both name the same inscription: identical-identity sub-protocol.
//! 4. Different inscriptions: earlier ledger position wins, `UNKNOWN` when
//!    neither position can be ordered.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::config::ResolverConfig;
use crate::error::ProviderError;
use crate::inscription::{bitmap_content, InscriptionId, InscriptionService};
use crate::ledger::{LedgerPosition, LedgerSource};
use crate::registry::{BlockHeight, SatNumber};

/// Two competing claims for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub block: BlockHeight,
    pub claimant_a: Option<InscriptionId>,
    pub claimant_b: Option<InscriptionId>,
    pub sat_a: SatNumber,
    pub sat_b: SatNumber,
}

/// Which side a verdict favors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    A,
    B,
    Both,
    Neither,
    Unknown,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Winner::A => "A",
            Winner::B => "B",
            Winner::Both => "BOTH",
            Winner::Neither => "NEITHER",
            Winner::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Outcome of resolving one conflict. Never revised once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub block: BlockHeight,
    pub winner: Winner,
    pub winning_identity: Option<InscriptionId>,
    pub winning_sat: Option<SatNumber>,
    pub losing_sat: Option<SatNumber>,
    pub reason: String,
}

impl Verdict {
    fn side(
        conflict: &Conflict,
        winner: Winner,
        identity: Option<InscriptionId>,
        reason: String,
    ) -> Self {
        let (winning_sat, losing_sat) = match winner {
            Winner::A => (Some(conflict.sat_a), Some(conflict.sat_b)),
            Winner::B => (Some(conflict.sat_b), Some(conflict.sat_a)),
            _ => (None, None),
        };
        Self {
            block: conflict.block,
            winner,
            winning_identity: identity,
            winning_sat,
            losing_sat,
            reason,
        }
    }

    fn undecided(conflict: &Conflict, winner: Winner, reason: String) -> Self {
        Self::side(conflict, winner, None, reason)
    }
}

/// Ordering of two claims by chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOrder {
    /// The first claim came first
    First(String),
    /// The second claim came first
    Second(String),
    /// Positions cannot be ordered
    Undecided(String),
}

/// Order two inscriptions by their ledger positions.
///
/// Lower confirmed height wins; at equal heights the lower transaction
/// position wins; inside one transaction the lower inscription index wins;
/// a confirmed claim beats an unconfirmed one.
pub fn order_claims(
    first: (&InscriptionId, LedgerPosition),
    second: (&InscriptionId, LedgerPosition),
) -> ChainOrder {
    let (id_a, pos_a) = first;
    let (id_b, pos_b) = second;

    match (pos_a.block_height, pos_b.block_height) {
        (Some(ha), Some(hb)) if ha != hb => {
            let reason = format!(
                "confirmed at block {} before block {}",
                ha.min(hb),
                ha.max(hb)
            );
            if ha < hb {
                ChainOrder::First(reason)
            } else {
                ChainOrder::Second(reason)
            }
        }
        (Some(height), Some(_)) => match (pos_a.block_position, pos_b.block_position) {
            (Some(pa), Some(pb)) if pa != pb => {
                let reason = format!(
                    "both in block {}, tx position {} before {}",
                    height,
                    pa.min(pb),
                    pa.max(pb)
                );
                if pa < pb {
                    ChainOrder::First(reason)
                } else {
                    ChainOrder::Second(reason)
                }
            }
            (Some(position), Some(_)) if id_a.txid() == id_b.txid() => {
                let reason = |first: u32, second: u32| {
                    format!(
                        "same reveal tx at block {} position {}, inscription index {} before {}",
                        height, position, first, second
                    )
                };
                match id_a.index().cmp(&id_b.index()) {
                    Ordering::Less => ChainOrder::First(reason(id_a.index(), id_b.index())),
                    Ordering::Greater => ChainOrder::Second(reason(id_b.index(), id_a.index())),
                    Ordering::Equal => {
                        ChainOrder::Undecided("both claims name the same inscription".to_string())
                    }
                }
            }
            (Some(position), Some(_)) => ChainOrder::Undecided(format!(
                "different transactions reported at the same position {} of block {}",
                position, height
            )),
            _ => ChainOrder::Undecided(format!(
                "both confirmed in block {} but a transaction position is unknown",
                height
            )),
        },
        (Some(height), None) => ChainOrder::First(format!(
            "confirmed at block {} while the other claim is unconfirmed",
            height
        )),
        (None, Some(height)) => ChainOrder::Second(format!(
            "confirmed at block {} while the other claim is unconfirmed",
            height
        )),
        (None, None) => {
            ChainOrder::Undecided("neither claim has a confirmed ledger position".to_string())
        }
    }
}

/// First-is-First resolver over a ledger source and an inscription service.
pub struct FifResolver<L: LedgerSource, I: InscriptionService> {
    ledger: L,
    inscriptions: I,
    config: ResolverConfig,
}

impl<L: LedgerSource, I: InscriptionService> FifResolver<L, I> {
    pub fn new(ledger: L, inscriptions: I, config: ResolverConfig) -> Self {
        Self {
            ledger,
            inscriptions,
            config,
        }
    }

    /// Resolve conflicts one at a time, pausing between resolutions.
    pub async fn resolve_all(&mut self, conflicts: &[Conflict]) -> Vec<Verdict> {
        self.ledger.begin_run();
        self.inscriptions.begin_run();

        let mut verdicts = Vec::with_capacity(conflicts.len());
        for (i, conflict) in conflicts.iter().enumerate() {
            if i > 0 && !self.config.resolution_spacing.is_zero() {
                tokio::time::sleep(self.config.resolution_spacing).await;
            }
            let verdict = self.resolve(conflict).await;
            tracing::info!(
                block = verdict.block,
                winner = %verdict.winner,
                reason = %verdict.reason,
                "conflict resolved"
            );
            verdicts.push(verdict);
        }
        verdicts
    }

    /// Resolve one conflict. Provider failures yield an `UNKNOWN` verdict.
    pub async fn resolve(&mut self, conflict: &Conflict) -> Verdict {
        match self.try_resolve(conflict).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(
                    block = conflict.block,
                    error = %err,
                    "resolution failed, verdict UNKNOWN"
                );
                Verdict::undecided(conflict, Winner::Unknown, format!("provider failure: {}", err))
            }
        }
    }

    async fn try_resolve(&mut self, conflict: &Conflict) -> Result<Verdict, ProviderError> {
        match (&conflict.claimant_a, &conflict.claimant_b) {
            (None, None) => Ok(Verdict::undecided(
                conflict,
                Winner::Neither,
                "neither side has an inscription for this block".to_string(),
            )),
            (Some(a), None) => Ok(Verdict::side(
                conflict,
                Winner::A,
                Some(a.clone()),
                "missing identity on side B".to_string(),
            )),
            (None, Some(b)) => Ok(Verdict::side(
                conflict,
                Winner::B,
                Some(b.clone()),
                "missing identity on side A".to_string(),
            )),
            (Some(a), Some(b)) if a == b => self.resolve_identical(conflict, a).await,
            (Some(a), Some(b)) => {
                let pos_a = self.ledger.ledger_position(a.txid()).await?;
                let pos_b = self.ledger.ledger_position(b.txid()).await?;
                Ok(match order_claims((a, pos_a), (b, pos_b)) {
                    ChainOrder::First(reason) => {
                        Verdict::side(conflict, Winner::A, Some(a.clone()), reason)
                    }
                    ChainOrder::Second(reason) => {
                        Verdict::side(conflict, Winner::B, Some(b.clone()), reason)
                    }
                    ChainOrder::Undecided(reason) => {
                        Verdict::undecided(conflict, Winner::Unknown, reason)
                    }
                })
            }
        }
    }

    /// Both sides name `id` but back it with different sats.
    async fn resolve_identical(
        &mut self,
        conflict: &Conflict,
        id: &InscriptionId,
    ) -> Result<Verdict, ProviderError> {
        let Some(actual) = self.inscriptions.sat_for_inscription(id).await? else {
            return Ok(Verdict::undecided(
                conflict,
                Winner::Unknown,
                format!("actual sat of {} is unknown", id),
            ));
        };

        let on_a = actual == conflict.sat_a;
        let on_b = actual == conflict.sat_b;
        let (provisional, other_side, other_sat) = match (on_a, on_b) {
            (true, true) => {
                return Ok(Verdict::side(
                    conflict,
                    Winner::Both,
                    Some(id.clone()),
                    format!("both sides agree {} is on sat {}", id, actual),
                ));
            }
            (false, false) => {
                return Ok(Verdict::undecided(
                    conflict,
                    Winner::Unknown,
                    format!(
                        "{} is on sat {}, matching neither {} nor {}",
                        id, actual, conflict.sat_a, conflict.sat_b
                    ),
                ));
            }
            (true, false) => (Winner::A, Winner::B, conflict.sat_b),
            (false, true) => (Winner::B, Winner::A, conflict.sat_a),
        };

        let Some(rival) = self.find_bitmap_inscription(other_sat, conflict.block, id).await? else {
            return Ok(Verdict::side(
                conflict,
                provisional,
                Some(id.clone()),
                format!(
                    "{} is on sat {}; remaining sat {} has no valid bitmap inscription",
                    id, actual, other_sat
                ),
            ));
        };

        let pos_id = self.ledger.ledger_position(id.txid()).await?;
        let pos_rival = self.ledger.ledger_position(rival.txid()).await?;
        Ok(match order_claims((id, pos_id), (&rival, pos_rival)) {
            ChainOrder::First(reason) => Verdict::side(
                conflict,
                provisional,
                Some(id.clone()),
                format!(
                    "{} on sat {} precedes {} on sat {}: {}",
                    id, actual, rival, other_sat, reason
                ),
            ),
            ChainOrder::Second(reason) => Verdict::side(
                conflict,
                other_side,
                Some(rival.clone()),
                format!(
                    "{} on sat {} precedes {} on sat {}: {}",
                    rival, other_sat, id, actual, reason
                ),
            ),
            ChainOrder::Undecided(reason) => Verdict::undecided(conflict, Winner::Unknown, reason),
        })
    }

    /// First inscription on `sat` whose content is exactly `{block}.bitmap`.
    async fn find_bitmap_inscription(
        &mut self,
        sat: SatNumber,
        block: BlockHeight,
        exclude: &InscriptionId,
    ) -> Result<Option<InscriptionId>, ProviderError> {
        let expected = bitmap_content(block);
        for candidate in self.inscriptions.inscriptions_for_sat(sat).await? {
            if &candidate == exclude {
                continue;
            }
            match self.inscriptions.content(&candidate).await {
                Ok(content) if content == expected.as_bytes() => return Ok(Some(candidate)),
                Ok(_) => {}
                Err(ProviderError::NotFound { .. }) => {
                    tracing::debug!(sat, inscription = %candidate, "content not found, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

/// Count verdicts per outcome, in a fixed order.
pub fn verdict_histogram(verdicts: &[Verdict]) -> Vec<(Winner, usize)> {
    [Winner::A, Winner::B, Winner::Both, Winner::Neither, Winner::Unknown]
        .into_iter()
        .map(|w| (w, verdicts.iter().filter(|v| v.winner == w).count()))
        .collect()
}
