use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::types::{MarketObservation, ScoredMarket, Tier, TierMember};

/// Ranks markets by score (descending) and cuts them into `tier_count` tiers
/// of `ceil(n / tier_count)` members; the last tier absorbs the remainder.
///
/// Ties keep their input order. Tiers that would be empty (n < tier_count)
/// are omitted, so the result may hold fewer than `tier_count` tiers.
pub fn assign_tiers(scored: &[ScoredMarket], tier_count: usize) -> Result<Vec<Tier>> {
    if tier_count == 0 {
        return Err(EngineError::InvalidParameter(
            "tier count must be >= 1".to_string(),
        ));
    }
    validate_scores(scored)?;
    if scored.is_empty() {
        return Ok(Vec::new());
    }

    let ranked = ranked_by_score(scored);

    let n = ranked.len();
    let size = n.div_ceil(tier_count);
    let mut tiers: Vec<Tier> = Vec::new();

    for (r, market) in ranked.into_iter().enumerate() {
        let tier = ((r / size).min(tier_count - 1) + 1) as u32;
        let member = TierMember {
            market_id: market.market_id.clone(),
            score: market.score,
            rank: (r % size + 1) as u32,
        };
        match tiers.last_mut() {
            Some(last) if last.tier == tier => last.members.push(member),
            _ => tiers.push(Tier {
                tier,
                members: vec![member],
            }),
        }
    }
    Ok(tiers)
}

/// Groups markets by the tier number assigned upstream instead of cutting
/// the score ranking. Members are ranked by score within their tier and
/// tiers come out in ascending tier order.
pub fn tiers_from_labels(scored: &[ScoredMarket], labels: &HashMap<String, u32>) -> Result<Vec<Tier>> {
    validate_scores(scored)?;
    let mut grouped: BTreeMap<u32, Vec<TierMember>> = BTreeMap::new();
    for market in ranked_by_score(scored) {
        let tier = labels.get(&market.market_id).copied().ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "market {:?} has no assigned tier",
                market.market_id
            ))
        })?;
        let members = grouped.entry(tier).or_default();
        members.push(TierMember {
            market_id: market.market_id.clone(),
            score: market.score,
            rank: members.len() as u32 + 1,
        });
    }
    Ok(grouped
        .into_iter()
        .map(|(tier, members)| Tier { tier, members })
        .collect())
}

/// Tier number per market from the observations' upstream labels.
///
/// Labels read as `3` or `Tier 3` (case-insensitive). Markets whose rows
/// carry no label are left out; conflicting labels for one market are
/// rejected.
pub fn assigned_tiers(observations: &[MarketObservation]) -> Result<HashMap<String, u32>> {
    let mut tiers: HashMap<String, u32> = HashMap::new();
    for obs in observations {
        let Some(label) = obs.tier.as_deref() else {
            continue;
        };
        let tier = parse_tier_label(label).ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "market {:?}: tier label {label:?} is not a tier number",
                obs.market_id
            ))
        })?;
        match tiers.get(&obs.market_id) {
            Some(&existing) if existing != tier => {
                return Err(EngineError::InvalidParameter(format!(
                    "market {:?} is labelled tier {existing} and tier {tier}",
                    obs.market_id
                )));
            }
            Some(_) => {}
            None => {
                tiers.insert(obs.market_id.clone(), tier);
            }
        }
    }
    Ok(tiers)
}

fn parse_tier_label(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let digits = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("tier") => trimmed[4..].trim_start(),
        _ => trimmed,
    };
    digits.parse::<u32>().ok().filter(|&t| t >= 1)
}

fn validate_scores(scored: &[ScoredMarket]) -> Result<()> {
    let mut seen = HashSet::with_capacity(scored.len());
    for m in scored {
        if !m.score.is_finite() {
            return Err(EngineError::InvalidParameter(format!(
                "score for {:?} is not finite",
                m.market_id
            )));
        }
        if !seen.insert(m.market_id.as_str()) {
            return Err(EngineError::InvalidParameter(format!(
                "market {:?} is scored twice",
                m.market_id
            )));
        }
    }
    Ok(())
}

/// Descending by score; sort_by is stable so ties keep input order.
fn ranked_by_score(scored: &[ScoredMarket]) -> Vec<&ScoredMarket> {
    let mut ranked: Vec<&ScoredMarket> = scored.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// The first `count` members of each tier listed in `selected` (all tiers when empty).
pub fn top_per_tier(tiers: &[Tier], count: usize, selected: &[u32]) -> Vec<Tier> {
    tiers
        .iter()
        .filter(|t| selected.is_empty() || selected.contains(&t.tier))
        .map(|t| Tier {
            tier: t.tier,
            members: t.members.iter().take(count).cloned().collect(),
        })
        .filter(|t| !t.members.is_empty())
        .collect()
}

/// Market ids belonging to any tier in `selected`, in tier then rank order.
pub fn markets_in_tiers(tiers: &[Tier], selected: &[u32]) -> Vec<String> {
    tiers
        .iter()
        .filter(|t| selected.contains(&t.tier))
        .flat_map(|t| t.members.iter().map(|m| m.market_id.clone()))
        .collect()
}
