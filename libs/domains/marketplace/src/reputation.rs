//! Reputation Engine
//!
//! Combines an expert's historical counters into a 0-100 composite score,
//! maps it to a level, and the level to a queue priority. The score is a
//! derived, cached value: recalculation is last-writer-wins per expert.

use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{ExpertLevel, ExpertMetrics, ExpertProfile, Question, QueuePriority, Reputation};

const WEIGHT_RATING: f64 = 0.30;
const WEIGHT_ACCEPTANCE: f64 = 0.20;
const WEIGHT_RESPONSE: f64 = 0.15;
const WEIGHT_TIER_UPGRADE: f64 = 0.15;
const WEIGHT_CORRECTIONS: f64 = 0.10;
const WEIGHT_GRADUATIONS: f64 = 0.10;

/// Neutral value for a signal with no data yet
const NEUTRAL: f64 = 50.0;
const MAX_VOLUME_BONUS: f64 = 5.0;

fn rating_signal(metrics: &ExpertMetrics) -> f64 {
    match metrics.avg_rating {
        Some(rating) if metrics.review_count > 0 => (rating - 1.0) / 4.0 * 100.0,
        _ => NEUTRAL,
    }
}

fn acceptance_signal(metrics: &ExpertMetrics) -> f64 {
    if metrics.answered_count == 0 {
        return NEUTRAL;
    }
    f64::from(metrics.accepted_count) / f64::from(metrics.answered_count) * 100.0
}

fn response_signal(metrics: &ExpertMetrics) -> f64 {
    match metrics.avg_response_minutes {
        None => NEUTRAL,
        Some(minutes) if minutes <= 15.0 => 100.0,
        Some(minutes) if minutes <= 30.0 => 80.0,
        Some(minutes) if minutes <= 60.0 => 60.0,
        Some(minutes) if minutes <= 120.0 => 40.0,
        Some(_) => 20.0,
    }
}

fn tier_upgrade_signal(metrics: &ExpertMetrics) -> f64 {
    if metrics.tier_upgrade_eligible == 0 {
        return NEUTRAL;
    }
    f64::from(metrics.tier_upgraded) / f64::from(metrics.tier_upgrade_eligible) * 100.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Weighted composite plus volume bonus, clamped to 100, two decimals.
pub fn composite_score(metrics: &ExpertMetrics) -> f64 {
    let corrections = (f64::from(metrics.corrections) * 20.0).min(100.0);
    let graduations = (f64::from(metrics.graduations) * 25.0).min(100.0);

    let weighted = rating_signal(metrics) * WEIGHT_RATING
        + acceptance_signal(metrics) * WEIGHT_ACCEPTANCE
        + response_signal(metrics) * WEIGHT_RESPONSE
        + tier_upgrade_signal(metrics) * WEIGHT_TIER_UPGRADE
        + corrections * WEIGHT_CORRECTIONS
        + graduations * WEIGHT_GRADUATIONS;

    let volume_bonus = (f64::from(metrics.answered_count) * 0.5).min(MAX_VOLUME_BONUS);

    round2((weighted + volume_bonus).clamp(0.0, 100.0))
}

pub fn level_for(score: f64) -> ExpertLevel {
    if score >= 85.0 {
        ExpertLevel::Platinum
    } else if score >= 65.0 {
        ExpertLevel::Gold
    } else if score >= 40.0 {
        ExpertLevel::Silver
    } else {
        ExpertLevel::Bronze
    }
}

pub fn evaluate(metrics: &ExpertMetrics) -> Reputation {
    let score = composite_score(metrics);
    Reputation {
        score,
        level: level_for(score),
    }
}

pub fn level_priority(level: ExpertLevel) -> QueuePriority {
    match level {
        ExpertLevel::Platinum => QueuePriority::Premium,
        ExpertLevel::Gold => QueuePriority::Priority,
        ExpertLevel::Silver | ExpertLevel::Bronze => QueuePriority::Standard,
    }
}

/// Effective queue priority: the better of reputation and subscription.
pub fn effective_priority(profile: &ExpertProfile) -> QueuePriority {
    level_priority(profile.expert_level).max(profile.subscription_tier.priority())
}

/// Derive raw counters from an expert's answered questions.
///
/// `threaded` holds the ids of questions on which the DIYer sent at least one
/// follow-up message; only those count toward the tier-upgrade ratio.
pub fn metrics_from_history(
    expert_id: Uuid,
    answered: &[Question],
    threaded: &HashSet<Uuid>,
    profile: Option<&ExpertProfile>,
) -> ExpertMetrics {
    let mine: Vec<&Question> = answered
        .iter()
        .filter(|q| q.expert_id == Some(expert_id) && q.answered_at.is_some())
        .collect();

    let ratings: Vec<f64> = mine
        .iter()
        .filter_map(|q| q.rating.map(f64::from))
        .collect();

    let response_minutes: Vec<f64> = mine
        .iter()
        .filter_map(|q| match (q.claimed_at, q.answered_at) {
            (Some(claimed), Some(answered)) => {
                Some((answered - claimed).num_seconds().max(0) as f64 / 60.0)
            }
            _ => None,
        })
        .collect();

    let eligible: Vec<&&Question> = mine.iter().filter(|q| threaded.contains(&q.id)).collect();

    let average = |values: &[f64]| {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    ExpertMetrics {
        avg_rating: average(&ratings),
        review_count: ratings.len() as u32,
        answered_count: mine.len() as u32,
        accepted_count: mine
            .iter()
            .filter(|q| q.status == crate::models::QuestionStatus::Accepted)
            .count() as u32,
        avg_response_minutes: average(&response_minutes),
        tier_upgrade_eligible: eligible.len() as u32,
        tier_upgraded: eligible.iter().filter(|q| q.current_tier > 1).count() as u32,
        corrections: profile.map_or(0, |p| p.corrections_count),
        graduations: profile.map_or(0, |p| p.graduations_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionTier;

    fn reference_metrics() -> ExpertMetrics {
        ExpertMetrics {
            avg_rating: Some(4.5),
            review_count: 20,
            answered_count: 20,
            accepted_count: 18,
            avg_response_minutes: Some(12.0),
            tier_upgrade_eligible: 10,
            tier_upgraded: 5,
            corrections: 2,
            graduations: 1,
        }
    }

    #[test]
    fn test_reference_expert_scores_gold() {
        // 26.25 + 18 + 15 + 7.5 + 4 + 2.5 + volume bonus 5
        let reputation = evaluate(&reference_metrics());
        assert_eq!(reputation.score, 78.25);
        assert_eq!(reputation.level, ExpertLevel::Gold);
    }

    #[test]
    fn test_new_expert_gets_neutral_signals() {
        let reputation = evaluate(&ExpertMetrics::default());
        // 50 on the four neutral signals, 0 on corrections and graduations
        assert_eq!(reputation.score, 40.0);
        assert_eq!(reputation.level, ExpertLevel::Silver);
    }

    #[test]
    fn test_response_time_steps() {
        let at = |minutes: f64| {
            response_signal(&ExpertMetrics {
                avg_response_minutes: Some(minutes),
                ..Default::default()
            })
        };
        assert_eq!(at(15.0), 100.0);
        assert_eq!(at(15.5), 80.0);
        assert_eq!(at(60.0), 60.0);
        assert_eq!(at(120.0), 40.0);
        assert_eq!(at(121.0), 20.0);
    }

    #[test]
    fn test_score_is_clamped_to_100() {
        let metrics = ExpertMetrics {
            avg_rating: Some(5.0),
            review_count: 50,
            answered_count: 50,
            accepted_count: 50,
            avg_response_minutes: Some(5.0),
            tier_upgrade_eligible: 10,
            tier_upgraded: 10,
            corrections: 10,
            graduations: 10,
        };
        let reputation = evaluate(&metrics);
        assert_eq!(reputation.score, 100.0);
        assert_eq!(reputation.level, ExpertLevel::Platinum);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for(0.0), ExpertLevel::Bronze);
        assert_eq!(level_for(39.99), ExpertLevel::Bronze);
        assert_eq!(level_for(40.0), ExpertLevel::Silver);
        assert_eq!(level_for(65.0), ExpertLevel::Gold);
        assert_eq!(level_for(85.0), ExpertLevel::Platinum);
    }

    #[test]
    fn test_priority_takes_max_of_level_and_subscription() {
        let mut profile = ExpertProfile::new(Uuid::now_v7(), vec![]);
        profile.expert_level = ExpertLevel::Gold;
        profile.subscription_tier = SubscriptionTier::Free;
        assert_eq!(effective_priority(&profile), QueuePriority::Priority);

        profile.subscription_tier = SubscriptionTier::Premium;
        assert_eq!(effective_priority(&profile), QueuePriority::Premium);

        profile.expert_level = ExpertLevel::Bronze;
        profile.subscription_tier = SubscriptionTier::Free;
        assert_eq!(effective_priority(&profile), QueuePriority::Standard);
    }
}
