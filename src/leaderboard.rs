//! Leaderboard view
//!
//! Ranks completed, scored submissions. Derived from store data on every
//! call; nothing is cached.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::core::{Bot, BotId, BotResult, SubmissionId, TestCase, TestCaseId};
use crate::store::SubmissionStore;
use crate::submission::Submission;

/// Default page size
pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardFilter {
    /// Only bots with this algorithm label
    pub algorithm: Option<String>,
    /// Only submissions with a passing result in this test-case category
    pub category: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for LeaderboardFilter {
    fn default() -> Self {
        Self {
            algorithm: None,
            category: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub submission_id: SubmissionId,
    pub bot_id: BotId,
    pub bot_name: String,
    pub algorithm: Option<String>,
    pub author: Option<String>,
    pub score: f64,
    pub submitted_at: DateTime<Utc>,
}

pub fn build_leaderboard(
    submissions: &[Submission],
    bots: &[Bot],
    results: &HashMap<SubmissionId, Vec<BotResult>>,
    test_cases: &[TestCase],
    filter: &LeaderboardFilter,
) -> Vec<LeaderboardEntry> {
    let bots: HashMap<BotId, &Bot> = bots.iter().map(|b| (b.id, b)).collect();
    let in_category: Option<HashSet<TestCaseId>> = filter.category.as_ref().map(|category| {
        test_cases
            .iter()
            .filter(|tc| &tc.category == category)
            .map(|tc| tc.id)
            .collect()
    });

    let mut ranked: Vec<(&Submission, &Bot, f64)> = submissions
        .iter()
        .filter_map(|s| {
            let score = s.score.filter(|_| s.is_ranked())?;
            let bot = *bots.get(&s.bot_id)?;
            Some((s, bot, score))
        })
        .filter(|(_, bot, _)| match &filter.algorithm {
            Some(algorithm) => bot.algorithm.as_ref() == Some(algorithm),
            None => true,
        })
        .filter(|(s, _, _)| match &in_category {
            Some(ids) => results.get(&s.id).is_some_and(|rs| {
                rs.iter()
                    .any(|r| r.outcome.is_pass() && ids.contains(&r.test_case_id))
            }),
            None => true,
        })
        .collect();

    ranked.sort_by(|(a, _, a_score), (b, _, b_score)| {
        b_score
            .total_cmp(a_score)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    ranked
        .into_iter()
        .skip(filter.offset)
        .take(filter.limit)
        .enumerate()
        .map(|(idx, (s, bot, score))| LeaderboardEntry {
            rank: filter.offset + idx + 1,
            submission_id: s.id,
            bot_id: bot.id,
            bot_name: bot.name.clone(),
            algorithm: bot.algorithm.clone(),
            author: bot.author.clone(),
            score,
            submitted_at: s.created_at,
        })
        .collect()
}

/// Load everything the view needs from `store` and rank it
pub async fn leaderboard(
    store: &dyn SubmissionStore,
    filter: &LeaderboardFilter,
) -> Result<Vec<LeaderboardEntry>> {
    let submissions = store.list_submissions().await?;
    let bots = store.list_bots().await?;

    let mut results = HashMap::new();
    let test_cases = if filter.category.is_some() {
        for s in submissions.iter().filter(|s| s.is_ranked()) {
            results.insert(s.id, store.list_results(s.id).await?);
        }
        store.list_test_cases().await?
    } else {
        Vec::new()
    };

    Ok(build_leaderboard(
        &submissions,
        &bots,
        &results,
        &test_cases,
        filter,
    ))
}
